//! The canonical, normalized post record produced by the post parser (C4)
//! and consumed by the filter runtime (C3), the event store (C5), and the
//! derivation engine (C9).
//!
//! `Post` never carries the raw upstream JSON — normalization (hashtag
//! extraction, embed classification, link extraction) happens once in the
//! parser, not on every filter evaluation.

use serde::{Deserialize, Serialize};

use crate::types::{Cid, Did, Handle, Hashtag, Timestamp, Uri};

/// Invariant: `uri` + `cid` identify the exact revision. Two posts with
/// equal `uri` may differ in `cid` on edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub uri: Uri,
    pub cid: Cid,
    pub author_handle: Handle,
    pub author_did: Did,
    pub created_at: Timestamp,
    pub indexed_at: Timestamp,
    pub text: String,
    /// Lowercased, without leading `#`, deduplicated.
    pub hashtags: Vec<Hashtag>,
    pub links: Vec<String>,
    pub langs: Vec<String>,
    pub embed: Option<Embed>,
    pub reply: Option<ReplyRef>,
    pub feed_reason: Option<FeedReason>,
    pub metrics: Metrics,
    pub labels: Vec<String>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    pub fn is_quote(&self) -> bool {
        matches!(
            self.embed,
            Some(Embed::Record { .. }) | Some(Embed::RecordWithMedia { .. })
        )
    }

    pub fn is_repost(&self) -> bool {
        matches!(self.feed_reason, Some(FeedReason::Repost { .. }))
    }

    pub fn is_original(&self) -> bool {
        !self.is_reply() && !self.is_quote() && !self.is_repost()
    }

    pub fn has_images(&self) -> bool {
        matches!(self.embed, Some(Embed::Images { .. }))
            || matches!(
                &self.embed,
                Some(Embed::RecordWithMedia { media, .. }) if matches!(media.as_ref(), Embed::Images { .. })
            )
    }

    pub fn image_count(&self) -> usize {
        match &self.embed {
            Some(Embed::Images { images }) => images.len(),
            Some(Embed::RecordWithMedia { media, .. }) => match media.as_ref() {
                Embed::Images { images } => images.len(),
                _ => 0,
            },
            _ => 0,
        }
    }

    pub fn has_alt_text(&self) -> bool {
        self.all_alt_texts().any(|alt| !alt.trim().is_empty())
    }

    pub fn has_video(&self) -> bool {
        matches!(self.embed, Some(Embed::Video { .. }))
            || matches!(
                &self.embed,
                Some(Embed::RecordWithMedia { media, .. }) if matches!(media.as_ref(), Embed::Video { .. })
            )
    }

    fn external_embed(&self) -> bool {
        matches!(self.embed, Some(Embed::External { .. }))
            || matches!(
                &self.embed,
                Some(Embed::RecordWithMedia { media, .. }) if matches!(media.as_ref(), Embed::External { .. })
            )
    }

    pub fn has_media(&self) -> bool {
        self.has_images() || self.has_video() || self.external_embed() || !self.links.is_empty()
    }

    pub fn has_embed(&self) -> bool {
        self.embed.is_some()
    }

    pub fn has_links(&self) -> bool {
        !self.links.is_empty()
    }

    /// All alt-text strings present on the post's image embed, if any.
    pub fn all_alt_texts(&self) -> impl Iterator<Item = &str> {
        let images: &[ImageEmbed] = match &self.embed {
            Some(Embed::Images { images }) => images.as_slice(),
            Some(Embed::RecordWithMedia { media, .. }) => match media.as_ref() {
                Embed::Images { images } => images.as_slice(),
                _ => &[],
            },
            _ => &[],
        };
        images.iter().filter_map(|img| img.alt.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEmbed {
    pub alt: Option<String>,
    pub aspect_ratio: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Embed {
    Images {
        images: Vec<ImageEmbed>,
    },
    External {
        uri: String,
        title: String,
        description: String,
    },
    Video {
        cid: Cid,
        playlist: Option<String>,
    },
    Record {
        target: Uri,
    },
    RecordWithMedia {
        record: Uri,
        media: Box<Embed>,
    },
    /// An embed whose `$type` string we don't recognize. Classification
    /// always goes through the helper predicates above (`has_images`,
    /// `is_quote`, ...) rather than re-inspecting `raw_type` at read
    /// sites.
    Unknown {
        raw_type: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: Uri,
    pub parent: Uri,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedReason {
    Repost { by: Did, at: Timestamp },
    Pin,
    Unknown { raw_type: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub reply_count: Option<u64>,
    pub repost_count: Option<u64>,
    pub like_count: Option<u64>,
    pub quote_count: Option<u64>,
    pub bookmark_count: Option<u64>,
}

impl Metrics {
    pub fn likes(&self) -> u64 {
        self.like_count.unwrap_or(0)
    }

    pub fn reposts(&self) -> u64 {
        self.repost_count.unwrap_or(0)
    }

    pub fn replies(&self) -> u64 {
        self.reply_count.unwrap_or(0)
    }
}
