//! Normalizes a pre-decoded protocol payload (`serde_json::Value`) into
//! a canonical [`skygent_core::Post`] (spec.md §4.3, C4).
//!
//! Wire decoding (raw HTTP/WS bytes -> JSON) is the upstream adapter's
//! job — this module's input already is JSON.

use regex::Regex;
use serde_json::Value;
use skygent_core::post::{Embed, FeedReason, ImageEmbed, Metrics, ReplyRef};
use skygent_core::types::{Cid, Did, Handle, Hashtag, Timestamp, Uri};
use skygent_core::Post;
use std::sync::OnceLock;
use tracing::warn;

use crate::error::{fail, ParseResult, ParseStage};

const LOG_TARGET: &str = "skygent::post::parser";

fn hashtag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#[a-zA-Z0-9_]+").expect("static pattern is valid"))
}

/// Parses one feed-view item's JSON into a canonical [`Post`].
///
/// `strict`: when true, any field that can't be validated is a hard
/// `ParseError`; when false (the sync engines' default — spec.md §4.3),
/// callers are expected to catch the error, log a `warn`, and skip the
/// item rather than aborting the whole page/batch.
pub fn parse_post(value: &Value, strict: bool) -> ParseResult<Post> {
    let uri = require_str(value, "uri", ParseStage::Envelope)?;
    let cid = require_str(value, "cid", ParseStage::Envelope)?;

    let Some(author) = value.get("author") else {
        return fail(ParseStage::Author, "author", "missing");
    };
    let author_handle = require_str(author, "handle", ParseStage::Author)?;
    let author_did = require_str(author, "did", ParseStage::Author)?;

    let record = value.get("record").cloned().unwrap_or(Value::Null);
    let indexed_at_str = require_str(value, "indexedAt", ParseStage::Envelope)?;
    let indexed_at = parse_timestamp(&indexed_at_str, "indexedAt", ParseStage::Envelope)?;
    let created_at = match record.get("createdAt").and_then(Value::as_str) {
        Some(s) => parse_timestamp(s, "record.createdAt", ParseStage::Record).unwrap_or(indexed_at),
        None => indexed_at,
    };

    let text = record.get("text").and_then(Value::as_str).unwrap_or_default().to_string();

    let mut hashtags: Vec<Hashtag> = Vec::new();
    collect_facet_hashtags(&record, &mut hashtags);
    collect_text_hashtags(&text, &mut hashtags);
    dedup_hashtags(&mut hashtags);

    let mut links: Vec<String> = Vec::new();
    collect_facet_links(&record, &mut links);

    let langs: Vec<String> = record
        .get("langs")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let embed_value = value.get("embed").or_else(|| record.get("embed"));
    let embed = match embed_value {
        Some(v) if !v.is_null() => Some(parse_embed(v, &mut links, strict)?),
        _ => None,
    };

    let reply = match record.get("reply") {
        Some(v) if !v.is_null() => Some(parse_reply(v)?),
        _ => None,
    };

    let feed_reason = value.get("reason").and_then(|v| if v.is_null() { None } else { Some(v) }).map(parse_feed_reason);

    let metrics = Metrics {
        reply_count: value.get("replyCount").and_then(Value::as_u64),
        repost_count: value.get("repostCount").and_then(Value::as_u64),
        like_count: value.get("likeCount").and_then(Value::as_u64),
        quote_count: value.get("quoteCount").and_then(Value::as_u64),
        bookmark_count: value.get("bookmarkCount").and_then(Value::as_u64),
    };

    let labels: Vec<String> = value
        .get("labels")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|l| l.get("val").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Post {
        uri: Uri::from(uri),
        cid: Cid::from(cid),
        author_handle: Handle::from(author_handle),
        author_did: Did::from(author_did),
        created_at,
        indexed_at,
        text,
        hashtags,
        links,
        langs,
        embed,
        reply,
        feed_reason,
        metrics,
        labels,
    })
}

fn require_str(value: &Value, field: &str, stage: ParseStage) -> ParseResult<String> {
    match value.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        Some(_) => fail(stage, field, "empty string"),
        None => fail(stage, field, "missing or not a string"),
    }
}

fn parse_timestamp(s: &str, field: &str, stage: ParseStage) -> ParseResult<Timestamp> {
    humantime_like_rfc3339_to_millis(s)
        .map(Timestamp::from_millis)
        .ok_or(())
        .or_else(|_| fail(stage, field, format!("invalid RFC3339 timestamp `{s}`")))
}

/// Minimal RFC3339 -> epoch-millis conversion covering the subset of
/// the format the upstream protocol actually emits
/// (`YYYY-MM-DDTHH:MM:SS[.fff]Z`); full calendar generality (timezone
/// offsets other than `Z`, leap seconds) is out of scope — nothing in
/// the protocol's own JSON emits those.
fn humantime_like_rfc3339_to_millis(s: &str) -> Option<i64> {
    let s = s.strip_suffix('Z').unwrap_or(s);
    let (date, time) = s.split_once('T')?;
    let mut date_parts = date.split('-');
    let year: i64 = date_parts.next()?.parse().ok()?;
    let month: i64 = date_parts.next()?.parse().ok()?;
    let day: i64 = date_parts.next()?.parse().ok()?;

    let (time, millis) = match time.split_once('.') {
        Some((t, frac)) => {
            let frac = format!("{frac:0<3}");
            (t, frac[..3].parse::<i64>().ok()?)
        }
        None => (time, 0),
    };
    let mut time_parts = time.split(':');
    let hour: i64 = time_parts.next()?.parse().ok()?;
    let minute: i64 = time_parts.next()?.parse().ok()?;
    let second: i64 = time_parts.next()?.parse().ok()?;

    let days = days_since_epoch(year, month, day)?;
    Some(((days * 86_400 + hour * 3_600 + minute * 60 + second) * 1000) + millis)
}

fn days_since_epoch(year: i64, month: i64, day: i64) -> Option<i64> {
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    // Howard Hinnant's civil_from_days inverse (days_from_civil), a
    // well-known branch-free calendar conversion.
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Some(era * 146_097 + doe - 719_468)
}

fn collect_facet_hashtags(record: &Value, out: &mut Vec<Hashtag>) {
    let Some(facets) = record.get("facets").and_then(Value::as_array) else { return };
    for facet in facets {
        let Some(features) = facet.get("features").and_then(Value::as_array) else { continue };
        for feature in features {
            let is_tag = feature.get("$type").and_then(Value::as_str) == Some("app.bsky.richtext.facet#tag");
            if is_tag {
                if let Some(tag) = feature.get("tag").and_then(Value::as_str) {
                    out.push(Hashtag::from(tag.trim_start_matches('#').to_ascii_lowercase()));
                }
            }
        }
    }
}

fn collect_text_hashtags(text: &str, out: &mut Vec<Hashtag>) {
    for m in hashtag_pattern().find_iter(text) {
        out.push(Hashtag::from(m.as_str().trim_start_matches('#').to_ascii_lowercase()));
    }
}

fn dedup_hashtags(tags: &mut Vec<Hashtag>) {
    let mut seen = std::collections::HashSet::new();
    tags.retain(|t| seen.insert(t.as_str().to_string()));
}

fn collect_facet_links(record: &Value, out: &mut Vec<String>) {
    let Some(facets) = record.get("facets").and_then(Value::as_array) else { return };
    for facet in facets {
        let Some(features) = facet.get("features").and_then(Value::as_array) else { continue };
        for feature in features {
            let is_link = feature.get("$type").and_then(Value::as_str) == Some("app.bsky.richtext.facet#link");
            if is_link {
                if let Some(uri) = feature.get("uri").and_then(Value::as_str) {
                    out.push(uri.to_string());
                }
            }
        }
    }
}

/// Maps an embed's `$type` string to the typed union. Per spec.md §9's
/// design note, this is the *one* read site allowed to branch on the
/// raw tag string — every other call site in the workspace goes through
/// `Post`'s helper predicates instead.
fn parse_embed(value: &Value, links: &mut Vec<String>, strict: bool) -> ParseResult<Embed> {
    let raw_type = value.get("$type").and_then(Value::as_str).unwrap_or("").to_string();
    let embed = match raw_type.as_str() {
        "app.bsky.embed.images" | "app.bsky.embed.images#view" => {
            let images = value
                .get("images")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().map(parse_image_embed).collect())
                .unwrap_or_default();
            Embed::Images { images }
        }
        "app.bsky.embed.external" | "app.bsky.embed.external#view" => {
            let external = value.get("external").unwrap_or(value);
            let uri = external.get("uri").and_then(Value::as_str).unwrap_or_default().to_string();
            if !uri.is_empty() && !links.contains(&uri) {
                links.push(uri.clone());
            }
            Embed::External {
                uri,
                title: external.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
                description: external.get("description").and_then(Value::as_str).unwrap_or_default().to_string(),
            }
        }
        "app.bsky.embed.video" | "app.bsky.embed.video#view" => {
            let cid = value.get("cid").or_else(|| value.get("video").and_then(|v| v.get("ref")).and_then(|r| r.get("$link")));
            let cid = cid.and_then(Value::as_str).unwrap_or_default().to_string();
            Embed::Video { cid: Cid::from(cid), playlist: value.get("playlist").and_then(Value::as_str).map(str::to_string) }
        }
        "app.bsky.embed.record" | "app.bsky.embed.record#view" => {
            let target = record_target_uri(value);
            if strict && target.is_empty() {
                return fail(ParseStage::Embed, "record.uri", "missing quoted record uri");
            }
            Embed::Record { target: Uri::from(target) }
        }
        "app.bsky.embed.recordWithMedia" | "app.bsky.embed.recordWithMedia#view" => {
            let record_uri = value.get("record").map(record_target_uri).unwrap_or_default();
            let media = value
                .get("media")
                .map(|m| parse_embed(m, links, strict))
                .transpose()?
                .unwrap_or(Embed::Unknown { raw_type: "none".to_string() });
            Embed::RecordWithMedia { record: Uri::from(record_uri), media: Box::new(media) }
        }
        other => {
            if strict {
                return fail(ParseStage::Embed, "$type", format!("unrecognized embed type `{other}`"));
            }
            warn!(target: LOG_TARGET, raw_type = other, "unrecognized embed type, preserving as Unknown");
            Embed::Unknown { raw_type: other.to_string() }
        }
    };
    Ok(embed)
}

fn record_target_uri(value: &Value) -> String {
    value
        .get("record")
        .and_then(|r| r.get("uri"))
        .or_else(|| value.get("uri"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_image_embed(value: &Value) -> ImageEmbed {
    let aspect_ratio = value.get("aspectRatio").and_then(|ar| {
        let width = ar.get("width").and_then(Value::as_u64)? as u32;
        let height = ar.get("height").and_then(Value::as_u64)? as u32;
        Some((width, height))
    });
    ImageEmbed { alt: value.get("alt").and_then(Value::as_str).map(str::to_string), aspect_ratio }
}

fn parse_reply(value: &Value) -> ParseResult<ReplyRef> {
    let root = value.get("root").and_then(|r| r.get("uri")).and_then(Value::as_str);
    let parent = value.get("parent").and_then(|p| p.get("uri")).and_then(Value::as_str);
    match (root, parent) {
        (Some(root), Some(parent)) => Ok(ReplyRef { root: Uri::from(root), parent: Uri::from(parent) }),
        _ => fail(ParseStage::Reply, "reply", "missing root or parent uri"),
    }
}

fn parse_feed_reason(value: &Value) -> FeedReason {
    let raw_type = value.get("$type").and_then(Value::as_str).unwrap_or("").to_string();
    match raw_type.as_str() {
        "app.bsky.feed.defs#reasonRepost" => {
            let by = value.get("by").and_then(|b| b.get("did")).and_then(Value::as_str).unwrap_or_default();
            let at = value
                .get("indexedAt")
                .and_then(Value::as_str)
                .and_then(humantime_like_rfc3339_to_millis)
                .map(Timestamp::from_millis)
                .unwrap_or(Timestamp::EPOCH);
            FeedReason::Repost { by: Did::from(by), at }
        }
        "app.bsky.feed.defs#reasonPin" => FeedReason::Pin,
        other => FeedReason::Unknown { raw_type: other.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_post() {
        let value = json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/1",
            "cid": "bafy1",
            "author": { "handle": "alice.bsky.social", "did": "did:plc:abc" },
            "indexedAt": "2024-01-15T10:30:00.000Z",
            "record": { "text": "hello #rustlang", "createdAt": "2024-01-15T10:29:00.000Z" },
        });
        let post = parse_post(&value, true).unwrap();
        assert_eq!(post.text, "hello #rustlang");
        assert_eq!(post.hashtags.len(), 1);
        assert_eq!(post.hashtags[0].as_str(), "rustlang");
        assert_eq!(post.created_at.as_millis(), 1_705_314_540_000);
    }

    #[test]
    fn falls_back_to_indexed_at_when_created_at_missing() {
        let value = json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/1",
            "cid": "bafy1",
            "author": { "handle": "alice.bsky.social", "did": "did:plc:abc" },
            "indexedAt": "2024-01-15T10:30:00.000Z",
            "record": { "text": "no createdAt" },
        });
        let post = parse_post(&value, true).unwrap();
        assert_eq!(post.created_at, post.indexed_at);
    }

    #[test]
    fn extracts_hashtags_from_facets_and_text_deduplicated() {
        let value = json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/1",
            "cid": "bafy1",
            "author": { "handle": "alice.bsky.social", "did": "did:plc:abc" },
            "indexedAt": "2024-01-15T10:30:00.000Z",
            "record": {
                "text": "talking #ai things",
                "facets": [{
                    "features": [{ "$type": "app.bsky.richtext.facet#tag", "tag": "AI" }]
                }],
            },
        });
        let post = parse_post(&value, true).unwrap();
        assert_eq!(post.hashtags.len(), 1);
        assert_eq!(post.hashtags[0].as_str(), "ai");
    }

    #[test]
    fn classifies_images_embed_and_alt_text() {
        let value = json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/1",
            "cid": "bafy1",
            "author": { "handle": "alice.bsky.social", "did": "did:plc:abc" },
            "indexedAt": "2024-01-15T10:30:00.000Z",
            "record": { "text": "pic" },
            "embed": {
                "$type": "app.bsky.embed.images#view",
                "images": [{ "alt": "a cat", "aspectRatio": { "width": 4, "height": 3 } }],
            },
        });
        let post = parse_post(&value, true).unwrap();
        assert!(post.has_images());
        assert!(post.has_alt_text());
        assert_eq!(post.image_count(), 1);
    }

    #[test]
    fn unrecognized_embed_preserves_raw_type_non_strict() {
        let value = json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/1",
            "cid": "bafy1",
            "author": { "handle": "alice.bsky.social", "did": "did:plc:abc" },
            "indexedAt": "2024-01-15T10:30:00.000Z",
            "record": { "text": "?" },
            "embed": { "$type": "app.bsky.embed.mystery#view" },
        });
        let post = parse_post(&value, false).unwrap();
        assert!(matches!(post.embed, Some(Embed::Unknown { .. })));
    }

    #[test]
    fn unrecognized_embed_fails_strict() {
        let value = json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/1",
            "cid": "bafy1",
            "author": { "handle": "alice.bsky.social", "did": "did:plc:abc" },
            "indexedAt": "2024-01-15T10:30:00.000Z",
            "record": { "text": "?" },
            "embed": { "$type": "app.bsky.embed.mystery#view" },
        });
        assert!(parse_post(&value, true).is_err());
    }

    #[test]
    fn missing_uri_fails() {
        let value = json!({
            "cid": "bafy1",
            "author": { "handle": "alice.bsky.social", "did": "did:plc:abc" },
            "indexedAt": "2024-01-15T10:30:00.000Z",
            "record": {},
        });
        assert!(parse_post(&value, true).is_err());
    }
}
