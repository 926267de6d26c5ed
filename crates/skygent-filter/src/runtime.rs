//! Compiles a [`FilterExpr`] into a [`Predicate`] and evaluates it against
//! posts (spec.md §4.2).
//!
//! Compilation eagerly builds every [`Regex`] once so evaluation never pays
//! regex-compile cost; evaluation is async because the effectful atoms
//! (`HasValidLinks`, `Trending`) call out through an [`EffectProvider`].

use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use regex::Regex;
use skygent_core::filter_ast::ErrorPolicy;
use skygent_core::{FilterExpr, FilterSignature, Post};
use skygent_util_error::BoxedError;
use snafu::{Location, Snafu};
use tracing::warn;

const LOG_TARGET: &str = "skygent::filter::runtime";

#[derive(Debug, Snafu)]
pub enum CompileError {
    #[snafu(display("{message}"))]
    Invalid { message: String },
    #[snafu(display("invalid regex `{pattern}`: {source}"))]
    InvalidRegex { pattern: String, source: regex::Error },
}

#[derive(Debug, Snafu)]
pub enum EvalError {
    #[snafu(display("effect provider failed: {source}"))]
    Effect { source: BoxedError },
    #[snafu(display("no effect provider configured for this evaluation"))]
    Unsupported,
}

/// Surfaced when an effectful atom's `Retry` policy exhausts its
/// attempts (spec.md §4.2 "Error policies", §7 `FilterEvalError`).
/// `Include`/`Exclude` never produce this — they always resolve to a
/// boolean instead of failing the evaluation.
#[derive(Debug, Snafu)]
#[snafu(display("{atom} exhausted {retries} retries: {source}"))]
pub struct FilterEvalError {
    pub atom: String,
    pub retries: u32,
    pub source: EvalError,
    #[snafu(implicit)]
    pub location: Location,
}

pub type EvalOutcome = Result<bool, FilterEvalError>;

/// Evaluates the effectful atoms against live state. The filter runtime
/// doesn't know how to check link health or hashtag trending itself — that
/// lives in the adapter layer, which implements this trait.
pub trait EffectProvider: Send + Sync {
    fn has_valid_links<'a>(&'a self, post: &'a Post) -> BoxFuture<'a, Result<bool, EvalError>>;
    fn is_trending<'a>(&'a self, tag: &'a str, post: &'a Post) -> BoxFuture<'a, Result<bool, EvalError>>;
}

/// An [`EffectProvider`] that always reports "unsupported" — for
/// evaluating filters already known to be pure (e.g. EventTime-mode
/// derivation, see spec.md §4.3).
pub struct NoEffects;

impl EffectProvider for NoEffects {
    fn has_valid_links<'a>(&'a self, _post: &'a Post) -> BoxFuture<'a, Result<bool, EvalError>> {
        Box::pin(async { UnsupportedSnafu.fail() })
    }

    fn is_trending<'a>(&'a self, _tag: &'a str, _post: &'a Post) -> BoxFuture<'a, Result<bool, EvalError>> {
        Box::pin(async { UnsupportedSnafu.fail() })
    }
}

#[derive(Debug)]
enum Compiled {
    All,
    None,
    Author(String),
    AuthorIn(Vec<String>),
    Hashtag(String),
    HashtagIn(Vec<String>),
    Contains { text: String, case_sensitive: bool },
    Regex(Vec<Regex>),
    Language(Vec<String>),
    DateRange { start: Option<i64>, end: Option<i64> },
    Engagement { min_likes: Option<u64>, min_reposts: Option<u64>, min_replies: Option<u64> },
    IsReply,
    IsQuote,
    IsRepost,
    IsOriginal,
    HasImages,
    MinImages(usize),
    HasAltText,
    NoAltText,
    AltText(String),
    AltTextRegex(Regex),
    HasVideo,
    HasLinks,
    LinkContains { text: String, case_sensitive: bool },
    LinkRegex(Regex),
    HasMedia,
    HasEmbed,
    HasValidLinks { on_error: ErrorPolicy },
    Trending { tag: String, on_error: ErrorPolicy },
    And(Box<Compiled>, Box<Compiled>),
    Or(Box<Compiled>, Box<Compiled>),
    Not(Box<Compiled>),
}

/// A compiled, ready-to-evaluate filter expression.
pub struct Predicate {
    root: Compiled,
    source: FilterExpr,
    signature: FilterSignature,
}

#[derive(Debug, Clone)]
pub struct Explanation {
    pub label: String,
    pub result: bool,
    pub short_circuited: bool,
    pub children: Vec<Explanation>,
}

impl Predicate {
    pub fn compile(expr: &FilterExpr) -> Result<Predicate, CompileError> {
        expr.validate().map_err(|message| InvalidSnafu { message }.build())?;
        let root = compile_node(expr)?;
        Ok(Predicate { root, source: expr.clone(), signature: FilterSignature::of(expr) })
    }

    pub fn source(&self) -> &FilterExpr {
        &self.source
    }

    pub fn signature(&self) -> FilterSignature {
        self.signature
    }

    /// True iff evaluating this predicate requires an [`EffectProvider`]
    /// (spec.md §4.2 "Classification" / EventTime-mode validity check).
    pub fn is_effectful(&self) -> bool {
        self.source.is_effectful()
    }

    /// Evaluates this predicate against `post`. `Ok(_)` unless an
    /// effectful atom's `Retry` policy exhausted its attempts, in which
    /// case `Err(FilterEvalError)` is surfaced (spec.md §4.2, §7).
    pub async fn eval(&self, post: &Post, effects: &dyn EffectProvider) -> EvalOutcome {
        eval_node(&self.root, post, effects).await
    }

    /// Like [`Predicate::eval`], but surfaces whether any effectful atom
    /// along the way hit its error policy's fallback branch.
    pub async fn eval_with_meta(&self, post: &Post, effects: &dyn EffectProvider) -> Result<(bool, Vec<String>), FilterEvalError> {
        let mut warnings = Vec::new();
        let matched = eval_node_collecting(&self.root, post, effects, &mut warnings).await?;
        Ok((matched, warnings))
    }

    /// Evaluates `posts` with up to `concurrency` evaluations in flight at
    /// once, preserving input order in the result. Each post's own
    /// `EvalOutcome` is kept independent — one post's retry exhaustion
    /// doesn't fail the whole batch.
    pub async fn eval_batch(
        &self,
        posts: &[Post],
        effects: &dyn EffectProvider,
        concurrency: usize,
    ) -> Vec<EvalOutcome> {
        let mut indexed: Vec<(usize, EvalOutcome)> = stream::iter(posts.iter().enumerate())
            .map(|(i, post)| async move { (i, self.eval(post, effects).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, matched)| matched).collect()
    }

    /// Builds a short-circuit-aware explanation tree, useful for a `why did
    /// this post match` debugging surface.
    pub async fn explain(&self, post: &Post, effects: &dyn EffectProvider) -> Result<Explanation, FilterEvalError> {
        explain_node(&self.root, post, effects).await
    }
}

fn compile_node(expr: &FilterExpr) -> Result<Compiled, CompileError> {
    let compiled = match expr {
        FilterExpr::All => Compiled::All,
        FilterExpr::None => Compiled::None,
        FilterExpr::Author { handle } => Compiled::Author(handle.as_str().to_ascii_lowercase()),
        FilterExpr::AuthorIn { handles } => {
            Compiled::AuthorIn(handles.iter().map(|h| h.as_str().to_ascii_lowercase()).collect())
        }
        FilterExpr::Hashtag { tag } => Compiled::Hashtag(tag.to_ascii_lowercase()),
        FilterExpr::HashtagIn { tags } => Compiled::HashtagIn(tags.iter().map(|t| t.to_ascii_lowercase()).collect()),
        FilterExpr::Contains { text, case_sensitive } => {
            Compiled::Contains { text: fold_case(text, *case_sensitive), case_sensitive: *case_sensitive }
        }
        FilterExpr::Regex { patterns, flags } => {
            let compiled = patterns
                .iter()
                .map(|p| build_regex(p, flags.case_insensitive, flags.multi_line))
                .collect::<Result<Vec<_>, _>>()?;
            Compiled::Regex(compiled)
        }
        FilterExpr::Language { langs } => Compiled::Language(langs.iter().map(|l| l.to_ascii_lowercase()).collect()),
        FilterExpr::DateRange { start, end } => Compiled::DateRange { start: *start, end: *end },
        FilterExpr::Engagement { min_likes, min_reposts, min_replies } => Compiled::Engagement {
            min_likes: *min_likes,
            min_reposts: *min_reposts,
            min_replies: *min_replies,
        },
        FilterExpr::IsReply => Compiled::IsReply,
        FilterExpr::IsQuote => Compiled::IsQuote,
        FilterExpr::IsRepost => Compiled::IsRepost,
        FilterExpr::IsOriginal => Compiled::IsOriginal,
        FilterExpr::HasImages => Compiled::HasImages,
        FilterExpr::MinImages { n } => Compiled::MinImages(*n),
        FilterExpr::HasAltText => Compiled::HasAltText,
        FilterExpr::NoAltText => Compiled::NoAltText,
        FilterExpr::AltText { text } => Compiled::AltText(fold_case(text, false)),
        FilterExpr::AltTextRegex { pattern, flags } => {
            Compiled::AltTextRegex(build_regex(pattern, flags.case_insensitive, flags.multi_line)?)
        }
        FilterExpr::HasVideo => Compiled::HasVideo,
        FilterExpr::HasLinks => Compiled::HasLinks,
        FilterExpr::LinkContains { text, case_sensitive } => {
            Compiled::LinkContains { text: fold_case(text, *case_sensitive), case_sensitive: *case_sensitive }
        }
        FilterExpr::LinkRegex { pattern, flags } => {
            Compiled::LinkRegex(build_regex(pattern, flags.case_insensitive, flags.multi_line)?)
        }
        FilterExpr::HasMedia => Compiled::HasMedia,
        FilterExpr::HasEmbed => Compiled::HasEmbed,
        FilterExpr::HasValidLinks { on_error } => Compiled::HasValidLinks { on_error: *on_error },
        FilterExpr::Trending { tag, on_error } => {
            Compiled::Trending { tag: tag.to_ascii_lowercase(), on_error: *on_error }
        }
        FilterExpr::And { left, right } => Compiled::And(Box::new(compile_node(left)?), Box::new(compile_node(right)?)),
        FilterExpr::Or { left, right } => Compiled::Or(Box::new(compile_node(left)?), Box::new(compile_node(right)?)),
        FilterExpr::Not { expr } => Compiled::Not(Box::new(compile_node(expr)?)),
    };
    Ok(compiled)
}

/// Unicode-aware, ASCII-folding case-insensitive comparisons are the
/// default (spec.md §4.2); `case_sensitive: true` keeps the text as-is.
fn fold_case(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

fn build_regex(pattern: &str, case_insensitive: bool, multi_line: bool) -> Result<Regex, CompileError> {
    let full_pattern = match (case_insensitive, multi_line) {
        (false, false) => pattern.to_string(),
        (ci, ml) => format!("(?{}{}){}", if ci { "i" } else { "" }, if ml { "m" } else { "" }, pattern),
    };
    Regex::new(&full_pattern).map_err(|source| InvalidRegexSnafu { pattern: pattern.to_string(), source }.build())
}

fn eval_node<'a>(node: &'a Compiled, post: &'a Post, effects: &'a dyn EffectProvider) -> BoxFuture<'a, EvalOutcome> {
    Box::pin(async move {
        let result = match node {
            Compiled::All => true,
            Compiled::None => false,
            Compiled::Author(handle) => post.author_handle.as_str().to_ascii_lowercase() == *handle,
            Compiled::AuthorIn(handles) => {
                let actual = post.author_handle.as_str().to_ascii_lowercase();
                handles.iter().any(|h| *h == actual)
            }
            Compiled::Hashtag(tag) => post.hashtags.iter().any(|h| h.as_str() == tag),
            Compiled::HashtagIn(tags) => post.hashtags.iter().any(|h| tags.iter().any(|t| t == h.as_str())),
            Compiled::Contains { text, case_sensitive } => {
                let haystack = fold_case(&post.text, *case_sensitive);
                haystack.contains(text.as_str())
            }
            Compiled::Regex(patterns) => patterns.iter().any(|re| re.is_match(&post.text)),
            Compiled::Language(langs) => post.langs.iter().any(|l| langs.contains(&l.to_ascii_lowercase())),
            Compiled::DateRange { start, end } => {
                let ts = post.created_at.as_millis();
                start.is_none_or(|s| ts >= s) && end.is_none_or(|e| ts <= e)
            }
            Compiled::Engagement { min_likes, min_reposts, min_replies } => {
                min_likes.is_none_or(|m| post.metrics.likes() >= m)
                    && min_reposts.is_none_or(|m| post.metrics.reposts() >= m)
                    && min_replies.is_none_or(|m| post.metrics.replies() >= m)
            }
            Compiled::IsReply => post.is_reply(),
            Compiled::IsQuote => post.is_quote(),
            Compiled::IsRepost => post.is_repost(),
            Compiled::IsOriginal => post.is_original(),
            Compiled::HasImages => post.has_images(),
            Compiled::MinImages(n) => post.image_count() >= *n,
            Compiled::HasAltText => post.has_alt_text(),
            Compiled::NoAltText => post.has_images() && !post.has_alt_text(),
            Compiled::AltText(text) => post.all_alt_texts().any(|alt| alt.to_lowercase().contains(text.as_str())),
            Compiled::AltTextRegex(re) => post.all_alt_texts().any(|alt| re.is_match(alt)),
            Compiled::HasVideo => post.has_video(),
            Compiled::HasLinks => post.has_links(),
            Compiled::LinkContains { text, case_sensitive } => {
                post.links.iter().any(|link| fold_case(link, *case_sensitive).contains(text.as_str()))
            }
            Compiled::LinkRegex(re) => post.links.iter().any(|link| re.is_match(link)),
            Compiled::HasMedia => post.has_media(),
            Compiled::HasEmbed => post.has_embed(),
            Compiled::HasValidLinks { on_error } => {
                with_error_policy(&describe(node), on_error, || effects.has_valid_links(post), None).await?
            }
            Compiled::Trending { tag, on_error } => {
                with_error_policy(&describe(node), on_error, || effects.is_trending(tag, post), None).await?
            }
            Compiled::And(left, right) => {
                if !eval_node(left, post, effects).await? {
                    false
                } else {
                    eval_node(right, post, effects).await?
                }
            }
            Compiled::Or(left, right) => {
                if eval_node(left, post, effects).await? {
                    true
                } else {
                    eval_node(right, post, effects).await?
                }
            }
            Compiled::Not(inner) => !eval_node(inner, post, effects).await?,
        };
        Ok(result)
    })
}

fn eval_node_collecting<'a>(
    node: &'a Compiled,
    post: &'a Post,
    effects: &'a dyn EffectProvider,
    warnings: &'a mut Vec<String>,
) -> BoxFuture<'a, EvalOutcome> {
    Box::pin(async move {
        let result = match node {
            Compiled::HasValidLinks { on_error } => {
                with_error_policy(&describe(node), on_error, || effects.has_valid_links(post), Some(warnings)).await?
            }
            Compiled::Trending { tag, on_error } => {
                with_error_policy(&describe(node), on_error, || effects.is_trending(tag, post), Some(warnings)).await?
            }
            Compiled::And(left, right) => {
                if !eval_node_collecting(left, post, effects, warnings).await? {
                    false
                } else {
                    eval_node_collecting(right, post, effects, warnings).await?
                }
            }
            Compiled::Or(left, right) => {
                if eval_node_collecting(left, post, effects, warnings).await? {
                    true
                } else {
                    eval_node_collecting(right, post, effects, warnings).await?
                }
            }
            Compiled::Not(inner) => !eval_node_collecting(inner, post, effects, warnings).await?,
            other => eval_node(other, post, effects).await?,
        };
        Ok(result)
    })
}

fn explain_node<'a>(node: &'a Compiled, post: &'a Post, effects: &'a dyn EffectProvider) -> BoxFuture<'a, Result<Explanation, FilterEvalError>> {
    Box::pin(async move {
        let explanation = match node {
            Compiled::And(left, right) => {
                let left_exp = explain_node(left, post, effects).await?;
                if !left_exp.result {
                    let right_exp = skipped_explanation(right);
                    Explanation { label: "And".into(), result: false, short_circuited: false, children: vec![left_exp, right_exp] }
                } else {
                    let right_exp = explain_node(right, post, effects).await?;
                    let result = right_exp.result;
                    Explanation { label: "And".into(), result, short_circuited: false, children: vec![left_exp, right_exp] }
                }
            }
            Compiled::Or(left, right) => {
                let left_exp = explain_node(left, post, effects).await?;
                if left_exp.result {
                    let right_exp = skipped_explanation(right);
                    Explanation { label: "Or".into(), result: true, short_circuited: false, children: vec![left_exp, right_exp] }
                } else {
                    let right_exp = explain_node(right, post, effects).await?;
                    let result = right_exp.result;
                    Explanation { label: "Or".into(), result, short_circuited: false, children: vec![left_exp, right_exp] }
                }
            }
            Compiled::Not(inner) => {
                let inner_exp = explain_node(inner, post, effects).await?;
                let result = !inner_exp.result;
                Explanation { label: "Not".into(), result, short_circuited: false, children: vec![inner_exp] }
            }
            leaf => {
                let result = eval_node(leaf, post, effects).await?;
                Explanation { label: describe(leaf), result, short_circuited: false, children: Vec::new() }
            }
        };
        Ok(explanation)
    })
}

fn skipped_explanation(node: &Compiled) -> Explanation {
    Explanation { label: describe(node), result: false, short_circuited: true, children: Vec::new() }
}

fn describe(node: &Compiled) -> String {
    match node {
        Compiled::All => "All".into(),
        Compiled::None => "None".into(),
        Compiled::Author(h) => format!("Author({h})"),
        Compiled::AuthorIn(hs) => format!("AuthorIn({})", hs.join("|")),
        Compiled::Hashtag(t) => format!("Hashtag(#{t})"),
        Compiled::HashtagIn(ts) => format!("HashtagIn({})", ts.join("|")),
        Compiled::Contains { text, .. } => format!("Contains({text:?})"),
        Compiled::Regex(_) => "Regex".into(),
        Compiled::Language(langs) => format!("Language({})", langs.join("|")),
        Compiled::DateRange { start, end } => format!("DateRange({start:?}..{end:?})"),
        Compiled::Engagement { .. } => "Engagement".into(),
        Compiled::IsReply => "IsReply".into(),
        Compiled::IsQuote => "IsQuote".into(),
        Compiled::IsRepost => "IsRepost".into(),
        Compiled::IsOriginal => "IsOriginal".into(),
        Compiled::HasImages => "HasImages".into(),
        Compiled::MinImages(n) => format!("MinImages({n})"),
        Compiled::HasAltText => "HasAltText".into(),
        Compiled::NoAltText => "NoAltText".into(),
        Compiled::AltText(text) => format!("AltText({text:?})"),
        Compiled::AltTextRegex(_) => "AltTextRegex".into(),
        Compiled::HasVideo => "HasVideo".into(),
        Compiled::HasLinks => "HasLinks".into(),
        Compiled::LinkContains { text, .. } => format!("LinkContains({text:?})"),
        Compiled::LinkRegex(_) => "LinkRegex".into(),
        Compiled::HasMedia => "HasMedia".into(),
        Compiled::HasEmbed => "HasEmbed".into(),
        Compiled::HasValidLinks { .. } => "HasValidLinks".into(),
        Compiled::Trending { tag, .. } => format!("Trending(#{tag})"),
        Compiled::And(..) => "And".into(),
        Compiled::Or(..) => "Or".into(),
        Compiled::Not(..) => "Not".into(),
    }
}

/// Applies `policy` around a single effectful call. `Include`/`Exclude`
/// make one attempt and always resolve to a boolean; `Retry` retries
/// with an additive backoff (`base_delay * attempt_number`) up to
/// `max_retries` times and, on exhaustion, surfaces a
/// [`FilterEvalError`] rather than silently excluding (spec.md §4.2
/// "Error policies", §7 `FilterEvalError`).
async fn with_error_policy<'a, F, Fut>(
    atom: &str,
    policy: &ErrorPolicy,
    mut attempt: F,
    mut warnings: Option<&'a mut Vec<String>>,
) -> Result<bool, FilterEvalError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool, EvalError>>,
{
    match policy {
        ErrorPolicy::Include | ErrorPolicy::Exclude => match attempt().await {
            Ok(v) => Ok(v),
            Err(err) => {
                warn!(target: LOG_TARGET, %err, atom, "effectful atom failed, applying error policy");
                if let Some(w) = warnings.as_deref_mut() {
                    w.push(err.to_string());
                }
                Ok(matches!(policy, ErrorPolicy::Include))
            }
        },
        ErrorPolicy::Retry { max_retries, base_delay } => {
            let mut last_err = None;
            for attempt_no in 0..=*max_retries {
                match attempt().await {
                    Ok(v) => return Ok(v),
                    Err(err) => {
                        if attempt_no < *max_retries {
                            tokio::time::sleep(delay_for_attempt(*base_delay, attempt_no)).await;
                        }
                        last_err = Some(err);
                    }
                }
            }
            let source = last_err.expect("loop runs at least once since max_retries + 1 >= 1");
            warn!(target: LOG_TARGET, %source, retries = *max_retries, atom, "effectful atom exhausted retries");
            FilterEvalSnafu { atom: atom.to_string(), retries: *max_retries, source }.fail()
        }
    }
}

fn delay_for_attempt(base_delay: Duration, attempt_no: u32) -> Duration {
    base_delay.saturating_mul(attempt_no + 1)
}

#[cfg(test)]
mod tests {
    use skygent_core::types::{Cid, Did, Handle, Hashtag, Timestamp, Uri};
    use skygent_core::{Metrics, Post};

    use super::*;

    fn sample_post() -> Post {
        Post {
            uri: Uri::from("at://did:plc:abc/app.bsky.feed.post/1"),
            cid: Cid::from("cid1"),
            author_handle: Handle::from("alice.bsky.social"),
            author_did: Did::from("did:plc:abc"),
            created_at: Timestamp::from_millis(1_700_000_000_000),
            indexed_at: Timestamp::from_millis(1_700_000_000_100),
            text: "loving #rustlang today".to_string(),
            hashtags: vec![Hashtag::from("rustlang")],
            links: vec![],
            langs: vec!["en".to_string()],
            embed: None,
            reply: None,
            feed_reason: None,
            metrics: Metrics { like_count: Some(12), ..Default::default() },
            labels: vec![],
        }
    }

    #[tokio::test]
    async fn p6_and_or_not_compose() {
        let expr = FilterExpr::And {
            left: Box::new(FilterExpr::Hashtag { tag: "rustlang".into() }),
            right: Box::new(FilterExpr::Not { expr: Box::new(FilterExpr::IsReply) }),
        };
        let predicate = Predicate::compile(&expr).unwrap();
        assert!(predicate.eval(&sample_post(), &NoEffects).await.unwrap());
    }

    #[tokio::test]
    async fn p7_short_circuit_skips_the_right_branch() {
        let expr = FilterExpr::Or {
            left: Box::new(FilterExpr::All),
            right: Box::new(FilterExpr::Trending { tag: "x".into(), on_error: ErrorPolicy::Exclude }),
        };
        let predicate = Predicate::compile(&expr).unwrap();
        // NoEffects would error on Trending; if short-circuiting didn't
        // happen this would panic inside the effect call.
        assert!(predicate.eval(&sample_post(), &NoEffects).await.unwrap());
        let explanation = predicate.explain(&sample_post(), &NoEffects).await.unwrap();
        assert!(explanation.children[1].short_circuited);
    }

    #[tokio::test]
    async fn effectful_atom_falls_back_to_exclude_on_error() {
        let expr = FilterExpr::Trending { tag: "ai".into(), on_error: ErrorPolicy::Exclude };
        let predicate = Predicate::compile(&expr).unwrap();
        assert!(!predicate.eval(&sample_post(), &NoEffects).await.unwrap());
    }

    #[tokio::test]
    async fn effectful_atom_falls_back_to_include_on_error() {
        let expr = FilterExpr::HasValidLinks { on_error: ErrorPolicy::Include };
        let predicate = Predicate::compile(&expr).unwrap();
        assert!(predicate.eval(&sample_post(), &NoEffects).await.unwrap());
    }

    #[tokio::test]
    async fn p7_retry_exhaustion_surfaces_filter_eval_error() {
        let expr = FilterExpr::HasValidLinks {
            on_error: ErrorPolicy::Retry { max_retries: 2, base_delay: Duration::from_millis(0) },
        };
        let predicate = Predicate::compile(&expr).unwrap();
        let err = predicate.eval(&sample_post(), &NoEffects).await.unwrap_err();
        assert_eq!(err.retries, 2);
        assert_eq!(err.atom, "HasValidLinks");
    }

    #[tokio::test]
    async fn eval_batch_preserves_order() {
        let expr = FilterExpr::Hashtag { tag: "rustlang".into() };
        let predicate = Predicate::compile(&expr).unwrap();
        let mut other = sample_post();
        other.hashtags.clear();
        let posts = vec![sample_post(), other, sample_post()];
        let results: Vec<bool> = predicate.eval_batch(&posts, &NoEffects, 2).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(results, vec![true, false, true]);
    }

    #[test]
    fn compile_rejects_invalid_regex() {
        let expr = FilterExpr::Regex { patterns: vec!["(".to_string()], flags: Default::default() };
        assert!(Predicate::compile(&expr).is_err());
    }

    #[test]
    fn compile_rejects_underspecified_engagement() {
        let expr = FilterExpr::Engagement { min_likes: None, min_reposts: None, min_replies: None };
        assert!(Predicate::compile(&expr).is_err());
    }
}
