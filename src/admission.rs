//! The admission gate: which resolved candidates are worth persisting.
//!
//! Checks run cheapest first and stop at the first failure; language detection is
//! always last.

use crate::config::PipelineConfig;
use crate::language::is_admitted;
use crate::models::{Admission, Article, RejectReason};
use url::Url;

/// Decide whether a candidate article should be saved.
///
/// # Arguments
///
/// * `article` - The resolved candidate
/// * `page_url` - URL the candidate was resolved from
/// * `declared_lang` - Declared document language, if any
/// * `config` - Supplies the text floor, boilerplate markers and target language
pub fn should_save(
    article: &Article,
    page_url: &Url,
    declared_lang: Option<&str>,
    config: &PipelineConfig,
) -> Admission {
    let Some(text) = article.text.as_deref() else {
        return Admission::Rejected(RejectReason::MissingText);
    };
    let chars = text.chars().count();
    if chars < config.min_text_chars {
        return Admission::Rejected(RejectReason::TextTooShort {
            chars,
            min: config.min_text_chars,
        });
    }

    let path = page_url.path();
    if let Some(marker) = config
        .boilerplate_markers
        .iter()
        .find(|m| !m.is_empty() && path.contains(m.as_str()))
    {
        return Admission::Rejected(RejectReason::BoilerplatePath(marker.clone()));
    }

    if path.trim().trim_matches('/').trim().is_empty() {
        return Admission::Rejected(RejectReason::EmptyPath);
    }

    if !is_admitted(text, declared_lang, &config.target_language) {
        return Admission::Rejected(RejectReason::Language);
    }
    Admission::Accepted
}
