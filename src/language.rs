//! Language admission.
//!
//! A declared document language (`<html lang>` / `<html xml:lang>`) is trusted as-is:
//! the page is admitted when the declared value contains the target code, so both
//! `en` and `en-US` pass for a target of `en`. Statistical detection only runs when
//! nothing is declared, and a detector that cannot decide means "not admitted".

use tracing::{debug, warn};
use whatlang::Lang;

/// Decide whether a page's text is in the target language.
///
/// # Arguments
///
/// * `text` - Normalized article text
/// * `declared_lang` - Declared document language, if any
/// * `target` - Two-letter ISO 639-1 code, e.g. `"en"`
pub fn is_admitted(text: &str, declared_lang: Option<&str>, target: &str) -> bool {
    let target = target.trim().to_ascii_lowercase();
    if let Some(declared) = declared_lang.map(str::trim).filter(|d| !d.is_empty()) {
        let admitted = declared.to_ascii_lowercase().contains(&target);
        debug!(declared, %target, admitted, "Using declared document language");
        return admitted;
    }

    match detect_language(text) {
        Some(code) => {
            let admitted = code == target;
            debug!(detected = code, %target, admitted, "Detected document language");
            admitted
        }
        None => {
            warn!(chars = text.len(), "Language detection failed; not admitting page");
            false
        }
    }
}

/// Detect the language of a text, as an ISO 639-1 code where one exists.
///
/// Returns `None` for empty input or when the detector cannot decide.
pub fn detect_language(text: &str) -> Option<&'static str> {
    if text.trim().is_empty() {
        return None;
    }
    let info = whatlang::detect(text)?;
    Some(iso_639_1(info.lang()))
}

/// Map a detected language to its two-letter code, falling back to the three-letter one.
fn iso_639_1(lang: Lang) -> &'static str {
    match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Nld => "nl",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Nob => "nb",
        Lang::Fin => "fi",
        Lang::Pol => "pl",
        Lang::Ces => "cs",
        Lang::Slk => "sk",
        Lang::Slv => "sl",
        Lang::Hrv => "hr",
        Lang::Srp => "sr",
        Lang::Hun => "hu",
        Lang::Ron => "ro",
        Lang::Bul => "bg",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Bel => "be",
        Lang::Ell => "el",
        Lang::Tur => "tr",
        Lang::Ara => "ar",
        Lang::Heb => "he",
        Lang::Pes => "fa",
        Lang::Hin => "hi",
        Lang::Ben => "bn",
        Lang::Urd => "ur",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Cmn => "zh",
        Lang::Vie => "vi",
        Lang::Tha => "th",
        Lang::Ind => "id",
        Lang::Lat => "la",
        Lang::Lit => "lt",
        Lang::Lav => "lv",
        Lang::Est => "et",
        Lang::Epo => "eo",
        Lang::Afr => "af",
        other => other.code(),
    }
}
