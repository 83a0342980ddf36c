//! Publish-date resolution.
//!
//! A page's date comes from the `date` selectors when they yield something parseable,
//! otherwise from a date embedded in the URL path (`/2019/05/10/slug`,
//! `/archive/2020-11-02/story`, `/20201102/`). Either way the result must fall in
//! the sane window [1990-01-01, today]. When neither source works the date stays
//! absent.

use crate::extract::extract_field;
use crate::selectors::{Field, SelectorTable};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

/// Earliest plausible publish year.
pub const MIN_YEAR: i32 = 1990;

static URL_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(\d{1,4})[/-](\d{1,2})[/-](\d{1,4})|(\d{4})(\d{2})(\d{2}))\b").unwrap()
});

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:(?:first\s+)?published|updated|posted|last\s+modified|date)(?:\s+on)?\s*:?\s*")
        .unwrap()
});

/// Common human formats tried before the general parser, so date-only strings are
/// never shifted across a day boundary by timezone handling.
const LOOSE_PATTERNS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %e, %Y",
    "%b %e, %Y",
    "%b. %e, %Y",
    "%e %B %Y",
    "%e %b %Y",
    "%A, %B %e, %Y",
    "%a, %b %e, %Y",
    "%A %e %B %Y",
];

/// Resolve the publish date of a page.
///
/// # Arguments
///
/// * `document` - The parsed page
/// * `page_url` - URL of the page, scanned when the selectors give nothing usable
/// * `selectors` - Selector table holding the `date` queries
/// * `declared_encoding` - Encoding label passed through to extraction
/// * `today` - Upper bound of the accepted window
#[instrument(level = "debug", skip_all, fields(url = %page_url))]
pub fn resolve_date(
    document: &Html,
    page_url: &Url,
    selectors: &SelectorTable,
    declared_encoding: &str,
    today: NaiveDate,
) -> Option<NaiveDate> {
    if let Some(raw) = extract_field(document, selectors, Field::Date, declared_encoding) {
        match parse_date_text(&raw) {
            Some(date) if within_window(date, today) => return Some(date),
            Some(date) => debug!(%date, raw, "Selector date outside accepted window"),
            None => debug!(raw, "Selector date not parseable"),
        }
    }
    let from_url = date_from_url_path(page_url.path(), today);
    if from_url.is_some() {
        debug!(date = ?from_url, "Using date embedded in URL");
    }
    from_url
}

/// True when a date is neither before [`MIN_YEAR`] nor after `today`.
pub fn within_window(date: NaiveDate, today: NaiveDate) -> bool {
    date.year() >= MIN_YEAR && date <= today
}

/// Parse a free-form date expression as found in page markup.
///
/// Tries RFC 3339 and RFC 2822 first (keeping the calendar date in the string's own
/// offset), then a set of common human layouts, then `dateparser`.
pub fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let unlabeled = LABEL_RE.replace(trimmed, "");
    let candidates = if unlabeled == trimmed {
        vec![trimmed]
    } else {
        vec![trimmed, unlabeled.as_ref()]
    };

    for s in candidates {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.date_naive());
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
            return Some(dt.date_naive());
        }
        for pattern in LOOSE_PATTERNS {
            if let Ok(date) = NaiveDate::parse_from_str(s, pattern) {
                return Some(date);
            }
        }
        if let Ok(dt) = dateparser::parse_with_timezone(s, &Utc) {
            return Some(dt.date_naive());
        }
    }
    None
}

/// Find the first date-like token in a URL path that lands inside the window.
pub fn date_from_url_path(path: &str, today: NaiveDate) -> Option<NaiveDate> {
    URL_DATE_RE.captures_iter(path).find_map(|caps| {
        let parsed = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(a), Some(b), Some(c)) => parse_year_first(a.as_str(), b.as_str(), c.as_str(), today),
            _ => {
                let y = caps.get(4)?.as_str().parse().ok()?;
                let m = caps.get(5)?.as_str().parse().ok()?;
                let d = caps.get(6)?.as_str().parse().ok()?;
                NaiveDate::from_ymd_opt(y, m, d)
            }
        }?;
        if within_window(parsed, today) {
            Some(parsed)
        } else {
            debug!(date = %parsed, token = &caps[0], "URL date outside accepted window");
            None
        }
    })
}

/// Interpret three numeric groups, preferring year-month-day.
///
/// A group of three or more digits is the year. When the year comes last the order is
/// month-day, falling back to day-month. Two-digit years are taken as year-first and
/// expanded to the century nearest `today`.
fn parse_year_first(a: &str, b: &str, c: &str, today: NaiveDate) -> Option<NaiveDate> {
    let (na, nb, nc): (u32, u32, u32) = (a.parse().ok()?, b.parse().ok()?, c.parse().ok()?);
    if a.len() >= 3 {
        let year = i32::try_from(na).ok()?;
        return NaiveDate::from_ymd_opt(year, nb, nc).or_else(|| NaiveDate::from_ymd_opt(year, nc, nb));
    }
    if c.len() >= 3 {
        let year = i32::try_from(nc).ok()?;
        return NaiveDate::from_ymd_opt(year, na, nb).or_else(|| NaiveDate::from_ymd_opt(year, nb, na));
    }
    let year = expand_two_digit_year(na, today);
    NaiveDate::from_ymd_opt(year, nb, nc).or_else(|| NaiveDate::from_ymd_opt(year, nc, nb))
}

fn expand_two_digit_year(yy: u32, today: NaiveDate) -> i32 {
    let current = today.year();
    let mut year = current - current.rem_euclid(100) + yy as i32;
    if year > current + 50 {
        year -= 100;
    } else if year <= current - 50 {
        year += 100;
    }
    year
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn date_table() -> SelectorTable {
        SelectorTable::compile(HashMap::from([(
            Field::Date,
            vec![
                "time.published".to_string(),
                "//meta[@property='article:published_time']/@content".to_string(),
            ],
        )]))
        .unwrap()
    }

    fn resolve(html: &str, url: &str) -> Option<NaiveDate> {
        let doc = Html::parse_document(html);
        resolve_date(&doc, &Url::parse(url).unwrap(), &date_table(), "utf-8", today())
    }

    #[test]
    fn test_selector_date_wins_over_url() {
        let got = resolve(
            r#"<time class="published">March 3, 2021</time>"#,
            "https://news.example.com/2019/05/10/harbour-reopens",
        );
        assert_eq!(got, Some(ymd(2021, 3, 3)));
    }

    #[test]
    fn test_url_fallback_when_no_selector_matches() {
        let got = resolve("<p>no date here</p>", "https://example.com/archive/2020-11-02/story");
        assert_eq!(got, Some(ymd(2020, 11, 2)));
    }

    #[test]
    fn test_url_fallback_when_selector_unparseable() {
        let got = resolve(
            r#"<time class="published">sometime last week</time>"#,
            "https://example.com/2019/05/10/story",
        );
        assert_eq!(got, Some(ymd(2019, 5, 10)));
    }

    #[test]
    fn test_meta_iso_timestamp_keeps_local_date() {
        let got = resolve(
            r#"<html><head><meta property="article:published_time" content="2022-07-01T23:30:00-05:00"></head></html>"#,
            "https://example.com/story",
        );
        assert_eq!(got, Some(ymd(2022, 7, 1)));
    }

    #[test]
    fn test_future_selector_date_falls_through() {
        let got = resolve(
            r#"<time class="published">2031-01-01</time>"#,
            "https://example.com/2019/05/10/story",
        );
        assert_eq!(got, Some(ymd(2019, 5, 10)));
    }

    #[test]
    fn test_absent_when_nothing_found() {
        assert_eq!(resolve("<p>nothing</p>", "https://example.com/story"), None);
    }

    #[test]
    fn test_url_date_before_1990_rejected() {
        assert_eq!(date_from_url_path("/1985/03/04/retro", today()), None);
    }

    #[test]
    fn test_url_scan_continues_past_rejected_token() {
        assert_eq!(
            date_from_url_path("/1985-03-04/reprint/2001-09-12/story", today()),
            Some(ymd(2001, 9, 12))
        );
    }

    #[test]
    fn test_future_url_date_rejected() {
        assert_eq!(date_from_url_path("/2030/01/01/preview", today()), None);
    }

    #[test]
    fn test_url_date_orders() {
        assert_eq!(date_from_url_path("/news/20201102/story", today()), Some(ymd(2020, 11, 2)));
        assert_eq!(date_from_url_path("/11-02-2020/story", today()), Some(ymd(2020, 11, 2)));
        assert_eq!(date_from_url_path("/25-12-2019/story", today()), Some(ymd(2019, 12, 25)));
        assert_eq!(date_from_url_path("/2019/25/12/story", today()), Some(ymd(2019, 12, 25)));
        assert_eq!(date_from_url_path("/19/05/10/story", today()), Some(ymd(2019, 5, 10)));
    }

    #[test]
    fn test_url_without_date() {
        assert_eq!(date_from_url_path("/politics/story-12345", today()), None);
        assert_eq!(date_from_url_path("/", today()), None);
    }

    #[test]
    fn test_parse_date_text_formats() {
        assert_eq!(parse_date_text("March 3, 2021"), Some(ymd(2021, 3, 3)));
        assert_eq!(parse_date_text("Mar 3, 2021"), Some(ymd(2021, 3, 3)));
        assert_eq!(parse_date_text("3 March 2021"), Some(ymd(2021, 3, 3)));
        assert_eq!(parse_date_text("2021-03-03"), Some(ymd(2021, 3, 3)));
        assert_eq!(parse_date_text("2021-03-03T08:15:00Z"), Some(ymd(2021, 3, 3)));
        assert_eq!(parse_date_text("Wed, 03 Mar 2021 08:15:00 +0000"), Some(ymd(2021, 3, 3)));
        assert_eq!(parse_date_text("Published: March 3, 2021"), Some(ymd(2021, 3, 3)));
        assert_eq!(parse_date_text("Updated March 3, 2021"), Some(ymd(2021, 3, 3)));
    }

    #[test]
    fn test_parse_date_text_garbage() {
        assert_eq!(parse_date_text(""), None);
        assert_eq!(parse_date_text("   "), None);
        assert_eq!(parse_date_text("not a date at all"), None);
    }

    #[test]
    fn test_expand_two_digit_year() {
        assert_eq!(expand_two_digit_year(19, today()), 2019);
        assert_eq!(expand_two_digit_year(95, today()), 1995);
        assert_eq!(expand_two_digit_year(70, today()), 2070);
        assert_eq!(expand_two_digit_year(80, today()), 1980);
    }
}
