// src/utils/date.rs

//! Lenient date parsing for Italian school sites.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::{Captures, Regex};

const MONTHS: &[(&str, u32)] = &[
    ("gennaio", 1),
    ("febbraio", 2),
    ("marzo", 3),
    ("aprile", 4),
    ("maggio", 5),
    ("giugno", 6),
    ("luglio", 7),
    ("agosto", 8),
    ("settembre", 9),
    ("ottobre", 10),
    ("novembre", 11),
    ("dicembre", 12),
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("gen", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("mag", 5),
    ("giu", 6),
    ("lug", 7),
    ("ago", 8),
    ("set", 9),
    ("ott", 10),
    ("nov", 11),
    ("dic", 12),
    ("jan", 1),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("dec", 12),
];

const MONTH_ALT: &str = "gennaio|febbraio|marzo|aprile|maggio|giugno|luglio|agosto|settembre|ottobre|novembre|dicembre|january|february|march|april|may|june|july|august|september|october|november|december|gen|feb|mar|apr|mag|giu|lug|ago|set|ott|nov|dic|jan|jun|jul|aug|sep|oct|dec";

static ISO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([0-9]{4})-([0-9]{1,2})-([0-9]{1,2})").expect("valid ISO regex"));

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([0-9]{1,2})[/.\-]([0-9]{1,2})[/.\-]([0-9]{4})\b").expect("valid numeric date regex")
});

static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b([0-9]{{1,2}})(?:°|º)?\s+({MONTH_ALT})\.?\s+([0-9]{{4}})\b"
    ))
    .expect("valid day-month regex")
});

static MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTH_ALT})\.?\s+([0-9]{{1,2}}),?\s+([0-9]{{4}})\b"
    ))
    .expect("valid month-day regex")
});

fn month_number(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    MONTHS.iter().find(|(m, _)| *m == name).map(|(_, n)| *n)
}

fn num(caps: &Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse().ok()
}

fn ymd(y: u32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(i32::try_from(y).ok()?, m, d)
}

/// Parse a string that is expected to hold a single date.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    find_date(text).map(|(date, _)| date)
}

/// Find the first date in free text, with the byte offset where it ends.
pub fn find_date(text: &str) -> Option<(NaiveDate, usize)> {
    let mut best: Option<(usize, NaiveDate, usize)> = None;
    let mut consider = |start: usize, end: usize, date: Option<NaiveDate>| {
        if let Some(date) = date {
            if best.is_none_or(|(s, _, _)| start < s) {
                best = Some((start, date, end));
            }
        }
    };

    for caps in ISO.captures_iter(text) {
        let m = caps.get(0)?;
        consider(m.start(), m.end(), ymd(num(&caps, 1)?, num(&caps, 2)?, num(&caps, 3)?));
    }
    for caps in NUMERIC.captures_iter(text) {
        let m = caps.get(0)?;
        consider(m.start(), m.end(), ymd(num(&caps, 3)?, num(&caps, 2)?, num(&caps, 1)?));
    }
    for caps in DAY_MONTH.captures_iter(text) {
        let m = caps.get(0)?;
        let month = month_number(caps.get(2)?.as_str())?;
        consider(m.start(), m.end(), ymd(num(&caps, 3)?, month, num(&caps, 1)?));
    }
    for caps in MONTH_DAY.captures_iter(text) {
        let m = caps.get(0)?;
        let month = month_number(caps.get(1)?.as_str())?;
        consider(m.start(), m.end(), ymd(num(&caps, 3)?, month, num(&caps, 2)?));
    }

    best.map(|(_, date, end)| (date, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_formats() {
        assert_eq!(parse_date("2025-03-12T09:30:00+01:00"), Some(d(2025, 3, 12)));
        assert_eq!(parse_date("2025-03-12"), Some(d(2025, 3, 12)));
        assert_eq!(parse_date("12/03/2025"), Some(d(2025, 3, 12)));
        assert_eq!(parse_date("12-03-2025"), Some(d(2025, 3, 12)));
        assert_eq!(parse_date("12.03.2025"), Some(d(2025, 3, 12)));
        assert_eq!(parse_date("Pubblicato il 1° Marzo 2025"), Some(d(2025, 3, 1)));
        assert_eq!(parse_date("12 mar 2025"), Some(d(2025, 3, 12)));
        assert_eq!(parse_date("March 12, 2025"), Some(d(2025, 3, 12)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("ieri"), None);
        assert_eq!(parse_date("31/02/2025"), None);
    }

    #[test]
    fn test_find_date_picks_earliest() {
        let text = "entro il 15 aprile 2025, pubblicato 01/03/2025";
        let (date, end) = find_date(text).unwrap();
        assert_eq!(date, d(2025, 4, 15));
        assert_eq!(&text[..end], "entro il 15 aprile 2025");
    }
}
