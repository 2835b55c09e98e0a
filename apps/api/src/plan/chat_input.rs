//! Heuristic parsing of a free-form chat message ("Kyoto from April 1 to 3",
//! "京都に4月1日から2泊") into destination / start date / end date.
//!
//! Nothing here is authoritative: every field is optional and the explicit
//! form fields always win over what is found in the message.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::{Captures, Regex};
use serde::Serialize;

const MAX_FALLBACK_DESTINATION_CHARS: usize = 60;

const MONTHS: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})").unwrap());

static JA_FULL_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日").unwrap()
});

static JA_MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})\s*月\s*(\d{1,2})\s*日").unwrap());

static EN_MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?(?:,?\s+(\d{{4}}))?"
    ))
    .unwrap()
});

static EN_DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTHS})\b\.?(?:,?\s+(\d{{4}}))?"
    ))
    .unwrap()
});

static SLASH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})").unwrap());

static NIGHTS_DAYS_JA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})\s*泊(?:\s*(\d{1,2})\s*日)?").unwrap());

static DAYS_JA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2})\s*日間").unwrap());

static BARE_DAYS_JA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2})\s*日").unwrap());

static DAYS_EN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,2})[\s-]*days?\b").unwrap());

static NIGHTS_EN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,2})[\s-]*nights?\b").unwrap());

static LABELLED_DESTINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:destination|目的地)\s*[:：]\s*([^\n,、。|]+)").unwrap()
});

static EN_DESTINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?i:to|in|visit|visiting|around|at|for)\s+(\p{Lu}[\p{L}\p{M}'’.\-]*(?:\s+\p{Lu}[\p{L}\p{M}'’.\-]*)*)",
    )
    .unwrap()
});

static JA_DESTINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\p{Han}\p{Katakana}ー・A-Za-z]+?)(?:に|へ|で|の旅)").unwrap()
});

/// Words that look like a place to the Japanese pattern but are not one.
const JA_NON_PLACES: &[&str] = &[
    "週末", "来週", "今週", "来月", "今月", "夏休", "冬休", "旅行", "家族", "友達", "一人", "私",
    "僕", "年末", "年始", "連休", "来年", "今年", "明日", "今度",
];

/// Connector words stripped from the edges of a fallback destination.
const CONNECTORS: &[&str] = &[
    "from", "to", "until", "till", "through", "between", "and", "on", "for", "trip", "a", "plan",
    "から", "まで", "の", "に", "へ", "で",
];

/// Fields recovered from a chat message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedChatInput {
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Trip length mentioned as a duration ("3 days", "2泊3日").
    pub trip_days: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct DateToken {
    start: usize,
    end: usize,
    year: Option<i32>,
    month: u32,
    day: u32,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Parses `text`, resolving year-less dates relative to `today`.
pub fn parse_chat_input(text: &str, today: NaiveDate) -> ParsedChatInput {
    let tokens = find_date_tokens(text);
    let dates = resolve_years(&tokens, today);

    let mut spans: Vec<Span> = tokens
        .iter()
        .map(|t| Span {
            start: t.start,
            end: t.end,
        })
        .collect();

    let (trip_days, duration_span) = find_duration(text, &spans, dates.len() < 2);
    if let Some(span) = duration_span {
        spans.push(span);
    }

    let start_date = dates.first().copied();
    let mut end_date = dates.get(1).copied();
    if let (Some(start), None, Some(days)) = (start_date, end_date, trip_days) {
        end_date = Some(start + Duration::days(i64::from(days.max(1)) - 1));
    }

    let residual = cut_spans(text, &spans);

    ParsedChatInput {
        destination: find_destination(&residual),
        start_date,
        end_date,
        trip_days,
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// True when the match is not glued to other digits (e.g. not part of a phone number).
fn is_isolated(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let glued = |c: Option<char>| c.is_some_and(|c| c.is_ascii_digit() || c == '/');
    !glued(before) && !glued(after)
}

fn number(caps: &Captures, i: usize) -> Option<u32> {
    caps.get(i).and_then(|m| m.as_str().parse().ok())
}

fn year(caps: &Captures, i: usize) -> Option<i32> {
    caps.get(i).and_then(|m| m.as_str().parse().ok())
}

/// Field order of a date pattern's capture groups.
#[derive(Debug, Clone, Copy)]
enum DateLayout {
    YearMonthDay,
    MonthDay,
    MonthNameDayYear,
    DayMonthNameYear,
}

impl DateLayout {
    fn read(self, caps: &Captures) -> Option<(Option<i32>, u32, u32)> {
        match self {
            DateLayout::YearMonthDay => Some((year(caps, 1), number(caps, 2)?, number(caps, 3)?)),
            DateLayout::MonthDay => Some((None, number(caps, 1)?, number(caps, 2)?)),
            DateLayout::MonthNameDayYear => {
                let month = month_from_name(caps.get(1)?.as_str())?;
                Some((year(caps, 3), month, number(caps, 2)?))
            }
            DateLayout::DayMonthNameYear => {
                let month = month_from_name(caps.get(2)?.as_str())?;
                Some((year(caps, 3), month, number(caps, 1)?))
            }
        }
    }
}

/// All date mentions in text order, longest match first where they overlap.
fn find_date_tokens(text: &str) -> Vec<DateToken> {
    // (pattern, must not touch other digits, capture layout)
    let patterns: [(&Regex, bool, DateLayout); 6] = [
        (&*ISO_DATE, true, DateLayout::YearMonthDay),
        (&*JA_FULL_DATE, false, DateLayout::YearMonthDay),
        (&*JA_MONTH_DAY, false, DateLayout::MonthDay),
        (&*EN_MONTH_DAY, false, DateLayout::MonthNameDayYear),
        (&*EN_DAY_MONTH, false, DateLayout::DayMonthNameYear),
        (&*SLASH_DATE, true, DateLayout::MonthDay),
    ];

    let mut candidates: Vec<DateToken> = Vec::new();
    for (re, check_isolation, layout) in patterns {
        for caps in re.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if check_isolation && !is_isolated(text, whole.start(), whole.end()) {
                continue;
            }
            if let Some((year, month, day)) = layout.read(&caps) {
                candidates.push(DateToken {
                    start: whole.start(),
                    end: whole.end(),
                    year,
                    month,
                    day,
                });
            }
        }
    }

    candidates.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then((b.end - b.start).cmp(&(a.end - a.start)))
    });

    // invalid calendar dates stay as tokens so they are cut from the destination text
    let mut tokens: Vec<DateToken> = Vec::new();
    for candidate in candidates {
        let overlaps = tokens.iter().any(|t| {
            Span {
                start: t.start,
                end: t.end,
            }
            .overlaps(candidate.start, candidate.end)
        });
        if !overlaps {
            tokens.push(candidate);
        }
    }
    tokens
}

/// Fills in missing years: the previous date's year, else the next occurrence after `today`.
fn resolve_years(tokens: &[DateToken], today: NaiveDate) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut last_year: Option<i32> = None;

    for token in tokens {
        let date = match token.year.or(last_year) {
            Some(y) => NaiveDate::from_ymd_opt(y, token.month, token.day),
            None => NaiveDate::from_ymd_opt(today.year(), token.month, token.day).and_then(|d| {
                if d < today {
                    NaiveDate::from_ymd_opt(today.year() + 1, token.month, token.day)
                } else {
                    Some(d)
                }
            }),
        };
        let Some(mut date) = date else { continue };

        // "Dec 30 - Jan 2": a year-less end before the start belongs to the next year
        if token.year.is_none() {
            if let Some(previous) = dates.last() {
                if date < *previous {
                    if let Some(next) = NaiveDate::from_ymd_opt(date.year() + 1, date.month(), date.day()) {
                        date = next;
                    }
                }
            }
        }

        last_year = Some(date.year());
        dates.push(date);
    }
    dates
}

/// Finds the first trip-length mention outside the date spans.
/// Returns total days (nights + 1 for night counts) and the span to cut.
fn find_duration(text: &str, dates: &[Span], allow_bare_days: bool) -> (Option<u32>, Option<Span>) {
    let outside_dates = |start: usize, end: usize| !dates.iter().any(|d| d.overlaps(start, end));

    let mut found: Vec<(usize, usize, u32)> = Vec::new();

    for caps in NIGHTS_DAYS_JA.captures_iter(text) {
        let whole = caps.get(0).map(|m| (m.start(), m.end()));
        if let (Some((s, e)), Some(nights)) = (whole, number(&caps, 1)) {
            let days = number(&caps, 2).unwrap_or(nights + 1);
            found.push((s, e, days));
        }
    }
    for (re, is_nights) in [(&*DAYS_JA, false), (&*DAYS_EN, false), (&*NIGHTS_EN, true)] {
        for caps in re.captures_iter(text) {
            let whole = caps.get(0).map(|m| (m.start(), m.end()));
            if let (Some((s, e)), Some(n)) = (whole, number(&caps, 1)) {
                found.push((s, e, if is_nights { n + 1 } else { n }));
            }
        }
    }
    if allow_bare_days {
        for caps in BARE_DAYS_JA.captures_iter(text) {
            let whole = caps.get(0).map(|m| (m.start(), m.end()));
            if let (Some((s, e)), Some(n)) = (whole, number(&caps, 1)) {
                found.push((s, e, n));
            }
        }
    }

    found
        .into_iter()
        .filter(|&(s, e, days)| days > 0 && outside_dates(s, e) && is_isolated(text, s, e))
        .min_by_key(|&(s, e, _)| (s, std::cmp::Reverse(e)))
        .map(|(start, end, days)| (Some(days), Some(Span { start, end })))
        .unwrap_or((None, None))
}

/// Replaces each span with a `|` separator.
fn cut_spans(text: &str, spans: &[Span]) -> String {
    let mut sorted = spans.to_vec();
    sorted.sort_by_key(|s| s.start);

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in sorted {
        if span.start < cursor {
            continue;
        }
        out.push_str(&text[cursor..span.start]);
        out.push('|');
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn find_destination(residual: &str) -> Option<String> {
    if let Some(caps) = LABELLED_DESTINATION.captures(residual) {
        if let Some(dest) = caps.get(1).and_then(|m| clean_segment(m.as_str())) {
            return Some(dest);
        }
    }

    if let Some(caps) = EN_DESTINATION.captures(residual) {
        if let Some(dest) = caps.get(1).and_then(|m| clean_segment(m.as_str())) {
            return Some(dest);
        }
    }

    for caps in JA_DESTINATION.captures_iter(residual) {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else { continue };
        let place = strip_non_place_prefixes(name);
        if !place.is_empty() {
            return Some(place.to_string());
        }
    }

    residual
        .split(['|', '\n', ',', '、', '。', '!', '?', '！', '？'])
        .filter_map(clean_segment)
        .find(|s| s.chars().count() <= MAX_FALLBACK_DESTINATION_CHARS)
}

/// "来週京都" → "京都"; "週末" → "".
fn strip_non_place_prefixes(mut name: &str) -> &str {
    while let Some(rest) = JA_NON_PLACES.iter().find_map(|w| name.strip_prefix(w)) {
        name = rest;
    }
    name
}

/// Trims punctuation and connector words from both ends of a candidate destination.
fn clean_segment(segment: &str) -> Option<String> {
    const EDGE: &[char] = &[
        ' ', '\t', '-', '〜', '~', '～', ':', '：', '.', ',', '\'', '"', '「', '」', '　',
    ];

    let mut s = segment.trim_matches(EDGE).to_string();
    loop {
        let before = s.clone();
        for connector in CONNECTORS {
            if connector.is_ascii() {
                let lower = s.to_ascii_lowercase();
                if lower.starts_with(&format!("{connector} ")) {
                    s = s[connector.len() + 1..].to_string();
                } else if lower.ends_with(&format!(" {connector}")) {
                    s.truncate(s.len() - connector.len() - 1);
                } else if lower == *connector {
                    s.clear();
                }
            } else {
                if let Some(rest) = s.strip_prefix(connector) {
                    s = rest.to_string();
                }
                if let Some(rest) = s.strip_suffix(connector) {
                    s = rest.to_string();
                }
            }
            s = s.trim_matches(EDGE).to_string();
        }
        if s == before {
            break;
        }
    }

    s.chars().any(char::is_alphabetic).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_english_iso_range() {
        let parsed = parse_chat_input("Plan a trip to Kyoto from 2025-04-01 to 2025-04-03", today());
        assert_eq!(parsed.destination.as_deref(), Some("Kyoto"));
        assert_eq!(parsed.start_date, date(2025, 4, 1));
        assert_eq!(parsed.end_date, date(2025, 4, 3));
    }

    #[test]
    fn test_multi_word_destination() {
        let parsed = parse_chat_input("I want to visit New York on May 3rd", today());
        assert_eq!(parsed.destination.as_deref(), Some("New York"));
        assert_eq!(parsed.start_date, date(2025, 5, 3));
        assert_eq!(parsed.end_date, None);
    }

    #[test]
    fn test_japanese_full_dates() {
        let parsed = parse_chat_input("京都に2025年4月1日から2025年4月3日まで行きたい", today());
        assert_eq!(parsed.destination.as_deref(), Some("京都"));
        assert_eq!(parsed.start_date, date(2025, 4, 1));
        assert_eq!(parsed.end_date, date(2025, 4, 3));
    }

    #[test]
    fn test_japanese_month_day_inherits_year() {
        let parsed = parse_chat_input("2026年4月29日から5月2日まで沖縄へ", today());
        assert_eq!(parsed.destination.as_deref(), Some("沖縄"));
        assert_eq!(parsed.start_date, date(2026, 4, 29));
        assert_eq!(parsed.end_date, date(2026, 5, 2));
    }

    #[test]
    fn test_year_less_date_in_the_past_rolls_forward() {
        let parsed = parse_chat_input("Paris on Jan 10", today());
        assert_eq!(parsed.destination.as_deref(), Some("Paris"));
        assert_eq!(parsed.start_date, date(2026, 1, 10));
    }

    #[test]
    fn test_range_across_new_year() {
        let parsed = parse_chat_input("Sapporo Dec 30 - Jan 2", today());
        assert_eq!(parsed.destination.as_deref(), Some("Sapporo"));
        assert_eq!(parsed.start_date, date(2025, 12, 30));
        assert_eq!(parsed.end_date, date(2026, 1, 2));
    }

    #[test]
    fn test_day_month_order() {
        let parsed = parse_chat_input("Lisbon 12 June 2025 to 14 June 2025", today());
        assert_eq!(parsed.destination.as_deref(), Some("Lisbon"));
        assert_eq!(parsed.start_date, date(2025, 6, 12));
        assert_eq!(parsed.end_date, date(2025, 6, 14));
    }

    #[test]
    fn test_slash_dates_with_wave_dash() {
        let parsed = parse_chat_input("パリ 5/1〜5/3", today());
        assert_eq!(parsed.destination.as_deref(), Some("パリ"));
        assert_eq!(parsed.start_date, date(2025, 5, 1));
        assert_eq!(parsed.end_date, date(2025, 5, 3));
    }

    #[test]
    fn test_nights_and_days_extend_start() {
        let parsed = parse_chat_input("4月10日から2泊3日で箱根に行きたい", today());
        assert_eq!(parsed.destination.as_deref(), Some("箱根"));
        assert_eq!(parsed.trip_days, Some(3));
        assert_eq!(parsed.start_date, date(2025, 4, 10));
        assert_eq!(parsed.end_date, date(2025, 4, 12));
    }

    #[test]
    fn test_english_days_extend_start() {
        let parsed = parse_chat_input("Rome for 4 days starting 2025-06-01", today());
        assert_eq!(parsed.destination.as_deref(), Some("Rome"));
        assert_eq!(parsed.trip_days, Some(4));
        assert_eq!(parsed.end_date, date(2025, 6, 4));
    }

    #[test]
    fn test_english_nights_without_dates() {
        let parsed = parse_chat_input("3 nights in Barcelona", today());
        assert_eq!(parsed.destination.as_deref(), Some("Barcelona"));
        assert_eq!(parsed.trip_days, Some(4));
        assert!(parsed.start_date.is_none());
        assert!(parsed.end_date.is_none());
    }

    #[test]
    fn test_bare_japanese_days() {
        let parsed = parse_chat_input("北海道に5日行きたい", today());
        assert_eq!(parsed.destination.as_deref(), Some("北海道"));
        assert_eq!(parsed.trip_days, Some(5));
    }

    #[test]
    fn test_labelled_destination_wins() {
        let parsed = parse_chat_input("目的地: 金沢, 2025-04-01", today());
        assert_eq!(parsed.destination.as_deref(), Some("金沢"));
        assert_eq!(parsed.start_date, date(2025, 4, 1));
    }

    #[test]
    fn test_non_place_words_are_skipped() {
        let parsed = parse_chat_input("週末に奈良へ", today());
        assert_eq!(parsed.destination.as_deref(), Some("奈良"));
    }

    #[test]
    fn test_time_word_glued_to_place_is_stripped() {
        let next_week = parse_chat_input("来週京都に行きたい", today());
        assert_eq!(next_week.destination.as_deref(), Some("京都"));

        let weekend = parse_chat_input("週末京都へ行きたい", today());
        assert_eq!(weekend.destination.as_deref(), Some("京都"));
    }

    #[test]
    fn test_iso_dates_with_slash_and_dot_separators() {
        let slash = parse_chat_input("Nara 2025/4/1", today());
        assert_eq!(slash.destination.as_deref(), Some("Nara"));
        assert_eq!(slash.start_date, date(2025, 4, 1));

        let dot = parse_chat_input("Nara 2025.4.1", today());
        assert_eq!(dot.destination.as_deref(), Some("Nara"));
        assert_eq!(dot.start_date, date(2025, 4, 1));
    }

    #[test]
    fn test_english_month_name_forms_without_year() {
        let ordinal = parse_chat_input("Hakone Apr 1st", today());
        assert_eq!(ordinal.destination.as_deref(), Some("Hakone"));
        assert_eq!(ordinal.start_date, date(2025, 4, 1));

        let day_first = parse_chat_input("Kobe on 1 April", today());
        assert_eq!(day_first.destination.as_deref(), Some("Kobe"));
        assert_eq!(day_first.start_date, date(2025, 4, 1));
    }

    #[test]
    fn test_hyphenated_day_count() {
        let parsed = parse_chat_input("a 3-day trip to Nagoya", today());
        assert_eq!(parsed.destination.as_deref(), Some("Nagoya"));
        assert_eq!(parsed.trip_days, Some(3));
    }

    #[test]
    fn test_bare_nights_count_adds_a_day() {
        let parsed = parse_chat_input("2泊で熱海へ", today());
        assert_eq!(parsed.destination.as_deref(), Some("熱海"));
        assert_eq!(parsed.trip_days, Some(3));
    }

    #[test]
    fn test_english_destination_label() {
        let parsed = parse_chat_input("destination: Sapporo, from Dec 1", today());
        assert_eq!(parsed.destination.as_deref(), Some("Sapporo"));
        assert_eq!(parsed.start_date, date(2025, 12, 1));
    }

    #[test]
    fn test_around_at_and_for_prepositions() {
        let around = parse_chat_input("walking around Seoul", today());
        assert_eq!(around.destination.as_deref(), Some("Seoul"));

        let at = parse_chat_input("staying at Hakodate", today());
        assert_eq!(at.destination.as_deref(), Some("Hakodate"));

        let tickets = parse_chat_input("tickets for Rome", today());
        assert_eq!(tickets.destination.as_deref(), Some("Rome"));
    }

    #[test]
    fn test_plain_destination_only() {
        let parsed = parse_chat_input("Kyoto", today());
        assert_eq!(parsed.destination.as_deref(), Some("Kyoto"));
        assert!(parsed.start_date.is_none());
        assert!(parsed.trip_days.is_none());
    }

    #[test]
    fn test_invalid_dates_are_ignored() {
        let parsed = parse_chat_input("Osaka 2025-13-45", today());
        assert_eq!(parsed.destination.as_deref(), Some("Osaka"));
        assert!(parsed.start_date.is_none());
    }

    #[test]
    fn test_phone_number_like_digits_are_not_dates() {
        let tokens = find_date_tokens("call 0120/12/34567");
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_nothing_recognisable() {
        let parsed = parse_chat_input("???", today());
        assert_eq!(parsed, ParsedChatInput::default());
    }
}
