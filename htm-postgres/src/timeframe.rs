//! Timeframe normalization.
//!
//! Search operations accept a timeframe in several shapes: nothing, an
//! explicit range, several ranges, a calendar day, a natural-language
//! expression ("yesterday", "last week", "last 3 days"), or the `Auto`
//! sentinel that extracts the expression from the query string itself
//! and returns the stripped query alongside it.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use htm_core::config::WeekStart;
use htm_core::error::{Error, Result};

/// A timeframe as supplied by the caller.
#[derive(Debug, Clone, Default)]
pub enum Timeframe {
    /// No time filter
    #[default]
    All,
    /// A single range
    Range(DateTime<Utc>, DateTime<Utc>),
    /// Several ranges, OR-ed together
    Ranges(Vec<(DateTime<Utc>, DateTime<Utc>)>),
    /// A calendar day, promoted to its full range
    Day(NaiveDate),
    /// A natural-language expression
    Natural(String),
    /// Extract the expression from the query string itself
    Auto,
}

/// A timeframe reduced to concrete ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTimeframe {
    /// No time filter
    All,
    /// One or more concrete ranges
    Ranges(Vec<(DateTime<Utc>, DateTime<Utc>)>),
}

/// Result of `Auto` extraction: the query with the time expression
/// removed, and the expression that was found (if any).
#[derive(Debug, Clone)]
pub struct AutoExtraction {
    /// Query text with the time expression stripped
    pub stripped_query: String,
    /// The expression that was recognized
    pub expression: Option<String>,
}

impl Timeframe {
    /// Resolve to concrete ranges against the current clock.
    ///
    /// `Auto` cannot be resolved without a query string; use
    /// [`Timeframe::resolve_auto`] for that.
    pub fn resolve(&self, week_start: WeekStart) -> Result<ResolvedTimeframe> {
        self.resolve_at(Utc::now(), week_start)
    }

    /// Resolve against an explicit reference time. Exposed for tests.
    pub fn resolve_at(
        &self,
        now: DateTime<Utc>,
        week_start: WeekStart,
    ) -> Result<ResolvedTimeframe> {
        match self {
            Self::All => Ok(ResolvedTimeframe::All),
            Self::Range(start, end) => Ok(ResolvedTimeframe::Ranges(vec![(*start, *end)])),
            Self::Ranges(ranges) if ranges.is_empty() => Ok(ResolvedTimeframe::All),
            Self::Ranges(ranges) => Ok(ResolvedTimeframe::Ranges(ranges.clone())),
            Self::Day(date) => Ok(ResolvedTimeframe::Ranges(vec![day_range(*date)])),
            Self::Natural(expression) => {
                // Unknown phrases resolve to no filter rather than an error.
                Ok(parse_expression(expression, now, week_start)
                    .map_or(ResolvedTimeframe::All, |range| {
                        ResolvedTimeframe::Ranges(vec![range])
                    }))
            }
            Self::Auto => Err(Error::Validation(
                "auto timeframe requires the query string; use resolve_auto".to_string(),
            )),
        }
    }

    /// Scan `query` for a time expression, returning the resolved
    /// timeframe and the stripped query.
    #[must_use]
    pub fn resolve_auto(
        query: &str,
        week_start: WeekStart,
    ) -> (ResolvedTimeframe, AutoExtraction) {
        Self::resolve_auto_at(query, Utc::now(), week_start)
    }

    /// `resolve_auto` against an explicit reference time.
    #[must_use]
    pub fn resolve_auto_at(
        query: &str,
        now: DateTime<Utc>,
        week_start: WeekStart,
    ) -> (ResolvedTimeframe, AutoExtraction) {
        let Some(expression) = find_expression(query) else {
            return (
                ResolvedTimeframe::All,
                AutoExtraction {
                    stripped_query: query.to_string(),
                    expression: None,
                },
            );
        };

        let resolved = parse_expression(&expression, now, week_start)
            .map_or(ResolvedTimeframe::All, |range| {
                ResolvedTimeframe::Ranges(vec![range])
            });
        let stripped = strip_expression(query, &expression);
        (
            resolved,
            AutoExtraction {
                stripped_query: stripped,
                expression: Some(expression),
            },
        )
    }
}

/// A calendar day's full range.
fn day_range(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
    let end = start + Duration::days(1) - Duration::milliseconds(1);
    (start, end)
}

fn days_from_week_start(weekday: Weekday, week_start: WeekStart) -> i64 {
    match week_start {
        WeekStart::Sunday => i64::from(weekday.num_days_from_sunday()),
        WeekStart::Monday => i64::from(weekday.num_days_from_monday()),
    }
}

fn month_range(year: i32, month: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let start = first.and_hms_opt(0, 0, 0)?.and_utc();
    let end = next.and_hms_opt(0, 0, 0)?.and_utc() - Duration::milliseconds(1);
    Some((start, end))
}

/// Parse a natural-language expression into a range, or None when the
/// phrase is not recognized.
fn parse_expression(
    expression: &str,
    now: DateTime<Utc>,
    week_start: WeekStart,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let phrase = expression.trim().to_lowercase();
    let today = now.date_naive();

    match phrase.as_str() {
        "today" => return Some(day_range(today)),
        "yesterday" => return Some(day_range(today - Duration::days(1))),
        "this week" => {
            let start_day = today - Duration::days(days_from_week_start(today.weekday(), week_start));
            let start = start_day.and_hms_opt(0, 0, 0)?.and_utc();
            return Some((start, now));
        }
        "last week" => {
            let this_week_start =
                today - Duration::days(days_from_week_start(today.weekday(), week_start));
            let start = (this_week_start - Duration::days(7)).and_hms_opt(0, 0, 0)?.and_utc();
            let end = this_week_start.and_hms_opt(0, 0, 0)?.and_utc() - Duration::milliseconds(1);
            return Some((start, end));
        }
        "this month" => {
            let (start, _) = month_range(today.year(), today.month())?;
            return Some((start, now));
        }
        "last month" => {
            let (year, month) = if today.month() == 1 {
                (today.year() - 1, 12)
            } else {
                (today.year(), today.month() - 1)
            };
            return month_range(year, month);
        }
        _ => {}
    }

    // "last N days" / "past N hours" / "last N weeks"
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.len() == 3 && matches!(words[0], "last" | "past") {
        let count: i64 = words[1].parse().ok()?;
        let span = match words[2] {
            "hour" | "hours" => Duration::hours(count),
            "day" | "days" => Duration::days(count),
            "week" | "weeks" => Duration::weeks(count),
            _ => return None,
        };
        return Some((now - span, now));
    }

    None
}

/// Static phrases recognized by the auto extractor, longest first so
/// "last week" wins over a later "last 2 days" style scan.
const STATIC_PHRASES: &[&str] = &[
    "yesterday",
    "this week",
    "last week",
    "this month",
    "last month",
    "today",
];

/// Find the first recognizable time expression inside a query.
fn find_expression(query: &str) -> Option<String> {
    let lower = query.to_lowercase();

    for phrase in STATIC_PHRASES {
        if lower.contains(phrase) {
            return Some((*phrase).to_string());
        }
    }

    // Scan for "last/past N unit"
    let words: Vec<&str> = lower.split_whitespace().collect();
    for window in words.windows(3) {
        if matches!(window[0], "last" | "past")
            && window[1].chars().all(|c| c.is_ascii_digit())
            && matches!(
                window[2].trim_end_matches([',', '.', '?', '!']),
                "hour" | "hours" | "day" | "days" | "week" | "weeks"
            )
        {
            return Some(format!(
                "{} {} {}",
                window[0],
                window[1],
                window[2].trim_end_matches([',', '.', '?', '!'])
            ));
        }
    }

    None
}

/// Remove the expression from the query, dropping a connective
/// immediately before it and collapsing leftover whitespace.
fn strip_expression(query: &str, expression: &str) -> String {
    let lower = query.to_lowercase();
    let Some(pos) = lower.find(&expression.to_lowercase()) else {
        return query.to_string();
    };

    let mut head = query[..pos].trim_end().to_string();
    let head_lower = head.to_lowercase();
    for connective in ["from the", "in the", "during the", "from", "in", "during"] {
        if head_lower.ends_with(connective)
            && head_lower[..head_lower.len() - connective.len()]
                .ends_with(char::is_whitespace)
        {
            head.truncate(head.len() - connective.len());
            break;
        }
    }

    let tail = &query[pos + expression.len()..];
    format!("{} {}", head.trim_end(), tail.trim_start())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        // A Wednesday
        Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn all_and_empty_ranges_resolve_to_no_filter() {
        let resolved = Timeframe::All.resolve_at(reference(), WeekStart::Monday).unwrap();
        assert_eq!(resolved, ResolvedTimeframe::All);

        let resolved = Timeframe::Ranges(vec![])
            .resolve_at(reference(), WeekStart::Monday)
            .unwrap();
        assert_eq!(resolved, ResolvedTimeframe::All);
    }

    #[test]
    fn day_promotes_to_full_range() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 14).unwrap();
        let resolved = Timeframe::Day(date)
            .resolve_at(reference(), WeekStart::Monday)
            .unwrap();
        let ResolvedTimeframe::Ranges(ranges) = resolved else {
            panic!("expected ranges");
        };
        let (start, end) = ranges[0];
        assert_eq!(start.to_rfc3339(), "2026-07-14T00:00:00+00:00");
        assert!(end > start && end - start < Duration::days(1));
    }

    #[test]
    fn yesterday_is_the_previous_day() {
        let resolved = Timeframe::Natural("yesterday".to_string())
            .resolve_at(reference(), WeekStart::Monday)
            .unwrap();
        let ResolvedTimeframe::Ranges(ranges) = resolved else {
            panic!("expected ranges");
        };
        assert_eq!(ranges[0].0.date_naive().to_string(), "2026-07-14");
    }

    #[test]
    fn week_start_configuration_shifts_weeks() {
        // 2026-07-15 is a Wednesday: Monday weeks start 07-13, Sunday
        // weeks start 07-12.
        let monday = Timeframe::Natural("this week".to_string())
            .resolve_at(reference(), WeekStart::Monday)
            .unwrap();
        let sunday = Timeframe::Natural("this week".to_string())
            .resolve_at(reference(), WeekStart::Sunday)
            .unwrap();

        let start_of = |resolved: &ResolvedTimeframe| match resolved {
            ResolvedTimeframe::Ranges(r) => r[0].0.date_naive().to_string(),
            ResolvedTimeframe::All => panic!("expected ranges"),
        };
        assert_eq!(start_of(&monday), "2026-07-13");
        assert_eq!(start_of(&sunday), "2026-07-12");
    }

    #[test]
    fn last_n_days_is_a_trailing_window() {
        let resolved = Timeframe::Natural("last 3 days".to_string())
            .resolve_at(reference(), WeekStart::Monday)
            .unwrap();
        let ResolvedTimeframe::Ranges(ranges) = resolved else {
            panic!("expected ranges");
        };
        assert_eq!(ranges[0].1, reference());
        assert_eq!(ranges[0].0, reference() - Duration::days(3));
    }

    #[test]
    fn unknown_phrases_resolve_to_no_filter() {
        let resolved = Timeframe::Natural("once upon a time".to_string())
            .resolve_at(reference(), WeekStart::Monday)
            .unwrap();
        assert_eq!(resolved, ResolvedTimeframe::All);
    }

    #[test]
    fn auto_extracts_and_strips() {
        let (resolved, extraction) = Timeframe::resolve_auto_at(
            "what did we deploy yesterday",
            reference(),
            WeekStart::Monday,
        );
        assert!(matches!(resolved, ResolvedTimeframe::Ranges(_)));
        assert_eq!(extraction.expression.as_deref(), Some("yesterday"));
        assert_eq!(extraction.stripped_query, "what did we deploy");
    }

    #[test]
    fn auto_extracts_counted_windows() {
        let (resolved, extraction) = Timeframe::resolve_auto_at(
            "errors from the last 2 days please",
            reference(),
            WeekStart::Monday,
        );
        assert!(matches!(resolved, ResolvedTimeframe::Ranges(_)));
        assert_eq!(extraction.expression.as_deref(), Some("last 2 days"));
        assert!(!extraction.stripped_query.contains("last 2 days"));
    }

    #[test]
    fn auto_without_expression_passes_query_through() {
        let (resolved, extraction) =
            Timeframe::resolve_auto_at("plain query", reference(), WeekStart::Monday);
        assert_eq!(resolved, ResolvedTimeframe::All);
        assert!(extraction.expression.is_none());
        assert_eq!(extraction.stripped_query, "plain query");
    }

    #[test]
    fn auto_sentinel_cannot_resolve_without_query() {
        assert!(Timeframe::Auto
            .resolve_at(reference(), WeekStart::Monday)
            .is_err());
    }
}
