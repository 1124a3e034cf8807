//! SQL fragment builders and embedding sanitation.
//!
//! Every query path goes through these helpers so embedding literals,
//! LIKE patterns, and dynamic filter clauses are built in exactly one
//! place.

use crate::schema::MAX_EMBEDDING_DIMENSION;
use crate::timeframe::ResolvedTimeframe;
use chrono::{DateTime, Utc};
use htm_core::error::{Error, Result};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

/// Reject empty vectors and non-finite components, returning the
/// `"[v1,v2,...]"` literal accepted by the `vector` type.
pub fn sanitize_embedding(vector: &[f32]) -> Result<String> {
    if vector.is_empty() {
        return Err(Error::Validation("embedding must not be empty".to_string()));
    }
    let offending: Vec<usize> = vector
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_finite())
        .map(|(i, _)| i)
        .collect();
    if !offending.is_empty() {
        return Err(Error::Validation(format!(
            "embedding has non-finite values at indices {offending:?}"
        )));
    }

    let mut out = String::with_capacity(vector.len() * 8 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    Ok(out)
}

/// Zero-pad a vector to `target` dimensions; longer vectors pass
/// through unchanged. The caller records the original length.
#[must_use]
pub fn pad_embedding(vector: &[f32], target: usize) -> Vec<f32> {
    let mut padded = vector.to_vec();
    if padded.len() < target {
        padded.resize(target, 0.0);
    }
    padded
}

/// Pad to the store's maximum dimension.
#[must_use]
pub fn pad_to_max(vector: &[f32]) -> Vec<f32> {
    pad_embedding(vector, MAX_EMBEDDING_DIMENSION)
}

/// Escape `%`, `_`, and `\` for safe use inside a LIKE pattern.
#[must_use]
pub fn sanitize_like_pattern(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A typed bind argument collected by [`FilterBuilder`].
#[derive(Debug, Clone)]
pub enum SqlArg {
    /// Text bind
    Text(String),
    /// Text array bind (`text[]`)
    TextArray(Vec<String>),
    /// Integer bind
    Int(i64),
    /// Float bind
    Float(f64),
    /// Timestamp bind
    Timestamp(DateTime<Utc>),
    /// JSONB bind
    Json(serde_json::Value),
}

/// Apply collected arguments to a query in order.
pub fn bind_args<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &'q [SqlArg],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            SqlArg::Text(v) => query.bind(v),
            SqlArg::TextArray(v) => query.bind(v),
            SqlArg::Int(v) => query.bind(v),
            SqlArg::Float(v) => query.bind(v),
            SqlArg::Timestamp(v) => query.bind(v),
            SqlArg::Json(v) => query.bind(v),
        };
    }
    query
}

/// Accumulates `AND`-joined filter clauses with correctly numbered
/// placeholders and their typed bind arguments.
#[derive(Debug)]
pub struct FilterBuilder {
    clauses: Vec<String>,
    args: Vec<SqlArg>,
    offset: usize,
}

impl Default for FilterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterBuilder {
    /// Builder whose first placeholder is `$1`.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Builder whose first placeholder is `$start` (for queries that
    /// bind fixed arguments before the filters).
    #[must_use]
    pub fn starting_at(start: usize) -> Self {
        Self {
            clauses: Vec::new(),
            args: Vec::new(),
            offset: start,
        }
    }

    fn next_placeholder(&self) -> usize {
        self.offset + self.args.len()
    }

    /// Add a raw clause with no binds.
    pub fn raw(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    /// Add a timeframe condition over `column`: no clause for an
    /// unbounded timeframe, `BETWEEN` for one range, an `OR` of
    /// `BETWEEN`s for several.
    pub fn timeframe(&mut self, timeframe: &ResolvedTimeframe, column: &str) {
        let ranges = match timeframe {
            ResolvedTimeframe::All => return,
            ResolvedTimeframe::Ranges(ranges) if ranges.is_empty() => return,
            ResolvedTimeframe::Ranges(ranges) => ranges,
        };

        let mut parts = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            let a = self.next_placeholder();
            self.args.push(SqlArg::Timestamp(*start));
            let b = self.next_placeholder();
            self.args.push(SqlArg::Timestamp(*end));
            parts.push(format!("{column} BETWEEN ${a} AND ${b}"));
        }
        if parts.len() == 1 {
            self.clauses.push(parts.remove(0));
        } else {
            self.clauses.push(format!("({})", parts.join(" OR ")));
        }
    }

    /// Add a JSONB containment condition over `column`, or nothing when
    /// the operand is empty.
    pub fn metadata(&mut self, metadata: &serde_json::Value, column: &str) {
        let empty = match metadata {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if empty {
            return;
        }
        let n = self.next_placeholder();
        self.args.push(SqlArg::Json(metadata.clone()));
        self.clauses.push(format!("{column} @> ${n}::jsonb"));
    }

    /// Whether any clause was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The clauses joined with `AND`, prefixed with `AND `, or empty.
    #[must_use]
    pub fn and_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" AND {}", self.clauses.join(" AND "))
        }
    }

    /// Collected bind arguments in placeholder order.
    #[must_use]
    pub fn args(&self) -> &[SqlArg] {
        &self.args
    }

    /// Placeholder index following the collected arguments.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.next_placeholder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sanitize_rejects_empty_and_non_finite() {
        assert!(matches!(
            sanitize_embedding(&[]),
            Err(Error::Validation(_))
        ));

        let err = sanitize_embedding(&[0.5, f32::NAN, 1.0, f32::INFINITY]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains('1') && message.contains('3'));
    }

    #[test]
    fn sanitize_renders_vector_literal() {
        let literal = sanitize_embedding(&[0.5, -1.0, 2.0]).unwrap();
        assert_eq!(literal, "[0.5,-1,2]");
    }

    #[test]
    fn padding_extends_but_never_truncates() {
        assert_eq!(pad_embedding(&[1.0, 2.0], 4), vec![1.0, 2.0, 0.0, 0.0]);
        let long = vec![1.0; 8];
        assert_eq!(pad_embedding(&long, 4).len(), 8);
    }

    #[test]
    fn like_escaping() {
        assert_eq!(sanitize_like_pattern("a%b_c\\d"), "a\\%b\\_c\\\\d");
        assert_eq!(sanitize_like_pattern("plain"), "plain");
    }

    #[test]
    fn filter_builder_numbers_placeholders() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        let mut builder = FilterBuilder::starting_at(3);
        builder.timeframe(
            &ResolvedTimeframe::Ranges(vec![(start, end)]),
            "n.created_at",
        );
        builder.metadata(&serde_json::json!({"source": "chat"}), "n.metadata");

        assert_eq!(
            builder.and_clause(),
            " AND n.created_at BETWEEN $3 AND $4 AND n.metadata @> $5::jsonb"
        );
        assert_eq!(builder.args().len(), 3);
        assert_eq!(builder.next_index(), 6);
    }

    #[test]
    fn filter_builder_multiple_ranges_or_together() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let c = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let d = Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap();

        let mut builder = FilterBuilder::new();
        builder.timeframe(
            &ResolvedTimeframe::Ranges(vec![(a, b), (c, d)]),
            "created_at",
        );
        assert_eq!(
            builder.and_clause(),
            " AND (created_at BETWEEN $1 AND $2 OR created_at BETWEEN $3 AND $4)"
        );
    }

    #[test]
    fn filter_builder_skips_empty_inputs() {
        let mut builder = FilterBuilder::new();
        builder.timeframe(&ResolvedTimeframe::All, "created_at");
        builder.metadata(&serde_json::json!({}), "metadata");
        builder.metadata(&serde_json::Value::Null, "metadata");
        assert!(builder.is_empty());
        assert_eq!(builder.and_clause(), "");
    }
}
