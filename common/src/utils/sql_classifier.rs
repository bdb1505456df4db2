//! SQL statement classification.
//!
//! Decides whether a statement returns rows. This is a keyword-prefix
//! heuristic, not a parse: leading comments, multi-statement text or
//! dialect-specific verbs (e.g. `VALUES`, `TABLE`, `PRAGMA`) are classified as
//! non-data statements.

/// Keywords that mark a statement as data-returning.
const DATA_KEYWORDS: [&str; 5] = ["select", "show", "describe", "explain", "with"];

/// Kind of statement, as far as the executor is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Produces a result set that must be fetched.
    DataReturning,
    /// DML/DDL or anything else; only success matters.
    NonDataReturning,
}

/// Classifies SQL text without executing it.
pub trait StatementClassifier: Send + Sync {
    fn classify(&self, sql: &str) -> StatementKind;
}

/// Prefix-keyword classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlClassifier;

impl SqlClassifier {
    /// Checks if the SQL starts with a data-returning keyword.
    ///
    /// The check is a raw prefix match on the trimmed, lowercased text, so
    /// `selection_log` style identifiers at the start also match.
    pub fn is_data_query(sql: &str) -> bool {
        let lowered = sql.trim().to_lowercase();
        DATA_KEYWORDS.iter().any(|kw| lowered.starts_with(kw))
    }
}

impl StatementClassifier for SqlClassifier {
    fn classify(&self, sql: &str) -> StatementKind {
        if Self::is_data_query(sql) {
            StatementKind::DataReturning
        } else {
            StatementKind::NonDataReturning
        }
    }
}
