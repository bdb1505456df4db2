//! SQL query models.
//!
//! Contains the request parameters of the query endpoint and the
//! engine-agnostic result shape produced by execution.

use std::fmt;
use std::str::FromStr;

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use utoipa::IntoParams;
use validator::Validate;

use crate::errors::AppError;
use crate::models::value::Value;

/// Query string of `GET /sqlquery/`.
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SqlQueryParams {
    /// SQL statement to execute.
    #[validate(length(min = 1, message = "sqlquery must not be empty"))]
    pub sqlquery: String,

    /// Logical backend name.
    #[validate(length(min = 1, message = "cloud must not be empty"))]
    pub cloud: String,

    /// `json` (default, also when blank) or `csv`, case-insensitive.
    pub format: Option<String>,
}

/// Output encoding requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
}

impl OutputFormat {
    /// Parses the optional `format` parameter; absent or blank means JSON.
    pub fn from_param(param: Option<&str>) -> Result<Self, AppError> {
        match param {
            None => Ok(OutputFormat::Json),
            Some(raw) if raw.trim().is_empty() => Ok(OutputFormat::Json),
            Some(raw) => raw.parse(),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(AppError::InvalidFormat),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// One result row: column name to value, in column order.
///
/// Inserting a name that is already present replaces the value in place,
/// so duplicate column names collapse to the last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = Row::default();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Outcome of executing one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// A non-data statement completed.
    Ack,
    /// Every row the statement produced, before any format cap.
    Rows(Vec<Row>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(OutputFormat::from_param(None).unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_param(Some("")).unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_param(Some("  ")).unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_param(Some("CSV")).unwrap(), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_param(Some("Json")).unwrap(), OutputFormat::Json);
        assert!(matches!(
            OutputFormat::from_param(Some("xml")),
            Err(AppError::InvalidFormat)
        ));
    }

    #[test]
    fn test_row_preserves_column_order() {
        let row: Row = [("b", Value::Int(1)), ("a", Value::Int(2))].into_iter().collect();
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"b":1,"a":2}"#);
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn test_duplicate_column_keeps_last_value() {
        let mut row = Row::default();
        row.insert("x", Value::Int(1));
        row.insert("y", Value::Int(2));
        row.insert("x", Value::Int(3));
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("x"), Some(&Value::Int(3)));
        assert_eq!(row.keys().next(), Some("x"));
    }

    #[test]
    fn test_params_validation_rejects_empty_values() {
        let params = SqlQueryParams {
            sqlquery: String::new(),
            cloud: "foo".into(),
            format: None,
        };
        assert!(params.validate().is_err());

        let params = SqlQueryParams {
            sqlquery: "SELECT 1".into(),
            cloud: "foo".into(),
            format: Some("csv".into()),
        };
        assert!(params.validate().is_ok());
    }
}
