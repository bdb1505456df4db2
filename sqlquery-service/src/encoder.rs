//! Result encoding.
//!
//! Turns an executed [`QueryResult`] into the HTTP response body: an
//! acknowledgment, a capped JSON row set, or a capped CSV download backed by
//! a temp file.

use std::borrow::Cow;
use std::io::{self, BufWriter, Write};

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use common::config::{CsvSettings, RowLimits};
use common::errors::{AppError, AppResult};
use common::models::{OutputFormat, QueryResult, Row};
use common::response::{RowSet, StatusResponse};

use crate::temp_artifact::{ArtifactStream, TempArtifact};

const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

/// Set on CSV downloads; `true` when rows were cut at the CSV limit.
pub const TRUNCATED_HEADER: &str = "x-result-truncated";

/// Encoded response, ready to send.
pub enum RenderedResponse {
    Ack(StatusResponse),
    Json(RowSet),
    Csv(CsvDownload),
}

impl std::fmt::Debug for RenderedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ack(status) => f.debug_tuple("Ack").field(status).finish(),
            Self::Json(rows) => f.debug_tuple("Json").field(&rows.rows.len()).finish(),
            Self::Csv(csv) => f
                .debug_struct("Csv")
                .field("filename", &csv.filename)
                .field("rows", &csv.rows)
                .field("truncated", &csv.truncated)
                .finish(),
        }
    }
}

/// A CSV file opened for streaming. The file is deleted once the stream is
/// dropped.
pub struct CsvDownload {
    pub filename: String,
    pub rows: usize,
    pub truncated: bool,
    stream: ArtifactStream,
}

impl CsvDownload {
    pub fn path(&self) -> Option<&std::path::Path> {
        self.stream.path()
    }
}

impl IntoResponse for RenderedResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ack(status) => (StatusCode::OK, Json(status)).into_response(),
            Self::Json(rows) => (StatusCode::OK, Json(rows)).into_response(),
            Self::Csv(csv) => {
                let disposition = HeaderValue::from_str(&format!(
                    "attachment; filename=\"{}\"",
                    csv.filename.replace('"', "")
                ))
                .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
                let truncated = if csv.truncated { "true" } else { "false" };
                (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, HeaderValue::from_static(CSV_CONTENT_TYPE)),
                        (header::CONTENT_DISPOSITION, disposition),
                        (
                            header::HeaderName::from_static(TRUNCATED_HEADER),
                            HeaderValue::from_static(truncated),
                        ),
                    ],
                    Body::from_stream(csv.stream),
                )
                    .into_response()
            }
        }
    }
}

/// Applies the per-format caps and builds the response body.
#[derive(Debug, Clone)]
pub struct ResultEncoder {
    limits: RowLimits,
    csv: CsvSettings,
}

impl ResultEncoder {
    pub fn new(limits: RowLimits, csv: CsvSettings) -> Self {
        Self { limits, csv }
    }

    /// Renders `result` in `format`.
    ///
    /// A non-data statement yields the acknowledgment whatever the format.
    pub async fn render(&self, result: QueryResult, format: OutputFormat) -> AppResult<RenderedResponse> {
        match (result, format) {
            (QueryResult::Ack, _) => Ok(RenderedResponse::Ack(StatusResponse::executed())),
            (QueryResult::Rows(rows), OutputFormat::Json) => {
                Ok(RenderedResponse::Json(self.render_json(rows)))
            }
            (QueryResult::Rows(rows), OutputFormat::Csv) => {
                Ok(RenderedResponse::Csv(self.render_csv(rows).await?))
            }
        }
    }

    /// Caps `rows` at the JSON limit and flags the cut.
    pub fn render_json(&self, mut rows: Vec<Row>) -> RowSet {
        let truncated = rows.len() > self.limits.max_json_rows;
        if truncated {
            tracing::info!(
                total = rows.len(),
                limit = self.limits.max_json_rows,
                "Truncating JSON result"
            );
            rows.truncate(self.limits.max_json_rows);
        }
        RowSet { rows, truncated }
    }

    /// Caps `rows` at the CSV limit and writes them to a fresh temp file.
    ///
    /// The write runs on the blocking pool. An empty row set produces an
    /// empty file.
    pub async fn render_csv(&self, mut rows: Vec<Row>) -> AppResult<CsvDownload> {
        let truncated = rows.len() > self.limits.max_csv_rows;
        if truncated {
            tracing::info!(
                total = rows.len(),
                limit = self.limits.max_csv_rows,
                "Truncating CSV result"
            );
            rows.truncate(self.limits.max_csv_rows);
        }
        let count = rows.len();
        let suffix = self.csv.suffix.clone();

        let artifact = tokio::task::spawn_blocking(move || -> io::Result<TempArtifact> {
            let file = tempfile::Builder::new()
                .prefix("sqlquery-")
                .suffix(&suffix)
                .tempfile()?;
            let (file, path) = file.into_parts();
            // The guard exists before the first write so a failed write
            // still removes the file.
            let artifact = TempArtifact::new(path);
            write_csv(BufWriter::new(file), &rows)?;
            Ok(artifact)
        })
        .await
        .map_err(|e| AppError::Internal(format!("CSV writer task failed: {e}")))??;

        tracing::debug!(rows = count, path = ?artifact.path(), "CSV written");
        let stream = artifact.into_stream().await?;

        Ok(CsvDownload {
            filename: self.csv.filename.clone(),
            rows: count,
            truncated,
            stream,
        })
    }
}

/// Writes `rows` as CSV with a header taken from the first row.
///
/// Rows with a different key set are aligned to the header: missing columns
/// become empty fields and extra columns are dropped.
pub fn write_csv<W: Write>(mut out: W, rows: &[Row]) -> io::Result<()> {
    let Some(first) = rows.first() else {
        return out.flush();
    };
    let header: Vec<&str> = first.keys().collect();

    write_record(&mut out, header.iter().map(|name| Cow::Borrowed(*name)))?;
    for row in rows {
        write_record(
            &mut out,
            header.iter().map(|name| match row.get(name) {
                Some(value) => Cow::Owned(value.to_text()),
                None => Cow::Borrowed(""),
            }),
        )?;
    }
    out.flush()
}

fn write_record<'a, W: Write>(
    out: &mut W,
    fields: impl Iterator<Item = Cow<'a, str>>,
) -> io::Result<()> {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        out.write_all(quote_field(&field).as_bytes())?;
    }
    out.write_all(b"\r\n")
}

/// Quotes a field only when it contains a delimiter, quote, CR or LF.
fn quote_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
