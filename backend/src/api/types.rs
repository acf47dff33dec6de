//! REST API types.
//!
//! Everything on the wire is camelCase.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::MappingError;
use crate::models::{ColumnMapping, FieldName, ImportOptions};
use crate::progress::ImportProgress;

/// Returned after a CSV upload: the new session and what the file looks like.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub session_key: String,
    pub file_name: Option<String>,
    /// Encoding sniffed from the first bytes
    pub detected_encoding: String,
    /// Suggested delimiter, the operator may override it
    pub detected_delimiter: String,
    /// Suggested rows per chunk request
    pub chunk_size: usize,
    pub columns: ColumnsResponse,
}

/// File columns, destination fields and the auto-matched mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnsResponse {
    pub file_columns: Vec<String>,
    pub db_columns: Vec<FieldName>,
    pub mapping: ColumnMapping,
    pub total_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleResponse {
    pub column: usize,
    pub values: Vec<String>,
}

/// One chunk request.
///
/// The mapping comes either typed (`mapping`) or in the form shape
/// (`columnMatch: { "<index>": ["field", ...] }`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkRequest {
    pub offset: usize,
    pub mapping: Option<ColumnMapping>,
    pub column_match: Option<HashMap<String, Vec<String>>>,
    pub options: ImportOptions,
}

impl ChunkRequest {
    /// Resolve the mapping. A typed mapping wins over the form shape.
    pub fn resolve_mapping(&self) -> Result<ColumnMapping, MappingError> {
        match (&self.mapping, &self.column_match) {
            (Some(mapping), _) => Ok(mapping.clone()),
            (None, Some(form)) => ColumnMapping::from_form(form),
            (None, None) => Err(MappingError::Empty),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub session_key: String,
    pub offset: usize,
    pub complete: bool,
    pub import_results: ImportProgress,
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_request_form_shape() {
        let request: ChunkRequest = serde_json::from_value(json!({
            "offset": 2,
            "columnMatch": { "0": ["sku"], "2": ["name", ""] },
            "options": { "chunkSize": 10, "sessionKey": "abc", "firstRowTitles": false }
        }))
        .unwrap();

        assert_eq!(request.offset, 2);
        assert_eq!(request.options.chunk_size, 10);
        assert!(!request.options.first_row_titles);

        let mapping = request.resolve_mapping().unwrap();
        assert_eq!(mapping.fields_for(2), &[FieldName::from("name")]);
    }

    #[test]
    fn test_chunk_request_without_mapping() {
        let request = ChunkRequest::default();
        assert_eq!(request.resolve_mapping(), Err(MappingError::Empty));
    }

    #[test]
    fn test_error_response() {
        let body = error_response("boom");
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "boom");
    }
}
