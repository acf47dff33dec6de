//! Domain models for the chunked import pipeline.
//!
//! - [`ColumnMapping`] - CSV column index to destination fields
//! - [`DecodeStrategy`] - How a destination field reads its raw value
//! - [`ImportOptions`] - Per-chunk options (dialect, chunk size, offset, session)
//! - [`ImportRecord`] - One mapped row, keyed by destination field
//! - [`Encoding`] - Source encodings offered to the operator
//! - [`Product`] - Destination entity, natural key `sku`
//! - [`ImportLogEntry`] - One row per import run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::MappingError;

/// Chunk size used when neither the request nor the config sets one.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Default separator for multi-value cells.
pub const DEFAULT_LIST_DELIMITER: char = '|';

// =============================================================================
// Field names
// =============================================================================

/// Name of a destination column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldName(String);

impl FieldName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FieldName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Column mapping
// =============================================================================

/// How a destination field interprets the raw cell it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodeStrategy {
    /// Raw cell text, unchanged.
    #[default]
    Single,
    /// Cell split on an unescaped delimiter into a list.
    List {
        #[serde(default = "default_list_delimiter")]
        delimiter: char,
    },
}

fn default_list_delimiter() -> char {
    DEFAULT_LIST_DELIMITER
}

/// Mapping from CSV column index to the destination fields it feeds.
///
/// Each column index appears once. One column may feed several fields.
/// If two columns feed the same field, the higher column index wins: rows are
/// mapped in ascending index order and the last write is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    columns: BTreeMap<usize, Vec<FieldName>>,
    #[serde(default)]
    strategies: BTreeMap<FieldName, DecodeStrategy>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `field` to column `index`. Binding twice is a no-op.
    pub fn bind(&mut self, index: usize, field: impl Into<FieldName>) -> &mut Self {
        let field = field.into();
        let fields = self.columns.entry(index).or_default();
        if !fields.contains(&field) {
            fields.push(field);
        }
        self
    }

    /// Builder form of [`ColumnMapping::bind`].
    pub fn with(mut self, index: usize, field: impl Into<FieldName>) -> Self {
        self.bind(index, field);
        self
    }

    /// Decode `field` with `strategy` instead of as a single value.
    pub fn with_strategy(mut self, field: impl Into<FieldName>, strategy: DecodeStrategy) -> Self {
        self.strategies.insert(field.into(), strategy);
        self
    }

    pub fn set_strategy(&mut self, field: impl Into<FieldName>, strategy: DecodeStrategy) {
        self.strategies.insert(field.into(), strategy);
    }

    /// Remove `field` from whichever column it is bound to.
    pub fn unbind(&mut self, field: &FieldName) -> Option<usize> {
        let index = self
            .columns
            .iter()
            .find(|(_, fields)| fields.contains(field))
            .map(|(i, _)| *i)?;

        if let Some(fields) = self.columns.get_mut(&index) {
            fields.retain(|f| f != field);
            if fields.is_empty() {
                self.columns.remove(&index);
            }
        }
        Some(index)
    }

    /// Column/field pairs in ascending column order.
    pub fn columns(&self) -> impl Iterator<Item = (usize, &[FieldName])> {
        self.columns.iter().map(|(i, f)| (*i, f.as_slice()))
    }

    pub fn fields_for(&self, index: usize) -> &[FieldName] {
        self.columns.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn column_of(&self, field: &FieldName) -> Option<usize> {
        self.columns
            .iter()
            .find(|(_, fields)| fields.contains(field))
            .map(|(i, _)| *i)
    }

    pub fn strategy_for(&self, field: &FieldName) -> DecodeStrategy {
        self.strategies.get(field).copied().unwrap_or_default()
    }

    /// All destination fields, deduplicated, in column order.
    pub fn destination_fields(&self) -> Vec<FieldName> {
        let mut seen = Vec::new();
        for fields in self.columns.values() {
            for f in fields {
                if !seen.contains(f) {
                    seen.push(f.clone());
                }
            }
        }
        seen
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Build a mapping from the form shape `column_match[<index>][] = <field>`.
    ///
    /// Empty field names come from unmatched inputs and are ignored.
    pub fn from_form(form: &HashMap<String, Vec<String>>) -> Result<Self, MappingError> {
        let mut mapping = Self::new();
        for (key, fields) in form {
            let index: usize = key
                .trim()
                .parse()
                .map_err(|_| MappingError::InvalidIndex(key.clone()))?;
            for field in fields.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
                mapping.bind(index, field);
            }
        }
        Ok(mapping)
    }

    /// Reject empty mappings and indices beyond `column_count`.
    pub fn validate(&self, column_count: Option<usize>) -> Result<(), MappingError> {
        if self.is_empty() {
            return Err(MappingError::Empty);
        }
        if let Some(columns) = column_count {
            if let Some(&index) = self.columns.keys().find(|&&i| i >= columns) {
                return Err(MappingError::UnknownColumn { index, columns });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Encodings
// =============================================================================

/// Source encodings offered to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "us-ascii")]
    UsAscii,
    #[serde(rename = "iso-8859-1")]
    Iso8859_1,
    #[serde(rename = "iso-8859-2")]
    Iso8859_2,
    #[serde(rename = "iso-8859-3")]
    Iso8859_3,
    #[serde(rename = "iso-8859-4")]
    Iso8859_4,
    #[serde(rename = "iso-8859-5")]
    Iso8859_5,
    #[serde(rename = "iso-8859-6")]
    Iso8859_6,
    #[serde(rename = "iso-8859-7")]
    Iso8859_7,
    #[serde(rename = "iso-8859-8")]
    Iso8859_8,
    #[serde(rename = "iso-8859-9")]
    Iso8859_9,
    #[serde(rename = "iso-8859-10")]
    Iso8859_10,
    #[serde(rename = "iso-8859-11")]
    Iso8859_11,
    #[serde(rename = "iso-8859-13")]
    Iso8859_13,
    #[serde(rename = "iso-8859-14")]
    Iso8859_14,
    #[serde(rename = "iso-8859-15")]
    Iso8859_15,
    #[serde(rename = "windows-1251")]
    Windows1251,
    #[serde(rename = "windows-1252")]
    Windows1252,
}

impl Encoding {
    pub const ALL: [Encoding; 18] = [
        Encoding::Utf8,
        Encoding::UsAscii,
        Encoding::Iso8859_1,
        Encoding::Iso8859_2,
        Encoding::Iso8859_3,
        Encoding::Iso8859_4,
        Encoding::Iso8859_5,
        Encoding::Iso8859_6,
        Encoding::Iso8859_7,
        Encoding::Iso8859_8,
        Encoding::Iso8859_9,
        Encoding::Iso8859_10,
        Encoding::Iso8859_11,
        Encoding::Iso8859_13,
        Encoding::Iso8859_14,
        Encoding::Iso8859_15,
        Encoding::Windows1251,
        Encoding::Windows1252,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::UsAscii => "us-ascii",
            Encoding::Iso8859_1 => "iso-8859-1",
            Encoding::Iso8859_2 => "iso-8859-2",
            Encoding::Iso8859_3 => "iso-8859-3",
            Encoding::Iso8859_4 => "iso-8859-4",
            Encoding::Iso8859_5 => "iso-8859-5",
            Encoding::Iso8859_6 => "iso-8859-6",
            Encoding::Iso8859_7 => "iso-8859-7",
            Encoding::Iso8859_8 => "iso-8859-8",
            Encoding::Iso8859_9 => "iso-8859-9",
            Encoding::Iso8859_10 => "iso-8859-10",
            Encoding::Iso8859_11 => "iso-8859-11",
            Encoding::Iso8859_13 => "iso-8859-13",
            Encoding::Iso8859_14 => "iso-8859-14",
            Encoding::Iso8859_15 => "iso-8859-15",
            Encoding::Windows1251 => "windows-1251",
            Encoding::Windows1252 => "windows-1252",
        }
    }

    /// Decoder for this label. WHATWG folds some labels together
    /// (iso-8859-1 and us-ascii decode as windows-1252).
    pub fn decoder(&self) -> &'static encoding_rs::Encoding {
        encoding_rs::Encoding::for_label(self.label().as_bytes()).unwrap_or(encoding_rs::UTF_8)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Encoding::ALL
            .iter()
            .copied()
            .find(|e| e.label() == wanted)
            .ok_or_else(|| format!("Unsupported encoding: {}", s))
    }
}

// =============================================================================
// Import options
// =============================================================================

/// Options for one chunk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    /// First filtered row holds column titles.
    pub first_row_titles: bool,
    pub delimiter: Option<char>,
    pub enclosure: Option<char>,
    pub escape: Option<char>,
    /// Source encoding. Sniffed when absent.
    pub encoding: Option<Encoding>,
    pub chunk_size: usize,
    /// Zero-based chunk index.
    pub offset: usize,
    pub session_key: String,
    /// Operator recorded in the run log.
    pub author: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            first_row_titles: true,
            delimiter: None,
            enclosure: None,
            escape: None,
            encoding: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            offset: 0,
            session_key: String::new(),
            author: None,
        }
    }
}

impl ImportOptions {
    /// Index of the first filtered row this chunk reads.
    pub fn row_offset(&self) -> usize {
        self.offset
            .saturating_mul(self.chunk_size)
            .saturating_add(usize::from(self.first_row_titles))
    }

    /// Data-row index (header excluded) of the first row of this chunk.
    pub fn first_data_row(&self) -> usize {
        self.offset.saturating_mul(self.chunk_size)
    }

    pub fn at_offset(&self, offset: usize) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }
}

// =============================================================================
// Import records
// =============================================================================

/// Value of one destination field in a mapped row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Null, empty text or a list of empty strings.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::Text).unwrap_or(FieldValue::Null)
    }
}

/// One CSV row mapped onto destination fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportRecord {
    fields: BTreeMap<FieldName, FieldValue>,
}

impl ImportRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<FieldName>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn with(mut self, field: impl Into<FieldName>, value: impl Into<String>) -> Self {
        self.insert(field, FieldValue::Text(value.into()));
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(&FieldName::from(field))
    }

    /// Text value of `field`, if present and not a list.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldName, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON object view, used for schema validation.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_json()))
            .collect();
        Value::Object(map)
    }
}

// =============================================================================
// Persisted entities
// =============================================================================

/// Catalogue product, identified by its SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub sku: String,
    /// Price in cents.
    pub price_cents: i64,
}

impl Product {
    /// Price formatted with two decimals.
    pub fn price(&self) -> String {
        let sign = if self.price_cents < 0 { "-" } else { "" };
        let abs = self.price_cents.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Who ran an import, when, and from which file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLogEntry {
    pub id: u64,
    pub author: Option<String>,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_offset_with_titles() {
        let opts = ImportOptions {
            chunk_size: 2,
            offset: 1,
            ..Default::default()
        };
        assert_eq!(opts.row_offset(), 3);
        assert_eq!(opts.first_data_row(), 2);
    }

    #[test]
    fn test_row_offset_without_titles() {
        let opts = ImportOptions {
            first_row_titles: false,
            chunk_size: 10,
            offset: 3,
            ..Default::default()
        };
        assert_eq!(opts.row_offset(), 30);
    }

    #[test]
    fn test_mapping_fan_out_and_unbind() {
        let mut mapping = ColumnMapping::new().with(0, "sku").with(1, "name").with(1, "title");
        assert_eq!(mapping.fields_for(1).len(), 2);
        assert_eq!(mapping.column_of(&"title".into()), Some(1));

        assert_eq!(mapping.unbind(&"name".into()), Some(1));
        assert_eq!(mapping.fields_for(1), &[FieldName::from("title")]);
        assert_eq!(mapping.unbind(&"title".into()), Some(1));
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_mapping_from_form() {
        let mut form = HashMap::new();
        form.insert("0".to_string(), vec!["sku".to_string()]);
        form.insert("2".to_string(), vec!["name".to_string(), "".to_string()]);

        let mapping = ColumnMapping::from_form(&form).unwrap();
        assert_eq!(mapping.fields_for(0), &[FieldName::from("sku")]);
        assert_eq!(mapping.fields_for(2), &[FieldName::from("name")]);

        form.insert("x".to_string(), vec!["price".to_string()]);
        assert_eq!(
            ColumnMapping::from_form(&form),
            Err(MappingError::InvalidIndex("x".to_string()))
        );
    }

    #[test]
    fn test_mapping_validation() {
        assert_eq!(ColumnMapping::new().validate(None), Err(MappingError::Empty));

        let mapping = ColumnMapping::new().with(4, "sku");
        assert_eq!(
            mapping.validate(Some(3)),
            Err(MappingError::UnknownColumn { index: 4, columns: 3 })
        );
        assert!(mapping.validate(Some(5)).is_ok());
    }

    #[test]
    fn test_mapping_json_shape() {
        let mapping = ColumnMapping::new()
            .with(0, "sku")
            .with(3, "tags")
            .with_strategy("tags", DecodeStrategy::List { delimiter: '|' });
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["columns"]["0"][0], "sku");
        assert_eq!(json["strategies"]["tags"]["type"], "list");

        let back: ColumnMapping = serde_json::from_value(json).unwrap();
        assert_eq!(back, mapping);
    }

    #[test]
    fn test_encoding_labels() {
        assert_eq!("Windows-1252".parse::<Encoding>().unwrap(), Encoding::Windows1252);
        assert!("ebcdic".parse::<Encoding>().is_err());
        assert_eq!(Encoding::Iso8859_2.decoder().name(), "ISO-8859-2");
    }

    #[test]
    fn test_options_defaults_from_json() {
        let opts: ImportOptions = serde_json::from_str(r#"{"chunkSize": 5, "delimiter": ";"}"#).unwrap();
        assert!(opts.first_row_titles);
        assert_eq!(opts.chunk_size, 5);
        assert_eq!(opts.delimiter, Some(';'));
    }

    #[test]
    fn test_price_format() {
        let p = Product { id: 1, name: "Mug".into(), sku: "M1".into(), price_cents: 1205 };
        assert_eq!(p.price(), "12.05");
        let neg = Product { price_cents: -5, ..p };
        assert_eq!(neg.price(), "-0.05");
    }
}
