//! Row mapping
//!
//! Turns a raw CSV row into an [`ImportRecord`] keyed by destination field.

use crate::models::{ColumnMapping, DecodeStrategy, FieldValue, ImportRecord};
use crate::parser::RawRow;

/// Map one raw row onto the destination fields of `mapping`.
///
/// A column the row does not have yields `Null`. Every field bound to a
/// column receives that column's value, decoded per the field's strategy.
pub fn map_row(raw: &[Option<String>], mapping: &ColumnMapping) -> ImportRecord {
    let mut record = ImportRecord::new();

    for (index, fields) in mapping.columns() {
        let raw_value = raw.get(index).cloned().flatten();

        for field in fields {
            let value = match (mapping.strategy_for(field), raw_value.as_deref()) {
                (_, None) => FieldValue::Null,
                (DecodeStrategy::Single, Some(v)) => FieldValue::Text(v.to_string()),
                (DecodeStrategy::List { delimiter }, Some(v)) => {
                    FieldValue::List(decode_multi_value(v, delimiter))
                }
            };
            record.insert(field.clone(), value);
        }
    }

    record
}

/// Map a chunk, pairing each record with its data-row index.
pub fn map_rows(rows: Vec<RawRow>, mapping: &ColumnMapping, first_row: usize) -> Vec<(usize, ImportRecord)> {
    rows.iter()
        .enumerate()
        .map(|(i, raw)| (first_row + i, map_row(raw, mapping)))
        .collect()
}

/// Split `value` on every `delimiter` not preceded by a backslash, then
/// unescape `\<delimiter>` in each part.
///
/// A value without the delimiter decodes to a single-element list.
pub fn decode_multi_value(value: &str, delimiter: char) -> Vec<String> {
    if !value.contains(delimiter) {
        return vec![value.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in value.chars() {
        if c == delimiter && prev != Some('\\') {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        prev = Some(c);
    }
    parts.push(current);

    let escaped = format!("\\{}", delimiter);
    let literal = delimiter.to_string();
    parts
        .into_iter()
        .map(|part| part.replace(&escaped, &literal))
        .collect()
}

/// Inverse of [`decode_multi_value`]: escape literal delimiters and join.
///
/// Items ending in a backslash do not survive a round trip, the backslash
/// escapes the following separator.
pub fn encode_multi_value<S: AsRef<str>>(items: &[S], delimiter: char) -> String {
    let escaped = format!("\\{}", delimiter);
    items
        .iter()
        .map(|item| item.as_ref().replace(delimiter, &escaped))
        .collect::<Vec<_>>()
        .join(&delimiter.to_string())
}
