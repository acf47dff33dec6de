//! Column matcher
//!
//! Server-side model of the column matching step: file columns on one side,
//! destination fields on the other. A field is bound to at most one column at
//! a time; binding it elsewhere moves it.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::error::MappingError;
use crate::models::{ColumnMapping, FieldName};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMatcher {
    file_columns: Vec<String>,
    db_columns: Vec<FieldName>,
    mapping: ColumnMapping,
    ignored: BTreeSet<usize>,
}

impl ColumnMatcher {
    pub fn new(file_columns: Vec<String>, db_columns: Vec<FieldName>) -> Self {
        Self {
            file_columns,
            db_columns,
            mapping: ColumnMapping::new(),
            ignored: BTreeSet::new(),
        }
    }

    pub fn file_columns(&self) -> &[String] {
        &self.file_columns
    }

    pub fn db_columns(&self) -> &[FieldName] {
        &self.db_columns
    }

    /// Bind `field` to column `index`, moving it off any previous column.
    pub fn match_column(&mut self, index: usize, field: impl Into<FieldName>) -> Result<(), MappingError> {
        let field = field.into();
        if index >= self.file_columns.len() {
            return Err(MappingError::UnknownColumn {
                index,
                columns: self.file_columns.len(),
            });
        }
        if !self.db_columns.contains(&field) {
            return Err(MappingError::UnknownField(field.to_string()));
        }

        self.mapping.unbind(&field);
        self.mapping.bind(index, field);
        self.ignored.remove(&index);
        Ok(())
    }

    /// Release `field`. Returns the column it was bound to.
    pub fn unmatch(&mut self, field: &FieldName) -> Option<usize> {
        self.mapping.unbind(field)
    }

    /// Hide column `index`; its fields go back to the pool.
    pub fn ignore_column(&mut self, index: usize) {
        let bound: Vec<FieldName> = self.mapping.fields_for(index).to_vec();
        for field in &bound {
            self.mapping.unbind(field);
        }
        self.ignored.insert(index);
    }

    pub fn show_ignored(&mut self) {
        self.ignored.clear();
    }

    pub fn is_ignored(&self, index: usize) -> bool {
        self.ignored.contains(&index)
    }

    pub fn is_matched(&self, index: usize) -> bool {
        !self.mapping.fields_for(index).is_empty()
    }

    /// Bind every unbound field whose name equals a trimmed column label.
    ///
    /// Ignored columns are skipped. Returns the number of new bindings.
    pub fn auto_match(&mut self) -> usize {
        let mut matched = 0;
        let fields: Vec<FieldName> = self.db_columns.clone();

        for field in fields {
            if self.mapping.column_of(&field).is_some() {
                continue;
            }
            let found = self
                .file_columns
                .iter()
                .enumerate()
                .rev()
                .find(|(i, label)| !self.ignored.contains(i) && label.trim() == field.as_str())
                .map(|(i, _)| i);

            if let Some(index) = found {
                self.mapping.bind(index, field);
                matched += 1;
            }
        }
        matched
    }

    /// Destination fields not bound to any column.
    pub fn unmatched_fields(&self) -> Vec<&FieldName> {
        self.db_columns
            .iter()
            .filter(|f| self.mapping.column_of(f).is_none())
            .collect()
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn into_mapping(self) -> ColumnMapping {
        self.mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> ColumnMatcher {
        ColumnMatcher::new(
            vec!["SKU".into(), " name ".into(), "price".into(), "name".into()],
            vec!["sku".into(), "name".into(), "price".into()],
        )
    }

    #[test]
    fn test_match_moves_field() {
        let mut m = matcher();
        m.match_column(0, "sku").unwrap();
        m.match_column(2, "sku").unwrap();

        assert!(!m.is_matched(0));
        assert_eq!(m.mapping().column_of(&"sku".into()), Some(2));
    }

    #[test]
    fn test_match_rejects_unknowns() {
        let mut m = matcher();
        assert_eq!(
            m.match_column(9, "sku"),
            Err(MappingError::UnknownColumn { index: 9, columns: 4 })
        );
        assert_eq!(
            m.match_column(0, "colour"),
            Err(MappingError::UnknownField("colour".into()))
        );
    }

    #[test]
    fn test_auto_match_exact_trimmed_names() {
        let mut m = matcher();
        assert_eq!(m.auto_match(), 2);

        // "SKU" differs in case; the last "name" column wins
        assert_eq!(m.mapping().column_of(&"name".into()), Some(3));
        assert_eq!(m.mapping().column_of(&"price".into()), Some(2));
        assert_eq!(m.unmatched_fields(), vec![&FieldName::from("sku")]);
    }

    #[test]
    fn test_auto_match_skips_ignored_and_bound() {
        let mut m = matcher();
        m.match_column(0, "price").unwrap();
        m.ignore_column(3);
        m.auto_match();

        assert_eq!(m.mapping().column_of(&"price".into()), Some(0));
        assert_eq!(m.mapping().column_of(&"name".into()), Some(1));
    }

    #[test]
    fn test_ignore_releases_fields() {
        let mut m = matcher();
        m.match_column(1, "name").unwrap();
        m.ignore_column(1);

        assert!(m.is_ignored(1));
        assert_eq!(m.unmatch(&"name".into()), None);

        m.show_ignored();
        assert!(!m.is_ignored(1));
    }

    #[test]
    fn test_into_mapping() {
        let mut m = matcher();
        m.match_column(0, "sku").unwrap();
        m.match_column(0, "name").unwrap();
        let mapping = m.into_mapping();
        assert_eq!(mapping.fields_for(0).len(), 2);
    }
}
