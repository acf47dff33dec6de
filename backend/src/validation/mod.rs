//! JSON Schema validation for mapped import rows.
//!
//! Rows are checked against an embedded Draft 7 schema before they reach the
//! destination store. The schema checks shape only (types, lengths, price
//! format); which fields a create requires is decided by the store.
//!
//! # Embedded Schemas
//!
//! - `schemas/product.json` - product rows (`sku`, `name`, `price`)
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use chunkload::validation::validate_product_row;
//!
//! let row = json!({ "sku": "A-1", "name": "Mug", "price": "4.50" });
//! assert!(validate_product_row(&row).is_ok());
//! ```

use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::Value;

/// Product schema, compiled once.
static PRODUCT_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    let schema: Value = serde_json::from_str(include_str!("../../schemas/product.json"))
        .expect("Invalid embedded schema");
    jsonschema::draft7::new(&schema).expect("Invalid embedded schema")
});

/// Null fields mean "column not present in this row" and are not validated.
fn without_nulls(data: &Value) -> Value {
    match data {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Validate a mapped product row.
///
/// # Returns
/// * `Ok(())` when valid
/// * `Err(Vec<String>)` with one message per violation
pub fn validate_product_row(data: &Value) -> Result<(), Vec<String>> {
    let data = without_nulls(data);
    let errors: Vec<String> = PRODUCT_VALIDATOR
        .iter_errors(&data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_row() {
        let row = json!({ "sku": "ABC123", "name": "Mug", "price": "12.50" });
        assert!(validate_product_row(&row).is_ok());
    }

    #[test]
    fn test_comma_decimal_and_partial_row() {
        assert!(validate_product_row(&json!({ "sku": "A", "price": "3,5" })).is_ok());
        assert!(validate_product_row(&json!({ "sku": "A", "name": null })).is_ok());
    }

    #[test]
    fn test_invalid_price() {
        let row = json!({ "sku": "A", "price": "twelve" });
        let errors = validate_product_row(&row).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("twelve"));
    }

    #[test]
    fn test_blank_name_rejected() {
        assert!(validate_product_row(&json!({ "sku": "A", "name": "   " })).is_err());
    }

    #[test]
    fn test_list_value_rejected_for_scalar_field() {
        let row = json!({ "sku": ["A", "B"] });
        assert!(validate_product_row(&row).is_err());
    }

    #[test]
    fn test_compiled_once_and_reused() {
        for price in ["1", "2.5", "3,75"] {
            assert!(validate_product_row(&json!({ "sku": "A", "price": price })).is_ok());
        }
        assert!(validate_product_row(&json!({ "sku": "A", "price": "1.234" })).is_err());
    }
}
