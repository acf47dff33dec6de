//! Product field handling: which fields a row may set and how they are parsed.

use crate::error::{StoreError, StoreResult};
use crate::models::{ImportRecord, Product};
use crate::validation::validate_product_row;

/// Fillable product fields.
pub const PRODUCT_FIELDS: [&str; 3] = ["name", "sku", "price"];

/// Fields a row sets on a product. `None` leaves the field untouched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub sku: Option<String>,
    pub price_cents: Option<i64>,
}

impl ProductChanges {
    /// Validate `record` and extract the fillable fields. Other fields are ignored.
    pub fn from_record(record: &ImportRecord) -> StoreResult<Self> {
        validate_product_row(&record.to_json())
            .map_err(|errors| StoreError::Validation(errors.join("; ")))?;

        Ok(Self {
            name: record.text("name").map(|s| s.trim().to_string()),
            sku: record.text("sku").map(|s| s.trim().to_string()),
            price_cents: record.text("price").map(parse_price).transpose()?,
        })
    }

    /// Build a new product. Every field is required.
    pub fn into_product(self, id: u64) -> StoreResult<Product> {
        let mut missing = Vec::new();
        if self.name.is_none() {
            missing.push("name");
        }
        if self.sku.is_none() {
            missing.push("sku");
        }
        if self.price_cents.is_none() {
            missing.push("price");
        }

        match (self.name, self.sku, self.price_cents) {
            (Some(name), Some(sku), Some(price_cents)) => Ok(Product {
                id,
                name,
                sku,
                price_cents,
            }),
            _ => Err(StoreError::Validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            ))),
        }
    }

    pub fn apply(self, product: &mut Product) {
        if let Some(name) = self.name {
            product.name = name;
        }
        if let Some(sku) = self.sku {
            product.sku = sku;
        }
        if let Some(price_cents) = self.price_cents {
            product.price_cents = price_cents;
        }
    }
}

/// Parse `"12"`, `"12.5"` or `"12,50"` into cents.
pub fn parse_price(raw: &str) -> StoreResult<i64> {
    let invalid = || StoreError::Validation(format!("invalid price '{}'", raw));

    let normalized = raw.trim().replace(',', ".");
    let (whole, fraction) = match normalized.split_once('.') {
        Some((w, f)) => (w, f),
        None => (normalized.as_str(), ""),
    };

    if whole.is_empty() || fraction.len() > 2 {
        return Err(invalid());
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let cents: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => fraction.parse().map_err(|_| invalid())?,
    };

    whole
        .checked_mul(100)
        .and_then(|c| c.checked_add(cents))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("12").unwrap(), 1200);
        assert_eq!(parse_price(" 12.5 ").unwrap(), 1250);
        assert_eq!(parse_price("0,07").unwrap(), 7);
        assert!(parse_price("12.345").is_err());
        assert!(parse_price(".5").is_err());
        assert!(parse_price("1e3").is_err());
        assert!(parse_price("-4").is_err());
    }

    #[test]
    fn test_changes_from_full_record() {
        let record = ImportRecord::new()
            .with("sku", " ABC123 ")
            .with("name", "Mug")
            .with("price", "4.50")
            .with("colour", "red");
        let changes = ProductChanges::from_record(&record).unwrap();

        assert_eq!(changes.sku.as_deref(), Some("ABC123"));
        let product = changes.into_product(7).unwrap();
        assert_eq!(product.id, 7);
        assert_eq!(product.price_cents, 450);
    }

    #[test]
    fn test_create_requires_all_fields() {
        let record = ImportRecord::new().with("sku", "A");
        let err = ProductChanges::from_record(&record)
            .unwrap()
            .into_product(1)
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Validation("missing required field(s): name, price".into())
        );
    }

    #[test]
    fn test_null_fields_leave_product_untouched() {
        let mut record = ImportRecord::new().with("sku", "A").with("price", "2");
        record.insert("name", FieldValue::Null);

        let mut product = Product {
            id: 1,
            name: "Old".into(),
            sku: "A".into(),
            price_cents: 100,
        };
        ProductChanges::from_record(&record).unwrap().apply(&mut product);
        assert_eq!(product.name, "Old");
        assert_eq!(product.price_cents, 200);
    }

    #[test]
    fn test_schema_failure_is_validation_error() {
        let record = ImportRecord::new().with("sku", "A").with("price", "cheap");
        assert!(matches!(
            ProductChanges::from_record(&record),
            Err(StoreError::Validation(_))
        ));
    }
}
