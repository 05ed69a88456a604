//! Barcodes and their pattern-checked types

use super::ids::*;
use crate::error::InventoryError;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeType {
    pub id: BarcodeTypeId,
    pub name: String,
    /// Regular expression a value must match in full
    pub allowed_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barcode {
    pub id: BarcodeId,
    pub value: String,
    pub type_id: BarcodeTypeId,
    /// Retired: the value now only appears as a container's `withdrawn_barcode_id`
    pub withdrawn: bool,
}

impl BarcodeType {
    /// Check `value` against `allowed_pattern`
    ///
    /// # Errors
    ///
    /// `Validation` when the value does not match in full, `Internal` when the
    /// stored pattern is not a valid regular expression.
    pub fn validate(&self, value: &str) -> Result<(), InventoryError> {
        let Some(pattern) = self.allowed_pattern.as_deref() else {
            return Ok(());
        };
        let anchored = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            InventoryError::Internal(format!("Barcode type {} has an invalid pattern: {e}", self.name))
        })?;
        if anchored.is_match(value) {
            Ok(())
        } else {
            Err(InventoryError::Validation(format!(
                "Barcode value {value} does not match the pattern for type {}",
                self.name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_type(pattern: Option<&str>) -> BarcodeType {
        BarcodeType {
            id: BarcodeTypeId(1),
            name: "Item".to_string(),
            allowed_pattern: pattern.map(str::to_string),
        }
    }

    #[test]
    fn test_pattern_must_match_whole_value() {
        let ty = item_type(Some("[0-9]{6}"));
        assert!(ty.validate("123456").is_ok());
        assert!(matches!(ty.validate("1234567"), Err(InventoryError::Validation(_))));
        assert!(matches!(ty.validate("x123456"), Err(InventoryError::Validation(_))));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let ty = item_type(Some("AB[0-9]+|CD"));
        assert!(ty.validate("AB12").is_ok());
        assert!(ty.validate("CD").is_ok());
        assert!(ty.validate("AB12CD").is_err());
    }

    #[test]
    fn test_missing_pattern_accepts_anything() {
        assert!(item_type(None).validate("anything at all").is_ok());
    }

    #[test]
    fn test_broken_pattern_is_internal() {
        let err = item_type(Some("([")).validate("x").unwrap_err();
        assert_eq!(err.status_code(), 500);
    }
}
