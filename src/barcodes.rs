//! Barcode registration against pattern-checked barcode types

use crate::error::InventoryError;
use crate::executor::StoreError;
use crate::model::*;
use crate::store::InventoryStore;

/// Check `value` against the pattern of barcode type `type_id`
///
/// # Errors
///
/// - `NotFound` for an unknown barcode type
/// - `Validation` when the value does not match the pattern in full
/// - `Internal` when the stored pattern is not a valid regular expression
pub fn validate_barcode_value<S>(store: &S, type_id: BarcodeTypeId, value: &str) -> Result<BarcodeType, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let barcode_type = store
        .barcode_type(type_id)?
        .ok_or_else(|| InventoryError::NotFound(format!("Barcode Type ID {type_id} Not Found")))?;
    barcode_type.validate(value)?;
    Ok(barcode_type)
}

/// Store a new barcode after validating its value
///
/// # Errors
///
/// Everything [`validate_barcode_value`] returns, and `Validation` when the
/// value is already taken.
pub fn register_barcode<S>(
    session: &mut S,
    id: BarcodeId,
    type_id: BarcodeTypeId,
    value: &str,
) -> Result<Barcode, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    validate_barcode_value(&*session, type_id, value)?;
    let barcode = Barcode {
        id,
        value: value.to_string(),
        type_id,
        withdrawn: false,
    };
    match session.save_barcode(&barcode) {
        Ok(()) => Ok(barcode),
        Err(StoreError::UniqueViolation(_)) => Err(InventoryError::Validation(format!(
            "Barcode value {value} already exists"
        ))),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::test_helpers::LayoutBuilder;

    fn with_pattern(layout: &crate::test_helpers::Layout, pattern: &str) {
        let pattern = pattern.to_string();
        let id = layout.barcode_type;
        layout
            .store
            .edit(|t| {
                if let Some(ty) = t.barcode_types.get_mut(&id) {
                    ty.allowed_pattern = Some(pattern);
                }
            })
            .unwrap();
    }

    #[test]
    fn test_register_checks_pattern() {
        let layout = LayoutBuilder::new().build();
        with_pattern(&layout, "[0-9]{6}");
        let mut session = layout.store.begin().unwrap();

        let barcode = register_barcode(&mut session, BarcodeId(5000), layout.barcode_type, "123456").unwrap();
        assert!(!barcode.withdrawn);

        let err = register_barcode(&mut session, BarcodeId(5001), layout.barcode_type, "12345").unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
    }

    #[test]
    fn test_duplicate_value_is_validation() {
        let layout = LayoutBuilder::new().build();
        let mut session = layout.store.begin().unwrap();
        register_barcode(&mut session, BarcodeId(5000), layout.barcode_type, "ABC").unwrap();
        let err = register_barcode(&mut session, BarcodeId(5001), layout.barcode_type, "ABC").unwrap_err();
        assert_eq!(err, InventoryError::Validation("Barcode value ABC already exists".into()));
    }

    #[test]
    fn test_unknown_type_is_not_found() {
        let layout = LayoutBuilder::new().build();
        let session = layout.store.begin().unwrap();
        let err = validate_barcode_value(&session, BarcodeTypeId(424242), "x").unwrap_err();
        assert_eq!(err, InventoryError::NotFound("Barcode Type ID 424242 Not Found".into()));
    }
}
