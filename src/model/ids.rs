//! Strongly typed row identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl $name {
                #[must_use]
                pub fn get(self) -> i64 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<i64> for $name {
                fn from(id: i64) -> Self {
                    Self(id)
                }
            }

            impl From<$name> for i64 {
                fn from(id: $name) -> i64 {
                    id.0
                }
            }
        )+
    };
}

id_type!(
    BuildingId,
    ModuleId,
    AisleId,
    SideId,
    LadderId,
    ShelfId,
    ShelfTypeId,
    /// Identifies one slot on a shelf
    ShelfPositionId,
    OwnerId,
    SizeClassId,
    /// Tray or non-tray item id; only unique together with [`crate::model::ContainerKind`]
    ContainerId,
    ItemId,
    BarcodeId,
    BarcodeTypeId,
    /// Job id; only unique together with [`crate::model::JobKind`]
    JobId,
    UserId,
    DiscrepancyId,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&ShelfId(12)).unwrap();
        assert_eq!(json, "12");
        let id: ContainerId = serde_json::from_str("7").unwrap();
        assert_eq!(id, ContainerId(7));
    }
}
