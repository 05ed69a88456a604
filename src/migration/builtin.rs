//! Migrations shipped with the crate

use super::Migration;
use crate::model::{ContainerKind, JobKind};
use crate::store::postgres::{member_table, MemberTable};

/// All built-in migrations, unsorted
#[must_use]
pub fn migrations() -> Vec<Box<dyn Migration>> {
    vec![Box::new(InventorySchema), Box::new(OccupancyConstraints)]
}

/// Columns every job table carries
const JOB_COLUMNS: &str = "id BIGSERIAL PRIMARY KEY,
    status TEXT NOT NULL,
    user_id BIGINT,
    created_by_id BIGINT,
    create_dt TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    update_dt TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    run_timestamp TIMESTAMPTZ,
    run_time_us BIGINT NOT NULL DEFAULT 0";

/// Columns shared by `trays` and `non_tray_items`
const CONTAINER_COLUMNS: &str = "id BIGSERIAL PRIMARY KEY,
    barcode_id BIGINT UNIQUE REFERENCES barcodes (id),
    withdrawn_barcode_id BIGINT REFERENCES barcodes (id),
    owner_id BIGINT REFERENCES owners (id),
    size_class_id BIGINT REFERENCES size_classes (id),
    shelf_position_id BIGINT REFERENCES shelf_positions (id),
    shelf_position_proposed_id BIGINT REFERENCES shelf_positions (id),
    scanned_for_shelving BOOLEAN NOT NULL DEFAULT false,
    scanned_for_refile_queue BOOLEAN NOT NULL DEFAULT false,
    accession_job_id BIGINT REFERENCES accession_jobs (id),
    verification_job_id BIGINT REFERENCES verification_jobs (id),
    shelving_job_id BIGINT REFERENCES shelving_jobs (id),
    status TEXT NOT NULL DEFAULT 'In',
    shelved_dt TIMESTAMPTZ,
    withdrawal_dt TIMESTAMPTZ";

/// Location hierarchy, barcodes, containers, items, jobs and discrepancies
pub struct InventorySchema;

impl Migration for InventorySchema {
    fn name(&self) -> &str {
        "inventory_schema"
    }

    fn version(&self) -> i64 {
        1
    }

    fn statements(&self) -> Vec<String> {
        let mut statements: Vec<String> = [
            "CREATE TABLE buildings (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            )",
            "CREATE TABLE modules (
                id BIGSERIAL PRIMARY KEY,
                building_id BIGINT NOT NULL REFERENCES buildings (id),
                module_number TEXT NOT NULL,
                UNIQUE (building_id, module_number)
            )",
            "CREATE TABLE aisle_numbers (id BIGSERIAL PRIMARY KEY, number INTEGER NOT NULL UNIQUE)",
            "CREATE TABLE ladder_numbers (id BIGSERIAL PRIMARY KEY, number INTEGER NOT NULL UNIQUE)",
            "CREATE TABLE shelf_numbers (id BIGSERIAL PRIMARY KEY, number INTEGER NOT NULL UNIQUE)",
            "CREATE TABLE aisles (
                id BIGSERIAL PRIMARY KEY,
                module_id BIGINT REFERENCES modules (id),
                building_id BIGINT REFERENCES buildings (id),
                aisle_number_id BIGINT NOT NULL REFERENCES aisle_numbers (id),
                sort_priority BIGINT,
                CHECK (module_id IS NOT NULL OR building_id IS NOT NULL)
            )",
            "CREATE TABLE sides (
                id BIGSERIAL PRIMARY KEY,
                aisle_id BIGINT NOT NULL REFERENCES aisles (id),
                side_orientation TEXT NOT NULL CHECK (side_orientation IN ('Left', 'Right')),
                UNIQUE (aisle_id, side_orientation)
            )",
            "CREATE TABLE ladders (
                id BIGSERIAL PRIMARY KEY,
                side_id BIGINT NOT NULL REFERENCES sides (id),
                ladder_number_id BIGINT NOT NULL REFERENCES ladder_numbers (id),
                sort_priority BIGINT,
                UNIQUE (side_id, ladder_number_id)
            )",
            "CREATE TABLE owners (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
            "CREATE TABLE size_classes (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
            "CREATE TABLE shelf_types (
                id BIGSERIAL PRIMARY KEY,
                size_class_id BIGINT NOT NULL REFERENCES size_classes (id),
                max_capacity INTEGER NOT NULL CHECK (max_capacity > 0)
            )",
            "CREATE TABLE barcode_types (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                allowed_pattern TEXT
            )",
            "CREATE TABLE barcodes (
                id BIGSERIAL PRIMARY KEY,
                value TEXT NOT NULL UNIQUE,
                type_id BIGINT NOT NULL REFERENCES barcode_types (id),
                withdrawn BOOLEAN NOT NULL DEFAULT false
            )",
            "CREATE TABLE shelves (
                id BIGSERIAL PRIMARY KEY,
                ladder_id BIGINT NOT NULL REFERENCES ladders (id),
                shelf_type_id BIGINT NOT NULL REFERENCES shelf_types (id),
                owner_id BIGINT NOT NULL REFERENCES owners (id),
                barcode_id BIGINT UNIQUE REFERENCES barcodes (id),
                shelf_number_id BIGINT NOT NULL REFERENCES shelf_numbers (id),
                sort_priority BIGINT,
                UNIQUE (ladder_id, shelf_number_id)
            )",
            "CREATE TABLE shelf_positions (
                id BIGSERIAL PRIMARY KEY,
                shelf_id BIGINT NOT NULL REFERENCES shelves (id),
                position_number INTEGER NOT NULL CHECK (position_number > 0),
                UNIQUE (shelf_id, position_number)
            )",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        statements.push(format!(
            "CREATE TABLE accession_jobs ({JOB_COLUMNS},
                trayed BOOLEAN NOT NULL,
                owner_id BIGINT REFERENCES owners (id),
                size_class_id BIGINT REFERENCES size_classes (id))"
        ));
        statements.push(format!(
            "CREATE TABLE shelving_jobs ({JOB_COLUMNS},
                origin TEXT NOT NULL CHECK (origin IN ('Verification', 'Direct')),
                building_id BIGINT REFERENCES buildings (id))"
        ));
        statements.push(format!(
            "CREATE TABLE verification_jobs ({JOB_COLUMNS},
                accession_job_id BIGINT UNIQUE REFERENCES accession_jobs (id),
                shelving_job_id BIGINT REFERENCES shelving_jobs (id),
                trayed BOOLEAN NOT NULL,
                owner_id BIGINT REFERENCES owners (id),
                size_class_id BIGINT REFERENCES size_classes (id))"
        ));
        statements.push(format!("CREATE TABLE refile_jobs ({JOB_COLUMNS})"));
        statements.push(format!("CREATE TABLE withdraw_jobs ({JOB_COLUMNS})"));
        statements.push(format!(
            "CREATE TABLE pick_lists ({JOB_COLUMNS},
                building_id BIGINT REFERENCES buildings (id))"
        ));

        for kind in [ContainerKind::Tray, ContainerKind::NonTray] {
            statements.push(format!("CREATE TABLE {} ({CONTAINER_COLUMNS})", kind.table()));
        }
        statements.push(
            "CREATE TABLE items (
                id BIGSERIAL PRIMARY KEY,
                tray_id BIGINT REFERENCES trays (id),
                barcode_id BIGINT UNIQUE REFERENCES barcodes (id),
                withdrawn_barcode_id BIGINT REFERENCES barcodes (id),
                owner_id BIGINT REFERENCES owners (id),
                size_class_id BIGINT REFERENCES size_classes (id),
                accession_job_id BIGINT REFERENCES accession_jobs (id),
                verification_job_id BIGINT REFERENCES verification_jobs (id),
                scanned_for_refile_queue BOOLEAN NOT NULL DEFAULT false,
                status TEXT NOT NULL DEFAULT 'In',
                withdrawal_dt TIMESTAMPTZ
            )"
            .to_string(),
        );

        for kind in [JobKind::Refile, JobKind::Withdraw, JobKind::PickList] {
            for member in MemberTable::ALL {
                if let Some(table) = member_table(kind, member) {
                    statements.push(format!(
                        "CREATE TABLE {table} (
                            job_id BIGINT NOT NULL REFERENCES {} (id),
                            member_id BIGINT NOT NULL REFERENCES {} (id),
                            PRIMARY KEY (job_id, member_id)
                        )",
                        kind.table(),
                        member.target(),
                    ));
                }
            }
        }

        statements.push(
            "CREATE TABLE shelving_discrepancies (
                id BIGSERIAL PRIMARY KEY,
                shelving_job_id BIGINT NOT NULL REFERENCES shelving_jobs (id),
                tray_id BIGINT REFERENCES trays (id),
                non_tray_item_id BIGINT REFERENCES non_tray_items (id),
                discrepancy_type TEXT NOT NULL CHECK (discrepancy_type IN ('Owner', 'Size', 'Location')),
                user_id BIGINT,
                owner_id BIGINT,
                size_class_id BIGINT,
                assigned_location TEXT,
                pre_assigned_location TEXT,
                error TEXT NOT NULL,
                create_dt TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CHECK ((tray_id IS NULL) <> (non_tray_item_id IS NULL))
            )"
            .to_string(),
        );
        statements.push(
            "CREATE INDEX idx_shelving_discrepancies_job ON shelving_discrepancies (shelving_job_id)".to_string(),
        );
        statements
    }
}

/// At most one tray and at most one non-tray item per position
///
/// A tray and a non-tray item can still share a position; row locks in the
/// placement paths prevent that and `capacity::audit_occupancy` reports it.
pub struct OccupancyConstraints;

impl Migration for OccupancyConstraints {
    fn name(&self) -> &str {
        "occupancy_constraints"
    }

    fn version(&self) -> i64 {
        2
    }

    fn statements(&self) -> Vec<String> {
        let mut statements = Vec::new();
        for kind in [ContainerKind::Tray, ContainerKind::NonTray] {
            let table = kind.table();
            statements.push(format!(
                "CREATE UNIQUE INDEX uq_{table}_shelf_position ON {table} (shelf_position_id) \
                 WHERE shelf_position_id IS NOT NULL"
            ));
            statements.push(format!(
                "CREATE INDEX idx_{table}_refile_queue ON {table} (id) WHERE scanned_for_refile_queue"
            ));
        }
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creates_every_job_table() {
        let sql = InventorySchema.statements().join("\n");
        for kind in JobKind::ALL {
            assert!(sql.contains(&format!("CREATE TABLE {} (", kind.table())), "{kind}");
        }
        assert!(sql.contains("CREATE TABLE refile_job_items"));
        assert!(sql.contains("CREATE TABLE pick_list_non_tray_items"));
    }

    #[test]
    fn test_parents_are_created_before_children() {
        let statements = InventorySchema.statements();
        let position = |needle: &str| {
            statements
                .iter()
                .position(|s| s.contains(&format!("CREATE TABLE {needle} (")))
                .unwrap_or(usize::MAX)
        };
        assert!(position("shelving_jobs") < position("verification_jobs"));
        assert!(position("accession_jobs") < position("verification_jobs"));
        assert!(position("shelf_positions") < position("trays"));
        assert!(position("trays") < position("items"));
        assert!(position("barcodes") < position("shelves"));
    }

    #[test]
    fn test_available_space_is_never_a_column() {
        let sql = InventorySchema.statements().join("\n");
        assert!(!sql.contains("available_space"));
    }

    #[test]
    fn test_occupancy_indexes_are_partial_and_unique() {
        let statements = OccupancyConstraints.statements();
        assert!(statements
            .iter()
            .any(|s| s.starts_with("CREATE UNIQUE INDEX uq_trays_shelf_position")
                && s.contains("WHERE shelf_position_id IS NOT NULL")));
        assert!(statements.iter().any(|s| s.contains("uq_non_tray_items_shelf_position")));
    }

    #[test]
    fn test_checksums_differ_between_migrations() {
        assert_ne!(InventorySchema.checksum(), OccupancyConstraints.checksum());
    }
}
