//! PostgreSQL store
//!
//! Each [`PgSession`] is one [`Transaction`] on a pooled connection. Fixed
//! statements are plain parameterised SQL; the scope-narrowed candidate query
//! is built with `sea-query` because its filter varies with the requested scope.
//!
//! Writers lock the positions they are about to fill with
//! `SELECT ... FOR UPDATE` and re-read occupancy afterwards. The partial unique
//! indexes on `shelf_position_id` turn any placement that slips through into a
//! unique violation, which surfaces as `InventoryError::Conflict`.

use super::{Database, InventoryStore, JobMember, JobMembers, UnitOfWork};
use crate::allocator::{CandidatePosition, ScopeFilter};
use crate::config::DatabaseConfig;
use crate::connection::ConnectionError;
use crate::executor::{Executor, StoreError};
use crate::model::*;
use crate::params::with_converted_params;
use crate::pool::ConnectionPool;
use crate::transaction::{IsolationLevel, Transaction};
use chrono::{DateTime, TimeDelta, Utc};
use may_postgres::types::{FromSql, ToSql};
use may_postgres::Row;
use sea_query::{Expr, ExprTrait, JoinType, Order, PostgresQueryBuilder, Query};
use std::sync::Arc;

/// Shared handle to a PostgreSQL inventory
#[derive(Clone)]
pub struct PgDatabase {
    pool: Arc<ConnectionPool>,
}

impl PgDatabase {
    /// Open the connection pool described by `config`
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the URL is invalid or a connection cannot be opened.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        Ok(Self::from_pool(Arc::new(ConnectionPool::new(config)?)))
    }

    #[must_use]
    pub fn from_pool(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl Database for PgDatabase {
    type Session<'a> = PgSession<'a>;

    fn begin(&self) -> Result<PgSession<'_>, StoreError> {
        let conn = self.pool.acquire()?;
        let tx = Transaction::begin(conn, IsolationLevel::ReadCommitted)?;
        Ok(PgSession { tx })
    }
}

/// One transaction against a [`PgDatabase`]
pub struct PgSession<'a> {
    tx: Transaction<'a>,
}

impl UnitOfWork for PgSession<'_> {
    fn commit(self) -> Result<(), StoreError> {
        Ok(self.tx.commit()?)
    }

    fn rollback(self) -> Result<(), StoreError> {
        Ok(self.tx.rollback()?)
    }
}

/// Owned bind values for statements assembled at run time
type Bound = Vec<(&'static str, Box<dyn ToSql>)>;

fn bind<T: ToSql + 'static>(column: &'static str, value: T) -> (&'static str, Box<dyn ToSql>) {
    (column, Box::new(value))
}

fn col<'r, T: FromSql<'r>>(row: &'r Row, name: &str) -> Result<T, StoreError> {
    row.try_get(name)
        .map_err(|e| StoreError::Parse(format!("column {name}: {e}")))
}

fn raw<I: Copy + Into<i64>>(id: Option<I>) -> Option<i64> {
    id.map(Into::into)
}

fn micros(run_time: TimeDelta) -> Result<i64, StoreError> {
    run_time
        .num_microseconds()
        .ok_or_else(|| StoreError::Parse(format!("run time {run_time} does not fit in microseconds")))
}

const CONTAINER_COLUMNS: &str = "c.id, c.barcode_id, c.withdrawn_barcode_id, c.owner_id, c.size_class_id, \
     c.shelf_position_id, c.shelf_position_proposed_id, c.scanned_for_shelving, c.scanned_for_refile_queue, \
     c.accession_job_id, c.verification_job_id, c.shelving_job_id, c.status, c.shelved_dt, c.withdrawal_dt";

const SHELF_SELECT: &str = "SELECT s.id, s.ladder_id, s.shelf_type_id, s.owner_id, s.barcode_id, \
     s.shelf_number_id, n.number, s.sort_priority FROM shelves s JOIN shelf_numbers n ON n.id = s.shelf_number_id";

const OCCUPANCY: &str = "SELECT shelf_position_id, 0 AS kind, id FROM trays WHERE shelf_position_id IS NOT NULL \
     UNION ALL SELECT shelf_position_id, 1 AS kind, id FROM non_tray_items WHERE shelf_position_id IS NOT NULL";

fn container_kind(ordinal: i32) -> Result<ContainerKind, StoreError> {
    match ordinal {
        0 => Ok(ContainerKind::Tray),
        1 => Ok(ContainerKind::NonTray),
        other => Err(StoreError::Parse(format!("unknown container kind ordinal {other}"))),
    }
}

fn item_status(row: &Row) -> Result<ItemStatus, StoreError> {
    let text: String = col(row, "status")?;
    ItemStatus::parse(&text).ok_or_else(|| StoreError::Parse(format!("unknown item status {text}")))
}

fn container_from_row(kind: ContainerKind, row: &Row) -> Result<Container, StoreError> {
    Ok(Container {
        id: ContainerId(col(row, "id")?),
        kind,
        barcode_id: col::<Option<i64>>(row, "barcode_id")?.map(BarcodeId),
        withdrawn_barcode_id: col::<Option<i64>>(row, "withdrawn_barcode_id")?.map(BarcodeId),
        owner_id: col::<Option<i64>>(row, "owner_id")?.map(OwnerId),
        size_class_id: col::<Option<i64>>(row, "size_class_id")?.map(SizeClassId),
        shelf_position_id: col::<Option<i64>>(row, "shelf_position_id")?.map(ShelfPositionId),
        shelf_position_proposed_id: col::<Option<i64>>(row, "shelf_position_proposed_id")?.map(ShelfPositionId),
        scanned_for_shelving: col(row, "scanned_for_shelving")?,
        scanned_for_refile_queue: col(row, "scanned_for_refile_queue")?,
        accession_job_id: col::<Option<i64>>(row, "accession_job_id")?.map(JobId),
        verification_job_id: col::<Option<i64>>(row, "verification_job_id")?.map(JobId),
        shelving_job_id: col::<Option<i64>>(row, "shelving_job_id")?.map(JobId),
        status: item_status(row)?,
        shelved_dt: col(row, "shelved_dt")?,
        withdrawal_dt: col(row, "withdrawal_dt")?,
    })
}

fn item_from_row(row: &Row) -> Result<Item, StoreError> {
    Ok(Item {
        id: ItemId(col(row, "id")?),
        tray_id: col::<Option<i64>>(row, "tray_id")?.map(ContainerId),
        barcode_id: col::<Option<i64>>(row, "barcode_id")?.map(BarcodeId),
        withdrawn_barcode_id: col::<Option<i64>>(row, "withdrawn_barcode_id")?.map(BarcodeId),
        owner_id: col::<Option<i64>>(row, "owner_id")?.map(OwnerId),
        size_class_id: col::<Option<i64>>(row, "size_class_id")?.map(SizeClassId),
        accession_job_id: col::<Option<i64>>(row, "accession_job_id")?.map(JobId),
        verification_job_id: col::<Option<i64>>(row, "verification_job_id")?.map(JobId),
        scanned_for_refile_queue: col(row, "scanned_for_refile_queue")?,
        status: item_status(row)?,
        withdrawal_dt: col(row, "withdrawal_dt")?,
    })
}

fn shelf_from_row(row: &Row) -> Result<Shelf, StoreError> {
    Ok(Shelf {
        id: ShelfId(col(row, "id")?),
        ladder_id: LadderId(col(row, "ladder_id")?),
        shelf_type_id: ShelfTypeId(col(row, "shelf_type_id")?),
        owner_id: OwnerId(col(row, "owner_id")?),
        barcode_id: col::<Option<i64>>(row, "barcode_id")?.map(BarcodeId),
        number_id: col(row, "shelf_number_id")?,
        number: col(row, "number")?,
        sort_priority: col(row, "sort_priority")?,
    })
}

fn position_from_row(row: &Row) -> Result<ShelfPosition, StoreError> {
    Ok(ShelfPosition {
        id: ShelfPositionId(col(row, "id")?),
        shelf_id: ShelfId(col(row, "shelf_id")?),
        number: col(row, "position_number")?,
    })
}

fn job_from_row(kind: JobKind, row: &Row) -> Result<Job, StoreError> {
    let status_text: String = col(row, "status")?;
    let status =
        JobStatus::parse(&status_text).ok_or_else(|| StoreError::Parse(format!("unknown job status {status_text}")))?;

    let details = match kind {
        JobKind::Accession => JobDetails::Accession {
            trayed: col(row, "trayed")?,
            owner_id: col::<Option<i64>>(row, "owner_id")?.map(OwnerId),
            size_class_id: col::<Option<i64>>(row, "size_class_id")?.map(SizeClassId),
        },
        JobKind::Verification => JobDetails::Verification {
            accession_job_id: col::<Option<i64>>(row, "accession_job_id")?.map(JobId),
            shelving_job_id: col::<Option<i64>>(row, "shelving_job_id")?.map(JobId),
            trayed: col(row, "trayed")?,
            owner_id: col::<Option<i64>>(row, "owner_id")?.map(OwnerId),
            size_class_id: col::<Option<i64>>(row, "size_class_id")?.map(SizeClassId),
        },
        JobKind::Shelving => {
            let origin_text: String = col(row, "origin")?;
            JobDetails::Shelving {
                origin: ShelvingOrigin::parse(&origin_text)
                    .ok_or_else(|| StoreError::Parse(format!("unknown shelving origin {origin_text}")))?,
                building_id: col::<Option<i64>>(row, "building_id")?.map(BuildingId),
            }
        }
        JobKind::Refile => JobDetails::Refile,
        JobKind::Withdraw => JobDetails::Withdraw,
        JobKind::PickList => JobDetails::PickList {
            building_id: col::<Option<i64>>(row, "building_id")?.map(BuildingId),
        },
    };

    Ok(Job {
        id: JobId(col(row, "id")?),
        status,
        user_id: col::<Option<i64>>(row, "user_id")?.map(UserId),
        created_by_id: col::<Option<i64>>(row, "created_by_id")?.map(UserId),
        create_dt: col(row, "create_dt")?,
        update_dt: col(row, "update_dt")?,
        last_transition: col(row, "run_timestamp")?,
        run_time: TimeDelta::microseconds(col(row, "run_time_us")?),
        details,
    })
}

/// Every stored column of a job except `id`
fn job_columns(job: &Job) -> Result<Bound, StoreError> {
    let mut columns: Bound = vec![
        bind("status", job.status.as_str().to_string()),
        bind("user_id", raw(job.user_id)),
        bind("created_by_id", raw(job.created_by_id)),
        bind("create_dt", job.create_dt),
        bind("update_dt", job.update_dt),
        bind("run_timestamp", job.last_transition),
        bind("run_time_us", micros(job.run_time)?),
    ];
    match &job.details {
        JobDetails::Accession {
            trayed,
            owner_id,
            size_class_id,
        } => {
            columns.push(bind("trayed", *trayed));
            columns.push(bind("owner_id", raw(*owner_id)));
            columns.push(bind("size_class_id", raw(*size_class_id)));
        }
        JobDetails::Verification {
            accession_job_id,
            shelving_job_id,
            trayed,
            owner_id,
            size_class_id,
        } => {
            columns.push(bind("accession_job_id", raw(*accession_job_id)));
            columns.push(bind("shelving_job_id", raw(*shelving_job_id)));
            columns.push(bind("trayed", *trayed));
            columns.push(bind("owner_id", raw(*owner_id)));
            columns.push(bind("size_class_id", raw(*size_class_id)));
        }
        JobDetails::Shelving { origin, building_id } => {
            columns.push(bind("origin", origin.as_str().to_string()));
            columns.push(bind("building_id", raw(*building_id)));
        }
        JobDetails::PickList { building_id } => columns.push(bind("building_id", raw(*building_id))),
        JobDetails::Refile | JobDetails::Withdraw => {}
    }
    Ok(columns)
}

fn container_columns(container: &Container) -> Bound {
    vec![
        bind("id", container.id.get()),
        bind("barcode_id", raw(container.barcode_id)),
        bind("withdrawn_barcode_id", raw(container.withdrawn_barcode_id)),
        bind("owner_id", raw(container.owner_id)),
        bind("size_class_id", raw(container.size_class_id)),
        bind("shelf_position_id", raw(container.shelf_position_id)),
        bind("shelf_position_proposed_id", raw(container.shelf_position_proposed_id)),
        bind("scanned_for_shelving", container.scanned_for_shelving),
        bind("scanned_for_refile_queue", container.scanned_for_refile_queue),
        bind("accession_job_id", raw(container.accession_job_id)),
        bind("verification_job_id", raw(container.verification_job_id)),
        bind("shelving_job_id", raw(container.shelving_job_id)),
        bind("status", container.status.as_str().to_string()),
        bind("shelved_dt", container.shelved_dt),
        bind("withdrawal_dt", container.withdrawal_dt),
    ]
}

fn item_columns(item: &Item) -> Bound {
    vec![
        bind("id", item.id.get()),
        bind("tray_id", raw(item.tray_id)),
        bind("barcode_id", raw(item.barcode_id)),
        bind("withdrawn_barcode_id", raw(item.withdrawn_barcode_id)),
        bind("owner_id", raw(item.owner_id)),
        bind("size_class_id", raw(item.size_class_id)),
        bind("accession_job_id", raw(item.accession_job_id)),
        bind("verification_job_id", raw(item.verification_job_id)),
        bind("scanned_for_refile_queue", item.scanned_for_refile_queue),
        bind("status", item.status.as_str().to_string()),
        bind("withdrawal_dt", item.withdrawal_dt),
    ]
}

fn placeholders(from: usize, count: usize) -> String {
    (from..from + count).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ")
}

fn refs(bound: &Bound) -> Vec<&dyn ToSql> {
    bound.iter().map(|(_, value)| value.as_ref()).collect()
}

/// Association table holding `member` rows for a refile, withdraw or pick list job
pub(crate) fn member_table(kind: JobKind, member: MemberTable) -> Option<&'static str> {
    let table = match (kind, member) {
        (JobKind::Refile, MemberTable::Trays) => "refile_job_trays",
        (JobKind::Refile, MemberTable::NonTrays) => "refile_job_non_tray_items",
        (JobKind::Refile, MemberTable::Items) => "refile_job_items",
        (JobKind::Withdraw, MemberTable::Trays) => "withdraw_job_trays",
        (JobKind::Withdraw, MemberTable::NonTrays) => "withdraw_job_non_tray_items",
        (JobKind::Withdraw, MemberTable::Items) => "withdraw_job_items",
        (JobKind::PickList, MemberTable::Trays) => "pick_list_trays",
        (JobKind::PickList, MemberTable::NonTrays) => "pick_list_non_tray_items",
        (JobKind::PickList, MemberTable::Items) => "pick_list_items",
        _ => return None,
    };
    Some(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemberTable {
    Trays,
    NonTrays,
    Items,
}

impl MemberTable {
    pub(crate) const ALL: [MemberTable; 3] = [MemberTable::Trays, MemberTable::NonTrays, MemberTable::Items];

    /// Table the member id references
    pub(crate) fn target(self) -> &'static str {
        match self {
            MemberTable::Trays => ContainerKind::Tray.table(),
            MemberTable::NonTrays => ContainerKind::NonTray.table(),
            MemberTable::Items => "items",
        }
    }
}

impl PgSession<'_> {
    fn ids(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<i64>, StoreError> {
        self.tx
            .query_all(sql, params)?
            .iter()
            .map(|row| row.try_get::<_, i64>(0).map_err(|e| StoreError::Parse(e.to_string())))
            .collect()
    }

    fn upsert(&self, table: &str, columns: &Bound) -> Result<(), StoreError> {
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        let updates = names
            .iter()
            .filter(|name| **name != "id")
            .map(|name| format!("{name} = EXCLUDED.{name}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT (id) DO UPDATE SET {updates}",
            names.join(", "),
            placeholders(1, names.len()),
        );
        self.tx.execute(&sql, &refs(columns))?;
        Ok(())
    }

    fn containers_where(&self, column: &str, id: JobId) -> Result<Vec<ContainerRef>, StoreError> {
        let mut found = Vec::new();
        for kind in [ContainerKind::Tray, ContainerKind::NonTray] {
            let sql = format!("SELECT id FROM {} WHERE {column} = $1 ORDER BY id", kind.table());
            found.extend(self.ids(&sql, &[&id.get()])?.into_iter().map(|raw| ContainerRef {
                kind,
                id: ContainerId(raw),
            }));
        }
        Ok(found)
    }

    fn items_where(&self, column: &str, id: JobId) -> Result<Vec<ItemId>, StoreError> {
        let sql = format!("SELECT id FROM items WHERE {column} = $1 ORDER BY id");
        Ok(self.ids(&sql, &[&id.get()])?.into_iter().map(ItemId).collect())
    }

    fn association_members(&self, kind: JobKind, id: JobId) -> Result<JobMembers, StoreError> {
        let mut members = JobMembers::default();
        for table in MemberTable::ALL {
            let Some(name) = member_table(kind, table) else {
                continue;
            };
            let sql = format!("SELECT member_id FROM {name} WHERE job_id = $1 ORDER BY member_id");
            let ids = self.ids(&sql, &[&id.get()])?;
            match table {
                MemberTable::Trays => members.containers.extend(ids.into_iter().map(ContainerRef::tray)),
                MemberTable::NonTrays => members.containers.extend(ids.into_iter().map(ContainerRef::non_tray)),
                MemberTable::Items => members.items.extend(ids.into_iter().map(ItemId)),
            }
        }
        Ok(members)
    }

    fn candidate_query(scope: &ScopeFilter) -> (String, sea_query::Values) {
        let mut query = Query::select();
        query
            .expr_as(Expr::col(("p", "id")), "position_id")
            .expr_as(Expr::col(("p", "shelf_id")), "shelf_id")
            .expr_as(Expr::col(("p", "position_number")), "position_number")
            .expr_as(Expr::col(("s", "owner_id")), "owner_id")
            .expr_as(Expr::col(("st", "size_class_id")), "size_class_id")
            .expr_as(Expr::cust("COALESCE(a.sort_priority, a.aisle_number_id)"), "aisle_key")
            .expr_as(Expr::cust("COALESCE(l.sort_priority, l.ladder_number_id)"), "ladder_key")
            .expr_as(Expr::cust("COALESCE(s.sort_priority, s.shelf_number_id)"), "shelf_key")
            .from_as("shelf_positions", "p")
            .join_as(JoinType::InnerJoin, "shelves", "s", Expr::col(("s", "id")).equals(("p", "shelf_id")))
            .join_as(
                JoinType::InnerJoin,
                "shelf_types",
                "st",
                Expr::col(("st", "id")).equals(("s", "shelf_type_id")),
            )
            .join_as(JoinType::InnerJoin, "ladders", "l", Expr::col(("l", "id")).equals(("s", "ladder_id")))
            .join_as(JoinType::InnerJoin, "sides", "sd", Expr::col(("sd", "id")).equals(("l", "side_id")))
            .join_as(JoinType::InnerJoin, "aisles", "a", Expr::col(("a", "id")).equals(("sd", "aisle_id")))
            .join_as(JoinType::LeftJoin, "modules", "m", Expr::col(("m", "id")).equals(("a", "module_id")))
            .and_where(Expr::cust(
                "NOT EXISTS (SELECT 1 FROM trays t WHERE t.shelf_position_id = p.id)",
            ))
            .and_where(Expr::cust(
                "NOT EXISTS (SELECT 1 FROM non_tray_items n WHERE n.shelf_position_id = p.id)",
            ));

        match *scope {
            ScopeFilter::Ladder(id) => query.and_where(Expr::col(("l", "id")).eq(id.get())),
            ScopeFilter::Side(id) => query.and_where(Expr::col(("sd", "id")).eq(id.get())),
            ScopeFilter::Aisle(id) => query.and_where(Expr::col(("a", "id")).eq(id.get())),
            ScopeFilter::Module(id) => query.and_where(Expr::col(("a", "module_id")).eq(id.get())),
            ScopeFilter::BuildingModules(id) => query.and_where(Expr::col(("m", "building_id")).eq(id.get())),
            ScopeFilter::BuildingAisles(id) => query.and_where(Expr::col(("a", "building_id")).eq(id.get())),
        };

        query
            .order_by_expr(Expr::cust("aisle_key"), Order::Asc)
            .order_by_expr(Expr::cust("ladder_key"), Order::Asc)
            .order_by_expr(Expr::cust("shelf_key"), Order::Asc)
            .order_by(("p", "position_number"), Order::Asc)
            .order_by(("p", "id"), Order::Asc);

        query.build(PostgresQueryBuilder)
    }
}

fn candidate_from_row(row: &Row) -> Result<CandidatePosition, StoreError> {
    Ok(CandidatePosition {
        position_id: ShelfPositionId(col(row, "position_id")?),
        shelf_id: ShelfId(col(row, "shelf_id")?),
        number: col(row, "position_number")?,
        owner_id: OwnerId(col(row, "owner_id")?),
        size_class_id: SizeClassId(col(row, "size_class_id")?),
        sort_key: (col(row, "aisle_key")?, col(row, "ladder_key")?, col(row, "shelf_key")?),
    })
}

impl InventoryStore for PgSession<'_> {
    fn building(&self, id: BuildingId) -> Result<Option<Building>, StoreError> {
        self.tx
            .query_opt("SELECT id, name FROM buildings WHERE id = $1", &[&id.get()])?
            .map(|row| {
                Ok(Building {
                    id: BuildingId(col(&row, "id")?),
                    name: col(&row, "name")?,
                })
            })
            .transpose()
    }

    fn module(&self, id: ModuleId) -> Result<Option<Module>, StoreError> {
        self.tx
            .query_opt(
                "SELECT id, building_id, module_number FROM modules WHERE id = $1",
                &[&id.get()],
            )?
            .map(|row| {
                Ok(Module {
                    id: ModuleId(col(&row, "id")?),
                    building_id: BuildingId(col(&row, "building_id")?),
                    number: col(&row, "module_number")?,
                })
            })
            .transpose()
    }

    fn aisle(&self, id: AisleId) -> Result<Option<Aisle>, StoreError> {
        self.tx
            .query_opt(
                "SELECT a.id, a.module_id, a.building_id, a.aisle_number_id, n.number, a.sort_priority \
                 FROM aisles a JOIN aisle_numbers n ON n.id = a.aisle_number_id WHERE a.id = $1",
                &[&id.get()],
            )?
            .map(|row| {
                Ok(Aisle {
                    id: AisleId(col(&row, "id")?),
                    module_id: col::<Option<i64>>(&row, "module_id")?.map(ModuleId),
                    building_id: col::<Option<i64>>(&row, "building_id")?.map(BuildingId),
                    number_id: col(&row, "aisle_number_id")?,
                    number: col(&row, "number")?,
                    sort_priority: col(&row, "sort_priority")?,
                })
            })
            .transpose()
    }

    fn side(&self, id: SideId) -> Result<Option<Side>, StoreError> {
        self.tx
            .query_opt("SELECT id, aisle_id, side_orientation FROM sides WHERE id = $1", &[&id.get()])?
            .map(|row| {
                let orientation: String = col(&row, "side_orientation")?;
                Ok(Side {
                    id: SideId(col(&row, "id")?),
                    aisle_id: AisleId(col(&row, "aisle_id")?),
                    orientation: match orientation.as_str() {
                        "Left" => SideOrientation::Left,
                        "Right" => SideOrientation::Right,
                        other => return Err(StoreError::Parse(format!("unknown side orientation {other}"))),
                    },
                })
            })
            .transpose()
    }

    fn ladder(&self, id: LadderId) -> Result<Option<Ladder>, StoreError> {
        self.tx
            .query_opt(
                "SELECT l.id, l.side_id, l.ladder_number_id, n.number, l.sort_priority \
                 FROM ladders l JOIN ladder_numbers n ON n.id = l.ladder_number_id WHERE l.id = $1",
                &[&id.get()],
            )?
            .map(|row| {
                Ok(Ladder {
                    id: LadderId(col(&row, "id")?),
                    side_id: SideId(col(&row, "side_id")?),
                    number_id: col(&row, "ladder_number_id")?,
                    number: col(&row, "number")?,
                    sort_priority: col(&row, "sort_priority")?,
                })
            })
            .transpose()
    }

    fn shelf(&self, id: ShelfId) -> Result<Option<Shelf>, StoreError> {
        let sql = format!("{SHELF_SELECT} WHERE s.id = $1");
        self.tx
            .query_opt(&sql, &[&id.get()])?
            .map(|row| shelf_from_row(&row))
            .transpose()
    }

    fn shelf_by_barcode(&self, value: &str) -> Result<Option<Shelf>, StoreError> {
        let sql = format!("{SHELF_SELECT} JOIN barcodes b ON b.id = s.barcode_id WHERE b.value = $1");
        self.tx
            .query_opt(&sql, &[&value])?
            .map(|row| shelf_from_row(&row))
            .transpose()
    }

    fn shelf_type(&self, id: ShelfTypeId) -> Result<Option<ShelfType>, StoreError> {
        self.tx
            .query_opt(
                "SELECT id, size_class_id, max_capacity FROM shelf_types WHERE id = $1",
                &[&id.get()],
            )?
            .map(|row| {
                Ok(ShelfType {
                    id: ShelfTypeId(col(&row, "id")?),
                    size_class_id: SizeClassId(col(&row, "size_class_id")?),
                    max_capacity: col(&row, "max_capacity")?,
                })
            })
            .transpose()
    }

    fn shelf_position(&self, id: ShelfPositionId) -> Result<Option<ShelfPosition>, StoreError> {
        self.tx
            .query_opt(
                "SELECT id, shelf_id, position_number FROM shelf_positions WHERE id = $1",
                &[&id.get()],
            )?
            .map(|row| position_from_row(&row))
            .transpose()
    }

    fn position_on_shelf(&self, shelf: ShelfId, number: i32) -> Result<Option<ShelfPosition>, StoreError> {
        self.tx
            .query_opt(
                "SELECT id, shelf_id, position_number FROM shelf_positions \
                 WHERE shelf_id = $1 AND position_number = $2",
                &[&shelf.get(), &number],
            )?
            .map(|row| position_from_row(&row))
            .transpose()
    }

    fn occupied_count(&self, shelf: ShelfId) -> Result<u32, StoreError> {
        let sql = format!(
            "SELECT COUNT(DISTINCT o.shelf_position_id) FROM ({OCCUPANCY}) o \
             JOIN shelf_positions p ON p.id = o.shelf_position_id WHERE p.shelf_id = $1"
        );
        let row = self.tx.query_one(&sql, &[&shelf.get()])?;
        let count: i64 = row.try_get(0).map_err(|e| StoreError::Parse(e.to_string()))?;
        u32::try_from(count).map_err(|e| StoreError::Parse(format!("occupied count {count}: {e}")))
    }

    fn occupants(&self, position: ShelfPositionId) -> Result<Vec<ContainerRef>, StoreError> {
        let sql = format!("SELECT kind, id FROM ({OCCUPANCY}) o WHERE o.shelf_position_id = $1 ORDER BY kind, id");
        self.tx
            .query_all(&sql, &[&position.get()])?
            .iter()
            .map(|row| {
                Ok(ContainerRef {
                    kind: container_kind(col(row, "kind")?)?,
                    id: ContainerId(col(row, "id")?),
                })
            })
            .collect()
    }

    fn shared_positions(&self) -> Result<Vec<(ShelfPositionId, Vec<ContainerRef>)>, StoreError> {
        let sql = format!(
            "WITH occupancy AS ({OCCUPANCY}) \
             SELECT shelf_position_id, kind, id FROM occupancy WHERE shelf_position_id IN \
             (SELECT shelf_position_id FROM occupancy GROUP BY shelf_position_id HAVING COUNT(*) > 1) \
             ORDER BY shelf_position_id, kind, id"
        );
        let mut shared: Vec<(ShelfPositionId, Vec<ContainerRef>)> = Vec::new();
        for row in self.tx.query_all(&sql, &[])? {
            let position = ShelfPositionId(col(&row, "shelf_position_id")?);
            let occupant = ContainerRef {
                kind: container_kind(col(&row, "kind")?)?,
                id: ContainerId(col(&row, "id")?),
            };
            match shared.last_mut() {
                Some((last, occupants)) if *last == position => occupants.push(occupant),
                _ => shared.push((position, vec![occupant])),
            }
        }
        Ok(shared)
    }

    fn empty_positions(&self, scope: &ScopeFilter) -> Result<Vec<CandidatePosition>, StoreError> {
        let (sql, values) = Self::candidate_query(scope);
        let rows = with_converted_params(&values, |params| self.tx.query_all(&sql, params))?;
        rows.iter().map(candidate_from_row).collect()
    }

    fn lock_positions(&mut self, positions: &[ShelfPositionId]) -> Result<(), StoreError> {
        if positions.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = positions.iter().map(|p| p.get()).collect();
        self.tx.query_all(
            "SELECT id FROM shelf_positions WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            &[&ids],
        )?;
        Ok(())
    }

    fn container(&self, container: ContainerRef) -> Result<Option<Container>, StoreError> {
        let sql = format!("SELECT {CONTAINER_COLUMNS} FROM {} c WHERE c.id = $1", container.kind.table());
        self.tx
            .query_opt(&sql, &[&container.id.get()])?
            .map(|row| container_from_row(container.kind, &row))
            .transpose()
    }

    fn container_by_barcode(&self, kind: ContainerKind, value: &str) -> Result<Option<Container>, StoreError> {
        let sql = format!(
            "SELECT {CONTAINER_COLUMNS} FROM {} c JOIN barcodes b ON b.id = c.barcode_id WHERE b.value = $1",
            kind.table()
        );
        self.tx
            .query_opt(&sql, &[&value])?
            .map(|row| container_from_row(kind, &row))
            .transpose()
    }

    fn save_container(&mut self, container: &Container) -> Result<(), StoreError> {
        self.upsert(container.kind.table(), &container_columns(container))
    }

    fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        self.tx
            .query_opt(
                "SELECT id, tray_id, barcode_id, withdrawn_barcode_id, owner_id, size_class_id, accession_job_id, \
                 verification_job_id, scanned_for_refile_queue, status, withdrawal_dt FROM items WHERE id = $1",
                &[&id.get()],
            )?
            .map(|row| item_from_row(&row))
            .transpose()
    }

    fn item_by_barcode(&self, value: &str) -> Result<Option<Item>, StoreError> {
        self.tx
            .query_opt(
                "SELECT i.id, i.tray_id, i.barcode_id, i.withdrawn_barcode_id, i.owner_id, i.size_class_id, \
                 i.accession_job_id, i.verification_job_id, i.scanned_for_refile_queue, i.status, i.withdrawal_dt \
                 FROM items i JOIN barcodes b ON b.id = i.barcode_id WHERE b.value = $1",
                &[&value],
            )?
            .map(|row| item_from_row(&row))
            .transpose()
    }

    fn tray_items(&self, tray: ContainerId) -> Result<Vec<ItemId>, StoreError> {
        Ok(self
            .ids("SELECT id FROM items WHERE tray_id = $1 ORDER BY id", &[&tray.get()])?
            .into_iter()
            .map(ItemId)
            .collect())
    }

    fn save_item(&mut self, item: &Item) -> Result<(), StoreError> {
        self.upsert("items", &item_columns(item))
    }

    fn barcode(&self, id: BarcodeId) -> Result<Option<Barcode>, StoreError> {
        self.tx
            .query_opt("SELECT id, value, type_id, withdrawn FROM barcodes WHERE id = $1", &[&id.get()])?
            .map(|row| {
                Ok(Barcode {
                    id: BarcodeId(col(&row, "id")?),
                    value: col(&row, "value")?,
                    type_id: BarcodeTypeId(col(&row, "type_id")?),
                    withdrawn: col(&row, "withdrawn")?,
                })
            })
            .transpose()
    }

    fn barcode_type(&self, id: BarcodeTypeId) -> Result<Option<BarcodeType>, StoreError> {
        self.tx
            .query_opt(
                "SELECT id, name, allowed_pattern FROM barcode_types WHERE id = $1",
                &[&id.get()],
            )?
            .map(|row| {
                Ok(BarcodeType {
                    id: BarcodeTypeId(col(&row, "id")?),
                    name: col(&row, "name")?,
                    allowed_pattern: col(&row, "allowed_pattern")?,
                })
            })
            .transpose()
    }

    fn save_barcode(&mut self, barcode: &Barcode) -> Result<(), StoreError> {
        let columns: Bound = vec![
            bind("id", barcode.id.get()),
            bind("value", barcode.value.clone()),
            bind("type_id", barcode.type_id.get()),
            bind("withdrawn", barcode.withdrawn),
        ];
        self.upsert("barcodes", &columns)
    }

    fn job(&self, kind: JobKind, id: JobId) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", kind.table());
        self.tx
            .query_opt(&sql, &[&id.get()])?
            .map(|row| job_from_row(kind, &row))
            .transpose()
    }

    fn insert_job(&mut self, draft: JobDraft) -> Result<Job, StoreError> {
        let mut job = draft.into_job(JobId(0));
        let columns = job_columns(&job)?;
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
            job.kind().table(),
            names.join(", "),
            placeholders(1, names.len()),
        );
        let row = self.tx.query_one(&sql, &refs(&columns))?;
        job.id = JobId(col(&row, "id")?);
        Ok(job)
    }

    fn save_job(&mut self, job: &Job) -> Result<(), StoreError> {
        let columns = job_columns(job)?;
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(i, (name, _))| format!("{name} = ${}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE id = ${}",
            job.kind().table(),
            columns.len() + 1
        );
        let id = job.id.get();
        let mut params = refs(&columns);
        params.push(&id);
        match self.tx.execute(&sql, &params)? {
            0 => Err(StoreError::Query(format!("{} {} does not exist", job.kind(), job.id))),
            _ => Ok(()),
        }
    }

    fn verification_job_for_accession(&self, accession_job_id: JobId) -> Result<Option<Job>, StoreError> {
        self.tx
            .query_opt(
                "SELECT * FROM verification_jobs WHERE accession_job_id = $1 ORDER BY id LIMIT 1",
                &[&accession_job_id.get()],
            )?
            .map(|row| job_from_row(JobKind::Verification, &row))
            .transpose()
    }

    fn job_members(&self, kind: JobKind, id: JobId) -> Result<JobMembers, StoreError> {
        match kind {
            JobKind::Accession => Ok(JobMembers {
                containers: self.containers_where("accession_job_id", id)?,
                items: self.items_where("accession_job_id", id)?,
            }),
            JobKind::Verification => Ok(JobMembers {
                containers: self.containers_where("verification_job_id", id)?,
                items: self.items_where("verification_job_id", id)?,
            }),
            JobKind::Shelving => Ok(JobMembers {
                containers: self.containers_where("shelving_job_id", id)?,
                items: Vec::new(),
            }),
            JobKind::Refile | JobKind::Withdraw | JobKind::PickList => self.association_members(kind, id),
        }
    }

    fn add_job_member(&mut self, kind: JobKind, id: JobId, member: JobMember) -> Result<(), StoreError> {
        let (table, member_id) = match member {
            JobMember::Container(c) if c.kind == ContainerKind::Tray => (MemberTable::Trays, c.id.get()),
            JobMember::Container(c) => (MemberTable::NonTrays, c.id.get()),
            JobMember::Item(i) => (MemberTable::Items, i.get()),
        };
        let name = member_table(kind, table)
            .ok_or_else(|| StoreError::Query(format!("{kind} members are not association rows")))?;
        let sql = format!("INSERT INTO {name} (job_id, member_id) VALUES ($1, $2) ON CONFLICT DO NOTHING");
        self.tx.execute(&sql, &[&id.get(), &member_id])?;
        Ok(())
    }

    fn jobs_with_member(&self, kind: JobKind, member: JobMember) -> Result<Vec<JobId>, StoreError> {
        let (table, member_id) = match member {
            JobMember::Container(c) if c.kind == ContainerKind::Tray => (MemberTable::Trays, c.id.get()),
            JobMember::Container(c) => (MemberTable::NonTrays, c.id.get()),
            JobMember::Item(i) => (MemberTable::Items, i.get()),
        };
        let Some(name) = member_table(kind, table) else {
            return Ok(Vec::new());
        };
        let sql = format!("SELECT job_id FROM {name} WHERE member_id = $1 ORDER BY job_id");
        Ok(self.ids(&sql, &[&member_id])?.into_iter().map(JobId).collect())
    }

    fn refile_queue(&self) -> Result<JobMembers, StoreError> {
        let containers = self
            .ids("SELECT id FROM non_tray_items WHERE scanned_for_refile_queue ORDER BY id", &[])?
            .into_iter()
            .map(ContainerRef::non_tray)
            .collect();
        let items = self
            .ids("SELECT id FROM items WHERE scanned_for_refile_queue ORDER BY id", &[])?
            .into_iter()
            .map(ItemId)
            .collect();
        Ok(JobMembers { containers, items })
    }

    fn record_discrepancy(&mut self, discrepancy: NewDiscrepancy) -> Result<ShelvingDiscrepancy, StoreError> {
        let (tray_id, non_tray_id) = match discrepancy.container.kind {
            ContainerKind::Tray => (Some(discrepancy.container.id.get()), None),
            ContainerKind::NonTray => (None, Some(discrepancy.container.id.get())),
        };
        let row = self.tx.query_one(
            "INSERT INTO shelving_discrepancies (shelving_job_id, tray_id, non_tray_item_id, discrepancy_type, \
             user_id, owner_id, size_class_id, assigned_location, pre_assigned_location, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id, create_dt",
            &[
                &discrepancy.shelving_job_id.get(),
                &tray_id,
                &non_tray_id,
                &discrepancy.kind.as_str(),
                &raw(discrepancy.user_id),
                &raw(discrepancy.owner_id),
                &raw(discrepancy.size_class_id),
                &discrepancy.assigned_location,
                &discrepancy.pre_assigned_location,
                &discrepancy.error,
            ],
        )?;
        let id = DiscrepancyId(col(&row, "id")?);
        let create_dt: DateTime<Utc> = col(&row, "create_dt")?;
        Ok(ShelvingDiscrepancy::from_new(id, discrepancy, create_dt))
    }

    fn discrepancies(&self, shelving_job_id: JobId) -> Result<Vec<ShelvingDiscrepancy>, StoreError> {
        let rows = self.tx.query_all(
            "SELECT id, shelving_job_id, tray_id, non_tray_item_id, discrepancy_type, user_id, owner_id, \
             size_class_id, assigned_location, pre_assigned_location, error, create_dt \
             FROM shelving_discrepancies WHERE shelving_job_id = $1 ORDER BY id",
            &[&shelving_job_id.get()],
        )?;
        rows.iter()
            .map(|row| {
                let tray: Option<i64> = col(row, "tray_id")?;
                let non_tray: Option<i64> = col(row, "non_tray_item_id")?;
                let container = match (tray, non_tray) {
                    (Some(id), _) => ContainerRef::tray(id),
                    (None, Some(id)) => ContainerRef::non_tray(id),
                    (None, None) => return Err(StoreError::Parse("discrepancy without a container".to_string())),
                };
                let kind_text: String = col(row, "discrepancy_type")?;
                Ok(ShelvingDiscrepancy {
                    id: DiscrepancyId(col(row, "id")?),
                    shelving_job_id: JobId(col(row, "shelving_job_id")?),
                    container,
                    kind: DiscrepancyKind::parse(&kind_text)
                        .ok_or_else(|| StoreError::Parse(format!("unknown discrepancy type {kind_text}")))?,
                    user_id: col::<Option<i64>>(row, "user_id")?.map(UserId),
                    owner_id: col::<Option<i64>>(row, "owner_id")?.map(OwnerId),
                    size_class_id: col::<Option<i64>>(row, "size_class_id")?.map(SizeClassId),
                    assigned_location: col(row, "assigned_location")?,
                    pre_assigned_location: col(row, "pre_assigned_location")?,
                    error: col(row, "error")?,
                    create_dt: col(row, "create_dt")?,
                })
            })
            .collect()
    }
}
