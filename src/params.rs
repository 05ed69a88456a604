//! Bind values for statements built with `sea-query`
//!
//! `sea-query` hands back its parameters as [`sea_query::Values`]; the
//! executor wants `&dyn ToSql`. Each value is boxed with its PostgreSQL type,
//! NULLs included, so a `NULL` compared against an `INTEGER` column still
//! binds as `INTEGER`.

use crate::executor::StoreError;
use may_postgres::types::ToSql;
use sea_query::Value;

/// Box one `sea-query` value as a `may_postgres` parameter
///
/// # Errors
///
/// `StoreError::Query` for value types the inventory schema never binds.
pub fn to_param(value: &Value) -> Result<Box<dyn ToSql>, StoreError> {
    let param: Box<dyn ToSql> = match value {
        Value::Bool(v) => Box::new(*v),
        // SMALLINT parameters are only ever compared against INTEGER columns
        Value::SmallInt(v) => Box::new(v.map(i32::from)),
        Value::Int(v) => Box::new(*v),
        Value::BigInt(v) => Box::new(*v),
        Value::String(v) => Box::new(v.as_ref().map(|s| s.to_string())),
        other => {
            return Err(StoreError::Query(format!("Unsupported value type in query: {other:?}")));
        }
    };
    Ok(param)
}

/// Convert `values` and run `f` with them, in statement order
///
/// # Errors
///
/// As [`to_param`], or whatever `f` returns.
pub fn with_converted_params<F, R>(values: &sea_query::Values, f: F) -> Result<R, StoreError>
where
    F: FnOnce(&[&dyn ToSql]) -> Result<R, StoreError>,
{
    let boxed = values.iter().map(to_param).collect::<Result<Vec<_>, _>>()?;
    let params: Vec<&dyn ToSql> = boxed.iter().map(|p| &**p).collect();
    f(&params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::{Expr, ExprTrait, PostgresQueryBuilder, Query};

    #[test]
    fn test_params_keep_statement_order() {
        let (sql, values) = Query::select()
            .column("id")
            .from("shelf_positions")
            .and_where(Expr::col("shelf_id").eq(7i64))
            .and_where(Expr::col("position_number").gt(2i32))
            .build(PostgresQueryBuilder);

        assert!(sql.contains("$1"));
        assert!(sql.contains("$2"));
        let count = with_converted_params(&values, |params| Ok(params.len())).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_nulls_are_converted() {
        let values = sea_query::Values(vec![Value::BigInt(None), Value::String(None), Value::Bool(Some(true))]);
        let count = with_converted_params(&values, |params| Ok(params.len())).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_unsupported_value_is_rejected() {
        let values = sea_query::Values(vec![Value::Float(Some(1.5))]);
        let err = with_converted_params(&values, |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("Unsupported value type"));
    }
}
