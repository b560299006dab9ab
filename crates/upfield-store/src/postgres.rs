//! Postgres-backed relational store
//!
//! Builds parameterized SQL from the core query vocabulary; column and
//! table names are validated before interpolation, values always travel
//! through binds. An explicit transaction holds a dedicated connection so
//! statements issued between `begin` and `commit` share it.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as SqlxRow, TypeInfo};
use tokio::sync::Mutex;

use upfield_core::{Order, Predicate, RelationalStore, Row, Select, StoreError, StoreResult, Value};

pub struct PgStore {
    pool: PgPool,
    tx: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore {
            pool,
            tx: Mutex::new(None),
        }
    }

    async fn execute(&self, sql: &str, binds: Vec<Value>) -> StoreResult<u64> {
        let mut guard = self.tx.lock().await;
        let result = if let Some(conn) = guard.as_mut() {
            bind_values(sqlx::query(sql), &binds)
                .execute(&mut **conn)
                .await
        } else {
            bind_values(sqlx::query(sql), &binds)
                .execute(&self.pool)
                .await
        };
        result.map(|r| r.rows_affected()).map_err(StoreError::backend)
    }

    async fn fetch_all(&self, sql: &str, binds: Vec<Value>) -> StoreResult<Vec<PgRow>> {
        let mut guard = self.tx.lock().await;
        let result = if let Some(conn) = guard.as_mut() {
            bind_values(sqlx::query(sql), &binds)
                .fetch_all(&mut **conn)
                .await
        } else {
            bind_values(sqlx::query(sql), &binds)
                .fetch_all(&self.pool)
                .await
        };
        result.map_err(StoreError::backend)
    }
}

fn ident(name: &str) -> StoreResult<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    binds: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in binds {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
        };
    }
    query
}

/// Render predicates to a WHERE fragment, pushing bind values. Returns an
/// empty string when there is nothing to filter on.
fn render_where(predicates: &[Predicate], binds: &mut Vec<Value>) -> StoreResult<String> {
    if predicates.is_empty() {
        return Ok(String::new());
    }

    let mut clauses = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        match predicate {
            Predicate::Eq { column, value } => {
                let column = ident(column)?;
                if value.is_null() {
                    clauses.push(format!("\"{column}\" IS NULL"));
                } else {
                    binds.push(value.clone());
                    clauses.push(format!("\"{column}\" = ${}", binds.len()));
                }
            }
            Predicate::In { column, values } => {
                let column = ident(column)?;
                if values.is_empty() {
                    clauses.push("FALSE".to_string());
                    continue;
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    binds.push(value.clone());
                    placeholders.push(format!("${}", binds.len()));
                }
                clauses.push(format!("\"{column}\" IN ({})", placeholders.join(", ")));
            }
            Predicate::NotInColumn {
                column,
                ref_table,
                ref_column,
            } => {
                let column = ident(column)?;
                let ref_table = ident(ref_table)?;
                let ref_column = ident(ref_column)?;
                clauses.push(format!(
                    "\"{column}\" NOT IN (SELECT \"{ref_column}\" FROM \"{ref_table}\" \
                     WHERE \"{ref_column}\" IS NOT NULL)"
                ));
            }
        }
    }

    Ok(format!(" WHERE {}", clauses.join(" AND ")))
}

fn decode_row(row: &PgRow) -> Row {
    let mut out = Row::new();
    for column in row.columns() {
        let ordinal = column.ordinal();
        let value = match column.type_info().name() {
            "INT2" => row
                .try_get::<Option<i16>, _>(ordinal)
                .ok()
                .flatten()
                .map(|v| Value::Int(v as i64)),
            "INT4" => row
                .try_get::<Option<i32>, _>(ordinal)
                .ok()
                .flatten()
                .map(|v| Value::Int(v as i64)),
            "INT8" => row
                .try_get::<Option<i64>, _>(ordinal)
                .ok()
                .flatten()
                .map(Value::Int),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(ordinal)
                .ok()
                .flatten()
                .map(|v| Value::Float(v as f64)),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(ordinal)
                .ok()
                .flatten()
                .map(Value::Float),
            "BOOL" => row
                .try_get::<Option<bool>, _>(ordinal)
                .ok()
                .flatten()
                .map(Value::Bool),
            "BYTEA" => row
                .try_get::<Option<Vec<u8>>, _>(ordinal)
                .ok()
                .flatten()
                .map(Value::Bytes),
            _ => row
                .try_get::<Option<String>, _>(ordinal)
                .ok()
                .flatten()
                .map(Value::Text),
        };
        out.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    out
}

#[async_trait]
impl RelationalStore for PgStore {
    #[tracing::instrument(skip(self, query), fields(db.table = %query.table))]
    async fn select(&self, query: &Select) -> StoreResult<Vec<Row>> {
        let table = ident(&query.table)?;

        let projection = if query.columns.is_empty() {
            "*".to_string()
        } else {
            let columns: StoreResult<Vec<String>> = query
                .columns
                .iter()
                .map(|c| ident(c).map(|c| format!("\"{c}\"")))
                .collect();
            columns?.join(", ")
        };

        let mut binds = Vec::new();
        let mut sql = format!("SELECT {projection} FROM \"{table}\"");
        sql.push_str(&render_where(&query.predicates, &mut binds)?);

        if let Some((column, order)) = &query.order_by {
            let column = ident(column)?;
            let direction = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY \"{column}\" {direction}"));
        }

        let rows = self.fetch_all(&sql, binds).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    #[tracing::instrument(skip(self, values), fields(db.table = %table, columns = values.len()))]
    async fn insert(
        &self,
        table: &str,
        values: &[(String, Value)],
        primary_key: Option<&str>,
    ) -> StoreResult<i64> {
        let table = ident(table)?;

        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        let mut binds = Vec::with_capacity(values.len());
        for (index, (column, value)) in values.iter().enumerate() {
            columns.push(format!("\"{}\"", ident(column)?));
            placeholders.push(format!("${}", index + 1));
            binds.push(value.clone());
        }

        let mut sql = format!(
            "INSERT INTO \"{table}\" ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        match primary_key {
            Some(pk) => {
                let pk = ident(pk)?;
                sql.push_str(&format!(" RETURNING \"{pk}\""));
                let rows = self.fetch_all(&sql, binds).await?;
                // Non-integer keys decode to 0; callers supplying their own
                // key ignore the returned id.
                let id = rows
                    .first()
                    .and_then(|row| row.try_get::<i64, _>(0).ok())
                    .unwrap_or(0);
                Ok(id)
            }
            None => {
                self.execute(&sql, binds).await?;
                Ok(0)
            }
        }
    }

    #[tracing::instrument(skip(self, values, filter), fields(db.table = %table))]
    async fn update(
        &self,
        table: &str,
        values: &[(String, Value)],
        filter: &[Predicate],
    ) -> StoreResult<u64> {
        let table = ident(table)?;

        let mut binds = Vec::with_capacity(values.len());
        let mut assignments = Vec::with_capacity(values.len());
        for (column, value) in values {
            binds.push(value.clone());
            assignments.push(format!("\"{}\" = ${}", ident(column)?, binds.len()));
        }

        let mut sql = format!("UPDATE \"{table}\" SET {}", assignments.join(", "));
        sql.push_str(&render_where(filter, &mut binds)?);

        self.execute(&sql, binds).await
    }

    #[tracing::instrument(skip(self, filter), fields(db.table = %table))]
    async fn delete(&self, table: &str, filter: &[Predicate]) -> StoreResult<u64> {
        let table = ident(table)?;
        let mut binds = Vec::new();
        let mut sql = format!("DELETE FROM \"{table}\"");
        sql.push_str(&render_where(filter, &mut binds)?);
        self.execute(&sql, binds).await
    }

    async fn begin(&self) -> StoreResult<()> {
        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        let mut conn = self.pool.acquire().await.map_err(StoreError::backend)?;
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(StoreError::backend)?;
        *guard = Some(conn);
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        let mut guard = self.tx.lock().await;
        let mut conn = guard.take().ok_or(StoreError::NoTransaction)?;
        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        let mut guard = self.tx.lock().await;
        let mut conn = guard.take().ok_or(StoreError::NoTransaction)?;
        sqlx::query("ROLLBACK")
            .execute(&mut *conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
