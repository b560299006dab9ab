//! Read path for the upload table.
//!
//! Listing honors the spec's where-clause contributors and applies the
//! configured row formatter to each row in place before returning.

use upfield_core::{Order, RelationalStore, Row, Select, UploadError, UploadResult, UploadSpec};

pub async fn list_rows(
    spec: &UploadSpec,
    store: &dyn RelationalStore,
    order_by: Option<(String, Order)>,
) -> UploadResult<Vec<Row>> {
    let table = spec.table().ok_or_else(|| {
        UploadError::Configuration("listing requires a database table".to_string())
    })?;

    let mut query = Select::new(table);
    if let Some((column, order)) = order_by {
        query = query.order(column, order);
    }
    for contributor in spec.where_clauses() {
        contributor(&mut query);
    }

    let mut rows = store.select(&query).await?;
    if let Some(formatter) = spec.row_formatter_fn() {
        for row in &mut rows {
            formatter(row);
        }
    }

    tracing::debug!(table, rows = rows.len(), "listed upload rows");
    Ok(rows)
}
