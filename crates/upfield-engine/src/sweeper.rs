//! Orphan sweeper
//!
//! Finds rows in the upload table whose primary key no longer appears among
//! the live, non-null values of the reference column in the owning table,
//! and offers them to the configured policy. Only a literal `true` from the
//! policy authorizes deletion; the policy removes the underlying files
//! before approving, so an ambiguous answer must default to keeping rows.
//!
//! Callers run the sweep for a field before linking a new upload to it, so
//! a row cannot be deleted at the instant it becomes newly referenced.

use std::sync::Arc;

use upfield_core::{
    Predicate, RelationalStore, Select, UploadError, UploadResult, UploadSpec, Value,
};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Rows found without a live reference.
    pub orphaned: usize,
    /// Rows actually deleted (0 unless the policy approved).
    pub deleted: u64,
}

pub struct OrphanSweeper {
    spec: Arc<UploadSpec>,
    store: Arc<dyn RelationalStore>,
}

impl OrphanSweeper {
    pub fn new(spec: Arc<UploadSpec>, store: Arc<dyn RelationalStore>) -> Self {
        OrphanSweeper { spec, store }
    }

    /// Sweep the upload table for rows orphaned by the owning field.
    ///
    /// `owning_table` and `owning_field` describe the field this upload spec
    /// belongs to; the reference column defaults to their qualified name
    /// unless the spec overrides it.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, owning_table: &str, owning_field: &str) -> UploadResult<SweepReport> {
        let (Some(table), Some(pk)) = (self.spec.table(), self.spec.primary_key()) else {
            return Err(UploadError::Configuration(
                "an orphan sweep requires a database table".to_string(),
            ));
        };

        let (ref_table, ref_column) =
            resolve_reference(owning_table, owning_field, self.spec.ref_column_override());

        let mut query = Select::new(table).filter(Predicate::NotInColumn {
            column: pk.to_string(),
            ref_table,
            ref_column,
        });
        for contributor in self.spec.where_clauses() {
            contributor(&mut query);
        }

        let rows = self.store.select(&query).await?;
        if rows.is_empty() {
            return Ok(SweepReport::default());
        }

        let orphaned = rows.len();
        let Some(policy) = self.spec.orphan_policy_fn() else {
            tracing::debug!(orphaned, "no orphan policy configured, keeping rows");
            return Ok(SweepReport {
                orphaned,
                deleted: 0,
            });
        };

        if !policy(&rows).await {
            tracing::debug!(orphaned, "orphan policy declined deletion");
            return Ok(SweepReport {
                orphaned,
                deleted: 0,
            });
        }

        let ids: Vec<Value> = rows
            .iter()
            .filter_map(|row| row.get(pk).cloned())
            .collect();
        let deleted = self
            .store
            .delete(
                table,
                &[Predicate::In {
                    column: pk.to_string(),
                    values: ids,
                }],
            )
            .await?;

        tracing::info!(table, orphaned, deleted, "deleted orphaned upload rows");
        Ok(SweepReport { orphaned, deleted })
    }
}

/// Resolve the reference column. A bare name is qualified with the owning
/// table; a two-part name is used as-is; longer names keep the last two
/// segments.
fn resolve_reference(
    owning_table: &str,
    owning_field: &str,
    overridden: Option<&str>,
) -> (String, String) {
    let candidate = overridden.unwrap_or(owning_field);
    let segments: Vec<&str> = candidate.split('.').collect();
    match segments.as_slice() {
        [column] => (owning_table.to_string(), column.to_string()),
        [table, column] => (table.to_string(), column.to_string()),
        [.., table, column] => (table.to_string(), column.to_string()),
        [] => (owning_table.to_string(), candidate.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_is_qualified_with_the_owning_table() {
        assert_eq!(
            resolve_reference("albums", "cover_id", None),
            ("albums".to_string(), "cover_id".to_string())
        );
    }

    #[test]
    fn two_part_name_is_used_as_is() {
        assert_eq!(
            resolve_reference("albums", "gallery.cover_id", None),
            ("gallery".to_string(), "cover_id".to_string())
        );
    }

    #[test]
    fn longer_names_keep_the_last_two_segments() {
        assert_eq!(
            resolve_reference("albums", "main.gallery.cover_id", None),
            ("gallery".to_string(), "cover_id".to_string())
        );
    }

    #[test]
    fn override_takes_precedence_and_is_parsed_the_same_way() {
        assert_eq!(
            resolve_reference("albums", "cover_id", Some("legacy.ref_id")),
            ("legacy".to_string(), "ref_id".to_string())
        );
        assert_eq!(
            resolve_reference("albums", "cover_id", Some("ref_id")),
            ("albums".to_string(), "ref_id".to_string())
        );
    }
}
