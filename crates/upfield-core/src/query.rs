//! Query vocabulary consumed by `RelationalStore` implementations.
//!
//! The engine describes what it wants as data; how that becomes SQL (or an
//! in-memory scan) is entirely the store's business.

use crate::value::Value;

/// A single filter condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = value`; a null value means `column IS NULL`.
    Eq { column: String, value: Value },
    /// `column IN (values)`; an empty list matches nothing.
    In { column: String, values: Vec<Value> },
    /// `column NOT IN (SELECT ref_column FROM ref_table WHERE ref_column IS NOT NULL)`.
    /// Used by orphan detection: rows whose key no longer appears among the
    /// live, non-null values of the reference column.
    NotInColumn {
        column: String,
        ref_table: String,
        ref_column: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A select statement description.
#[derive(Debug, Clone)]
pub struct Select {
    pub table: String,
    /// Empty means all columns.
    pub columns: Vec<String>,
    pub predicates: Vec<Predicate>,
    pub order_by: Option<(String, Order)>,
}

impl Select {
    pub fn new(table: impl Into<String>) -> Self {
        Select {
            table: table.into(),
            columns: Vec::new(),
            predicates: Vec::new(),
            order_by: None,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_builder_accumulates_filters_in_order() {
        let q = Select::new("uploads")
            .filter(Predicate::Eq {
                column: "kind".into(),
                value: Value::Text("image".into()),
            })
            .filter(Predicate::In {
                column: "id".into(),
                values: vec![Value::Int(1), Value::Int(2)],
            })
            .order("id", Order::Desc);

        assert_eq!(q.table, "uploads");
        assert_eq!(q.predicates.len(), 2);
        assert!(matches!(q.predicates[0], Predicate::Eq { .. }));
        assert_eq!(q.order_by, Some(("id".to_string(), Order::Desc)));
    }
}
