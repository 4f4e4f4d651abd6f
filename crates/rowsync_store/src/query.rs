//! Declarative, tenant-scoped row queries.
//!
//! Access rules are compiled into a [`RowQuery`] before they reach the
//! store, so backends only need to evaluate a handful of filter shapes:
//! equality, membership, authorization-join (`Linked`) and boolean
//! combinators. A SQL backend would translate these into `WHERE` clauses
//! and `IN (SELECT ...)` subqueries.

use serde_json::Value;

/// A filter over the rows of one table.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    /// Matches every row.
    All,
    /// Matches no row.
    Nothing,
    /// `row.field == value`.
    Eq {
        /// Field name.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// `row.field IN values`.
    In {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// `row.field IN (SELECT via_field FROM via_table WHERE via_filter)`.
    ///
    /// Models many-to-many authorization-join tables such as
    /// manager to billing account assignments. Soft-deleted join rows are
    /// ignored.
    Linked {
        /// Field on the queried row.
        field: String,
        /// The join table.
        via_table: String,
        /// Field on the join row whose value must equal `row.field`.
        via_field: String,
        /// Filter selecting the relevant join rows.
        via_filter: Box<RowFilter>,
    },
    /// Every sub-filter matches.
    And(Vec<RowFilter>),
    /// At least one sub-filter matches.
    Or(Vec<RowFilter>),
}

impl RowFilter {
    /// Shorthand for [`RowFilter::Eq`].
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        RowFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Combines two filters, folding away trivial operands.
    pub fn and(self, other: RowFilter) -> Self {
        match (self, other) {
            (RowFilter::Nothing, _) | (_, RowFilter::Nothing) => RowFilter::Nothing,
            (RowFilter::All, f) | (f, RowFilter::All) => f,
            (RowFilter::And(mut left), RowFilter::And(right)) => {
                left.extend(right);
                RowFilter::And(left)
            }
            (RowFilter::And(mut left), f) => {
                left.push(f);
                RowFilter::And(left)
            }
            (left, right) => RowFilter::And(vec![left, right]),
        }
    }

    /// Returns true if the filter can never match.
    pub fn is_nothing(&self) -> bool {
        match self {
            RowFilter::Nothing => true,
            RowFilter::In { values, .. } => values.is_empty(),
            RowFilter::And(filters) => filters.iter().any(RowFilter::is_nothing),
            RowFilter::Or(filters) => filters.iter().all(RowFilter::is_nothing),
            _ => false,
        }
    }
}

/// A tenant-scoped query over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    /// Row filter.
    pub filter: RowFilter,
    /// Whether soft-deleted rows are returned.
    pub include_deleted: bool,
}

impl RowQuery {
    /// A query over live rows matching `filter`.
    pub fn live(filter: RowFilter) -> Self {
        Self {
            filter,
            include_deleted: false,
        }
    }

    /// A query over every row, soft-deleted ones included.
    pub fn everything() -> Self {
        Self {
            filter: RowFilter::All,
            include_deleted: true,
        }
    }

    /// A query that returns nothing.
    pub fn nothing() -> Self {
        Self::live(RowFilter::Nothing)
    }

    /// Restricts the query to a single row id.
    pub fn by_id(mut self, id: &str) -> Self {
        self.filter = self.filter.and(RowFilter::eq("id", id));
        self
    }
}
