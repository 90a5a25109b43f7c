//! Helper utilities for testing and development.

use std::sync::Arc;

use crate::results::ResultSet;
use crate::types::RowValues;

/// Build a result set from column names and row values.
#[must_use]
pub fn create_result_set(column_names: &[&str], rows: Vec<Vec<RowValues>>) -> ResultSet {
    let mut result_set = ResultSet::with_capacity(rows.len());
    result_set.set_column_names(Arc::new(
        column_names.iter().map(|name| (*name).to_string()).collect(),
    ));
    for row in rows {
        result_set.add_row_values(row);
    }
    result_set
}
