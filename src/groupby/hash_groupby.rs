// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Hash-based GroupBy entry points
//!
//! Partition and combine in one call.

use std::sync::Arc;

use super::apply::{combine, Transform};
use super::grouped_table::GroupedTable;
use super::GroupByOptions;
use crate::compute::{AggregationOpId, Reduction};
use crate::error::{Code, CylonError, CylonResult};
use crate::table::Table;

/// Group `table` by the named key columns and combine `transforms`
///
/// Grouping options come from the table's context. The key columns lead the
/// output.
pub fn aggregate_table(table: Arc<Table>, key_names: &[&str], transforms: &[Transform]) -> CylonResult<Table> {
    let options = GroupByOptions::from_context(&table.get_context());
    let grouped = GroupedTable::by_names(table, key_names, options)?;
    combine(&grouped, transforms, true)
}

/// Hash-based GroupBy operation
///
/// Groups rows by key columns and performs aggregations on value columns.
/// Nulls in the value columns are skipped, so an all-null group sums to
/// zero.
///
/// # Arguments
/// * `table` - Input table to group
/// * `idx_cols` - Column indices to group by
/// * `aggregate_cols` - Column indices to aggregate
/// * `aggregate_ops` - Aggregation operations (one per aggregate column)
///
/// # Returns
/// A new table with key columns followed by one `<column>_<op>` column per
/// aggregation
///
/// # Example
/// ```ignore
/// use cylon_groupby::groupby::hash_groupby;
/// use cylon_groupby::compute::AggregationOpId;
///
/// // Group by column 0, compute sum of column 1 and mean of column 2
/// let result = hash_groupby(&table, &[0], &[1, 2], &[AggregationOpId::Sum, AggregationOpId::Mean])?;
/// ```
pub fn hash_groupby(
    table: &Table,
    idx_cols: &[usize],
    aggregate_cols: &[usize],
    aggregate_ops: &[AggregationOpId],
) -> CylonResult<Table> {
    if aggregate_cols.len() != aggregate_ops.len() {
        return Err(CylonError::new(
            Code::Invalid,
            format!(
                "aggregate_cols size {} != aggregate_ops size {}",
                aggregate_cols.len(),
                aggregate_ops.len()
            ),
        ));
    }

    let mut transforms = Vec::with_capacity(aggregate_cols.len());
    for (&col, &op) in aggregate_cols.iter().zip(aggregate_ops) {
        let name = table.column_name(col)?;
        let reduction = Reduction::skip_missing(op);
        transforms.push(Transform::reduce(&name, reduction).named(&Reduction::new(op).output_name(&name)));
    }

    let options = GroupByOptions::from_context(&table.get_context());
    let grouped = GroupedTable::new(Arc::new(table.clone()), idx_cols, options)?;
    combine(&grouped, &transforms, true)
}

/// Hash-based GroupBy operation with single index column
pub fn hash_groupby_single(
    table: &Table,
    idx_col: usize,
    aggregate_cols: &[usize],
    aggregate_ops: &[AggregationOpId],
) -> CylonResult<Table> {
    hash_groupby(table, &[idx_col], aggregate_cols, aggregate_ops)
}
