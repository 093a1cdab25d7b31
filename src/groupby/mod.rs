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

//! GroupBy operations
//!
//! Split-apply-combine over Cylon tables:
//! - `partition` assigns every row a dense group id
//! - `GroupedTable` is the grouped view with lazily built row index and keys
//! - `apply` runs user functions or fast-path reductions per group and
//!   combines the results
//! - `hash_groupby` / `aggregate_table` compose the two

pub mod apply;
pub mod group_keys;
pub mod grouped_table;
pub mod hash_groupby;
pub mod partition;

use crate::arrow::arrow_comparator::NullOrder;
use crate::ctx::{CylonContext, CONFIG_GROUPBY_NULLS_FIRST, CONFIG_GROUPBY_SKIPMISSING, CONFIG_GROUPBY_SORT};

pub use apply::{combine, map_groups, transform, GroupResult, Transform};
pub use group_keys::{GroupKey, GroupKeys, KeyLookup};
pub use grouped_table::{partition, GroupIndex, GroupSelector, GroupSlice, GroupedTable, Selection};
pub use hash_groupby::{aggregate_table, hash_groupby, hash_groupby_single};
pub use partition::{row_group_slots, RowGroupSlots};

/// Options controlling how rows are grouped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupByOptions {
    /// Number groups in key order instead of first-encounter order
    pub sort: bool,
    /// Exclude rows whose key contains a null
    pub skip_missing: bool,
    /// Where null keys sort when `sort` is set
    pub null_order: NullOrder,
}

impl GroupByOptions {
    pub fn new(sort: bool, skip_missing: bool) -> Self {
        Self {
            sort,
            skip_missing,
            null_order: NullOrder::default(),
        }
    }

    pub fn with_null_order(mut self, null_order: NullOrder) -> Self {
        self.null_order = null_order;
        self
    }

    /// Read grouping defaults from the context configuration
    pub fn from_context(ctx: &CylonContext) -> Self {
        let null_order = if ctx.get_bool_config(CONFIG_GROUPBY_NULLS_FIRST, false) {
            NullOrder::NullsFirst
        } else {
            NullOrder::NullsLast
        };
        Self {
            sort: ctx.get_bool_config(CONFIG_GROUPBY_SORT, false),
            skip_missing: ctx.get_bool_config(CONFIG_GROUPBY_SKIPMISSING, false),
            null_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_context() {
        let ctx = CylonContext::new();
        assert_eq!(GroupByOptions::from_context(&ctx), GroupByOptions::default());

        ctx.add_config(CONFIG_GROUPBY_SORT, "true");
        ctx.add_config(CONFIG_GROUPBY_NULLS_FIRST, "1");
        let options = GroupByOptions::from_context(&ctx);
        assert!(options.sort);
        assert!(!options.skip_missing);
        assert_eq!(options.null_order, NullOrder::NullsFirst);
    }
}
