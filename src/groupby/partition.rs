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

//! Group partitioner
//!
//! Assigns every row of a table a dense group id over a set of key columns.
//! Two strategies:
//! - hash: an open addressing table of group ids keyed by row hash, with
//!   every hash match confirmed by comparing the key columns. Groups are
//!   numbered in first-encounter order.
//! - radix: when every key column is dictionary encoded and the product of
//!   the per-column cardinalities is small, the group id is computed directly
//!   from the dictionary ranks. Ids come out in key order.
//!
//! Membership uses `0` for excluded rows and `g + 1` for group `g`.

use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use hashbrown::HashTable;

use super::GroupByOptions;
use crate::arrow::arrow_comparator::{DictionaryRanks, NullOrder, TableRowIndexEqualTo};
use crate::arrow::arrow_hash_kernels::TableRowIndexHash;
use crate::cylon_debug;
use crate::data_types::is_supported;
use crate::error::{Code, CylonError, CylonResult};

/// Radix path is taken when the slot count stays under this or the row count
const RADIX_MIN_SLOTS: usize = 1 << 16;

/// Output of the partitioner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroupSlots {
    pub ngroups: usize,
    pub membership: Vec<u32>,
    /// Group ids follow key order
    pub sorted: bool,
}

/// Partition the rows of `batch` by `key_cols`
pub fn row_group_slots(
    batch: &RecordBatch,
    key_cols: &[usize],
    options: &GroupByOptions,
) -> CylonResult<RowGroupSlots> {
    let num_rows = batch.num_rows();
    if num_rows >= u32::MAX as usize {
        return Err(CylonError::new(
            Code::Invalid,
            format!("Cannot group {} rows; at most {} are supported", num_rows, u32::MAX - 1),
        ));
    }
    for &col in key_cols {
        if col >= batch.num_columns() {
            return Err(CylonError::new(
                Code::IndexError,
                format!("Key column index {} out of range (table has {} columns)", col, batch.num_columns()),
            ));
        }
        let data_type = batch.column(col).data_type();
        if !is_supported(data_type) {
            return Err(CylonError::new(
                Code::TypeError,
                format!("Cannot group by column {} of type {:?}", col, data_type),
            ));
        }
    }

    if key_cols.is_empty() {
        let ngroups = usize::from(num_rows > 0);
        return Ok(RowGroupSlots {
            ngroups,
            membership: vec![1; num_rows],
            sorted: true,
        });
    }

    let slots = match radix_group_slots(batch, key_cols, options)? {
        Some(slots) => {
            cylon_debug!("Grouped {} rows into {} groups using dictionary ranks", num_rows, slots.ngroups);
            slots
        }
        None => {
            let slots = hash_group_slots(batch, key_cols, options)?;
            cylon_debug!("Grouped {} rows into {} groups by hashing", num_rows, slots.ngroups);
            slots
        }
    };

    if options.sort && !slots.sorted {
        sort_group_slots(batch, key_cols, options.null_order, slots)
    } else {
        Ok(slots)
    }
}

fn hash_group_slots(
    batch: &RecordBatch,
    key_cols: &[usize],
    options: &GroupByOptions,
) -> CylonResult<RowGroupSlots> {
    let num_rows = batch.num_rows();
    let hasher = TableRowIndexHash::new_with_columns(batch, key_cols)?;
    let equal_to = TableRowIndexEqualTo::new(batch, key_cols, options.null_order)?;

    let mut table: HashTable<u32> = HashTable::new();
    let mut first_rows: Vec<usize> = Vec::new();
    let mut group_hashes: Vec<u64> = Vec::new();
    let mut membership = vec![0u32; num_rows];

    for row in 0..num_rows {
        if options.skip_missing && equal_to.has_null(row) {
            continue;
        }
        let hash = hasher.hash(row);
        let found = table
            .find(hash, |&g| {
                group_hashes[g as usize] == hash && equal_to.equal(first_rows[g as usize], row)
            })
            .copied();
        let group = match found {
            Some(group) => group,
            None => {
                let group = first_rows.len() as u32;
                first_rows.push(row);
                group_hashes.push(hash);
                table.insert_unique(hash, group, |&g| group_hashes[g as usize]);
                group
            }
        };
        membership[row] = group + 1;
    }

    Ok(RowGroupSlots {
        ngroups: first_rows.len(),
        membership,
        sorted: first_rows.len() <= 1,
    })
}

fn radix_group_slots(
    batch: &RecordBatch,
    key_cols: &[usize],
    options: &GroupByOptions,
) -> CylonResult<Option<RowGroupSlots>> {
    let all_dictionaries = key_cols
        .iter()
        .all(|&col| matches!(batch.column(col).data_type(), DataType::Dictionary(_, _)));
    if !all_dictionaries {
        return Ok(None);
    }

    let num_rows = batch.num_rows();
    let mut ranks = Vec::with_capacity(key_cols.len());
    let mut total_slots = 1usize;
    for &col in key_cols {
        let column_ranks = DictionaryRanks::new(batch.column(col))?;
        // one extra slot per column for null
        total_slots = match total_slots.checked_mul(column_ranks.cardinality() + 1) {
            Some(total) if total <= num_rows.max(RADIX_MIN_SLOTS) => total,
            _ => return Ok(None),
        };
        ranks.push(column_ranks);
    }

    let mut codes = vec![0usize; num_rows];
    let mut excluded = vec![false; num_rows];
    for column_ranks in &ranks {
        let base = column_ranks.cardinality() + 1;
        for row in 0..num_rows {
            let digit = match (column_ranks.rank(row), options.null_order) {
                (Some(rank), NullOrder::NullsFirst) => rank as usize + 1,
                (Some(rank), NullOrder::NullsLast) => rank as usize,
                (None, NullOrder::NullsFirst) => 0,
                (None, NullOrder::NullsLast) => base - 1,
            };
            if column_ranks.rank(row).is_none() && options.skip_missing {
                excluded[row] = true;
            }
            codes[row] = codes[row] * base + digit;
        }
    }

    // dense ids in code order
    let mut slot_ids = vec![0u32; total_slots];
    for row in 0..num_rows {
        if !excluded[row] {
            slot_ids[codes[row]] = 1;
        }
    }
    let mut ngroups = 0u32;
    for slot in slot_ids.iter_mut() {
        if *slot != 0 {
            ngroups += 1;
            *slot = ngroups;
        }
    }
    let mut membership: Vec<u32> = (0..num_rows)
        .map(|row| if excluded[row] { 0 } else { slot_ids[codes[row]] })
        .collect();

    let mut sorted = true;
    if !options.sort && ngroups > 1 {
        relabel_first_encounter(&mut membership, ngroups as usize);
        sorted = false;
    }

    Ok(Some(RowGroupSlots {
        ngroups: ngroups as usize,
        membership,
        sorted,
    }))
}

fn relabel_first_encounter(membership: &mut [u32], ngroups: usize) {
    let mut relabel = vec![0u32; ngroups + 1];
    let mut next = 0u32;
    for m in membership.iter_mut() {
        if *m == 0 {
            continue;
        }
        let slot = &mut relabel[*m as usize];
        if *slot == 0 {
            next += 1;
            *slot = next;
        }
        *m = *slot;
    }
}

/// Renumber groups so ids follow the key order of their first rows
fn sort_group_slots(
    batch: &RecordBatch,
    key_cols: &[usize],
    null_order: NullOrder,
    slots: RowGroupSlots,
) -> CylonResult<RowGroupSlots> {
    let RowGroupSlots { ngroups, mut membership, .. } = slots;
    let equal_to = TableRowIndexEqualTo::new(batch, key_cols, null_order)?;

    let mut first_rows = vec![usize::MAX; ngroups];
    for (row, &m) in membership.iter().enumerate() {
        if m != 0 && first_rows[m as usize - 1] == usize::MAX {
            first_rows[m as usize - 1] = row;
        }
    }

    let mut order: Vec<usize> = (0..ngroups).collect();
    order.sort_by(|&a, &b| equal_to.compare(first_rows[a], first_rows[b]));

    let mut new_ids = vec![0u32; ngroups + 1];
    for (position, &group) in order.iter().enumerate() {
        new_ids[group + 1] = position as u32 + 1;
    }
    for m in membership.iter_mut() {
        *m = new_ids[*m as usize];
    }

    Ok(RowGroupSlots {
        ngroups,
        membership,
        sorted: true,
    })
}
