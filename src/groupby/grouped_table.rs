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

//! Grouped view over a table
//!
//! A `GroupedTable` stores the membership array produced by the partitioner
//! and derives everything else on demand:
//! - the group index (row permutation plus per-group block bounds), built by
//!   a stable counting sort the first time it is needed
//! - one representative row per group
//! - the key registry used for key lookups

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};

use arrow::array::ArrayRef;
use hashbrown::HashTable;

use super::group_keys::{GroupKey, GroupKeys, KeyLookup, KeyRegistry};
use super::partition::row_group_slots;
use super::GroupByOptions;
use crate::arrow::arrow_comparator::TableRowIndexEqualTo;
use crate::arrow::arrow_hash_kernels::TableRowIndexHash;
use crate::compute::GroupBounds;
use crate::cylon_debug;
use crate::error::{Code, CylonError, CylonResult};
use crate::scalar::ScalarValue;
use crate::table::{take_column, Table};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, AtomicOrdering::Relaxed)
}

// ============================================================================
// Group index
// ============================================================================

/// Rows of every group laid out contiguously, in group order
///
/// Within a block rows keep their table order. `ends` are exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupIndex {
    rows: Vec<usize>,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

impl GroupIndex {
    fn build(membership: &[u32], ngroups: usize) -> Self {
        let mut counts = vec![0usize; ngroups];
        for &m in membership {
            if m != 0 {
                counts[m as usize - 1] += 1;
            }
        }

        let mut starts = Vec::with_capacity(ngroups);
        let mut ends = Vec::with_capacity(ngroups);
        let mut offset = 0;
        for &count in &counts {
            starts.push(offset);
            offset += count;
            ends.push(offset);
        }

        let mut cursor = starts.clone();
        let mut rows = vec![0usize; offset];
        for (row, &m) in membership.iter().enumerate() {
            if m != 0 {
                let slot = &mut cursor[m as usize - 1];
                rows[*slot] = row;
                *slot += 1;
            }
        }

        Self { rows, starts, ends }
    }

    /// Row permutation: every included row, grouped
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn ends(&self) -> &[usize] {
        &self.ends
    }

    pub fn group_rows(&self, group: usize) -> &[usize] {
        &self.rows[self.starts[group]..self.ends[group]]
    }

    pub fn bounds(&self) -> GroupBounds<'_> {
        GroupBounds {
            starts: &self.starts,
            ends: &self.ends,
        }
    }
}

// ============================================================================
// Grouped table
// ============================================================================

/// A table partitioned into groups by a set of key columns
pub struct GroupedTable {
    parent: Arc<Table>,
    key_cols: Vec<usize>,
    membership: Vec<u32>,
    ngroups: usize,
    sorted: bool,
    options: GroupByOptions,
    index: OnceLock<GroupIndex>,
    representatives: OnceLock<Vec<usize>>,
    registry: OnceLock<KeyRegistry>,
    handle: u64,
}

/// Group `table` by the columns at `key_cols`
pub fn partition(table: Arc<Table>, key_cols: &[usize], sort: bool, skip_missing: bool) -> CylonResult<GroupedTable> {
    let options = GroupByOptions {
        sort,
        skip_missing,
        ..GroupByOptions::from_context(&table.get_context())
    };
    GroupedTable::new(table, key_cols, options)
}

impl GroupedTable {
    pub fn new(table: Arc<Table>, key_cols: &[usize], options: GroupByOptions) -> CylonResult<Self> {
        for (i, col) in key_cols.iter().enumerate() {
            if key_cols[..i].contains(col) {
                return Err(CylonError::invalid(format!("Key column {} given more than once", col)));
            }
        }
        let slots = row_group_slots(table.batch(), key_cols, &options)?;
        Ok(Self::from_parts(
            table,
            key_cols.to_vec(),
            slots.membership,
            slots.ngroups,
            slots.sorted,
            options,
        ))
    }

    /// Group by key column names
    pub fn by_names(table: Arc<Table>, names: &[&str], options: GroupByOptions) -> CylonResult<Self> {
        let key_cols = names
            .iter()
            .map(|name| table.column_index(name))
            .collect::<CylonResult<Vec<_>>>()?;
        Self::new(table, &key_cols, options)
    }

    pub(crate) fn from_parts(
        parent: Arc<Table>,
        key_cols: Vec<usize>,
        membership: Vec<u32>,
        ngroups: usize,
        sorted: bool,
        options: GroupByOptions,
    ) -> Self {
        Self {
            parent,
            key_cols,
            membership,
            ngroups,
            sorted,
            options,
            index: OnceLock::new(),
            representatives: OnceLock::new(),
            registry: OnceLock::new(),
            handle: next_handle(),
        }
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.ngroups
    }

    pub fn is_empty(&self) -> bool {
        self.ngroups == 0
    }

    pub fn parent(&self) -> &Arc<Table> {
        &self.parent
    }

    pub fn key_columns(&self) -> &[usize] {
        &self.key_cols
    }

    pub fn key_names(&self) -> Vec<String> {
        let schema = self.parent.schema();
        self.key_cols
            .iter()
            .map(|&col| schema.field(col).name().clone())
            .collect()
    }

    /// Names of the non-key columns
    pub fn value_names(&self) -> Vec<String> {
        let schema = self.parent.schema();
        (0..schema.fields().len())
            .filter(|col| !self.key_cols.contains(col))
            .map(|col| schema.field(col).name().clone())
            .collect()
    }

    /// Whether group ids follow key order
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn options(&self) -> &GroupByOptions {
        &self.options
    }

    /// Per-row group id plus one, `0` for excluded rows
    pub fn membership(&self) -> &[u32] {
        &self.membership
    }

    /// The group index, built on first use
    pub fn group_index(&self) -> &GroupIndex {
        self.index
            .get_or_init(|| GroupIndex::build(&self.membership, self.ngroups))
    }

    pub fn is_index_materialized(&self) -> bool {
        self.index.get().is_some()
    }

    /// First row of each group
    pub fn representative_rows(&self) -> &[usize] {
        self.representatives.get_or_init(|| {
            if let Some(index) = self.index.get() {
                return index.starts.iter().map(|&start| index.rows[start]).collect();
            }
            let mut first = vec![usize::MAX; self.ngroups];
            for (row, &m) in self.membership.iter().enumerate() {
                if m != 0 && first[m as usize - 1] == usize::MAX {
                    first[m as usize - 1] = row;
                }
            }
            first
        })
    }

    fn registry(&self) -> CylonResult<&KeyRegistry> {
        if let Some(registry) = self.registry.get() {
            return Ok(registry);
        }
        let built = KeyRegistry::build(self)?;
        Ok(self.registry.get_or_init(|| built))
    }

    fn check_group(&self, group: usize) -> CylonResult<()> {
        if group >= self.ngroups {
            return Err(CylonError::new(
                Code::IndexError,
                format!("Group {} out of range for {} groups", group, self.ngroups),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Group access
    // ------------------------------------------------------------------------

    pub fn group(&self, group: usize) -> CylonResult<GroupSlice<'_>> {
        self.check_group(group)?;
        Ok(GroupSlice {
            grouped: self,
            group,
            rows: self.group_index().group_rows(group),
        })
    }

    pub fn group_by_key(&self, key: &KeyLookup) -> CylonResult<GroupSlice<'_>> {
        self.group(self.group_of(key)?)
    }

    fn group_of(&self, key: &KeyLookup) -> CylonResult<usize> {
        self.lookup(key)?
            .ok_or_else(|| CylonError::new(Code::KeyError, format!("Key {:?} not found", key)))
    }

    pub fn select(&self, selector: &GroupSelector) -> CylonResult<Selection<'_>> {
        match selector {
            GroupSelector::Index(group) => Ok(Selection::Group(self.group(*group)?)),
            GroupSelector::Key(key) => Ok(Selection::Group(self.group_by_key(key)?)),
            GroupSelector::Indices(groups) => Ok(Selection::Grouped(self.subset(groups)?)),
            GroupSelector::Keys(keys) => {
                let groups = keys
                    .iter()
                    .map(|key| self.group_of(key))
                    .collect::<CylonResult<Vec<_>>>()?;
                Ok(Selection::Grouped(self.subset(&groups)?))
            }
            GroupSelector::Mask(_) | GroupSelector::Not(_) => {
                let chosen = self.selected_groups(selector)?;
                let groups: Vec<usize> = (0..self.ngroups).filter(|&g| chosen[g]).collect();
                Ok(Selection::Grouped(self.subset(&groups)?))
            }
        }
    }

    fn selected_groups(&self, selector: &GroupSelector) -> CylonResult<Vec<bool>> {
        let mut chosen = vec![false; self.ngroups];
        match selector {
            GroupSelector::Index(group) => {
                self.check_group(*group)?;
                chosen[*group] = true;
            }
            GroupSelector::Indices(groups) => {
                for &group in groups {
                    self.check_group(group)?;
                    chosen[group] = true;
                }
            }
            GroupSelector::Mask(mask) => {
                if mask.len() != self.ngroups {
                    return Err(CylonError::invalid(format!(
                        "Mask of length {} does not match {} groups",
                        mask.len(),
                        self.ngroups
                    )));
                }
                chosen.copy_from_slice(mask);
            }
            GroupSelector::Key(key) => {
                chosen[self.group_of(key)?] = true;
            }
            GroupSelector::Keys(keys) => {
                for key in keys {
                    chosen[self.group_of(key)?] = true;
                }
            }
            GroupSelector::Not(inner) => {
                let inner = self.selected_groups(inner)?;
                for (c, i) in chosen.iter_mut().zip(inner) {
                    *c = !i;
                }
            }
        }
        Ok(chosen)
    }

    /// A new grouping restricted to `groups`, numbered in the given order
    fn subset(&self, groups: &[usize]) -> CylonResult<GroupedTable> {
        let mut new_ids = vec![0u32; self.ngroups];
        for (position, &group) in groups.iter().enumerate() {
            self.check_group(group)?;
            if new_ids[group] != 0 {
                return Err(CylonError::invalid(format!("Group {} selected more than once", group)));
            }
            new_ids[group] = position as u32 + 1;
        }

        let membership = self
            .membership
            .iter()
            .map(|&m| if m == 0 { 0 } else { new_ids[m as usize - 1] })
            .collect();
        let sorted = self.sorted && groups.windows(2).all(|w| w[0] < w[1]);
        let subset = GroupedTable::from_parts(
            self.parent.clone(),
            self.key_cols.clone(),
            membership,
            groups.len(),
            sorted,
            self.options,
        );

        if let Some(index) = self.index.get() {
            let mut rows = Vec::new();
            let mut starts = Vec::with_capacity(groups.len());
            let mut ends = Vec::with_capacity(groups.len());
            for &group in groups {
                starts.push(rows.len());
                rows.extend_from_slice(index.group_rows(group));
                ends.push(rows.len());
            }
            let _ = subset.index.set(GroupIndex { rows, starts, ends });
        }
        if let Some(representatives) = self.representatives.get() {
            let _ = subset
                .representatives
                .set(groups.iter().map(|&g| representatives[g]).collect());
        }
        Ok(subset)
    }

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------

    pub fn keys(&self) -> GroupKeys<'_> {
        GroupKeys::new(self)
    }

    pub fn key(&self, group: usize) -> CylonResult<GroupKey> {
        self.check_group(group)?;
        let registry = self.registry()?;
        Ok(GroupKey::new(
            self.handle,
            registry.names().clone(),
            registry.key_values(group).to_vec(),
            group,
        ))
    }

    /// Group id for `key`, if present
    pub fn lookup(&self, key: &KeyLookup) -> CylonResult<Option<usize>> {
        match key {
            KeyLookup::Key(key) => {
                if key.handle() != self.handle {
                    return Err(CylonError::invalid(
                        "Key belongs to a different grouping; look it up by value instead",
                    ));
                }
                Ok(Some(key.group()))
            }
            KeyLookup::Tuple(values) => {
                if values.len() != self.key_cols.len() {
                    return Err(CylonError::invalid(format!(
                        "Key has {} values but the grouping has {} key columns",
                        values.len(),
                        self.key_cols.len()
                    )));
                }
                Ok(self.registry()?.find(values))
            }
            KeyLookup::Named(pairs) => {
                let registry = self.registry()?;
                let values = registry.order_named(pairs)?;
                Ok(registry.find(&values))
            }
        }
    }

    pub fn contains_key(&self, key: &KeyLookup) -> CylonResult<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    pub fn get_group(&self, key: &KeyLookup) -> CylonResult<Option<GroupSlice<'_>>> {
        match self.lookup(key)? {
            Some(group) => self.group(group).map(Some),
            None => Ok(None),
        }
    }

    /// Group id of every parent row, `None` for excluded rows
    pub fn group_indices(&self) -> Vec<Option<usize>> {
        self.membership
            .iter()
            .map(|&m| if m == 0 { None } else { Some(m as usize - 1) })
            .collect()
    }

    pub fn group_lengths(&self) -> Vec<usize> {
        let index = self.group_index();
        index
            .starts
            .iter()
            .zip(index.ends.iter())
            .map(|(start, end)| end - start)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Equality
    // ------------------------------------------------------------------------

    fn same_structure(&self, other: &GroupedTable) -> bool {
        if self.ngroups != other.ngroups || self.key_names() != other.key_names() {
            return false;
        }
        if !Arc::ptr_eq(&self.parent, &other.parent) && !self.parent.equals(&other.parent) {
            return false;
        }
        if self.membership.len() != other.membership.len() {
            return false;
        }

        // group ids must correspond one to one
        let mut forward = vec![0u32; self.ngroups + 1];
        let mut backward = vec![0u32; other.ngroups + 1];
        for (&a, &b) in self.membership.iter().zip(other.membership.iter()) {
            if (a == 0) != (b == 0) {
                return false;
            }
            if a == 0 {
                continue;
            }
            let (f, r) = (forward[a as usize], backward[b as usize]);
            if f == 0 && r == 0 {
                forward[a as usize] = b;
                backward[b as usize] = a;
            } else if f != b || r != a {
                return false;
            }
        }
        true
    }

    fn has_missing_keys(&self) -> CylonResult<bool> {
        if self.key_cols.is_empty() {
            return Ok(false);
        }
        let equal_to = TableRowIndexEqualTo::new(self.parent.batch(), &self.key_cols, self.options.null_order)?;
        Ok(self.representative_rows().iter().any(|&row| equal_to.has_null(row)))
    }

    /// Three-valued equality
    ///
    /// `None` when both groupings partition equal tables the same way but
    /// either one has a group whose key contains a null, since null keys do
    /// not compare equal under `==`.
    pub fn eq_missing(&self, other: &GroupedTable) -> Option<bool> {
        if !self.same_structure(other) {
            return Some(false);
        }
        match (self.has_missing_keys(), other.has_missing_keys()) {
            (Ok(false), Ok(false)) => Some(true),
            _ => None,
        }
    }

    /// Strict equality: null keys are equal to each other
    pub fn is_equal(&self, other: &GroupedTable) -> bool {
        self.same_structure(other)
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Check every grouping invariant, returning `Internal` on a violation
    pub fn validate(&self) -> CylonResult<()> {
        let num_rows = self.parent.rows();
        if self.membership.len() != num_rows {
            return Err(CylonError::Internal(format!(
                "membership has {} entries for {} rows",
                self.membership.len(),
                num_rows
            )));
        }
        if let Some(&m) = self.membership.iter().find(|&&m| m as usize > self.ngroups) {
            return Err(CylonError::Internal(format!(
                "membership entry {} exceeds group count {}",
                m, self.ngroups
            )));
        }

        let index = self.group_index();
        if index.starts.len() != self.ngroups || index.ends.len() != self.ngroups {
            return Err(CylonError::Internal("group bounds do not match group count".to_string()));
        }
        let mut expected_start = 0;
        for g in 0..self.ngroups {
            if index.starts[g] != expected_start || index.ends[g] <= index.starts[g] {
                return Err(CylonError::Internal(format!(
                    "group {} block [{}, {}) is empty or overlaps its neighbours",
                    g, index.starts[g], index.ends[g]
                )));
            }
            expected_start = index.ends[g];
        }
        if expected_start != index.rows.len() {
            return Err(CylonError::Internal("group blocks do not cover the permutation".to_string()));
        }

        let mut rebuilt = vec![0u32; num_rows];
        for g in 0..self.ngroups {
            for &row in index.group_rows(g) {
                if row >= num_rows || rebuilt[row] != 0 {
                    return Err(CylonError::Internal(format!("row {} placed twice in the permutation", row)));
                }
                rebuilt[row] = g as u32 + 1;
            }
        }
        if rebuilt != self.membership {
            return Err(CylonError::Internal(
                "membership re-derived from the group index differs".to_string(),
            ));
        }

        if self.key_cols.is_empty() {
            return Ok(());
        }

        let batch = self.parent.batch();
        let equal_to = TableRowIndexEqualTo::new(batch, &self.key_cols, self.options.null_order)?;
        let hasher = TableRowIndexHash::new_with_columns(batch, &self.key_cols)?;
        let mut seen: HashTable<usize> = HashTable::new();
        let mut seen_hashes = Vec::with_capacity(self.ngroups);
        let representatives = self.representative_rows();
        for g in 0..self.ngroups {
            let first = index.group_rows(g)[0];
            if representatives[g] != first {
                return Err(CylonError::Internal(format!("group {} has a stale representative row", g)));
            }
            if let Some(&row) = index.group_rows(g).iter().find(|&&row| !equal_to.equal(first, row)) {
                return Err(CylonError::Internal(format!(
                    "rows {} and {} share group {} with different keys",
                    first, row, g
                )));
            }
            if self.options.skip_missing && equal_to.has_null(first) {
                return Err(CylonError::Internal(format!("group {} has a null key", g)));
            }

            let hash = hasher.hash(first);
            if let Some(&other) = seen.find(hash, |&o| equal_to.equal(representatives[o], first)) {
                return Err(CylonError::Internal(format!("groups {} and {} have equal keys", other, g)));
            }
            seen_hashes.push(hash);
            seen.insert_unique(hash, g, |&o| seen_hashes[o]);

            if self.sorted && g > 0 && equal_to.compare(representatives[g - 1], first) != std::cmp::Ordering::Less {
                return Err(CylonError::Internal(format!("groups {} and {} are out of key order", g - 1, g)));
            }
        }
        cylon_debug!("Validated grouping of {} rows into {} groups", num_rows, self.ngroups);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Derived tables
    // ------------------------------------------------------------------------

    /// Parent rows concatenated in group order, excluded rows dropped
    pub fn ungroup(&self) -> CylonResult<Table> {
        self.parent.take(self.group_index().rows())
    }

    /// Keep the groups for which `predicate` returns true
    pub fn filter<F>(&self, mut predicate: F) -> CylonResult<GroupedTable>
    where
        F: FnMut(&GroupSlice<'_>) -> bool,
    {
        let mut kept = Vec::new();
        for g in 0..self.ngroups {
            if predicate(&self.group(g)?) {
                kept.push(g);
            }
        }
        self.subset(&kept)
    }
}

impl Clone for GroupedTable {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            key_cols: self.key_cols.clone(),
            membership: self.membership.clone(),
            ngroups: self.ngroups,
            sorted: self.sorted,
            options: self.options,
            index: self.index.clone(),
            representatives: self.representatives.clone(),
            registry: OnceLock::new(),
            handle: next_handle(),
        }
    }
}

impl fmt::Debug for GroupedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupedTable")
            .field("groups", &self.ngroups)
            .field("keys", &self.key_names())
            .field("rows", &self.parent.rows())
            .field("sorted", &self.sorted)
            .finish()
    }
}

// ============================================================================
// Group slices and selection
// ============================================================================

/// One group of a [`GroupedTable`]
#[derive(Clone, Copy)]
pub struct GroupSlice<'a> {
    grouped: &'a GroupedTable,
    group: usize,
    rows: &'a [usize],
}

impl<'a> GroupSlice<'a> {
    /// Group id
    pub fn group(&self) -> usize {
        self.group
    }

    /// Row indices into the parent table, in table order
    pub fn rows(&self) -> &'a [usize] {
        self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn parent(&self) -> &'a Arc<Table> {
        &self.grouped.parent
    }

    pub fn column(&self, name: &str) -> CylonResult<ArrayRef> {
        let position = self.grouped.parent.column_index(name)?;
        self.column_at(position)
    }

    pub fn column_at(&self, position: usize) -> CylonResult<ArrayRef> {
        take_column(self.grouped.parent.column(position)?, self.rows)
    }

    pub fn to_table(&self) -> CylonResult<Table> {
        self.grouped.parent.take(self.rows)
    }

    /// Value of column `name` at row `row` of this group
    pub fn value(&self, name: &str, row: usize) -> CylonResult<ScalarValue> {
        let parent_row = *self.rows.get(row).ok_or_else(|| {
            CylonError::new(
                Code::IndexError,
                format!("Row {} out of range for group of {} rows", row, self.rows.len()),
            )
        })?;
        ScalarValue::try_from_array(self.grouped.parent.column_by_name(name)?.as_ref(), parent_row)
    }

    pub fn key(&self) -> CylonResult<GroupKey> {
        self.grouped.key(self.group)
    }
}

impl fmt::Debug for GroupSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSlice")
            .field("group", &self.group)
            .field("rows", &self.rows)
            .finish()
    }
}

/// Selects groups of a [`GroupedTable`]
#[derive(Debug, Clone)]
pub enum GroupSelector {
    Index(usize),
    Indices(Vec<usize>),
    Mask(Vec<bool>),
    Key(KeyLookup),
    Keys(Vec<KeyLookup>),
    /// Every group the inner selector does not pick
    Not(Box<GroupSelector>),
}

impl GroupSelector {
    pub fn not(selector: GroupSelector) -> Self {
        GroupSelector::Not(Box::new(selector))
    }
}

/// Result of [`GroupedTable::select`]
#[derive(Debug)]
pub enum Selection<'a> {
    Group(GroupSlice<'a>),
    Grouped(GroupedTable),
}

impl<'a> Selection<'a> {
    pub fn into_group(self) -> Option<GroupSlice<'a>> {
        match self {
            Selection::Group(slice) => Some(slice),
            Selection::Grouped(_) => None,
        }
    }

    pub fn into_grouped(self) -> Option<GroupedTable> {
        match self {
            Selection::Group(_) => None,
            Selection::Grouped(grouped) => Some(grouped),
        }
    }
}
