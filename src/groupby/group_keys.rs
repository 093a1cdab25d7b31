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

//! Group keys and key lookup

use std::fmt;
use std::sync::Arc;

use hashbrown::HashTable;

use super::grouped_table::GroupedTable;
use crate::arrow::arrow_hash_kernels::combine_hash;
use crate::cylon_debug;
use crate::error::{Code, CylonError, CylonResult};
use crate::scalar::ScalarValue;

/// The key-tuple of one group
///
/// A key remembers the grouping it came from; comparing or looking up keys
/// across groupings with different key columns is an error.
#[derive(Debug, Clone)]
pub struct GroupKey {
    handle: u64,
    names: Arc<[String]>,
    values: Vec<ScalarValue>,
    group: usize,
}

impl GroupKey {
    pub(crate) fn new(handle: u64, names: Arc<[String]>, values: Vec<ScalarValue>, group: usize) -> Self {
        Self {
            handle,
            names,
            values,
            group,
        }
    }

    pub(crate) fn handle(&self) -> u64 {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Group id this key belongs to
    pub fn group(&self) -> usize {
        self.group
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[ScalarValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> CylonResult<&ScalarValue> {
        self.values.get(index).ok_or_else(|| {
            CylonError::new(
                Code::IndexError,
                format!("Key field {} out of range for key of length {}", index, self.values.len()),
            )
        })
    }

    pub fn get_by_name(&self, name: &str) -> CylonResult<&ScalarValue> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|pos| &self.values[pos])
            .ok_or_else(|| CylonError::new(Code::KeyError, format!("Key has no field named '{}'", name)))
    }

    pub fn to_tuple(&self) -> Vec<ScalarValue> {
        self.values.clone()
    }

    pub fn to_named(&self) -> Vec<(String, ScalarValue)> {
        self.names.iter().cloned().zip(self.values.iter().cloned()).collect()
    }

    /// Compare two keys
    ///
    /// Keys are comparable only when their groupings use the same key column
    /// names in the same order.
    pub fn try_eq(&self, other: &GroupKey) -> CylonResult<bool> {
        if self.names != other.names {
            return Err(CylonError::invalid(format!(
                "Cannot compare keys of groupings on {:?} and {:?}",
                self.names, other.names
            )));
        }
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .all(|(a, b)| a.is_equal(b)))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupKey(")?;
        for (i, (name, value)) in self.names.iter().zip(self.values.iter()).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")
    }
}

/// Lazily materialised sequence of keys, one per group, in group order
#[derive(Clone, Copy)]
pub struct GroupKeys<'a> {
    grouped: &'a GroupedTable,
}

impl<'a> GroupKeys<'a> {
    pub(crate) fn new(grouped: &'a GroupedTable) -> Self {
        Self { grouped }
    }

    pub fn len(&self) -> usize {
        self.grouped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grouped.is_empty()
    }

    pub fn get(&self, group: usize) -> CylonResult<GroupKey> {
        self.grouped.key(group)
    }

    pub fn iter(&self) -> impl Iterator<Item = CylonResult<GroupKey>> + 'a {
        let grouped = self.grouped;
        (0..grouped.len()).map(move |g| grouped.key(g))
    }

    pub fn to_vec(&self) -> CylonResult<Vec<GroupKey>> {
        self.iter().collect()
    }
}

/// A key given to [`GroupedTable::lookup`]
#[derive(Debug, Clone)]
pub enum KeyLookup {
    /// Values in key column order
    Tuple(Vec<ScalarValue>),
    /// Values by key column name, in any order
    Named(Vec<(String, ScalarValue)>),
    /// A key produced by the grouping being queried
    Key(GroupKey),
}

impl KeyLookup {
    /// Lookup for a grouping with a single key column
    pub fn single(value: impl Into<ScalarValue>) -> Self {
        KeyLookup::Tuple(vec![value.into()])
    }

    pub fn named<S: Into<String>>(pairs: impl IntoIterator<Item = (S, ScalarValue)>) -> Self {
        KeyLookup::Named(pairs.into_iter().map(|(name, value)| (name.into(), value)).collect())
    }
}

impl From<GroupKey> for KeyLookup {
    fn from(key: GroupKey) -> Self {
        KeyLookup::Key(key)
    }
}

impl From<Vec<ScalarValue>> for KeyLookup {
    fn from(values: Vec<ScalarValue>) -> Self {
        KeyLookup::Tuple(values)
    }
}

fn tuple_hash(values: &[ScalarValue]) -> u64 {
    values
        .iter()
        .fold(0u64, |partial, value| combine_hash(partial, value.hash_key()))
}

fn tuple_equal(a: &[ScalarValue], b: &[ScalarValue]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.is_equal(y))
}

/// Map from key-tuple to group id over the representative values of each group
pub(crate) struct KeyRegistry {
    names: Arc<[String]>,
    table: HashTable<u32>,
    hashes: Vec<u64>,
    values: Vec<Vec<ScalarValue>>,
}

impl KeyRegistry {
    pub(crate) fn build(grouped: &GroupedTable) -> CylonResult<Self> {
        let parent = grouped.parent();
        let key_columns = grouped
            .key_columns()
            .iter()
            .map(|&col| parent.column(col))
            .collect::<CylonResult<Vec<_>>>()?;
        let names: Arc<[String]> = grouped.key_names().into();

        let representatives = grouped.representative_rows();
        let mut table = HashTable::with_capacity(representatives.len());
        let mut hashes = Vec::with_capacity(representatives.len());
        let mut values = Vec::with_capacity(representatives.len());
        for (group, &row) in representatives.iter().enumerate() {
            let key = key_columns
                .iter()
                .map(|column| ScalarValue::try_from_array(column.as_ref(), row))
                .collect::<CylonResult<Vec<_>>>()?;
            let hash = tuple_hash(&key);
            hashes.push(hash);
            values.push(key);
            table.insert_unique(hash, group as u32, |&g| hashes[g as usize]);
        }
        cylon_debug!("Built key registry over {} groups", values.len());

        Ok(Self {
            names,
            table,
            hashes,
            values,
        })
    }

    pub(crate) fn names(&self) -> &Arc<[String]> {
        &self.names
    }

    pub(crate) fn key_values(&self, group: usize) -> &[ScalarValue] {
        &self.values[group]
    }

    pub(crate) fn find(&self, key: &[ScalarValue]) -> Option<usize> {
        let hash = tuple_hash(key);
        self.table
            .find(hash, |&g| {
                self.hashes[g as usize] == hash && tuple_equal(&self.values[g as usize], key)
            })
            .map(|&g| g as usize)
    }

    /// Put named values into key column order
    pub(crate) fn order_named(&self, pairs: &[(String, ScalarValue)]) -> CylonResult<Vec<ScalarValue>> {
        if pairs.len() != self.names.len() {
            return Err(CylonError::invalid(format!(
                "Named key has {} fields but the grouping has key columns {:?}",
                pairs.len(),
                self.names
            )));
        }
        self.names
            .iter()
            .map(|name| {
                let mut matches = pairs.iter().filter(|(n, _)| n == name);
                match (matches.next(), matches.next()) {
                    (Some((_, value)), None) => Ok(value.clone()),
                    _ => Err(CylonError::invalid(format!(
                        "Named key fields {:?} do not match key columns {:?}",
                        pairs.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
                        self.names
                    ))),
                }
            })
            .collect()
    }
}
