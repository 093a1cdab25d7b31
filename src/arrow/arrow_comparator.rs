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

//! Arrow row comparators for grouping
//!
//! Comparators give every supported column type a total order with nulls
//! placed consistently first or last, and an equality where null equals null.
//! Dictionary columns compare by decoded value through a dense rank computed
//! once per dictionary.

use std::cmp::Ordering;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, GenericStringArray, OffsetSizeTrait, PrimitiveArray};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;

use super::arrow_types::KeyNative;
use crate::error::{Code, CylonError, CylonResult};

/// Placement of nulls in the key order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullOrder {
    NullsFirst,
    #[default]
    NullsLast,
}

impl NullOrder {
    /// Ordering of a null against a non-null value
    #[inline]
    pub fn null_vs_value(self) -> Ordering {
        match self {
            NullOrder::NullsFirst => Ordering::Less,
            NullOrder::NullsLast => Ordering::Greater,
        }
    }
}

#[inline]
fn compare_validity(valid1: bool, valid2: bool, null_order: NullOrder) -> Option<Ordering> {
    match (valid1, valid2) {
        (true, true) => None,
        (false, false) => Some(Ordering::Equal),
        (false, true) => Some(null_order.null_vs_value()),
        (true, false) => Some(null_order.null_vs_value().reverse()),
    }
}

/// Trait for comparing two rows of one column
pub trait ArrayIndexComparator: Send + Sync {
    /// Compare two row indices
    fn compare(&self, index1: usize, index2: usize) -> Ordering;

    /// Check equality of two row indices
    fn equal_to(&self, index1: usize, index2: usize) -> bool;

    /// True when the element is a floating point NaN
    fn is_nan(&self, _index: usize) -> bool {
        false
    }

    /// True when the element is null
    fn is_null(&self, index: usize) -> bool;
}

struct PrimitiveComparator<T: ArrowPrimitiveType> {
    array: PrimitiveArray<T>,
    null_order: NullOrder,
}

impl<T> PrimitiveComparator<T>
where
    T: ArrowPrimitiveType,
    T::Native: KeyNative,
{
    fn new(array: &ArrayRef, null_order: NullOrder) -> CylonResult<Self> {
        let array = array
            .as_primitive_opt::<T>()
            .ok_or_else(|| CylonError::new(Code::Invalid, "Failed to downcast array".to_string()))?
            .clone();
        Ok(Self { array, null_order })
    }
}

impl<T> ArrayIndexComparator for PrimitiveComparator<T>
where
    T: ArrowPrimitiveType,
    T::Native: KeyNative,
{
    fn compare(&self, index1: usize, index2: usize) -> Ordering {
        compare_validity(self.array.is_valid(index1), self.array.is_valid(index2), self.null_order)
            .unwrap_or_else(|| self.array.value(index1).key_cmp(self.array.value(index2)))
    }

    fn equal_to(&self, index1: usize, index2: usize) -> bool {
        match (self.array.is_valid(index1), self.array.is_valid(index2)) {
            (true, true) => self.array.value(index1).key_eq(self.array.value(index2)),
            (valid1, valid2) => valid1 == valid2,
        }
    }

    fn is_nan(&self, index: usize) -> bool {
        self.array.is_valid(index) && self.array.value(index).is_nan()
    }

    fn is_null(&self, index: usize) -> bool {
        self.array.is_null(index)
    }
}

struct BooleanComparator {
    array: BooleanArray,
    null_order: NullOrder,
}

impl ArrayIndexComparator for BooleanComparator {
    fn compare(&self, index1: usize, index2: usize) -> Ordering {
        compare_validity(self.array.is_valid(index1), self.array.is_valid(index2), self.null_order)
            .unwrap_or_else(|| self.array.value(index1).cmp(&self.array.value(index2)))
    }

    fn equal_to(&self, index1: usize, index2: usize) -> bool {
        match (self.array.is_valid(index1), self.array.is_valid(index2)) {
            (true, true) => self.array.value(index1) == self.array.value(index2),
            (valid1, valid2) => valid1 == valid2,
        }
    }

    fn is_null(&self, index: usize) -> bool {
        self.array.is_null(index)
    }
}

struct StringComparator<O: OffsetSizeTrait> {
    array: GenericStringArray<O>,
    null_order: NullOrder,
}

impl<O: OffsetSizeTrait> ArrayIndexComparator for StringComparator<O> {
    fn compare(&self, index1: usize, index2: usize) -> Ordering {
        compare_validity(self.array.is_valid(index1), self.array.is_valid(index2), self.null_order)
            .unwrap_or_else(|| self.array.value(index1).cmp(self.array.value(index2)))
    }

    fn equal_to(&self, index1: usize, index2: usize) -> bool {
        match (self.array.is_valid(index1), self.array.is_valid(index2)) {
            (true, true) => self.array.value(index1) == self.array.value(index2),
            (valid1, valid2) => valid1 == valid2,
        }
    }

    fn is_null(&self, index: usize) -> bool {
        self.array.is_null(index)
    }
}

/// Every element of a `NullArray` is null
struct NullComparator;

impl ArrayIndexComparator for NullComparator {
    fn compare(&self, _index1: usize, _index2: usize) -> Ordering {
        Ordering::Equal
    }

    fn equal_to(&self, _index1: usize, _index2: usize) -> bool {
        true
    }

    fn is_null(&self, _index: usize) -> bool {
        true
    }
}

/// Dense ranks of the decoded values of a dictionary column
///
/// Equal values share a rank and ranks follow the value order, so comparing
/// ranks is equivalent to comparing decoded values. Null rows (null key or
/// null value) have no rank.
pub struct DictionaryRanks {
    row_ranks: Vec<Option<u32>>,
    cardinality: usize,
    value_nans: Vec<bool>,
    row_values: Vec<usize>,
}

impl DictionaryRanks {
    pub fn new(column: &ArrayRef) -> CylonResult<Self> {
        let dict = column.as_any_dictionary_opt().ok_or_else(|| {
            CylonError::new(Code::Invalid, "Failed to downcast dictionary array".to_string())
        })?;
        let values = dict.values();
        let value_cmp = create_comparator(values, NullOrder::NullsLast)?;

        let mut order: Vec<usize> = (0..values.len()).filter(|&i| !value_cmp.is_null(i)).collect();
        order.sort_by(|&a, &b| value_cmp.compare(a, b));

        let mut value_ranks: Vec<Option<u32>> = vec![None; values.len()];
        let mut cardinality = 0usize;
        for (pos, &value) in order.iter().enumerate() {
            if pos == 0 || !value_cmp.equal_to(order[pos - 1], value) {
                cardinality += 1;
            }
            value_ranks[value] = Some((cardinality - 1) as u32);
        }
        let value_nans = (0..values.len()).map(|i| value_cmp.is_nan(i)).collect();

        let keys = dict.keys();
        let row_values = dict.normalized_keys();
        let row_ranks = row_values
            .iter()
            .enumerate()
            .map(|(row, &key)| if keys.is_null(row) { None } else { value_ranks[key] })
            .collect();

        Ok(Self {
            row_ranks,
            cardinality,
            value_nans,
            row_values,
        })
    }

    /// Rank of the value at `row`, `None` for null
    #[inline]
    pub fn rank(&self, row: usize) -> Option<u32> {
        self.row_ranks[row]
    }

    /// Number of distinct non-null values in the dictionary
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }
}

struct DictionaryComparator {
    ranks: DictionaryRanks,
    null_order: NullOrder,
}

impl ArrayIndexComparator for DictionaryComparator {
    fn compare(&self, index1: usize, index2: usize) -> Ordering {
        let (r1, r2) = (self.ranks.rank(index1), self.ranks.rank(index2));
        compare_validity(r1.is_some(), r2.is_some(), self.null_order)
            .unwrap_or_else(|| r1.cmp(&r2))
    }

    fn equal_to(&self, index1: usize, index2: usize) -> bool {
        self.ranks.rank(index1) == self.ranks.rank(index2)
    }

    fn is_nan(&self, index: usize) -> bool {
        self.ranks.rank(index).is_some() && self.ranks.value_nans[self.ranks.row_values[index]]
    }

    fn is_null(&self, index: usize) -> bool {
        self.ranks.rank(index).is_none()
    }
}

/// Create a comparator for a column
pub fn create_comparator(
    column: &ArrayRef,
    null_order: NullOrder,
) -> CylonResult<Box<dyn ArrayIndexComparator>> {
    match column.data_type() {
        DataType::Null => Ok(Box::new(NullComparator)),
        DataType::Boolean => {
            let array = column
                .as_boolean_opt()
                .ok_or_else(|| CylonError::new(Code::Invalid, "Failed to downcast boolean array".to_string()))?
                .clone();
            Ok(Box::new(BooleanComparator { array, null_order }))
        }
        DataType::Int8 => Ok(Box::new(PrimitiveComparator::<Int8Type>::new(column, null_order)?)),
        DataType::Int16 => Ok(Box::new(PrimitiveComparator::<Int16Type>::new(column, null_order)?)),
        DataType::Int32 => Ok(Box::new(PrimitiveComparator::<Int32Type>::new(column, null_order)?)),
        DataType::Int64 => Ok(Box::new(PrimitiveComparator::<Int64Type>::new(column, null_order)?)),
        DataType::UInt8 => Ok(Box::new(PrimitiveComparator::<UInt8Type>::new(column, null_order)?)),
        DataType::UInt16 => Ok(Box::new(PrimitiveComparator::<UInt16Type>::new(column, null_order)?)),
        DataType::UInt32 => Ok(Box::new(PrimitiveComparator::<UInt32Type>::new(column, null_order)?)),
        DataType::UInt64 => Ok(Box::new(PrimitiveComparator::<UInt64Type>::new(column, null_order)?)),
        DataType::Float32 => Ok(Box::new(PrimitiveComparator::<Float32Type>::new(column, null_order)?)),
        DataType::Float64 => Ok(Box::new(PrimitiveComparator::<Float64Type>::new(column, null_order)?)),
        DataType::Utf8 => {
            let array = column
                .as_string_opt::<i32>()
                .ok_or_else(|| CylonError::new(Code::Invalid, "Failed to downcast string array".to_string()))?
                .clone();
            Ok(Box::new(StringComparator { array, null_order }))
        }
        DataType::LargeUtf8 => {
            let array = column
                .as_string_opt::<i64>()
                .ok_or_else(|| CylonError::new(Code::Invalid, "Failed to downcast large string array".to_string()))?
                .clone();
            Ok(Box::new(StringComparator { array, null_order }))
        }
        DataType::Dictionary(_, _) => Ok(Box::new(DictionaryComparator {
            ranks: DictionaryRanks::new(column)?,
            null_order,
        })),
        _ => Err(CylonError::new(
            Code::TypeError,
            format!("Unsupported data type for comparison: {:?}", column.data_type()),
        )),
    }
}

/// Equality and lexicographic order over the key columns of a table
pub struct TableRowIndexEqualTo {
    comparators: Vec<Box<dyn ArrayIndexComparator>>,
}

impl TableRowIndexEqualTo {
    /// Create a comparator for specific columns of a table
    pub fn new(batch: &RecordBatch, col_indices: &[usize], null_order: NullOrder) -> CylonResult<Self> {
        let mut comparators = Vec::with_capacity(col_indices.len());
        for &col_idx in col_indices {
            if col_idx >= batch.num_columns() {
                return Err(CylonError::new(
                    Code::IndexError,
                    format!("Column index {} out of range", col_idx),
                ));
            }
            comparators.push(create_comparator(batch.column(col_idx), null_order)?);
        }
        Ok(Self { comparators })
    }

    /// Check if two rows have equal keys
    pub fn equal(&self, record1: usize, record2: usize) -> bool {
        self.comparators.iter().all(|c| c.equal_to(record1, record2))
    }

    /// Compare two rows column by column
    pub fn compare(&self, record1: usize, record2: usize) -> Ordering {
        for comparator in &self.comparators {
            match comparator.compare(record1, record2) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }

    /// True when any key column is null at `record`
    pub fn has_null(&self, record: usize) -> bool {
        self.comparators.iter().any(|c| c.is_null(record))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{DictionaryArray, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};

    use super::*;

    #[test]
    fn nulls_follow_the_configured_order() {
        let column: ArrayRef = Arc::new(Int64Array::from(vec![Some(3), None, Some(1)]));
        let last = create_comparator(&column, NullOrder::NullsLast).unwrap();
        assert_eq!(last.compare(1, 0), Ordering::Greater);
        assert_eq!(last.compare(2, 0), Ordering::Less);
        let first = create_comparator(&column, NullOrder::NullsFirst).unwrap();
        assert_eq!(first.compare(1, 0), Ordering::Less);
        assert!(first.equal_to(1, 1));
        assert!(!first.equal_to(0, 1));
    }

    #[test]
    fn nan_sorts_last_and_equals_itself() {
        let column: ArrayRef = Arc::new(Float64Array::from(vec![f64::NAN, f64::INFINITY, f64::NAN, -0.0, 0.0]));
        let cmp = create_comparator(&column, NullOrder::NullsLast).unwrap();
        assert_eq!(cmp.compare(0, 1), Ordering::Greater);
        assert!(cmp.equal_to(0, 2));
        assert!(!cmp.equal_to(3, 4));
        assert!(cmp.is_nan(2));
    }

    #[test]
    fn dictionary_compares_decoded_values() {
        // dictionary order differs from value order
        let dict: DictionaryArray<Int32Type> = vec![Some("z"), Some("a"), None, Some("z")].into_iter().collect();
        let column: ArrayRef = Arc::new(dict);
        let cmp = create_comparator(&column, NullOrder::NullsLast).unwrap();
        assert_eq!(cmp.compare(0, 1), Ordering::Greater);
        assert!(cmp.equal_to(0, 3));
        assert_eq!(cmp.compare(2, 0), Ordering::Greater);

        let ranks = DictionaryRanks::new(&column).unwrap();
        assert_eq!(ranks.cardinality(), 2);
        assert_eq!(ranks.rank(1), Some(0));
        assert_eq!(ranks.rank(2), None);
    }

    #[test]
    fn multi_column_order() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Utf8, true),
            Field::new("b", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["x", "x", "y"])),
                Arc::new(Int64Array::from(vec![2, 1, 0])),
            ],
        )
        .unwrap();
        let eq = TableRowIndexEqualTo::new(&batch, &[0, 1], NullOrder::NullsLast).unwrap();
        assert_eq!(eq.compare(0, 1), Ordering::Greater);
        assert_eq!(eq.compare(1, 2), Ordering::Less);
        assert!(!eq.equal(0, 1));
    }
}
