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

//! Row hash kernels
//!
//! Each kernel hashes one column and folds the result into a vector of
//! partial row hashes, so a multi-column key is hashed one column at a time.
//! Element hashes are defined on the logical value: integers of any width hash
//! alike, integral floats hash as the matching integer, and dictionary columns
//! hash their decoded values.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use arrow::array::{Array, ArrayRef, AsArray, OffsetSizeTrait};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;

use super::arrow_types::{float_as_integer, KeyNative};
use crate::error::{Code, CylonError, CylonResult};

const NULL_TAG: u8 = 0;
const INTEGER_TAG: u8 = 1;
const FLOAT_TAG: u8 = 2;
const NAN_TAG: u8 = 3;
const STRING_TAG: u8 = 4;

/// Hash a value using ahash with its fixed default keys
#[inline]
fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = ahash::AHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

#[inline]
pub fn hash_null() -> u64 {
    hash_value(&NULL_TAG)
}

#[inline]
pub fn hash_integer(value: i128) -> u64 {
    hash_value(&(INTEGER_TAG, value))
}

#[inline]
pub fn hash_float(value: f64) -> u64 {
    if value.is_nan() {
        hash_value(&NAN_TAG)
    } else if let Some(i) = float_as_integer(value) {
        hash_integer(i)
    } else {
        hash_value(&(FLOAT_TAG, value.to_bits()))
    }
}

#[inline]
pub fn hash_str(value: &str) -> u64 {
    hash_value(&(STRING_TAG, value))
}

/// Fold an element hash into a partial row hash
#[inline]
pub fn combine_hash(partial: u64, element: u64) -> u64 {
    element.wrapping_add(31u64.wrapping_mul(partial))
}

/// Trait for per-column row hash kernels
pub trait RowHashKernel: Send + Sync {
    /// Fold the hash of every element of `idx_col` into `partial_hashes`
    fn update_hash(&self, idx_col: &ArrayRef, partial_hashes: &mut [u64]) -> CylonResult<()>;

    /// Hash a single element
    fn to_hash(&self, values: &ArrayRef, index: usize) -> CylonResult<u64>;
}

fn check_len(idx_col: &ArrayRef, partial_hashes: &[u64]) -> CylonResult<()> {
    if partial_hashes.len() != idx_col.len() {
        return Err(CylonError::new(
            Code::Invalid,
            format!(
                "partial hashes size {} != column length {}",
                partial_hashes.len(),
                idx_col.len()
            ),
        ));
    }
    Ok(())
}

fn downcast_error(expected: &str, found: &DataType) -> CylonError {
    CylonError::new(
        Code::Invalid,
        format!("Failed to downcast {:?} array to {}", found, expected),
    )
}

struct NumericHashKernel<T> {
    _phantom: PhantomData<T>,
}

impl<T: ArrowPrimitiveType> NumericHashKernel<T> {
    fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> RowHashKernel for NumericHashKernel<T>
where
    T: ArrowPrimitiveType + Send + Sync,
    T::Native: KeyNative,
{
    fn update_hash(&self, idx_col: &ArrayRef, partial_hashes: &mut [u64]) -> CylonResult<()> {
        check_len(idx_col, partial_hashes)?;
        let array = idx_col
            .as_primitive_opt::<T>()
            .ok_or_else(|| downcast_error("primitive array", idx_col.data_type()))?;

        if array.null_count() == 0 {
            for (partial, value) in partial_hashes.iter_mut().zip(array.values().iter()) {
                *partial = combine_hash(*partial, value.key_hash());
            }
        } else {
            for (i, partial) in partial_hashes.iter_mut().enumerate() {
                let element = if array.is_null(i) {
                    hash_null()
                } else {
                    array.value(i).key_hash()
                };
                *partial = combine_hash(*partial, element);
            }
        }
        Ok(())
    }

    fn to_hash(&self, values: &ArrayRef, index: usize) -> CylonResult<u64> {
        let array = values
            .as_primitive_opt::<T>()
            .ok_or_else(|| downcast_error("primitive array", values.data_type()))?;
        if array.is_null(index) {
            Ok(hash_null())
        } else {
            Ok(array.value(index).key_hash())
        }
    }
}

struct BooleanHashKernel;

impl RowHashKernel for BooleanHashKernel {
    fn update_hash(&self, idx_col: &ArrayRef, partial_hashes: &mut [u64]) -> CylonResult<()> {
        check_len(idx_col, partial_hashes)?;
        for (i, partial) in partial_hashes.iter_mut().enumerate() {
            *partial = combine_hash(*partial, self.to_hash(idx_col, i)?);
        }
        Ok(())
    }

    fn to_hash(&self, values: &ArrayRef, index: usize) -> CylonResult<u64> {
        let array = values
            .as_boolean_opt()
            .ok_or_else(|| downcast_error("boolean array", values.data_type()))?;
        if array.is_null(index) {
            Ok(hash_null())
        } else {
            Ok(hash_integer(array.value(index) as i128))
        }
    }
}

struct StringHashKernel<O> {
    _phantom: PhantomData<O>,
}

impl<O: OffsetSizeTrait> RowHashKernel for StringHashKernel<O> {
    fn update_hash(&self, idx_col: &ArrayRef, partial_hashes: &mut [u64]) -> CylonResult<()> {
        check_len(idx_col, partial_hashes)?;
        for (i, partial) in partial_hashes.iter_mut().enumerate() {
            *partial = combine_hash(*partial, self.to_hash(idx_col, i)?);
        }
        Ok(())
    }

    fn to_hash(&self, values: &ArrayRef, index: usize) -> CylonResult<u64> {
        let array = values
            .as_string_opt::<O>()
            .ok_or_else(|| downcast_error("string array", values.data_type()))?;
        if array.is_null(index) {
            Ok(hash_null())
        } else {
            Ok(hash_str(array.value(index)))
        }
    }
}

struct NullHashKernel;

impl RowHashKernel for NullHashKernel {
    fn update_hash(&self, idx_col: &ArrayRef, partial_hashes: &mut [u64]) -> CylonResult<()> {
        check_len(idx_col, partial_hashes)?;
        let element = hash_null();
        for partial in partial_hashes.iter_mut() {
            *partial = combine_hash(*partial, element);
        }
        Ok(())
    }

    fn to_hash(&self, _values: &ArrayRef, _index: usize) -> CylonResult<u64> {
        Ok(hash_null())
    }
}

/// Hashes the decoded values of a dictionary column
///
/// Each dictionary value is hashed once; rows then look their hash up by key.
struct DictionaryHashKernel {
    value_kernel: Box<dyn RowHashKernel>,
}

impl DictionaryHashKernel {
    fn value_hashes(&self, values: &ArrayRef) -> CylonResult<Vec<u64>> {
        let mut hashes = vec![0u64; values.len()];
        self.value_kernel.update_hash(values, &mut hashes)?;
        Ok(hashes)
    }
}

impl RowHashKernel for DictionaryHashKernel {
    fn update_hash(&self, idx_col: &ArrayRef, partial_hashes: &mut [u64]) -> CylonResult<()> {
        check_len(idx_col, partial_hashes)?;
        let dict = idx_col
            .as_any_dictionary_opt()
            .ok_or_else(|| downcast_error("dictionary array", idx_col.data_type()))?;
        let value_hashes = self.value_hashes(dict.values())?;
        let keys = dict.keys();
        let normalized = dict.normalized_keys();
        for (i, partial) in partial_hashes.iter_mut().enumerate() {
            let element = if keys.is_null(i) {
                hash_null()
            } else {
                value_hashes[normalized[i]]
            };
            *partial = combine_hash(*partial, element);
        }
        Ok(())
    }

    fn to_hash(&self, values: &ArrayRef, index: usize) -> CylonResult<u64> {
        let dict = values
            .as_any_dictionary_opt()
            .ok_or_else(|| downcast_error("dictionary array", values.data_type()))?;
        if dict.keys().is_null(index) {
            return Ok(hash_null());
        }
        let key = dict.normalized_keys()[index];
        self.value_kernel.to_hash(dict.values(), key)
    }
}

/// Create a row hash kernel for a column type
pub fn create_row_hash_kernel(data_type: &DataType) -> CylonResult<Box<dyn RowHashKernel>> {
    match data_type {
        DataType::Null => Ok(Box::new(NullHashKernel)),
        DataType::Boolean => Ok(Box::new(BooleanHashKernel)),
        DataType::Int8 => Ok(Box::new(NumericHashKernel::<Int8Type>::new())),
        DataType::Int16 => Ok(Box::new(NumericHashKernel::<Int16Type>::new())),
        DataType::Int32 => Ok(Box::new(NumericHashKernel::<Int32Type>::new())),
        DataType::Int64 => Ok(Box::new(NumericHashKernel::<Int64Type>::new())),
        DataType::UInt8 => Ok(Box::new(NumericHashKernel::<UInt8Type>::new())),
        DataType::UInt16 => Ok(Box::new(NumericHashKernel::<UInt16Type>::new())),
        DataType::UInt32 => Ok(Box::new(NumericHashKernel::<UInt32Type>::new())),
        DataType::UInt64 => Ok(Box::new(NumericHashKernel::<UInt64Type>::new())),
        DataType::Float32 => Ok(Box::new(NumericHashKernel::<Float32Type>::new())),
        DataType::Float64 => Ok(Box::new(NumericHashKernel::<Float64Type>::new())),
        DataType::Utf8 => Ok(Box::new(StringHashKernel::<i32> { _phantom: PhantomData })),
        DataType::LargeUtf8 => Ok(Box::new(StringHashKernel::<i64> { _phantom: PhantomData })),
        DataType::Dictionary(_, value_type) => Ok(Box::new(DictionaryHashKernel {
            value_kernel: create_row_hash_kernel(value_type)?,
        })),
        _ => Err(CylonError::new(
            Code::TypeError,
            format!("Unsupported data type for hashing: {:?}", data_type),
        )),
    }
}

/// Pre-computed row hashes over a set of key columns
pub struct TableRowIndexHash {
    hashes: Vec<u64>,
}

impl TableRowIndexHash {
    /// Hash the rows of `batch` over `col_indices`, in column order
    pub fn new_with_columns(batch: &RecordBatch, col_indices: &[usize]) -> CylonResult<Self> {
        let mut hashes = vec![0u64; batch.num_rows()];
        for &col_idx in col_indices {
            if col_idx >= batch.num_columns() {
                return Err(CylonError::new(
                    Code::IndexError,
                    format!("Column index {} out of range", col_idx),
                ));
            }
            let column = batch.column(col_idx);
            let kernel = create_row_hash_kernel(column.data_type())?;
            kernel.update_hash(column, &mut hashes)?;
        }
        Ok(Self { hashes })
    }

    #[inline]
    pub fn hash(&self, idx: usize) -> u64 {
        self.hashes[idx]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{DictionaryArray, Float64Array, Int32Array, Int64Array, StringArray};
    use arrow::datatypes::Int8Type;

    use super::*;

    fn column_hashes(array: ArrayRef) -> Vec<u64> {
        let kernel = create_row_hash_kernel(array.data_type()).unwrap();
        let mut hashes = vec![0u64; array.len()];
        kernel.update_hash(&array, &mut hashes).unwrap();
        hashes
    }

    #[test]
    fn equal_values_hash_equally_across_types() {
        let ints: ArrayRef = Arc::new(Int32Array::from(vec![Some(1), None, Some(7)]));
        let longs: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None, Some(7)]));
        let floats: ArrayRef = Arc::new(Float64Array::from(vec![Some(1.0), None, Some(7.0)]));
        assert_eq!(column_hashes(ints.clone()), column_hashes(longs));
        assert_eq!(column_hashes(ints), column_hashes(floats));
    }

    #[test]
    fn dictionary_hashes_decoded_values() {
        let plain: ArrayRef = Arc::new(StringArray::from(vec![Some("b"), Some("a"), None, Some("b")]));
        let dict: DictionaryArray<Int8Type> = vec![Some("b"), Some("a"), None, Some("b")]
            .into_iter()
            .collect();
        let dict: ArrayRef = Arc::new(dict);
        assert_eq!(column_hashes(plain), column_hashes(dict.clone()));

        let kernel = create_row_hash_kernel(dict.data_type()).unwrap();
        assert_eq!(kernel.to_hash(&dict, 3).unwrap(), hash_str("b"));
        assert_eq!(kernel.to_hash(&dict, 2).unwrap(), hash_null());
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let err = create_row_hash_kernel(&DataType::Binary).err().unwrap();
        assert_eq!(err.code(), Code::TypeError);
    }
}
