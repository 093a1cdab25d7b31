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

//! Scalar values
//!
//! A `ScalarValue` is one typed element read out of an Arrow column, or
//! produced by a user function for one group. Key lookups and the apply
//! engine's output buffers work in terms of scalars; the partitioner itself
//! works on whole columns and never materialises them.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use arrow::array::{
    new_null_array, Array, ArrayRef, AsArray, BooleanArray, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, LargeStringArray, StringArray, UInt16Array, UInt32Array,
    UInt64Array, UInt8Array,
};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};

use crate::arrow::arrow_comparator::NullOrder;
use crate::arrow::arrow_hash_kernels::{hash_float, hash_integer, hash_null, hash_str};
use crate::arrow::arrow_types::{cmp_integer_float, float_as_integer, float_cmp, float_eq};
use crate::data_types::value_type;
use crate::error::{Code, CylonError, CylonResult};

/// A single typed value, `None` payloads being typed nulls
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Boolean(Option<bool>),
    Int8(Option<i8>),
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    UInt8(Option<u8>),
    UInt16(Option<u16>),
    UInt32(Option<u32>),
    UInt64(Option<u64>),
    Float32(Option<f32>),
    Float64(Option<f64>),
    Utf8(Option<String>),
    LargeUtf8(Option<String>),
}

/// Logical view of a scalar used for key semantics
#[derive(Clone, Copy)]
enum Element<'a> {
    Null,
    Int(i128),
    Float(f64),
    Str(&'a str),
}

fn type_error(message: String) -> CylonError {
    CylonError::new(Code::TypeError, message)
}

impl ScalarValue {
    /// A null of the given type
    pub fn new_null(data_type: &DataType) -> CylonResult<ScalarValue> {
        Ok(match value_type(data_type) {
            DataType::Null => ScalarValue::Null,
            DataType::Boolean => ScalarValue::Boolean(None),
            DataType::Int8 => ScalarValue::Int8(None),
            DataType::Int16 => ScalarValue::Int16(None),
            DataType::Int32 => ScalarValue::Int32(None),
            DataType::Int64 => ScalarValue::Int64(None),
            DataType::UInt8 => ScalarValue::UInt8(None),
            DataType::UInt16 => ScalarValue::UInt16(None),
            DataType::UInt32 => ScalarValue::UInt32(None),
            DataType::UInt64 => ScalarValue::UInt64(None),
            DataType::Float32 => ScalarValue::Float32(None),
            DataType::Float64 => ScalarValue::Float64(None),
            DataType::Utf8 => ScalarValue::Utf8(None),
            DataType::LargeUtf8 => ScalarValue::LargeUtf8(None),
            other => return Err(type_error(format!("Unsupported scalar type {:?}", other))),
        })
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int8(_) => DataType::Int8,
            ScalarValue::Int16(_) => DataType::Int16,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt8(_) => DataType::UInt8,
            ScalarValue::UInt16(_) => DataType::UInt16,
            ScalarValue::UInt32(_) => DataType::UInt32,
            ScalarValue::UInt64(_) => DataType::UInt64,
            ScalarValue::Float32(_) => DataType::Float32,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::LargeUtf8(_) => DataType::LargeUtf8,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.element(), Element::Null)
    }

    fn element(&self) -> Element<'_> {
        match self {
            ScalarValue::Null => Element::Null,
            ScalarValue::Boolean(v) => v.map_or(Element::Null, |v| Element::Int(v as i128)),
            ScalarValue::Int8(v) => v.map_or(Element::Null, |v| Element::Int(v as i128)),
            ScalarValue::Int16(v) => v.map_or(Element::Null, |v| Element::Int(v as i128)),
            ScalarValue::Int32(v) => v.map_or(Element::Null, |v| Element::Int(v as i128)),
            ScalarValue::Int64(v) => v.map_or(Element::Null, |v| Element::Int(v as i128)),
            ScalarValue::UInt8(v) => v.map_or(Element::Null, |v| Element::Int(v as i128)),
            ScalarValue::UInt16(v) => v.map_or(Element::Null, |v| Element::Int(v as i128)),
            ScalarValue::UInt32(v) => v.map_or(Element::Null, |v| Element::Int(v as i128)),
            ScalarValue::UInt64(v) => v.map_or(Element::Null, |v| Element::Int(v as i128)),
            ScalarValue::Float32(v) => v.map_or(Element::Null, |v| Element::Float(v as f64)),
            ScalarValue::Float64(v) => v.map_or(Element::Null, Element::Float),
            ScalarValue::Utf8(v) | ScalarValue::LargeUtf8(v) => {
                v.as_deref().map_or(Element::Null, Element::Str)
            }
        }
    }

    /// Read the element at `row` of `array`, decoding dictionaries
    pub fn try_from_array(array: &dyn Array, row: usize) -> CylonResult<ScalarValue> {
        if row >= array.len() {
            return Err(CylonError::new(
                Code::IndexError,
                format!("Row {} out of range for array of length {}", row, array.len()),
            ));
        }

        if let Some(dict) = array.as_any_dictionary_opt() {
            if dict.keys().is_null(row) {
                return ScalarValue::new_null(array.data_type());
            }
            let key = dictionary_key(dict.keys(), row)?;
            return ScalarValue::try_from_array(dict.values().as_ref(), key);
        }

        if array.data_type() == &DataType::Null {
            return Ok(ScalarValue::Null);
        }
        if array.is_null(row) {
            return ScalarValue::new_null(array.data_type());
        }

        Ok(match array.data_type() {
            DataType::Boolean => ScalarValue::Boolean(Some(array.as_boolean().value(row))),
            DataType::Int8 => ScalarValue::Int8(Some(array.as_primitive::<Int8Type>().value(row))),
            DataType::Int16 => ScalarValue::Int16(Some(array.as_primitive::<Int16Type>().value(row))),
            DataType::Int32 => ScalarValue::Int32(Some(array.as_primitive::<Int32Type>().value(row))),
            DataType::Int64 => ScalarValue::Int64(Some(array.as_primitive::<Int64Type>().value(row))),
            DataType::UInt8 => ScalarValue::UInt8(Some(array.as_primitive::<UInt8Type>().value(row))),
            DataType::UInt16 => ScalarValue::UInt16(Some(array.as_primitive::<UInt16Type>().value(row))),
            DataType::UInt32 => ScalarValue::UInt32(Some(array.as_primitive::<UInt32Type>().value(row))),
            DataType::UInt64 => ScalarValue::UInt64(Some(array.as_primitive::<UInt64Type>().value(row))),
            DataType::Float32 => ScalarValue::Float32(Some(array.as_primitive::<Float32Type>().value(row))),
            DataType::Float64 => ScalarValue::Float64(Some(array.as_primitive::<Float64Type>().value(row))),
            DataType::Utf8 => ScalarValue::Utf8(Some(array.as_string::<i32>().value(row).to_string())),
            DataType::LargeUtf8 => ScalarValue::LargeUtf8(Some(array.as_string::<i64>().value(row).to_string())),
            other => return Err(type_error(format!("Unsupported scalar type {:?}", other))),
        })
    }

    /// Key equality
    ///
    /// Nulls are equal to each other, NaN equals NaN, `-0.0` differs from
    /// `0.0`, and numbers compare by value regardless of width, signedness or
    /// float-ness. Strings never equal numbers.
    pub fn is_equal(&self, other: &ScalarValue) -> bool {
        match (self.element(), other.element()) {
            (Element::Null, Element::Null) => true,
            (Element::Int(a), Element::Int(b)) => a == b,
            (Element::Float(a), Element::Float(b)) => float_eq(a, b),
            (Element::Int(i), Element::Float(f)) | (Element::Float(f), Element::Int(i)) => {
                float_as_integer(f) == Some(i)
            }
            (Element::Str(a), Element::Str(b)) => a == b,
            _ => false,
        }
    }

    /// Hash consistent with [`ScalarValue::is_equal`] and with the column hash kernels
    pub fn hash_key(&self) -> u64 {
        match self.element() {
            Element::Null => hash_null(),
            Element::Int(i) => hash_integer(i),
            Element::Float(f) => hash_float(f),
            Element::Str(s) => hash_str(s),
        }
    }

    /// Total order used for sorting keys
    ///
    /// Numbers sort before strings; NaN sorts after every number.
    pub fn total_cmp(&self, other: &ScalarValue, null_order: NullOrder) -> Ordering {
        match (self.element(), other.element()) {
            (Element::Null, Element::Null) => Ordering::Equal,
            (Element::Null, _) => null_order.null_vs_value(),
            (_, Element::Null) => null_order.null_vs_value().reverse(),
            (Element::Int(a), Element::Int(b)) => a.cmp(&b),
            (Element::Float(a), Element::Float(b)) => float_cmp(a, b),
            (Element::Int(i), Element::Float(f)) => cmp_integer_float(i, f),
            (Element::Float(f), Element::Int(i)) => cmp_integer_float(i, f).reverse(),
            (Element::Str(a), Element::Str(b)) => a.cmp(b),
            (Element::Str(_), _) => Ordering::Greater,
            (_, Element::Str(_)) => Ordering::Less,
        }
    }

    /// Convert to `data_type`, failing when the value is not representable
    pub fn cast_to(&self, data_type: &DataType) -> CylonResult<ScalarValue> {
        let target = value_type(data_type);
        if &self.data_type() == target {
            return Ok(self.clone());
        }
        let element = self.element();
        if let Element::Null = element {
            return ScalarValue::new_null(target);
        }

        let not_representable =
            || type_error(format!("Cannot represent {} as {:?}", self, target));
        let integer = || -> CylonResult<i128> {
            match element {
                Element::Int(i) => Ok(i),
                Element::Float(f) => float_as_integer(f).ok_or_else(not_representable),
                _ => Err(not_representable()),
            }
        };

        Ok(match target {
            DataType::Boolean => match integer()? {
                0 => ScalarValue::Boolean(Some(false)),
                1 => ScalarValue::Boolean(Some(true)),
                _ => return Err(not_representable()),
            },
            DataType::Int8 => ScalarValue::Int8(Some(i8::try_from(integer()?).map_err(|_| not_representable())?)),
            DataType::Int16 => ScalarValue::Int16(Some(i16::try_from(integer()?).map_err(|_| not_representable())?)),
            DataType::Int32 => ScalarValue::Int32(Some(i32::try_from(integer()?).map_err(|_| not_representable())?)),
            DataType::Int64 => ScalarValue::Int64(Some(i64::try_from(integer()?).map_err(|_| not_representable())?)),
            DataType::UInt8 => ScalarValue::UInt8(Some(u8::try_from(integer()?).map_err(|_| not_representable())?)),
            DataType::UInt16 => ScalarValue::UInt16(Some(u16::try_from(integer()?).map_err(|_| not_representable())?)),
            DataType::UInt32 => ScalarValue::UInt32(Some(u32::try_from(integer()?).map_err(|_| not_representable())?)),
            DataType::UInt64 => ScalarValue::UInt64(Some(u64::try_from(integer()?).map_err(|_| not_representable())?)),
            DataType::Float32 => match element {
                Element::Int(i) => ScalarValue::Float32(Some(i as f32)),
                Element::Float(f) => ScalarValue::Float32(Some(f as f32)),
                _ => return Err(not_representable()),
            },
            DataType::Float64 => match element {
                Element::Int(i) => ScalarValue::Float64(Some(i as f64)),
                Element::Float(f) => ScalarValue::Float64(Some(f)),
                _ => return Err(not_representable()),
            },
            DataType::Utf8 => match element {
                Element::Str(s) => ScalarValue::Utf8(Some(s.to_string())),
                _ => return Err(not_representable()),
            },
            DataType::LargeUtf8 => match element {
                Element::Str(s) => ScalarValue::LargeUtf8(Some(s.to_string())),
                _ => return Err(not_representable()),
            },
            _ => return Err(not_representable()),
        })
    }

    /// Build an array of `data_type` from scalars, converting each one
    pub fn iter_to_array(
        data_type: &DataType,
        values: impl IntoIterator<Item = ScalarValue>,
    ) -> CylonResult<ArrayRef> {
        let target = value_type(data_type);

        macro_rules! build {
            ($array:ty, $variant:ident) => {{
                let mut out = Vec::new();
                for value in values {
                    match value.cast_to(target)? {
                        ScalarValue::$variant(v) => out.push(v),
                        other => {
                            return Err(type_error(format!(
                                "Expected {:?} value, found {:?}",
                                target,
                                other.data_type()
                            )))
                        }
                    }
                }
                Arc::new(<$array>::from(out)) as ArrayRef
            }};
        }

        Ok(match target {
            DataType::Null => {
                let mut len = 0;
                for value in values {
                    if !value.is_null() {
                        return Err(type_error(format!("Cannot store {} in a null column", value)));
                    }
                    len += 1;
                }
                new_null_array(&DataType::Null, len)
            }
            DataType::Boolean => build!(BooleanArray, Boolean),
            DataType::Int8 => build!(Int8Array, Int8),
            DataType::Int16 => build!(Int16Array, Int16),
            DataType::Int32 => build!(Int32Array, Int32),
            DataType::Int64 => build!(Int64Array, Int64),
            DataType::UInt8 => build!(UInt8Array, UInt8),
            DataType::UInt16 => build!(UInt16Array, UInt16),
            DataType::UInt32 => build!(UInt32Array, UInt32),
            DataType::UInt64 => build!(UInt64Array, UInt64),
            DataType::Float32 => build!(Float32Array, Float32),
            DataType::Float64 => build!(Float64Array, Float64),
            DataType::Utf8 => build!(StringArray, Utf8),
            DataType::LargeUtf8 => build!(LargeStringArray, LargeUtf8),
            other => return Err(type_error(format!("Unsupported scalar type {:?}", other))),
        })
    }
}

/// Key of a dictionary row as a position in the values array
fn dictionary_key(keys: &dyn Array, row: usize) -> CylonResult<usize> {
    let key = match keys.data_type() {
        DataType::Int8 => keys.as_primitive::<Int8Type>().value(row) as i128,
        DataType::Int16 => keys.as_primitive::<Int16Type>().value(row) as i128,
        DataType::Int32 => keys.as_primitive::<Int32Type>().value(row) as i128,
        DataType::Int64 => keys.as_primitive::<Int64Type>().value(row) as i128,
        DataType::UInt8 => keys.as_primitive::<UInt8Type>().value(row) as i128,
        DataType::UInt16 => keys.as_primitive::<UInt16Type>().value(row) as i128,
        DataType::UInt32 => keys.as_primitive::<UInt32Type>().value(row) as i128,
        DataType::UInt64 => keys.as_primitive::<UInt64Type>().value(row) as i128,
        other => return Err(type_error(format!("Unsupported dictionary key type {:?}", other))),
    };
    usize::try_from(key)
        .map_err(|_| CylonError::new(Code::Invalid, format!("Negative dictionary key {}", key)))
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.element() {
            Element::Null => write!(f, "null"),
            Element::Int(i) => match self {
                ScalarValue::Boolean(Some(b)) => write!(f, "{}", b),
                _ => write!(f, "{}", i),
            },
            Element::Float(v) => write!(f, "{}", v),
            Element::Str(s) => write!(f, "{:?}", s),
        }
    }
}

macro_rules! impl_from_native {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl From<$t> for ScalarValue {
                fn from(value: $t) -> Self {
                    ScalarValue::$variant(Some(value))
                }
            }

            impl From<Option<$t>> for ScalarValue {
                fn from(value: Option<$t>) -> Self {
                    ScalarValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_native!(
    bool => Boolean,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => Utf8
);

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(Some(value.to_string()))
    }
}
