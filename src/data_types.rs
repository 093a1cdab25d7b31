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

//! Element type classification and promotion
//!
//! The apply engine materialises output columns from per-group results whose
//! types are only known at run time. When a later group produces a value that
//! does not fit the column built so far, the column is widened to the common
//! promotion of both types computed here.

use arrow::datatypes::DataType;

use crate::error::{Code, CylonError, CylonResult};

/// Coarse classification used by the promotion rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeClass {
    Null,
    Boolean,
    Signed(u8),
    Unsigned(u8),
    Float(u8),
    Utf8,
    LargeUtf8,
    Other,
}

fn classify(data_type: &DataType) -> TypeClass {
    match data_type {
        DataType::Null => TypeClass::Null,
        DataType::Boolean => TypeClass::Boolean,
        DataType::Int8 => TypeClass::Signed(8),
        DataType::Int16 => TypeClass::Signed(16),
        DataType::Int32 => TypeClass::Signed(32),
        DataType::Int64 => TypeClass::Signed(64),
        DataType::UInt8 => TypeClass::Unsigned(8),
        DataType::UInt16 => TypeClass::Unsigned(16),
        DataType::UInt32 => TypeClass::Unsigned(32),
        DataType::UInt64 => TypeClass::Unsigned(64),
        DataType::Float32 => TypeClass::Float(32),
        DataType::Float64 => TypeClass::Float(64),
        DataType::Utf8 => TypeClass::Utf8,
        DataType::LargeUtf8 => TypeClass::LargeUtf8,
        _ => TypeClass::Other,
    }
}

fn signed(bits: u8) -> DataType {
    match bits {
        8 => DataType::Int8,
        16 => DataType::Int16,
        32 => DataType::Int32,
        _ => DataType::Int64,
    }
}

fn unsigned(bits: u8) -> DataType {
    match bits {
        8 => DataType::UInt8,
        16 => DataType::UInt16,
        32 => DataType::UInt32,
        _ => DataType::UInt64,
    }
}

fn float(bits: u8) -> DataType {
    if bits == 32 {
        DataType::Float32
    } else {
        DataType::Float64
    }
}

/// Strip dictionary encoding, returning the logical value type
pub fn value_type(data_type: &DataType) -> &DataType {
    match data_type {
        DataType::Dictionary(_, values) => value_type(values),
        other => other,
    }
}

/// True for element types the grouping engine can hash, compare and materialise
pub fn is_supported(data_type: &DataType) -> bool {
    classify(value_type(data_type)) != TypeClass::Other
}

/// The common element type of `a` and `b`
///
/// Integers of mixed signedness promote to the wider width, ties going to the
/// unsigned type; integers meeting a float take the float; booleans behave as
/// the narrowest integer. Strings only promote among themselves.
pub fn promote_types(a: &DataType, b: &DataType) -> CylonResult<DataType> {
    let (a, b) = (value_type(a), value_type(b));
    if a == b {
        return Ok(a.clone());
    }

    let promoted = match (classify(a), classify(b)) {
        (TypeClass::Null, _) => Some(b.clone()),
        (_, TypeClass::Null) => Some(a.clone()),
        (TypeClass::Boolean, TypeClass::Signed(_) | TypeClass::Unsigned(_) | TypeClass::Float(_)) => {
            Some(b.clone())
        }
        (TypeClass::Signed(_) | TypeClass::Unsigned(_) | TypeClass::Float(_), TypeClass::Boolean) => {
            Some(a.clone())
        }
        (TypeClass::Signed(x), TypeClass::Signed(y)) => Some(signed(x.max(y))),
        (TypeClass::Unsigned(x), TypeClass::Unsigned(y)) => Some(unsigned(x.max(y))),
        (TypeClass::Signed(s), TypeClass::Unsigned(u)) | (TypeClass::Unsigned(u), TypeClass::Signed(s)) => {
            if s > u {
                Some(signed(s))
            } else {
                Some(unsigned(u))
            }
        }
        (TypeClass::Float(x), TypeClass::Float(y)) => Some(float(x.max(y))),
        (TypeClass::Float(f), TypeClass::Signed(_) | TypeClass::Unsigned(_))
        | (TypeClass::Signed(_) | TypeClass::Unsigned(_), TypeClass::Float(f)) => Some(float(f)),
        (TypeClass::Utf8 | TypeClass::LargeUtf8, TypeClass::Utf8 | TypeClass::LargeUtf8) => {
            Some(DataType::LargeUtf8)
        }
        _ => None,
    };

    promoted.ok_or_else(|| {
        CylonError::new(
            Code::TypeError,
            format!("no common element type for {:?} and {:?}", a, b),
        )
    })
}
