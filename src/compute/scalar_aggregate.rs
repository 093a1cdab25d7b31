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

//! Whole-array reductions
//!
//! Reduces one array (one group's values) to a single [`ScalarValue`] using
//! the arrow aggregate kernels where they fit. Output types follow the
//! grouped fast paths in `group_aggregates`:
//! - sum/prod: `Int64` for signed integers and booleans, `UInt64` for
//!   unsigned integers, floats keep their width
//! - min/max/first/last: the (dictionary decoded) input type
//! - mean/var/std: `Float32` for `Float32` input, otherwise `Float64`
//! - length: `Int64`

use std::cmp::Ordering;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute;
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};

use super::aggregate_kernels::{AggregationOpId, Reduction};
use crate::data_types::value_type;
use crate::error::{Code, CylonError, CylonResult};
use crate::scalar::ScalarValue;

fn empty_input_error(reduction: Reduction) -> CylonError {
    CylonError::new(
        Code::Invalid,
        format!("{} over an array with no contributing elements", reduction),
    )
}

/// Compute `reduction` over every element of `values`
pub fn reduce_array(values: &ArrayRef, reduction: Reduction) -> CylonResult<ScalarValue> {
    let mut values = match values.data_type() {
        DataType::Dictionary(_, _) => compute::cast(values, value_type(values.data_type()))?,
        _ => values.clone(),
    };
    if reduction.skip_missing {
        let present = compute::is_not_null(values.as_ref())?;
        values = compute::filter(values.as_ref(), &present)?;
    }
    let has_missing = values.logical_nulls().is_some_and(|nulls| nulls.null_count() > 0);

    match reduction.op {
        AggregationOpId::Length => Ok(ScalarValue::Int64(Some(values.len() as i64))),
        AggregationOpId::First | AggregationOpId::Last => {
            if values.is_empty() {
                return Err(empty_input_error(reduction));
            }
            let row = if reduction.op == AggregationOpId::First { 0 } else { values.len() - 1 };
            ScalarValue::try_from_array(values.as_ref(), row)
        }
        AggregationOpId::Sum => sum_array(&values, has_missing),
        AggregationOpId::Prod => product_array(&values, has_missing),
        AggregationOpId::Min | AggregationOpId::Max => extremum_array(&values, has_missing, reduction),
        AggregationOpId::Mean | AggregationOpId::Var | AggregationOpId::Std => {
            moments_array(&values, has_missing, reduction)
        }
    }
}

fn sum_array(values: &ArrayRef, has_missing: bool) -> CylonResult<ScalarValue> {
    match values.data_type() {
        DataType::Float32 => {
            let arr = values.as_primitive::<Float32Type>();
            Ok(ScalarValue::Float32((!has_missing).then(|| arr.values().iter().fold(0.0, |a, b| a + b))))
        }
        DataType::Float64 => {
            let arr = values.as_primitive::<Float64Type>();
            Ok(ScalarValue::Float64((!has_missing).then(|| arr.values().iter().fold(0.0, |a, b| a + b))))
        }
        dt if is_signed_like(dt) => {
            let widened = compute::cast(values, &DataType::Int64)?;
            let arr = widened.as_primitive::<Int64Type>();
            Ok(ScalarValue::Int64((!has_missing).then(|| compute::sum(arr).unwrap_or(0))))
        }
        dt if is_unsigned(dt) => {
            let widened = compute::cast(values, &DataType::UInt64)?;
            let arr = widened.as_primitive::<UInt64Type>();
            Ok(ScalarValue::UInt64((!has_missing).then(|| compute::sum(arr).unwrap_or(0))))
        }
        dt => Err(CylonError::new(
            Code::TypeError,
            format!("Sum not supported for data type: {:?}", dt),
        )),
    }
}

fn product_array(values: &ArrayRef, has_missing: bool) -> CylonResult<ScalarValue> {
    match values.data_type() {
        DataType::Float32 => {
            let arr = values.as_primitive::<Float32Type>();
            Ok(ScalarValue::Float32((!has_missing).then(|| arr.values().iter().fold(1.0, |a, b| a * b))))
        }
        DataType::Float64 => {
            let arr = values.as_primitive::<Float64Type>();
            Ok(ScalarValue::Float64((!has_missing).then(|| arr.values().iter().fold(1.0, |a, b| a * b))))
        }
        dt if is_signed_like(dt) => {
            let widened = compute::cast(values, &DataType::Int64)?;
            let arr = widened.as_primitive::<Int64Type>();
            let product = arr.values().iter().fold(1i64, |a, &b| a.wrapping_mul(b));
            Ok(ScalarValue::Int64((!has_missing).then_some(product)))
        }
        dt if is_unsigned(dt) => {
            let widened = compute::cast(values, &DataType::UInt64)?;
            let arr = widened.as_primitive::<UInt64Type>();
            let product = arr.values().iter().fold(1u64, |a, &b| a.wrapping_mul(b));
            Ok(ScalarValue::UInt64((!has_missing).then_some(product)))
        }
        dt => Err(CylonError::new(
            Code::TypeError,
            format!("Product not supported for data type: {:?}", dt),
        )),
    }
}

fn is_signed_like(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Null
            | DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
    )
}

fn is_unsigned(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
    )
}

fn extremum_array(values: &ArrayRef, has_missing: bool, reduction: Reduction) -> CylonResult<ScalarValue> {
    let max = reduction.op == AggregationOpId::Max;
    if has_missing {
        return ScalarValue::new_null(values.data_type());
    }

    macro_rules! integer_extremum {
        ($t:ty, $variant:ident) => {{
            let arr = values.as_primitive::<$t>();
            let best = if max { compute::max(arr) } else { compute::min(arr) };
            best.map(|v| ScalarValue::$variant(Some(v)))
        }};
    }
    // any NaN wins, otherwise the total order decides (-0.0 below 0.0)
    macro_rules! float_extremum {
        ($t:ty, $variant:ident) => {{
            let wanted = if max { Ordering::Greater } else { Ordering::Less };
            let elements = values.as_primitive::<$t>().values();
            let mut best = elements.first().copied();
            for &v in elements.iter().skip(1) {
                best = match best {
                    Some(b) if b.is_nan() => Some(b),
                    Some(_) if v.is_nan() => Some(v),
                    Some(b) if v.total_cmp(&b) == wanted => Some(v),
                    current => current,
                };
            }
            best.map(|v| ScalarValue::$variant(Some(v)))
        }};
    }

    let best = match values.data_type() {
        DataType::Null => None,
        DataType::Boolean => {
            let arr = values.as_boolean();
            let best = if max { compute::max_boolean(arr) } else { compute::min_boolean(arr) };
            best.map(|v| ScalarValue::Boolean(Some(v)))
        }
        DataType::Int8 => integer_extremum!(Int8Type, Int8),
        DataType::Int16 => integer_extremum!(Int16Type, Int16),
        DataType::Int32 => integer_extremum!(Int32Type, Int32),
        DataType::Int64 => integer_extremum!(Int64Type, Int64),
        DataType::UInt8 => integer_extremum!(UInt8Type, UInt8),
        DataType::UInt16 => integer_extremum!(UInt16Type, UInt16),
        DataType::UInt32 => integer_extremum!(UInt32Type, UInt32),
        DataType::UInt64 => integer_extremum!(UInt64Type, UInt64),
        DataType::Float32 => float_extremum!(Float32Type, Float32),
        DataType::Float64 => float_extremum!(Float64Type, Float64),
        DataType::Utf8 => {
            let arr = values.as_string::<i32>();
            let best = if max { compute::max_string(arr) } else { compute::min_string(arr) };
            best.map(|v| ScalarValue::Utf8(Some(v.to_string())))
        }
        DataType::LargeUtf8 => {
            let arr = values.as_string::<i64>();
            let best = if max { compute::max_string(arr) } else { compute::min_string(arr) };
            best.map(|v| ScalarValue::LargeUtf8(Some(v.to_string())))
        }
        dt => {
            return Err(CylonError::new(
                Code::TypeError,
                format!("{} not supported for data type: {:?}", reduction, dt),
            ))
        }
    };
    best.ok_or_else(|| empty_input_error(reduction))
}

fn moments_array(values: &ArrayRef, has_missing: bool, reduction: Reduction) -> CylonResult<ScalarValue> {
    let narrow = match values.data_type() {
        DataType::Float32 => true,
        dt if is_signed_like(dt) || is_unsigned(dt) || dt == &DataType::Float64 => false,
        dt => {
            return Err(CylonError::new(
                Code::TypeError,
                format!("{} not supported for data type: {:?}", reduction, dt),
            ))
        }
    };

    let result = if has_missing {
        None
    } else {
        let widened = compute::cast(values, &DataType::Float64)?;
        let elements = widened.as_primitive::<Float64Type>().values();
        Some(match reduction.op {
            AggregationOpId::Mean => {
                if elements.is_empty() {
                    return Err(empty_input_error(reduction));
                }
                elements.iter().fold(0.0, |a, b| a + b) / elements.len() as f64
            }
            AggregationOpId::Std => sample_variance(elements).sqrt(),
            _ => sample_variance(elements),
        })
    };

    Ok(if narrow {
        ScalarValue::Float32(result.map(|v| v as f32))
    } else {
        ScalarValue::Float64(result)
    })
}

/// Sum of squared deviations over `n - 1`, NaN below two elements
fn sample_variance(elements: &[f64]) -> f64 {
    let n = elements.len();
    if n <= 1 {
        return f64::NAN;
    }
    let mean = elements.iter().fold(0.0, |a, b| a + b) / n as f64;
    let squares = elements.iter().fold(0.0, |acc, v| {
        let delta = v - mean;
        acc + delta * delta
    });
    squares / (n - 1) as f64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{BooleanArray, DictionaryArray, Float32Array, Float64Array, Int8Array, NullArray, StringArray};

    use super::*;

    fn reduce(values: ArrayRef, reduction: Reduction) -> CylonResult<ScalarValue> {
        reduce_array(&values, reduction)
    }

    #[test]
    fn sums_widen_and_wrap() {
        let values: ArrayRef = Arc::new(Int8Array::from(vec![100, 100, 100]));
        assert_eq!(reduce(values, Reduction::new(AggregationOpId::Sum)).unwrap(), ScalarValue::Int64(Some(300)));

        let values: ArrayRef = Arc::new(BooleanArray::from(vec![true, false, true]));
        assert_eq!(reduce(values, Reduction::new(AggregationOpId::Sum)).unwrap(), ScalarValue::Int64(Some(2)));

        let values: ArrayRef = Arc::new(arrow::array::Int64Array::from(vec![i64::MAX, 2]));
        assert_eq!(
            reduce(values, Reduction::new(AggregationOpId::Prod)).unwrap(),
            ScalarValue::Int64(Some(-2))
        );
    }

    #[test]
    fn missing_values_poison_unless_skipped() {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![Some(1.5), None, Some(2.0)]));
        assert_eq!(
            reduce(values.clone(), Reduction::new(AggregationOpId::Sum)).unwrap(),
            ScalarValue::Float64(None)
        );
        assert_eq!(
            reduce(values.clone(), Reduction::skip_missing(AggregationOpId::Sum)).unwrap(),
            ScalarValue::Float64(Some(3.5))
        );
        assert_eq!(
            reduce(values.clone(), Reduction::new(AggregationOpId::Last)).unwrap(),
            ScalarValue::Float64(Some(2.0))
        );
        assert_eq!(
            reduce(values, Reduction::skip_missing(AggregationOpId::Length)).unwrap(),
            ScalarValue::Int64(Some(2))
        );
    }

    #[test]
    fn empty_after_skipping() {
        let values: ArrayRef = Arc::new(NullArray::new(3));
        let skip = Reduction::skip_missing;
        assert_eq!(reduce(values.clone(), skip(AggregationOpId::Sum)).unwrap(), ScalarValue::Int64(Some(0)));
        assert_eq!(reduce(values.clone(), skip(AggregationOpId::Prod)).unwrap(), ScalarValue::Int64(Some(1)));
        match reduce(values.clone(), skip(AggregationOpId::Var)).unwrap() {
            ScalarValue::Float64(Some(v)) => assert!(v.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
        for op in [AggregationOpId::Mean, AggregationOpId::Min, AggregationOpId::First] {
            assert_eq!(reduce(values.clone(), skip(op)).unwrap_err().code(), Code::Invalid);
        }
        assert_eq!(reduce(values, Reduction::new(AggregationOpId::Min)).unwrap(), ScalarValue::Null);
    }

    #[test]
    fn float_extrema() {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![3.0, f64::NAN, 1.0]));
        for op in [AggregationOpId::Min, AggregationOpId::Max] {
            match reduce(values.clone(), Reduction::new(op)).unwrap() {
                ScalarValue::Float64(Some(v)) => assert!(v.is_nan()),
                other => panic!("unexpected {:?}", other),
            }
        }
        let values: ArrayRef = Arc::new(Float64Array::from(vec![0.0, -0.0, f64::INFINITY]));
        let min = reduce(values, Reduction::new(AggregationOpId::Min)).unwrap();
        assert!(min.is_equal(&ScalarValue::Float64(Some(-0.0))));
    }

    #[test]
    fn strings_and_dictionaries() {
        let dict: DictionaryArray<Int8Type> = vec![Some("b"), None, Some("a")].into_iter().collect();
        let values: ArrayRef = Arc::new(dict);
        assert_eq!(
            reduce(values.clone(), Reduction::skip_missing(AggregationOpId::Min)).unwrap(),
            ScalarValue::from("a")
        );
        assert_eq!(
            reduce(values.clone(), Reduction::new(AggregationOpId::Max)).unwrap(),
            ScalarValue::Utf8(None)
        );
        let err = reduce(values, Reduction::new(AggregationOpId::Mean)).unwrap_err();
        assert_eq!(err.code(), Code::TypeError);

        let values: ArrayRef = Arc::new(StringArray::from(vec!["x", "y"]));
        assert_eq!(reduce(values, Reduction::new(AggregationOpId::Sum)).unwrap_err().code(), Code::TypeError);
    }

    #[test]
    fn moments_keep_float32() {
        let values: ArrayRef = Arc::new(Float32Array::from(vec![1.0, 2.0, 3.0, 4.0]));
        match reduce(values.clone(), Reduction::new(AggregationOpId::Var)).unwrap() {
            ScalarValue::Float32(Some(v)) => assert!((v - 5.0 / 3.0).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            reduce(values, Reduction::new(AggregationOpId::Mean)).unwrap(),
            ScalarValue::Float32(Some(2.5))
        );
    }
}
