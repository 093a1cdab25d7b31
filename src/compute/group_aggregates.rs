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

//! Grouped aggregate fast paths
//!
//! Every kernel is a single linear scan over the group membership array and
//! the input column, keeping one accumulator per group. No per-group slices
//! are built. Membership uses the grouping encoding: `0` excludes a row and
//! `g + 1` assigns it to group `g`.
//!
//! Output types:
//! - sum/prod: `Int64` for signed integers and booleans, `UInt64` for
//!   unsigned integers (wrapping), floats keep their width
//! - min/max/first/last: the (dictionary decoded) input type
//! - mean/var/std: `Float32` for `Float32` input, otherwise `Float64`
//! - length: `Int64`

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float32Array, Float64Array, Int64Array, PrimitiveArray, UInt64Array};
use arrow::buffer::NullBuffer;
use arrow::compute::{cast, take};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use num_traits::AsPrimitive;

use super::aggregate_kernels::{Adjust, ElementFilter, ReduceOp, Reduction};
use crate::arrow::arrow_comparator::{create_comparator, NullOrder};
use crate::data_types::value_type;
use crate::error::{Code, CylonError, CylonResult};

/// Per-group block bounds of an already materialised row permutation
#[derive(Debug, Clone, Copy)]
pub struct GroupBounds<'a> {
    pub starts: &'a [usize],
    pub ends: &'a [usize],
}

/// What a row contributes to its group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowState {
    Skip,
    Missing(usize),
    Value(usize),
}

struct Scan<'a> {
    membership: &'a [u32],
    nulls: Option<NullBuffer>,
    filter: Option<ElementFilter>,
}

impl<'a> Scan<'a> {
    #[inline]
    fn row(&self, i: usize) -> RowState {
        let g = self.membership[i];
        if g == 0 {
            return RowState::Skip;
        }
        let valid = self.nulls.as_ref().map_or(true, |n| n.is_valid(i));
        if let Some(filter) = self.filter {
            if !filter(valid) {
                return RowState::Skip;
            }
        }
        if valid {
            RowState::Value(g as usize - 1)
        } else {
            RowState::Missing(g as usize - 1)
        }
    }
}

fn empty_group_error(reduction: Reduction, group: usize) -> CylonError {
    CylonError::new(
        Code::Invalid,
        format!("{} over group {} with no contributing elements", reduction, group),
    )
}

/// Compute `reduction` of `values` for every group
///
/// `bounds`, when given, lets `length` read group sizes without rescanning.
pub fn group_aggregate(
    values: &ArrayRef,
    membership: &[u32],
    ngroups: usize,
    reduction: Reduction,
    bounds: Option<GroupBounds<'_>>,
) -> CylonResult<ArrayRef> {
    if membership.len() != values.len() {
        return Err(CylonError::new(
            Code::Invalid,
            format!(
                "membership size {} != column length {}",
                membership.len(),
                values.len()
            ),
        ));
    }
    let descriptor = reduction.descriptor()?;

    let values = match values.data_type() {
        DataType::Dictionary(_, _) => cast(values, value_type(values.data_type()))?,
        _ => values.clone(),
    };
    let scan = Scan {
        membership,
        nulls: values.logical_nulls(),
        filter: descriptor.filter,
    };

    match descriptor.reduce {
        ReduceOp::Count => Ok(count(&scan, ngroups, bounds)),
        ReduceOp::First | ReduceOp::Last => {
            let picks = boundary(&scan, ngroups, descriptor.reduce == ReduceOp::First);
            let mut indices = Vec::with_capacity(ngroups);
            for (g, pick) in picks.into_iter().enumerate() {
                indices.push(pick.ok_or_else(|| empty_group_error(reduction, g))? as u64);
            }
            Ok(take(values.as_ref(), &UInt64Array::from(indices), None)?)
        }
        ReduceOp::Min | ReduceOp::Max => {
            let picks = extremum(&values, &scan, ngroups, descriptor.reduce == ReduceOp::Max)?;
            let mut indices = Vec::with_capacity(ngroups);
            for (g, pick) in picks.into_iter().enumerate() {
                indices.push(match pick {
                    Extremum::Poisoned => None,
                    Extremum::Empty => return Err(empty_group_error(reduction, g)),
                    Extremum::At(row) => Some(row as u64),
                });
            }
            Ok(take(values.as_ref(), &UInt64Array::from(indices), None)?)
        }
        ReduceOp::Add | ReduceOp::Mul => fold(&values, &scan, ngroups, descriptor.reduce == ReduceOp::Add),
        ReduceOp::Moments => {
            let adjust = descriptor.adjust.unwrap_or(Adjust::DivideByCount);
            moments(&values, &scan, ngroups, adjust, reduction)
        }
    }
}

fn count(scan: &Scan<'_>, ngroups: usize, bounds: Option<GroupBounds<'_>>) -> ArrayRef {
    if let (None, Some(bounds)) = (scan.filter, bounds) {
        let lengths = bounds
            .starts
            .iter()
            .zip(bounds.ends)
            .map(|(&start, &end)| (end - start) as i64);
        return Arc::new(Int64Array::from_iter_values(lengths));
    }
    let mut counts = vec![0i64; ngroups];
    for i in 0..scan.membership.len() {
        match scan.row(i) {
            RowState::Value(g) | RowState::Missing(g) => counts[g] += 1,
            RowState::Skip => {}
        }
    }
    Arc::new(Int64Array::from(counts))
}

fn boundary(scan: &Scan<'_>, ngroups: usize, first: bool) -> Vec<Option<usize>> {
    let mut picks = vec![None; ngroups];
    for i in 0..scan.membership.len() {
        match scan.row(i) {
            RowState::Value(g) | RowState::Missing(g) => {
                if !first || picks[g].is_none() {
                    picks[g] = Some(i);
                }
            }
            RowState::Skip => {}
        }
    }
    picks
}

#[derive(Debug, Clone, Copy)]
enum Extremum {
    Empty,
    Poisoned,
    At(usize),
}

fn extremum(values: &ArrayRef, scan: &Scan<'_>, ngroups: usize, max: bool) -> CylonResult<Vec<Extremum>> {
    let comparator = create_comparator(values, NullOrder::NullsLast)?;
    let better = if max { std::cmp::Ordering::Greater } else { std::cmp::Ordering::Less };
    let mut picks = vec![Extremum::Empty; ngroups];
    for i in 0..scan.membership.len() {
        match scan.row(i) {
            RowState::Skip => {}
            RowState::Missing(g) => picks[g] = Extremum::Poisoned,
            RowState::Value(g) => {
                picks[g] = match picks[g] {
                    Extremum::Poisoned => Extremum::Poisoned,
                    Extremum::Empty => Extremum::At(i),
                    Extremum::At(best) if comparator.is_nan(best) => Extremum::At(best),
                    Extremum::At(_) if comparator.is_nan(i) => Extremum::At(i),
                    Extremum::At(best) if comparator.compare(i, best) == better => Extremum::At(i),
                    current => current,
                };
            }
        }
    }
    Ok(picks)
}

/// Sequential fold of every group into `O`, null when a missing element was seen
fn accumulate<T, O>(
    array: &PrimitiveArray<T>,
    scan: &Scan<'_>,
    ngroups: usize,
    seed: O::Native,
    op: fn(O::Native, O::Native) -> O::Native,
) -> ArrayRef
where
    T: ArrowPrimitiveType,
    O: ArrowPrimitiveType,
    T::Native: AsPrimitive<O::Native>,
{
    let mut acc = vec![seed; ngroups];
    let mut poisoned = vec![false; ngroups];
    for i in 0..array.len() {
        match scan.row(i) {
            RowState::Skip => {}
            RowState::Missing(g) => poisoned[g] = true,
            RowState::Value(g) => acc[g] = op(acc[g], array.value(i).as_()),
        }
    }
    let result: PrimitiveArray<O> = acc
        .into_iter()
        .zip(poisoned)
        .map(|(value, poisoned)| if poisoned { None } else { Some(value) })
        .collect();
    Arc::new(result)
}

fn fold(values: &ArrayRef, scan: &Scan<'_>, ngroups: usize, add: bool) -> CylonResult<ArrayRef> {
    macro_rules! fold_signed {
        ($t:ty) => {{
            let array = values.as_primitive::<$t>();
            if add {
                accumulate::<$t, Int64Type>(array, scan, ngroups, 0, i64::wrapping_add)
            } else {
                accumulate::<$t, Int64Type>(array, scan, ngroups, 1, i64::wrapping_mul)
            }
        }};
    }
    macro_rules! fold_unsigned {
        ($t:ty) => {{
            let array = values.as_primitive::<$t>();
            if add {
                accumulate::<$t, UInt64Type>(array, scan, ngroups, 0, u64::wrapping_add)
            } else {
                accumulate::<$t, UInt64Type>(array, scan, ngroups, 1, u64::wrapping_mul)
            }
        }};
    }

    Ok(match values.data_type() {
        DataType::Null | DataType::Boolean => {
            let widened = cast(values, &DataType::Int64)?;
            return fold(&widened, scan, ngroups, add);
        }
        DataType::Int8 => fold_signed!(Int8Type),
        DataType::Int16 => fold_signed!(Int16Type),
        DataType::Int32 => fold_signed!(Int32Type),
        DataType::Int64 => fold_signed!(Int64Type),
        DataType::UInt8 => fold_unsigned!(UInt8Type),
        DataType::UInt16 => fold_unsigned!(UInt16Type),
        DataType::UInt32 => fold_unsigned!(UInt32Type),
        DataType::UInt64 => fold_unsigned!(UInt64Type),
        DataType::Float32 => {
            let array = values.as_primitive::<Float32Type>();
            if add {
                accumulate::<Float32Type, Float32Type>(array, scan, ngroups, 0.0, |a, b| a + b)
            } else {
                accumulate::<Float32Type, Float32Type>(array, scan, ngroups, 1.0, |a, b| a * b)
            }
        }
        DataType::Float64 => {
            let array = values.as_primitive::<Float64Type>();
            if add {
                accumulate::<Float64Type, Float64Type>(array, scan, ngroups, 0.0, |a, b| a + b)
            } else {
                accumulate::<Float64Type, Float64Type>(array, scan, ngroups, 1.0, |a, b| a * b)
            }
        }
        other => {
            return Err(CylonError::new(
                Code::TypeError,
                format!("Cannot sum or multiply values of type {:?}", other),
            ))
        }
    })
}

/// Per-group sums and counts, then the adjust step
fn moments_of<T>(
    array: &PrimitiveArray<T>,
    scan: &Scan<'_>,
    ngroups: usize,
    adjust: Adjust,
    reduction: Reduction,
) -> CylonResult<Vec<Option<f64>>>
where
    T: ArrowPrimitiveType,
    T::Native: AsPrimitive<f64>,
{
    let mut sums = vec![0.0f64; ngroups];
    let mut counts = vec![0usize; ngroups];
    let mut poisoned = vec![false; ngroups];
    for i in 0..array.len() {
        match scan.row(i) {
            RowState::Skip => {}
            RowState::Missing(g) => poisoned[g] = true,
            RowState::Value(g) => {
                sums[g] += array.value(i).as_();
                counts[g] += 1;
            }
        }
    }

    let mut means = Vec::with_capacity(ngroups);
    for g in 0..ngroups {
        if counts[g] == 0 && !poisoned[g] && adjust == Adjust::DivideByCount {
            return Err(empty_group_error(reduction, g));
        }
        means.push(sums[g] / counts[g] as f64);
    }
    if adjust == Adjust::DivideByCount {
        return Ok(means
            .into_iter()
            .zip(poisoned)
            .map(|(mean, poisoned)| if poisoned { None } else { Some(mean) })
            .collect());
    }

    // second pass: squared deviations from the group mean
    let mut squares = vec![0.0f64; ngroups];
    for i in 0..array.len() {
        if let RowState::Value(g) = scan.row(i) {
            let delta: f64 = array.value(i).as_() - means[g];
            squares[g] += delta * delta;
        }
    }
    Ok((0..ngroups)
        .map(|g| {
            if poisoned[g] {
                return None;
            }
            if counts[g] <= 1 {
                return Some(f64::NAN);
            }
            let var = squares[g] / (counts[g] - 1) as f64;
            Some(if adjust == Adjust::SampleStd { var.sqrt() } else { var })
        })
        .collect())
}

fn moments(
    values: &ArrayRef,
    scan: &Scan<'_>,
    ngroups: usize,
    adjust: Adjust,
    reduction: Reduction,
) -> CylonResult<ArrayRef> {
    macro_rules! moments_for {
        ($t:ty) => {
            moments_of::<$t>(values.as_primitive::<$t>(), scan, ngroups, adjust, reduction)?
        };
    }

    let result = match values.data_type() {
        DataType::Null | DataType::Boolean => {
            let widened = cast(values, &DataType::Int64)?;
            return moments(&widened, scan, ngroups, adjust, reduction);
        }
        DataType::Float32 => {
            let result = moments_for!(Float32Type);
            let narrowed: Float32Array = result.into_iter().map(|v| v.map(|v| v as f32)).collect();
            return Ok(Arc::new(narrowed));
        }
        DataType::Int8 => moments_for!(Int8Type),
        DataType::Int16 => moments_for!(Int16Type),
        DataType::Int32 => moments_for!(Int32Type),
        DataType::Int64 => moments_for!(Int64Type),
        DataType::UInt8 => moments_for!(UInt8Type),
        DataType::UInt16 => moments_for!(UInt16Type),
        DataType::UInt32 => moments_for!(UInt32Type),
        DataType::UInt64 => moments_for!(UInt64Type),
        DataType::Float64 => moments_for!(Float64Type),
        other => {
            return Err(CylonError::new(
                Code::TypeError,
                format!("Cannot compute {} of values of type {:?}", reduction, other),
            ))
        }
    };
    Ok(Arc::new(Float64Array::from(result)))
}

#[cfg(test)]
mod tests {
    use arrow::array::{DictionaryArray, StringArray, UInt8Array};

    use super::*;
    use crate::compute::aggregate_kernels::AggregationOpId;

    fn run(values: ArrayRef, membership: &[u32], ngroups: usize, reduction: Reduction) -> ArrayRef {
        group_aggregate(&values, membership, ngroups, reduction, None).unwrap()
    }

    #[test]
    fn sums_widen_integers() {
        let values: ArrayRef = Arc::new(arrow::array::Int8Array::from(vec![100, 100, 1, 2]));
        let out = run(values, &[1, 1, 2, 2], 2, Reduction::new(AggregationOpId::Sum));
        assert_eq!(out.data_type(), &DataType::Int64);
        assert_eq!(out.as_primitive::<Int64Type>().values().to_vec(), vec![200, 3]);

        let values: ArrayRef = Arc::new(UInt8Array::from(vec![250, 10]));
        let out = run(values, &[1, 1], 1, Reduction::new(AggregationOpId::Sum));
        assert_eq!(out.as_primitive::<UInt64Type>().value(0), 260);
    }

    #[test]
    fn excluded_rows_are_ignored() {
        let values: ArrayRef = Arc::new(Int64Array::from(vec![1, 1000, 2]));
        let out = run(values, &[1, 0, 1], 1, Reduction::new(AggregationOpId::Sum));
        assert_eq!(out.as_primitive::<Int64Type>().value(0), 3);
    }

    #[test]
    fn nulls_poison_unless_skipped() {
        let values: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None, Some(4)]));
        let out = run(values.clone(), &[1, 1, 2], 2, Reduction::new(AggregationOpId::Sum));
        assert!(out.is_null(0));
        assert_eq!(out.as_primitive::<Int64Type>().value(1), 4);

        let out = run(values, &[1, 1, 2], 2, Reduction::skip_missing(AggregationOpId::Sum));
        assert_eq!(out.as_primitive::<Int64Type>().value(0), 1);
    }

    #[test]
    fn mean_of_empty_group_is_an_error() {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![None, Some(2.0)]));
        let err = group_aggregate(&values, &[1, 2], 2, Reduction::skip_missing(AggregationOpId::Mean), None)
            .unwrap_err();
        assert_eq!(err.code(), Code::Invalid);

        let out = run(values, &[1, 2], 2, Reduction::skip_missing(AggregationOpId::Var));
        assert!(out.as_primitive::<Float64Type>().value(0).is_nan());
    }

    #[test]
    fn var_is_sample_variance() {
        let values: ArrayRef = Arc::new(Float32Array::from(vec![1.0, 2.0, 3.0, 4.0]));
        let out = run(values, &[1, 1, 1, 1], 1, Reduction::new(AggregationOpId::Var));
        assert_eq!(out.data_type(), &DataType::Float32);
        assert!((out.as_primitive::<Float32Type>().value(0) - 5.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn min_max_propagate_nan() {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![3.0, f64::NAN, 1.0, 2.0]));
        let out = run(values.clone(), &[1, 1, 2, 2], 2, Reduction::new(AggregationOpId::Min));
        let out = out.as_primitive::<Float64Type>();
        assert!(out.value(0).is_nan());
        assert_eq!(out.value(1), 1.0);
        let out = run(values, &[1, 1, 2, 2], 2, Reduction::new(AggregationOpId::Max));
        assert_eq!(out.as_primitive::<Float64Type>().value(1), 2.0);
    }

    #[test]
    fn first_last_and_length_on_strings() {
        let dict: DictionaryArray<Int32Type> = vec![Some("a"), None, Some("c"), Some("d")].into_iter().collect();
        let values: ArrayRef = Arc::new(dict);
        let membership = [1, 1, 2, 1];

        let out = run(values.clone(), &membership, 2, Reduction::new(AggregationOpId::Last));
        let expected: ArrayRef = Arc::new(StringArray::from(vec!["d", "c"]));
        assert_eq!(out.to_data(), expected.to_data());

        let out = run(values.clone(), &membership, 2, Reduction::skip_missing(AggregationOpId::Length));
        assert_eq!(out.as_primitive::<Int64Type>().values().to_vec(), vec![2, 1]);

        let starts = [0usize, 3];
        let ends = [3usize, 4];
        let bounds = GroupBounds { starts: &starts, ends: &ends };
        let out = group_aggregate(&values, &membership, 2, Reduction::new(AggregationOpId::Length), Some(bounds))
            .unwrap();
        assert_eq!(out.as_primitive::<Int64Type>().values().to_vec(), vec![3, 1]);
    }

    #[test]
    fn arithmetic_on_strings_is_a_type_error() {
        let values: ArrayRef = Arc::new(StringArray::from(vec!["a"]));
        let err = group_aggregate(&values, &[1], 1, Reduction::new(AggregationOpId::Sum), None).unwrap_err();
        assert_eq!(err.code(), Code::TypeError);
    }
}
