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

//! Apply / combine tests

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use cylon_groupby::compute::{AggregationOpId, Reduction};
use cylon_groupby::ctx::CylonContext;
use cylon_groupby::error::{Code, CylonError};
use cylon_groupby::groupby::{
    aggregate_table, combine, map_groups, partition, transform, GroupResult, GroupedTable, Transform,
};
use cylon_groupby::scalar::ScalarValue;
use cylon_groupby::table::Table;

fn create_table(columns: Vec<(&str, ArrayRef)>) -> Arc<Table> {
    let columns = columns.into_iter().map(|(name, column)| (name.to_string(), column)).collect();
    Arc::new(Table::from_columns(CylonContext::init(), columns).unwrap())
}

/// a = [1, 1, 2, 2, 3, 3], b = [10, 20, 30, 40, 50, 60]
fn create_ab_table() -> Arc<Table> {
    create_table(vec![
        ("a", Arc::new(Int64Array::from(vec![1, 1, 2, 2, 3, 3]))),
        ("b", Arc::new(Int64Array::from(vec![10, 20, 30, 40, 50, 60]))),
    ])
}

fn grouped_ab() -> GroupedTable {
    partition(create_ab_table(), &[0], false, false).unwrap()
}

fn int64_column(table: &Table, name: &str) -> Vec<Option<i64>> {
    table
        .column_by_name(name)
        .unwrap()
        .as_primitive::<Int64Type>()
        .iter()
        .collect()
}

fn sum_b() -> Transform {
    Transform::reduce("b", Reduction::new(AggregationOpId::Sum))
}

fn first_b_rows(n: usize) -> Transform {
    Transform::columns(&["b"], move |cols| Ok(GroupResult::Vector(cols[0].slice(0, n))))
}

#[test]
fn test_combine_sum() {
    let result = combine(&grouped_ab(), &[sum_b()], true).unwrap();

    assert_eq!(result.column_names(), vec!["a", "b_sum"]);
    assert_eq!(int64_column(&result, "a"), vec![Some(1), Some(2), Some(3)]);
    assert_eq!(int64_column(&result, "b_sum"), vec![Some(30), Some(70), Some(110)]);
}

#[test]
fn test_combine_without_keys_and_named_output() {
    let result = combine(&grouped_ab(), &[sum_b().named("total")], false).unwrap();
    assert_eq!(result.column_names(), vec!["total"]);
    assert_eq!(int64_column(&result, "total"), vec![Some(30), Some(70), Some(110)]);
}

#[test]
fn test_combine_vector_results() {
    let one = combine(&grouped_ab(), &[first_b_rows(1)], true).unwrap();
    assert_eq!(one.column_names(), vec!["a", "b_function"]);
    assert_eq!(int64_column(&one, "a"), vec![Some(1), Some(2), Some(3)]);
    assert_eq!(int64_column(&one, "b_function"), vec![Some(10), Some(30), Some(50)]);

    let two = combine(&grouped_ab(), &[first_b_rows(2)], true).unwrap();
    assert_eq!(two.rows(), 6);
    assert_eq!(
        int64_column(&two, "a"),
        vec![Some(1), Some(1), Some(2), Some(2), Some(3), Some(3)]
    );
    assert_eq!(
        int64_column(&two, "b_function"),
        vec![Some(10), Some(20), Some(30), Some(40), Some(50), Some(60)]
    );
}

#[test]
fn test_combine_widens_scalars() {
    let widening = Transform::group(|group| {
        let value = if group.group() == 2 {
            ScalarValue::from(0.5f64)
        } else {
            ScalarValue::from(group.group() as i64)
        };
        Ok(value.into())
    });
    let result = combine(&grouped_ab(), &[widening], true).unwrap();

    let x1 = result.column_by_name("x1").unwrap();
    assert_eq!(x1.data_type(), &DataType::Float64);
    assert_eq!(x1.as_primitive::<Float64Type>().values().to_vec(), vec![0.0, 1.0, 0.5]);
}

#[test]
fn test_combine_widens_vectors() {
    let widening = Transform::group(|group| {
        let array: ArrayRef = if group.group() == 0 {
            Arc::new(Int32Array::from(vec![1, 2]))
        } else {
            Arc::new(Int64Array::from(vec![i64::MAX]))
        };
        Ok(array.into())
    });
    let result = combine(&grouped_ab(), &[widening], true).unwrap();

    assert_eq!(result.column_by_name("x1").unwrap().data_type(), &DataType::Int64);
    assert_eq!(
        int64_column(&result, "x1"),
        vec![Some(1), Some(2), Some(i64::MAX), Some(i64::MAX)]
    );
    assert_eq!(int64_column(&result, "a"), vec![Some(1), Some(1), Some(2), Some(3)]);
}

#[test]
fn test_combine_row_dropping() {
    let drop_middle = Transform::group(|group| {
        if group.group() == 1 {
            Ok(GroupResult::empty())
        } else {
            Ok(GroupResult::table([("x", group.column("b")?)]))
        }
    });
    let result = combine(&grouped_ab(), &[drop_middle.clone()], true).unwrap();

    assert_eq!(result.column_names(), vec!["a", "x"]);
    assert_eq!(int64_column(&result, "a"), vec![Some(1), Some(1), Some(3), Some(3)]);
    assert_eq!(int64_column(&result, "x"), vec![Some(10), Some(20), Some(50), Some(60)]);

    let regrouped = map_groups(&grouped_ab(), &[drop_middle]).unwrap();
    assert_eq!(regrouped.len(), 2);
    assert_eq!(regrouped.key_names(), vec!["a"]);
    assert_eq!(regrouped.group_lengths(), vec![2, 2]);
    assert_eq!(
        regrouped.keys().get(1).unwrap().to_tuple(),
        vec![ScalarValue::from(3i64)]
    );
    regrouped.validate().unwrap();
}

#[test]
fn test_combine_row_results() {
    let stats = Transform::columns(&["b"], |cols| {
        let b = cols[0].as_primitive::<Int64Type>();
        Ok(GroupResult::row([
            ("total", ScalarValue::from(b.values().iter().sum::<i64>())),
            ("n", ScalarValue::from(b.len() as i64)),
        ]))
    });
    let result = combine(&grouped_ab(), &[stats], true).unwrap();

    assert_eq!(result.column_names(), vec!["a", "total", "n"]);
    assert_eq!(int64_column(&result, "n"), vec![Some(2), Some(2), Some(2)]);
    assert_eq!(int64_column(&result, "total"), vec![Some(30), Some(70), Some(110)]);
}

#[test]
fn test_result_kind_asymmetry() {
    // one-field rows followed by bare values are accepted
    let row_then_scalar = Transform::group(|group| {
        let value = ScalarValue::from(group.num_rows() as i64);
        if group.group() == 0 {
            Ok(GroupResult::row([("n", value)]))
        } else {
            Ok(value.into())
        }
    });
    let result = combine(&grouped_ab(), &[row_then_scalar], true).unwrap();
    assert_eq!(int64_column(&result, "n"), vec![Some(2), Some(2), Some(2)]);

    // the reverse order is a shape error
    let scalar_then_row = Transform::group(|group| {
        let value = ScalarValue::from(group.num_rows() as i64);
        if group.group() == 0 {
            Ok(value.into())
        } else {
            Ok(GroupResult::row([("n", value)]))
        }
    });
    let err = combine(&grouped_ab(), &[scalar_then_row], true).unwrap_err();
    assert!(matches!(err, CylonError::ShapeMismatch(_)));
}

#[test]
fn test_mixed_result_kinds_fail() {
    let mixed = Transform::group(|group| {
        if group.group() == 0 {
            Ok(ScalarValue::from(1i64).into())
        } else {
            Ok(GroupResult::table([("x", group.column("b")?)]))
        }
    });
    let err = combine(&grouped_ab(), &[mixed], true).unwrap_err();
    assert!(matches!(err, CylonError::ShapeMismatch(_)));

    let renamed = Transform::group(|group| {
        let name = if group.group() == 2 { "y" } else { "x" };
        Ok(GroupResult::table([(name, group.column("b")?)]))
    });
    let err = combine(&grouped_ab(), &[renamed], true).unwrap_err();
    assert!(matches!(err, CylonError::ShapeMismatch(_)));
}

#[test]
fn test_key_column_collisions() {
    let echo_key = Transform::group(|group| {
        Ok(GroupResult::row([
            ("a", group.value("a", 0)?),
            ("m", group.value("b", 0)?),
        ]))
    });
    let result = combine(&grouped_ab(), &[echo_key], true).unwrap();
    assert_eq!(result.column_names(), vec!["a", "m"]);
    assert_eq!(int64_column(&result, "m"), vec![Some(10), Some(30), Some(50)]);

    let wrong_key = Transform::group(|_| Ok(GroupResult::row([("a", ScalarValue::from(0i64))])));
    let err = combine(&grouped_ab(), &[wrong_key], true).unwrap_err();
    assert!(matches!(err, CylonError::ShapeMismatch(_)));
}

#[test]
fn test_multiple_transforms() {
    let result = combine(&grouped_ab(), &[sum_b(), first_b_rows(2)], true).unwrap();
    assert_eq!(result.column_names(), vec!["a", "b_sum", "b_function"]);
    assert_eq!(
        int64_column(&result, "b_sum"),
        vec![Some(30), Some(30), Some(70), Some(70), Some(110), Some(110)]
    );
    assert_eq!(
        int64_column(&result, "b_function"),
        vec![Some(10), Some(20), Some(30), Some(40), Some(50), Some(60)]
    );

    let err = combine(&grouped_ab(), &[first_b_rows(1), first_b_rows(2).named("other")], true).unwrap_err();
    assert!(matches!(err, CylonError::ShapeMismatch(_)));

    let err = combine(&grouped_ab(), &[sum_b(), sum_b()], true).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);

    let err = combine(&grouped_ab(), &[], true).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_bad_transforms() {
    let err = combine(&grouped_ab(), &[Transform::reduce("zz", Reduction::new(AggregationOpId::Sum))], true)
        .unwrap_err();
    assert_eq!(err.code(), Code::KeyError);

    let err = combine(&grouped_ab(), &[Transform::columns(&["zz"], |_| Ok(GroupResult::empty()))], true)
        .unwrap_err();
    assert_eq!(err.code(), Code::KeyError);

    let named_row = Transform::group(|_| Ok(GroupResult::row([("n", ScalarValue::from(1i64))]))).named("out");
    let err = combine(&grouped_ab(), &[named_row], true).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);

    let failing = Transform::group(|group| {
        if group.group() == 1 {
            Err(CylonError::invalid("no good"))
        } else {
            Ok(ScalarValue::from(1i64).into())
        }
    });
    let err = combine(&grouped_ab(), &[failing], true).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_transform_broadcasts_to_rows() {
    let result = transform(&grouped_ab(), &[sum_b(), Transform::columns(&["b"], |cols| Ok(cols[0].clone().into())).named("b_copy")])
        .unwrap();
    assert_eq!(result.column_names(), vec!["a", "b", "b_sum", "b_copy"]);
    assert_eq!(
        int64_column(&result, "b_sum"),
        vec![Some(30), Some(30), Some(70), Some(70), Some(110), Some(110)]
    );
    assert_eq!(int64_column(&result, "b_copy"), int64_column(&result, "b"));

    let err = transform(&grouped_ab(), &[first_b_rows(1)]).unwrap_err();
    assert!(matches!(err, CylonError::ShapeMismatch(_)));

    let err = transform(&grouped_ab(), &[sum_b().named("b")]).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_transform_follows_parent_row_order() {
    let table = create_table(vec![
        ("a", Arc::new(Int64Array::from(vec![Some(1), None, Some(2), Some(1)]))),
        ("b", Arc::new(Int64Array::from(vec![1, 2, 3, 4]))),
    ]);
    let grouped = partition(table, &[0], true, true).unwrap();
    let reversed = Transform::columns(&["b"], |cols| {
        let b = cols[0].as_primitive::<Int64Type>();
        let values: Vec<i64> = b.values().iter().rev().copied().collect();
        Ok(GroupResult::Vector(Arc::new(Int64Array::from(values))))
    })
    .named("rev");
    let result = transform(&grouped, &[sum_b(), reversed]).unwrap();

    assert_eq!(int64_column(&result, "b_sum"), vec![Some(5), None, Some(3), Some(5)]);
    assert_eq!(int64_column(&result, "rev"), vec![Some(4), None, Some(3), Some(1)]);
}

#[test]
fn test_zero_groups() {
    let table = create_table(vec![
        ("a", Arc::new(Int64Array::from(Vec::<i64>::new()))),
        ("b", Arc::new(Float64Array::from(Vec::<f64>::new()))),
    ]);
    let grouped = partition(table, &[0], false, false).unwrap();
    assert!(grouped.is_empty());

    let generic = combine(&grouped, &[first_b_rows(1)], true).unwrap();
    assert_eq!(generic.column_names(), vec!["a"]);
    assert_eq!(generic.rows(), 0);

    let fast = combine(&grouped, &[Transform::reduce("b", Reduction::new(AggregationOpId::Mean))], true).unwrap();
    assert_eq!(fast.column_names(), vec!["a", "b_mean"]);
    assert_eq!(fast.column_by_name("b_mean").unwrap().data_type(), &DataType::Float64);
    assert_eq!(fast.rows(), 0);
}

#[test]
fn test_aggregate_table() {
    let result = aggregate_table(
        create_ab_table(),
        &["a"],
        &[
            sum_b(),
            Transform::reduce("b", Reduction::new(AggregationOpId::Length)),
        ],
    )
    .unwrap();
    assert_eq!(result.column_names(), vec!["a", "b_sum", "b_length"]);
    assert_eq!(int64_column(&result, "b_length"), vec![Some(2), Some(2), Some(2)]);

    let err = aggregate_table(create_ab_table(), &["c"], &[sum_b()]).unwrap_err();
    assert_eq!(err.code(), Code::KeyError);
}
