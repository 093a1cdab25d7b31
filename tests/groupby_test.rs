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

//! Partitioning and grouped view tests

use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, DictionaryArray, Float64Array, Int64Array, Int8Array, StringArray};
use arrow::datatypes::{DataType, Field, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use cylon_groupby::ctx::{CylonContext, CONFIG_GROUPBY_NULLS_FIRST, CONFIG_GROUPBY_SORT};
use cylon_groupby::error::{Code, CylonError};
use cylon_groupby::groupby::{partition, GroupByOptions, GroupSelector, GroupedTable};
use cylon_groupby::scalar::ScalarValue;
use cylon_groupby::table::Table;
use cylon_groupby::util::init_logging;

fn create_table(ctx: Arc<CylonContext>, columns: Vec<(&str, ArrayRef)>) -> Arc<Table> {
    let columns = columns.into_iter().map(|(name, column)| (name.to_string(), column)).collect();
    Arc::new(Table::from_columns(ctx, columns).unwrap())
}

/// a = [1, 1, 2, 2, 3, 3], b = [10, 20, 30, 40, 50, 60]
fn create_ab_table() -> Arc<Table> {
    create_table(
        CylonContext::init(),
        vec![
            ("a", Arc::new(Int64Array::from(vec![1, 1, 2, 2, 3, 3]))),
            ("b", Arc::new(Int64Array::from(vec![10, 20, 30, 40, 50, 60]))),
        ],
    )
}

fn int64_values(column: &ArrayRef) -> Vec<Option<i64>> {
    column.as_primitive::<Int64Type>().iter().collect()
}

#[test]
fn test_partition_first_encounter_order() {
    init_logging();
    let grouped = partition(create_ab_table(), &[0], false, false).unwrap();

    assert_eq!(grouped.len(), 3);
    assert_eq!(grouped.membership(), &[1, 1, 2, 2, 3, 3]);
    assert_eq!(grouped.group(1).unwrap().rows(), &[2, 3]);
    assert_eq!(grouped.group_lengths(), vec![2, 2, 2]);
    assert_eq!(grouped.key_names(), vec!["a"]);
    assert_eq!(grouped.value_names(), vec!["b"]);
    grouped.validate().unwrap();
}

#[test]
fn test_partition_keeps_table_order_within_groups() {
    let table = create_table(
        CylonContext::init(),
        vec![("a", Arc::new(Int64Array::from(vec![7, 3, 7, 3, 7])))],
    );
    let grouped = partition(table, &[0], false, false).unwrap();

    assert_eq!(grouped.membership(), &[1, 2, 1, 2, 1]);
    assert_eq!(grouped.group(0).unwrap().rows(), &[0, 2, 4]);
    assert_eq!(grouped.group(1).unwrap().rows(), &[1, 3]);
    assert_eq!(grouped.group_index().starts(), &[0, 3]);
    assert_eq!(grouped.group_index().ends(), &[3, 5]);
}

#[test]
fn test_partition_over_several_batches() {
    let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)]));
    let batches = [vec![7, 3], vec![7, 3, 7]]
        .into_iter()
        .map(|values| RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(values))]).unwrap())
        .collect();
    let table = Table::from_record_batches(CylonContext::init(), schema, batches).unwrap();
    assert_eq!(table.rows(), 5);

    let grouped = partition(Arc::new(table), &[0], false, false).unwrap();
    // row indices run across batch boundaries
    assert_eq!(grouped.group(0).unwrap().rows(), &[0, 2, 4]);
    assert_eq!(grouped.group(1).unwrap().rows(), &[1, 3]);
}

#[test]
fn test_sorted_partition() {
    let table = create_table(
        CylonContext::init(),
        vec![(
            "a",
            Arc::new(Int64Array::from(vec![Some(5), Some(1), None, Some(3), Some(1), Some(5)])),
        )],
    );
    let grouped = partition(table, &[0], true, false).unwrap();

    assert!(grouped.is_sorted());
    assert_eq!(grouped.membership(), &[3, 1, 4, 2, 1, 3]);
    grouped.validate().unwrap();

    let ungrouped = grouped.ungroup().unwrap();
    assert_eq!(
        int64_values(ungrouped.column(0).unwrap()),
        vec![Some(1), Some(1), Some(3), Some(5), Some(5), None]
    );
}

#[test]
fn test_sorted_partition_nulls_first_from_context() {
    let ctx = CylonContext::init();
    ctx.add_config(CONFIG_GROUPBY_NULLS_FIRST, "true");
    let table = create_table(
        ctx,
        vec![(
            "a",
            Arc::new(Int64Array::from(vec![Some(5), Some(1), None, Some(3), Some(1), Some(5)])),
        )],
    );
    let grouped = partition(table, &[0], true, false).unwrap();
    assert_eq!(grouped.membership(), &[4, 2, 1, 3, 2, 4]);
    grouped.validate().unwrap();
}

#[test]
fn test_sort_option_from_context() {
    let ctx = CylonContext::init();
    ctx.add_config(CONFIG_GROUPBY_SORT, "true");
    let table = create_table(
        ctx.clone(),
        vec![("k", Arc::new(StringArray::from(vec!["b", "a", "c", "a"])))],
    );
    let grouped = GroupedTable::by_names(table, &["k"], GroupByOptions::from_context(&ctx)).unwrap();
    assert!(grouped.is_sorted());
    assert_eq!(grouped.membership(), &[2, 1, 3, 1]);
}

#[test]
fn test_skip_missing_keys() {
    let table = create_table(
        CylonContext::init(),
        vec![
            ("a", Arc::new(Int64Array::from(vec![Some(1), Some(1), None, None]))),
            ("b", Arc::new(Int64Array::from(vec![1, 2, 3, 4]))),
        ],
    );

    let skipped = partition(table.clone(), &[0], false, true).unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped.group_lengths(), vec![2]);
    assert_eq!(skipped.group_indices(), vec![Some(0), Some(0), None, None]);
    assert_eq!(skipped.membership(), &[1, 1, 0, 0]);
    assert_eq!(skipped.ungroup().unwrap().rows(), 2);
    skipped.validate().unwrap();

    let kept = partition(table, &[0], false, false).unwrap();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept.group_indices(), vec![Some(0), Some(0), Some(1), Some(1)]);
    kept.validate().unwrap();
}

#[test]
fn test_float_keys() {
    let table = create_table(
        CylonContext::init(),
        vec![(
            "f",
            Arc::new(Float64Array::from(vec![0.0, -0.0, f64::NAN, f64::NAN, 0.0])),
        )],
    );
    let grouped = partition(table, &[0], false, false).unwrap();
    assert_eq!(grouped.membership(), &[1, 2, 3, 3, 1]);
    grouped.validate().unwrap();
}

#[test]
fn test_multi_column_keys() {
    let table = create_table(
        CylonContext::init(),
        vec![
            ("a", Arc::new(Int64Array::from(vec![1, 1, 2, 2, 1]))),
            ("s", Arc::new(StringArray::from(vec!["x", "y", "x", "x", "x"]))),
        ],
    );
    let grouped = partition(table.clone(), &[0, 1], false, false).unwrap();
    assert_eq!(grouped.membership(), &[1, 2, 3, 3, 1]);

    let reversed = partition(table, &[1, 0], true, false).unwrap();
    // ("x", 1) < ("x", 2) < ("y", 1)
    assert_eq!(reversed.membership(), &[1, 3, 2, 2, 1]);
    reversed.validate().unwrap();
}

#[test]
fn test_dictionary_keys_group_by_value() {
    let keys = Int8Array::from(vec![Some(0), Some(1), Some(2), Some(0), None]);
    let values: ArrayRef = Arc::new(StringArray::from(vec!["p", "q", "p"]));
    let dict = DictionaryArray::try_new(keys, values).unwrap();
    let table = create_table(
        CylonContext::init(),
        vec![
            ("d", Arc::new(dict) as ArrayRef),
            ("n", Arc::new(Int64Array::from(vec![1, 1, 1, 2, 1]))),
        ],
    );

    let grouped = partition(table.clone(), &[0], false, false).unwrap();
    assert_eq!(grouped.membership(), &[1, 2, 1, 1, 3]);
    grouped.validate().unwrap();

    let sorted = partition(table.clone(), &[0], true, true).unwrap();
    assert!(sorted.is_sorted());
    assert_eq!(sorted.membership(), &[1, 2, 1, 1, 0]);
    sorted.validate().unwrap();

    // dictionary mixed with a plain column goes through the hash path
    let mixed = partition(table, &[0, 1], false, false).unwrap();
    assert_eq!(mixed.membership(), &[1, 2, 1, 3, 4]);
    mixed.validate().unwrap();
}

#[test]
fn test_no_key_columns() {
    let grouped = partition(create_ab_table(), &[], false, false).unwrap();
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped.group_lengths(), vec![6]);

    let empty = create_table(
        CylonContext::init(),
        vec![("a", Arc::new(Int64Array::from(Vec::<i64>::new())))],
    );
    let grouped = partition(empty.clone(), &[], false, false).unwrap();
    assert!(grouped.is_empty());
    let grouped = partition(empty, &[0], true, false).unwrap();
    assert!(grouped.is_empty());
    grouped.validate().unwrap();
}

#[test]
fn test_bad_arguments() {
    let table = create_ab_table();
    let err = partition(table.clone(), &[5], false, false).unwrap_err();
    assert_eq!(err.code(), Code::IndexError);

    let err = partition(table.clone(), &[0, 0], false, false).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);

    let err = GroupedTable::by_names(table.clone(), &["zz"], GroupByOptions::default()).unwrap_err();
    assert_eq!(err.code(), Code::KeyError);

    let grouped = partition(table, &[0], false, false).unwrap();
    let err = grouped.group(3).unwrap_err();
    assert_eq!(err.code(), Code::IndexError);
    assert!(err.is_usage_error());
}

#[test]
fn test_group_slice_access() {
    let grouped = partition(create_ab_table(), &[0], false, false).unwrap();
    let group = grouped.group(2).unwrap();

    assert_eq!(group.num_rows(), 2);
    assert_eq!(int64_values(&group.column("b").unwrap()), vec![Some(50), Some(60)]);
    assert_eq!(int64_values(&group.column_at(0).unwrap()), vec![Some(3), Some(3)]);
    assert_eq!(group.value("b", 1).unwrap(), ScalarValue::from(60i64));
    assert_eq!(group.value("b", 2).unwrap_err().code(), Code::IndexError);
    assert_eq!(group.to_table().unwrap().rows(), 2);
    assert_eq!(group.key().unwrap().get(0).unwrap(), &ScalarValue::from(3i64));
}

#[test]
fn test_equality_is_order_independent() {
    let table = create_ab_table();
    let first_seen = partition(table.clone(), &[0], false, false).unwrap();
    let reversed = first_seen
        .select(&GroupSelector::Indices(vec![2, 1, 0]))
        .unwrap()
        .into_grouped()
        .unwrap();

    assert!(first_seen.is_equal(&reversed));
    assert_eq!(first_seen.eq_missing(&reversed), Some(true));

    // equal contents in a different table instance
    let copy = partition(create_ab_table(), &[0], false, false).unwrap();
    assert!(first_seen.is_equal(&copy));

    let other_keys = partition(table.clone(), &[1], false, false).unwrap();
    assert!(!first_seen.is_equal(&other_keys));
    assert_eq!(first_seen.eq_missing(&other_keys), Some(false));

    let everything = partition(table, &[], false, false).unwrap();
    assert!(!first_seen.is_equal(&everything));
}

#[test]
fn test_equality_with_missing_keys() {
    let table = create_table(
        CylonContext::init(),
        vec![("a", Arc::new(Int64Array::from(vec![Some(1), Some(1), None, Some(2)])))],
    );

    let unsorted = partition(table.clone(), &[0], false, false).unwrap();
    let sorted = partition(table.clone(), &[0], true, false).unwrap();
    assert!(unsorted.is_equal(&sorted));
    assert_eq!(unsorted.eq_missing(&sorted), None);

    let skipped = partition(table.clone(), &[0], false, true).unwrap();
    let skipped_sorted = partition(table, &[0], true, true).unwrap();
    assert_eq!(skipped.eq_missing(&skipped_sorted), Some(true));

    // excluding rows changes the partition
    assert_eq!(unsorted.eq_missing(&skipped), Some(false));
    assert!(!unsorted.is_equal(&skipped));
}

#[test]
fn test_clone_is_deep() {
    let grouped = partition(create_ab_table(), &[0], false, false).unwrap();
    grouped.group_index();
    let copy = grouped.clone();

    assert!(copy.is_equal(&grouped));
    assert!(copy.is_index_materialized());
    assert_ne!(copy.membership().as_ptr(), grouped.membership().as_ptr());
    copy.validate().unwrap();
}

#[test]
fn test_validate_every_option_combination() {
    let table = create_table(
        CylonContext::init(),
        vec![
            ("a", Arc::new(Int64Array::from(vec![Some(2), None, Some(1), Some(2), None, Some(1), Some(3)]))),
            ("s", Arc::new(StringArray::from(vec![Some("x"), Some("x"), None, Some("x"), Some("y"), None, Some("z")]))),
        ],
    );
    for key_cols in [vec![0], vec![1], vec![0, 1], vec![1, 0]] {
        for sort in [false, true] {
            for skip_missing in [false, true] {
                let grouped = partition(table.clone(), &key_cols, sort, skip_missing).unwrap();
                grouped.validate().unwrap();
                assert_eq!(grouped.is_sorted() || !sort, true);
            }
        }
    }

    let err = CylonError::Internal("membership mismatch".to_string());
    assert!(!err.is_usage_error());
    assert_eq!(err.code(), Code::ExecutionError);
}
