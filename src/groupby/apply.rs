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

//! Apply engine
//!
//! Runs a [`Transform`] over every group of a [`GroupedTable`] and stitches
//! the per-group results into output columns. The kind of the first group's
//! result (scalar, row, vector or table) fixes the shape for the whole run.
//! Output columns take their element type from the first value written and
//! are widened in place when a later group returns a wider type.
//!
//! Reductions given as [`Transform::reduce`] skip the per-group calls and go
//! straight to the aggregate kernels.

use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, UInt64Array};
use arrow::compute::take;
use arrow::datatypes::DataType;

use super::grouped_table::{GroupSlice, GroupedTable};
use crate::compute::{group_aggregate, Reduction};
use crate::cylon_debug;
use crate::error::{CylonError, CylonResult};
use crate::scalar::ScalarValue;
use crate::table::{take_column, ColumnBuffer, PushOutcome, Table};

// ============================================================================
// Group results
// ============================================================================

/// What a function returns for one group
#[derive(Debug, Clone)]
pub enum GroupResult {
    /// One value: one output row, one column
    Scalar(ScalarValue),
    /// Named values: one output row, one column per field
    Row(Vec<(String, ScalarValue)>),
    /// One column, any number of rows
    Vector(ArrayRef),
    /// Named columns of equal length, any number of rows
    Table(Vec<(String, ArrayRef)>),
}

impl GroupResult {
    /// A table with no columns and no rows; drops the group from the output
    pub fn empty() -> Self {
        GroupResult::Table(Vec::new())
    }

    pub fn row<S: Into<String>>(fields: impl IntoIterator<Item = (S, ScalarValue)>) -> Self {
        GroupResult::Row(fields.into_iter().map(|(name, value)| (name.into(), value)).collect())
    }

    pub fn table<S: Into<String>>(columns: impl IntoIterator<Item = (S, ArrayRef)>) -> Self {
        GroupResult::Table(columns.into_iter().map(|(name, array)| (name.into(), array)).collect())
    }

    fn kind(&self) -> ResultKind {
        match self {
            GroupResult::Scalar(_) => ResultKind::Scalar,
            GroupResult::Row(_) => ResultKind::Row,
            GroupResult::Vector(_) => ResultKind::Vector,
            GroupResult::Table(_) => ResultKind::Table,
        }
    }
}

impl From<ScalarValue> for GroupResult {
    fn from(value: ScalarValue) -> Self {
        GroupResult::Scalar(value)
    }
}

impl From<ArrayRef> for GroupResult {
    fn from(array: ArrayRef) -> Self {
        GroupResult::Vector(array)
    }
}

impl From<RecordBatch> for GroupResult {
    fn from(batch: RecordBatch) -> Self {
        let schema = batch.schema();
        GroupResult::Table(
            schema
                .fields()
                .iter()
                .zip(batch.columns())
                .map(|(field, column)| (field.name().clone(), column.clone()))
                .collect(),
        )
    }
}

impl From<Table> for GroupResult {
    fn from(table: Table) -> Self {
        GroupResult::from(table.batch().clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultKind {
    Scalar,
    Row,
    Vector,
    Table,
}

impl ResultKind {
    fn is_multi_row(self) -> bool {
        matches!(self, ResultKind::Vector | ResultKind::Table)
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultKind::Scalar => "scalar",
            ResultKind::Row => "row",
            ResultKind::Vector => "vector",
            ResultKind::Table => "table",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Transforms
// ============================================================================

type GroupFunction = Arc<dyn Fn(&GroupSlice<'_>) -> CylonResult<GroupResult> + Send + Sync>;
type ColumnFunction = Arc<dyn Fn(&[ArrayRef]) -> CylonResult<GroupResult> + Send + Sync>;

#[derive(Clone)]
enum Operation {
    Group(GroupFunction),
    Columns { columns: Vec<String>, function: ColumnFunction },
    Reduce { column: String, reduction: Reduction },
}

/// A function to run over every group
#[derive(Clone)]
pub struct Transform {
    operation: Operation,
    output: Option<String>,
}

impl Transform {
    /// Function of the whole group
    pub fn group<F>(function: F) -> Self
    where
        F: Fn(&GroupSlice<'_>) -> CylonResult<GroupResult> + Send + Sync + 'static,
    {
        Self {
            operation: Operation::Group(Arc::new(function)),
            output: None,
        }
    }

    /// Function of the given columns of each group
    pub fn columns<F>(columns: &[&str], function: F) -> Self
    where
        F: Fn(&[ArrayRef]) -> CylonResult<GroupResult> + Send + Sync + 'static,
    {
        Self {
            operation: Operation::Columns {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                function: Arc::new(function),
            },
            output: None,
        }
    }

    /// Built-in reduction of one column, computed by the aggregate kernels
    pub fn reduce(column: &str, reduction: Reduction) -> Self {
        Self {
            operation: Operation::Reduce {
                column: column.to_string(),
                reduction,
            },
            output: None,
        }
    }

    /// Name the output column; only valid for scalar and vector results
    pub fn named(mut self, output: &str) -> Self {
        self.output = Some(output.to_string());
        self
    }

    fn default_name(&self) -> String {
        match &self.operation {
            Operation::Group(_) => "x1".to_string(),
            Operation::Columns { columns, .. } => format!("{}_function", columns.join("_")),
            Operation::Reduce { column, reduction } => reduction.output_name(column),
        }
    }

    fn output_name(&self) -> String {
        self.output.clone().unwrap_or_else(|| self.default_name())
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operation = match &self.operation {
            Operation::Group(_) => "group function".to_string(),
            Operation::Columns { columns, .. } => format!("function of {:?}", columns),
            Operation::Reduce { column, reduction } => format!("{} of {}", reduction, column),
        };
        f.debug_struct("Transform")
            .field("operation", &operation)
            .field("output", &self.output_name())
            .finish()
    }
}

// ============================================================================
// Per-transform output
// ============================================================================

struct TransformOutput {
    names: Vec<String>,
    columns: Vec<ArrayRef>,
    /// Group id of every output row
    row_groups: Vec<usize>,
    multi_row: bool,
}

/// Accumulates per-group results into output column buffers
struct Combiner {
    output: Option<String>,
    default_name: String,
    kind: Option<ResultKind>,
    names: Vec<String>,
    buffers: Vec<ColumnBuffer>,
    row_groups: Vec<usize>,
}

impl Combiner {
    fn new(transform: &Transform) -> Self {
        Self {
            output: transform.output.clone(),
            default_name: transform.default_name(),
            kind: None,
            names: Vec::new(),
            buffers: Vec::new(),
            row_groups: Vec::new(),
        }
    }

    fn single_name(&self) -> String {
        self.output.clone().unwrap_or_else(|| self.default_name.clone())
    }

    fn reject_output_name(&self, kind: ResultKind) -> CylonResult<()> {
        match &self.output {
            Some(name) => Err(CylonError::invalid(format!(
                "Output name '{}' given for a {} result; {} results name their own columns",
                name, kind, kind
            ))),
            None => Ok(()),
        }
    }

    fn establish(&mut self, names: Vec<String>, types: Vec<DataType>) -> CylonResult<()> {
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(CylonError::invalid(format!("Duplicate output column '{}'", name)));
            }
        }
        self.buffers = types.iter().map(ColumnBuffer::new).collect();
        self.names = names;
        Ok(())
    }

    /// Order named parts of a result by the established column names
    fn reconcile<T>(&self, group: usize, parts: Vec<(String, T)>) -> CylonResult<Vec<T>> {
        let mismatch = |parts: &[String]| {
            CylonError::shape(format!(
                "Group {} returned columns {:?}, earlier groups returned {:?}",
                group, parts, self.names
            ))
        };
        if parts.len() != self.names.len() {
            let names: Vec<String> = parts.into_iter().map(|(n, _)| n).collect();
            return Err(mismatch(&names));
        }
        let part_names: Vec<String> = parts.iter().map(|(n, _)| n.clone()).collect();
        let mut slots: Vec<Option<T>> = (0..self.names.len()).map(|_| None).collect();
        for (name, value) in parts {
            match self.names.iter().position(|n| n == &name) {
                Some(pos) if slots[pos].is_none() => slots[pos] = Some(value),
                _ => return Err(mismatch(&part_names)),
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Write one value, widening the column until it fits
    fn write(&mut self, column: usize, value: &ScalarValue, group: usize) -> CylonResult<()> {
        loop {
            match self.buffers[column].try_push(value)? {
                PushOutcome::Pushed => return Ok(()),
                PushOutcome::Widen(data_type) => {
                    cylon_debug!(
                        "Widening output column '{}' from {:?} to {:?} at group {}",
                        self.names[column],
                        self.buffers[column].data_type(),
                        data_type,
                        group
                    );
                    self.buffers[column].widen(&data_type)?;
                }
            }
        }
    }

    fn push(&mut self, group: usize, result: GroupResult) -> CylonResult<()> {
        let kind = *self.kind.get_or_insert(result.kind());
        match (kind, result) {
            (ResultKind::Scalar, GroupResult::Scalar(value)) => {
                if self.buffers.is_empty() {
                    self.establish(vec![self.single_name()], vec![value.data_type()])?;
                }
                self.write(0, &value, group)?;
                self.row_groups.push(group);
            }
            (ResultKind::Row, GroupResult::Row(fields)) => {
                self.reject_output_name(kind)?;
                if fields.is_empty() {
                    return Err(CylonError::invalid(format!("Group {} returned a row with no fields", group)));
                }
                if self.buffers.is_empty() {
                    let names = fields.iter().map(|(n, _)| n.clone()).collect();
                    let types = fields.iter().map(|(_, v)| v.data_type()).collect();
                    self.establish(names, types)?;
                }
                let values = self.reconcile(group, fields)?;
                for (column, value) in values.iter().enumerate() {
                    self.write(column, value, group)?;
                }
                self.row_groups.push(group);
            }
            // a bare value after one-field rows fills that field
            (ResultKind::Row, GroupResult::Scalar(value)) if self.names.len() == 1 => {
                self.write(0, &value, group)?;
                self.row_groups.push(group);
            }
            (ResultKind::Vector, GroupResult::Vector(array)) => {
                if self.buffers.is_empty() {
                    self.establish(vec![self.single_name()], vec![array.data_type().clone()])?;
                }
                for row in 0..array.len() {
                    let value = ScalarValue::try_from_array(array.as_ref(), row)?;
                    self.write(0, &value, group)?;
                    self.row_groups.push(group);
                }
            }
            (ResultKind::Table, GroupResult::Table(columns)) => {
                self.reject_output_name(kind)?;
                if columns.is_empty() {
                    return Ok(());
                }
                let num_rows = columns[0].1.len();
                if let Some((name, column)) = columns.iter().find(|(_, c)| c.len() != num_rows) {
                    return Err(CylonError::shape(format!(
                        "Group {} returned column '{}' with {} rows, expected {}",
                        group,
                        name,
                        column.len(),
                        num_rows
                    )));
                }
                if self.buffers.is_empty() {
                    let names = columns.iter().map(|(n, _)| n.clone()).collect();
                    let types = columns.iter().map(|(_, c)| c.data_type().clone()).collect();
                    self.establish(names, types)?;
                }
                let columns = self.reconcile(group, columns)?;
                for row in 0..num_rows {
                    for (column, array) in columns.iter().enumerate() {
                        let value = ScalarValue::try_from_array(array.as_ref(), row)?;
                        self.write(column, &value, group)?;
                    }
                    self.row_groups.push(group);
                }
            }
            (established, result) => {
                return Err(CylonError::shape(format!(
                    "Group {} returned a {} result, earlier groups returned {} results",
                    group,
                    result.kind(),
                    established
                )));
            }
        }
        Ok(())
    }

    fn finish(self) -> CylonResult<TransformOutput> {
        let columns = self
            .buffers
            .into_iter()
            .map(ColumnBuffer::finish)
            .collect::<CylonResult<Vec<_>>>()?;
        Ok(TransformOutput {
            names: self.names,
            columns,
            row_groups: self.row_groups,
            multi_row: self.kind.is_some_and(ResultKind::is_multi_row),
        })
    }
}

fn run_generic<F>(grouped: &GroupedTable, transform: &Transform, call: F) -> CylonResult<TransformOutput>
where
    F: Fn(&GroupSlice<'_>) -> CylonResult<GroupResult>,
{
    let mut combiner = Combiner::new(transform);
    for group in 0..grouped.len() {
        let slice = grouped.group(group)?;
        let result = call(&slice)?;
        combiner.push(group, result)?;
    }
    combiner.finish()
}

fn run_reduction(
    grouped: &GroupedTable,
    column: &str,
    reduction: Reduction,
    name: String,
) -> CylonResult<TransformOutput> {
    let values = grouped.parent().column_by_name(column)?;
    let bounds = if grouped.is_index_materialized() {
        Some(grouped.group_index().bounds())
    } else {
        None
    };
    cylon_debug!("Fast path {} over column '{}' for {} groups", reduction, column, grouped.len());
    let result = group_aggregate(values, grouped.membership(), grouped.len(), reduction, bounds)?;
    Ok(TransformOutput {
        names: vec![name],
        columns: vec![result],
        row_groups: (0..grouped.len()).collect(),
        multi_row: false,
    })
}

fn run_transform(grouped: &GroupedTable, transform: &Transform) -> CylonResult<TransformOutput> {
    match &transform.operation {
        Operation::Reduce { column, reduction } => {
            run_reduction(grouped, column, *reduction, transform.output_name())
        }
        Operation::Group(function) => run_generic(grouped, transform, |slice| function(slice)),
        Operation::Columns { columns, function } => {
            for column in columns {
                grouped.parent().column_index(column)?;
            }
            run_generic(grouped, transform, |slice| {
                let arrays = columns
                    .iter()
                    .map(|column| slice.column(column))
                    .collect::<CylonResult<Vec<_>>>()?;
                function(&arrays)
            })
        }
    }
}

// ============================================================================
// Combining
// ============================================================================

struct Assembled {
    names: Vec<String>,
    columns: Vec<ArrayRef>,
    row_groups: Vec<usize>,
}

fn assemble(grouped: &GroupedTable, transforms: &[Transform]) -> CylonResult<Assembled> {
    if transforms.is_empty() {
        return Err(CylonError::invalid("No transforms given"));
    }
    let outputs = transforms
        .iter()
        .map(|transform| run_transform(grouped, transform))
        .collect::<CylonResult<Vec<_>>>()?;

    let mut multi_row_groups: Option<&Vec<usize>> = None;
    for output in outputs.iter().filter(|o| o.multi_row) {
        match multi_row_groups {
            None => multi_row_groups = Some(&output.row_groups),
            Some(row_groups) if *row_groups == output.row_groups => {}
            Some(_) => {
                return Err(CylonError::shape(
                    "Transforms returned different numbers of rows for the same group",
                ))
            }
        }
    }
    let expand = multi_row_groups.is_some();
    let row_groups = match multi_row_groups {
        Some(row_groups) => row_groups.clone(),
        None => (0..grouped.len()).collect(),
    };

    let mut names: Vec<String> = Vec::new();
    let mut columns = Vec::new();
    for output in outputs {
        let repeat = expand && !output.multi_row;
        for (name, column) in output.names.into_iter().zip(output.columns) {
            if names.contains(&name) {
                return Err(CylonError::invalid(format!("Duplicate output column '{}'", name)));
            }
            let column = if repeat { take_column(&column, &row_groups)? } else { column };
            names.push(name);
            columns.push(column);
        }
    }
    Ok(Assembled {
        names,
        columns,
        row_groups,
    })
}

fn columns_equal(a: &ArrayRef, b: &ArrayRef) -> CylonResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for row in 0..a.len() {
        let left = ScalarValue::try_from_array(a.as_ref(), row)?;
        let right = ScalarValue::try_from_array(b.as_ref(), row)?;
        if !left.is_equal(&right) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn assemble_table(grouped: &GroupedTable, assembled: Assembled, keep_keys: bool) -> CylonResult<Table> {
    let parent = grouped.parent();
    let num_rows = assembled.row_groups.len();
    let outputs = assembled.names.into_iter().zip(assembled.columns);
    if !keep_keys {
        return Table::from_columns_with_row_count(parent.get_context(), outputs.collect(), num_rows);
    }

    let representatives = grouped.representative_rows();
    let key_rows: Vec<usize> = assembled.row_groups.iter().map(|&g| representatives[g]).collect();
    let key_names = grouped.key_names();
    let mut columns = Vec::with_capacity(key_names.len());
    for (name, &col) in key_names.iter().zip(grouped.key_columns()) {
        columns.push((name.clone(), take_column(parent.column(col)?, &key_rows)?));
    }
    for (name, column) in outputs {
        if let Some(pos) = key_names.iter().position(|key| key == &name) {
            if !columns_equal(&columns[pos].1, &column)? {
                return Err(CylonError::shape(format!(
                    "Output column '{}' differs from the key column of the same name",
                    name
                )));
            }
            continue;
        }
        columns.push((name, column));
    }
    Table::from_columns_with_row_count(parent.get_context(), columns, num_rows)
}

/// Apply `transforms` to every group and concatenate the results
///
/// Rows come out in group order. With `keep_keys` the key columns lead the
/// output, repeated for every row a group produced. When some transforms
/// return several rows per group, single-row results are repeated to match;
/// the multi-row transforms must agree on the row count of each group.
pub fn combine(grouped: &GroupedTable, transforms: &[Transform], keep_keys: bool) -> CylonResult<Table> {
    let assembled = assemble(grouped, transforms)?;
    assemble_table(grouped, assembled, keep_keys)
}

/// Like [`combine`], regrouped by the same key columns
///
/// Groups whose results have no rows disappear.
pub fn map_groups(grouped: &GroupedTable, transforms: &[Transform]) -> CylonResult<GroupedTable> {
    let assembled = assemble(grouped, transforms)?;
    let row_groups = assembled.row_groups.clone();
    let table = Arc::new(assemble_table(grouped, assembled, true)?);

    let mut membership = Vec::with_capacity(row_groups.len());
    let mut ngroups = 0u32;
    let mut previous = None;
    for &group in &row_groups {
        if previous != Some(group) {
            ngroups += 1;
            previous = Some(group);
        }
        membership.push(ngroups);
    }
    let key_cols: Vec<usize> = (0..grouped.key_columns().len()).collect();
    Ok(GroupedTable::from_parts(
        table,
        key_cols,
        membership,
        ngroups as usize,
        grouped.is_sorted(),
        *grouped.options(),
    ))
}

/// Parent row that each output row maps to, `None` for excluded rows
fn broadcast_indices(grouped: &GroupedTable, output: &TransformOutput) -> CylonResult<Vec<Option<u64>>> {
    let mut indices = vec![None; grouped.parent().rows()];
    if !output.multi_row {
        for (row, &m) in grouped.membership().iter().enumerate() {
            if m != 0 {
                indices[row] = Some(m as u64 - 1);
            }
        }
        return Ok(indices);
    }

    let lengths = grouped.group_lengths();
    let mut counts = vec![0usize; grouped.len()];
    for &group in &output.row_groups {
        counts[group] += 1;
    }
    if let Some(group) = (0..grouped.len()).find(|&g| counts[g] != lengths[g]) {
        return Err(CylonError::shape(format!(
            "Group {} returned {} rows but has {}",
            group, counts[group], lengths[group]
        )));
    }

    let index = grouped.group_index();
    let mut offset = 0;
    for group in 0..grouped.len() {
        for (k, &row) in index.group_rows(group).iter().enumerate() {
            indices[row] = Some((offset + k) as u64);
        }
        offset += lengths[group];
    }
    Ok(indices)
}

/// Apply `transforms` and broadcast each result back onto the parent rows
///
/// The output keeps every parent column in parent row order. Single-row
/// results are repeated over their group; multi-row results must have one
/// row per group row. Rows excluded from grouping get nulls.
pub fn transform(grouped: &GroupedTable, transforms: &[Transform]) -> CylonResult<Table> {
    if transforms.is_empty() {
        return Err(CylonError::invalid("No transforms given"));
    }
    let parent = grouped.parent();
    let key_names = grouped.key_names();
    let mut columns: Vec<(String, ArrayRef)> = parent
        .column_names()
        .into_iter()
        .zip(parent.batch().columns().iter().cloned())
        .collect();

    for t in transforms {
        let output = run_transform(grouped, t)?;
        let index_array = UInt64Array::from(broadcast_indices(grouped, &output)?);
        for (name, column) in output.names.into_iter().zip(output.columns) {
            let column = take(column.as_ref(), &index_array, None)?;
            if let Some(pos) = columns.iter().position(|(existing, _)| existing == &name) {
                if !key_names.contains(&name) || pos >= parent.columns() {
                    return Err(CylonError::invalid(format!("Output column '{}' already exists", name)));
                }
                if !columns_equal(&columns[pos].1, &column)? {
                    return Err(CylonError::shape(format!(
                        "Output column '{}' differs from the key column of the same name",
                        name
                    )));
                }
                continue;
            }
            columns.push((name, column));
        }
    }
    Table::from_columns_with_row_count(parent.get_context(), columns, parent.rows())
}
