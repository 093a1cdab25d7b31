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

//! Table - the columnar collaborator the grouping engine reads from
//!
//! A table is a single Arrow `RecordBatch` plus the context it was created
//! under. The grouping engine never mutates a table; it only reads columns
//! and builds new tables from freshly materialised columns.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, RecordBatchOptions, UInt64Array};
use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::ctx::CylonContext;
use crate::error::{Code, CylonError, CylonResult};

pub mod column;
pub use column::{ColumnBuffer, PushOutcome};

/// Table provides the main API for using cylon for data processing
#[derive(Debug, Clone)]
pub struct Table {
    ctx: Arc<CylonContext>,
    batch: RecordBatch,
}

impl Table {
    /// Create a table from an Arrow RecordBatch
    pub fn from_record_batch(ctx: Arc<CylonContext>, batch: RecordBatch) -> CylonResult<Self> {
        Ok(Self { ctx, batch })
    }

    /// Create a table from multiple Arrow RecordBatches sharing `schema`
    ///
    /// The batches are concatenated so that row indices are global.
    pub fn from_record_batches(
        ctx: Arc<CylonContext>,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> CylonResult<Self> {
        let mut batches = batches;
        let batch = match batches.len() {
            0 => RecordBatch::new_empty(schema),
            1 => batches.remove(0),
            _ => arrow::compute::concat_batches(&schema, &batches)?,
        };
        Ok(Self { ctx, batch })
    }

    /// Create a table from named columns
    ///
    /// All columns must have the same length. A table with no columns has
    /// zero rows; use [`Table::from_columns_with_row_count`] to keep a row count.
    pub fn from_columns(ctx: Arc<CylonContext>, columns: Vec<(String, ArrayRef)>) -> CylonResult<Self> {
        let num_rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        Self::from_columns_with_row_count(ctx, columns, num_rows)
    }

    /// Create a table from named columns with an explicit row count
    pub fn from_columns_with_row_count(
        ctx: Arc<CylonContext>,
        columns: Vec<(String, ArrayRef)>,
        num_rows: usize,
    ) -> CylonResult<Self> {
        let mut fields = Vec::with_capacity(columns.len());
        let mut arrays = Vec::with_capacity(columns.len());
        for (name, array) in columns {
            if array.len() != num_rows {
                return Err(CylonError::new(
                    Code::Invalid,
                    format!("column '{}' has {} rows, expected {}", name, array.len(), num_rows),
                ));
            }
            if fields.iter().any(|f: &Field| f.name() == &name) {
                return Err(CylonError::new(
                    Code::Invalid,
                    format!("duplicate column name '{}'", name),
                ));
            }
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }

        let schema = Arc::new(Schema::new(fields));
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let batch = RecordBatch::try_new_with_options(schema, arrays, &options)?;
        Ok(Self { ctx, batch })
    }

    /// Get the number of columns
    pub fn columns(&self) -> usize {
        self.batch.num_columns()
    }

    /// Get the number of rows
    pub fn rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Check if table is empty
    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// Get the context
    pub fn get_context(&self) -> Arc<CylonContext> {
        self.ctx.clone()
    }

    /// Get the schema
    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// Get the underlying batch
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Get a column by position
    pub fn column(&self, index: usize) -> CylonResult<&ArrayRef> {
        if index >= self.batch.num_columns() {
            return Err(CylonError::new(
                Code::IndexError,
                format!("Column index {} out of range (table has {} columns)",
                        index, self.batch.num_columns()),
            ));
        }
        Ok(self.batch.column(index))
    }

    /// Resolve a column name to its position
    pub fn column_index(&self, name: &str) -> CylonResult<usize> {
        self.batch
            .schema()
            .index_of(name)
            .map_err(|_| CylonError::new(Code::KeyError, format!("Column '{}' not found in table", name)))
    }

    /// Get a column by name
    pub fn column_by_name(&self, name: &str) -> CylonResult<&ArrayRef> {
        let index = self.column_index(name)?;
        Ok(self.batch.column(index))
    }

    /// Name of the column at `index`
    pub fn column_name(&self, index: usize) -> CylonResult<String> {
        self.column(index)?;
        Ok(self.batch.schema().field(index).name().clone())
    }

    /// Gather rows by position into a new table
    pub fn take(&self, indices: &[usize]) -> CylonResult<Table> {
        let index_array = indices_to_array(indices);
        let mut columns = Vec::with_capacity(self.batch.num_columns());
        for column in self.batch.columns() {
            columns.push(arrow::compute::take(column.as_ref(), &index_array, None)?);
        }
        let options = RecordBatchOptions::new().with_row_count(Some(indices.len()));
        let batch = RecordBatch::try_new_with_options(self.batch.schema(), columns, &options)?;
        Table::from_record_batch(self.ctx.clone(), batch)
    }

    /// Structural equality: same column names, types and values
    ///
    /// Nulls in the same positions compare equal.
    pub fn equals(&self, other: &Table) -> bool {
        if self.rows() != other.rows() || self.columns() != other.columns() {
            return false;
        }
        let (left, right) = (self.batch.schema(), other.batch.schema());
        let same_fields = left
            .fields()
            .iter()
            .zip(right.fields().iter())
            .all(|(l, r)| l.name() == r.name() && l.data_type() == r.data_type());
        same_fields
            && self
                .batch
                .columns()
                .iter()
                .zip(other.batch.columns())
                .all(|(l, r)| l.to_data() == r.to_data())
    }
}

/// Row indices as an Arrow index array suitable for `take`
pub fn indices_to_array(indices: &[usize]) -> UInt64Array {
    UInt64Array::from_iter_values(indices.iter().map(|&i| i as u64))
}

/// Gather `indices` from a single column
pub fn take_column(column: &ArrayRef, indices: &[usize]) -> CylonResult<ArrayRef> {
    let index_array = indices_to_array(indices);
    Ok(arrow::compute::take(column.as_ref(), &index_array, None)?)
}
