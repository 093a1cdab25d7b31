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

//! Growable output columns
//!
//! A `ColumnBuffer` collects the values an apply operation produces for one
//! output column. Its element type is fixed by the first value written and
//! only changes through an explicit [`ColumnBuffer::widen`], which the caller
//! performs after [`ColumnBuffer::try_push`] reports that a value does not fit.

use arrow::array::ArrayRef;
use arrow::datatypes::DataType;

use crate::data_types::{promote_types, value_type};
use crate::error::CylonResult;
use crate::scalar::ScalarValue;

/// Result of offering a value to a [`ColumnBuffer`]
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The value was stored
    Pushed,
    /// The value needs the column widened to this type first
    Widen(DataType),
}

/// Append-only column of scalars with a current element type
#[derive(Debug, Clone)]
pub struct ColumnBuffer {
    data_type: DataType,
    values: Vec<ScalarValue>,
}

impl ColumnBuffer {
    pub fn new(data_type: &DataType) -> Self {
        Self::with_capacity(data_type, 0)
    }

    pub fn with_capacity(data_type: &DataType, capacity: usize) -> Self {
        Self {
            data_type: value_type(data_type).clone(),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Store `value` if it fits the current element type
    ///
    /// Nulls fit any typed column. A value whose type promotes with the column
    /// type to the column type is converted and stored. Anything else leaves
    /// the buffer untouched and asks for a widening. Types with no common
    /// promotion are a `TypeError`.
    pub fn try_push(&mut self, value: &ScalarValue) -> CylonResult<PushOutcome> {
        if value.is_null() && self.data_type != DataType::Null {
            self.values.push(ScalarValue::new_null(&self.data_type)?);
            return Ok(PushOutcome::Pushed);
        }

        let value_type = value.data_type();
        if value_type == self.data_type {
            self.values.push(value.clone());
            return Ok(PushOutcome::Pushed);
        }

        let promoted = promote_types(&self.data_type, &value_type)?;
        if promoted == self.data_type {
            self.values.push(value.cast_to(&self.data_type)?);
            Ok(PushOutcome::Pushed)
        } else {
            Ok(PushOutcome::Widen(promoted))
        }
    }

    /// Re-materialise every stored value as `data_type`
    pub fn widen(&mut self, data_type: &DataType) -> CylonResult<()> {
        let data_type = value_type(data_type).clone();
        for value in self.values.iter_mut() {
            *value = value.cast_to(&data_type)?;
        }
        self.data_type = data_type;
        Ok(())
    }

    /// Store `value`, widening the column as many times as needed
    pub fn push(&mut self, value: &ScalarValue) -> CylonResult<()> {
        loop {
            match self.try_push(value)? {
                PushOutcome::Pushed => return Ok(()),
                PushOutcome::Widen(data_type) => self.widen(&data_type)?,
            }
        }
    }

    /// Build the Arrow array
    pub fn finish(self) -> CylonResult<ArrayRef> {
        ScalarValue::iter_to_array(&self.data_type, self.values)
    }
}
