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

//! Aggregate kernel definitions
//!
//! This module defines:
//! - `AggregationOpId` - Enum of aggregation operation types
//! - `Reduction` - an operation plus its skip-missing condition; the token the
//!   apply engine uses to recognise a fast-path reduction
//! - `AggregateDescriptor` - the `{reduce, filter, adjust}` triple each
//!   reduction resolves to through the registry

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use arrow::array::ArrayRef;

use super::scalar_aggregate::reduce_array;
use crate::cylon_debug;
use crate::error::{Code, CylonError, CylonResult};
use crate::scalar::ScalarValue;

/// Aggregation operation identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationOpId {
    Sum,
    Prod,
    Min,
    Max,
    Mean,
    Var,
    Std,
    First,
    Last,
    Length,
}

impl AggregationOpId {
    pub const ALL: [AggregationOpId; 10] = [
        AggregationOpId::Sum,
        AggregationOpId::Prod,
        AggregationOpId::Min,
        AggregationOpId::Max,
        AggregationOpId::Mean,
        AggregationOpId::Var,
        AggregationOpId::Std,
        AggregationOpId::First,
        AggregationOpId::Last,
        AggregationOpId::Length,
    ];

    /// Name used in output column names
    pub fn name(&self) -> &'static str {
        match self {
            AggregationOpId::Sum => "sum",
            AggregationOpId::Prod => "prod",
            AggregationOpId::Min => "min",
            AggregationOpId::Max => "max",
            AggregationOpId::Mean => "mean",
            AggregationOpId::Var => "var",
            AggregationOpId::Std => "std",
            AggregationOpId::First => "first",
            AggregationOpId::Last => "last",
            AggregationOpId::Length => "length",
        }
    }
}

impl fmt::Display for AggregationOpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name().to_uppercase())
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// The binary reduction a fast path folds each group with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum seeded with zero
    Add,
    /// Product seeded with one
    Mul,
    /// Smallest element, NaN winning
    Min,
    /// Largest element, NaN winning
    Max,
    /// First element in row order
    First,
    /// Last element in row order
    Last,
    /// Number of elements
    Count,
    /// Running sum and count, finished by an [`Adjust`]
    Moments,
}

/// Post-reduction step applied per group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    /// Divide the sum by the number of contributing elements
    DivideByCount,
    /// Sum of squared deviations over `count - 1`
    SampleVariance,
    /// Square root of the sample variance
    SampleStd,
}

/// Element filter: receives whether the element is present (non-null)
pub type ElementFilter = fn(bool) -> bool;

fn is_present(valid: bool) -> bool {
    valid
}

/// How a reduction is computed by the fast path
#[derive(Debug, Clone, Copy)]
pub struct AggregateDescriptor {
    pub reduce: ReduceOp,
    pub filter: Option<ElementFilter>,
    pub adjust: Option<Adjust>,
}

impl AggregateDescriptor {
    fn for_op(op: AggregationOpId, skip_missing: bool) -> Self {
        let (reduce, adjust) = match op {
            AggregationOpId::Sum => (ReduceOp::Add, None),
            AggregationOpId::Prod => (ReduceOp::Mul, None),
            AggregationOpId::Min => (ReduceOp::Min, None),
            AggregationOpId::Max => (ReduceOp::Max, None),
            AggregationOpId::Mean => (ReduceOp::Moments, Some(Adjust::DivideByCount)),
            AggregationOpId::Var => (ReduceOp::Moments, Some(Adjust::SampleVariance)),
            AggregationOpId::Std => (ReduceOp::Moments, Some(Adjust::SampleStd)),
            AggregationOpId::First => (ReduceOp::First, None),
            AggregationOpId::Last => (ReduceOp::Last, None),
            AggregationOpId::Length => (ReduceOp::Count, None),
        };
        let filter = if skip_missing { Some(is_present as ElementFilter) } else { None };
        Self { reduce, filter, adjust }
    }
}

static REGISTRY: OnceLock<HashMap<Reduction, AggregateDescriptor>> = OnceLock::new();

fn registry() -> &'static HashMap<Reduction, AggregateDescriptor> {
    REGISTRY.get_or_init(|| {
        let mut descriptors = HashMap::new();
        for op in AggregationOpId::ALL {
            for skip_missing in [false, true] {
                descriptors.insert(
                    Reduction { op, skip_missing },
                    AggregateDescriptor::for_op(op, skip_missing),
                );
            }
        }
        cylon_debug!("Registered {} aggregate fast paths", descriptors.len());
        descriptors
    })
}

// ============================================================================
// Reductions
// ============================================================================

/// A reduction applied to one column of each group
///
/// `skip_missing` drops null elements before reducing, the way
/// `sum(skipmissing(x))` does; without it a null makes the group's result null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reduction {
    pub op: AggregationOpId,
    pub skip_missing: bool,
}

impl Reduction {
    pub fn new(op: AggregationOpId) -> Self {
        Self { op, skip_missing: false }
    }

    pub fn skip_missing(op: AggregationOpId) -> Self {
        Self { op, skip_missing: true }
    }

    /// Default output column name for this reduction over `column`
    pub fn output_name(&self, column: &str) -> String {
        if self.skip_missing {
            format!("{}_{}_skipmissing", column, self.op.name())
        } else {
            format!("{}_{}", column, self.op.name())
        }
    }

    /// The registered fast path for this reduction
    pub fn descriptor(&self) -> CylonResult<&'static AggregateDescriptor> {
        registry().get(self).ok_or_else(|| {
            CylonError::new(
                Code::NotImplemented,
                format!("No aggregate registered for {:?}", self),
            )
        })
    }

    /// Reduce a whole array to one value
    ///
    /// This is the per-group form of the reduction, computed with the arrow
    /// array kernels; the grouped fast path must agree with it.
    pub fn evaluate(&self, values: &ArrayRef) -> CylonResult<ScalarValue> {
        reduce_array(values, *self)
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skip_missing {
            write!(f, "{}(skipmissing)", self.op)
        } else {
            write!(f, "{}", self.op)
        }
    }
}
