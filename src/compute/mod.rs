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

//! Compute operations and aggregations
//!
//! Per-group reductions over a membership array, whole-array reductions, and
//! the registry that maps each reduction to its fast-path descriptor.

pub mod aggregate_kernels;
pub mod group_aggregates;
pub mod scalar_aggregate;

pub use aggregate_kernels::{
    Adjust,
    AggregateDescriptor,
    AggregationOpId,
    ElementFilter,
    ReduceOp,
    Reduction,
};

pub use group_aggregates::{group_aggregate, GroupBounds};
pub use scalar_aggregate::reduce_array;
