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

//! Cylon GroupBy: split-apply-combine over Arrow-backed tables
//!
//! Rows of a [`Table`] are partitioned by key columns into a
//! [`GroupedTable`]; functions or built-in reductions are applied per group
//! and the results combined back into a table.
//!
//! ```ignore
//! use cylon_groupby::compute::{AggregationOpId, Reduction};
//! use cylon_groupby::groupby::{combine, partition, Transform};
//!
//! let grouped = partition(table, &[0], false, false)?;
//! let sums = combine(&grouped, &[Transform::reduce("b", Reduction::new(AggregationOpId::Sum))], true)?;
//! ```

pub mod arrow;
pub mod compute;
pub mod ctx;
pub mod data_types;
pub mod error;
pub mod groupby;
pub mod scalar;
pub mod table;
pub mod util;

// Re-export commonly used types
pub use crate::ctx::CylonContext;
pub use crate::error::{Code, CylonError, CylonResult};
pub use crate::groupby::{GroupByOptions, GroupedTable};
pub use crate::scalar::ScalarValue;
pub use crate::table::Table;

/// The main entry point and version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
