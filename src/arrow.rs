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

//! Arrow element semantics: row hashing and ordering of key columns

pub mod arrow_comparator;
pub mod arrow_hash_kernels;
pub mod arrow_types;

pub use arrow_comparator::{create_comparator, ArrayIndexComparator, DictionaryRanks, NullOrder, TableRowIndexEqualTo};
pub use arrow_hash_kernels::{create_row_hash_kernel, RowHashKernel, TableRowIndexHash};
