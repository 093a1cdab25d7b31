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

//! Cylon context and configuration
//!
//! The context is shared by every table created from it and carries a plain
//! string key/value configuration map. Grouping reads its defaults from the
//! keys below (see [`crate::groupby::GroupByOptions::from_context`]).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::cylon_warn;

/// Config key: sort groups by key values (`"true"` / `"false"`)
pub const CONFIG_GROUPBY_SORT: &str = "groupby.sort";
/// Config key: drop rows whose key contains a null (`"true"` / `"false"`)
pub const CONFIG_GROUPBY_SKIPMISSING: &str = "groupby.skipmissing";
/// Config key: order null keys before all values when sorting (`"true"` / `"false"`)
pub const CONFIG_GROUPBY_NULLS_FIRST: &str = "groupby.nulls_first";

/// The entry point to cylon operations
#[derive(Debug)]
pub struct CylonContext {
    config: RwLock<HashMap<String, String>>,
}

impl CylonContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self {
            config: RwLock::new(HashMap::new()),
        }
    }

    /// Initializes a shared context
    pub fn init() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Adds a configuration entry, replacing any previous value
    pub fn add_config(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        config.insert(key.into(), value.into());
    }

    /// Returns a configuration entry or `default` when it is absent
    pub fn get_config(&self, key: &str, default: &str) -> String {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        config.get(key).cloned().unwrap_or_else(|| default.to_string())
    }

    /// Reads a boolean configuration entry
    ///
    /// Unparseable values fall back to `default` and are reported with a warning.
    pub fn get_bool_config(&self, key: &str, default: bool) -> bool {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        match config.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => default,
            Some(v) if v == "true" || v == "1" || v == "yes" => true,
            Some(v) if v == "false" || v == "0" || v == "no" => false,
            Some(v) => {
                cylon_warn!("Ignoring invalid boolean value '{}' for config '{}'", v, key);
                default
            }
        }
    }
}

impl Default for CylonContext {
    fn default() -> Self {
        Self::new()
    }
}
