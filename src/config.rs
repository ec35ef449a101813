//! Quantization configuration maps, workflow options and plan files
//!
//! A [`ConfigMap`] assigns a [`QuantizationConfig`] to qualified module paths. The
//! empty path names the root module. Maps can be built in code or loaded from JSON,
//! either as an object keyed by module path or as a list of entries:
//!
//! ```json
//! {
//!   "mode": "static",
//!   "options": { "debug": false },
//!   "qconfig": [
//!     { "module": "", "qconfig": { "activation": { "kind": "histogram" } } },
//!     { "module": "classifier", "qconfig": null }
//!   ]
//! }
//! ```

use crate::engine::WorkflowMode;
use crate::error::{Error, Result};
use crate::quantization::QuantizationConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One `module → qconfig` assignment as it appears in entry-list form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Module path; anything other than a string is rejected at translation time
    pub module: Value,
    /// Config for the module, `null` to leave it unquantized
    #[serde(default)]
    pub qconfig: Option<QuantizationConfig>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigMapRepr {
    Entries(Vec<ConfigEntry>),
    Object(BTreeMap<String, Option<QuantizationConfig>>),
}

/// Ordered mapping from module path to optional quantization config.
///
/// Keys are kept as raw JSON values so configs coming from untyped sources keep
/// whatever key they were given; the translator rejects non-string keys before it
/// compiles anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConfigMapRepr", into = "Vec<ConfigEntry>")]
pub struct ConfigMap {
    entries: Vec<(Value, Option<QuantizationConfig>)>,
}

impl From<ConfigMapRepr> for ConfigMap {
    fn from(repr: ConfigMapRepr) -> Self {
        let mut map = ConfigMap::new();
        match repr {
            ConfigMapRepr::Entries(entries) => {
                for entry in entries {
                    map.insert(entry.module, entry.qconfig);
                }
            }
            ConfigMapRepr::Object(object) => {
                for (path, qconfig) in object {
                    map.insert(path, qconfig);
                }
            }
        }
        map
    }
}

impl From<ConfigMap> for Vec<ConfigEntry> {
    fn from(map: ConfigMap) -> Self {
        map.entries
            .into_iter()
            .map(|(module, qconfig)| ConfigEntry { module, qconfig })
            .collect()
    }
}

impl ConfigMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Map with a single root (`""`) entry
    pub fn global(config: QuantizationConfig) -> Self {
        let mut map = Self::new();
        map.insert("", Some(config));
        map
    }

    /// Assign `config` to `key`, replacing any earlier assignment for the same key
    pub fn insert(&mut self, key: impl Into<Value>, config: Option<QuantizationConfig>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = config,
            None => self.entries.push((key, config)),
        }
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, key: impl Into<Value>, config: Option<QuantizationConfig>) -> Self {
        self.insert(key, config);
        self
    }

    /// Config assigned to a module path, if any
    pub fn get(&self, path: &str) -> Option<&QuantizationConfig> {
        self.entries
            .iter()
            .find(|(key, _)| key.as_str() == Some(path))
            .and_then(|(_, config)| config.as_ref())
    }

    /// Iterate over entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&Value, Option<&QuantizationConfig>)> {
        self.entries
            .iter()
            .map(|(key, config)| (key, config.as_ref()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a map from JSON (object or entry-list form)
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<K: Into<Value>> FromIterator<(K, Option<QuantizationConfig>)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, Option<QuantizationConfig>)>>(iter: I) -> Self {
        let mut map = ConfigMap::new();
        for (key, config) in iter {
            map.insert(key, config);
        }
        map
    }
}

/// Knobs shared by the prepare and convert stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Rewrite the caller's module in place. Not supported; always rejected.
    #[serde(default)]
    pub in_place: bool,
    /// Stop conversion after quant/dequant insertion, skipping finalization
    #[serde(default)]
    pub debug: bool,
}

impl WorkflowOptions {
    /// Options with debug conversion enabled
    pub fn debug() -> Self {
        Self {
            debug: true,
            ..Self::default()
        }
    }

    /// Set debug conversion
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Request in-place rewriting (which [`check`](Self::check) rejects)
    pub fn with_in_place(mut self, in_place: bool) -> Self {
        self.in_place = in_place;
        self
    }

    /// Reject option combinations the workflow cannot honour
    pub fn check(&self) -> Result<()> {
        if self.in_place {
            return Err(Error::in_place_unsupported());
        }
        Ok(())
    }
}

/// A complete quantization request loaded from a file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantizationPlan {
    /// Static or dynamic quantization
    #[serde(default)]
    pub mode: WorkflowMode,
    /// Workflow options
    #[serde(default)]
    pub options: WorkflowOptions,
    /// Per-module configs
    #[serde(default)]
    pub qconfig: ConfigMap,
}

impl QuantizationPlan {
    /// Load a plan from a JSON file
    ///
    /// # Examples
    /// ```rust,no_run
    /// use qflow::config::QuantizationPlan;
    ///
    /// let plan = QuantizationPlan::from_file("./plans/resnet18.json")?;
    /// println!("{} module(s) configured", plan.qconfig.len());
    /// # Ok::<(), qflow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read plan {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Parse a plan from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let plan: Self = serde_json::from_str(json)?;
        Ok(plan)
    }

    /// Write the plan as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
