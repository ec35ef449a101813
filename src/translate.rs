//! Translation of a [`ConfigMap`] into the compiled form the engine consumes.

use crate::config::ConfigMap;
use crate::engine::GraphEngine;
use crate::error::{Error, Result};
use crate::quantization::QuantizationConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// A [`QuantizationConfig`] whose observers have been compiled by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuantizationConfig<O> {
    /// Compiled activation observer
    pub activation: Option<O>,
    /// Compiled weight observer
    pub weight: Option<O>,
}

/// Module path to compiled config; `None` marks a module that must not be quantized
pub type CompiledConfigMap<O> = BTreeMap<String, Option<CompiledQuantizationConfig<O>>>;

/// Compile every entry of `config_map` through `engine`.
///
/// Keys and observer descriptions are checked for the whole map before the first
/// compilation call, so a bad entry anywhere leaves the engine untouched.
pub fn compile_config_map<E: GraphEngine>(
    engine: &mut E,
    config_map: &ConfigMap,
) -> Result<CompiledConfigMap<E::Observer>> {
    let entries = check_entries(config_map)?;

    let mut compiled = CompiledConfigMap::new();
    for (path, config) in entries {
        let value = match config {
            Some(config) => Some(compile_config(engine, config)?),
            None => None,
        };
        compiled.insert(path.to_string(), value);
    }

    debug!("Compiled quantization config for {} module(s)", compiled.len());
    Ok(compiled)
}

fn check_entries(config_map: &ConfigMap) -> Result<Vec<(&str, Option<&QuantizationConfig>)>> {
    let mut entries = Vec::with_capacity(config_map.len());
    for (key, config) in config_map.iter() {
        let path = key.as_str().ok_or_else(|| {
            Error::config(format!(
                "config map should only contain module names (strings) as keys, got {}",
                key
            ))
        })?;
        entries.push((path, config));
    }

    for (path, config) in &entries {
        if let Some(config) = config {
            config.validate().map_err(|err| match err {
                Error::Config { message } => {
                    Error::config(format!("module '{}': {}", path, message))
                }
                other => other,
            })?;
        }
    }

    Ok(entries)
}

fn compile_config<E: GraphEngine>(
    engine: &mut E,
    config: &QuantizationConfig,
) -> Result<CompiledQuantizationConfig<E::Observer>> {
    let activation = match &config.activation {
        Some(spec) => Some(engine.compile_observer(spec)?),
        None => None,
    };
    let weight = match &config.weight {
        Some(spec) => Some(engine.compile_observer(spec)?),
        None => None,
    };
    Ok(CompiledQuantizationConfig { activation, weight })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::ObserverSpec;
    use crate::testing::RecordingEngine;
    use serde_json::json;

    #[test]
    fn test_compiles_both_roles() {
        let mut engine = RecordingEngine::new();
        let mut config_map = ConfigMap::new();
        config_map.insert("", Some(QuantizationConfig::default_static()));
        config_map.insert("fc", None);

        let compiled = compile_config_map(&mut engine, &config_map).unwrap();
        assert_eq!(compiled.len(), 2);
        assert!(compiled["fc"].is_none());
        let root = compiled[""].as_ref().unwrap();
        assert!(root.activation.is_some());
        assert!(root.weight.is_some());
        assert_eq!(engine.count("compile_observer"), 2);
    }

    #[test]
    fn test_absent_role_is_not_compiled() {
        let mut engine = RecordingEngine::new();
        let mut config_map = ConfigMap::new();
        config_map.insert("encoder", Some(QuantizationConfig::default_dynamic()));

        let compiled = compile_config_map(&mut engine, &config_map).unwrap();
        let encoder = compiled["encoder"].as_ref().unwrap();
        assert!(encoder.activation.is_none());
        assert!(encoder.weight.is_some());
        assert_eq!(engine.count("compile_observer"), 1);
    }

    #[test]
    fn test_non_string_key_compiles_nothing() {
        let mut engine = RecordingEngine::new();
        let mut config_map = ConfigMap::new();
        config_map.insert("", Some(QuantizationConfig::default_static()));
        config_map.insert(json!(3), Some(QuantizationConfig::default_static()));

        let err = compile_config_map(&mut engine, &config_map).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_invalid_observer_compiles_nothing() {
        let mut engine = RecordingEngine::new();
        let mut config_map = ConfigMap::new();
        config_map.insert("a", Some(QuantizationConfig::default_static()));
        config_map.insert(
            "b",
            Some(QuantizationConfig::new(
                Some(ObserverSpec::min_max()),
                Some(ObserverSpec::per_channel_min_max(0).with_qscheme(
                    crate::quantization::QScheme::PerTensorSymmetric,
                )),
            )),
        );

        let err = compile_config_map(&mut engine, &config_map).unwrap_err();
        assert!(err.to_string().contains("module 'b'"));
        assert_eq!(engine.count("compile_observer"), 0);
    }

    #[test]
    fn test_engine_failure_propagates() {
        let mut engine = RecordingEngine::new().failing_on("compile_observer");
        let mut config_map = ConfigMap::new();
        config_map.insert("", Some(QuantizationConfig::default_static()));

        let err = compile_config_map(&mut engine, &config_map).unwrap_err();
        assert!(err.is_engine());
    }
}
