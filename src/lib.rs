#![allow(rustdoc::missing_doc_code_examples)]
#![allow(clippy::missing_docs_in_private_items)]

//! qflow - post-training quantization workflows for compiled graphs
//!
//! This crate sequences the passes that turn a compiled floating-point graph into a
//! quantized one. The passes themselves belong to an external graph engine, reached
//! through the [`GraphEngine`] trait; qflow owns the lifecycle around them:
//!
//! - **Validation**: only compiled-graph modules exposing `forward` are accepted
//! - **Configuration**: per-module observer configs, compiled by the engine up front
//! - **Prepare**: submodule dedup, conv/bn folding and observer insertion
//! - **Calibration**: a caller-supplied procedure run once over the observed graph
//! - **Convert**: quant/dequant insertion and, unless debugging, finalization
//! - **Progress Reporting**: configurable callbacks per stage and pass
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use qflow::{quantize_dynamic, ConfigMap, QuantizationConfig, WorkflowOptions};
//!
//! let config = ConfigMap::global(QuantizationConfig::default_dynamic())
//!     .with("classifier", None);
//! let quantized = quantize_dynamic(&mut engine, module, &config, WorkflowOptions::default())?;
//! ```
//!
//! Plans can also be loaded from JSON:
//!
//! ```rust
//! use qflow::{QuantizationPlan, WorkflowMode};
//!
//! let plan = QuantizationPlan::from_json_str(r#"{
//!     "mode": "dynamic",
//!     "qconfig": { "": { "weight": { "kind": "min_max", "dtype": "qint8" } } }
//! }"#)?;
//! assert_eq!(plan.mode, WorkflowMode::Dynamic);
//! # Ok::<(), qflow::Error>(())
//! ```

#![doc(html_root_url = "https://docs.rs/qflow/")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod calibrate;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod guard;
pub mod prepare;
pub mod progress;
pub mod quantization;
pub mod translate;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use calibrate::{calibrate, Calibration, CalibrationFn};
pub use config::{ConfigEntry, ConfigMap, QuantizationPlan, WorkflowOptions};
pub use convert::convert;
pub use engine::{CompiledGraph, GraphEngine, WorkflowMode, ENTRY_POINT};
pub use error::{Error, Result};
pub use guard::{validate, Rejected};
pub use prepare::prepare;
pub use progress::{ProgressEvent, ProgressFn};
pub use quantization::{ObserverSpec, QScheme, QuantDtype, QuantizationConfig};
pub use translate::{compile_config_map, CompiledConfigMap, CompiledQuantizationConfig};
pub use workflow::{
    convert_dynamic, convert_static, prepare_dynamic, prepare_static, quantize_dynamic,
    quantize_static, QuantizationWorkflow, WorkflowState,
};
