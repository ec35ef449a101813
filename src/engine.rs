//! Port to the external graph-rewriting engine.
//!
//! The workflow never touches graph IR directly. Every mutation goes through a
//! [`GraphEngine`], which owns the compiled-module representation, the observer
//! compiler and the rewriting passes. Passes take the module by value and hand back
//! the module the caller must continue with; an engine is free to mutate in place and
//! return the same module, or build a new one.

use crate::quantization::ObserverSpec;
use crate::translate::CompiledConfigMap;
use std::fmt;

/// Name of the entry point every quantized graph must expose
pub const ENTRY_POINT: &str = "forward";

/// Operations the workflow needs from a compiled-graph engine.
///
/// All pass methods are expected to either apply fully or fail; a failure is
/// forwarded to the caller unchanged.
pub trait GraphEngine {
    /// Engine-native compiled module
    type Module;

    /// Compiled form of an [`ObserverSpec`]
    type Observer: Clone + fmt::Debug;

    /// Whether `module` is a compiled-graph module this engine can rewrite
    fn is_compiled_graph(&self, module: &Self::Module) -> bool;

    /// Short description of a module, used in errors and logs
    fn describe(&self, _module: &Self::Module) -> String {
        std::any::type_name::<Self::Module>().to_string()
    }

    /// Whether `module` exposes a callable method called `name`
    fn has_method(&self, module: &Self::Module, name: &str) -> bool;

    /// Compile an observer description into the engine's executable form
    fn compile_observer(&mut self, spec: &ObserverSpec) -> anyhow::Result<Self::Observer>;

    /// Give every call site of a shared submodule its own copy
    fn dedup_module_uses(&mut self, module: Self::Module) -> anyhow::Result<Self::Module>;

    /// Fold convolution + batch-norm pairs into single convolutions
    fn fold_conv_bn(&mut self, module: Self::Module) -> anyhow::Result<Self::Module>;

    /// Attach observers to `method` according to `qconfig`
    fn insert_observers(
        &mut self,
        module: Self::Module,
        method: &str,
        qconfig: &CompiledConfigMap<Self::Observer>,
        in_place: bool,
        is_dynamic: bool,
    ) -> anyhow::Result<Self::Module>;

    /// Switch the module to inference behaviour
    fn set_eval(&mut self, module: Self::Module) -> anyhow::Result<Self::Module>;

    /// Replace observers on `method` with quantize/dequantize pairs
    fn insert_quant_dequant(
        &mut self,
        module: Self::Module,
        method: &str,
        in_place: bool,
        is_dynamic: bool,
    ) -> anyhow::Result<Self::Module>;

    /// Fuse quantize/dequantize pairs into quantized kernels
    fn finalize_quant(
        &mut self,
        module: Self::Module,
        is_dynamic: bool,
    ) -> anyhow::Result<Self::Module>;
}

impl<E: GraphEngine + ?Sized> GraphEngine for &mut E {
    type Module = E::Module;
    type Observer = E::Observer;

    fn is_compiled_graph(&self, module: &Self::Module) -> bool {
        (**self).is_compiled_graph(module)
    }

    fn describe(&self, module: &Self::Module) -> String {
        (**self).describe(module)
    }

    fn has_method(&self, module: &Self::Module, name: &str) -> bool {
        (**self).has_method(module, name)
    }

    fn compile_observer(&mut self, spec: &ObserverSpec) -> anyhow::Result<Self::Observer> {
        (**self).compile_observer(spec)
    }

    fn dedup_module_uses(&mut self, module: Self::Module) -> anyhow::Result<Self::Module> {
        (**self).dedup_module_uses(module)
    }

    fn fold_conv_bn(&mut self, module: Self::Module) -> anyhow::Result<Self::Module> {
        (**self).fold_conv_bn(module)
    }

    fn insert_observers(
        &mut self,
        module: Self::Module,
        method: &str,
        qconfig: &CompiledConfigMap<Self::Observer>,
        in_place: bool,
        is_dynamic: bool,
    ) -> anyhow::Result<Self::Module> {
        (**self).insert_observers(module, method, qconfig, in_place, is_dynamic)
    }

    fn set_eval(&mut self, module: Self::Module) -> anyhow::Result<Self::Module> {
        (**self).set_eval(module)
    }

    fn insert_quant_dequant(
        &mut self,
        module: Self::Module,
        method: &str,
        in_place: bool,
        is_dynamic: bool,
    ) -> anyhow::Result<Self::Module> {
        (**self).insert_quant_dequant(module, method, in_place, is_dynamic)
    }

    fn finalize_quant(
        &mut self,
        module: Self::Module,
        is_dynamic: bool,
    ) -> anyhow::Result<Self::Module> {
        (**self).finalize_quant(module, is_dynamic)
    }
}

/// A module known to carry the compiled-graph capability.
///
/// Only [`CompiledGraph::new`] can wrap an arbitrary module, and it asks the engine
/// first. Stages consume the handle and return a fresh one wrapping whatever module
/// the last pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGraph<M> {
    module: M,
}

impl<M> CompiledGraph<M> {
    /// Wrap a pass result. Engines only hand back compiled modules.
    pub(crate) fn rebind(module: M) -> Self {
        Self { module }
    }

    /// Borrow the wrapped module
    pub fn module(&self) -> &M {
        &self.module
    }

    /// Mutably borrow the wrapped module
    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    /// Unwrap the module
    pub fn into_module(self) -> M {
        self.module
    }
}

/// Whether a workflow quantizes activations ahead of time or per call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// Activation ranges come from a calibration run
    Static,
    /// Activation ranges are computed on every call
    Dynamic,
}

impl WorkflowMode {
    /// Whether this is dynamic quantization
    pub fn is_dynamic(self) -> bool {
        matches!(self, WorkflowMode::Dynamic)
    }
}

impl Default for WorkflowMode {
    fn default() -> Self {
        Self::Static
    }
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowMode::Static => f.write_str("static"),
            WorkflowMode::Dynamic => f.write_str("dynamic"),
        }
    }
}
