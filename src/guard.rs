//! Structural checks run before any graph pass.
//!
//! The checks never touch the module. A refused module comes back to the caller in a
//! [`Rejected`] together with the reason, so it can be fixed up and offered again.

use crate::engine::{CompiledGraph, GraphEngine, ENTRY_POINT};
use crate::error::Error;
use std::fmt;
use tracing::debug;

/// A module the guard refused, returned untouched
pub struct Rejected<M> {
    /// Why the module was refused
    pub error: Error,
    /// The module exactly as it was passed in
    pub module: M,
}

impl<M> Rejected<M> {
    /// Create a rejection for `module`
    pub fn new(error: Error, module: M) -> Self {
        Self { error, module }
    }

    /// Split into the error and the module
    pub fn into_parts(self) -> (Error, M) {
        (self.error, self.module)
    }
}

impl<M> From<Rejected<M>> for Error {
    fn from(rejected: Rejected<M>) -> Self {
        rejected.error
    }
}

impl<M> fmt::Debug for Rejected<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<M> fmt::Display for Rejected<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<M> CompiledGraph<M> {
    /// Wrap `module` after confirming it is a compiled-graph module.
    ///
    /// This is the only way to get a [`CompiledGraph`] from an arbitrary module, so
    /// stages downstream never repeat the capability check.
    pub fn new<E>(engine: &E, module: M) -> Result<Self, Rejected<M>>
    where
        E: GraphEngine<Module = M> + ?Sized,
    {
        if !engine.is_compiled_graph(&module) {
            let error = Error::not_compiled_graph(engine.describe(&module));
            return Err(Rejected::new(error, module));
        }
        Ok(Self::rebind(module))
    }
}

/// Confirm the graph exposes a callable `forward` entry point
pub fn validate<E>(
    engine: &E,
    graph: CompiledGraph<E::Module>,
) -> Result<CompiledGraph<E::Module>, Rejected<E::Module>>
where
    E: GraphEngine + ?Sized,
{
    if !engine.has_method(graph.module(), ENTRY_POINT) {
        let error = Error::missing_entry_point(ENTRY_POINT);
        return Err(Rejected::new(error, graph.into_module()));
    }
    debug!("Validated compiled graph: {}", engine.describe(graph.module()));
    Ok(graph)
}

/// Wrap and validate a raw module in one step
pub fn check_module<E>(
    engine: &E,
    module: E::Module,
) -> Result<CompiledGraph<E::Module>, Rejected<E::Module>>
where
    E: GraphEngine + ?Sized,
{
    let graph = CompiledGraph::new(engine, module)?;
    validate(engine, graph)
}
