//! Quantization workflow state machine and entry points
//!
//! A graph moves through `Raw → Validated → Prepared → Calibrated → Converted`.
//! Dynamic workflows skip `Calibrated`. A failed pass or calibration run drops the
//! working graph and returns the workflow to `Raw`: passes are not rollback-safe, so a
//! failed run must restart from an untouched module. Checks that fail before any pass
//! runs leave the state and the graph as they were, and a module refused by
//! [`QuantizationWorkflow::validate`] is handed back in the [`Rejected`] error.
//!
//! # Example
//!
//! ```rust,ignore
//! use qflow::{quantize_static, Calibration, ConfigMap, QuantizationConfig, WorkflowOptions};
//!
//! let config = ConfigMap::global(QuantizationConfig::default_static());
//! let calibration = Calibration::new(
//!     |module: &mut MyModule, batches: &[Batch]| {
//!         for batch in batches {
//!             module.run("forward", batch)?;
//!         }
//!         Ok(())
//!     },
//!     calibration_batches,
//! );
//! let quantized = quantize_static(&mut engine, module, &config, calibration, WorkflowOptions::default())?;
//! ```
//!
//! Running a workflow again on its own quantized output is not supported.

use crate::calibrate::{calibrate_reporting, Calibration};
use crate::config::{ConfigMap, WorkflowOptions};
use crate::convert::convert_reporting;
use crate::engine::{CompiledGraph, GraphEngine, WorkflowMode};
use crate::error::{Error, Result};
use crate::guard::{self, Rejected};
use crate::prepare::prepare_reporting;
use crate::progress::{ProgressEvent, ProgressFn, ProgressTimer};
use crate::translate::compile_config_map;
use std::fmt;
use tracing::info;

/// Where a graph is in the quantization lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    /// No graph accepted yet (or the last pass failed)
    Raw,
    /// Graph is compiled and exposes `forward`
    Validated,
    /// Observers are attached
    Prepared,
    /// Observers hold calibration statistics
    Calibrated,
    /// Quantized graph produced
    Converted,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::Raw => "raw",
            WorkflowState::Validated => "validated",
            WorkflowState::Prepared => "prepared",
            WorkflowState::Calibrated => "calibrated",
            WorkflowState::Converted => "converted",
        };
        f.write_str(name)
    }
}

/// Drives one graph through validation, preparation, calibration and conversion
pub struct QuantizationWorkflow<E: GraphEngine> {
    engine: E,
    mode: WorkflowMode,
    options: WorkflowOptions,
    state: WorkflowState,
    graph: Option<CompiledGraph<E::Module>>,
    timer: ProgressTimer,
}

impl<E: GraphEngine> QuantizationWorkflow<E> {
    /// Create a workflow; in-place options are rejected here
    pub fn new(engine: E, mode: WorkflowMode, options: WorkflowOptions) -> Result<Self> {
        options.check()?;
        Ok(Self {
            engine,
            mode,
            options,
            state: WorkflowState::Raw,
            graph: None,
            timer: ProgressTimer::new(None),
        })
    }

    /// Report progress events to `progress_fn`
    pub fn with_progress(mut self, progress_fn: ProgressFn) -> Self {
        self.timer = ProgressTimer::new(Some(progress_fn));
        self
    }

    /// Current state
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Static or dynamic
    pub fn mode(&self) -> WorkflowMode {
        self.mode
    }

    /// Options in effect
    pub fn options(&self) -> WorkflowOptions {
        self.options
    }

    /// The engine driving the passes
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The working graph, if one has been accepted
    pub fn graph(&self) -> Option<&E::Module> {
        self.graph.as_ref().map(CompiledGraph::module)
    }

    /// `Raw → Validated`: accept `module` if it is a compiled graph with `forward`.
    ///
    /// A refused module is returned untouched inside the error.
    pub fn validate(
        &mut self,
        module: E::Module,
    ) -> std::result::Result<(), Rejected<E::Module>> {
        if let Err(err) = self.expect_state(WorkflowState::Raw, WorkflowState::Validated) {
            return Err(Rejected::new(err, module));
        }
        self.timer.report(ProgressEvent::ValidatingGraph);

        let graph = guard::check_module(&self.engine, module)?;
        self.graph = Some(graph);
        self.advance(WorkflowState::Validated);
        Ok(())
    }

    /// `Validated → Prepared`: compile `config_map` and attach observers.
    ///
    /// A config that fails to compile leaves the workflow `Validated` with its graph.
    pub fn prepare(&mut self, config_map: &ConfigMap) -> Result<()> {
        self.expect_state(WorkflowState::Validated, WorkflowState::Prepared)?;

        self.timer.report(ProgressEvent::CompilingConfig {
            modules: config_map.len(),
        });
        let compiled = compile_config_map(&mut self.engine, config_map)?;

        let graph = self.take_graph()?;
        let result = prepare_reporting(
            &mut self.engine,
            graph,
            &compiled,
            self.mode,
            self.options.in_place,
            &self.timer,
        );
        self.settle(result, WorkflowState::Prepared)
    }

    /// `Prepared → Calibrated`: run the calibration procedure (static only)
    pub fn calibrate<F, A>(&mut self, calibration: Calibration<F, A>) -> Result<()>
    where
        F: FnOnce(&mut E::Module, &[A]) -> anyhow::Result<()>,
    {
        if self.mode.is_dynamic() {
            return Err(Error::invalid_transition(
                format!("{} ({})", self.state, self.mode),
                WorkflowState::Calibrated,
            ));
        }
        self.expect_state(WorkflowState::Prepared, WorkflowState::Calibrated)?;
        calibration.check()?;

        let mut graph = self.take_graph()?;
        match calibrate_reporting(&mut graph, calibration, &self.timer) {
            Ok(()) => {
                self.graph = Some(graph);
                self.advance(WorkflowState::Calibrated);
                Ok(())
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    /// `Calibrated → Converted` (static) or `Prepared → Converted` (dynamic)
    pub fn convert(&mut self) -> Result<()> {
        let ready = match self.mode {
            WorkflowMode::Static => WorkflowState::Calibrated,
            WorkflowMode::Dynamic => WorkflowState::Prepared,
        };
        self.expect_state(ready, WorkflowState::Converted)?;

        let graph = self.take_graph()?;
        let result = convert_reporting(
            &mut self.engine,
            graph,
            self.mode,
            self.options.debug,
            self.options.in_place,
            &self.timer,
        );
        self.settle(result, WorkflowState::Converted)?;
        let elapsed = self.timer.complete(self.mode, self.options.debug);
        info!("{} quantization finished in {:.2}s", self.mode, elapsed);
        Ok(())
    }

    /// Take the quantized module out of a converted workflow
    pub fn into_graph(self) -> Result<E::Module> {
        if self.state != WorkflowState::Converted {
            return Err(Error::invalid_transition(self.state, WorkflowState::Converted));
        }
        self.graph
            .map(CompiledGraph::into_module)
            .ok_or_else(|| Error::invalid_transition(WorkflowState::Raw, WorkflowState::Converted))
    }

    /// Split into the engine and whatever graph the workflow currently holds
    pub fn into_parts(self) -> (E, Option<E::Module>) {
        (self.engine, self.graph.map(CompiledGraph::into_module))
    }

    fn expect_state(&self, expected: WorkflowState, next: WorkflowState) -> Result<()> {
        if self.state != expected {
            return Err(Error::invalid_transition(self.state, next));
        }
        Ok(())
    }

    fn take_graph(&mut self) -> Result<CompiledGraph<E::Module>> {
        let state = self.state;
        self.graph
            .take()
            .ok_or_else(|| Error::invalid_transition(state, WorkflowState::Validated))
    }

    fn settle(
        &mut self,
        result: Result<CompiledGraph<E::Module>>,
        next: WorkflowState,
    ) -> Result<()> {
        match result {
            Ok(graph) => {
                self.graph = Some(graph);
                self.advance(next);
                Ok(())
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    fn advance(&mut self, next: WorkflowState) {
        info!("Quantization workflow ({}): {} → {}", self.mode, self.state, next);
        self.state = next;
    }

    fn reset(&mut self) {
        info!(
            "Quantization workflow ({}) failed in state {}; restart from raw",
            self.mode, self.state
        );
        self.graph = None;
        self.state = WorkflowState::Raw;
    }
}

impl<E: GraphEngine> fmt::Debug for QuantizationWorkflow<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantizationWorkflow")
            .field("mode", &self.mode)
            .field("options", &self.options)
            .field("state", &self.state)
            .field("has_graph", &self.graph.is_some())
            .finish()
    }
}

/// Post-training static quantization of a compiled module.
///
/// Fails before touching the module if `options` asks for in-place rewriting or the
/// calibration procedure or its arguments are missing. The module is consumed either
/// way; drive a [`QuantizationWorkflow`] directly to get a refused module back.
pub fn quantize_static<E, F, A>(
    engine: E,
    module: E::Module,
    config_map: &ConfigMap,
    calibration: Calibration<F, A>,
    options: WorkflowOptions,
) -> Result<E::Module>
where
    E: GraphEngine,
    F: FnOnce(&mut E::Module, &[A]) -> anyhow::Result<()>,
{
    options.check()?;
    calibration.check()?;

    let mut workflow = QuantizationWorkflow::new(engine, WorkflowMode::Static, options)?;
    workflow.validate(module)?;
    workflow.prepare(config_map)?;
    workflow.calibrate(calibration)?;
    workflow.convert()?;
    workflow.into_graph()
}

/// Dynamic quantization of a compiled module; no calibration is run
pub fn quantize_dynamic<E: GraphEngine>(
    engine: E,
    module: E::Module,
    config_map: &ConfigMap,
    options: WorkflowOptions,
) -> Result<E::Module> {
    options.check()?;

    let mut workflow = QuantizationWorkflow::new(engine, WorkflowMode::Dynamic, options)?;
    workflow.validate(module)?;
    workflow.prepare(config_map)?;
    workflow.convert()?;
    workflow.into_graph()
}

fn prepare_module<E: GraphEngine>(
    mut engine: E,
    module: E::Module,
    config_map: &ConfigMap,
    mode: WorkflowMode,
    in_place: bool,
) -> Result<E::Module> {
    if in_place {
        return Err(Error::in_place_unsupported());
    }
    let graph = guard::check_module(&engine, module)?;
    let compiled = compile_config_map(&mut engine, config_map)?;
    let observed = crate::prepare::prepare(&mut engine, graph, &compiled, mode, in_place)?;
    Ok(observed.into_module())
}

fn convert_module<E: GraphEngine>(
    mut engine: E,
    module: E::Module,
    mode: WorkflowMode,
    in_place: bool,
    debug: bool,
) -> Result<E::Module> {
    if in_place {
        return Err(Error::in_place_unsupported());
    }
    let graph = CompiledGraph::new(&engine, module)?;
    let quantized = crate::convert::convert(&mut engine, graph, mode, debug, in_place)?;
    Ok(quantized.into_module())
}

/// Attach static observers; calibrate the result yourself, then call [`convert_static`]
pub fn prepare_static<E: GraphEngine>(
    engine: E,
    module: E::Module,
    config_map: &ConfigMap,
    in_place: bool,
) -> Result<E::Module> {
    prepare_module(engine, module, config_map, WorkflowMode::Static, in_place)
}

/// Attach dynamic observers; follow with [`convert_dynamic`]
pub fn prepare_dynamic<E: GraphEngine>(
    engine: E,
    module: E::Module,
    config_map: &ConfigMap,
    in_place: bool,
) -> Result<E::Module> {
    prepare_module(engine, module, config_map, WorkflowMode::Dynamic, in_place)
}

/// Convert a prepared and calibrated module
pub fn convert_static<E: GraphEngine>(
    engine: E,
    module: E::Module,
    in_place: bool,
    debug: bool,
) -> Result<E::Module> {
    convert_module(engine, module, WorkflowMode::Static, in_place, debug)
}

/// Convert a module prepared with [`prepare_dynamic`]
pub fn convert_dynamic<E: GraphEngine>(
    engine: E,
    module: E::Module,
    in_place: bool,
    debug: bool,
) -> Result<E::Module> {
    convert_module(engine, module, WorkflowMode::Dynamic, in_place, debug)
}
