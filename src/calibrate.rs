//! Calibration of an observed graph (static workflows only).
//!
//! The caller supplies a procedure that runs the observed module over representative
//! inputs. Observers accumulate statistics inside the module as a side effect; the
//! handle itself is not replaced.

use crate::engine::CompiledGraph;
use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressTimer};
use tracing::info;

/// Boxed calibration procedure, for callers that need a nameable type
pub type CalibrationFn<M, A> = Box<dyn FnOnce(&mut M, &[A]) -> anyhow::Result<()>>;

/// A calibration procedure together with the arguments it runs over
pub struct Calibration<F, A> {
    run_fn: Option<F>,
    run_args: Option<Vec<A>>,
}

impl<F, A> Calibration<F, A> {
    /// Calibrate by calling `run_fn(module, &run_args)` once
    pub fn new(run_fn: F, run_args: Vec<A>) -> Self {
        Self {
            run_fn: Some(run_fn),
            run_args: Some(run_args),
        }
    }

    /// Build from parts that may be missing; [`check`](Self::check) reports which
    pub fn from_parts(run_fn: Option<F>, run_args: Option<Vec<A>>) -> Self {
        Self { run_fn, run_args }
    }

    /// Fail with [`Error::CalibrationRequired`] unless both parts are present.
    ///
    /// An empty argument list counts as missing.
    pub fn check(&self) -> Result<()> {
        match self.missing() {
            Some(missing) => Err(Error::CalibrationRequired { missing }),
            None => Ok(()),
        }
    }

    /// Unpack a complete calibration, or report the first missing part
    pub fn into_parts(self) -> Result<(F, Vec<A>)> {
        match (self.run_fn, self.run_args) {
            (Some(run_fn), Some(run_args)) if !run_args.is_empty() => Ok((run_fn, run_args)),
            (None, _) => Err(Error::CalibrationRequired { missing: "run_fn" }),
            (Some(_), _) => Err(Error::CalibrationRequired {
                missing: "run_args",
            }),
        }
    }

    fn missing(&self) -> Option<&'static str> {
        match (&self.run_fn, &self.run_args) {
            (None, _) => Some("run_fn"),
            (Some(_), Some(args)) if !args.is_empty() => None,
            (Some(_), _) => Some("run_args"),
        }
    }

    /// Number of calibration arguments
    pub fn len(&self) -> usize {
        self.run_args.as_ref().map_or(0, Vec::len)
    }

    /// Whether there are no calibration arguments
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M, A> Calibration<CalibrationFn<M, A>, A> {
    /// Box `run_fn` so the calibration has a nameable type
    pub fn boxed<F>(run_fn: F, run_args: Vec<A>) -> Self
    where
        F: FnOnce(&mut M, &[A]) -> anyhow::Result<()> + 'static,
    {
        Self::new(Box::new(run_fn), run_args)
    }
}

impl<F, A> std::fmt::Debug for Calibration<F, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calibration")
            .field("has_run_fn", &self.run_fn.is_some())
            .field("run_args", &self.run_args.as_ref().map(Vec::len))
            .finish()
    }
}

/// Run the calibration procedure over `graph` exactly once
pub fn calibrate<M, F, A>(graph: &mut CompiledGraph<M>, calibration: Calibration<F, A>) -> Result<()>
where
    F: FnOnce(&mut M, &[A]) -> anyhow::Result<()>,
{
    calibrate_reporting(graph, calibration, &ProgressTimer::new(None))
}

pub(crate) fn calibrate_reporting<M, F, A>(
    graph: &mut CompiledGraph<M>,
    calibration: Calibration<F, A>,
    timer: &ProgressTimer,
) -> Result<()>
where
    F: FnOnce(&mut M, &[A]) -> anyhow::Result<()>,
{
    let (run_fn, run_args) = calibration.into_parts()?;

    timer.report(ProgressEvent::Calibrating {
        batches: run_args.len(),
    });
    info!("Running calibration over {} argument(s)", run_args.len());
    let started = std::time::Instant::now();
    run_fn(graph.module_mut(), &run_args)?;
    info!(
        "Calibration finished in {:.2}s",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
