//! Convert stage: quant/dequant insertion and finalization.

use crate::engine::{CompiledGraph, GraphEngine, WorkflowMode, ENTRY_POINT};
use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressTimer};
use tracing::{debug, warn};

const DYNAMIC_DEBUG_NOTICE: &str =
    "Dynamic debug graph is not finalized; its runtime behaviour is engine-defined";

/// Turn an observed (and, for static mode, calibrated) graph into a quantized one.
///
/// With `debug` set the graph is returned right after quant/dequant insertion, so both
/// the float and the quantized paths remain visible.
pub fn convert<E: GraphEngine>(
    engine: &mut E,
    graph: CompiledGraph<E::Module>,
    mode: WorkflowMode,
    debug: bool,
    in_place: bool,
) -> Result<CompiledGraph<E::Module>> {
    convert_reporting(
        engine,
        graph,
        mode,
        debug,
        in_place,
        &ProgressTimer::new(None),
    )
}

pub(crate) fn convert_reporting<E: GraphEngine>(
    engine: &mut E,
    graph: CompiledGraph<E::Module>,
    mode: WorkflowMode,
    debug: bool,
    in_place: bool,
    timer: &ProgressTimer,
) -> Result<CompiledGraph<E::Module>> {
    if in_place {
        return Err(Error::in_place_unsupported());
    }

    let module = graph.into_module();

    timer.report(ProgressEvent::RunningPass { pass: "set_eval" });
    let module = engine.set_eval(module)?;

    timer.report(ProgressEvent::RunningPass {
        pass: "insert_quant_dequant",
    });
    debug!("Inserting {} quant/dequant pairs on `{}`", mode, ENTRY_POINT);
    let module = engine.insert_quant_dequant(module, ENTRY_POINT, false, mode.is_dynamic())?;

    let module = match (debug, mode) {
        (false, _) => {
            timer.report(ProgressEvent::RunningPass {
                pass: "finalize_quant",
            });
            debug!("Finalizing {} quantized graph", mode);
            engine.finalize_quant(module, mode.is_dynamic())?
        }
        (true, WorkflowMode::Static) => {
            timer.report(ProgressEvent::SkippingFinalization);
            debug!("Debug conversion: leaving quant/dequant markers in place");
            module
        }
        (true, WorkflowMode::Dynamic) => {
            timer.report(ProgressEvent::SkippingFinalization);
            timer.report(ProgressEvent::Status {
                message: DYNAMIC_DEBUG_NOTICE.to_string(),
            });
            warn!(
                "Debug conversion of a dynamic graph: runtime behaviour of the \
                 non-finalized graph is engine-defined"
            );
            module
        }
    };

    Ok(CompiledGraph::rebind(module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{custom_progress, pass_count, PREPARE_PASS_COUNT};
    use crate::testing::{RecordingEngine, StubModule};
    use std::sync::{Arc, Mutex};

    fn observed(engine: &RecordingEngine) -> CompiledGraph<StubModule> {
        CompiledGraph::new(engine, StubModule::compiled()).unwrap()
    }

    #[test]
    fn test_finalize_runs_unless_debug() {
        for mode in [WorkflowMode::Static, WorkflowMode::Dynamic] {
            let mut engine = RecordingEngine::new();
            let graph = observed(&engine);
            convert(&mut engine, graph, mode, false, false).unwrap();
            assert_eq!(engine.count("finalize_quant"), 1);

            let mut engine = RecordingEngine::new();
            let graph = observed(&engine);
            let debug_graph = convert(&mut engine, graph, mode, true, false).unwrap();
            assert_eq!(engine.count("finalize_quant"), 0);
            assert!(debug_graph.module().applied("insert_quant_dequant"));
            assert!(!debug_graph.module().applied("finalize_quant"));
        }
    }

    #[test]
    fn test_eval_before_insertion() {
        let mut engine = RecordingEngine::new();
        let graph = observed(&engine);
        assert!(graph.module().training);

        let quantized = convert(&mut engine, graph, WorkflowMode::Static, false, false).unwrap();
        assert!(!quantized.module().training);
        assert_eq!(
            engine.calls(),
            vec!["set_eval", "insert_quant_dequant", "finalize_quant"]
        );
        assert_eq!(
            quantized.module().passes,
            vec![
                "insert_quant_dequant:forward:in_place=false:dynamic=false".to_string(),
                "finalize_quant:dynamic=false".to_string(),
            ]
        );
    }

    #[test]
    fn test_dynamic_debug_reports_status() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let timer = ProgressTimer::new(Some(custom_progress(move |event| {
            events_clone.lock().unwrap().push(event);
        })));

        let mut engine = RecordingEngine::new();
        let graph = observed(&engine);
        convert_reporting(&mut engine, graph, WorkflowMode::Dynamic, true, false, &timer).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Status {
                message: DYNAMIC_DEBUG_NOTICE.to_string()
            })
        );
        let passes = events
            .iter()
            .filter(|event| matches!(event, ProgressEvent::RunningPass { .. }))
            .count() as u64;
        assert_eq!(passes, pass_count(true) - PREPARE_PASS_COUNT);
    }

    #[test]
    fn test_static_debug_reports_no_status() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let timer = ProgressTimer::new(Some(custom_progress(move |event| {
            events_clone.lock().unwrap().push(event);
        })));

        let mut engine = RecordingEngine::new();
        let graph = observed(&engine);
        convert_reporting(&mut engine, graph, WorkflowMode::Static, true, false, &timer).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&ProgressEvent::SkippingFinalization));
    }

    #[test]
    fn test_in_place_rejected() {
        for debug in [false, true] {
            let mut engine = RecordingEngine::new();
            let graph = observed(&engine);
            let err = convert(&mut engine, graph, WorkflowMode::Dynamic, debug, true).unwrap_err();
            assert!(matches!(err, Error::UnsupportedMode { .. }));
            assert!(engine.calls().is_empty());
        }
    }
}
