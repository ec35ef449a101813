//! Prepare stage: dedup, conv/bn folding and observer insertion.

use crate::engine::{CompiledGraph, GraphEngine, WorkflowMode, ENTRY_POINT};
use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressTimer};
use crate::translate::CompiledConfigMap;
use tracing::debug;

/// Produce an observed graph from a validated one.
///
/// Each pass consumes the current module and the next pass runs on whatever module
/// it returned. The observed graph computes the same outputs as its input until it is
/// calibrated and converted.
pub fn prepare<E: GraphEngine>(
    engine: &mut E,
    graph: CompiledGraph<E::Module>,
    compiled_config: &CompiledConfigMap<E::Observer>,
    mode: WorkflowMode,
    in_place: bool,
) -> Result<CompiledGraph<E::Module>> {
    prepare_reporting(
        engine,
        graph,
        compiled_config,
        mode,
        in_place,
        &ProgressTimer::new(None),
    )
}

pub(crate) fn prepare_reporting<E: GraphEngine>(
    engine: &mut E,
    graph: CompiledGraph<E::Module>,
    compiled_config: &CompiledConfigMap<E::Observer>,
    mode: WorkflowMode,
    in_place: bool,
    timer: &ProgressTimer,
) -> Result<CompiledGraph<E::Module>> {
    if in_place {
        return Err(Error::in_place_unsupported());
    }

    let module = graph.into_module();

    timer.report(ProgressEvent::RunningPass {
        pass: "dedup_module_uses",
    });
    debug!("Deduplicating shared submodule uses");
    let module = engine.dedup_module_uses(module)?;

    timer.report(ProgressEvent::RunningPass {
        pass: "fold_conv_bn",
    });
    debug!("Folding conv + batch-norm sequences");
    let module = engine.fold_conv_bn(module)?;

    timer.report(ProgressEvent::RunningPass {
        pass: "insert_observers",
    });
    debug!(
        "Inserting {} observers on `{}` for {} module config(s)",
        mode,
        ENTRY_POINT,
        compiled_config.len()
    );
    let module = engine.insert_observers(
        module,
        ENTRY_POINT,
        compiled_config,
        false,
        mode.is_dynamic(),
    )?;

    Ok(CompiledGraph::rebind(module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingEngine, StubModule};
    use crate::translate::CompiledQuantizationConfig;

    fn observed_config() -> CompiledConfigMap<String> {
        let mut config = CompiledConfigMap::new();
        config.insert(
            "".to_string(),
            Some(CompiledQuantizationConfig {
                activation: Some("min_max#0".to_string()),
                weight: Some("min_max#1".to_string()),
            }),
        );
        config.insert("head".to_string(), None);
        config
    }

    #[test]
    fn test_pass_order() {
        let mut engine = RecordingEngine::new();
        let graph = CompiledGraph::new(&engine, StubModule::compiled()).unwrap();

        let observed = prepare(
            &mut engine,
            graph,
            &observed_config(),
            WorkflowMode::Static,
            false,
        )
        .unwrap();

        assert_eq!(
            engine.calls(),
            vec!["dedup_module_uses", "fold_conv_bn", "insert_observers"]
        );
        assert_eq!(
            observed.module().passes[2],
            "insert_observers:forward:in_place=false:dynamic=false"
        );
        assert_eq!(observed.module().observed, vec!["".to_string()]);
    }

    #[test]
    fn test_dynamic_flag_reaches_engine() {
        let mut engine = RecordingEngine::new();
        let graph = CompiledGraph::new(&engine, StubModule::compiled()).unwrap();

        let observed = prepare(
            &mut engine,
            graph,
            &observed_config(),
            WorkflowMode::Dynamic,
            false,
        )
        .unwrap();
        assert!(observed.module().passes[2].ends_with("dynamic=true"));
    }

    #[test]
    fn test_in_place_rejected_before_any_pass() {
        for mode in [WorkflowMode::Static, WorkflowMode::Dynamic] {
            let mut engine = RecordingEngine::new();
            let graph = CompiledGraph::new(&engine, StubModule::compiled()).unwrap();
            let err = prepare(&mut engine, graph, &observed_config(), mode, true).unwrap_err();
            assert!(matches!(err, Error::UnsupportedMode { .. }));
            assert!(engine.calls().is_empty());
        }
    }

    #[test]
    fn test_pass_failure_stops_pipeline() {
        let mut engine = RecordingEngine::new().failing_on("fold_conv_bn");
        let graph = CompiledGraph::new(&engine, StubModule::compiled()).unwrap();

        let err = prepare(
            &mut engine,
            graph,
            &observed_config(),
            WorkflowMode::Static,
            false,
        )
        .unwrap_err();
        assert!(err.is_engine());
        assert_eq!(engine.calls(), vec!["dedup_module_uses", "fold_conv_bn"]);
    }
}
