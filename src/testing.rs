//! Recording engine used by the unit tests.

use crate::engine::GraphEngine;
use crate::quantization::ObserverSpec;
use crate::translate::CompiledConfigMap;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Stand-in for an engine-native module
#[derive(Debug, Clone, PartialEq)]
pub struct StubModule {
    pub compiled: bool,
    pub methods: BTreeSet<String>,
    pub training: bool,
    /// Passes applied so far, with their arguments
    pub passes: Vec<String>,
    /// Module paths that received observers
    pub observed: Vec<String>,
    /// Number of calibration runs seen
    pub calibration_runs: usize,
}

impl StubModule {
    pub fn compiled() -> Self {
        Self {
            compiled: true,
            methods: ["forward".to_string()].into_iter().collect(),
            training: true,
            passes: Vec::new(),
            observed: Vec::new(),
            calibration_runs: 0,
        }
    }

    pub fn eager() -> Self {
        Self {
            compiled: false,
            ..Self::compiled()
        }
    }

    pub fn without_method(mut self, name: &str) -> Self {
        self.methods.remove(name);
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains(name)
    }

    pub fn applied(&self, pass: &str) -> bool {
        self.passes.iter().any(|p| p.starts_with(pass))
    }
}

/// Engine that logs every mutating call into a shared log
#[derive(Debug, Clone, Default)]
pub struct RecordingEngine {
    log: Arc<Mutex<Vec<String>>>,
    fail_on: Option<&'static str>,
    next_observer: usize,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named call fail with an engine error
    pub fn failing_on(mut self, call: &'static str) -> Self {
        self.fail_on = Some(call);
        self
    }

    /// Shared handle to the call log, for closures that record alongside the engine
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: &'static str) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(call.to_string());
        if self.fail_on == Some(call) {
            anyhow::bail!("{} failed", call);
        }
        Ok(())
    }
}

impl GraphEngine for RecordingEngine {
    type Module = StubModule;
    type Observer = String;

    fn is_compiled_graph(&self, module: &StubModule) -> bool {
        module.compiled
    }

    fn describe(&self, module: &StubModule) -> String {
        if module.compiled {
            "compiled stub".to_string()
        } else {
            "eager stub".to_string()
        }
    }

    fn has_method(&self, module: &StubModule, name: &str) -> bool {
        module.has_method(name)
    }

    fn compile_observer(&mut self, spec: &ObserverSpec) -> anyhow::Result<String> {
        self.record("compile_observer")?;
        let id = self.next_observer;
        self.next_observer += 1;
        Ok(format!("{}#{}", spec.name(), id))
    }

    fn dedup_module_uses(&mut self, mut module: StubModule) -> anyhow::Result<StubModule> {
        self.record("dedup_module_uses")?;
        module.passes.push("dedup_module_uses".to_string());
        Ok(module)
    }

    fn fold_conv_bn(&mut self, mut module: StubModule) -> anyhow::Result<StubModule> {
        self.record("fold_conv_bn")?;
        module.passes.push("fold_conv_bn".to_string());
        Ok(module)
    }

    fn insert_observers(
        &mut self,
        mut module: StubModule,
        method: &str,
        qconfig: &CompiledConfigMap<String>,
        in_place: bool,
        is_dynamic: bool,
    ) -> anyhow::Result<StubModule> {
        self.record("insert_observers")?;
        module.passes.push(format!(
            "insert_observers:{}:in_place={}:dynamic={}",
            method, in_place, is_dynamic
        ));
        module.observed = qconfig
            .iter()
            .filter(|(_, config)| config.is_some())
            .map(|(path, _)| path.clone())
            .collect();
        Ok(module)
    }

    fn set_eval(&mut self, mut module: StubModule) -> anyhow::Result<StubModule> {
        self.record("set_eval")?;
        module.training = false;
        Ok(module)
    }

    fn insert_quant_dequant(
        &mut self,
        mut module: StubModule,
        method: &str,
        in_place: bool,
        is_dynamic: bool,
    ) -> anyhow::Result<StubModule> {
        self.record("insert_quant_dequant")?;
        module.passes.push(format!(
            "insert_quant_dequant:{}:in_place={}:dynamic={}",
            method, in_place, is_dynamic
        ));
        Ok(module)
    }

    fn finalize_quant(
        &mut self,
        mut module: StubModule,
        is_dynamic: bool,
    ) -> anyhow::Result<StubModule> {
        self.record("finalize_quant")?;
        module
            .passes
            .push(format!("finalize_quant:dynamic={}", is_dynamic));
        Ok(module)
    }
}
