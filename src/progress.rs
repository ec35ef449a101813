//! Progress reporting for quantization workflows
//!
//! Long workflows (large graphs, slow calibration loops) can report each stage and
//! graph pass through a callback, so callers can drive a progress display.

use crate::engine::WorkflowMode;

/// Progress callback function type
pub type ProgressFn = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Number of [`ProgressEvent::RunningPass`] events the prepare stage emits
pub const PREPARE_PASS_COUNT: u64 = 3;

/// Number of [`ProgressEvent::RunningPass`] events a complete workflow emits.
///
/// Static and dynamic workflows run the same passes; debug conversions skip
/// finalization.
pub fn pass_count(debug: bool) -> u64 {
    let convert_passes = if debug { 2 } else { 3 };
    PREPARE_PASS_COUNT + convert_passes
}

/// Events reported while a graph moves through the workflow
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Checking the module's capability and entry point
    ValidatingGraph,

    /// Compiling observer descriptions
    CompilingConfig {
        /// Number of module entries in the config map
        modules: usize,
    },

    /// A graph pass is about to run
    RunningPass {
        /// Pass name
        pass: &'static str,
    },

    /// Running the caller's calibration procedure
    Calibrating {
        /// Number of calibration arguments handed to the procedure
        batches: usize,
    },

    /// Conversion stopped before finalization
    SkippingFinalization,

    /// Workflow finished
    Complete {
        /// Mode the graph was quantized in
        mode: WorkflowMode,
        /// Whether the result is a debug (non-finalized) graph
        debug: bool,
    },

    /// Status message, such as a notice about an unusual conversion
    Status {
        /// Message to display
        message: String,
    },
}

impl ProgressEvent {
    /// Get a human-readable description of this event
    pub fn description(&self) -> String {
        match self {
            ProgressEvent::ValidatingGraph => "Validating compiled graph...".to_string(),
            ProgressEvent::CompilingConfig { modules } => {
                format!("Compiling quantization config for {} module(s)", modules)
            }
            ProgressEvent::RunningPass { pass } => format!("Running pass {}", pass),
            ProgressEvent::Calibrating { batches } => {
                format!("Calibrating observers with {} argument(s)", batches)
            }
            ProgressEvent::SkippingFinalization => {
                "Debug mode: keeping quant/dequant markers, skipping finalization".to_string()
            }
            ProgressEvent::Complete { mode, debug } => {
                if *debug {
                    format!("✓ {} quantization complete (debug graph)", mode)
                } else {
                    format!("✓ {} quantization complete", mode)
                }
            }
            ProgressEvent::Status { message } => message.clone(),
        }
    }

    /// Check if this is a completion event
    pub fn is_complete(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. })
    }
}

/// Default progress reporter that prints to stdout
pub fn default_progress() -> ProgressFn {
    Box::new(|event: ProgressEvent| {
        let description = event.description();
        if event.is_complete() {
            println!("{}", description);
        } else {
            println!("⚙ {}", description);
        }
    })
}

/// Silent progress reporter (no-op)
pub fn silent_progress() -> ProgressFn {
    Box::new(|_event: ProgressEvent| {})
}

/// Progress reporter that prefixes each line with a UTC timestamp
pub fn timestamped_progress() -> ProgressFn {
    Box::new(|event: ProgressEvent| {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        println!("[{}] {}", timestamp, event.description());
    })
}

/// Progress reporter with custom prefix
///
/// # Examples
/// ```rust
/// use qflow::progress::prefixed_progress;
///
/// let progress_fn = prefixed_progress("RESNET".to_string());
/// // Outputs: [RESNET] Running pass fold_conv_bn
/// ```
pub fn prefixed_progress(prefix: String) -> ProgressFn {
    Box::new(move |event: ProgressEvent| {
        println!("[{}] {}", prefix, event.description());
    })
}

#[cfg(feature = "progress")]
/// Progress reporter that advances a bar once per graph pass
///
/// The bar shrinks to the debug pass count when finalization is skipped.
pub fn progress_bar() -> ProgressFn {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(pass_count(false));
    if let Ok(style) = ProgressStyle::default_bar().template("⚙ {msg:24} [{bar:30.cyan/blue}] {pos}/{len}") {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
    }

    Box::new(move |event: ProgressEvent| match event {
        ProgressEvent::RunningPass { pass } => {
            pb.set_message(pass);
            pb.inc(1);
        }
        ProgressEvent::SkippingFinalization => {
            pb.set_length(pass_count(true));
            pb.println(ProgressEvent::SkippingFinalization.description());
        }
        ProgressEvent::Complete { .. } => {
            pb.finish_with_message("✓ done");
        }
        other => pb.println(other.description()),
    })
}

#[cfg(not(feature = "progress"))]
/// Progress reporter with a visual progress bar (falls back to plain output)
pub fn progress_bar() -> ProgressFn {
    default_progress()
}

/// Create a custom progress reporter from a closure
pub fn custom_progress<F>(f: F) -> ProgressFn
where
    F: Fn(ProgressEvent) + Send + Sync + 'static,
{
    Box::new(f)
}

/// Times a workflow and forwards events to an optional reporter
pub struct ProgressTimer {
    start_time: std::time::Instant,
    progress_fn: Option<ProgressFn>,
}

impl ProgressTimer {
    /// Create a new progress timer with optional progress reporting
    pub fn new(progress_fn: Option<ProgressFn>) -> Self {
        Self {
            start_time: std::time::Instant::now(),
            progress_fn,
        }
    }

    /// Report a progress event
    pub fn report(&self, event: ProgressEvent) {
        if let Some(ref progress_fn) = self.progress_fn {
            progress_fn(event);
        }
    }

    /// Seconds since the timer was created
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Report completion and return elapsed seconds
    pub fn complete(&self, mode: WorkflowMode, debug: bool) -> f64 {
        self.report(ProgressEvent::Complete { mode, debug });
        self.elapsed_secs()
    }
}

impl std::fmt::Debug for ProgressTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTimer")
            .field("start_time", &self.start_time)
            .field("has_progress_fn", &self.progress_fn.is_some())
            .finish()
    }
}
