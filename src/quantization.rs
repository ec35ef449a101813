//! Observer descriptions and per-module quantization configs.
//!
//! An [`ObserverSpec`] is a plain description of a statistics collector: which kind of
//! observer to attach, which quantized dtype it targets and which quantization scheme it
//! derives parameters for. The graph engine compiles each description into its own
//! executable observer when a workflow is prepared.
//!
//! # Example
//!
//! ```rust
//! use qflow::quantization::{ObserverSpec, QuantizationConfig, QScheme, QuantDtype};
//!
//! let config = QuantizationConfig::new(
//!     Some(ObserverSpec::histogram()),
//!     Some(ObserverSpec::per_channel_min_max(0).with_qscheme(QScheme::PerChannelSymmetric)),
//! );
//! assert!(config.validate().is_ok());
//! assert_eq!(config.weight.as_ref().unwrap().dtype(), Some(QuantDtype::QInt8));
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quantized data types an observer can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantDtype {
    /// Unsigned 8-bit integer
    #[serde(rename = "quint8")]
    QUInt8,
    /// Signed 8-bit integer
    #[serde(rename = "qint8")]
    QInt8,
    /// Signed 32-bit integer (bias)
    #[serde(rename = "qint32")]
    QInt32,
    /// Half precision float
    Float16,
}

impl Default for QuantDtype {
    fn default() -> Self {
        Self::QUInt8
    }
}

impl fmt::Display for QuantDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuantDtype::QUInt8 => "quint8",
            QuantDtype::QInt8 => "qint8",
            QuantDtype::QInt32 => "qint32",
            QuantDtype::Float16 => "float16",
        };
        f.write_str(name)
    }
}

/// How scale and zero point are derived from collected statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QScheme {
    /// One scale/zero point per tensor, asymmetric range
    PerTensorAffine,
    /// One scale per tensor, zero point fixed at the midpoint
    PerTensorSymmetric,
    /// One scale/zero point per channel, asymmetric range
    PerChannelAffine,
    /// One scale per channel, symmetric range
    PerChannelSymmetric,
}

impl QScheme {
    /// Whether the scheme produces per-channel parameters
    pub fn is_per_channel(self) -> bool {
        matches!(self, QScheme::PerChannelAffine | QScheme::PerChannelSymmetric)
    }

    /// Whether the scheme keeps the zero point fixed
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            QScheme::PerTensorSymmetric | QScheme::PerChannelSymmetric
        )
    }
}

impl Default for QScheme {
    fn default() -> Self {
        Self::PerTensorAffine
    }
}

/// Description of an observer the engine should attach to a tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObserverSpec {
    /// Running min/max over every observed value
    MinMax {
        /// Target dtype
        #[serde(default)]
        dtype: QuantDtype,
        /// Quantization scheme
        #[serde(default)]
        qscheme: QScheme,
        /// Reduce the quantized range by one bit
        #[serde(default)]
        reduce_range: bool,
    },
    /// Exponential moving average of per-batch min/max
    MovingAverageMinMax {
        /// Weight given to the newest batch, in (0, 1]
        #[serde(default = "default_averaging_constant")]
        averaging_constant: f32,
        /// Target dtype
        #[serde(default)]
        dtype: QuantDtype,
        /// Quantization scheme
        #[serde(default)]
        qscheme: QScheme,
        /// Reduce the quantized range by one bit
        #[serde(default)]
        reduce_range: bool,
    },
    /// Min/max tracked separately along one axis
    PerChannelMinMax {
        /// Channel axis
        #[serde(default)]
        ch_axis: usize,
        /// Target dtype
        #[serde(default = "default_weight_dtype")]
        dtype: QuantDtype,
        /// Quantization scheme (must be per-channel)
        #[serde(default = "default_per_channel_qscheme")]
        qscheme: QScheme,
        /// Reduce the quantized range by one bit
        #[serde(default)]
        reduce_range: bool,
    },
    /// Histogram of observed values, range picked by minimizing quantization error
    Histogram {
        /// Number of histogram bins
        #[serde(default = "default_bins")]
        bins: usize,
        /// Upsampling factor used when merging histograms
        #[serde(default = "default_upsample_rate")]
        upsample_rate: usize,
        /// Target dtype
        #[serde(default)]
        dtype: QuantDtype,
        /// Quantization scheme
        #[serde(default)]
        qscheme: QScheme,
        /// Reduce the quantized range by one bit
        #[serde(default)]
        reduce_range: bool,
    },
    /// Carries only a dtype; used where parameters are computed at run time
    Placeholder {
        /// Target dtype
        #[serde(default = "default_placeholder_dtype")]
        dtype: QuantDtype,
    },
    /// Observes nothing
    NoOp,
}

fn default_averaging_constant() -> f32 {
    0.01
}

fn default_bins() -> usize {
    2048
}

fn default_upsample_rate() -> usize {
    128
}

fn default_weight_dtype() -> QuantDtype {
    QuantDtype::QInt8
}

fn default_per_channel_qscheme() -> QScheme {
    QScheme::PerChannelAffine
}

fn default_placeholder_dtype() -> QuantDtype {
    QuantDtype::Float16
}

impl ObserverSpec {
    /// Per-tensor affine min/max observer targeting quint8
    pub fn min_max() -> Self {
        Self::MinMax {
            dtype: QuantDtype::QUInt8,
            qscheme: QScheme::PerTensorAffine,
            reduce_range: false,
        }
    }

    /// Moving-average min/max observer with the default averaging constant
    pub fn moving_average_min_max() -> Self {
        Self::MovingAverageMinMax {
            averaging_constant: default_averaging_constant(),
            dtype: QuantDtype::QUInt8,
            qscheme: QScheme::PerTensorAffine,
            reduce_range: false,
        }
    }

    /// Per-channel qint8 min/max observer along `ch_axis`
    pub fn per_channel_min_max(ch_axis: usize) -> Self {
        Self::PerChannelMinMax {
            ch_axis,
            dtype: QuantDtype::QInt8,
            qscheme: QScheme::PerChannelAffine,
            reduce_range: false,
        }
    }

    /// Histogram observer with 2048 bins
    pub fn histogram() -> Self {
        Self::Histogram {
            bins: default_bins(),
            upsample_rate: default_upsample_rate(),
            dtype: QuantDtype::QUInt8,
            qscheme: QScheme::PerTensorAffine,
            reduce_range: false,
        }
    }

    /// Placeholder observer carrying only `dtype`
    pub fn placeholder(dtype: QuantDtype) -> Self {
        Self::Placeholder { dtype }
    }

    /// Short observer name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ObserverSpec::MinMax { .. } => "min_max",
            ObserverSpec::MovingAverageMinMax { .. } => "moving_average_min_max",
            ObserverSpec::PerChannelMinMax { .. } => "per_channel_min_max",
            ObserverSpec::Histogram { .. } => "histogram",
            ObserverSpec::Placeholder { .. } => "placeholder",
            ObserverSpec::NoOp => "no_op",
        }
    }

    /// Target dtype, if the observer has one
    pub fn dtype(&self) -> Option<QuantDtype> {
        match self {
            ObserverSpec::MinMax { dtype, .. }
            | ObserverSpec::MovingAverageMinMax { dtype, .. }
            | ObserverSpec::PerChannelMinMax { dtype, .. }
            | ObserverSpec::Histogram { dtype, .. }
            | ObserverSpec::Placeholder { dtype } => Some(*dtype),
            ObserverSpec::NoOp => None,
        }
    }

    /// Quantization scheme, if the observer derives parameters
    pub fn qscheme(&self) -> Option<QScheme> {
        match self {
            ObserverSpec::MinMax { qscheme, .. }
            | ObserverSpec::MovingAverageMinMax { qscheme, .. }
            | ObserverSpec::PerChannelMinMax { qscheme, .. }
            | ObserverSpec::Histogram { qscheme, .. } => Some(*qscheme),
            ObserverSpec::Placeholder { .. } | ObserverSpec::NoOp => None,
        }
    }

    /// Replace the target dtype (no-op for observers without one)
    pub fn with_dtype(mut self, new_dtype: QuantDtype) -> Self {
        match &mut self {
            ObserverSpec::MinMax { dtype, .. }
            | ObserverSpec::MovingAverageMinMax { dtype, .. }
            | ObserverSpec::PerChannelMinMax { dtype, .. }
            | ObserverSpec::Histogram { dtype, .. }
            | ObserverSpec::Placeholder { dtype } => *dtype = new_dtype,
            ObserverSpec::NoOp => {}
        }
        self
    }

    /// Replace the quantization scheme (no-op for observers without one)
    pub fn with_qscheme(mut self, new_qscheme: QScheme) -> Self {
        match &mut self {
            ObserverSpec::MinMax { qscheme, .. }
            | ObserverSpec::MovingAverageMinMax { qscheme, .. }
            | ObserverSpec::PerChannelMinMax { qscheme, .. }
            | ObserverSpec::Histogram { qscheme, .. } => *qscheme = new_qscheme,
            ObserverSpec::Placeholder { .. } | ObserverSpec::NoOp => {}
        }
        self
    }

    /// Set `reduce_range` (no-op for observers without one)
    pub fn with_reduce_range(mut self, enabled: bool) -> Self {
        match &mut self {
            ObserverSpec::MinMax { reduce_range, .. }
            | ObserverSpec::MovingAverageMinMax { reduce_range, .. }
            | ObserverSpec::PerChannelMinMax { reduce_range, .. }
            | ObserverSpec::Histogram { reduce_range, .. } => *reduce_range = enabled,
            ObserverSpec::Placeholder { .. } | ObserverSpec::NoOp => {}
        }
        self
    }

    /// Check the description for internally inconsistent settings
    pub fn validate(&self) -> Result<()> {
        match self {
            ObserverSpec::MovingAverageMinMax {
                averaging_constant, ..
            } if !(*averaging_constant > 0.0 && *averaging_constant <= 1.0) => {
                return Err(Error::config(format!(
                    "averaging_constant must be in (0, 1], got {}",
                    averaging_constant
                )));
            }
            ObserverSpec::Histogram { bins: 0, .. } => {
                return Err(Error::config("histogram observer needs at least one bin"));
            }
            ObserverSpec::Histogram {
                upsample_rate: 0, ..
            } => {
                return Err(Error::config("histogram upsample_rate must be positive"));
            }
            ObserverSpec::PerChannelMinMax { qscheme, .. } if !qscheme.is_per_channel() => {
                return Err(Error::config(format!(
                    "per-channel observer cannot use {:?}",
                    qscheme
                )));
            }
            _ => {}
        }

        if let Some(qscheme) = self.qscheme() {
            if qscheme.is_per_channel() && !matches!(self, ObserverSpec::PerChannelMinMax { .. })
            {
                return Err(Error::config(format!(
                    "{} observer cannot use per-channel scheme {:?}",
                    self.name(),
                    qscheme
                )));
            }
        }

        Ok(())
    }
}

/// Observer descriptions for the activation and weight of one module.
///
/// Either role may be left empty, in which case nothing is observed for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Observer for activations
    #[serde(default)]
    pub activation: Option<ObserverSpec>,
    /// Observer for weights
    #[serde(default)]
    pub weight: Option<ObserverSpec>,
}

impl QuantizationConfig {
    /// Create a config from explicit observers
    pub fn new(activation: Option<ObserverSpec>, weight: Option<ObserverSpec>) -> Self {
        Self { activation, weight }
    }

    /// Min/max activations (quint8, reduced range) and symmetric qint8 weights
    pub fn default_static() -> Self {
        Self::new(
            Some(ObserverSpec::min_max().with_reduce_range(true)),
            Some(
                ObserverSpec::min_max()
                    .with_dtype(QuantDtype::QInt8)
                    .with_qscheme(QScheme::PerTensorSymmetric),
            ),
        )
    }

    /// Histogram activations and per-channel symmetric weights
    pub fn per_channel_static() -> Self {
        Self::new(
            Some(ObserverSpec::histogram().with_reduce_range(true)),
            Some(
                ObserverSpec::per_channel_min_max(0).with_qscheme(QScheme::PerChannelSymmetric),
            ),
        )
    }

    /// Weight-only config for dynamic quantization
    pub fn default_dynamic() -> Self {
        Self::new(
            None,
            Some(
                ObserverSpec::min_max()
                    .with_dtype(QuantDtype::QInt8)
                    .with_qscheme(QScheme::PerTensorSymmetric),
            ),
        )
    }

    /// Whether neither role is observed
    pub fn is_empty(&self) -> bool {
        self.activation.is_none() && self.weight.is_none()
    }

    /// Validate both observer descriptions
    pub fn validate(&self) -> Result<()> {
        if let Some(activation) = &self.activation {
            activation.validate()?;
        }
        if let Some(weight) = &self.weight {
            weight.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let config = QuantizationConfig::default_static();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.weight.as_ref().and_then(|w| w.qscheme()),
            Some(QScheme::PerTensorSymmetric)
        );

        let dynamic = QuantizationConfig::default_dynamic();
        assert!(dynamic.activation.is_none());
        assert!(!dynamic.is_empty());

        assert!(QuantizationConfig::per_channel_static().validate().is_ok());
        assert!(QuantizationConfig::default().is_empty());
    }

    #[test]
    fn test_observer_validation() {
        let bad_bins = ObserverSpec::Histogram {
            bins: 0,
            upsample_rate: 128,
            dtype: QuantDtype::QUInt8,
            qscheme: QScheme::PerTensorAffine,
            reduce_range: false,
        };
        assert!(matches!(bad_bins.validate(), Err(Error::Config { .. })));

        let bad_average = ObserverSpec::MovingAverageMinMax {
            averaging_constant: 1.5,
            dtype: QuantDtype::QUInt8,
            qscheme: QScheme::PerTensorAffine,
            reduce_range: false,
        };
        assert!(bad_average.validate().is_err());

        let per_tensor_channel =
            ObserverSpec::per_channel_min_max(1).with_qscheme(QScheme::PerTensorAffine);
        assert!(per_tensor_channel.validate().is_err());

        let per_channel_tensor = ObserverSpec::min_max().with_qscheme(QScheme::PerChannelAffine);
        assert!(per_channel_tensor.validate().is_err());

        assert!(ObserverSpec::NoOp.validate().is_ok());
    }

    #[test]
    fn test_observer_builders() {
        let spec = ObserverSpec::placeholder(QuantDtype::Float16).with_qscheme(QScheme::PerTensorSymmetric);
        assert_eq!(spec.qscheme(), None);
        assert_eq!(spec.dtype(), Some(QuantDtype::Float16));
        assert_eq!(ObserverSpec::NoOp.with_dtype(QuantDtype::QInt8).dtype(), None);
    }

    #[test]
    fn test_observer_json_defaults() {
        let spec: ObserverSpec = serde_json::from_str(r#"{"kind": "histogram"}"#).unwrap();
        assert_eq!(spec, ObserverSpec::histogram());

        let spec: ObserverSpec =
            serde_json::from_str(r#"{"kind": "per_channel_min_max", "ch_axis": 1}"#).unwrap();
        assert_eq!(spec, ObserverSpec::per_channel_min_max(1));

        let spec: ObserverSpec =
            serde_json::from_str(r#"{"kind": "min_max", "dtype": "qint8"}"#).unwrap();
        assert_eq!(spec.dtype(), Some(QuantDtype::QInt8));
    }
}
