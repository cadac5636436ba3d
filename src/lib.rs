//! Pre-activation residual networks (PreResNet) for candle.
//!
//! The family introduced in "Identity Mappings in Deep Residual Networks"
//! He et al. 2016 <https://arxiv.org/abs/1603.05027>, where normalization and
//! activation run *before* each convolution and the residual bypass of a
//! resizing unit starts from the activated tensor rather than the raw block
//! input.
//!
//! The architecture topology (channel widths, stride placement, bottleneck
//! choice) is derived as an explicit [`topology::NetworkSpec`] tree, which is
//! then realized into [`candle_nn`] layers:
//!
//! ```rust,no_run
//! use candle::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use candle_preresnet::{Config, PreResNet};
//!
//! # fn main() -> anyhow::Result<()> {
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//! let model = PreResNet::new(&Config::preresnet18(), vb)?;
//! let image = Tensor::zeros((1, 3, 224, 224), DType::F32, &device)?;
//! let logits = model.forward(&image)?;
//! assert_eq!(logits.dims(), &[1, 1000]);
//! # Ok(()) }
//! ```

pub mod error;
pub mod models;
pub mod topology;

pub use error::{Error, Result};
pub use models::preresnet::PreResNet;
pub use topology::{Config, NetworkSpec};
