//! Topology derivation for the PreResNet family.
//!
//! The layer graph of a pre-activation residual network is fully determined by
//! a small configuration: a depth preset, the stride placement inside
//! bottleneck units and an optional width multiplier. This module resolves
//! such a configuration into an explicit stage/unit/layer tree without
//! touching any tensor; realizing the tree into candle layers is done in
//! [`crate::models::preresnet`].

use crate::error::{Error, Result};

/// Valid values for [`Config::blocks`].
pub const SUPPORTED_BLOCKS: [usize; 10] = [10, 12, 14, 16, 18, 34, 50, 101, 152, 200];

fn stage_layers(blocks: usize) -> Option<[usize; 4]> {
    let layers = match blocks {
        10 => [1, 1, 1, 1],
        12 => [2, 1, 1, 1],
        14 => [2, 2, 1, 1],
        16 => [2, 2, 2, 1],
        18 => [2, 2, 2, 2],
        34 => [3, 4, 6, 3],
        // Same unit counts as 34, but 50 is the first bottleneck variant.
        50 => [3, 4, 6, 3],
        101 => [3, 4, 23, 3],
        152 => [3, 8, 36, 3],
        200 => [3, 24, 36, 3],
        _ => return None,
    };
    Some(layers)
}

/// PreResNet model configuration.
///
/// The named constructors mirror the reference architecture family: a plain
/// depth (`preresnet18`), a `b` variant moving the bottleneck stride from the
/// first 1x1 convolution to the middle 3x3 one (`preresnet50b`), and width
/// scaled variants (`preresnet18_wd2` for half width).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Depth preset, one of [`SUPPORTED_BLOCKS`].
    pub blocks: usize,
    /// Place the stride on the first 1x1 convolution of a bottleneck unit
    /// rather than on its 3x3 convolution. Has no effect on plain blocks.
    pub conv1_stride: bool,
    /// Multiplier applied to every channel width, truncating toward zero.
    pub width_scale: f64,
    /// Number of channels of the input images.
    pub in_channels: usize,
    /// Number of classification classes.
    pub num_classes: usize,
}

impl Config {
    fn with_blocks(blocks: usize) -> Self {
        Self {
            blocks,
            conv1_stride: true,
            width_scale: 1.0,
            in_channels: 3,
            num_classes: 1000,
        }
    }

    pub fn preresnet10() -> Self {
        Self::with_blocks(10)
    }

    pub fn preresnet12() -> Self {
        Self::with_blocks(12)
    }

    pub fn preresnet14() -> Self {
        Self::with_blocks(14)
    }

    pub fn preresnet16() -> Self {
        Self::with_blocks(16)
    }

    pub fn preresnet18() -> Self {
        Self::with_blocks(18)
    }

    /// 18-block variant at 3/4 width.
    pub fn preresnet18_w3d4() -> Self {
        Self {
            width_scale: 0.75,
            ..Self::with_blocks(18)
        }
    }

    /// 18-block variant at half width.
    pub fn preresnet18_wd2() -> Self {
        Self {
            width_scale: 0.5,
            ..Self::with_blocks(18)
        }
    }

    /// 18-block variant at quarter width.
    pub fn preresnet18_wd4() -> Self {
        Self {
            width_scale: 0.25,
            ..Self::with_blocks(18)
        }
    }

    pub fn preresnet34() -> Self {
        Self::with_blocks(34)
    }

    pub fn preresnet50() -> Self {
        Self::with_blocks(50)
    }

    pub fn preresnet50b() -> Self {
        Self {
            conv1_stride: false,
            ..Self::with_blocks(50)
        }
    }

    pub fn preresnet101() -> Self {
        Self::with_blocks(101)
    }

    pub fn preresnet101b() -> Self {
        Self {
            conv1_stride: false,
            ..Self::with_blocks(101)
        }
    }

    pub fn preresnet152() -> Self {
        Self::with_blocks(152)
    }

    pub fn preresnet152b() -> Self {
        Self {
            conv1_stride: false,
            ..Self::with_blocks(152)
        }
    }

    pub fn preresnet200() -> Self {
        Self::with_blocks(200)
    }

    pub fn preresnet200b() -> Self {
        Self {
            conv1_stride: false,
            ..Self::with_blocks(200)
        }
    }
}

/// A single convolution of the derived graph.
///
/// The padding preserves the spatial resolution before striding: kernel 1
/// pads 0, kernel 3 pads 1, kernel 7 pads 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl LayerSpec {
    fn conv(in_channels: usize, out_channels: usize, kernel_size: usize, stride: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding: kernel_size / 2,
        }
    }

    /// Number of scalar weights of the convolution kernel.
    pub fn weight_count(&self) -> usize {
        self.out_channels * self.in_channels * self.kernel_size * self.kernel_size
    }
}

/// One residual unit: two or three pre-activation convolutions plus an
/// optional projection on the identity path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub stride: usize,
    pub bottleneck: bool,
    pub conv1_stride: bool,
}

impl UnitSpec {
    /// Channel width of the 3x3 convolution inside a bottleneck unit.
    pub fn mid_channels(&self) -> usize {
        self.out_channels / 4
    }

    /// The identity branch needs a projection whenever the unit changes the
    /// channel count or the spatial resolution.
    pub fn resize_identity(&self) -> bool {
        self.in_channels != self.out_channels || self.stride != 1
    }

    /// Convolutions of the unit body, in application order. Each of these is
    /// preceded by a batch norm and activation when realized. In a bottleneck
    /// unit exactly one of the three convolutions carries the unit stride.
    pub fn body_convs(&self) -> Vec<LayerSpec> {
        if self.bottleneck {
            let mid = self.mid_channels();
            let (stride1, stride2) = if self.conv1_stride {
                (self.stride, 1)
            } else {
                (1, self.stride)
            };
            vec![
                LayerSpec::conv(self.in_channels, mid, 1, stride1),
                LayerSpec::conv(mid, mid, 3, stride2),
                LayerSpec::conv(mid, self.out_channels, 1, 1),
            ]
        } else {
            vec![
                LayerSpec::conv(self.in_channels, self.out_channels, 3, self.stride),
                LayerSpec::conv(self.out_channels, self.out_channels, 3, 1),
            ]
        }
    }

    /// Bias-free 1x1 projection for the identity branch, when needed.
    pub fn identity_conv(&self) -> Option<LayerSpec> {
        self.resize_identity()
            .then(|| LayerSpec::conv(self.in_channels, self.out_channels, 1, self.stride))
    }

    fn parameter_count(&self) -> usize {
        let body: usize = self
            .body_convs()
            .iter()
            .map(|c| 2 * c.in_channels + c.weight_count())
            .sum();
        let identity = self.identity_conv().map_or(0, |c| c.weight_count());
        body + identity
    }
}

/// Units sharing one target output width. The first unit of every stage but
/// the first downsamples with stride 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub units: Vec<UnitSpec>,
}

/// The fully resolved layer graph. Built once by [`NetworkSpec::derive`] and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSpec {
    pub init_block_channels: usize,
    pub stages: Vec<StageSpec>,
    pub bottleneck: bool,
    pub conv1_stride: bool,
    pub in_channels: usize,
    pub num_classes: usize,
}

impl NetworkSpec {
    /// Resolve a configuration into the explicit layer graph.
    ///
    /// This is pure and deterministic: the same configuration always yields
    /// the same spec. Invalid configurations fail here, before any layer is
    /// built.
    pub fn derive(cfg: &Config) -> Result<Self> {
        let layers = stage_layers(cfg.blocks).ok_or_else(|| Error::UnsupportedConfiguration {
            reason: format!("unsupported number of blocks: {}", cfg.blocks),
        })?;
        if !(cfg.width_scale > 0.0) {
            return Err(Error::UnsupportedConfiguration {
                reason: format!("width scale must be positive, got {}", cfg.width_scale),
            });
        }
        let bottleneck = cfg.blocks >= 50;
        let channels_per_stage: [usize; 4] = if bottleneck {
            [256, 512, 1024, 2048]
        } else {
            [64, 128, 256, 512]
        };
        let mut init_block_channels = 64usize;
        let mut channels: Vec<Vec<usize>> = channels_per_stage
            .iter()
            .zip(layers.iter())
            .map(|(&c, &l)| vec![c; l])
            .collect();
        // Scaling happens after the per-stage expansion so that every unit of
        // a stage scales identically, truncating toward zero.
        if cfg.width_scale != 1.0 {
            for stage_channels in channels.iter_mut() {
                for c in stage_channels.iter_mut() {
                    *c = (*c as f64 * cfg.width_scale) as usize;
                }
            }
            init_block_channels = (init_block_channels as f64 * cfg.width_scale) as usize;
        }
        if init_block_channels == 0 {
            return Err(Error::UnsupportedConfiguration {
                reason: format!(
                    "width scale {} collapses the init block to zero channels",
                    cfg.width_scale
                ),
            });
        }

        let mut stages = Vec::with_capacity(channels.len());
        let mut in_channels = init_block_channels;
        for (i, stage_channels) in channels.iter().enumerate() {
            let mut units = Vec::with_capacity(stage_channels.len());
            for (j, &out_channels) in stage_channels.iter().enumerate() {
                let stride = if i == 0 || j != 0 { 1 } else { 2 };
                let unit = UnitSpec {
                    in_channels,
                    out_channels,
                    stride,
                    bottleneck,
                    conv1_stride: cfg.conv1_stride,
                };
                if out_channels == 0 || (bottleneck && unit.mid_channels() == 0) {
                    return Err(Error::UnsupportedConfiguration {
                        reason: format!(
                            "width scale {} collapses stage {} to zero-channel units",
                            cfg.width_scale,
                            i + 1
                        ),
                    });
                }
                units.push(unit);
                in_channels = out_channels;
            }
            stages.push(StageSpec { units });
        }

        Ok(Self {
            init_block_channels,
            stages,
            bottleneck,
            conv1_stride: cfg.conv1_stride,
            in_channels: cfg.in_channels,
            num_classes: cfg.num_classes,
        })
    }

    /// The 7x7 stride-2 convolution opening the network.
    pub fn init_conv(&self) -> LayerSpec {
        LayerSpec::conv(self.in_channels, self.init_block_channels, 7, 2)
    }

    /// Channel width entering the classifier.
    pub fn final_channels(&self) -> usize {
        self.stages
            .last()
            .and_then(|s| s.units.last())
            .map_or(self.init_block_channels, |u| u.out_channels)
    }

    /// Total number of trainable scalars of the realized network: convolution
    /// kernels, batch-norm scale/shift pairs and the affine classifier.
    /// Batch-norm running statistics are buffers, not parameters, and are not
    /// counted.
    pub fn parameter_count(&self) -> usize {
        let init = self.init_conv();
        let mut count = init.weight_count() + 2 * self.init_block_channels;
        for stage in self.stages.iter() {
            for unit in stage.units.iter() {
                count += unit.parameter_count();
            }
        }
        count += 2 * self.final_channels();
        count += (self.final_channels() + 1) * self.num_classes;
        count
    }
}
