//! Pre-activation ResNet implementation.
//!
//! See "Identity Mappings in Deep Residual Networks" He et al. 2016
//! <https://arxiv.org/abs/1603.05027>
//!
//! The topology is resolved ahead of time by [`NetworkSpec::derive`]; this
//! module only realizes an already derived spec into candle layers and wires
//! the forward pass. Batch norms follow the `ModuleT` train/eval threading,
//! so the same model can be trained or run frozen.

use candle::{Module, ModuleT, Result, Tensor, D};
use candle_nn::init::DEFAULT_KAIMING_UNIFORM;
use candle_nn::{batch_norm, linear, BatchNorm, Conv2d, Conv2dConfig, Linear, VarBuilder};

use crate::error::Error;
use crate::topology::{Config, LayerSpec, NetworkSpec, UnitSpec};

fn conv2d(spec: LayerSpec, vb: VarBuilder) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        stride: spec.stride,
        padding: spec.padding,
        ..Default::default()
    };
    let ws = vb.get_with_hints(
        (
            spec.out_channels,
            spec.in_channels,
            spec.kernel_size,
            spec.kernel_size,
        ),
        "weight",
        DEFAULT_KAIMING_UNIFORM,
    )?;
    Ok(Conv2d::new(ws, None, cfg))
}

/// Batch norm and activation applied before the convolution. The forward pass
/// also returns the activated-but-not-yet-convolved tensor, which the
/// enclosing unit may route to its identity branch.
#[derive(Debug)]
struct PreResConv {
    bn: BatchNorm,
    conv: Conv2d,
}

impl PreResConv {
    fn new(spec: LayerSpec, vb: VarBuilder) -> Result<Self> {
        let bn = batch_norm(spec.in_channels, 1e-5, vb.pp("bn"))?;
        let conv = conv2d(spec, vb.pp("conv"))?;
        Ok(Self { bn, conv })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let x_pre_activ = xs.apply_t(&self.bn, train)?.relu()?;
        let xs = x_pre_activ.apply(&self.conv)?;
        Ok((xs, x_pre_activ))
    }
}

#[derive(Debug)]
struct PreResBlock {
    conv1: PreResConv,
    conv2: PreResConv,
}

impl PreResBlock {
    fn new(unit: &UnitSpec, vb: VarBuilder) -> Result<Self> {
        let convs = unit.body_convs();
        let conv1 = PreResConv::new(convs[0], vb.pp("conv1"))?;
        let conv2 = PreResConv::new(convs[1], vb.pp("conv2"))?;
        Ok(Self { conv1, conv2 })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let (xs, x_pre_activ) = self.conv1.forward_t(xs, train)?;
        let (xs, _) = self.conv2.forward_t(&xs, train)?;
        Ok((xs, x_pre_activ))
    }
}

#[derive(Debug)]
struct PreResBottleneck {
    conv1: PreResConv,
    conv2: PreResConv,
    conv3: PreResConv,
}

impl PreResBottleneck {
    fn new(unit: &UnitSpec, vb: VarBuilder) -> Result<Self> {
        let convs = unit.body_convs();
        let conv1 = PreResConv::new(convs[0], vb.pp("conv1"))?;
        let conv2 = PreResConv::new(convs[1], vb.pp("conv2"))?;
        let conv3 = PreResConv::new(convs[2], vb.pp("conv3"))?;
        Ok(Self {
            conv1,
            conv2,
            conv3,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let (xs, x_pre_activ) = self.conv1.forward_t(xs, train)?;
        let (xs, _) = self.conv2.forward_t(&xs, train)?;
        let (xs, _) = self.conv3.forward_t(&xs, train)?;
        Ok((xs, x_pre_activ))
    }
}

/// Unit body variants behind a uniform `(output, pre-activation)` contract.
#[derive(Debug)]
enum PreResBody {
    Plain(PreResBlock),
    Bottleneck(PreResBottleneck),
}

impl PreResBody {
    fn new(unit: &UnitSpec, vb: VarBuilder) -> Result<Self> {
        if unit.bottleneck {
            Ok(Self::Bottleneck(PreResBottleneck::new(unit, vb)?))
        } else {
            Ok(Self::Plain(PreResBlock::new(unit, vb)?))
        }
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        match self {
            Self::Plain(block) => block.forward_t(xs, train),
            Self::Bottleneck(block) => block.forward_t(xs, train),
        }
    }
}

/// Residual unit: body plus identity bypass.
///
/// When the unit changes the channel count or resolution, the bypass starts
/// from the first pre-activation tensor and goes through a bias-free 1x1
/// projection; otherwise the raw unit input is added back unchanged.
#[derive(Debug)]
struct PreResUnit {
    body: PreResBody,
    identity_conv: Option<Conv2d>,
}

impl PreResUnit {
    fn new(unit: &UnitSpec, vb: VarBuilder) -> Result<Self> {
        let body = PreResBody::new(unit, vb.pp("body"))?;
        let identity_conv = match unit.identity_conv() {
            Some(spec) => Some(conv2d(spec, vb.pp("identity_conv"))?),
            None => None,
        };
        Ok(Self {
            body,
            identity_conv,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (ys, x_pre_activ) = self.body.forward_t(xs, train)?;
        let identity = match &self.identity_conv {
            Some(conv) => x_pre_activ.apply(conv)?,
            None => xs.clone(),
        };
        ys + identity
    }
}

/// 7x7 stride-2 convolution, norm, activation, then a 3x3 stride-2 max pool.
#[derive(Debug)]
struct PreResInitBlock {
    conv: Conv2d,
    bn: BatchNorm,
}

impl PreResInitBlock {
    fn new(spec: LayerSpec, vb: VarBuilder) -> Result<Self> {
        let conv = conv2d(spec, vb.pp("conv"))?;
        let bn = batch_norm(spec.out_channels, 1e-5, vb.pp("bn"))?;
        Ok(Self { conv, bn })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        xs.apply(&self.conv)?
            .apply_t(&self.bn, train)?
            .relu()?
            .pad_with_same(D::Minus1, 1, 1)?
            .pad_with_same(D::Minus2, 1, 1)?
            .max_pool2d_with_stride(3, 2)
    }
}

// Trailing norm+activation; the last residual unit output is un-normalized.
#[derive(Debug)]
struct PreResActivation {
    bn: BatchNorm,
}

impl PreResActivation {
    fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let bn = batch_norm(channels, 1e-5, vb.pp("bn"))?;
        Ok(Self { bn })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        xs.apply_t(&self.bn, train)?.relu()
    }
}

/// Pre-activation residual network.
#[derive(Debug)]
pub struct PreResNet {
    init_block: PreResInitBlock,
    stages: Vec<Vec<PreResUnit>>,
    post_activ: PreResActivation,
    output: Linear,
    spec: NetworkSpec,
    span: tracing::Span,
}

impl PreResNet {
    /// Build the network described by `cfg` with freshly initialized weights.
    /// Every convolution kernel uses fan-in Kaiming-uniform initialization.
    pub fn new(cfg: &Config, vb: VarBuilder) -> crate::Result<Self> {
        let spec = NetworkSpec::derive(cfg)?;
        Self::from_spec(spec, vb)
    }

    /// Realize an already derived topology.
    pub fn from_spec(spec: NetworkSpec, vb: VarBuilder) -> crate::Result<Self> {
        let vb_f = vb.pp("features");
        let init_block = PreResInitBlock::new(spec.init_conv(), vb_f.pp("init_block"))?;
        let mut stages = Vec::with_capacity(spec.stages.len());
        for (i, stage) in spec.stages.iter().enumerate() {
            let vb_s = vb_f.pp(format!("stage{}", i + 1));
            let mut units = Vec::with_capacity(stage.units.len());
            for (j, unit) in stage.units.iter().enumerate() {
                units.push(PreResUnit::new(unit, vb_s.pp(format!("unit{}", j + 1)))?);
            }
            stages.push(units);
        }
        let post_activ = PreResActivation::new(spec.final_channels(), vb_f.pp("post_activ"))?;
        let output = linear(spec.final_channels(), spec.num_classes, vb.pp("output"))?;
        let span = tracing::span!(tracing::Level::TRACE, "preresnet");
        Ok(Self {
            init_block,
            stages,
            post_activ,
            output,
            spec,
            span,
        })
    }

    /// No pretrained weight source is integrated; this fails unconditionally,
    /// before any layer is built.
    pub fn from_pretrained(cfg: &Config) -> crate::Result<Self> {
        Err(Error::NotSupported {
            reason: format!("pretrained weights for the {}-block preresnet", cfg.blocks),
        })
    }

    /// The derived topology this model was built from.
    pub fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    /// Inference forward pass, with batch norms in eval mode.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.forward_t(xs, false)
    }
}

impl ModuleT for PreResNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let _enter = self.span.enter();
        let mut xs = self.init_block.forward_t(xs, train)?;
        for stage in self.stages.iter() {
            for unit in stage.iter() {
                xs = unit.forward_t(&xs, train)?;
            }
        }
        let xs = self.post_activ.forward_t(&xs, train)?;
        // Global average pooling, then the classifier.
        let xs = xs.mean(D::Minus1)?.mean(D::Minus1)?;
        self.output.forward(&xs)
    }
}
