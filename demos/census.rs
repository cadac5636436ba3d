#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

use candle::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_preresnet::{Config, PreResNet};
use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Which {
    Preresnet18,
    Preresnet34,
    Preresnet50,
    Preresnet50b,
    Preresnet101,
    Preresnet152,
}

impl Which {
    fn config(&self) -> Config {
        match self {
            Self::Preresnet18 => Config::preresnet18(),
            Self::Preresnet34 => Config::preresnet34(),
            Self::Preresnet50 => Config::preresnet50(),
            Self::Preresnet50b => Config::preresnet50b(),
            Self::Preresnet101 => Config::preresnet101(),
            Self::Preresnet152 => Config::preresnet152(),
        }
    }
}

#[derive(Parser)]
struct Args {
    /// Run on CPU rather than on GPU.
    #[arg(long)]
    cpu: bool,

    /// Variant of the model to use.
    #[arg(value_enum, long, default_value_t = Which::Preresnet18)]
    which: Which,

    /// Multiplier applied to every channel width.
    #[arg(long)]
    width_scale: Option<f64>,
}

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };

    let mut cfg = args.which.config();
    if let Some(width_scale) = args.width_scale {
        cfg.width_scale = width_scale;
    }

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = PreResNet::new(&cfg, vb)?;
    let spec = model.spec();
    println!(
        "{:?}: {} stages, {} trainable parameters",
        args.which,
        spec.stages.len(),
        spec.parameter_count()
    );
    for (i, stage) in spec.stages.iter().enumerate() {
        println!(
            "  stage{}: {} units, {} channels",
            i + 1,
            stage.units.len(),
            stage.units[0].out_channels
        );
    }

    let image = Tensor::randn(0f32, 1., (1, cfg.in_channels, 224, 224), &device)?;
    let logits = model.forward(&image)?;
    println!("logits: {:?}", logits.shape());
    Ok(())
}
