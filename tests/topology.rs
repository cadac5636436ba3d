use anyhow::Result;
use candle_preresnet::topology::SUPPORTED_BLOCKS;
use candle_preresnet::{Config, Error, NetworkSpec};

fn all_presets() -> Vec<Config> {
    vec![
        Config::preresnet10(),
        Config::preresnet12(),
        Config::preresnet14(),
        Config::preresnet16(),
        Config::preresnet18(),
        Config::preresnet18_w3d4(),
        Config::preresnet18_wd2(),
        Config::preresnet18_wd4(),
        Config::preresnet34(),
        Config::preresnet50(),
        Config::preresnet50b(),
        Config::preresnet101(),
        Config::preresnet101b(),
        Config::preresnet152(),
        Config::preresnet152b(),
        Config::preresnet200(),
        Config::preresnet200b(),
    ]
}

#[test]
fn derivation_is_deterministic() -> Result<()> {
    for cfg in all_presets() {
        let a = NetworkSpec::derive(&cfg)?;
        let b = NetworkSpec::derive(&cfg)?;
        assert_eq!(a, b, "non-deterministic derivation for {cfg:?}");
    }
    Ok(())
}

#[test]
fn channels_thread_through_units() -> Result<()> {
    for cfg in all_presets() {
        let spec = NetworkSpec::derive(&cfg)?;
        let mut in_channels = spec.init_block_channels;
        for stage in spec.stages.iter() {
            for unit in stage.units.iter() {
                assert_eq!(unit.in_channels, in_channels, "broken hand-off in {cfg:?}");
                in_channels = unit.out_channels;
            }
        }
        assert_eq!(spec.final_channels(), in_channels);
    }
    Ok(())
}

#[test]
fn stride_two_only_opens_later_stages() -> Result<()> {
    for cfg in all_presets() {
        let spec = NetworkSpec::derive(&cfg)?;
        assert_eq!(spec.stages.len(), 4);
        for (i, stage) in spec.stages.iter().enumerate() {
            for (j, unit) in stage.units.iter().enumerate() {
                let expected = if i == 0 || j != 0 { 1 } else { 2 };
                assert_eq!(unit.stride, expected, "stage {i} unit {j} of {cfg:?}");
            }
        }
    }
    Ok(())
}

#[test]
fn identity_projection_exactly_when_resizing() -> Result<()> {
    for cfg in all_presets() {
        let spec = NetworkSpec::derive(&cfg)?;
        for stage in spec.stages.iter() {
            for unit in stage.units.iter() {
                let needed = unit.in_channels != unit.out_channels || unit.stride != 1;
                assert_eq!(unit.resize_identity(), needed);
                match unit.identity_conv() {
                    Some(proj) => {
                        assert!(needed);
                        assert_eq!(proj.kernel_size, 1);
                        assert_eq!(proj.padding, 0);
                        assert_eq!(proj.stride, unit.stride);
                        assert_eq!(proj.in_channels, unit.in_channels);
                        assert_eq!(proj.out_channels, unit.out_channels);
                    }
                    None => assert!(!needed),
                }
            }
        }
    }
    Ok(())
}

#[test]
fn bottleneck_mid_width_is_quarter_of_output() -> Result<()> {
    let spec = NetworkSpec::derive(&Config::preresnet50())?;
    assert!(spec.bottleneck);
    for stage in spec.stages.iter() {
        for unit in stage.units.iter() {
            assert_eq!(unit.mid_channels(), unit.out_channels / 4);
            let convs = unit.body_convs();
            assert_eq!(convs.len(), 3);
            assert_eq!(convs[0].out_channels, unit.out_channels / 4);
            assert_eq!(convs[1].out_channels, unit.out_channels / 4);
            assert_eq!(convs[2].out_channels, unit.out_channels);
        }
    }
    Ok(())
}

#[test]
fn degenerate_scaled_width_is_rejected() {
    let cfg = Config {
        width_scale: 1e-3,
        ..Config::preresnet50()
    };
    let res = NetworkSpec::derive(&cfg);
    assert!(matches!(res, Err(Error::UnsupportedConfiguration { .. })));
}

#[test]
fn plain_blocks_below_fifty_bottleneck_from_fifty() -> Result<()> {
    // 34 and 50 share the same unit counts on purpose, only the unit kind
    // differs.
    let plain = NetworkSpec::derive(&Config::preresnet34())?;
    let bottleneck = NetworkSpec::derive(&Config::preresnet50())?;
    assert!(!plain.bottleneck);
    assert!(bottleneck.bottleneck);
    for (s_plain, s_bottleneck) in plain.stages.iter().zip(bottleneck.stages.iter()) {
        assert_eq!(s_plain.units.len(), s_bottleneck.units.len());
    }
    for stage in plain.stages.iter() {
        for unit in stage.units.iter() {
            assert_eq!(unit.body_convs().len(), 2);
        }
    }
    Ok(())
}

#[test]
fn width_scaling_truncates_toward_zero() -> Result<()> {
    let spec = NetworkSpec::derive(&Config::preresnet18_wd2())?;
    assert_eq!(spec.init_block_channels, 32);
    let widths: Vec<usize> = spec
        .stages
        .iter()
        .map(|s| s.units[0].out_channels)
        .collect();
    assert_eq!(widths, [32, 64, 128, 256]);

    let spec = NetworkSpec::derive(&Config::preresnet18_w3d4())?;
    assert_eq!(spec.init_block_channels, 48);
    let widths: Vec<usize> = spec
        .stages
        .iter()
        .map(|s| s.units[0].out_channels)
        .collect();
    assert_eq!(widths, [48, 96, 192, 384]);

    // 64 * 0.3 = 19.2 floors to 19, not 20.
    let cfg = Config {
        width_scale: 0.3,
        ..Config::preresnet18()
    };
    let spec = NetworkSpec::derive(&cfg)?;
    assert_eq!(spec.init_block_channels, 19);
    assert_eq!(spec.stages[0].units[0].out_channels, 19);
    assert_eq!(spec.stages[3].units[0].out_channels, 153);
    Ok(())
}

#[test]
fn unsupported_block_count_is_rejected() {
    for blocks in [0, 11, 20, 51, 1000] {
        let cfg = Config {
            blocks,
            ..Config::preresnet18()
        };
        let res = NetworkSpec::derive(&cfg);
        assert!(
            matches!(res, Err(Error::UnsupportedConfiguration { .. })),
            "blocks={blocks} should be rejected"
        );
        assert!(!SUPPORTED_BLOCKS.contains(&blocks));
    }
}

#[test]
fn reference_parameter_counts() -> Result<()> {
    let reference = [
        (Config::preresnet18(), 11_687_848usize),
        (Config::preresnet34(), 21_796_008),
        (Config::preresnet50(), 25_549_480),
        (Config::preresnet50b(), 25_549_480),
        (Config::preresnet101(), 44_541_608),
        (Config::preresnet101b(), 44_541_608),
        (Config::preresnet152(), 60_185_256),
        (Config::preresnet152b(), 60_185_256),
    ];
    for (cfg, expected) in reference {
        let spec = NetworkSpec::derive(&cfg)?;
        assert_eq!(
            spec.parameter_count(),
            expected,
            "parameter census mismatch for {cfg:?}"
        );
    }
    Ok(())
}
