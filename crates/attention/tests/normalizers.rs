use anyhow::Result;
use attention::masks::{causal_allow_mask, causal_mask, invert_mask};
use attention::sparse::{coor_descent, relu_clamp};
use attention::{build_attention, Config, CoorDescentConfig, NullKvBank};
use candle_core::{DType, Device, Tensor, D};

#[test]
fn top_one_selection_on_three_keys() -> Result<()> {
    let device = Device::Cpu;
    let scores = Tensor::new(&[[1.0f32, 2.0, 0.0]], &device)?;
    let k = Tensor::new(&[[1.0f32]], &device)?;
    let weights = coor_descent(&scores, 50, &k, 0.1, relu_clamp, None)?.to_vec2::<f32>()?;
    assert!(weights[0][1] > 0.9);
    assert!(weights[0][0] < 0.1);
    assert!(weights[0][2] < 0.1);
    Ok(())
}

#[test]
fn both_normalizers_share_the_kernel_contract() -> Result<()> {
    let device = Device::Cpu;
    let shape = (2, 3, 5, 8);
    let q = Tensor::randn(0f32, 1.0, shape, &device)?;
    let k = Tensor::randn(0f32, 1.0, shape, &device)?;
    let v = Tensor::randn(0f32, 1.0, shape, &device)?;
    let allow = causal_allow_mask(&device, 5, 5)?;

    for config in [
        Config::softmax(),
        Config::coor_descent(CoorDescentConfig::default()),
    ] {
        let kernel = build_attention(&config)?;
        let (out, weights) = kernel.attend_with_weights(&q, &k, &v, Some(&allow))?;
        assert_eq!(out.dims(), &[2, 3, 5, 8]);
        assert_eq!(weights.dims(), &[2, 3, 5, 5]);

        let disallowed = causal_mask(&device, 5, 5)?.to_dtype(DType::F32)?;
        let leaked = weights
            .broadcast_mul(&disallowed)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert_eq!(leaked, 0.0, "{config:?} leaked weight onto future keys");
    }
    Ok(())
}

#[test]
fn null_slots_receive_mass_under_both_normalizers() -> Result<()> {
    let device = Device::Cpu;
    let bank = NullKvBank::new(2, 2, 4, DType::F32, &device)?;
    let q = Tensor::randn(0f32, 1.0, (1, 2, 3, 4), &device)?;
    let (k, v) = bank.prepend(&q, &q)?;
    let allow = bank.causal_offset(&device, 3)?;
    assert_eq!(invert_mask(&allow)?.to_vec2::<u8>()?, causal_mask(&device, 3, 5)?.to_vec2::<u8>()?);

    let kernel = build_attention(&Config::softmax())?;
    let (_, weights) = kernel.attend_with_weights(&q, &k, &v, Some(&allow))?;
    let nulls = weights.narrow(D::Minus1, 0, 2)?.flatten_all()?.to_vec1::<f32>()?;
    assert!(nulls.iter().all(|w| *w > 0.0));
    Ok(())
}

#[test]
fn coor_descent_zeroes_queries_that_see_no_keys() -> Result<()> {
    let device = Device::Cpu;
    let q = Tensor::randn(0f32, 1.0, (1, 1, 4, 8), &device)?;
    let k = Tensor::randn(0f32, 1.0, (1, 1, 2, 8), &device)?;
    let allow = causal_allow_mask(&device, 4, 2)?;

    let kernel = build_attention(&Config::coor_descent(CoorDescentConfig::default()))?;
    let (out, weights) = kernel.attend_with_weights(&q, &k, &k, Some(&allow))?;
    let rows = weights.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()?;
    assert_eq!(rows[0], vec![0.0, 0.0]);
    assert_eq!(rows[1], vec![0.0, 0.0]);
    assert_eq!(rows[2][1], 0.0);

    let values = out.flatten_all()?.to_vec1::<f32>()?;
    assert!(values.iter().all(|v| v.is_finite()));
    Ok(())
}
