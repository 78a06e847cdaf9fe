use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Init, VarBuilder, VarMap};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Register a trainable vector `name` in `varmap` holding `values`.
///
/// Candle's own initializers draw from a process-wide generator, so the
/// variable is created as zeros and then overwritten with values the
/// caller drew from its seeded generator.
pub fn seeded_var(
    varmap: &mut VarMap,
    name: &str,
    values: Vec<f32>,
    device: &Device,
) -> Result<Tensor> {
    let len = values.len();
    let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
    let param = vb.get_with_hints(len, name, Init::Const(0.0))?;
    varmap.set_one(name, Tensor::from_vec(values, len, device)?)?;
    Ok(param)
}

/// `len` draws of N(mean, stdev²)
pub fn randn_vec<R: Rng + ?Sized>(rng: &mut R, len: usize, mean: f32, stdev: f32) -> Vec<f32> {
    (0..len)
        .map(|_| {
            let z: f32 = StandardNormal.sample(rng);
            mean + stdev * z
        })
        .collect()
}

/// Standard normal noise tensor of shape (rows, cols)
pub fn randn_tensor<R: Rng + ?Sized>(
    rng: &mut R,
    rows: usize,
    cols: usize,
    device: &Device,
) -> Result<Tensor> {
    Tensor::from_vec(randn_vec(rng, rows * cols, 0.0, 1.0), (rows, cols), device)
}
