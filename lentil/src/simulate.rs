use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::GroupedData;
use crate::error::{LmmError, Result};
use crate::sgvb::{randn_vec, GroupSpec, MixedModelSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimArgs {
    pub groups: Vec<GroupSpec>,
    /// true σ_g, one per group
    pub group_scales: Vec<f32>,
    pub intercept: f32,
    /// true coefficients, one per fixed covariate
    pub coef: Vec<f32>,
    /// standard deviation of the observation noise
    pub noise_std: f32,
    pub num_train: usize,
    pub num_test: usize,
    pub rseed: u64,
}

/// True effects behind a simulated data set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTruth {
    pub intercept: f32,
    pub coef: Vec<f32>,
    pub group_scales: Vec<f32>,
    pub random_effects: Vec<Vec<f32>>,
}

pub struct SimOut {
    pub spec: MixedModelSpec,
    pub train: GroupedData,
    pub test: GroupedData,
    pub truth: SimTruth,
}

/// Generate training and held-out sets from one draw of the effects
///
/// ```text
/// u_g(k) ~ N(0, σ_g²)
/// G_g(i) ~ Uniform{0 .. n_g - 1},  x(i,j) ~ N(0, 1)
/// y(i)   = b0 + sum_j b(j) x(i,j) + sum_g u_g(G_g(i)) + noise * N(0, 1)
/// ```
///
pub fn generate_grouped_gaussian_data(args: &SimArgs) -> Result<SimOut> {
    let spec = MixedModelSpec::new(args.groups.clone(), args.coef.len());
    spec.validate()?;

    if args.group_scales.len() != args.groups.len() {
        return Err(LmmError::config(format!(
            "{} group scales for {} groups",
            args.group_scales.len(),
            args.groups.len()
        )));
    }
    if args
        .group_scales
        .iter()
        .chain(std::iter::once(&args.noise_std))
        .any(|s| !s.is_finite() || *s < 0.0)
    {
        return Err(LmmError::config("scales must be finite and non-negative"));
    }
    if args.num_train == 0 {
        return Err(LmmError::config("at least one training observation"));
    }

    let mut rng = StdRng::seed_from_u64(args.rseed);

    // 1. random effects
    let random_effects: Vec<Vec<f32>> = args
        .groups
        .iter()
        .zip(args.group_scales.iter())
        .map(|(g, &scale)| randn_vec(&mut rng, g.size, 0.0, scale))
        .collect();

    let truth = SimTruth {
        intercept: args.intercept,
        coef: args.coef.clone(),
        group_scales: args.group_scales.clone(),
        random_effects,
    };

    // 2. observations sharing the same effects
    let train = sample_observations(&mut rng, args, &truth, args.num_train);
    let test = sample_observations(&mut rng, args, &truth, args.num_test);

    info!(
        "simulated {} training and {} held-out observations",
        args.num_train, args.num_test
    );

    Ok(SimOut {
        spec,
        train,
        test,
        truth,
    })
}

fn sample_observations(
    rng: &mut StdRng,
    args: &SimArgs,
    truth: &SimTruth,
    nn: usize,
) -> GroupedData {
    let group_index: Vec<Vec<u32>> = args
        .groups
        .iter()
        .map(|g| (0..nn).map(|_| rng.random_range(0..g.size as u32)).collect())
        .collect();

    let covariates: Vec<Vec<f32>> = args
        .coef
        .iter()
        .map(|_| randn_vec(rng, nn, 0.0, 1.0))
        .collect();

    let noise = randn_vec(rng, nn, 0.0, args.noise_std);

    let mut y = vec![truth.intercept; nn];
    for (&b, column) in truth.coef.iter().zip(covariates.iter()) {
        for (y_i, &x) in y.iter_mut().zip(column.iter()) {
            *y_i += b * x;
        }
    }
    for (u, index) in truth.random_effects.iter().zip(group_index.iter()) {
        for (y_i, &g) in y.iter_mut().zip(index.iter()) {
            *y_i += u[g as usize];
        }
    }
    for (y_i, e) in y.iter_mut().zip(noise) {
        *y_i += e;
    }

    GroupedData::new(group_index, covariates, Some(y))
}
