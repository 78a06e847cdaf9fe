use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use crate::inference::{Diagnostics, EngineState, Estimates, FitConfig, VariationalEm};
use crate::predict::ResidualSummary;
use crate::sgvb::{GroupSpec, MixedModelSpec};
use crate::simulate::{generate_grouped_gaussian_data, SimArgs, SimTruth};

fn parse_group(s: &str) -> std::result::Result<GroupSpec, String> {
    let (name, size) = s
        .split_once(':')
        .ok_or_else(|| format!("expected `name:size`, got `{}`", s))?;
    let size: usize = size
        .trim()
        .parse()
        .map_err(|e| format!("bad group size in `{}`: {}", s, e))?;
    Ok(GroupSpec::new(name.trim(), size))
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(
        long,
        value_delimiter = ',',
        value_parser = parse_group,
        default_value = "students:10,instructors:5,departments:2",
        help = "Random-effect groups as `name:size`, comma separated"
    )]
    pub groups: Vec<GroupSpec>,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = "1.0,0.5,0.3",
        help = "True standard deviation of each group's effects"
    )]
    pub group_scales: Vec<f32>,

    #[arg(long, default_value = "0.5", help = "True intercept")]
    pub intercept: f32,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = "1.5",
        help = "True fixed-effect coefficients, one per covariate"
    )]
    pub coef: Vec<f32>,

    #[arg(long, default_value = "0.1", help = "Observation noise standard deviation")]
    pub noise: f32,

    #[arg(long, default_value = "200")]
    pub num_train: usize,

    #[arg(long, default_value = "50")]
    pub num_test: usize,

    #[arg(long, default_value = "1", help = "Random seed for the simulated data")]
    pub sim_seed: u64,

    #[arg(long, default_value = "500")]
    pub iters: usize,

    #[arg(long, default_value = "50", help = "Log the loss every this many steps")]
    pub report_interval: usize,

    #[arg(long, default_value = "0.01")]
    pub lr: f64,

    #[arg(long, default_value = "1", help = "Monte Carlo draws per step")]
    pub samples: usize,

    #[arg(long, default_value = "42", help = "Random seed for initialization and sampling")]
    pub seed: u64,

    #[arg(short, long, help = "Write a JSON summary of the fit to this file")]
    pub output: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Serialize)]
struct FitSummary<'a> {
    spec: &'a MixedModelSpec,
    config: &'a FitConfig,
    truth: &'a SimTruth,
    estimates: &'a Estimates,
    held_out: Option<ResidualSummary>,
    diagnostics: &'a [Diagnostics],
}

pub fn run(args: &FitArgs) -> Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let sim = generate_grouped_gaussian_data(&SimArgs {
        groups: args.groups.clone(),
        group_scales: args.group_scales.clone(),
        intercept: args.intercept,
        coef: args.coef.clone(),
        noise_std: args.noise,
        num_train: args.num_train,
        num_test: args.num_test,
        rseed: args.sim_seed,
    })?;

    let config = FitConfig {
        learning_rate: args.lr,
        num_samples: args.samples,
        seed: args.seed,
        ..Default::default()
    };

    let mut engine = VariationalEm::new(&sim.spec, &sim.train, config)?;
    engine.initialize(args.iters, args.report_interval)?;

    let pb = ProgressBar::new(args.iters as u64);
    if args.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut num_skipped = 0;
    while engine.state() != EngineState::Done {
        let diag = engine.step()?;
        if !diag.is_applied() {
            num_skipped += 1;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if num_skipped > 0 {
        info!("{} of {} steps were not applied", num_skipped, args.iters);
    }

    let estimates = engine.current_estimates()?;

    info!("intercept: {:.4} (true {:.4})", estimates.intercept, sim.truth.intercept);
    for (j, (est, truth)) in estimates.coef.iter().zip(sim.truth.coef.iter()).enumerate() {
        info!("coef[{}]: {:.4} (true {:.4})", j, est, truth);
    }
    for (group, truth) in estimates.groups.iter().zip(sim.truth.group_scales.iter()) {
        info!("σ[{}]: {:.4} (true {:.4})", group.name, group.scale, truth);
    }

    let held_out = if args.num_test > 0 {
        let prediction = engine.predict(&sim.test)?;
        let summary = prediction.summary();
        if let Some(s) = summary.as_ref() {
            info!(
                "held-out: {} rows, RMSE = {:.4}, mean residual = {:.4}",
                s.num_obs, s.rmse, s.mean
            );
        }
        summary
    } else {
        None
    };

    if let Some(path) = args.output.as_ref() {
        let summary = FitSummary {
            spec: &sim.spec,
            config: engine.config(),
            truth: &sim.truth,
            estimates: &estimates,
            held_out,
            diagnostics: engine.diagnostics(),
        };
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &summary)?;
        info!("wrote {:?}", path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group() {
        assert_eq!(parse_group("students:10"), Ok(GroupSpec::new("students", 10)));
        assert_eq!(parse_group(" dept : 2"), Ok(GroupSpec::new("dept", 2)));
        assert!(parse_group("students").is_err());
        assert!(parse_group("students:x").is_err());
    }
}
