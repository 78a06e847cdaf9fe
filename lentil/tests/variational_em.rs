use approx::assert_abs_diff_eq;
use lentil::simulate::{generate_grouped_gaussian_data, SimArgs, SimOut};
use lentil::{
    predict, EngineState, Estimates, FitConfig, GroupSpec, GroupedData, LmmError,
    MixedModelSpec, Result, StepStatus, VariationalEm,
};

fn simulate(noise_std: f32, rseed: u64) -> Result<SimOut> {
    generate_grouped_gaussian_data(&SimArgs {
        groups: vec![
            GroupSpec::new("students", 10),
            GroupSpec::new("instructors", 5),
            GroupSpec::new("departments", 2),
        ],
        group_scales: vec![1.0, 0.5, 0.3],
        intercept: 0.5,
        coef: vec![1.5],
        noise_std,
        num_train: 200,
        num_test: 50,
        rseed,
    })
}

#[test]
fn end_to_end_hundred_steps() -> Result<()> {
    let sim = simulate(0.5, 1)?;
    let mut engine = VariationalEm::new(&sim.spec, &sim.train, FitConfig::default())?;
    engine.initialize(100, 10)?;

    let mut records = vec![];
    while engine.state() != EngineState::Done {
        records.push(engine.step()?);
    }

    assert_eq!(records.len(), 100);
    assert_eq!(engine.diagnostics().len(), 100);
    assert!(records.iter().all(|d| d.loss.is_finite()));
    assert_eq!(records.last().map(|d| d.iteration), Some(100));

    let estimates = engine.current_estimates()?;
    assert_eq!(estimates.coef.len(), 1);
    assert_eq!(estimates.group_scales().len(), 3);
    let lengths: Vec<usize> = estimates.groups.iter().map(|g| g.loc.len()).collect();
    assert_eq!(lengths, vec![10, 5, 2]);

    let prediction = engine.predict(&sim.test)?;
    assert_eq!(prediction.predictions.len(), 50);
    assert_eq!(prediction.residuals.as_ref().map(|r| r.len()), Some(50));
    Ok(())
}

#[test]
fn recovers_fixed_effect() -> Result<()> {
    let sim = simulate(0.1, 3)?;
    let config = FitConfig {
        learning_rate: 0.05,
        ..Default::default()
    };
    let mut engine = VariationalEm::new(&sim.spec, &sim.train, config)?;
    engine.initialize(500, 100)?;
    engine.run()?;

    let estimates = engine.current_estimates()?;
    let coef = estimates.coef[0];
    assert!(
        (coef - sim.truth.coef[0]).abs() < 0.5,
        "coef {} vs true {}",
        coef,
        sim.truth.coef[0]
    );

    let summary = engine
        .predict(&sim.test)?
        .summary()
        .expect("held-out data carry a response");
    assert!(summary.rmse < 1.0, "held-out RMSE {}", summary.rmse);
    Ok(())
}

#[test]
fn scales_stay_positive() -> Result<()> {
    let sim = simulate(0.5, 5)?;
    let config = FitConfig {
        learning_rate: 0.1,
        ..Default::default()
    };
    let mut engine = VariationalEm::new(&sim.spec, &sim.train, config)?;
    engine.initialize(200, 50)?;

    let check = |estimates: &Estimates| {
        for (est, group) in estimates.groups.iter().zip(sim.spec.groups.iter()) {
            assert_eq!(est.loc.len(), group.size);
            assert_eq!(est.std.len(), group.size);
            assert!(est.scale > 0.0);
            assert!(est.std.iter().all(|&s| s > 0.0));
        }
    };

    check(&engine.current_estimates()?);
    while engine.state() != EngineState::Done {
        engine.step()?;
        check(&engine.current_estimates()?);
    }
    Ok(())
}

#[test]
fn initial_estimates_reproducible() -> Result<()> {
    let sim = simulate(0.5, 7)?;

    let mut first = VariationalEm::new(&sim.spec, &sim.train, FitConfig::default())?;
    first.initialize(10, 1)?;
    let mut second = VariationalEm::new(&sim.spec, &sim.train, FitConfig::default())?;
    second.initialize(10, 1)?;

    let a = first.current_estimates()?;
    let b = second.current_estimates()?;
    assert_eq!(a, b);
    assert_eq!(a.iteration, 0);
    assert_eq!(a.intercept, 0.0);

    let other = VariationalEm::new(
        &sim.spec,
        &sim.train,
        FitConfig {
            seed: 43,
            ..Default::default()
        },
    )?;
    assert_ne!(other.current_estimates()?.groups[0].loc, a.groups[0].loc);
    Ok(())
}

#[test]
fn split_stepping_matches_single_run() -> Result<()> {
    let sim = simulate(0.5, 9)?;
    let k = 15;

    let mut split = VariationalEm::new(&sim.spec, &sim.train, FitConfig::default())?;
    split.initialize(2 * k, 5)?;
    for _ in 0..k {
        split.step()?;
    }
    for _ in 0..k {
        split.step()?;
    }

    let mut single = VariationalEm::new(&sim.spec, &sim.train, FitConfig::default())?;
    single.initialize(2 * k, 5)?;
    single.run()?;

    assert_eq!(split.diagnostics().len(), single.diagnostics().len());
    for (a, b) in split.diagnostics().iter().zip(single.diagnostics().iter()) {
        assert_eq!(a.iteration, b.iteration);
        assert_abs_diff_eq!(a.loss, b.loss, epsilon = 1e-6);
    }

    let a = split.current_estimates()?;
    let b = single.current_estimates()?;
    assert_abs_diff_eq!(a.coef[0], b.coef[0], epsilon = 1e-6);
    Ok(())
}

#[test]
fn zero_model_zero_residuals() -> Result<()> {
    let sim = generate_grouped_gaussian_data(&SimArgs {
        groups: vec![GroupSpec::new("students", 10), GroupSpec::new("departments", 2)],
        group_scales: vec![0.0, 0.0],
        intercept: 0.0,
        coef: vec![0.0],
        noise_std: 0.0,
        num_train: 20,
        num_test: 30,
        rseed: 11,
    })?;

    let prediction = predict(&Estimates::zeros(&sim.spec), &sim.spec, &sim.test)?;
    let residuals = prediction.residuals.expect("held-out response");
    assert_eq!(residuals.len(), 30);
    assert!(residuals.iter().all(|&r| r == 0.0));
    Ok(())
}

#[test]
fn out_of_range_index_is_config_error() {
    let spec = MixedModelSpec::new(vec![GroupSpec::new("students", 3)], 1);
    let data = GroupedData::new(
        vec![vec![0, 1, 3]],
        vec![vec![0.0, 1.0, 2.0]],
        Some(vec![0.0, 1.0, 2.0]),
    );
    let err = VariationalEm::new(&spec, &data, FitConfig::default())
        .err()
        .expect("index 3 is outside [0, 3)");
    assert!(matches!(err, LmmError::Config(_)));
}

#[test]
fn zero_cardinality_is_config_error() {
    let spec = MixedModelSpec::new(vec![GroupSpec::new("students", 0)], 0);
    let data = GroupedData::new(vec![vec![0]], vec![], Some(vec![0.0]));
    assert!(matches!(
        VariationalEm::new(&spec, &data, FitConfig::default()),
        Err(LmmError::Config(_))
    ));
}

#[test]
fn non_finite_loss_is_reported_not_applied() -> Result<()> {
    let spec = MixedModelSpec::new(vec![GroupSpec::new("students", 2)], 0);
    let data = GroupedData::new(vec![vec![0, 1]], vec![], Some(vec![1e30, -1e30]));
    let mut engine = VariationalEm::new(&spec, &data, FitConfig::default())?;
    engine.initialize(3, 1)?;

    let before = engine.current_estimates()?;
    let diag = engine.step()?;
    assert_eq!(diag.status, StepStatus::NonFiniteLoss);
    assert_eq!(diag.iteration, 1);
    assert!(!diag.is_applied());
    assert_eq!(engine.diagnostics().len(), 1);

    let after = engine.current_estimates()?;
    assert_eq!(before.groups, after.groups);
    assert_eq!(before.intercept, after.intercept);

    // a skipped step does not count as a fit
    assert!(matches!(engine.predict(&data), Err(LmmError::Sequencing(_))));
    Ok(())
}

#[test]
fn non_finite_gradient_is_reported_not_applied() -> Result<()> {
    // the coefficient starts at zero, so the loss is finite while its
    // gradient, proportional to the covariate, overflows
    let spec = MixedModelSpec::new(vec![GroupSpec::new("students", 2)], 1);
    let data = GroupedData::new(
        vec![vec![0, 1]],
        vec![vec![3e38, 3e38]],
        Some(vec![5.0, 5.0]),
    );
    let mut engine = VariationalEm::new(&spec, &data, FitConfig::default())?;
    engine.initialize(2, 1)?;

    let before = engine.current_estimates()?;
    let diag = engine.step()?;
    assert_eq!(diag.status, StepStatus::NonFiniteGradient);
    assert_eq!(diag.iteration, 1);
    assert!(diag.loss.is_finite());
    assert!(!diag.is_applied());
    assert_eq!(engine.diagnostics(), &[diag]);

    let after = engine.current_estimates()?;
    assert_eq!(before.coef, after.coef);
    assert_eq!(before.groups, after.groups);
    assert_eq!(before.intercept, after.intercept);
    assert!(matches!(engine.predict(&data), Err(LmmError::Sequencing(_))));
    Ok(())
}

#[test]
fn reinitialize_keeps_parameters() -> Result<()> {
    let sim = simulate(0.5, 13)?;
    let mut engine = VariationalEm::new(&sim.spec, &sim.train, FitConfig::default())?;
    engine.initialize(20, 10)?;
    engine.run()?;
    let fitted = engine.current_estimates()?;

    engine.initialize(5, 1)?;
    assert_eq!(engine.state(), EngineState::Initialized);
    assert!(engine.diagnostics().is_empty());

    let restarted = engine.current_estimates()?;
    assert_eq!(restarted.iteration, 0);
    assert_eq!(restarted.coef, fitted.coef);
    assert_eq!(restarted.groups, fitted.groups);

    // fitted parameters survive, so prediction is still allowed
    assert!(engine.predict(&sim.test).is_ok());
    Ok(())
}
