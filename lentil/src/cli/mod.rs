pub mod fit;

use clap::{Parser, Subcommand};

pub use fit::FitArgs;

#[derive(Parser)]
#[command(name = "lentil", version)]
#[command(about = "Linear mixed-effects models by stochastic variational inference")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(
        about = "Fit a linear mixed model to simulated grouped data",
        long_about = "Fit a linear mixed-effects model in the three stages: \n\
		      (1) Simulate training and held-out data from known effects\n\
		      (2) Estimate fixed effects, group scales and the mean-field\n\
		          posterior of the random effects via variational EM\n\
		      (3) Predict held-out responses from the posterior means.\n"
    )]
    Fit(FitArgs),
}
