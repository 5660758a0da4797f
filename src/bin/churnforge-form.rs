//! Churn prediction form server
//!
//! Loads a trained model once and serves the prediction form over HTTP.

use anyhow::{Context, Result};
use churnforge::{logging, server, FormArgs, Predictor};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = FormArgs::parse();
    logging::init(args.verbose);

    let predictor = Predictor::load(&args.model)
        .with_context(|| format!("loading model {}", args.model.display()))?;

    server::serve(predictor, args.addr)
        .await
        .with_context(|| format!("serving on {}", args.addr))
}
