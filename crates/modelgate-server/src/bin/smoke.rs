//! modelgate smoke test
//!
//! Resolves and loads one model reference with the serving loader, then runs
//! a single prediction on the iris sample row. Exits non-zero on failure.

use anyhow::{Context, Result};
use clap::Parser;
use modelgate_core::{FeatureRow, ModelReference};
use modelgate_loader::ModelLoader;
use serde_json::json;
use tracing::info;

use modelgate_server::{telemetry, ConfigArgs, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "modelgate-smoke")]
#[command(about = "Load a model reference and run one prediction", long_about = None)]
struct Cli {
    /// Model reference (`models:/<name>/<version>` or `s3://<bucket>/<key>`);
    /// defaults to the configured model
    reference: Option<String>,

    #[command(flatten)]
    config: ConfigArgs,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn sample_row() -> FeatureRow {
    let row = json!({
        "sepal length (cm)": 5.1,
        "sepal width (cm)": 3.5,
        "petal length (cm)": 1.4,
        "petal width (cm)": 0.2,
    });

    match row {
        serde_json::Value::Object(map) => map,
        _ => FeatureRow::new(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose, false);

    let config = ServerConfig::load(&cli.config)?;
    let reference = match &cli.reference {
        Some(uri) => ModelReference::parse(uri)?,
        None => config.model.default_reference()?,
    };

    let loader = ModelLoader::from_config(&config.loader)?;
    info!("Loading {}", reference);

    let predictor = loader
        .load_reference(&reference)
        .await
        .with_context(|| format!("failed to load {}", reference))?;
    info!("Loaded {} ({})", predictor.name(), predictor.kind().as_str());

    let labels = predictor
        .predict(&[sample_row()])
        .context("prediction on the sample row failed")?;
    let prediction = labels
        .into_iter()
        .next()
        .context("model returned no prediction")?;

    println!("{}: {}", reference, prediction);
    Ok(())
}
