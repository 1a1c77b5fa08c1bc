//! Fraud Risk Model - Training Entry Point
//!
//! Reads a transactions CSV, trains the fraud classifier, selects decision
//! thresholds and writes a JSON training report.
//!
//! Usage: `train [config.toml]`

use anyhow::{Context, Result};
use fraud_risk_model::{
    config::{AppConfig, LoggingConfig},
    ingest::{self, CalendarWindow},
    pipeline::TrainingPipeline,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "fraud_risk_model={level},train={level}",
            level = logging.level
        ))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.pretty().init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = match &config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };

    init_logging(&config.logging)?;

    info!("Starting Fraud Risk Model training");
    info!(
        config = config_path.as_deref().unwrap_or("config/config.toml"),
        n_trees = config.model.n_trees,
        max_depth = config.model.max_depth,
        cv_folds = config.validation.cv_folds,
        "Configuration loaded"
    );

    let window = CalendarWindow::new(config.data.window_start, config.data.window_end);
    let ingested = ingest::load(&config.data.input_path, window)?;
    let summary = ingested.summary();

    let pipeline = TrainingPipeline::new(&config);
    let (mut report, _artifacts) = pipeline
        .run(&ingested.transactions)
        .context("Training pipeline failed")?;
    report.ingest = Some(summary);

    for outcome in &report.thresholds {
        match &outcome.result {
            Ok(selection) => info!(
                policy = %outcome.policy,
                threshold = format!("{:.4}", selection.threshold),
                objective = selection.objective,
                "Threshold selected"
            ),
            Err(e) => warn!(policy = %outcome.policy, reason = %e, "No threshold for policy"),
        }
    }

    for evaluation in &report.evaluations {
        evaluation.report.print_summary(&evaluation.label());
    }

    info!("Feature importances:");
    for feature in &report.feature_importances {
        info!("  {:<22} {:.4}", feature.name, feature.importance);
    }

    report.write_json(&config.data.report_path)?;
    info!(path = %config.data.report_path, "Training report written");

    Ok(())
}
