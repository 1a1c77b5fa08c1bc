//! Synthetic Transaction Generator
//!
//! Writes a seeded synthetic transactions CSV in the layout `train` reads.
//!
//! Usage: `synth_transactions [output.csv] [accounts] [tx_per_account] [fraud_rate] [seed]`

use anyhow::Context;
use fraud_risk_model::synth::{SyntheticConfig, TransactionGenerator};
use fraud_risk_model::types::RawTransaction;
use std::path::Path;
use tracing::info;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("synth_transactions=info".parse()?),
        )
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let defaults = SyntheticConfig::default();
    let output = args.get(1).map(|s| s.as_str()).unwrap_or("data/transactions.csv");
    let config = SyntheticConfig {
        accounts: args.get(2).and_then(|s| s.parse().ok()).unwrap_or(defaults.accounts),
        transactions_per_account: args
            .get(3)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.transactions_per_account),
        fraud_rate: args.get(4).and_then(|s| s.parse().ok()).unwrap_or(defaults.fraud_rate),
        seed: args.get(5).and_then(|s| s.parse().ok()).unwrap_or(defaults.seed),
        ..defaults
    };

    info!(
        output = %output,
        accounts = config.accounts,
        transactions_per_account = config.transactions_per_account,
        fraud_rate = config.fraud_rate,
        seed = config.seed,
        "Configuration loaded"
    );

    let transactions = TransactionGenerator::new(config).generate();

    let path = Path::new(output);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for tx in &transactions {
        writer.serialize(RawTransaction::from(tx))?;
    }
    writer.flush()?;

    let frauds = transactions.iter().filter(|t| t.is_fraud).count();
    info!(
        "Completed! Wrote {} transactions ({} legitimate, {} fraudulent) to {}",
        transactions.len(),
        transactions.len() - frauds,
        frauds,
        path.display()
    );

    Ok(())
}
