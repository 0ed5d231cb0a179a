//! payledger operator CLI
//!
//! ```text
//! payledger [--env dev] migrate                 create tables (PostgreSQL)
//! payledger [--env dev] quote <amount> <method> fee breakdown as JSON
//! payledger [--env dev] stats                   withdrawal stats as JSON
//! ```

use anyhow::{Context, Result, bail};

use payledger::config::AppConfig;
use payledger::db::{Database, schema};
use payledger::engine::LedgerEngine;
use payledger::money::parse_amount;
use payledger::withdrawal::WithdrawalMethod;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Positional arguments with `--env <name>` removed
fn get_command() -> Vec<String> {
    let mut rest = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--env" || arg == "-e" {
            args.next();
            continue;
        }
        rest.push(arg);
    }
    rest
}

fn usage() -> &'static str {
    "usage: payledger [--env <name>] <migrate | quote <amount> <method> | stats>"
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = payledger::logging::init_logging(&app_config);

    tracing::info!("Starting payledger in {} mode", env);

    let command = get_command();
    match command.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["migrate"] => {
            let url = app_config
                .postgres_url
                .as_deref()
                .context("migrate needs postgres_url in the config")?;
            let db = Database::connect(url, app_config.ledger.max_connections).await?;
            schema::init_schema(db.pool()).await?;
            println!("schema ready");
        }
        ["quote", amount, method] => {
            let amount = parse_amount(amount).with_context(|| format!("bad amount: {}", amount))?;
            let method: WithdrawalMethod = method.parse()?;
            let engine = LedgerEngine::from_config(&app_config).await?;
            let quote = engine
                .withdrawals()
                .calculate_clearance_fee(amount, method)
                .await?;
            println!("{}", serde_json::to_string_pretty(&quote)?);
        }
        ["stats"] => {
            let engine = LedgerEngine::from_config(&app_config).await?;
            let stats = engine.withdrawals().withdrawal_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        _ => bail!(usage()),
    }

    Ok(())
}
