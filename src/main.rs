use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use fishwatch::rules::{RefreshOutcome, RuleCategory, RuleCompiler, RuleSetCache};
use fishwatch::{load_rules_config, seed_store};

/// Compiles every rule category from the configured rules directory and
/// reports the rules that would be excluded at runtime.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_rules_config().context("failed to load rules configuration")?;

    if let Err(err) = fishwatch::init_tracing(config.log_level.as_deref()) {
        eprintln!("failed to initialise tracing: {err}");
    }

    let store = seed_store(&config).context("failed to seed rule store")?;
    let compiler = RuleCompiler::new().context("failed to load rule templates")?;
    let cache = RuleSetCache::new(Arc::new(store), compiler);

    let mut problems = 0;
    for category in RuleCategory::ALL {
        match cache.refresh(category).await {
            Ok(RefreshOutcome::Emptied) => info!(%category, "no rules defined"),
            Ok(outcome) => info!(%category, ?outcome, "rule set compiled"),
            Err(err) => {
                error!(%category, error = %err, "rule set could not be compiled");
                problems += 1;
            }
        }
        for failed in cache.failed_rules(category) {
            warn!(%category, rule = %failed.name, reason = %failed.reason, "rule excluded");
            problems += 1;
        }
    }

    if problems > 0 {
        anyhow::bail!("{problems} rule problem(s) found");
    }
    info!(node = %config.node_name, "all rules compiled");
    Ok(())
}
