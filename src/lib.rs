//! Fishwatch: rules module for fisheries monitoring.
//!
//! Vessel position reports and fishery-activity messages are validated
//! against three rule categories:
//!
//! * sanity rules, fixed validity checks applied to raw movements, which
//!   raise alarms;
//! * custom rules, user-authored rules applied to enriched movements, which
//!   raise tickets and run their declared actions;
//! * business rules, per fact type checks on sales and logbook data, which
//!   attach warnings and errors to the facts they fire on.
//!
//! Vessels that stop reporting are ticketed through
//! [`RulesModule::check_silent_vessels`].
//!
//! [`RulesModule`] wires the pieces together: a rule store, the compiled
//! rule set cache with its refresh worker, the evaluation engine and the
//! action dispatcher.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

pub use fishwatch_core::{
    init_tracing, load_rules_config, ConfigError, CoreResult, Environment, FishwatchError,
    RulesConfig,
};
pub use fishwatch_model::prelude::*;
pub use fishwatch_rules as rules;

use fishwatch_rules::{
    ActionDispatcher, Collaborators, DispatchSummary, DispatcherConfig, EvaluationReport,
    FailedRule, InMemoryRuleStore, LookupService, Notifier, RefreshOutcome, RefreshWorker,
    RuleCategory, RuleCompiler, RuleEngine, RuleSetCache,
};

/// Evaluation report of a batch together with the side effects its firings
/// produced.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub report: EvaluationReport,
    pub dispatched: DispatchSummary,
}

/// Running rules module.
pub struct RulesModule {
    cache: Arc<RuleSetCache>,
    engine: RuleEngine,
    dispatcher: ActionDispatcher,
    worker: RefreshWorker,
}

impl RulesModule {
    /// Builds the module and publishes the initial rule sets.
    ///
    /// A malformed template grammar fails startup. A store that cannot be
    /// read leaves the affected category empty until the next refresh.
    pub async fn start(
        config: &RulesConfig,
        collaborators: Collaborators,
        lookup: Option<Arc<dyn LookupService>>,
    ) -> CoreResult<Self> {
        let compiler = RuleCompiler::new()?;
        let cache = Arc::new(RuleSetCache::new(collaborators.rules.clone(), compiler));

        if let Err(err) = cache.refresh_all().await {
            warn!(error = %err, "initial rule set refresh failed");
        }

        let mut engine = RuleEngine::new();
        if let Some(lookup) = lookup {
            engine = engine.with_lookup(lookup);
        }
        let dispatcher = ActionDispatcher::new(collaborators, DispatcherConfig::from(config));
        let worker = RefreshWorker::spawn(cache.clone(), config.refresh_interval);

        info!(
            node = %config.node_name,
            environment = ?config.environment,
            policy = ?dispatcher.config().policy,
            "rules module started"
        );
        Ok(Self {
            cache,
            engine,
            dispatcher,
            worker,
        })
    }

    /// Runs the sanity rules over raw movements and raises an alarm for
    /// every firing.
    pub async fn validate_raw_movements(&self, movements: Vec<RawMovementFact>) -> BatchOutcome {
        let facts = movements.into_iter().map(Fact::new).collect();
        self.evaluate(RuleCategory::Sanity, facts).await
    }

    /// Runs the custom rules over enriched movements and dispatches the
    /// actions of every firing.
    pub async fn evaluate_movements(&self, movements: Vec<MovementFact>) -> BatchOutcome {
        let facts = movements.into_iter().map(Fact::new).collect();
        self.evaluate(RuleCategory::Custom, facts).await
    }

    /// Runs the business rules over sales and logbook facts. Firings attach
    /// their outcome to the fact; nothing is dispatched.
    pub async fn validate_facts(&self, facts: Vec<Fact>) -> BatchOutcome {
        self.evaluate(RuleCategory::Business, facts).await
    }

    /// Opens an asset-not-sending ticket for every vessel whose last report
    /// is older than the configured silence threshold.
    pub async fn check_silent_vessels(&self, reports: &[PreviousReport]) -> DispatchSummary {
        self.dispatcher
            .check_previous_reports(reports, Utc::now())
            .await
    }

    pub async fn evaluate(&self, category: RuleCategory, facts: Vec<Fact>) -> BatchOutcome {
        let set = self.cache.current(category);
        let report = self.engine.evaluate(set.as_deref(), facts);
        let dispatched = self.dispatcher.dispatch_all(&report.firings).await;
        BatchOutcome { report, dispatched }
    }

    /// Refreshes `category` immediately and reports the outcome.
    pub async fn refresh(&self, category: RuleCategory) -> CoreResult<RefreshOutcome> {
        Ok(self.cache.refresh(category).await?)
    }

    /// Queues a refresh on the background worker.
    pub fn request_refresh(&self, category: RuleCategory) -> CoreResult<()> {
        Ok(self.worker.handle().request(category)?)
    }

    pub fn failed_rules(&self, category: RuleCategory) -> Vec<FailedRule> {
        self.cache.failed_rules(category)
    }

    pub fn cache(&self) -> &Arc<RuleSetCache> {
        &self.cache
    }

    pub fn notifier(&self) -> &Notifier {
        self.dispatcher.notifier()
    }

    pub async fn shutdown(self) {
        self.worker.shutdown().await;
        info!("rules module stopped");
    }
}

/// Creates the in-memory rule store, seeded from `rules_path` when one is
/// configured.
pub fn seed_store(config: &RulesConfig) -> CoreResult<InMemoryRuleStore> {
    match &config.rules_path {
        Some(path) => Ok(InMemoryRuleStore::from_path(path)?),
        None => Ok(InMemoryRuleStore::new()),
    }
}
