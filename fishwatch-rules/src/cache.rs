use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use fishwatch_model::rule::{BusinessRule, RuleDefinition, SanityRule};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info};

use crate::compiler::{CompiledRuleSet, FailedRule, RuleCategory, RuleCompiler, RuleSnapshot};
use crate::error::RuleError;
use crate::store::RuleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Building,
    Ready,
}

/// Result of a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Definitions match the published set; nothing was rebuilt.
    Unchanged { version: u64 },
    Rebuilt {
        version: u64,
        rules: usize,
        failed: usize,
    },
    /// No definitions; the slot was cleared.
    Emptied,
}

struct RuleSetSlot {
    category: RuleCategory,
    published: ArcSwapOption<CompiledRuleSet>,
    state: Mutex<SlotState>,
    refresh_lock: AsyncMutex<()>,
    next_version: AtomicU64,
}

impl RuleSetSlot {
    fn new(category: RuleCategory) -> Self {
        Self {
            category,
            published: ArcSwapOption::empty(),
            state: Mutex::new(SlotState::Empty),
            refresh_lock: AsyncMutex::new(()),
            next_version: AtomicU64::new(1),
        }
    }
}

/// Published rule sets, one slot per category.
///
/// Refreshes are serialized per slot; readers load the current set without
/// locking and keep using it even while a rebuild is in progress.
pub struct RuleSetCache {
    store: Arc<dyn RuleStore>,
    compiler: RuleCompiler,
    slots: [RuleSetSlot; 3],
}

impl RuleSetCache {
    pub fn new(store: Arc<dyn RuleStore>, compiler: RuleCompiler) -> Self {
        Self {
            store,
            compiler,
            slots: RuleCategory::ALL.map(RuleSetSlot::new),
        }
    }

    fn slot(&self, category: RuleCategory) -> &RuleSetSlot {
        &self.slots[category.index()]
    }

    /// Currently published set, if any.
    pub fn current(&self, category: RuleCategory) -> Option<Arc<CompiledRuleSet>> {
        self.slot(category).published.load_full()
    }

    pub fn state(&self, category: RuleCategory) -> SlotState {
        *self.slot(category).state.lock()
    }

    /// Rules excluded from the published set.
    pub fn failed_rules(&self, category: RuleCategory) -> Vec<FailedRule> {
        self.current(category)
            .map(|set| set.failed_rules.clone())
            .unwrap_or_default()
    }

    /// Refreshes every category. All categories are attempted; the first
    /// error is returned.
    pub async fn refresh_all(&self) -> Result<(), RuleError> {
        let mut first_error = None;
        for category in RuleCategory::ALL {
            if let Err(err) = self.refresh(category).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Fetches the definitions of `category` and rebuilds its set when they
    /// changed. On failure the previously published set stays in service.
    pub async fn refresh(&self, category: RuleCategory) -> Result<RefreshOutcome, RuleError> {
        let slot = self.slot(category);
        let _guard = slot.refresh_lock.lock().await;

        let snapshot = match category {
            RuleCategory::Sanity => RuleSnapshot::Sanity(self.store.list_sanity_rules().await?),
            RuleCategory::Custom => {
                RuleSnapshot::Custom(self.store.list_runnable_custom_rules().await?)
            }
            RuleCategory::Business => {
                RuleSnapshot::Business(self.store.list_business_rules().await?)
            }
        };

        if snapshot.is_empty() {
            slot.published.store(None);
            *slot.state.lock() = SlotState::Empty;
            info!(category = %category, "no rule definitions, rule set cleared");
            return Ok(RefreshOutcome::Emptied);
        }

        let fingerprint = fingerprint(&snapshot);
        if let Some(current) = slot.published.load_full() {
            if current.fingerprint == fingerprint {
                debug!(category = %category, version = current.version, "rule set unchanged");
                return Ok(RefreshOutcome::Unchanged {
                    version: current.version,
                });
            }
        }

        let previous = {
            let mut state = slot.state.lock();
            std::mem::replace(&mut *state, SlotState::Building)
        };

        let version = slot.next_version.fetch_add(1, Ordering::SeqCst);
        match self.compiler.compile(snapshot, fingerprint, version) {
            Ok(set) => {
                let outcome = RefreshOutcome::Rebuilt {
                    version,
                    rules: set.rules.len(),
                    failed: set.failed_rules.len(),
                };
                info!(
                    category = %slot.category,
                    version,
                    rules = set.rules.len(),
                    failed = set.failed_rules.len(),
                    "rule set published"
                );
                slot.published.store(Some(Arc::new(set)));
                *slot.state.lock() = SlotState::Ready;
                Ok(outcome)
            }
            Err(err) => {
                *slot.state.lock() = previous;
                error!(category = %category, error = %err, "rule set build failed, keeping previous set");
                Err(RuleError::Build {
                    category: category.to_string(),
                    source: err,
                })
            }
        }
    }
}

/// Order-independent content fingerprint of a definition snapshot.
///
/// Names, expressions and descriptions compare case-insensitively; update
/// timestamps and authors compare exactly.
pub fn fingerprint(snapshot: &RuleSnapshot) -> String {
    let mut signatures: Vec<String> = match snapshot {
        RuleSnapshot::Sanity(rules) => rules.iter().map(sanity_signature).collect(),
        RuleSnapshot::Custom(rules) => rules.iter().map(custom_signature).collect(),
        RuleSnapshot::Business(rules) => rules.iter().map(business_signature).collect(),
    };
    signatures.sort();

    let mut hasher = Sha256::new();
    hasher.update(snapshot.category().as_str().as_bytes());
    for signature in &signatures {
        hasher.update(b"\n");
        hasher.update(signature.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn sanity_signature(rule: &SanityRule) -> String {
    [
        rule.name.to_lowercase(),
        rule.expression.to_lowercase(),
        lowercase(rule.description.as_deref()),
        timestamp(rule.updated),
        rule.updated_by.clone().unwrap_or_default(),
    ]
    .join("\u{1f}")
}

fn custom_signature(rule: &RuleDefinition) -> String {
    let segments = serde_json::to_string(&rule.sorted_segments()).unwrap_or_default();
    let intervals = serde_json::to_string(&rule.intervals).unwrap_or_default();
    [
        rule.guid.clone(),
        rule.name.to_lowercase(),
        segments.to_lowercase(),
        rule.actions_string(),
        intervals,
        lowercase(rule.description.as_deref()),
        timestamp(rule.updated),
        rule.updated_by.clone().unwrap_or_default(),
    ]
    .join("\u{1f}")
}

fn business_signature(rule: &BusinessRule) -> String {
    [
        rule.br_id.clone(),
        rule.fact_type.as_str().to_string(),
        rule.expression.to_lowercase(),
        rule.message.clone(),
        rule.error_type.as_str().to_string(),
        rule.level.clone(),
        rule.property_names.clone().unwrap_or_default(),
        timestamp(rule.updated),
        rule.updated_by.clone().unwrap_or_default(),
    ]
    .join("\u{1f}")
}

fn lowercase(value: Option<&str>) -> String {
    value.map(str::to_lowercase).unwrap_or_default()
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value.map(|ts| ts.to_rfc3339()).unwrap_or_default()
}
