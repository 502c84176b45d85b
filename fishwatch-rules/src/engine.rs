use std::sync::Arc;

use chrono::{DateTime, Utc};
use fishwatch_model::fact::{Fact, Severity};
use tracing::{debug, warn};

use crate::collaborators::LookupService;
use crate::compiler::CompiledRuleSet;
use crate::error::EvalFailure;
use crate::session::{Firing, Session};

/// Level recorded on facts removed from a batch after an evaluation failure.
pub const EXCEPTION_LEVEL: &str = "L099";

/// Result of evaluating a batch of facts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    /// Facts that were evaluated to completion, in input order.
    pub facts: Vec<Fact>,
    pub firings: Vec<Firing>,
    /// Facts removed from the batch because a rule failed on them.
    pub exceptions: Vec<Fact>,
}

impl EvaluationReport {
    pub fn fact(&self, id: &uuid::Uuid) -> Option<&Fact> {
        self.facts
            .iter()
            .chain(self.exceptions.iter())
            .find(|fact| &fact.id == id)
    }
}

/// Evaluates facts against a compiled rule set.
#[derive(Clone, Default)]
pub struct RuleEngine {
    lookup: Option<Arc<dyn LookupService>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects `lookup` into every session as the lookup global.
    pub fn with_lookup(mut self, lookup: Arc<dyn LookupService>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn evaluate(&self, set: Option<&CompiledRuleSet>, facts: Vec<Fact>) -> EvaluationReport {
        self.evaluate_at(set, facts, Utc::now())
    }

    /// Evaluates `facts` as of `now`.
    ///
    /// Each attempt runs in a fresh session. When a rule fails on a fact,
    /// that fact is taken out of the batch with a warning and the remaining
    /// facts are evaluated again; every retry works on a strictly smaller
    /// batch.
    pub fn evaluate_at(
        &self,
        set: Option<&CompiledRuleSet>,
        facts: Vec<Fact>,
        now: DateTime<Utc>,
    ) -> EvaluationReport {
        let set = match set {
            Some(set) if !set.is_empty() && !facts.is_empty() => set,
            _ => {
                return EvaluationReport {
                    facts,
                    ..Default::default()
                }
            }
        };

        let mut pending = facts;
        let mut exceptions = Vec::new();
        loop {
            match self.attempt(set, &pending, now) {
                Ok((facts, firings)) => {
                    debug!(
                        category = %set.category,
                        facts = facts.len(),
                        firings = firings.len(),
                        exceptions = exceptions.len(),
                        "evaluation complete"
                    );
                    return EvaluationReport {
                        facts,
                        firings,
                        exceptions,
                    };
                }
                Err(failure) => {
                    warn!(rule = %failure.rule_id, fact = %failure.fact, error = %failure.message, "rule failed, retrying without fact");
                    let Some(position) = pending.iter().position(|fact| fact.id == failure.fact) else {
                        // The failing fact is always one of ours; bail out rather than loop.
                        return EvaluationReport {
                            facts: pending,
                            firings: Vec::new(),
                            exceptions,
                        };
                    };
                    let mut failed = pending.remove(position);
                    failed.add_warning_or_error(
                        Severity::Warning,
                        failure.to_string(),
                        failure.rule_id.clone(),
                        EXCEPTION_LEVEL,
                        "",
                    );
                    failed.ok = false;
                    exceptions.push(failed);
                }
            }
        }
    }

    fn attempt(
        &self,
        set: &CompiledRuleSet,
        facts: &[Fact],
        now: DateTime<Utc>,
    ) -> Result<(Vec<Fact>, Vec<Firing>), EvalFailure> {
        let mut session = Session::new(set, now);
        if let Some(lookup) = &self.lookup {
            session.set_lookup(lookup.clone());
        }
        for fact in facts {
            session.insert(fact.clone());
        }
        session.fire_all()?;
        Ok(session.into_parts())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use fishwatch_model::fact::FactKind;
    use fishwatch_model::movement::RawMovementFact;
    use fishwatch_model::rule::SanityRule;

    use super::*;
    use crate::collaborators::LookupError;
    use crate::compiler::{RuleCompiler, RuleSnapshot};

    struct FailsOn(&'static str);

    impl LookupService for FailsOn {
        fn is_present_in_list(&self, _list: &str, value: &str) -> Result<bool, LookupError> {
            if value == self.0 {
                Err(LookupError(format!("cannot resolve {}", value)))
            } else {
                Ok(false)
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn sanity_set(rules: &[(&str, &str)]) -> CompiledRuleSet {
        let snapshot = RuleSnapshot::Sanity(
            rules
                .iter()
                .map(|(name, expression)| SanityRule {
                    name: name.to_string(),
                    expression: expression.to_string(),
                    description: None,
                    updated: None,
                    updated_by: None,
                })
                .collect(),
        );
        RuleCompiler::new()
            .expect("grammars")
            .compile(snapshot, "fp".into(), 1)
            .expect("compiles")
    }

    fn raw(flag: &str) -> Fact {
        Fact::new(RawMovementFact {
            flag_state: Some(flag.into()),
            latitude: Some(10.0),
            longitude: Some(10.0),
            position_time: Some(now() - Duration::hours(1)),
            ..Default::default()
        })
    }

    #[test]
    fn empty_batches_and_sets_pass_through() {
        let engine = RuleEngine::new();
        let set = sanity_set(&[("Lat missing", "latitude == null")]);

        let report = engine.evaluate_at(Some(&set), vec![], now());
        assert!(report.facts.is_empty() && report.firings.is_empty());

        let facts = vec![Fact::new(RawMovementFact::default())];
        let report = engine.evaluate_at(None, facts.clone(), now());
        assert_eq!(report.facts, facts);
        assert!(report.firings.is_empty());

        let empty = sanity_set(&[]);
        let report = engine.evaluate_at(Some(&empty), facts.clone(), now());
        assert_eq!(report.facts, facts);
    }

    #[test]
    fn null_latitude_and_future_time_raise_alarms() {
        let engine = RuleEngine::new();
        let set = sanity_set(&[
            ("Lat missing", "latitude == null"),
            ("Time in future", "positionTime > now()"),
        ]);
        let mut future = raw("SWE");
        if let FactKind::RawMovement(payload) = &mut future.kind {
            payload.position_time = Some(now() + Duration::minutes(10));
        }
        let facts = vec![Fact::new(RawMovementFact::default()), future, raw("SWE")];

        let report = engine.evaluate_at(Some(&set), facts, now());
        let fired: Vec<&str> = report.firings.iter().map(|f| f.rule_name.as_str()).collect();
        assert_eq!(fired, ["Lat missing", "Time in future"]);
        assert!(!report.facts[0].ok);
        assert!(!report.facts[1].ok);
        assert!(report.facts[2].ok);
        assert!(report.exceptions.is_empty());
    }

    #[test]
    fn failing_fact_is_isolated_from_the_batch() {
        let engine = RuleEngine::new().with_lookup(Arc::new(FailsOn("XXX")));
        let set = sanity_set(&[
            ("Unknown flag", r#"!isPresentInList("FLAG_STATE", flagState)"#),
        ]);
        let facts = vec![raw("SWE"), raw("XXX"), raw("DNK"), raw("NOR")];
        let bad = facts[1].id;

        let report = engine.evaluate_at(Some(&set), facts, now());
        assert_eq!(report.facts.len(), 3);
        assert_eq!(report.firings.len(), 3);
        assert_eq!(report.exceptions.len(), 1);

        let exception = &report.exceptions[0];
        assert_eq!(exception.id, bad);
        assert!(!exception.ok);
        assert_eq!(exception.outcomes[0].severity, Severity::Warning);
        assert_eq!(exception.outcomes[0].level, EXCEPTION_LEVEL);
        assert_eq!(exception.outcomes[0].rule_id, "Unknown flag");
    }

    #[test]
    fn every_fact_failing_empties_the_batch() {
        let engine = RuleEngine::new();
        let set = sanity_set(&[("Lookup", r#"isPresentInList("FLAG_STATE", flagState)"#)]);
        let report = engine.evaluate_at(Some(&set), vec![raw("SWE"), raw("DNK")], now());
        assert!(report.facts.is_empty());
        assert_eq!(report.exceptions.len(), 2);
    }
}
