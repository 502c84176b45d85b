use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fishwatch_model::fact::{Fact, FactKind, Severity};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::collaborators::LookupService;
use crate::compiler::{CompiledRule, CompiledRuleSet, RuleCategory, RuleEffect};
use crate::error::EvalFailure;
use crate::expression::EvalContext;

/// Level recorded on the error outcome of a sanity rule firing.
pub const SANITY_LEVEL: &str = "L00";

/// One rule activation that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    pub category: RuleCategory,
    pub rule_id: String,
    pub rule_name: String,
    pub effect: RuleEffect,
    pub fact_id: Uuid,
    /// Payload of the fact the rule fired on.
    pub fact: FactKind,
    pub fired_at: DateTime<Utc>,
}

/// Working memory for a single evaluation attempt.
///
/// Facts are inserted, then `fire_all` runs the agenda: every (rule, fact)
/// activation whose condition holds fires once, rules in compiled order per
/// fact, until a pass produces no new firing. A session is never reused.
///
/// Facts carrying unique ids describe shared business objects: once a rule
/// fired on a fact, the same rule stays silent on every later fact sharing
/// one of its ids.
pub struct Session<'a> {
    set: &'a CompiledRuleSet,
    lookup: Option<Arc<dyn LookupService>>,
    now: DateTime<Utc>,
    facts: Vec<Fact>,
    fired: HashSet<(usize, usize)>,
    reported: HashSet<(usize, String)>,
    firings: Vec<Firing>,
}

impl<'a> Session<'a> {
    pub fn new(set: &'a CompiledRuleSet, now: DateTime<Utc>) -> Self {
        Self {
            set,
            lookup: None,
            now,
            facts: Vec::new(),
            fired: HashSet::new(),
            reported: HashSet::new(),
            firings: Vec::new(),
        }
    }

    /// Registers the lookup service global.
    pub fn set_lookup(&mut self, lookup: Arc<dyn LookupService>) {
        self.lookup = Some(lookup);
    }

    pub fn insert(&mut self, fact: Fact) {
        self.facts.push(fact);
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Fires rules until no activation is left. Returns the number of
    /// firings, or the first failure with the rule and fact responsible.
    pub fn fire_all(&mut self) -> Result<usize, EvalFailure> {
        let set = self.set;
        let active: Vec<(usize, &CompiledRule)> = set
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.is_active_at(self.now))
            .collect();
        let lookup = self.lookup.clone();
        let ctx = EvalContext {
            now: self.now,
            lookup: lookup.as_deref(),
        };

        let before = self.firings.len();
        loop {
            let mut fired_this_pass = false;
            for fact_index in 0..self.facts.len() {
                for (rule_index, rule) in &active {
                    if rule.fact_type != self.facts[fact_index].fact_type()
                        || self.fired.contains(&(*rule_index, fact_index))
                    {
                        continue;
                    }

                    let fact = &self.facts[fact_index];
                    let matched = rule.condition.test(fact, &ctx).map_err(|err| EvalFailure {
                        rule_id: rule.id.clone(),
                        fact: fact.id,
                        message: err.to_string(),
                    })?;
                    if !matched {
                        continue;
                    }

                    self.fired.insert((*rule_index, fact_index));
                    if self.already_reported(*rule_index, fact_index) {
                        trace!(rule = %rule.name, fact = %self.facts[fact_index].id, "object already reported");
                        continue;
                    }
                    fired_this_pass = true;
                    self.fire(rule, fact_index);
                }
            }
            if !fired_this_pass {
                break;
            }
        }

        let fired = self.firings.len() - before;
        debug!(category = %set.category, facts = self.facts.len(), fired, "session fired");
        Ok(fired)
    }

    /// Marks the unique ids of the fact as reported by the rule. True when
    /// one of them already was.
    fn already_reported(&mut self, rule_index: usize, fact_index: usize) -> bool {
        let ids = &self.facts[fact_index].unique_ids;
        if ids
            .iter()
            .any(|id| self.reported.contains(&(rule_index, id.clone())))
        {
            return true;
        }
        for id in ids {
            self.reported.insert((rule_index, id.clone()));
        }
        false
    }

    fn fire(&mut self, rule: &CompiledRule, fact_index: usize) {
        let fact = &mut self.facts[fact_index];
        trace!(rule = %rule.name, fact = %fact.id, "rule fired");

        match &rule.effect {
            RuleEffect::Alarm => {
                let message = rule.description.clone().unwrap_or_else(|| rule.name.clone());
                fact.add_warning_or_error(Severity::Error, message, rule.id.clone(), SANITY_LEVEL, "");
            }
            RuleEffect::Outcome {
                severity,
                level,
                message,
                field_path,
            } => fact.add_warning_or_error(
                *severity,
                message.clone(),
                rule.id.clone(),
                level.clone(),
                field_path.clone(),
            ),
            RuleEffect::Custom { .. } => {}
        }

        self.firings.push(Firing {
            category: self.set.category,
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            effect: rule.effect.clone(),
            fact_id: fact.id,
            fact: fact.kind.clone(),
            fired_at: self.now,
        });
    }

    /// Ends the session, handing back the facts and the firings.
    pub fn into_parts(self) -> (Vec<Fact>, Vec<Firing>) {
        (self.facts, self.firings)
    }
}
