use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use fishwatch_model::fact::{FactType, Severity};
use fishwatch_model::rule::{BusinessRule, RuleDefinition, SanityRule, TimeInterval};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CompileError, TemplateError};
use crate::expression::Expr;
use crate::segment;
use crate::template::{
    business_template, TemplateGrammar, CUSTOM_RULES_TEMPLATE, SANITY_RULES_TEMPLATE,
};

/// Independent rule categories, each compiled and published on its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleCategory {
    Sanity,
    Custom,
    Business,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 3] = [
        RuleCategory::Sanity,
        RuleCategory::Custom,
        RuleCategory::Business,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Sanity => "SANITY",
            RuleCategory::Custom => "CUSTOM",
            RuleCategory::Business => "BUSINESS",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            RuleCategory::Sanity => 0,
            RuleCategory::Custom => 1,
            RuleCategory::Business => 2,
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens when a rule fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEffect {
    /// Flag the fact and raise an alarm report.
    Alarm,
    /// Hand the declared actions to the dispatcher.
    Custom { guid: String, actions: String },
    /// Attach a validation outcome to the fact.
    Outcome {
        severity: Severity,
        level: String,
        message: String,
        field_path: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    /// Sanity rules are identified by name, custom rules by guid and
    /// business rules by business rule id.
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub fact_type: FactType,
    pub condition: Expr,
    pub effect: RuleEffect,
    pub intervals: Vec<TimeInterval>,
}

impl CompiledRule {
    pub fn is_active_at(&self, instant: DateTime<Utc>) -> bool {
        self.intervals.is_empty() || self.intervals.iter().any(|i| i.contains(instant))
    }
}

/// A rule excluded from its set, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedRule {
    pub name: String,
    pub reason: String,
}

impl From<&CompileError> for FailedRule {
    fn from(err: &CompileError) -> Self {
        let name = match err {
            CompileError::Syntax { rule, .. }
            | CompileError::UnknownField { rule, .. }
            | CompileError::Type { rule, .. }
            | CompileError::Grouping { rule, .. }
            | CompileError::Definition { rule, .. } => rule.clone(),
            CompileError::Source { line, .. } => format!("line {}", line),
        };
        FailedRule {
            name,
            reason: err.to_string(),
        }
    }
}

/// Definitions a set was built from.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSnapshot {
    Sanity(Vec<SanityRule>),
    Custom(Vec<RuleDefinition>),
    Business(Vec<BusinessRule>),
}

impl RuleSnapshot {
    pub fn category(&self) -> RuleCategory {
        match self {
            RuleSnapshot::Sanity(_) => RuleCategory::Sanity,
            RuleSnapshot::Custom(_) => RuleCategory::Custom,
            RuleSnapshot::Business(_) => RuleCategory::Business,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RuleSnapshot::Sanity(rules) => rules.len(),
            RuleSnapshot::Custom(rules) => rules.len(),
            RuleSnapshot::Business(rules) => rules.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Executable rule set published by the cache.
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    pub category: RuleCategory,
    pub version: u64,
    pub fingerprint: String,
    pub source: String,
    pub rules: Vec<CompiledRule>,
    pub failed_rules: Vec<FailedRule>,
    pub snapshot: RuleSnapshot,
    pub compiled_at: DateTime<Utc>,
}

impl CompiledRuleSet {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule(&self, id: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.id == id)
    }
}

/// Renders rule definitions through the template grammars and compiles the
/// result.
///
/// Every cell lands on a single source line: expressions are folded onto
/// one line and rows whose other cells contain a line break are excluded
/// before rendering, so one bad row never corrupts the rest of the source.
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    sanity: TemplateGrammar,
    custom: TemplateGrammar,
    business: HashMap<FactType, TemplateGrammar>,
}

impl RuleCompiler {
    /// Compiler using the bundled grammars.
    pub fn new() -> Result<Self, TemplateError> {
        let mut compiler = Self::with_grammars(
            TemplateGrammar::parse(SANITY_RULES_TEMPLATE)?,
            TemplateGrammar::parse(CUSTOM_RULES_TEMPLATE)?,
        );
        for fact_type in FactType::ALL {
            compiler = compiler
                .with_business_grammar(fact_type, TemplateGrammar::parse(business_template(fact_type))?);
        }
        Ok(compiler)
    }

    /// Compiler without business grammars; business rules are rejected
    /// until one is registered for their fact type.
    pub fn with_grammars(sanity: TemplateGrammar, custom: TemplateGrammar) -> Self {
        Self {
            sanity,
            custom,
            business: HashMap::new(),
        }
    }

    pub fn with_business_grammar(mut self, fact_type: FactType, grammar: TemplateGrammar) -> Self {
        self.business.insert(fact_type, grammar);
        self
    }

    pub fn render_sanity(&self, rules: &[SanityRule]) -> (String, Vec<FailedRule>) {
        let mut rows = Vec::with_capacity(rules.len());
        let mut failed = Vec::new();
        for rule in rules {
            match single_line(&rule.name, &[("name", rule.name.as_str())]) {
                Ok(()) => rows.push([rule.name.clone(), fold(&rule.expression)]),
                Err(err) => exclude(RuleCategory::Sanity, &rule.name, err, &mut failed),
            }
        }
        (self.sanity.render(&rows), failed)
    }

    /// Renders the custom rules whose segments translate. The others are
    /// returned as failures.
    pub fn render_custom(&self, rules: &[RuleDefinition]) -> (String, Vec<FailedRule>) {
        let mut rows = Vec::with_capacity(rules.len());
        let mut failed = Vec::new();
        for rule in rules {
            let actions = rule.actions_string();
            let row = single_line(
                &rule.name,
                &[
                    ("name", rule.name.as_str()),
                    ("guid", rule.guid.as_str()),
                    ("actions", actions.as_str()),
                ],
            )
            .and_then(|()| segment::to_expression(rule));
            match row {
                Ok(expression) => rows.push([rule.name.clone(), expression, actions, rule.guid.clone()]),
                Err(err) => exclude(RuleCategory::Custom, &rule.name, err, &mut failed),
            }
        }
        (self.custom.render(&rows), failed)
    }

    /// Renders the business rules grouped by fact type, each group through
    /// the grammar of its type.
    pub fn render_business(&self, rules: &[BusinessRule]) -> (String, Vec<FailedRule>) {
        let mut source = String::new();
        let mut failed = Vec::new();
        for fact_type in FactType::ALL {
            let group: Vec<&BusinessRule> = rules.iter().filter(|r| r.fact_type == fact_type).collect();
            if group.is_empty() {
                continue;
            }
            let Some(grammar) = self.business.get(&fact_type) else {
                for rule in group {
                    let err = CompileError::definition(
                        &rule.br_id,
                        format!("no business rule grammar for {}", fact_type),
                    );
                    exclude(RuleCategory::Business, &rule.br_id, err, &mut failed);
                }
                continue;
            };

            let mut rows = Vec::with_capacity(group.len());
            for rule in group {
                let field_path = rule.property_names.clone().unwrap_or_default();
                let checked = single_line(
                    &rule.br_id,
                    &[
                        ("brId", rule.br_id.as_str()),
                        ("message", rule.message.as_str()),
                        ("level", rule.level.as_str()),
                        ("propertyNames", field_path.as_str()),
                    ],
                );
                match checked {
                    Ok(()) => rows.push([
                        rule.br_id.clone(),
                        fold(&rule.expression),
                        rule.message.clone(),
                        rule.error_type.as_str().to_string(),
                        rule.level.clone(),
                        field_path,
                    ]),
                    Err(err) => exclude(RuleCategory::Business, &rule.br_id, err, &mut failed),
                }
            }
            source.push_str(&grammar.render(&rows));
        }
        (source, failed)
    }

    /// Builds a rule set from a definition snapshot. Unit failures are
    /// recorded in the set; a malformed rendered source fails the build.
    pub fn compile(
        &self,
        snapshot: RuleSnapshot,
        fingerprint: String,
        version: u64,
    ) -> Result<CompiledRuleSet, CompileError> {
        let (source, mut failed_rules, descriptions, intervals) = match &snapshot {
            RuleSnapshot::Sanity(rules) => {
                let (source, failed) = self.render_sanity(rules);
                let descriptions = rules
                    .iter()
                    .filter_map(|rule| Some((rule.name.clone(), rule.description.clone()?)))
                    .collect::<HashMap<_, _>>();
                (source, failed, descriptions, HashMap::new())
            }
            RuleSnapshot::Custom(rules) => {
                let (source, failed) = self.render_custom(rules);
                let descriptions = rules
                    .iter()
                    .filter_map(|rule| Some((rule.guid.clone(), rule.description.clone()?)))
                    .collect::<HashMap<_, _>>();
                let intervals = rules
                    .iter()
                    .map(|rule| (rule.guid.clone(), rule.intervals.clone()))
                    .collect::<HashMap<_, _>>();
                (source, failed, descriptions, intervals)
            }
            RuleSnapshot::Business(rules) => {
                let (source, failed) = self.render_business(rules);
                (source, failed, HashMap::new(), HashMap::new())
            }
        };
        debug!(category = %snapshot.category(), source = %source, "rendered rule source");

        let (mut rules, unit_failures) = compile_source(&source)?;
        failed_rules.extend(unit_failures);

        for rule in &mut rules {
            rule.description = descriptions.get(&rule.id).cloned();
            if let Some(windows) = intervals.get(&rule.id) {
                rule.intervals = windows.clone();
            }
        }

        Ok(CompiledRuleSet {
            category: snapshot.category(),
            version,
            fingerprint,
            source,
            rules,
            failed_rules,
            snapshot,
            compiled_at: Utc::now(),
        })
    }
}

/// Keeps a rule out of the rendered source and records why.
fn exclude(category: RuleCategory, name: &str, err: CompileError, failed: &mut Vec<FailedRule>) {
    warn!(%category, rule = %name, error = %err, "rule excluded");
    failed.push(FailedRule::from(&err));
}

fn single_line(rule: &str, cells: &[(&str, &str)]) -> Result<(), CompileError> {
    match cells
        .iter()
        .find(|(_, value)| value.contains(['\n', '\r']))
    {
        Some((column, _)) => Err(CompileError::definition(
            rule,
            format!("{} contains a line break", column),
        )),
        None => Ok(()),
    }
}

/// Folds a multi-line expression onto one line.
fn fold(expression: &str) -> String {
    expression
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits rendered source into rule units and compiles each one.
///
/// ```text
/// rule "<name>"
///     on <FactType>
///     when <expression, may span lines>
///     then
///         alarm
///       | ruleGuid "<guid>" + actions "<actions>"
///       | errorType "<ERROR|WARNING>" + level + message + fieldPath
/// end
/// ```
pub fn compile_source(source: &str) -> Result<(Vec<CompiledRule>, Vec<FailedRule>), CompileError> {
    let mut rules = Vec::new();
    let mut failed = Vec::new();
    let mut seen = HashSet::new();
    let mut lines = source.lines().enumerate().peekable();

    while let Some((number, line)) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("package ") {
            continue;
        }
        let Some(name) = trimmed.strip_prefix("rule ").map(unquote) else {
            return Err(CompileError::Source {
                line: number + 1,
                message: format!("expected `rule \"<name>\"`, found `{}`", trimmed),
            });
        };

        let mut unit = Vec::new();
        let mut terminated = false;
        while let Some((_, next)) = lines.peek() {
            let next_trimmed = next.trim();
            if next_trimmed.starts_with("rule ") {
                break;
            }
            lines.next();
            if next_trimmed == "end" {
                terminated = true;
                break;
            }
            unit.push(next_trimmed);
        }

        let compiled = if terminated {
            compile_unit(&name, &unit)
        } else {
            Err(CompileError::syntax(&name, "rule is missing `end`"))
        };

        match compiled {
            Ok(rule) if !seen.insert(rule.id.clone()) => {
                let err = CompileError::definition(&name, format!("duplicate rule id {}", rule.id));
                warn!(rule = %name, "duplicate rule excluded");
                failed.push(FailedRule::from(&err));
            }
            Ok(rule) => rules.push(rule),
            Err(err) => {
                warn!(rule = %name, error = %err, "rule failed to compile");
                failed.push(FailedRule::from(&err));
            }
        }
    }

    Ok((rules, failed))
}

fn compile_unit(name: &str, lines: &[&str]) -> Result<CompiledRule, CompileError> {
    let mut fact_type = None;
    let mut condition = String::new();
    let mut directives = Vec::new();
    let mut section = Section::Head;

    for line in lines {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match section {
            Section::Head => {
                if let Some(ty) = line.strip_prefix("on ") {
                    let ty = ty.trim();
                    fact_type = Some(FactType::parse(ty).ok_or_else(|| {
                        CompileError::definition(name, format!("unknown fact type `{}`", ty))
                    })?);
                } else if let Some(rest) = keyword(line, "when") {
                    condition.push_str(rest);
                    section = Section::When;
                } else {
                    return Err(CompileError::syntax(name, format!("unexpected `{}`", line)));
                }
            }
            Section::When => {
                if let Some(rest) = keyword(line, "then") {
                    section = Section::Then;
                    if !rest.is_empty() {
                        directives.push(rest);
                    }
                } else {
                    condition.push(' ');
                    condition.push_str(line);
                }
            }
            Section::Then => directives.push(line),
        }
    }

    if section != Section::Then {
        return Err(CompileError::syntax(name, "rule has no `when ... then` clause"));
    }
    let fact_type =
        fact_type.ok_or_else(|| CompileError::definition(name, "rule does not declare `on <FactType>`"))?;
    if condition.trim().is_empty() {
        return Err(CompileError::syntax(name, "empty condition"));
    }

    let condition = Expr::compile(&condition, fact_type).map_err(|err| err.for_rule(name))?;
    let effect = parse_effect(name, &directives)?;
    let id = match &effect {
        RuleEffect::Alarm | RuleEffect::Outcome { .. } => name.to_string(),
        RuleEffect::Custom { guid, .. } => guid.clone(),
    };

    Ok(CompiledRule {
        id,
        name: name.to_string(),
        description: None,
        fact_type,
        condition,
        effect,
        intervals: Vec::new(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Head,
    When,
    Then,
}

fn keyword<'a>(line: &'a str, word: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(word)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

#[derive(Default)]
struct Directives {
    alarm: bool,
    guid: Option<String>,
    actions: Option<String>,
    error_type: Option<String>,
    level: Option<String>,
    message: Option<String>,
    field_path: Option<String>,
}

impl Directives {
    fn declares_outcome(&self) -> bool {
        self.error_type.is_some()
            || self.level.is_some()
            || self.message.is_some()
            || self.field_path.is_some()
    }
}

fn parse_effect(name: &str, lines: &[&str]) -> Result<RuleEffect, CompileError> {
    let mut found = Directives::default();

    for directive in lines {
        if *directive == "alarm" {
            found.alarm = true;
        } else if let Some(rest) = keyword(directive, "ruleGuid") {
            found.guid = Some(unquote(rest));
        } else if let Some(rest) = keyword(directive, "actions") {
            found.actions = Some(unquote(rest));
        } else if let Some(rest) = keyword(directive, "errorType") {
            found.error_type = Some(unquote(rest));
        } else if let Some(rest) = keyword(directive, "level") {
            found.level = Some(unquote(rest));
        } else if let Some(rest) = keyword(directive, "message") {
            found.message = Some(unquote(rest));
        } else if let Some(rest) = keyword(directive, "fieldPath") {
            found.field_path = Some(unquote(rest));
        } else {
            return Err(CompileError::syntax(
                name,
                format!("unknown consequence `{}`", directive),
            ));
        }
    }

    let custom = found.guid.is_some() || found.actions.is_some();
    let outcome = found.declares_outcome();
    match (found.alarm, custom, outcome) {
        (true, false, false) => Ok(RuleEffect::Alarm),
        (false, true, false) => match found.guid {
            Some(guid) if !guid.is_empty() => Ok(RuleEffect::Custom {
                guid,
                actions: found.actions.unwrap_or_default(),
            }),
            _ => Err(CompileError::definition(name, "rule actions without a rule guid")),
        },
        (false, false, true) => Ok(RuleEffect::Outcome {
            severity: severity(name, found.error_type.as_deref())?,
            level: found.level.unwrap_or_default(),
            message: found.message.unwrap_or_default(),
            field_path: found.field_path.unwrap_or_default(),
        }),
        (false, false, false) => Err(CompileError::definition(name, "rule has no consequence")),
        _ => Err(CompileError::definition(name, "conflicting consequences")),
    }
}

fn severity(name: &str, error_type: Option<&str>) -> Result<Severity, CompileError> {
    match error_type.map(|value| value.trim().to_ascii_uppercase()).as_deref() {
        Some("ERROR") => Ok(Severity::Error),
        Some("WARNING") => Ok(Severity::Warning),
        Some(other) => Err(CompileError::definition(
            name,
            format!("unknown error type `{}`", other),
        )),
        None => Err(CompileError::definition(name, "outcome without an error type")),
    }
}

/// Text between the first and last double quote, or the trimmed input.
fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    match (raw.find('"'), raw.rfind('"')) {
        (Some(start), Some(end)) if end > start => raw[start + 1..end].to_string(),
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use fishwatch_model::field::SubCriteria;
    use fishwatch_model::rule::{
        ActionKind, Availability, ConditionOperator, ConditionSegment, LogicOperator,
        RuleActionDef,
    };

    use super::*;

    fn sanity(name: &str, expression: &str) -> SanityRule {
        SanityRule {
            name: name.into(),
            expression: expression.into(),
            description: Some(format!("{} description", name)),
            updated: None,
            updated_by: None,
        }
    }

    fn custom(guid: &str, start: &str) -> RuleDefinition {
        RuleDefinition {
            guid: guid.into(),
            name: format!("rule {}", guid),
            description: None,
            availability: Availability::Global,
            organisation: None,
            active: true,
            archived: false,
            aggregate_invocations: false,
            segments: vec![ConditionSegment {
                start_operator: start.into(),
                criteria: SubCriteria::FlagState.criteria(),
                sub_criteria: SubCriteria::FlagState,
                condition: ConditionOperator::Eq,
                value: "SWE".into(),
                end_operator: String::new(),
                logic_operator: LogicOperator::None,
                order: 0,
            }],
            actions: vec![RuleActionDef {
                action: ActionKind::Ticket,
                value: None,
                order: 0,
            }],
            intervals: vec![],
            subscriptions: vec![],
            last_triggered: None,
            updated: None,
            updated_by: None,
        }
    }

    #[test]
    fn compiles_sanity_rules_in_row_order() {
        let compiler = RuleCompiler::new().expect("grammars");
        let set = compiler
            .compile(
                RuleSnapshot::Sanity(vec![
                    sanity("Lat missing", "latitude == null"),
                    sanity("Future", "positionTime > now()"),
                ]),
                "fp".into(),
                1,
            )
            .expect("compiles");

        assert_eq!(set.category, RuleCategory::Sanity);
        let ids: Vec<&str> = set.rules.iter().map(|rule| rule.id.as_str()).collect();
        assert_eq!(ids, ["Lat missing", "Future"]);
        assert_eq!(set.rules[0].effect, RuleEffect::Alarm);
        assert_eq!(set.rules[0].description.as_deref(), Some("Lat missing description"));
        assert!(set.failed_rules.is_empty());
    }

    #[test]
    fn bad_units_are_excluded_and_recorded() {
        let compiler = RuleCompiler::new().expect("grammars");
        let set = compiler
            .compile(
                RuleSnapshot::Sanity(vec![
                    sanity("Good", "latitude > 90"),
                    sanity("Typo", "lattitude > 90"),
                    sanity("Broken", "latitude >"),
                ]),
                "fp".into(),
                1,
            )
            .expect("compiles");

        assert_eq!(set.rules.len(), 1);
        let failed: Vec<&str> = set.failed_rules.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, ["Typo", "Broken"]);
    }

    #[test]
    fn custom_rules_with_bad_grouping_are_recorded() {
        let compiler = RuleCompiler::new().expect("grammars");
        let set = compiler
            .compile(
                RuleSnapshot::Custom(vec![custom("g-1", ""), custom("g-2", "(")]),
                "fp".into(),
                3,
            )
            .expect("compiles");

        assert_eq!(set.rules.len(), 1);
        assert_eq!(
            set.rules[0].effect,
            RuleEffect::Custom {
                guid: "g-1".into(),
                actions: "TICKET,".into()
            }
        );
        assert_eq!(set.failed_rules.len(), 1);
        assert_eq!(set.failed_rules[0].name, "rule g-2");
        assert_eq!(set.version, 3);
    }

    #[test]
    fn empty_snapshot_compiles_to_empty_set() {
        let compiler = RuleCompiler::new().expect("grammars");
        let set = compiler
            .compile(RuleSnapshot::Sanity(vec![]), "fp".into(), 1)
            .expect("compiles");
        assert!(set.is_empty());
        assert!(set.source.contains("package fishwatch.sanity"));
    }

    #[test]
    fn multi_line_conditions_and_missing_end() {
        let source = "rule \"a\"\n on RawMovement\n when latitude > 90\n   || latitude < -90\n then\n alarm\nend\nrule \"b\"\n on RawMovement\n when latitude > 1\n then alarm\n";
        let (rules, failed) = compile_source(source).expect("source");
        assert_eq!(rules.len(), 1);
        assert!(matches!(rules[0].condition, Expr::Or(..)));
        assert_eq!(failed[0].name, "b");
    }

    #[test]
    fn stray_top_level_text_fails_the_build() {
        let err = compile_source("garbage\n").unwrap_err();
        assert!(matches!(err, CompileError::Source { line: 1, .. }));
    }

    #[test]
    fn line_breaks_in_custom_cells_stay_inside_their_rule() {
        let compiler = RuleCompiler::new().expect("grammars");
        let mut odd_value = custom("g-2", "");
        odd_value.segments[0].value = "a\nend\nx".into();
        let mut odd_name = custom("g-3", "");
        odd_name.name = "split\nend\ngarbage".into();
        let mut odd_action = custom("g-4", "");
        odd_action.actions[0].value = Some("x\rend".into());

        let set = compiler
            .compile(
                RuleSnapshot::Custom(vec![custom("g-1", ""), odd_value, odd_name, odd_action]),
                "fp".into(),
                1,
            )
            .expect("one bad row must not fail the build");

        let ids: Vec<&str> = set.rules.iter().map(|rule| rule.id.as_str()).collect();
        assert_eq!(ids, ["g-1", "g-2"]);
        let failed: Vec<&str> = set.failed_rules.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, ["split\nend\ngarbage", "rule g-4"]);
    }

    #[test]
    fn line_breaks_in_sanity_rules_stay_inside_their_rule() {
        let compiler = RuleCompiler::new().expect("grammars");
        let set = compiler
            .compile(
                RuleSnapshot::Sanity(vec![
                    sanity("Good", "latitude > 90"),
                    sanity("Folded", "latitude < -90\n  || latitude > 90"),
                    sanity("Injected", "latitude == null\nend\nrule \"x\""),
                    sanity("Two\nlines", "latitude == null"),
                ]),
                "fp".into(),
                1,
            )
            .expect("compiles");

        let ids: Vec<&str> = set.rules.iter().map(|rule| rule.id.as_str()).collect();
        assert_eq!(ids, ["Good", "Folded"]);
        let failed: Vec<&str> = set.failed_rules.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, ["Two\nlines", "Injected"]);
    }

    #[test]
    fn deeply_nested_rules_are_excluded() {
        let compiler = RuleCompiler::new().expect("grammars");
        let deep = format!("{}latitude == null{}", "(".repeat(2000), ")".repeat(2000));
        let set = compiler
            .compile(
                RuleSnapshot::Sanity(vec![sanity("Good", "latitude > 90"), sanity("Deep", &deep)]),
                "fp".into(),
                1,
            )
            .expect("compiles");
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.failed_rules[0].name, "Deep");

        let mut nested = custom("g-2", "");
        nested.segments[0].start_operator = "(".repeat(2000);
        nested.segments[0].end_operator = ")".repeat(2000);
        let set = compiler
            .compile(RuleSnapshot::Custom(vec![custom("g-1", ""), nested]), "fp".into(), 2)
            .expect("compiles");
        assert_eq!(set.rules.len(), 1);
        assert!(set.failed_rules[0].reason.contains("deeper than"));
    }

    fn business(br_id: &str, fact_type: FactType, expression: &str) -> BusinessRule {
        BusinessRule {
            br_id: br_id.into(),
            fact_type,
            expression: expression.into(),
            message: format!("{} violated", br_id),
            error_type: Severity::Warning,
            level: "L01".into(),
            property_names: Some("chargeAmount".into()),
            active: true,
            updated: None,
            updated_by: None,
        }
    }

    #[test]
    fn business_rules_compile_per_fact_type() {
        let compiler = RuleCompiler::new().expect("grammars");
        let set = compiler
            .compile(
                RuleSnapshot::Business(vec![
                    business("SALE-L01-00-0400", FactType::SalesPrice, "chargeAmount == 0"),
                    business("FA-L00-00-0010", FactType::FishingActivity, "vesselCfr == null"),
                    business("SALE-BROKEN", FactType::SalesPrice, "vesselCfr == null"),
                ]),
                "fp".into(),
                1,
            )
            .expect("compiles");

        assert_eq!(set.category, RuleCategory::Business);
        let ids: Vec<(&str, FactType)> = set
            .rules
            .iter()
            .map(|rule| (rule.id.as_str(), rule.fact_type))
            .collect();
        assert_eq!(
            ids,
            [
                ("SALE-L01-00-0400", FactType::SalesPrice),
                ("FA-L00-00-0010", FactType::FishingActivity)
            ]
        );
        assert_eq!(
            set.rules[0].effect,
            RuleEffect::Outcome {
                severity: Severity::Warning,
                level: "L01".into(),
                message: "SALE-L01-00-0400 violated".into(),
                field_path: "chargeAmount".into(),
            }
        );
        assert_eq!(set.failed_rules[0].name, "SALE-BROKEN");
    }

    #[test]
    fn business_rules_without_grammar_are_excluded() {
        let compiler = RuleCompiler::with_grammars(
            TemplateGrammar::parse(SANITY_RULES_TEMPLATE).expect("grammar"),
            TemplateGrammar::parse(CUSTOM_RULES_TEMPLATE).expect("grammar"),
        );
        let set = compiler
            .compile(
                RuleSnapshot::Business(vec![business("BR-1", FactType::SalesPrice, "chargeAmount == 0")]),
                "fp".into(),
                1,
            )
            .expect("compiles");
        assert!(set.is_empty());
        assert!(set.failed_rules[0].reason.contains("no business rule grammar"));
    }

    #[test]
    fn consequences_must_not_mix() {
        let source = "rule \"a\"\n on SalesPrice\n when chargeAmount == 0\n then\n alarm\n errorType \"ERROR\"\nend\n\
                      rule \"b\"\n on SalesPrice\n when chargeAmount == 0\n then\n errorType \"FATAL\"\nend\n\
                      rule \"c\"\n on SalesPrice\n when chargeAmount == 0\n then\n errorType \"error\"\n message \"say \"no\"\"\nend\n";
        let (rules, failed) = compile_source(source).expect("source");
        let failed: Vec<&str> = failed.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, ["a", "b"]);
        assert_eq!(
            rules[0].effect,
            RuleEffect::Outcome {
                severity: Severity::Error,
                level: String::new(),
                message: "say \"no\"".into(),
                field_path: String::new(),
            }
        );
    }
}
