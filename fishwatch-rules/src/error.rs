use std::path::PathBuf;

use fishwatch_core::FishwatchError;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned when loading rule definitions or refreshing a rule set.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rules path does not exist: {0}")]
    MissingPath(String),
    #[error("failed to read rules from {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rules from {path}: {message}")]
    Parse { path: String, message: String },
    #[error("duplicate rule identifier detected: {id}")]
    DuplicateRule { id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("failed to build {category} rule set: {source}")]
    Build {
        category: String,
        #[source]
        source: CompileError,
    },
    #[error("refresh worker is shutting down")]
    ShuttingDown,
}

impl RuleError {
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuleError::Io {
            path: path.into().display().to_string(),
            source,
        }
    }

    pub fn parse_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        RuleError::Parse {
            path: path.into().display().to_string(),
            message: message.into(),
        }
    }
}

impl From<RuleError> for FishwatchError {
    fn from(value: RuleError) -> Self {
        match value {
            RuleError::Store(err) => FishwatchError::StoreUnavailable(err.to_string()),
            RuleError::Template(err) => FishwatchError::Config(err.to_string()),
            other => FishwatchError::Engine(other.to_string()),
        }
    }
}

impl From<TemplateError> for FishwatchError {
    fn from(value: TemplateError) -> Self {
        FishwatchError::Config(value.to_string())
    }
}

/// Failures reported by the rule and incident stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

/// A malformed template grammar. Fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("grammar does not start with a `template header` line")]
    MissingHeader,
    #[error("template header declares no parameters")]
    NoParameters,
    #[error("grammar declares no `template \"<name>\"` block")]
    MissingTemplate,
    #[error("template {name} is missing `end template`")]
    UnterminatedTemplate { name: String },
    #[error("template body references undeclared parameter `{name}`")]
    UnknownPlaceholder { name: String },
}

/// Errors raised while turning rule definitions into executable rules.
///
/// Unit level variants exclude one rule from the set. `Source` rejects the
/// whole rendered source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("rule {rule}: syntax error: {message}")]
    Syntax { rule: String, message: String },
    #[error("rule {rule}: unknown field `{field}` on {fact_type}")]
    UnknownField {
        rule: String,
        fact_type: String,
        field: String,
    },
    #[error("rule {rule}: type error: {message}")]
    Type { rule: String, message: String },
    #[error("rule {rule}: unbalanced condition grouping: {message}")]
    Grouping { rule: String, message: String },
    #[error("rule {rule}: {message}")]
    Definition { rule: String, message: String },
    #[error("rendered source line {line}: {message}")]
    Source { line: usize, message: String },
}

impl CompileError {
    pub fn syntax(rule: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn type_error(rule: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Type {
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn definition(rule: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Definition {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Attaches the rule name to an error produced without one.
    pub(crate) fn for_rule(self, name: &str) -> Self {
        match self {
            CompileError::Syntax { message, .. } => CompileError::syntax(name, message),
            CompileError::UnknownField {
                fact_type, field, ..
            } => CompileError::UnknownField {
                rule: name.to_string(),
                fact_type,
                field,
            },
            CompileError::Type { message, .. } => CompileError::type_error(name, message),
            CompileError::Grouping { message, .. } => CompileError::Grouping {
                rule: name.to_string(),
                message,
            },
            CompileError::Definition { message, .. } => CompileError::definition(name, message),
            source @ CompileError::Source { .. } => source,
        }
    }
}

/// Evaluation failure attributable to one rule and one fact.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rule {rule_id} failed on fact {fact}: {message}")]
pub struct EvalFailure {
    pub rule_id: String,
    pub fact: Uuid,
    pub message: String,
}

/// Failures reported by the mail and endpoint gateways or the directory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Failure of a single dispatched action. Logged, never propagated to the
/// evaluation.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("action {action} requires a value")]
    MissingValue { action: String },
    #[error("fact {0} is not a movement")]
    NotAMovement(Uuid),
}
