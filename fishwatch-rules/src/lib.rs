//! Rule compilation, evaluation and action dispatch for fishwatch.
//!
//! Sanity, custom and business rule definitions are rendered through a template
//! grammar into rule source, compiled into expression trees and published
//! per category through a lock-free cache. Facts are evaluated against the
//! published sets in call-scoped sessions, and every firing is turned into
//! alarms, tickets, mails or endpoint reports by the dispatcher.

pub mod action;
pub mod cache;
pub mod collaborators;
pub mod compiler;
pub mod dispatcher;
pub mod engine;
mod error;
pub mod expression;
pub mod loader;
pub mod refresh;
pub mod segment;
pub mod session;
pub mod store;
pub mod template;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use action::{parse_actions, DeclaredAction, TicketPolicy};
pub use cache::{fingerprint, RefreshOutcome, RuleSetCache, SlotState};
pub use collaborators::{
    AuditLog, AuditObject, AuditOperation, Directory, Endpoint, EndpointGateway, EndpointReport,
    LookupError, LookupService, MailGateway, NotificationEvent, Notifier, Organisation,
    RecipientInfo,
};
pub use compiler::{
    CompiledRule, CompiledRuleSet, FailedRule, RuleCategory, RuleCompiler, RuleEffect,
    RuleSnapshot,
};
pub use dispatcher::{
    ActionDispatcher, Collaborators, DispatchSummary, DispatcherConfig, ASSET_NOT_SENDING_RULE,
};
pub use engine::{EvaluationReport, RuleEngine};
pub use error::{
    CompileError, DispatchError, EvalFailure, GatewayError, RuleError, StoreError, TemplateError,
};
pub use loader::{load_rules, RuleDocument};
pub use refresh::{RefreshHandle, RefreshWorker};
pub use session::{Firing, Session};
pub use store::{IncidentStore, InMemoryIncidentStore, InMemoryRuleStore, RuleStore};
pub use template::TemplateGrammar;
