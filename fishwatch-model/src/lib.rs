//! Shared data model of the fishwatch rules module: facts presented to the
//! rule interpreter, rule definitions and the incidents raised by firings.

pub mod activity;
pub mod error;
pub mod fact;
pub mod field;
pub mod incident;
pub mod movement;
pub mod rule;

pub use error::ModelError;

pub mod prelude {
    pub use crate::activity::{Amount, FishingActivityFact, SalesPriceFact};
    pub use crate::fact::{Fact, FactKind, FactType, Severity, SourceRef, ValidationOutcome};
    pub use crate::field::{Criteria, FactPayload, FieldInfo, FieldType, FieldValue, SubCriteria};
    pub use crate::incident::{AlarmItem, AlarmReport, AlarmStatus, Ticket, TicketStatus};
    pub use crate::movement::{MovementFact, PreviousReport, RawMovementFact};
    pub use crate::rule::{
        ActionKind, Availability, ConditionOperator, ConditionSegment, LogicOperator,
        BusinessRule, RuleActionDef, RuleDefinition, RuleSubscription, SanityRule, SubscriptionKind,
        TimeInterval,
    };
    pub use crate::ModelError;
}
