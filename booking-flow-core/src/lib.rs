//! Booking Flow Core
//!
//! Deterministic orchestration for a multi-turn booking assistant. Given
//! the facts extracted from one client message and the persisted event
//! record, it decides which processing stage runs next, whether upstream
//! stages must be revisited, and how several intents in one message are
//! executed, deferred, or turned into a follow-up question.
//!
//! ## Architecture
//!
//! ```text
//! ExtractedFacts ──► TurnPipeline
//!                      │
//!                      ├── AtomicTurnPlanner   (multi-intent turns)
//!                      ├── change::classify    (pre-turn snapshot vs facts)
//!                      ├── router::route       (DAG + hash guard)
//!                      └── DispatchLoop        (bounded, guard per entry)
//!                              │
//!                              └── StepHandler ──► GroupResult
//! ```
//!
//! Stage business logic (date confirmation, room availability, offer
//! composition...) lives behind [`dispatch::StepHandler`] and is supplied
//! by the host.

pub mod canonical_hash;
pub mod change;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod facts;
pub mod guards;
pub mod planner;
pub mod record;
pub mod router;
pub mod step;
pub mod store;
pub mod turn;

pub use change::{classify_change, detect_changes, ChangeSet, ChangeType};
pub use config::{CallerPolicy, FlowConfig};
pub use dispatch::{
    DispatchLoop, DispatchOutcome, DispatchTermination, GroupResult, StepHandler, StepRegistry,
};
pub use error::{ConfigError, FlowError, StoreError};
pub use facts::ExtractedFacts;
pub use guards::{Clarification, GuardEvaluator, GuardSnapshot};
pub use planner::{AtomicTurnPlanner, PlannerResult};
pub use record::EventRecord;
pub use router::{apply_decision, route, NextStepDecision, SkipReason};
pub use step::Step;
pub use store::{MemoryRecordStore, RecordStore};
pub use turn::{TurnOutcome, TurnPipeline};
