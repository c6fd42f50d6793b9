use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::intents::{DeferralReason, IntentKind, NeedsInputKind};
use super::ExecutionMode;

/// Per-turn planner summary, emitted as one structured log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnTelemetry {
    pub turn: u64,
    pub mode: ExecutionMode,
    pub executed: Vec<IntentKind>,
    pub deferred: Vec<(IntentKind, DeferralReason)>,
    pub needs_input: Vec<NeedsInputKind>,
    /// Pending intents picked up from earlier turns
    pub replayed: usize,
    /// Pending intents dropped because a fresh intent replaced them
    pub superseded: usize,
    pub combined_confirmation: bool,
    pub question: Option<NeedsInputKind>,
}

impl TurnTelemetry {
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn emit(&self, event_id: Uuid) {
        info!(
            event_id = %event_id,
            turn = self.turn,
            mode = ?self.mode,
            executed = ?self.executed,
            deferred = ?self.deferred,
            deferred_count = self.deferred_count(),
            needs_input = ?self.needs_input,
            replayed = self.replayed,
            superseded = self.superseded,
            combined_confirmation = self.combined_confirmation,
            question = ?self.question,
            "Planner turn complete"
        );
    }
}
