//! Event Record
//!
//! Canonical mutable state for one booking conversation. Components write
//! only the fields they own, through the named mutators below:
//!
//! | Field(s)                               | Owner                         |
//! |----------------------------------------|-------------------------------|
//! | `current_step`, `caller_stack`, `audit` | router / dispatch loop        |
//! | `requirements`, `requirements_hash`    | turn pipeline, guard evaluator |
//! | `chosen_date`, `date_confirmed`        | date stage (step 2)           |
//! | `locked_room_id`, `room_eval_hash`     | room stage (step 3)           |
//! | `offer_hash`, `offer_status`           | offer stage (step 4)          |
//! | `date_candidates`                      | guard evaluator               |
//! | `pending_intents`, `choice_context`    | atomic turn planner           |
//! | `latest_facts`, `requested_date`       | turn pipeline                 |

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::canonical_hash::canonical_json_hex;
use crate::config::CallerPolicy;
use crate::facts::ExtractedFacts;
use crate::planner::intents::{DeferralReason, Intent};
use crate::step::Step;

/// Structural facts that decide whether a room evaluation is still valid
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub participants: Option<u32>,
    pub seating_layout: Option<String>,
    pub time_window: Option<TimeWindow>,
    pub special_notes: Option<String>,
    pub preferred_room: Option<String>,
}

impl Requirements {
    /// Canonical form: every key present, absent facts as explicit `null`
    pub fn canonical_value(&self) -> serde_json::Value {
        json!({
            "participants": self.participants,
            "preferred_room": self.preferred_room,
            "seating_layout": self.seating_layout,
            "special_notes": self.special_notes,
            "time_window": self.time_window.as_ref().map(|w| json!({
                "end": w.end.map(|t| t.format("%H:%M").to_string()),
                "start": w.start.map(|t| t.format("%H:%M").to_string()),
            })),
        })
    }

    pub fn content_hash(&self) -> String {
        canonical_json_hex(&self.canonical_value())
    }
}

/// Time-of-day window for the event. Either bound may still be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn is_partial(&self) -> bool {
        self.start.is_none() || self.end.is_none()
    }
}

/// Inclusive calendar range the client is willing to book in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Available,
    Option,
    Unavailable,
}

impl RoomStatus {
    /// Statuses a room can be locked from without another availability check
    pub fn is_bookable(self) -> bool {
        matches!(self, RoomStatus::Available | RoomStatus::Option)
    }
}

/// Room flagged by an earlier availability decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRoomDecision {
    pub room_id: String,
    pub status: RoomStatus,
    pub decided_turn: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductLine {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    #[default]
    NotStarted,
    Draft,
    /// Composed, waiting for a human to release it
    AwaitingReview,
    Sent,
    Accepted,
    Declined,
}

impl OfferStatus {
    pub fn allows_billing_capture(self) -> bool {
        matches!(self, OfferStatus::Sent | OfferStatus::Accepted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetails {
    pub name: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl BillingDetails {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if blank(&self.name) {
            missing.push("name");
        }
        if blank(&self.street) {
            missing.push("street");
        }
        if blank(&self.postal_code) {
            missing.push("postal_code");
        }
        if blank(&self.city) {
            missing.push("city");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// `self` with every field present in `update` replaced
    pub fn overlaid(&self, update: &BillingDetails) -> BillingDetails {
        BillingDetails {
            name: update.name.clone().or_else(|| self.name.clone()),
            street: update.street.clone().or_else(|| self.street.clone()),
            postal_code: update.postal_code.clone().or_else(|| self.postal_code.clone()),
            city: update.city.clone().or_else(|| self.city.clone()),
            country: update.country.clone().or_else(|| self.country.clone()),
        }
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}

impl ClientInfo {
    pub fn overlaid(&self, update: &ClientInfo) -> ClientInfo {
        ClientInfo {
            name: update.name.clone().or_else(|| self.name.clone()),
            email: update.email.clone().or_else(|| self.email.clone()),
            phone: update.phone.clone().or_else(|| self.phone.clone()),
            company: update.company.clone().or_else(|| self.company.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    #[default]
    NotRequested,
    Requested,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteVisitStatus {
    Requested,
    Scheduled,
    Rescheduling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteVisit {
    pub status: SiteVisitStatus,
    pub date: Option<NaiveDate>,
}

/// A deferred same-turn intent waiting to be replayed by a later turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingIntent {
    /// Position in the queue, unique per record
    pub seq: u64,
    /// Turn in which the intent was deferred
    pub turn: u64,
    pub intent: Intent,
    pub reason: DeferralReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceKind {
    DateOption,
    RoomOption,
}

/// An open "pick one of these" prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceContext {
    pub kind: ChoiceKind,
    pub options: Vec<String>,
    /// Turns left before the prompt expires
    pub ttl_turns: u8,
    pub opened_turn: u64,
}

impl ChoiceContext {
    /// Resolve a 1-based selection against the offered options
    pub fn option(&self, selection: usize) -> Option<&str> {
        selection
            .checked_sub(1)
            .and_then(|idx| self.options.get(idx))
            .map(String::as_str)
    }
}

/// Record of a step transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub turn: u64,
    /// Raw value; may be out of range if a handler wrote garbage
    pub from_step: u8,
    pub to_step: u8,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// State for one booking conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    /// Raw step number; see [`EventRecord::step`]
    pub current_step: u8,
    /// Return addresses of in-flight detours, innermost last
    #[serde(default)]
    pub caller_stack: Vec<Step>,

    #[serde(default)]
    pub requirements: Requirements,
    pub requirements_hash: Option<String>,
    pub room_eval_hash: Option<String>,
    pub offer_hash: Option<String>,

    pub locked_room_id: Option<String>,
    pub chosen_date: Option<NaiveDate>,
    #[serde(default)]
    pub date_confirmed: bool,
    /// Latest date the client stated, verbatim, not yet confirmed
    pub requested_date: Option<String>,
    pub date_window: Option<DateWindow>,
    #[serde(default)]
    pub date_candidates: Vec<NaiveDate>,
    #[serde(default)]
    pub excluded_dates: BTreeSet<NaiveDate>,
    pub pending_room: Option<PendingRoomDecision>,

    #[serde(default)]
    pub products: Vec<ProductLine>,
    #[serde(default)]
    pub offer_status: OfferStatus,
    pub billing: Option<BillingDetails>,
    #[serde(default)]
    pub client: ClientInfo,
    #[serde(default)]
    pub deposit: DepositStatus,
    pub site_visit: Option<SiteVisit>,

    #[serde(default)]
    pub pending_intents: Vec<PendingIntent>,
    #[serde(default)]
    pub resolved_pending: BTreeSet<u64>,
    pub choice_context: Option<ChoiceContext>,

    /// Facts extracted from the message being processed, for stage handlers
    #[serde(default)]
    pub latest_facts: ExtractedFacts,

    #[serde(default)]
    pub audit: Vec<AuditEntry>,
    #[serde(default)]
    pub turn: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    /// Create a record for a new conversation, positioned at intake
    pub fn new(event_id: Uuid) -> Self {
        let now = Utc::now();
        let requirements = Requirements::default();
        Self {
            event_id,
            current_step: Step::Intake.number(),
            caller_stack: Vec::new(),
            requirements_hash: Some(requirements.content_hash()),
            requirements,
            room_eval_hash: None,
            offer_hash: None,
            locked_room_id: None,
            chosen_date: None,
            date_confirmed: false,
            requested_date: None,
            date_window: None,
            date_candidates: Vec::new(),
            excluded_dates: BTreeSet::new(),
            pending_room: None,
            products: Vec::new(),
            offer_status: OfferStatus::NotStarted,
            billing: None,
            client: ClientInfo::default(),
            deposit: DepositStatus::NotRequested,
            site_visit: None,
            pending_intents: Vec::new(),
            resolved_pending: BTreeSet::new(),
            choice_context: None,
            latest_facts: ExtractedFacts::default(),
            audit: Vec::new(),
            turn: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Typed view of `current_step`; `None` means the record is in an
    /// unknown stage and processing must stop.
    pub fn step(&self) -> Option<Step> {
        Step::from_number(self.current_step)
    }

    /// Innermost pending return address
    pub fn caller_step(&self) -> Option<Step> {
        self.caller_stack.last().copied()
    }

    pub fn has_pending_caller(&self) -> bool {
        !self.caller_stack.is_empty()
    }

    /// Advance the turn counter at the start of an inbound message
    pub fn begin_turn(&mut self) -> u64 {
        self.turn += 1;
        self.touch();
        self.turn
    }

    /// Move to `to`, logging the transition. A no-op move is not audited.
    pub fn move_to(&mut self, to: Step, reason: impl Into<String>) {
        let from = self.current_step;
        if from == to.number() {
            return;
        }
        self.current_step = to.number();
        self.audit.push(AuditEntry {
            turn: self.turn,
            from_step: from,
            to_step: to.number(),
            reason: reason.into(),
            at: Utc::now(),
        });
        self.touch();
    }

    /// Record `caller` as the step to come back to once a detour resolves.
    ///
    /// Returns whether the stack changed. Under `SingleSlot` a pending
    /// caller is never displaced; under `Stack` the new caller is pushed
    /// unless it is already the innermost entry.
    pub fn push_caller(&mut self, caller: Step, policy: CallerPolicy) -> bool {
        let pushed = match policy {
            CallerPolicy::SingleSlot => {
                if self.caller_stack.is_empty() {
                    self.caller_stack.push(caller);
                    true
                } else {
                    false
                }
            }
            CallerPolicy::Stack => {
                if self.caller_step() == Some(caller) {
                    false
                } else {
                    self.caller_stack.push(caller);
                    true
                }
            }
        };
        if pushed {
            self.touch();
        }
        pushed
    }

    /// Hand control back to the innermost pending caller, clearing it.
    ///
    /// Called by the stage that resolved the detour once it is done.
    pub fn return_to_caller(&mut self, reason: impl Into<String>) -> Option<Step> {
        let caller = self.caller_stack.pop()?;
        self.move_to(caller, reason);
        Some(caller)
    }

    /// Recompute `requirements_hash`; returns true if the stored value was stale
    pub fn refresh_requirements_hash(&mut self) -> bool {
        let fresh = self.requirements.content_hash();
        if self.requirements_hash.as_deref() == Some(fresh.as_str()) {
            return false;
        }
        self.requirements_hash = Some(fresh);
        self.touch();
        true
    }

    // ── Date stage ──

    pub fn confirm_date(&mut self, date: NaiveDate) {
        self.chosen_date = Some(date);
        self.date_confirmed = true;
        self.requested_date = None;
        self.date_candidates.clear();
        self.touch();
    }

    // ── Room stage ──

    /// Lock a room, snapshotting the requirements it was evaluated against
    pub fn lock_room(&mut self, room_id: impl Into<String>) {
        self.locked_room_id = Some(room_id.into());
        self.room_eval_hash = self.requirements_hash.clone();
        self.pending_room = None;
        self.touch();
    }

    pub fn release_room(&mut self) {
        self.locked_room_id = None;
        self.room_eval_hash = None;
        self.touch();
    }

    pub fn flag_room(&mut self, room_id: impl Into<String>, status: RoomStatus) {
        self.pending_room = Some(PendingRoomDecision {
            room_id: room_id.into(),
            status,
            decided_turn: self.turn,
        });
        self.touch();
    }

    // ── Offer stage ──

    pub fn mark_offer_composed(&mut self) {
        self.offer_hash = self.requirements_hash.clone();
        if self.offer_status == OfferStatus::NotStarted {
            self.offer_status = OfferStatus::Draft;
        }
        self.touch();
    }

    // ── Confirmation stage ──

    /// Record a site-visit request. A readable slot schedules the visit; a
    /// reschedule without one drops the old slot.
    pub fn update_site_visit(
        &mut self,
        date: Option<NaiveDate>,
        reschedule: bool,
    ) -> SiteVisitStatus {
        let previous = self.site_visit.take();
        let (status, date) = match (date, reschedule) {
            (Some(date), _) => (SiteVisitStatus::Scheduled, Some(date)),
            (None, true) => (SiteVisitStatus::Rescheduling, None),
            (None, false) => match previous {
                Some(visit) => (visit.status, visit.date),
                None => (SiteVisitStatus::Requested, None),
            },
        };
        self.site_visit = Some(SiteVisit { status, date });
        self.touch();
        status
    }

    // ── Pending intents ──

    /// Append a deferred intent; the queue is never rewritten
    pub fn enqueue_pending(&mut self, intent: Intent, reason: DeferralReason) -> u64 {
        let seq = self.pending_intents.last().map(|p| p.seq + 1).unwrap_or(0);
        self.pending_intents.push(PendingIntent {
            seq,
            turn: self.turn,
            intent,
            reason,
        });
        self.touch();
        seq
    }

    /// Pending intents not yet replayed or superseded, in queue order
    pub fn open_pending(&self) -> impl Iterator<Item = &PendingIntent> {
        self.pending_intents
            .iter()
            .filter(|p| !self.resolved_pending.contains(&p.seq))
    }

    pub fn resolve_pending(&mut self, seq: u64) {
        if self.resolved_pending.insert(seq) {
            self.touch();
        }
    }

    // ── Choice context ──

    pub fn open_choice(&mut self, kind: ChoiceKind, options: Vec<String>, ttl_turns: u8) {
        self.choice_context = Some(ChoiceContext {
            kind,
            options,
            ttl_turns: ttl_turns.max(1),
            opened_turn: self.turn,
        });
        self.touch();
    }

    pub fn close_choice(&mut self) {
        if self.choice_context.take().is_some() {
            self.touch();
        }
    }

    /// Age the open choice by one turn; prompts opened this turn are left alone.
    /// Returns true if the prompt expired.
    pub fn tick_choice_context(&mut self) -> bool {
        let turn = self.turn;
        let expired = match self.choice_context.as_mut() {
            Some(ctx) if ctx.opened_turn < turn => {
                ctx.ttl_turns = ctx.ttl_turns.saturating_sub(1);
                ctx.ttl_turns == 0
            }
            _ => false,
        };
        if expired {
            self.choice_context = None;
        }
        expired
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
