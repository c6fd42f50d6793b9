//! Guard Evaluation
//!
//! Entry checks for the date, room and offer stages. A guard does not ask
//! "did a change fire?" but "is a clarification structurally required
//! right now?", recomputed from the record on every entry.
//!
//! Missing upstream data always fails open: an absent hash or date means
//! the stage is required, never that it can be skipped.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

use crate::canonical_hash::hashes_match;
use crate::config::GuardConfig;
use crate::facts::parse_date;
use crate::record::{DateWindow, EventRecord, OfferStatus};
use crate::step::Step;

/// Cap on how far candidate derivation walks through a date window
const MAX_WINDOW_DAYS: i64 = 366;

/// Why a guarded stage has to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Clarification {
    DateMissing,
    DateUnconfirmed,
    /// The client stated a different (or unreadable) date since confirmation
    DateChanged,
    RoomNotLocked,
    /// `room_eval_hash` is absent or no longer matches the requirements
    RoomEvaluationStale,
    OfferMissing,
    OfferStale,
}

/// Result of evaluating a stage's entry guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardSnapshot {
    pub step: Step,
    /// False for stages without an entry guard
    pub guarded: bool,
    pub clarifications: Vec<Clarification>,
    /// `requirements_hash` was stale and has been recomputed
    pub hash_refreshed: bool,
    pub date_candidates: Vec<NaiveDate>,
}

impl GuardSnapshot {
    pub fn unguarded(step: Step) -> Self {
        Self {
            step,
            guarded: false,
            clarifications: Vec::new(),
            hash_refreshed: false,
            date_candidates: Vec::new(),
        }
    }

    /// The stage has work to do. Unguarded stages always do.
    pub fn required(&self) -> bool {
        !self.guarded || !self.clarifications.is_empty()
    }
}

/// Evaluates stage entry guards against the record
#[derive(Debug, Clone, Default)]
pub struct GuardEvaluator {
    config: GuardConfig,
}

impl GuardEvaluator {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Evaluate the entry guard for `step`.
    ///
    /// Side effects on the record: a stale `requirements_hash` is
    /// recomputed, and date candidates are derived and cached when the
    /// date stage needs them.
    pub fn evaluate_entry(&self, record: &mut EventRecord, step: Step) -> GuardSnapshot {
        if !step.is_guarded() {
            return GuardSnapshot::unguarded(step);
        }

        let hash_refreshed = record.refresh_requirements_hash();

        let clarifications = match step {
            Step::DateConfirmation => date_clarifications(record),
            Step::RoomAvailability => room_clarifications(record),
            Step::Offer => offer_clarifications(record),
            _ => Vec::new(),
        };

        let mut date_candidates = Vec::new();
        if step == Step::DateConfirmation && !clarifications.is_empty() {
            if let Some(window) = record.date_window {
                date_candidates = derive_date_candidates(
                    window,
                    &record.excluded_dates,
                    self.config.candidate_date_count,
                );
                if record.date_candidates != date_candidates {
                    record.date_candidates = date_candidates.clone();
                }
            }
        }

        debug!(
            event_id = %record.event_id,
            step = step.number(),
            clarifications = ?clarifications,
            hash_refreshed,
            candidates = date_candidates.len(),
            "Evaluated entry guard"
        );

        GuardSnapshot {
            step,
            guarded: true,
            clarifications,
            hash_refreshed,
            date_candidates,
        }
    }
}

pub fn date_clarifications(record: &EventRecord) -> Vec<Clarification> {
    let mut out = Vec::new();
    if record.chosen_date.is_none() {
        out.push(Clarification::DateMissing);
    }
    if !record.date_confirmed {
        out.push(Clarification::DateUnconfirmed);
    }
    if let Some(raw) = record.requested_date.as_deref() {
        // an unreadable request counts as changed
        if parse_date(raw) != record.chosen_date || record.chosen_date.is_none() {
            out.push(Clarification::DateChanged);
        }
    }
    out
}

pub fn room_clarifications(record: &EventRecord) -> Vec<Clarification> {
    let mut out = Vec::new();
    if record.locked_room_id.is_none() {
        out.push(Clarification::RoomNotLocked);
    }
    if !hashes_match(
        record.requirements_hash.as_deref(),
        record.room_eval_hash.as_deref(),
    ) {
        out.push(Clarification::RoomEvaluationStale);
    }
    out
}

pub fn offer_clarifications(record: &EventRecord) -> Vec<Clarification> {
    if record.offer_status == OfferStatus::NotStarted || record.offer_hash.is_none() {
        return vec![Clarification::OfferMissing];
    }
    if !hashes_match(
        record.requirements_hash.as_deref(),
        record.offer_hash.as_deref(),
    ) {
        return vec![Clarification::OfferStale];
    }
    Vec::new()
}

/// First `count` dates of `window` not in `excluded`, in calendar order
pub fn derive_date_candidates(
    window: DateWindow,
    excluded: &BTreeSet<NaiveDate>,
    count: usize,
) -> Vec<NaiveDate> {
    let span = (window.end - window.start).num_days().min(MAX_WINDOW_DAYS);
    if span < 0 {
        return Vec::new();
    }
    (0..=span)
        .map(|offset| window.start + Duration::days(offset))
        .filter(|date| !excluded.contains(date))
        .take(count)
        .collect()
}
