//! Scripted stage handlers
//!
//! Stand-ins for the real stage logic, driven by a small venue description
//! in the replay script. They make just enough decisions (date and room
//! availability, offer release, acceptance, deposit) to exercise routing.

use booking_flow_core::facts::{parse_date, DepositSignal};
use booking_flow_core::record::{DepositStatus, OfferStatus, RoomStatus};
use booking_flow_core::{EventRecord, GroupResult, GuardSnapshot, Step, StepHandler, StepRegistry};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Venue the scripted handlers answer for
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Venue {
    /// Room locked when the client names none
    pub default_room: String,
    pub unavailable_rooms: BTreeSet<String>,
    pub unavailable_dates: BTreeSet<NaiveDate>,
    /// Hold composed offers for manual review instead of sending them
    pub review_offers: bool,
}

impl Default for Venue {
    fn default() -> Self {
        Self {
            default_room: "main_hall".to_string(),
            unavailable_rooms: BTreeSet::new(),
            unavailable_dates: BTreeSet::new(),
            review_offers: false,
        }
    }
}

pub fn scripted_registry(venue: Venue) -> StepRegistry {
    let venue = Arc::new(venue);
    let mut registry = StepRegistry::new();
    registry
        .register(Step::Intake, IntakeStage)
        .register(Step::DateConfirmation, DateStage(venue.clone()))
        .register(Step::RoomAvailability, RoomStage(venue.clone()))
        .register(Step::Offer, OfferStage(venue))
        .register(Step::Negotiation, NegotiationStage)
        .register(Step::Transition, TransitionStage)
        .register(Step::Confirmation, ConfirmationStage);
    registry
}

/// Return to a pending caller, otherwise continue to `next`
fn advance(record: &mut EventRecord, next: Step, reason: &str) {
    if record.return_to_caller(format!("{reason}:return")).is_none() {
        record.move_to(next, reason);
    }
}

struct IntakeStage;

impl StepHandler for IntakeStage {
    fn handle(&self, record: &mut EventRecord, _guard: &GuardSnapshot) -> GroupResult {
        let has_date = record.chosen_date.is_some()
            || record.requested_date.is_some()
            || record.date_window.is_some();
        if record.requirements.participants.is_none() || !has_date {
            return GroupResult::halt(
                "ask_intake",
                json!({
                    "missing_participants": record.requirements.participants.is_none(),
                    "missing_date": !has_date,
                }),
            );
        }
        record.move_to(Step::DateConfirmation, "intake_complete");
        GroupResult::proceed("intake_complete", json!({}))
    }
}

struct DateStage(Arc<Venue>);

impl StepHandler for DateStage {
    fn handle(&self, record: &mut EventRecord, guard: &GuardSnapshot) -> GroupResult {
        if guard.required() {
            let requested = record.requested_date.as_deref().and_then(parse_date);
            match requested {
                Some(date) if self.0.unavailable_dates.contains(&date) => {
                    record.excluded_dates.insert(date);
                    record.requested_date = None;
                    return GroupResult::halt(
                        "date_unavailable",
                        json!({ "date": date, "candidates": guard.date_candidates }),
                    );
                }
                Some(date) => record.confirm_date(date),
                None => {
                    return GroupResult::halt(
                        "ask_date",
                        json!({ "candidates": guard.date_candidates }),
                    )
                }
            }
        }
        advance(record, Step::RoomAvailability, "date_confirmed");
        GroupResult::proceed("date_confirmed", json!({ "date": record.chosen_date }))
    }
}

struct RoomStage(Arc<Venue>);

impl StepHandler for RoomStage {
    fn handle(&self, record: &mut EventRecord, guard: &GuardSnapshot) -> GroupResult {
        if guard.required() {
            let room = record
                .requirements
                .preferred_room
                .clone()
                .unwrap_or_else(|| self.0.default_room.clone());
            if self.0.unavailable_rooms.contains(&room) {
                if record.locked_room_id.is_some() {
                    record.release_room();
                }
                record.flag_room(room.clone(), RoomStatus::Unavailable);
                return GroupResult::halt(
                    "room_unavailable",
                    json!({ "room": room, "suggested": self.0.default_room }),
                );
            }
            record.lock_room(room);
        }
        advance(record, Step::Offer, "room_locked");
        GroupResult::proceed("room_locked", json!({ "room": record.locked_room_id }))
    }
}

struct OfferStage(Arc<Venue>);

impl StepHandler for OfferStage {
    fn handle(&self, record: &mut EventRecord, guard: &GuardSnapshot) -> GroupResult {
        if guard.required() || record.offer_status == OfferStatus::NotStarted {
            record.mark_offer_composed();
            record.offer_status = if self.0.review_offers {
                OfferStatus::AwaitingReview
            } else {
                OfferStatus::Sent
            };
        }
        record.move_to(Step::Negotiation, "offer_sent");
        let action = if record.offer_status == OfferStatus::AwaitingReview {
            "offer_awaiting_review"
        } else {
            "offer_sent"
        };
        GroupResult::halt(action, json!({ "products": record.products }))
    }
}

struct NegotiationStage;

impl StepHandler for NegotiationStage {
    fn handle(&self, record: &mut EventRecord, _guard: &GuardSnapshot) -> GroupResult {
        let commercial = record.latest_facts.commercial.clone().unwrap_or_default();
        if commercial.accept_offer == Some(true) && record.offer_status == OfferStatus::Sent {
            record.offer_status = OfferStatus::Accepted;
            record.move_to(Step::Transition, "offer_accepted");
            return GroupResult::proceed("offer_accepted", json!({}));
        }
        match commercial.counter_proposal {
            Some(counter) => GroupResult::halt("counter_received", json!({ "counter": counter })),
            None => GroupResult::halt("negotiate", json!({ "offer": record.offer_status })),
        }
    }
}

struct TransitionStage;

impl StepHandler for TransitionStage {
    fn handle(&self, record: &mut EventRecord, _guard: &GuardSnapshot) -> GroupResult {
        if record.deposit == DepositStatus::NotRequested {
            record.deposit = DepositStatus::Requested;
        }
        record.move_to(Step::Confirmation, "deposit_requested");
        GroupResult::proceed("deposit_requested", json!({}))
    }
}

struct ConfirmationStage;

impl StepHandler for ConfirmationStage {
    fn handle(&self, record: &mut EventRecord, _guard: &GuardSnapshot) -> GroupResult {
        if record.latest_facts.deposit == Some(DepositSignal::Paid) {
            record.deposit = DepositStatus::Paid;
        }
        if let Some(visit) = record.latest_facts.site_visit.clone() {
            let slot = visit.requested_date.as_deref().and_then(parse_date);
            let status = record.update_site_visit(slot, visit.reschedule);
            let date = record.site_visit.as_ref().and_then(|v| v.date);
            return GroupResult::halt("site_visit", json!({ "status": status, "date": date }));
        }
        match record.deposit {
            DepositStatus::Paid => GroupResult::halt(
                "booking_confirmed",
                json!({ "room": record.locked_room_id, "date": record.chosen_date }),
            ),
            _ => GroupResult::halt("await_deposit", json!({})),
        }
    }
}
