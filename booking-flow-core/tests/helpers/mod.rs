//! Minimal booking stage handlers for integration tests

use booking_flow_core::facts::parse_date;
use booking_flow_core::record::OfferStatus;
use booking_flow_core::{EventRecord, GroupResult, GuardSnapshot, Step, StepRegistry};
use serde_json::json;

/// Hand back to a pending caller, or move on to `next`
fn advance(rec: &mut EventRecord, next: Step, reason: &str) {
    if rec.return_to_caller(format!("{reason}:return")).is_none() {
        rec.move_to(next, reason);
    }
}

pub fn booking_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry
        .register(Step::Intake, |rec: &mut EventRecord, _: &GuardSnapshot| {
            let has_date = rec.requested_date.is_some() || rec.chosen_date.is_some();
            if rec.requirements.participants.is_some() && has_date {
                rec.move_to(Step::DateConfirmation, "intake_complete");
                GroupResult::proceed("intake_complete", json!({}))
            } else {
                GroupResult::halt("ask_intake", json!({}))
            }
        })
        .register(Step::DateConfirmation, |rec: &mut EventRecord, guard: &GuardSnapshot| {
            if guard.required() {
                match rec.requested_date.as_deref().and_then(parse_date) {
                    Some(date) => rec.confirm_date(date),
                    None => {
                        return GroupResult::halt(
                            "ask_date",
                            json!({ "candidates": guard.date_candidates }),
                        )
                    }
                }
            }
            advance(rec, Step::RoomAvailability, "date_confirmed");
            GroupResult::proceed("date_confirmed", json!({ "date": rec.chosen_date }))
        })
        .register(Step::RoomAvailability, |rec: &mut EventRecord, guard: &GuardSnapshot| {
            if guard.required() {
                let room = rec
                    .requirements
                    .preferred_room
                    .clone()
                    .unwrap_or_else(|| "main_hall".to_string());
                rec.lock_room(room);
            }
            advance(rec, Step::Offer, "room_locked");
            GroupResult::proceed("room_locked", json!({ "room": rec.locked_room_id }))
        })
        .register(Step::Offer, |rec: &mut EventRecord, guard: &GuardSnapshot| {
            if guard.required() {
                rec.mark_offer_composed();
                rec.offer_status = OfferStatus::Sent;
            }
            rec.move_to(Step::Negotiation, "offer_sent");
            GroupResult::halt("offer_sent", json!({ "products": rec.products.len() }))
        })
        .register(Step::Negotiation, |_: &mut EventRecord, _: &GuardSnapshot| {
            GroupResult::halt("negotiate", json!({}))
        })
        .register(Step::Transition, |rec: &mut EventRecord, _: &GuardSnapshot| {
            rec.move_to(Step::Confirmation, "transition");
            GroupResult::proceed("transition", json!({}))
        })
        .register(Step::Confirmation, |_: &mut EventRecord, _: &GuardSnapshot| {
            GroupResult::halt("confirmation", json!({}))
        });
    registry
}
