//! Intent execution
//!
//! `IntentApplier` is the seam between the planner's decisions and the
//! record mutation. `RecordApplier` is the deterministic default; hosts
//! that call out to a booking backend supply their own.

use chrono::NaiveDate;
use thiserror::Error;

use crate::record::{EventRecord, ProductLine, RoomStatus};

use super::intents::Intent;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("date {0} is not available")]
    DateUnavailable(NaiveDate),

    #[error("room {0} is not available")]
    RoomUnavailable(String),

    #[error("product {0} is not on the booking")]
    ProductNotFound(String),

    #[error("backend rejected intent: {0}")]
    Rejected(String),
}

pub trait IntentApplier: Send + Sync {
    fn apply(&self, record: &mut EventRecord, intent: &Intent) -> Result<(), ApplyError>;
}

/// Applies intents directly to the record through its owner mutators
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordApplier;

impl IntentApplier for RecordApplier {
    fn apply(&self, record: &mut EventRecord, intent: &Intent) -> Result<(), ApplyError> {
        match intent {
            Intent::ConfirmDate { date, window } => {
                if record.excluded_dates.contains(date) {
                    return Err(ApplyError::DateUnavailable(*date));
                }
                record.confirm_date(*date);
                if let Some(window) = window {
                    if record.requirements.time_window != Some(*window) {
                        record.requirements.time_window = Some(*window);
                        record.refresh_requirements_hash();
                    }
                }
            }
            Intent::SetParticipants { count } => {
                record.requirements.participants = Some(*count);
                record.refresh_requirements_hash();
            }
            Intent::SelectRoom { room_id } => {
                let unavailable = record
                    .pending_room
                    .as_ref()
                    .is_some_and(|p| &p.room_id == room_id && p.status == RoomStatus::Unavailable);
                if unavailable {
                    return Err(ApplyError::RoomUnavailable(room_id.clone()));
                }
                record.requirements.preferred_room = Some(room_id.clone());
                record.refresh_requirements_hash();
                record.lock_room(room_id.clone());
            }
            Intent::AddProduct { name, quantity } => {
                match record
                    .products
                    .iter_mut()
                    .find(|line| line.name.eq_ignore_ascii_case(name))
                {
                    Some(line) => line.quantity = *quantity,
                    None => record.products.push(ProductLine {
                        name: name.clone(),
                        quantity: *quantity,
                    }),
                }
            }
            Intent::RemoveProduct { name } => {
                let before = record.products.len();
                record
                    .products
                    .retain(|line| !line.name.eq_ignore_ascii_case(name));
                if record.products.len() == before {
                    return Err(ApplyError::ProductNotFound(name.clone()));
                }
            }
            Intent::CaptureBilling { details } => {
                let stored = record.billing.clone().unwrap_or_default();
                record.billing = Some(stored.overlaid(details));
            }
        }
        Ok(())
    }
}

/// Apply a set of intents as one unit. On the first failure the record is
/// restored to its state before the call.
pub fn apply_atomically(
    applier: &dyn IntentApplier,
    record: &mut EventRecord,
    intents: &[&Intent],
) -> Result<(), ApplyError> {
    let snapshot = record.clone();
    for intent in intents {
        if let Err(e) = applier.apply(record, intent) {
            *record = snapshot;
            return Err(e);
        }
    }
    Ok(())
}
