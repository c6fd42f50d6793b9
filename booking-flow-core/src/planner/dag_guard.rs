//! Prerequisite checks against projected state
//!
//! An intent may only run once the state it builds on exists, either on
//! the record already or as the result of an intent executed earlier in
//! the same turn.

use crate::record::EventRecord;

use super::intents::{DeferralReason, Intent};

/// What the record will look like after the intents executed so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectedState {
    pub date_confirmed: bool,
    pub room_locked: bool,
    pub offer_allows_billing: bool,
}

impl ProjectedState {
    pub fn from_record(record: &EventRecord) -> Self {
        Self {
            date_confirmed: record.date_confirmed && record.chosen_date.is_some(),
            room_locked: record.locked_room_id.is_some(),
            offer_allows_billing: record.offer_status.allows_billing_capture(),
        }
    }

    /// Fold in an intent that executed successfully
    pub fn absorb(&mut self, intent: &Intent) {
        match intent {
            Intent::ConfirmDate { .. } => self.date_confirmed = true,
            Intent::SelectRoom { .. } => self.room_locked = true,
            _ => {}
        }
    }
}

pub fn check_prerequisites(intent: &Intent, projected: &ProjectedState) -> Result<(), DeferralReason> {
    match intent {
        Intent::SelectRoom { .. } if !projected.date_confirmed => {
            Err(DeferralReason::RoomRequiresDate)
        }
        Intent::AddProduct { .. } | Intent::RemoveProduct { .. } if !projected.room_locked => {
            Err(DeferralReason::ProductRequiresRoom)
        }
        Intent::CaptureBilling { .. } if !projected.offer_allows_billing => {
            Err(DeferralReason::BillingRequiresOffer)
        }
        _ => Ok(()),
    }
}
