//! Follow-up question selection
//!
//! At most one question goes out per turn. When needs-input items are
//! open, the first kind in the configured priority order wins; otherwise
//! the question falls back to a fixed one per step.

use serde::Serialize;

use crate::record::EventRecord;
use crate::step::Step;

use super::intents::{NeedsInput, NeedsInputKind, NeedsInputReason};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextQuestion {
    /// `None` for the step fallback
    pub kind: Option<NeedsInputKind>,
    pub reason: Option<NeedsInputReason>,
    pub text: String,
}

/// Highest-priority open item. Kinds missing from `priority` rank last, in
/// the order they were raised.
pub fn select_needs_input<'a>(
    needs: &'a [NeedsInput],
    priority: &[NeedsInputKind],
) -> Option<&'a NeedsInput> {
    needs.iter().min_by_key(|n| {
        priority
            .iter()
            .position(|kind| *kind == n.kind)
            .unwrap_or(priority.len())
    })
}

pub fn next_question(
    record: &EventRecord,
    needs: &[NeedsInput],
    priority: &[NeedsInputKind],
) -> NextQuestion {
    match select_needs_input(needs, priority) {
        Some(item) => NextQuestion {
            kind: Some(item.kind),
            reason: Some(item.reason),
            text: question_text(record, item),
        },
        None => NextQuestion {
            kind: None,
            reason: None,
            text: default_question(record.step()).to_string(),
        },
    }
}

pub fn question_text(record: &EventRecord, item: &NeedsInput) -> String {
    let detail = item.detail.as_deref().unwrap_or_default();
    match (item.kind, item.reason) {
        (NeedsInputKind::Time, _) => {
            "What start and end time should we plan for?".to_string()
        }
        (_, NeedsInputReason::RoomUnavailable) => format!(
            "Unfortunately {detail} is not available. Shall I suggest alternative rooms?"
        ),
        (_, NeedsInputReason::DateUnavailable) => {
            format!("{detail} is already taken. Would another date work for you?")
        }
        (_, NeedsInputReason::ProductRequiresRoom) => {
            "Which room would you like before we add catering and equipment?".to_string()
        }
        (_, NeedsInputReason::ProductNotFound) => {
            format!("{detail} is not on the booking. Would you like to add it instead?")
        }
        (_, NeedsInputReason::IntentRejected) => {
            format!("We could not complete that request ({detail}). Could you confirm the details?")
        }
        (NeedsInputKind::Availability, _) => {
            "Shall I check availability for your date?".to_string()
        }
        (NeedsInputKind::SiteVisit, _) => {
            "When would you like to visit the venue?".to_string()
        }
        (_, NeedsInputReason::BillingRequiresOffer) => {
            "We can take your billing details once you have accepted the offer. Shall I send it over?"
                .to_string()
        }
        (NeedsInputKind::OfferHil, _) => {
            "Your offer is with our team for a final review; we will be in touch shortly."
                .to_string()
        }
        (NeedsInputKind::Budget, _) => "What budget should we work with?".to_string(),
        (NeedsInputKind::Billing, _) => {
            format!("Could you complete the billing address? Still missing: {detail}.")
        }
        (NeedsInputKind::DateChoice, _) if !record.date_candidates.is_empty() => {
            let options = record
                .date_candidates
                .iter()
                .enumerate()
                .map(|(i, d)| format!("{}) {}", i + 1, d.format("%d.%m.%Y")))
                .collect::<Vec<_>>()
                .join(", ");
            format!("Which of these dates works best: {options}?")
        }
        (NeedsInputKind::DateChoice, _) => "Which date would you like to book?".to_string(),
        (NeedsInputKind::ProductFollowup, _) => format!("How many {detail} do you need?"),
    }
}

/// Fallback question derived purely from the current step
pub fn default_question(step: Option<Step>) -> &'static str {
    match step {
        Some(Step::Intake) => {
            "Could you share the date, the number of participants and the seating you have in mind?"
        }
        Some(Step::DateConfirmation) => "Which date would you like to confirm?",
        Some(Step::RoomAvailability) => "Shall I check room availability for your date?",
        Some(Step::Offer) => "Shall I prepare the offer for you?",
        Some(Step::Negotiation) => "Do you have any questions about the offer?",
        Some(Step::Transition) => "Shall we move on to the confirmation?",
        Some(Step::Confirmation) => "Is there anything else we can arrange for your event?",
        None => "How can I help with your booking?",
    }
}
