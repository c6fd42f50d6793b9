//! Capability parsers
//!
//! Each parser reads one capability out of the extracted facts and
//! classifies it as a verifiable intent or a needs-input item. Parsers only
//! read the record; nothing here mutates state.

use tracing::{debug, warn};

use crate::facts::{DateFact, ExtractedFacts, ProductAction};
use crate::record::{
    ChoiceKind, EventRecord, OfferStatus, RoomStatus, SiteVisitStatus, TimeWindow,
};

use super::intents::{Intent, NeedsInput, NeedsInputKind, NeedsInputReason};

/// One classified item from a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Verifiable(Intent),
    NeedsInput(NeedsInput),
}

/// Everything the parsers found in one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    pub verifiable: Vec<Intent>,
    pub needs_input: Vec<NeedsInput>,
    /// A selection answered the open choice prompt
    pub choice_resolved: bool,
}

impl ParseOutput {
    fn push(&mut self, item: Parsed) {
        match item {
            Parsed::Verifiable(intent) => self.verifiable.push(intent),
            Parsed::NeedsInput(needs) => self.needs_input.push(needs),
        }
    }
}

/// Run every capability parser over `facts`
pub fn parse_facts(record: &EventRecord, facts: &ExtractedFacts) -> ParseOutput {
    let mut out = ParseOutput::default();

    if facts.date.is_some() {
        if let Some(selection) = facts.choice_selection {
            debug!(
                event_id = %record.event_id,
                selection,
                "Choice selection ignored in favour of the stated date"
            );
        }
        parse_date(record, facts).into_iter().for_each(|p| out.push(p));
    } else if let Some(item) = parse_choice_selection(record, facts) {
        out.choice_resolved = matches!(item, Parsed::Verifiable(_));
        out.push(item);
    }

    if let Some(item) = parse_participants(facts) {
        out.push(item);
    }
    if let Some(item) = parse_room(record, facts) {
        out.push(item);
    }
    parse_products(facts).into_iter().for_each(|p| out.push(p));
    parse_billing(record, facts)
        .into_iter()
        .for_each(|p| out.push(p));
    if let Some(item) = parse_site_visit(record, facts) {
        out.push(item);
    }
    parse_commercial(record, facts)
        .into_iter()
        .for_each(|p| out.push(p));

    debug!(
        event_id = %record.event_id,
        verifiable = out.verifiable.len(),
        needs_input = out.needs_input.len(),
        "Parsed message capabilities"
    );
    out
}

fn stated_window(record: &EventRecord, facts: &ExtractedFacts) -> Option<TimeWindow> {
    facts.time_window.or(record.requirements.time_window)
}

/// A parseable date becomes a confirmation; a missing or partial time
/// window adds a time question alongside it.
pub fn parse_date(record: &EventRecord, facts: &ExtractedFacts) -> Vec<Parsed> {
    let Some(fact) = facts.date_fact() else {
        return Vec::new();
    };

    match fact {
        DateFact::Unparseable(raw) => vec![Parsed::NeedsInput(
            NeedsInput::new(NeedsInputKind::DateChoice, NeedsInputReason::DateUnparseable)
                .with_detail(raw),
        )],
        DateFact::Parsed(date) if record.excluded_dates.contains(&date) => {
            vec![Parsed::NeedsInput(
                NeedsInput::new(NeedsInputKind::Availability, NeedsInputReason::DateUnavailable)
                    .with_detail(date.format("%Y-%m-%d").to_string()),
            )]
        }
        DateFact::Parsed(date) => {
            let window = stated_window(record, facts);
            let mut items = vec![Parsed::Verifiable(Intent::ConfirmDate { date, window })];
            if window.map_or(true, |w| w.is_partial()) {
                items.push(Parsed::NeedsInput(NeedsInput::new(
                    NeedsInputKind::Time,
                    NeedsInputReason::TimeWindowMissing,
                )));
            }
            items
        }
    }
}

/// Resolve a numbered answer against the open choice prompt
pub fn parse_choice_selection(record: &EventRecord, facts: &ExtractedFacts) -> Option<Parsed> {
    let selection = facts.choice_selection?;
    let invalid = || {
        Parsed::NeedsInput(
            NeedsInput::new(NeedsInputKind::DateChoice, NeedsInputReason::ChoiceSelectionInvalid)
                .with_detail(selection.to_string()),
        )
    };

    let Some(ctx) = record.choice_context.as_ref() else {
        warn!(
            event_id = %record.event_id,
            selection,
            "Choice selection without an open prompt"
        );
        return Some(invalid());
    };
    let Some(option) = ctx.option(selection) else {
        return Some(invalid());
    };

    match ctx.kind {
        ChoiceKind::DateOption => match crate::facts::parse_date(option) {
            Some(date) => Some(Parsed::Verifiable(Intent::ConfirmDate {
                date,
                window: stated_window(record, facts),
            })),
            None => Some(invalid()),
        },
        ChoiceKind::RoomOption => Some(Parsed::Verifiable(Intent::SelectRoom {
            room_id: option.to_string(),
        })),
    }
}

pub fn parse_participants(facts: &ExtractedFacts) -> Option<Parsed> {
    match facts.participants? {
        0 => None,
        count => Some(Parsed::Verifiable(Intent::SetParticipants { count })),
    }
}

/// A room already flagged unavailable turns into an availability question
pub fn parse_room(record: &EventRecord, facts: &ExtractedFacts) -> Option<Parsed> {
    let room_id = facts.room.as_deref()?.trim();
    if room_id.is_empty() {
        return None;
    }

    let flagged_unavailable = record
        .pending_room
        .as_ref()
        .is_some_and(|p| p.room_id == room_id && p.status == RoomStatus::Unavailable);
    if flagged_unavailable {
        return Some(Parsed::NeedsInput(
            NeedsInput::new(NeedsInputKind::Availability, NeedsInputReason::RoomUnavailable)
                .with_detail(room_id),
        ));
    }

    Some(Parsed::Verifiable(Intent::SelectRoom {
        room_id: room_id.to_string(),
    }))
}

pub fn parse_products(facts: &ExtractedFacts) -> Vec<Parsed> {
    facts
        .products
        .iter()
        .filter(|p| !p.name.trim().is_empty())
        .map(|p| match (p.action, p.quantity) {
            (ProductAction::Remove, _) => Parsed::Verifiable(Intent::RemoveProduct {
                name: p.name.clone(),
            }),
            (ProductAction::Add, Some(quantity)) if quantity > 0 => {
                Parsed::Verifiable(Intent::AddProduct {
                    name: p.name.clone(),
                    quantity,
                })
            }
            (ProductAction::Add, _) => Parsed::NeedsInput(
                NeedsInput::new(
                    NeedsInputKind::ProductFollowup,
                    NeedsInputReason::ProductQuantityMissing,
                )
                .with_detail(p.name.clone()),
            ),
        })
        .collect()
}

/// Billing details overlay what is stored and what is still waiting in the
/// queue. The merged address is always captured; an incomplete one also
/// asks for the missing fields.
pub fn parse_billing(record: &EventRecord, facts: &ExtractedFacts) -> Vec<Parsed> {
    let Some(update) = facts.billing.as_ref() else {
        return Vec::new();
    };
    let queued = record.open_pending().filter_map(|p| match &p.intent {
        Intent::CaptureBilling { details } => Some(details),
        _ => None,
    });
    let base = queued.fold(record.billing.clone().unwrap_or_default(), |acc, details| {
        acc.overlaid(details)
    });
    let details = base.overlaid(update);
    let missing = details.missing_fields();

    let mut items = vec![Parsed::Verifiable(Intent::CaptureBilling { details })];
    if !missing.is_empty() {
        items.push(Parsed::NeedsInput(
            NeedsInput::new(NeedsInputKind::Billing, NeedsInputReason::BillingIncomplete)
                .with_detail(missing.join(", ")),
        ));
    }
    items
}

/// Visit scheduling belongs to the confirmation stage; the planner only
/// asks when no usable slot was given and none is already booked.
pub fn parse_site_visit(record: &EventRecord, facts: &ExtractedFacts) -> Option<Parsed> {
    let visit = facts.site_visit.as_ref()?;
    let has_slot = visit
        .requested_date
        .as_deref()
        .and_then(crate::facts::parse_date)
        .is_some();
    let scheduled = record
        .site_visit
        .as_ref()
        .is_some_and(|v| v.status == SiteVisitStatus::Scheduled);
    let needs_slot = !has_slot && (visit.reschedule || !scheduled);
    needs_slot.then(|| {
        Parsed::NeedsInput(NeedsInput::new(
            NeedsInputKind::SiteVisit,
            NeedsInputReason::SiteVisitSlotNeeded,
        ))
    })
}

pub fn parse_commercial(record: &EventRecord, facts: &ExtractedFacts) -> Vec<Parsed> {
    let Some(signal) = facts.commercial.as_ref() else {
        return Vec::new();
    };
    let mut items = Vec::new();

    if signal.accept_offer == Some(true) && record.offer_status == OfferStatus::AwaitingReview {
        items.push(Parsed::NeedsInput(NeedsInput::new(
            NeedsInputKind::OfferHil,
            NeedsInputReason::OfferAwaitingReview,
        )));
    }
    if signal.counter_proposal.is_some() && signal.budget.is_none() {
        items.push(Parsed::NeedsInput(NeedsInput::new(
            NeedsInputKind::Budget,
            NeedsInputReason::BudgetMissing,
        )));
    }
    items
}
