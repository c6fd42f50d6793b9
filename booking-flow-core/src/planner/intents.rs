//! Intent Types
//!
//! Closed vocabularies for what a turn wants to do, why something has to be
//! asked, and why something was put off. No free-form strings travel as
//! control signals.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::change::ChangeType;
use crate::record::{BillingDetails, TimeWindow};

/// A deterministic, immediately executable change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    ConfirmDate {
        date: NaiveDate,
        window: Option<TimeWindow>,
    },
    SetParticipants {
        count: u32,
    },
    SelectRoom {
        room_id: String,
    },
    AddProduct {
        name: String,
        quantity: u32,
    },
    RemoveProduct {
        name: String,
    },
    CaptureBilling {
        details: BillingDetails,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    DateConfirmation,
    Participants,
    RoomSelection,
    ProductAdd,
    ProductRemove,
    Billing,
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::ConfirmDate { .. } => IntentKind::DateConfirmation,
            Intent::SetParticipants { .. } => IntentKind::Participants,
            Intent::SelectRoom { .. } => IntentKind::RoomSelection,
            Intent::AddProduct { .. } => IntentKind::ProductAdd,
            Intent::RemoveProduct { .. } => IntentKind::ProductRemove,
            Intent::CaptureBilling { .. } => IntentKind::Billing,
        }
    }

    /// Position in the execution order. Prerequisites sort first: a date
    /// before the room it is booked on, the room before its extras.
    pub fn execution_rank(&self) -> u8 {
        match self.kind() {
            IntentKind::DateConfirmation => 0,
            IntentKind::Participants => 1,
            IntentKind::RoomSelection => 2,
            IntentKind::ProductAdd | IntentKind::ProductRemove => 3,
            IntentKind::Billing => 4,
        }
    }

    /// Change category an executed intent is routed under
    pub fn change_type(&self) -> ChangeType {
        match self.kind() {
            IntentKind::DateConfirmation => ChangeType::Date,
            IntentKind::Participants => ChangeType::Requirements,
            IntentKind::RoomSelection => ChangeType::Room,
            IntentKind::ProductAdd | IntentKind::ProductRemove => ChangeType::Products,
            IntentKind::Billing => ChangeType::ClientInfo,
        }
    }

    /// A date without a complete time window cannot join a combo
    pub fn is_partial_date(&self) -> bool {
        match self {
            Intent::ConfirmDate { window, .. } => window.map_or(true, |w| w.is_partial()),
            _ => false,
        }
    }

    /// `self` (fresh) makes an older pending `other` obsolete
    pub fn supersedes(&self, other: &Intent) -> bool {
        match (self, other) {
            (
                Intent::AddProduct { name: a, .. } | Intent::RemoveProduct { name: a },
                Intent::AddProduct { name: b, .. } | Intent::RemoveProduct { name: b },
            ) => a.eq_ignore_ascii_case(b),
            _ => self.kind() == other.kind(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Intent::ConfirmDate { date, .. } => format!("date {}", date.format("%Y-%m-%d")),
            Intent::SetParticipants { count } => format!("{count} participants"),
            Intent::SelectRoom { room_id } => format!("room {room_id}"),
            Intent::AddProduct { name, quantity } => format!("{quantity}x {name}"),
            Intent::RemoveProduct { name } => format!("removal of {name}"),
            Intent::CaptureBilling { .. } => "billing address".to_string(),
        }
    }
}

/// Topic of a clarifying question. Order of `DEFAULT_PRIORITY` decides
/// which one is asked when several are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedsInputKind {
    Time,
    Availability,
    SiteVisit,
    OfferHil,
    Budget,
    Billing,
    DateChoice,
    ProductFollowup,
}

impl NeedsInputKind {
    pub const DEFAULT_PRIORITY: [NeedsInputKind; 8] = [
        NeedsInputKind::Time,
        NeedsInputKind::Availability,
        NeedsInputKind::SiteVisit,
        NeedsInputKind::OfferHil,
        NeedsInputKind::Budget,
        NeedsInputKind::Billing,
        NeedsInputKind::DateChoice,
        NeedsInputKind::ProductFollowup,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedsInputReason {
    TimeWindowMissing,
    DateUnparseable,
    DateUnavailable,
    ChoiceSelectionInvalid,
    RoomRequiresDate,
    RoomUnavailable,
    ProductRequiresRoom,
    ProductQuantityMissing,
    ProductNotFound,
    IntentRejected,
    BillingIncomplete,
    BillingRequiresOffer,
    SiteVisitSlotNeeded,
    OfferAwaitingReview,
    BudgetMissing,
}

impl NeedsInputReason {
    pub fn as_str(self) -> &'static str {
        match self {
            NeedsInputReason::TimeWindowMissing => "time_window_missing",
            NeedsInputReason::DateUnparseable => "date_unparseable",
            NeedsInputReason::DateUnavailable => "date_unavailable",
            NeedsInputReason::ChoiceSelectionInvalid => "choice_selection_invalid",
            NeedsInputReason::RoomRequiresDate => "room_requires_date",
            NeedsInputReason::RoomUnavailable => "room_unavailable",
            NeedsInputReason::ProductRequiresRoom => "product_requires_room",
            NeedsInputReason::ProductQuantityMissing => "product_quantity_missing",
            NeedsInputReason::ProductNotFound => "product_not_found",
            NeedsInputReason::IntentRejected => "intent_rejected",
            NeedsInputReason::BillingIncomplete => "billing_incomplete",
            NeedsInputReason::BillingRequiresOffer => "billing_requires_offer",
            NeedsInputReason::SiteVisitSlotNeeded => "site_visit_slot_needed",
            NeedsInputReason::OfferAwaitingReview => "offer_awaiting_review",
            NeedsInputReason::BudgetMissing => "budget_missing",
        }
    }
}

impl fmt::Display for NeedsInputReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A same-turn fact that needs a clarifying question before it can apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedsInput {
    pub kind: NeedsInputKind,
    pub reason: NeedsInputReason,
    /// Context for the question text (missing field names, product name...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl NeedsInput {
    pub fn new(kind: NeedsInputKind, reason: NeedsInputReason) -> Self {
        Self {
            kind,
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Why a verifiable intent was not executed this turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralReason {
    CombinedLimitReached,
    RoomRequiresDate,
    ProductRequiresRoom,
    BillingRequiresOffer,
    ComboRolledBack,
    ExecutionFailed,
}

impl DeferralReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeferralReason::CombinedLimitReached => "combined_limit_reached",
            DeferralReason::RoomRequiresDate => "room_requires_date",
            DeferralReason::ProductRequiresRoom => "product_requires_room",
            DeferralReason::BillingRequiresOffer => "billing_requires_offer",
            DeferralReason::ComboRolledBack => "combo_rolled_back",
            DeferralReason::ExecutionFailed => "execution_failed",
        }
    }

    /// Whether the intent stays open for replay. Execution failures are
    /// queued already resolved.
    pub fn is_retryable(self) -> bool {
        self != DeferralReason::ExecutionFailed
    }

    /// The question that unblocks a prerequisite deferral
    pub fn blocking_question(self) -> Option<NeedsInput> {
        match self {
            DeferralReason::RoomRequiresDate => Some(NeedsInput::new(
                NeedsInputKind::DateChoice,
                NeedsInputReason::RoomRequiresDate,
            )),
            DeferralReason::ProductRequiresRoom => Some(NeedsInput::new(
                NeedsInputKind::Availability,
                NeedsInputReason::ProductRequiresRoom,
            )),
            DeferralReason::BillingRequiresOffer => Some(NeedsInput::new(
                NeedsInputKind::OfferHil,
                NeedsInputReason::BillingRequiresOffer,
            )),
            DeferralReason::CombinedLimitReached
            | DeferralReason::ComboRolledBack
            | DeferralReason::ExecutionFailed => None,
        }
    }
}

impl fmt::Display for DeferralReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
