//! Workflow Steps
//!
//! The seven processing stages a booking conversation moves through.
//! Records store the step as a raw integer so that a handler writing an
//! out-of-range value can be detected instead of panicking.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A processing stage of the booking workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Step {
    Intake = 1,
    DateConfirmation = 2,
    RoomAvailability = 3,
    Offer = 4,
    Negotiation = 5,
    Transition = 6,
    Confirmation = 7,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::Intake,
        Step::DateConfirmation,
        Step::RoomAvailability,
        Step::Offer,
        Step::Negotiation,
        Step::Transition,
        Step::Confirmation,
    ];

    /// Numeric position of the step (1-7)
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Typed view of a raw step number; `None` for anything outside 1-7
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Step::Intake),
            2 => Some(Step::DateConfirmation),
            3 => Some(Step::RoomAvailability),
            4 => Some(Step::Offer),
            5 => Some(Step::Negotiation),
            6 => Some(Step::Transition),
            7 => Some(Step::Confirmation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Intake => "intake",
            Step::DateConfirmation => "date_confirmation",
            Step::RoomAvailability => "room_availability",
            Step::Offer => "offer",
            Step::Negotiation => "negotiation",
            Step::Transition => "transition",
            Step::Confirmation => "confirmation",
        }
    }

    /// Stages whose entry is gated by the guard evaluator
    pub fn is_guarded(self) -> bool {
        matches!(
            self,
            Step::DateConfirmation | Step::RoomAvailability | Step::Offer
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.as_str())
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> Self {
        step.number()
    }
}

impl TryFrom<u8> for Step {
    type Error = UnknownStep;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Step::from_number(value).ok_or(UnknownStep(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unknown workflow step: {0}")]
pub struct UnknownStep(pub u8);
