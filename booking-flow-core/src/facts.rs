//! Extracted Facts
//!
//! Capability-keyed output of the upstream entity extractor for one
//! inbound message. There is no structural guarantee beyond "whatever was
//! found": an absent key means "unchanged", never "cleared".

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::record::{BillingDetails, ClientInfo, DateWindow, Requirements, TimeWindow};

/// Date formats accepted from the extractor, tried in order
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedFacts {
    /// Event date as extracted (unparsed)
    pub date: Option<String>,
    pub time_window: Option<TimeWindow>,
    pub date_window: Option<DateWindow>,
    /// Preferred room id
    pub room: Option<String>,
    pub participants: Option<u32>,
    pub seating_layout: Option<String>,
    pub special_notes: Option<String>,
    pub products: Vec<ProductChange>,
    pub billing: Option<BillingDetails>,
    pub client: Option<ClientInfo>,
    pub commercial: Option<CommercialSignal>,
    pub deposit: Option<DepositSignal>,
    pub site_visit: Option<SiteVisitSignal>,
    /// 1-based answer to an open multiple-choice prompt
    pub choice_selection: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductChange {
    pub action: ProductAction,
    pub name: String,
    pub quantity: Option<u32>,
}

/// Negotiation signals. Amounts stay opaque text; no arithmetic happens here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommercialSignal {
    pub accept_offer: Option<bool>,
    pub counter_proposal: Option<String>,
    pub budget: Option<String>,
}

impl CommercialSignal {
    pub fn is_empty(&self) -> bool {
        self.accept_offer.is_none() && self.counter_proposal.is_none() && self.budget.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositSignal {
    /// Client reports the deposit as paid
    Paid,
    /// Client asks about the deposit terms
    Inquiry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteVisitSignal {
    pub requested_date: Option<String>,
    pub reschedule: bool,
}

/// Outcome of reading the extracted date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateFact {
    Parsed(NaiveDate),
    /// Present but not understood; callers must treat it as a change
    Unparseable(String),
}

/// Parse a date in any of the accepted formats
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

impl ExtractedFacts {
    pub fn date_fact(&self) -> Option<DateFact> {
        self.date.as_deref().map(|raw| match parse_date(raw) {
            Some(date) => DateFact::Parsed(date),
            None => DateFact::Unparseable(raw.to_string()),
        })
    }

    /// Any fact that feeds `requirements_hash`
    pub fn has_structural(&self) -> bool {
        self.participants.is_some()
            || self.seating_layout.is_some()
            || self.time_window.is_some()
            || self.special_notes.is_some()
            || self.room.is_some()
    }

    /// `base` with every present structural fact overlaid
    pub fn merged_requirements(&self, base: &Requirements) -> Requirements {
        let mut merged = base.clone();
        if let Some(n) = self.participants {
            merged.participants = Some(n);
        }
        if let Some(layout) = &self.seating_layout {
            merged.seating_layout = Some(layout.clone());
        }
        if let Some(window) = self.time_window {
            merged.time_window = Some(window);
        }
        if let Some(notes) = &self.special_notes {
            merged.special_notes = Some(notes.clone());
        }
        if let Some(room) = &self.room {
            merged.preferred_room = Some(room.clone());
        }
        merged
    }

    /// Number of distinct capabilities present in this message
    pub fn intent_count(&self) -> usize {
        [
            self.date.is_some(),
            self.room.is_some(),
            self.participants.is_some(),
            !self.products.is_empty(),
            self.billing.is_some(),
            self.site_visit.is_some(),
            self.commercial.as_ref().is_some_and(|c| !c.is_empty()),
            self.choice_selection.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    pub fn is_multi_intent(&self) -> bool {
        self.intent_count() >= 2
    }

    pub fn is_empty(&self) -> bool {
        *self == ExtractedFacts::default()
    }
}
