//! Change Classification
//!
//! Diffs the previous record against newly extracted facts and names what
//! changed. Several categories can be true at once; `classify_change`
//! reports only the highest-priority one. Genuine multi-intent turns are
//! the planner's job, not the classifier's.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

use crate::canonical_hash::hashes_match;
use crate::facts::{DateFact, ExtractedFacts};
use crate::record::EventRecord;

/// What kind of fact changed. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Date,
    Room,
    Requirements,
    Products,
    Commercial,
    Deposit,
    SiteVisit,
    ClientInfo,
}

impl ChangeType {
    pub const ALL: [ChangeType; 8] = [
        ChangeType::Date,
        ChangeType::Room,
        ChangeType::Requirements,
        ChangeType::Products,
        ChangeType::Commercial,
        ChangeType::Deposit,
        ChangeType::SiteVisit,
        ChangeType::ClientInfo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Date => "date",
            ChangeType::Room => "room",
            ChangeType::Requirements => "requirements",
            ChangeType::Products => "products",
            ChangeType::Commercial => "commercial",
            ChangeType::Deposit => "deposit",
            ChangeType::SiteVisit => "site_visit",
            ChangeType::ClientInfo => "client_info",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown change category: {s}"))
    }
}

/// Every category that fired for one message, ordered by priority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet(BTreeSet<ChangeType>);

impl ChangeSet {
    pub fn contains(&self, change: ChangeType) -> bool {
        self.0.contains(&change)
    }

    pub fn primary(&self) -> Option<ChangeType> {
        self.0.iter().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChangeType> + '_ {
        self.0.iter().copied()
    }
}

/// Detect every category the new facts touch relative to `previous`
pub fn detect_changes(previous: &EventRecord, facts: &ExtractedFacts) -> ChangeSet {
    let mut changes = BTreeSet::new();

    match facts.date_fact() {
        Some(DateFact::Parsed(date)) if previous.chosen_date != Some(date) => {
            changes.insert(ChangeType::Date);
        }
        Some(DateFact::Unparseable(raw)) => {
            warn!(
                event_id = %previous.event_id,
                raw_date = %raw,
                "Unparseable date, treating as date change"
            );
            changes.insert(ChangeType::Date);
        }
        _ => {}
    }

    if let Some(room) = facts.room.as_deref() {
        if previous.locked_room_id.as_deref() != Some(room) {
            changes.insert(ChangeType::Room);
        }
    }

    if facts.has_structural() {
        let merged = facts.merged_requirements(&previous.requirements);
        let fresh = merged.content_hash();
        if !hashes_match(Some(&fresh), previous.requirements_hash.as_deref()) {
            changes.insert(ChangeType::Requirements);
        }
    }

    if !facts.products.is_empty() {
        changes.insert(ChangeType::Products);
    }

    if facts.commercial.as_ref().is_some_and(|c| !c.is_empty()) {
        changes.insert(ChangeType::Commercial);
    }

    if facts.deposit.is_some() {
        changes.insert(ChangeType::Deposit);
    }

    if facts.site_visit.is_some() {
        changes.insert(ChangeType::SiteVisit);
    }

    // partial updates overlay the stored values; restating them is no change
    let client_changed = facts
        .client
        .as_ref()
        .is_some_and(|client| previous.client.overlaid(client) != previous.client);
    let billing_changed = facts.billing.as_ref().is_some_and(|billing| {
        let stored = previous.billing.clone().unwrap_or_default();
        stored.overlaid(billing) != stored || previous.billing.is_none()
    });
    if client_changed || billing_changed {
        changes.insert(ChangeType::ClientInfo);
    }

    ChangeSet(changes)
}

/// Highest-priority change, or `None` if nothing changed
pub fn classify_change(previous: &EventRecord, facts: &ExtractedFacts) -> Option<ChangeType> {
    detect_changes(previous, facts).primary()
}
