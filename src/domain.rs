//! Shared domain types used across the intake, slot, routing, booking and
//! media-bridge modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One of the three product lines this system sells appointments for.
/// Drives which voice-AI agent/business name/phone number a call uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Service {
    Infissi,
    Vetrate,
    Pergole,
}

impl Service {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Infissi" => Some(Service::Infissi),
            "Vetrate" => Some(Service::Vetrate),
            "Pergole" => Some(Service::Pergole),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Infissi => "Infissi",
            Service::Vetrate => "Vetrate",
            Service::Pergole => "Pergole",
        }
    }

    /// The business name injected into the voice-AI agent's dynamic
    /// variables (§4.8 step 4).
    pub fn business_name(&self) -> &'static str {
        match self {
            Service::Infissi => "Ristrutturiamolo",
            Service::Vetrate | Service::Pergole => "UNICOVETRATE",
        }
    }

    /// Matches the case-insensitive tag scan used by the Follow-Up
    /// Scheduler to recover a service from CRM tags (§4.11 step 3).
    pub fn from_tag(tag: &str) -> Option<Self> {
        let lower = tag.to_ascii_lowercase();
        if lower.contains("infissi") {
            Some(Service::Infissi)
        } else if lower.contains("vetrate") {
            Some(Service::Vetrate)
        } else if lower.contains("pergole") {
            Some(Service::Pergole)
        } else {
            None
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `{utc_datetime, rep}` pair offered to the prospect (GLOSSARY: Slot).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Slot {
    pub datetime_utc: DateTime<Utc>,
    pub rep_id: String,
}

/// The typed layout a slot-display string was rendered with. Persisted
/// alongside the rendered text so the Media Bridge can recover the rep id
/// a chosen slot belongs to without re-parsing ambiguous free text
/// (spec.md §9's redesign note on the "fragile but contractual" format).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DisplayLayout {
    /// Exactly one eligible rep; every line belongs to it.
    SingleRep { rep_id: String },
    /// 2–3 eligible reps; times are suffixed `(A)`/`(B)`/`(C)`.
    Abbreviated { legend: HashMap<char, String> },
    /// 4+ eligible reps; grouped per rep with a header line per rep.
    GroupedByRep { headers: HashMap<String, String> },
}

/// The rendered slot string plus the layout used to produce it — the pair
/// this system persists on `call_queue`/`calls` rows as `available_slots_text`
/// (the layout itself does not need its own column; it is recomputed from the
/// same rep set at parse time, see `slots::resolve_rep_for_chosen_time`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderedSlots {
    pub text: String,
    pub layout: DisplayLayout,
}
