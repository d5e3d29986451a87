//! Slot Service (spec.md §4.4): queries CRM free slots for a rep set,
//! normalizes them, round-robins rep assignment when the CRM doesn't carry
//! per-slot identity, renders the stable display-string contract, and
//! recovers a rep id from a chosen display line via the typed `DisplayLayout`
//! (spec.md §9 redesign note).

use crate::crm::{CrmClient, CrmError, RawSlot, SlotsOutcome};
use crate::domain::{DisplayLayout, RenderedSlots, Slot};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Europe::Rome;
use std::collections::HashMap;

#[derive(Debug)]
pub enum SlotQueryResult {
    Slots(Vec<Slot>),
    Empty,
    ApiError(String),
}

/// Queries and normalizes free slots for `rep_ids` in `[window_start,
/// window_end)`, bounded to `limit` chronological entries. Round-robins rep
/// assignment across slots the CRM didn't tag with a rep (spec.md §4.4).
pub async fn query_slots(
    crm: &CrmClient,
    rep_ids: &[String],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    limit: usize,
) -> Result<SlotQueryResult, CrmError> {
    let outcome = crm.free_slots(rep_ids, window_start, window_end).await?;
    let raw = match outcome {
        SlotsOutcome::Slots(s) => s,
        SlotsOutcome::Empty => return Ok(SlotQueryResult::Empty),
        SlotsOutcome::ApiError(e) => return Ok(SlotQueryResult::ApiError(e)),
    };

    let mut slots = assign_reps(raw, rep_ids);
    slots.sort_by_key(|s| s.datetime_utc);
    slots.truncate(limit);

    if slots.is_empty() {
        Ok(SlotQueryResult::Empty)
    } else {
        Ok(SlotQueryResult::Slots(slots))
    }
}

fn assign_reps(raw: Vec<RawSlot>, rep_ids: &[String]) -> Vec<Slot> {
    if rep_ids.is_empty() {
        return raw
            .into_iter()
            .map(|r| Slot {
                datetime_utc: r.datetime_utc,
                rep_id: "unknown".to_string(),
            })
            .collect();
    }

    let mut next_rep = 0usize;
    raw.into_iter()
        .map(|r| {
            let rep_id = r.rep_id.unwrap_or_else(|| {
                let id = rep_ids[next_rep % rep_ids.len()].clone();
                next_rep += 1;
                id
            });
            Slot {
                datetime_utc: r.datetime_utc,
                rep_id,
            }
        })
        .collect()
}

const WEEKDAYS_IT: [&str; 7] = ["Lunedì", "Martedì", "Mercoledì", "Giovedì", "Venerdì", "Sabato", "Domenica"];

fn weekday_it(d: &DateTime<chrono_tz::Tz>) -> &'static str {
    WEEKDAYS_IT[d.weekday().num_days_from_monday() as usize]
}

/// Renders the stable slot-display contract (spec.md §4.4): 1 rep → plain
/// lines + trailer; 2-3 reps → letter-suffixed lines + legend; 4+ reps →
/// grouped per rep.
pub fn render_slots(slots: &[Slot]) -> RenderedSlots {
    let mut reps: Vec<String> = Vec::new();
    for slot in slots {
        if !reps.contains(&slot.rep_id) {
            reps.push(slot.rep_id.clone());
        }
    }

    match reps.len() {
        0 => RenderedSlots {
            text: String::new(),
            layout: DisplayLayout::SingleRep {
                rep_id: "unknown".to_string(),
            },
        },
        1 => render_single_rep(slots, &reps[0]),
        2..=3 => render_abbreviated(slots, &reps),
        _ => render_grouped(slots, &reps),
    }
}

fn group_by_date(slots: &[Slot]) -> Vec<(DateTime<chrono_tz::Tz>, Vec<&Slot>)> {
    let mut by_date: Vec<(chrono::NaiveDate, Vec<&Slot>)> = Vec::new();
    for slot in slots {
        let local = slot.datetime_utc.with_timezone(&Rome);
        let date = local.date_naive();
        if let Some(entry) = by_date.iter_mut().find(|(d, _)| *d == date) {
            entry.1.push(slot);
        } else {
            by_date.push((date, vec![slot]));
        }
    }
    by_date
        .into_iter()
        .map(|(date, slots)| {
            (
                Rome.with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0).unwrap(),
                slots,
            )
        })
        .collect()
}

fn render_single_rep(slots: &[Slot], rep_id: &str) -> RenderedSlots {
    let mut lines = Vec::new();
    for (date, day_slots) in group_by_date(slots) {
        let times: Vec<String> = day_slots
            .iter()
            .map(|s| s.datetime_utc.with_timezone(&Rome).format("%H:%M").to_string())
            .collect();
        lines.push(format!(
            "{} {}: {}",
            weekday_it(&date),
            date.format("%d-%m-%Y"),
            times.join(", ")
        ));
    }
    lines.push(format!("Sales Rep: {rep_id}"));
    RenderedSlots {
        text: lines.join("\n"),
        layout: DisplayLayout::SingleRep {
            rep_id: rep_id.to_string(),
        },
    }
}

fn render_abbreviated(slots: &[Slot], reps: &[String]) -> RenderedSlots {
    let letters = ['A', 'B', 'C'];
    let mut legend = HashMap::new();
    for (i, rep) in reps.iter().enumerate() {
        legend.insert(letters[i], rep.clone());
    }
    let letter_for = |rep_id: &str| -> char {
        reps.iter()
            .position(|r| r == rep_id)
            .map(|i| letters[i])
            .unwrap_or('A')
    };

    let mut lines = Vec::new();
    for (date, day_slots) in group_by_date(slots) {
        let times: Vec<String> = day_slots
            .iter()
            .map(|s| {
                format!(
                    "{} ({})",
                    s.datetime_utc.with_timezone(&Rome).format("%H:%M"),
                    letter_for(&s.rep_id)
                )
            })
            .collect();
        lines.push(format!(
            "{} {}: {}",
            weekday_it(&date),
            date.format("%d-%m-%Y"),
            times.join(", ")
        ));
    }
    let legend_line = legend
        .iter()
        .map(|(l, rep)| format!("{l}={rep}"))
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(format!("Legend: {legend_line}"));

    RenderedSlots {
        text: lines.join("\n"),
        layout: DisplayLayout::Abbreviated { legend },
    }
}

fn render_grouped(slots: &[Slot], reps: &[String]) -> RenderedSlots {
    let mut headers = HashMap::new();
    let mut sections = Vec::new();
    for rep in reps {
        let rep_slots: Vec<Slot> = slots.iter().filter(|s| &s.rep_id == rep).cloned().collect();
        let mut section_lines = vec![format!("Sales Rep: {rep}")];
        for (date, day_slots) in group_by_date(&rep_slots) {
            let times: Vec<String> = day_slots
                .iter()
                .map(|s| s.datetime_utc.with_timezone(&Rome).format("%H:%M").to_string())
                .collect();
            section_lines.push(format!(
                "{} {}: {}",
                weekday_it(&date),
                date.format("%d-%m-%Y"),
                times.join(", ")
            ));
        }
        headers.insert(rep.clone(), format!("Sales Rep: {rep}"));
        sections.push(section_lines.join("\n"));
    }

    RenderedSlots {
        text: sections.join("\n\n"),
        layout: DisplayLayout::GroupedByRep { headers },
    }
}

/// Recovers the rep id a chosen time belongs to (spec.md §4.8 step 9, §8
/// testable property: always resolves to a rep id or `None`, never a wrong
/// rep). `chosen_time_text` is the literal string the AI returned (e.g.
/// `"14:00 (B)"` or `"14:00"`).
pub fn resolve_rep_for_chosen_time(layout: &DisplayLayout, rendered_text: &str, chosen_time_text: &str) -> Option<String> {
    match layout {
        DisplayLayout::SingleRep { rep_id } => Some(rep_id.clone()),
        DisplayLayout::Abbreviated { legend } => {
            let letter = chosen_time_text.trim().chars().last()?;
            legend.get(&letter).cloned()
        }
        DisplayLayout::GroupedByRep { headers } => {
            // Scan the rendered text for the section whose header precedes
            // the first line containing the chosen time.
            let mut current_rep: Option<&String> = None;
            for line in rendered_text.lines() {
                if let Some((rep, _)) = headers.iter().find(|(_, header)| line == header.as_str()) {
                    current_rep = Some(rep);
                }
                if line.contains(chosen_time_text.trim()) {
                    return current_rep.cloned();
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn slot(hour: u32, day: u32, rep: &str) -> Slot {
        Slot {
            datetime_utc: Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap(),
            rep_id: rep.to_string(),
        }
    }

    #[test]
    fn single_rep_layout_round_trips() {
        let slots = vec![slot(13, 17, "U1"), slot(15, 17, "U1")];
        let rendered = render_slots(&slots);
        assert!(rendered.text.ends_with("Sales Rep: U1"));
        let resolved = resolve_rep_for_chosen_time(&rendered.layout, &rendered.text, "14:00");
        assert_eq!(resolved, Some("U1".to_string()));
    }

    #[test]
    fn abbreviated_layout_round_trips_via_legend() {
        let slots = vec![slot(13, 17, "U1"), slot(15, 17, "U2")];
        let rendered = render_slots(&slots);
        match &rendered.layout {
            DisplayLayout::Abbreviated { legend } => assert_eq!(legend.len(), 2),
            _ => panic!("expected abbreviated layout"),
        }
        let resolved = resolve_rep_for_chosen_time(&rendered.layout, &rendered.text, "14:00 (A)");
        assert_eq!(resolved, Some("U1".to_string()));
    }

    #[test]
    fn grouped_layout_round_trips_via_header_scan() {
        let slots = vec![slot(13, 17, "U1"), slot(15, 17, "U2"), slot(9, 18, "U3"), slot(10, 18, "U4")];
        let rendered = render_slots(&slots);
        match &rendered.layout {
            DisplayLayout::GroupedByRep { headers } => assert_eq!(headers.len(), 4),
            _ => panic!("expected grouped layout"),
        }
        let resolved = resolve_rep_for_chosen_time(&rendered.layout, &rendered.text, "10:00");
        assert_eq!(resolved, Some("U4".to_string()));
    }

    #[test]
    fn round_robins_rep_assignment_when_crm_has_no_rep_identity() {
        let raw = vec![
            RawSlot { datetime_utc: Utc.with_ymd_and_hms(2025, 3, 17, 13, 0, 0).unwrap(), rep_id: None },
            RawSlot { datetime_utc: Utc.with_ymd_and_hms(2025, 3, 17, 14, 0, 0).unwrap(), rep_id: None },
            RawSlot { datetime_utc: Utc.with_ymd_and_hms(2025, 3, 17, 15, 0, 0).unwrap(), rep_id: None },
        ];
        let reps = vec!["U1".to_string(), "U2".to_string()];
        let slots = assign_reps(raw, &reps);
        assert_eq!(slots[0].rep_id, "U1");
        assert_eq!(slots[1].rep_id, "U2");
        assert_eq!(slots[2].rep_id, "U1");
    }
}
