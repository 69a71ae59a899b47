//! Sequential, human-readable identifiers.
//!
//! Format:
//! - Item: `<PREFIX>-<NNNN>` (e.g. `PLAT-0042`)
//! - Subitem: `<ITEM-ID>-<NNN>` (e.g. `PLAT-0042-003`)
//! - Epic: `<PREFIX>-E<NNN>`
//!
//! Counters live in the document and only ever move forward. Before every
//! allocation the counter is checked against the highest id actually present;
//! a counter that has fallen behind (hand edits, an interrupted writer) is
//! repaired to `max + 1` so a number is never handed out twice.

use serde::Serialize;

use crate::models::{Document, Item};
use crate::{Error, Result};

/// Length of a team id prefix.
pub const PREFIX_LEN: usize = 4;

/// A freshly allocated id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub id: String,
    /// Counter value found behind the existing ids and repaired, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired_from: Option<u64>,
}

/// Derive the 4-character id prefix from a team name.
///
/// Keeps uppercase ASCII alphanumerics, truncates to four and pads with `X`.
pub fn team_prefix(team: &str) -> String {
    let mut prefix: String = team
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .take(PREFIX_LEN)
        .collect();
    while prefix.len() < PREFIX_LEN {
        prefix.push('X');
    }
    prefix
}

/// Validate a configured id prefix.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.len() != PREFIX_LEN
        || !prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(Error::InvalidId(format!(
            "ID prefix must be {} uppercase letters or digits, got: {}",
            PREFIX_LEN, prefix
        )));
    }
    Ok(())
}

pub fn format_item_id(prefix: &str, n: u64) -> String {
    format!("{}-{:04}", prefix, n)
}

pub fn format_subitem_id(parent_id: &str, n: u64) -> String {
    format!("{}-{:03}", parent_id, n)
}

pub fn format_epic_id(prefix: &str, n: u64) -> String {
    format!("{}-E{:03}", prefix, n)
}

fn parse_digits(s: &str, min_len: usize) -> Option<u64> {
    if s.len() < min_len || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Numeric part of an item id under `prefix`, if it is one.
pub fn parse_item_number(id: &str, prefix: &str) -> Option<u64> {
    let rest = id.strip_prefix(prefix)?.strip_prefix('-')?;
    parse_digits(rest, 4)
}

/// Sequence part of a subitem id under `parent_id`, if it is one.
pub fn parse_subitem_seq(id: &str, parent_id: &str) -> Option<u64> {
    let rest = id.strip_prefix(parent_id)?.strip_prefix('-')?;
    parse_digits(rest, 3)
}

pub fn parse_epic_number(id: &str, prefix: &str) -> Option<u64> {
    let rest = id.strip_prefix(prefix)?.strip_prefix("-E")?;
    parse_digits(rest, 3)
}

/// Move `counter` past `max_seen` if it fell behind. Returns the old value on repair.
fn heal(counter: &mut u64, max_seen: Option<u64>, what: &str) -> Option<u64> {
    if *counter == 0 {
        *counter = 1;
    }
    let max = max_seen?;
    if *counter > max {
        return None;
    }
    let old = *counter;
    *counter = max + 1;
    tracing::warn!(
        counter = what,
        stored = old,
        repaired = *counter,
        "ID counter was behind existing ids; repaired"
    );
    Some(old)
}

/// Allocate the next item id for the team.
pub fn next_item_id(doc: &mut Document, prefix: &str) -> Allocation {
    let max_seen = doc
        .items
        .iter()
        .filter_map(|i| parse_item_number(&i.entry.id, prefix))
        .max();
    let repaired_from = heal(&mut doc.next_id, max_seen, "nextId");
    let id = format_item_id(prefix, doc.next_id);
    doc.next_id += 1;
    Allocation { id, repaired_from }
}

/// Allocate the next subitem id under an item.
pub fn next_subitem_id(item: &mut Item) -> Allocation {
    let parent_id = item.entry.id.clone();
    let max_seen = item
        .subitems
        .iter()
        .filter_map(|s| parse_subitem_seq(&s.id, &parent_id))
        .max();
    let repaired_from = heal(&mut item.next_subitem_seq, max_seen, "nextSubitemSeq");
    let id = format_subitem_id(&parent_id, item.next_subitem_seq);
    item.next_subitem_seq += 1;
    Allocation { id, repaired_from }
}

/// Allocate the next epic id for the team.
pub fn next_epic_id(doc: &mut Document, prefix: &str) -> Allocation {
    let max_seen = doc
        .epics
        .iter()
        .filter_map(|e| parse_epic_number(&e.id, prefix))
        .max();
    let repaired_from = heal(&mut doc.next_epic_id, max_seen, "nextEpicId");
    let id = format_epic_id(prefix, doc.next_epic_id);
    doc.next_epic_id += 1;
    Allocation { id, repaired_from }
}

/// Resolve a user-supplied selector to the canonical id of an existing entry.
///
/// Accepts a full item/subitem id (case-insensitive) or a bare item number
/// (`12` → `<PREFIX>-0012`).
pub fn resolve_selector(doc: &Document, prefix: &str, selector: &str) -> Result<String> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(Error::InvalidId("Empty selector".to_string()));
    }

    let wanted = match parse_digits(selector, 1) {
        Some(n) => format_item_id(prefix, n),
        None => selector.to_string(),
    };

    doc.entries()
        .find(|(e, _)| e.id.eq_ignore_ascii_case(&wanted))
        .map(|(e, _)| e.id.clone())
        .ok_or_else(|| Error::NotFound(format!("Item not found: {}", selector)))
}
