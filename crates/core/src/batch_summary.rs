//! Summary text for a flushed batch of notifications.

use std::collections::BTreeMap;

/// Title, message and per-type histogram of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub title: String,
    pub message: String,
    pub types: BTreeMap<String, usize>,
}

/// Summarize a batch given the event type of each queued item.
///
/// The message names the most frequent type (ties broken by name) and counts
/// the remaining distinct types.
pub fn summarize<'a>(event_types: impl IntoIterator<Item = &'a str>) -> BatchSummary {
    let mut types: BTreeMap<String, usize> = BTreeMap::new();
    let mut total = 0usize;
    for t in event_types {
        *types.entry(t.to_string()).or_default() += 1;
        total += 1;
    }

    let noun = if total == 1 { "update" } else { "updates" };
    let title = format!("You have {total} {noun}");

    let top = types
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)));
    let message = match top {
        Some((event_type, count)) => {
            let label = event_type_label(event_type);
            let label = if *count == 1 { label } else { pluralize(&label) };
            let mut message = format!("Summary: {count} {label}");
            let others = types.len() - 1;
            if others > 0 {
                let kind = if others == 1 { "type" } else { "types" };
                message.push_str(&format!(" and {others} more {kind}"));
            }
            message
        }
        None => "Summary: no updates".to_string(),
    };

    BatchSummary {
        title,
        message,
        types,
    }
}

/// `shipment.status_change` -> `shipment status change`.
pub fn event_type_label(event_type: &str) -> String {
    event_type
        .split(['.', '_'])
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn pluralize(phrase: &str) -> String {
    let lower = phrase.to_ascii_lowercase();
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        format!("{phrase}es")
    } else if lower.ends_with('y')
        && !lower
            .chars()
            .rev()
            .nth(1)
            .is_some_and(|c| "aeiou".contains(c))
    {
        format!("{}ies", &phrase[..phrase.len() - 1])
    } else {
        format!("{phrase}s")
    }
}
