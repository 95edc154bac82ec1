//! Local ordering of messages and uid lists

use std::cmp::Ordering;
use std::collections::HashMap;
use tidemail_worker::{Address, MessageInfo, SortCriterion, SortField};

/// Sort messages by criteria; earlier criteria take precedence.
///
/// Ties keep their relative order, falling back to uid order.
pub fn sort_messages(messages: &mut [MessageInfo], criteria: &[SortCriterion]) {
    messages.sort_by(|a, b| {
        for criterion in criteria {
            let ord = compare(a, b, criterion.field);
            let ord = if criterion.reverse { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.uid.cmp(&b.uid)
    });
}

fn compare(a: &MessageInfo, b: &MessageInfo, field: SortField) -> Ordering {
    match field {
        SortField::Arrival => a.internal_date.cmp(&b.internal_date),
        SortField::Date => date(a).cmp(&date(b)),
        SortField::Cc => first_address(a, |e| &e.cc).cmp(&first_address(b, |e| &e.cc)),
        SortField::From => first_address(a, |e| &e.from).cmp(&first_address(b, |e| &e.from)),
        SortField::To => first_address(a, |e| &e.to).cmp(&first_address(b, |e| &e.to)),
        SortField::Read => a.is_read().cmp(&b.is_read()),
        SortField::Size => a.size.cmp(&b.size),
        SortField::Subject => subject(a).cmp(&subject(b)),
    }
}

fn date(info: &MessageInfo) -> Option<chrono::DateTime<chrono::Utc>> {
    info.envelope
        .as_ref()
        .and_then(|e| e.date)
        .or(info.internal_date)
}

fn first_address<F>(info: &MessageInfo, field: F) -> String
where
    F: Fn(&tidemail_worker::Envelope) -> &Vec<Address>,
{
    info.envelope
        .as_ref()
        .and_then(|e| field(e).first())
        .map(|a| a.name.clone().unwrap_or_else(|| a.address.clone()).to_lowercase())
        .unwrap_or_default()
}

fn subject(info: &MessageInfo) -> String {
    let subject = info
        .envelope
        .as_ref()
        .map(|e| e.subject.to_lowercase())
        .unwrap_or_default();
    let mut rest = subject.as_str();
    while let Some(stripped) = ["re:", "fwd:", "fw:"]
        .iter()
        .find_map(|p| rest.strip_prefix(*p))
    {
        rest = stripped.trim_start();
    }
    rest.to_string()
}

/// Reorder `uids` to follow their positions in `order`.
///
/// Uids missing from `order` go last, keeping their relative order.
pub fn sort_by_order(uids: &mut [u32], order: &[u32]) {
    let mut position: HashMap<u32, usize> = HashMap::with_capacity(order.len());
    for (i, &uid) in order.iter().enumerate() {
        position.entry(uid).or_insert(i);
    }
    uids.sort_by_key(|uid| position.get(uid).copied().unwrap_or(usize::MAX));
}
