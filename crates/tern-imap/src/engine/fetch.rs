//! FETCH response merging.
//!
//! Each untagged FETCH response carries the message's sequence index and an
//! attribute list. Attributes are merged into the existing message record;
//! a NIL value never overwrites data we already have.

use chrono::{DateTime, FixedOffset};

use crate::args::ImapArg;
use crate::types::{Header, Message, MessagePart};

/// Merges a FETCH attribute list into a message record.
pub(crate) fn merge_fetch(msg: &mut Message, items: &[ImapArg]) {
    let mut iter = items.iter();

    while let Some(key) = iter.next() {
        let Some(key) = key.as_atom() else {
            tracing::debug!("skipping non-atom FETCH key");
            continue;
        };
        let Some(value) = iter.next() else {
            tracing::debug!(key, "FETCH key without value");
            break;
        };
        if value.is_nil() {
            continue;
        }

        let upper = key.to_uppercase();
        match upper.as_str() {
            "UID" => {
                if let Some(n) = value.as_number() {
                    msg.uid = Some(n);
                }
            }

            "FLAGS" => {
                if let Some(items) = value.as_list() {
                    msg.flags = items
                        .iter()
                        .filter_map(ImapArg::as_atom)
                        .map(str::to_string)
                        .collect();
                }
            }

            "INTERNALDATE" => {
                if let Some(s) = value.as_str() {
                    msg.internal_date = parse_internal_date(s);
                }
            }

            "BODYSTRUCTURE" | "BODY" => {
                if let Some(list) = value.as_list() {
                    let (multipart, parts) = parse_structure(list);
                    msg.multipart_type = multipart;
                    msg.parts = parts;
                }
            }

            // Header fetches populate the header list; other sections land
            // in the matching part's content.
            _ if upper.starts_with("BODY[") || upper.starts_with("BODY.PEEK[") => {
                if let Some(text) = value.as_str() {
                    if upper.contains("HEADER") {
                        msg.headers = parse_headers(text);
                    } else {
                        store_part_content(msg, &upper, text.as_bytes());
                    }
                }
            }

            "RFC822.SIZE" | "ENVELOPE" | "MODSEQ" => {}

            other => {
                tracing::debug!(key = other, "ignoring unknown FETCH attribute");
            }
        }
    }
}

/// Parses a BODYSTRUCTURE list into the multipart type and ordered parts.
///
/// A multipart body nests one list per part followed by the multipart
/// subtype; a non-multipart body is a flat list of fields. Nested multiparts
/// are recorded as a single `multipart/<subtype>` placeholder part.
fn parse_structure(list: &[ImapArg]) -> (Option<String>, Vec<MessagePart>) {
    let is_multipart = list.first().is_some_and(|a| a.as_list().is_some());

    if !is_multipart {
        return (None, vec![parse_part(list)]);
    }

    let mut parts = Vec::new();
    let mut multipart = None;

    for item in list {
        if let Some(sub) = item.as_list() {
            if sub.first().is_some_and(|a| a.as_list().is_some()) {
                // multipart within multipart
                let subtype = sub
                    .iter()
                    .find_map(ImapArg::as_str)
                    .unwrap_or("mixed")
                    .to_lowercase();
                parts.push(MessagePart {
                    mime_type: "multipart".to_string(),
                    subtype,
                    ..MessagePart::default()
                });
            } else {
                parts.push(parse_part(sub));
            }
        } else if let Some(s) = item.as_str() {
            multipart = Some(s.to_lowercase());
            break;
        }
    }

    (multipart, parts)
}

/// Parses one non-multipart body part:
/// `type subtype (params) body-id body-description encoding size`.
fn parse_part(fields: &[ImapArg]) -> MessagePart {
    let text = |i: usize| -> Option<String> {
        fields
            .get(i)
            .filter(|a| !a.is_nil())
            .and_then(ImapArg::as_str)
            .map(str::to_string)
    };

    let parameters = fields
        .get(2)
        .and_then(ImapArg::as_list)
        .map(|kv| {
            kv.chunks(2)
                .filter_map(|pair| match pair {
                    [k, v] => Some((k.as_str()?.to_string(), v.as_str()?.to_string())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    MessagePart {
        mime_type: text(0).unwrap_or_default().to_lowercase(),
        subtype: text(1).unwrap_or_default().to_lowercase(),
        parameters,
        body_id: text(3),
        body_description: text(4),
        encoding: text(5),
        size: fields.get(6).and_then(ImapArg::as_number).unwrap_or(0),
        content: Vec::new(),
    }
}

/// Stores fetched section content into the matching part, e.g. `BODY[1]`
/// into the first part. `BODY[]` content is attached to the first part.
fn store_part_content(msg: &mut Message, key: &str, content: &[u8]) {
    let section = key
        .split_once('[')
        .map(|(_, rest)| rest.trim_end_matches(']'))
        .unwrap_or_default();

    let index = section
        .split('.')
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1);

    if msg.parts.is_empty() {
        msg.parts.push(MessagePart::default());
    }
    if let Some(part) = msg.parts.get_mut(index.saturating_sub(1)) {
        part.content = content.to_vec();
    }
}

/// Parses an INTERNALDATE value like `17-Jul-1996 02:44:25 -0700`. The day
/// may be space-padded.
fn parse_internal_date(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(s.trim_start(), "%d-%b-%Y %H:%M:%S %z")
        .or_else(|_| DateTime::parse_from_str(s.trim_start(), "%e-%b-%Y %H:%M:%S %z"))
        .ok()
}

/// Splits fetched header text into key/value pairs, folding continuation
/// lines into the preceding value.
fn parse_headers(text: &str) -> Vec<Header> {
    let mut headers: Vec<Header> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = headers.last_mut() {
                last.value.push(' ');
                last.value.push_str(line.trim_start());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push(Header {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
    }

    headers
}
