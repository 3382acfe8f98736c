//! Line dispatcher for server responses.
//!
//! Every server line begins with `*` (untagged), `+` (continuation request)
//! or a tag the client issued. The dispatcher splits off the token and the
//! command word, lexes the remainder into an argument tree and routes it.
//!
//! Status responses may carry a bracketed response code; the code is turned
//! into a synthetic `* <code>` line and re-dispatched so that code-specific
//! side effects (permanent flags, read-write state, capability refresh) run
//! before the outer status resolves its pending callback.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::args::{ArgKind, ImapArg, parse_args};
use crate::types::Status;
use crate::{Error, Result};

use super::fetch::merge_fetch;
use super::{Connection, EngineEvent};

/// Dispatches one logical line (without its final CRLF).
pub(crate) fn handle_line<S>(conn: &mut Connection<S>, line: &[u8]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (token, rest) = split_word(line);
    if token.is_empty() {
        return Err(Error::Protocol("empty line".to_string()));
    }
    if token == b"+" {
        handle_continuation(conn);
        return Ok(());
    }

    let token = std::str::from_utf8(token).map_err(|_| Error::Parse {
        position: 0,
        message: "Invalid UTF-8 in tag".to_string(),
    })?;

    let (word, rest) = split_word(rest);
    let word = std::str::from_utf8(word).map_err(|_| Error::Parse {
        position: 0,
        message: "Invalid UTF-8 in command word".to_string(),
    })?;

    // Untagged data lines carry the sequence number first: `* 3 EXISTS`.
    if token == "*"
        && !word.is_empty()
        && word.bytes().all(|b| b.is_ascii_digit())
    {
        let num: i64 = word.parse().map_err(|_| Error::Parse {
            position: 0,
            message: "Number too large".to_string(),
        })?;
        let (cmd, rest) = split_word(rest);
        let cmd = std::str::from_utf8(cmd).map_err(|_| Error::Parse {
            position: 0,
            message: "Invalid UTF-8 in command word".to_string(),
        })?;
        return handle_numeric(conn, num, cmd, rest);
    }

    match Status::parse(word) {
        Some(status) => handle_status(conn, token, status, rest),
        None => handle_untagged(conn, word, rest),
    }
}

/// Splits the first space-delimited word off a line.
fn split_word(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(|&b| b == b' ') {
        Some(pos) => (&line[..pos], &line[pos + 1..]),
        None => (line, &[]),
    }
}

/// Handles `+`: either transmit the queued in-band payload (AUTHENTICATE)
/// or acknowledge that IDLE is live.
fn handle_continuation<S>(conn: &mut Connection<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if let Some(payload) = conn.take_continuation() {
        let outbox = conn.outbox_mut();
        outbox.extend_from_slice(&payload);
        outbox.extend_from_slice(b"\r\n");
    } else if conn.idle_requested() && !conn.is_idling() {
        conn.begin_idle();
    } else {
        tracing::debug!("unexpected continuation request");
    }
}

/// Handles OK/NO/BAD/PREAUTH/BYE for both tagged and untagged lines.
fn handle_status<S>(
    conn: &mut Connection<S>,
    token: &str,
    status: Status,
    rest: &[u8],
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let args = parse_args(rest)?;
    let mut args = args.as_slice();

    if let Some(ImapArg {
        kind: ArgKind::Response(code),
        ..
    }) = args.first()
    {
        // Produce a fake `* <code>` line and run it through the dispatcher
        // again to trigger the code's side effects.
        let synthetic = format!("* {code}");
        if let Err(e) = handle_line(conn, synthetic.as_bytes()) {
            tracing::debug!(error = %e, code = %code, "ignoring bad response code");
        }
        args = &args[1..];
    }

    let args_text = args.first().map(|a| a.original.clone()).unwrap_or_default();

    if status == Status::Bye && token == "*" {
        // No automatic reconnection; deliver, then wind down.
        conn.mark_closing();
        conn.push_event(EngineEvent::Closed);
    }

    if let Some(complete) = conn.pending_remove(token) {
        complete(conn, status, &args_text);
    } else if token == "*" {
        if status != Status::Ok {
            tracing::debug!(status = ?status, "unhandled untagged status");
        }
    } else {
        tracing::debug!(tag = %token, "unsolicited status for unknown tag");
    }

    Ok(())
}

/// Handles untagged responses keyed by command word, including the words
/// that arrive via response-code re-dispatch (READ-WRITE, UIDNEXT, ...).
fn handle_untagged<S>(conn: &mut Connection<S>, word: &str, rest: &[u8]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match word.to_uppercase().as_str() {
        "CAPABILITY" => {
            let args = parse_args(rest)?;
            let atoms = args.iter().filter_map(ImapArg::as_atom);
            conn.caps = Some(crate::types::Capabilities::from_atoms(atoms));
        }

        "LIST" | "LSUB" => {
            let args = parse_args(rest)?;
            handle_list(conn, &args)?;
        }

        "FLAGS" => {
            let args = parse_args(rest)?;
            let flags = flag_list(args.first());
            if let Some(mbox) = conn.target_mailbox_mut() {
                mbox.flags = flags;
                let name = mbox.name.clone();
                conn.push_event(EngineEvent::MailboxUpdated(name));
            }
        }

        "PERMANENTFLAGS" => {
            let args = parse_args(rest)?;
            let flags = flag_list(args.first());
            if let Some(mbox) = conn.target_mailbox_mut() {
                mbox.permanent_flags = flags;
            }
        }

        "READ-WRITE" => {
            if let Some(mbox) = conn.target_mailbox_mut() {
                mbox.read_write = true;
            }
        }

        "READ-ONLY" => {
            if let Some(mbox) = conn.target_mailbox_mut() {
                mbox.read_write = false;
            }
        }

        "UIDNEXT" => {
            let args = parse_args(rest)?;
            if let Some(n) = args.first().and_then(ImapArg::as_number) {
                if let Some(mbox) = conn.target_mailbox_mut() {
                    mbox.next_uid = n;
                }
            }
        }

        "UNSEEN" => {
            let args = parse_args(rest)?;
            if let Some(n) = args.first().and_then(ImapArg::as_number) {
                if let Some(mbox) = conn.target_mailbox_mut() {
                    mbox.unseen = n;
                }
            }
        }

        "SEARCH" => {
            let args = parse_args(rest)?;
            let hits: Vec<i64> = args.iter().filter_map(ImapArg::as_number).collect();
            tracing::debug!(?hits, "search results");
        }

        // Advisory codes with no client-side state.
        "TRYCREATE" | "ALERT" | "PARSE" | "UIDVALIDITY" | "HIGHESTMODSEQ" => {}

        other => {
            tracing::debug!(word = other, "dropping unknown untagged response");
        }
    }

    Ok(())
}

/// Handles `* <n> <word>` message data, applied to the mailbox that
/// untagged updates currently belong to.
fn handle_numeric<S>(conn: &mut Connection<S>, num: i64, cmd: &str, rest: &[u8]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match cmd.to_uppercase().as_str() {
        "EXISTS" => {
            if let Some(mbox) = conn.target_mailbox_mut() {
                mbox.exists = num;
                let name = mbox.name.clone();
                conn.push_event(EngineEvent::MailboxUpdated(name));
            }
        }

        "RECENT" => {
            if let Some(mbox) = conn.target_mailbox_mut() {
                mbox.recent = num;
                let name = mbox.name.clone();
                conn.push_event(EngineEvent::MailboxUpdated(name));
            }
        }

        "EXPUNGE" => {
            let index = index_from(num)?;
            if let Some(mbox) = conn.target_mailbox_mut() {
                let uid = mbox.expunge(index).and_then(|m| m.uid);
                let name = mbox.name.clone();
                conn.push_event(EngineEvent::MessageDeleted { mailbox: name, uid });
            }
        }

        "FETCH" => {
            let index = index_from(num)?;
            let args = parse_args(rest)?;
            let Some(items) = args.first().and_then(ImapArg::as_list) else {
                return Err(Error::Protocol("FETCH without attribute list".to_string()));
            };
            if let Some(mbox) = conn.target_mailbox_mut() {
                let msg = mbox.message_mut(index);
                merge_fetch(msg, items);
                // Unsolicited flag changes carry no UID; a record is only
                // populated once a full fetch for it has been merged.
                if msg.uid.is_some() {
                    msg.populated = true;
                }
                msg.fetching = false;
                let name = mbox.name.clone();
                conn.push_event(EngineEvent::MessageUpdated {
                    mailbox: name,
                    index,
                });
            }
        }

        other => {
            tracing::debug!(word = other, num, "dropping unknown message data");
        }
    }

    Ok(())
}

/// Handles `* LIST (flags) delimiter name`, upserting a mailbox by name.
fn handle_list<S>(conn: &mut Connection<S>, args: &[ImapArg]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let flags = flag_list(args.first());
    // args[1] is the hierarchy delimiter, unused by the model.
    let Some(name) = args.get(2).and_then(ImapArg::as_str) else {
        return Err(Error::Protocol("LIST without mailbox name".to_string()));
    };

    let name = name.to_string();
    let mbox = conn.mailbox_mut(&name);
    mbox.flags = flags;
    conn.push_event(EngineEvent::MailboxUpdated(name));
    Ok(())
}

/// Extracts a flag list from a parenthesised argument.
fn flag_list(arg: Option<&ImapArg>) -> Vec<String> {
    arg.and_then(ImapArg::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(ImapArg::as_atom)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Converts a server sequence number to a message index.
fn index_from(num: i64) -> Result<u32> {
    u32::try_from(num)
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| Error::Protocol(format!("invalid sequence number {num}")))
}
