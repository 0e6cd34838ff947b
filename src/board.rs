//! The note writer: the conversational flow for composing a board
//! note (recipients, subject, expiry, body, finish menu).
//!
//! Storage and delivery of posted notes belong to the game; the core
//! only drives the states and hands the finished draft over.

use jiff::{Timestamp, ToSpan};
use serde::{Deserialize, Serialize};

use crate::session::ConnState;

/// Longest accepted subject line.
pub const MAX_SUBJECT: usize = 60;
/// Longest accepted body line.
pub const MAX_NOTE_LINE: usize = 80;

/// The finish-menu prompt, shown whenever the body is terminated.
pub const FINISH_PROMPT: &str = "(C)ontinue, (V)iew, (P)ost or (F)orget it?";

/// A note under construction. Finished notes serialize as-is, so the
/// game can keep its board as a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteDraft {
    pub sender: String,
    pub to_list: String,
    pub subject: String,
    pub expire: Option<Timestamp>,
    pub text: String,
}

/// What one line of input did to the note flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteStep {
    /// Send this message, stay in the current state
    Stay(String),
    /// Send this message and move to the given state
    Goto(ConnState, String),
    /// The draft is complete; post it and return to play
    Post(String),
    /// Throw the draft away and return to play
    Discard(String),
}

/// Tildes act as field terminators in the storage format, so they are
/// flattened before a field is kept.
fn smash_tilde(s: &str) -> String {
    s.replace('~', "-")
}

fn body_header() -> String {
    "\n\rEnter text. Type #7~#n or #7END#n on an empty line to end note.\n\r\
     =======================================================\n\r"
        .to_string()
}

/// Recipient entry. An empty line falls back to the default recipient
/// list for the board.
pub fn handle_note_to(draft: &mut NoteDraft, line: &str, default_to: &str) -> NoteStep {
    let entered = smash_tilde(line.trim());

    if entered.is_empty() {
        draft.to_list = default_to.to_string();
        return NoteStep::Goto(
            ConnState::NoteSubject,
            format!(
                "Assumed default recipient: #7{}#n\n\r\n\r#y Subject#n: ",
                default_to
            ),
        );
    }

    draft.to_list = entered;
    NoteStep::Goto(ConnState::NoteSubject, "\n\r#ySubject#n: ".to_string())
}

/// Subject entry. Privileged writers go on to choose an expiry; the
/// default path stamps the board's purge interval.
pub fn handle_note_subject(
    draft: &mut NoteDraft,
    line: &str,
    privileged: bool,
    purge_days: i64,
    now: Timestamp,
) -> NoteStep {
    let entered = smash_tilde(line.trim());

    if entered.is_empty() {
        return NoteStep::Stay(
            "Please find a meaningful subject!\n\r#ySubject#n: ".to_string(),
        );
    }
    if entered.len() > MAX_SUBJECT {
        return NoteStep::Stay(
            "No, no. This is just the subject. You're not writing the note yet.\n\r#ySubject#n: "
                .to_string(),
        );
    }

    draft.subject = entered;

    if privileged {
        return NoteStep::Goto(
            ConnState::NoteExpire,
            format!(
                "\n\rHow many days do you want this note to expire in?\n\r\
                 Press Enter for default value for this board, #7{}#n days.\n\r#yExpire#n:  ",
                purge_days
            ),
        );
    }

    draft.expire = expire_in(now, purge_days);
    NoteStep::Goto(ConnState::NoteText, body_header())
}

/// Explicit expiry entry (privileged path only).
pub fn handle_note_expire(
    draft: &mut NoteDraft,
    line: &str,
    purge_days: i64,
    now: Timestamp,
) -> NoteStep {
    let entered = line.trim();

    let days = if entered.is_empty() {
        purge_days
    } else {
        match entered.parse::<i64>() {
            Ok(days) if days > 0 => days,
            Ok(_) => {
                return NoteStep::Stay(
                    "Use positive numbers only!\n\r#yExpire#n:  ".to_string(),
                );
            }
            Err(_) => {
                return NoteStep::Stay(
                    "Write the number of days!\n\r#yExpire#n:  ".to_string(),
                );
            }
        }
    };

    draft.expire = expire_in(now, days);
    NoteStep::Goto(ConnState::NoteText, body_header())
}

/// Body accumulation. `~` or `END` alone terminates; overlong lines
/// are rejected; a draft past `max_lines` is dropped entirely.
pub fn handle_note_text(draft: &mut NoteDraft, line: &str, max_lines: usize) -> NoteStep {
    let trimmed = line.trim();

    if trimmed == "~" || trimmed.eq_ignore_ascii_case("END") {
        return NoteStep::Goto(
            ConnState::NoteFinish,
            format!("\n\r\n\r{}\n\r", FINISH_PROMPT),
        );
    }

    let entered = smash_tilde(line.trim_end());

    if entered.len() > MAX_NOTE_LINE {
        return NoteStep::Stay(
            "Too long line rejected. Do NOT go over 80 characters!\n\r".to_string(),
        );
    }

    if draft.text.lines().count() >= max_lines {
        draft.text.clear();
        return NoteStep::Discard("Note too long!\n\r".to_string());
    }

    draft.text.push_str(&entered);
    draft.text.push_str("\r\n");
    NoteStep::Stay(String::new())
}

/// The finish menu: Continue, View, Post or Forget.
pub fn handle_note_finish(draft: &mut NoteDraft, line: &str) -> NoteStep {
    match line.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('c') => NoteStep::Goto(ConnState::NoteText, "Continuing note...\n\r".to_string()),
        Some('v') => {
            let mut msg = String::new();
            if draft.text.is_empty() {
                msg.push_str("You haven't written a thing!\n\r\n\r");
            } else {
                msg.push_str("#gText of your note so far:#n\n\r");
                msg.push_str(&draft.text.replace("\r\n", "\n\r"));
            }
            msg.push_str(&format!("{}\n\r", FINISH_PROMPT));
            NoteStep::Stay(msg)
        }
        Some('p') => NoteStep::Post("Note posted.\n\r".to_string()),
        Some('f') => NoteStep::Discard("Note cancelled!\n\r".to_string()),
        _ => NoteStep::Stay(format!(
            "Huh? Valid answers are:\n\r\n\r{}\n\r",
            FINISH_PROMPT
        )),
    }
}

fn expire_in(now: Timestamp, days: i64) -> Option<Timestamp> {
    now.checked_add((days * 24).hours()).ok()
}
