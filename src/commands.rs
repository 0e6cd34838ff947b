//! Core-owned admin commands: `protocols` and `cfg`.
//!
//! These are the two command surfaces the connection core provides to
//! the interpreter. `protocols` reports the per-connection negotiation
//! results; `cfg` operates on the configuration registry by dotted
//! name.

use crate::server::{Server, SessionId};
use crate::session::Session;

/// Visible width of a markup string: what survives rendering with
/// color stripped.
fn visible_len(markup: &str) -> usize {
    let bytes = markup.as_bytes();
    let mut len = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'#' {
            len += 1;
            i += 1;
            continue;
        }
        i += 1;
        if i >= bytes.len() {
            break;
        }
        match bytes[i] {
            b'#' | b'-' | b'+' | b'<' | b'>' => {
                len += 1;
                i += 1;
            }
            b'x' => {
                i += 1;
                if bytes.len() - i >= 3
                    && bytes[i].is_ascii_digit()
                    && bytes[i + 1].is_ascii_digit()
                    && bytes[i + 2].is_ascii_digit()
                {
                    i += 3;
                }
            }
            _ => i += 1,
        }
    }
    len
}

fn pad_visible(markup: &str, width: usize) -> String {
    let mut out = markup.to_string();
    for _ in visible_len(markup)..width {
        out.push(' ');
    }
    out
}

/// One (name, description, status) row of the protocols table.
fn protocol_rows(sess: &Session) -> Vec<(String, String, String)> {
    let mut rows = Vec::with_capacity(7);

    let mccp = match &sess.compress {
        Some(cs) => format!("#GOn ({})#n", cs.version()),
        None => "#rOff#n".to_string(),
    };
    rows.push(("#yMCCP#n".to_string(), "Compression".to_string(), mccp));

    let gmcp = if sess.gmcp_on {
        format!(
            "#GOn#n ({})",
            crate::gmcp::package_names(sess.gmcp_packages).join(" ")
        )
    } else {
        "#rOff#n".to_string()
    };
    rows.push(("#yGMCP#n".to_string(), "Data Channel".to_string(), gmcp));

    let mcmp = if crate::mcmp::enabled(sess) {
        "#GOn#n".to_string()
    } else {
        "#rOff#n".to_string()
    };
    rows.push(("#yMCMP#n".to_string(), "Client.Media".to_string(), mcmp));

    let mxp = if sess.mxp_on {
        "#GOn#n".to_string()
    } else {
        "#rOff#n".to_string()
    };
    rows.push(("#yMXP#n".to_string(), "Extensions".to_string(), mxp));

    rows.push((
        "#yMSSP#n".to_string(),
        "Server Status".to_string(),
        "#yAvail#n".to_string(),
    ));

    let naws = if sess.naws_on {
        format!("#GOn#n ({}x{})", sess.window.width, sess.window.height)
    } else {
        "#rOff#n".to_string()
    };
    rows.push(("#yNAWS#n".to_string(), "Window Size".to_string(), naws));

    let ttype = if sess.ttype_on {
        let name = if sess.client_name.is_empty() {
            "?"
        } else {
            &sess.client_name
        };
        format!("#GOn#n ({})", name)
    } else {
        "#rOff#n".to_string()
    };
    rows.push(("#yTTYPE#n".to_string(), "Terminal Type".to_string(), ttype));

    rows
}

/// Render the rows as a bordered table centered in the terminal.
fn render_table(rows: &[(String, String, String)], term_width: usize) -> String {
    let title = "#CMUD Protocol Status#n";

    let max_name = rows.iter().map(|r| visible_len(&r.0)).max().unwrap_or(0);
    let max_desc = rows.iter().map(|r| visible_len(&r.1)).max().unwrap_or(0);
    let max_status = rows.iter().map(|r| visible_len(&r.2)).max().unwrap_or(0);

    let mut inner = 2 + max_name + 2 + max_desc + 3 + max_status + 2;
    let title_visible = visible_len(title);
    if inner < title_visible + 4 {
        inner = title_visible + 4;
    }

    let outer = inner + 2;
    let left_pad = term_width.saturating_sub(outer) / 2;
    let margin = " ".repeat(left_pad);
    let border = format!("+{}+", "-".repeat(inner));

    let title_left = (inner - title_visible) / 2;
    let title_right = inner - title_visible - title_left;

    let mut out = String::new();
    out.push_str(&format!("{}#7{}#n\n\r", margin, border));
    out.push_str(&format!(
        "{}#7|#n{}{}{}#7|#n\n\r",
        margin,
        " ".repeat(title_left),
        title,
        " ".repeat(title_right)
    ));
    out.push_str(&format!("{}#7{}#n\n\r", margin, border));

    let status_width = inner - 2 - max_name - 2 - max_desc - 3 - 2;
    for (name, desc, status) in rows {
        out.push_str(&format!(
            "{}#7|#n  {}  {}   {}  #7|#n\n\r",
            margin,
            pad_visible(name, max_name),
            pad_visible(desc, max_desc),
            pad_visible(status, status_width),
        ));
    }

    out.push_str(&format!("{}#7{}#n\n\r", margin, border));
    out
}

/// The `protocols` command: per-connection protocol status.
pub fn do_protocols(server: &mut Server, sid: SessionId) {
    let text = match server.session(sid) {
        Some(sess) => {
            let rows = protocol_rows(sess);
            let width = sess.window.layout_width() as usize;
            render_table(&rows, width)
        }
        None => return,
    };
    server.send_to_session(sid, &text);
}

fn category_prefix(key: &str) -> &str {
    key.split('.').next().unwrap_or(key)
}

/// The `cfg` command:
/// `cfg` | `cfg <prefix>` | `cfg <key> <value>` | `cfg reset <key>` |
/// `cfg defaults` | `cfg reload`
pub fn do_cfg(server: &mut Server, sid: SessionId, argument: &str) {
    let mut parts = argument.split_whitespace();
    let arg = parts.next().unwrap_or("");
    let arg2 = parts.next().unwrap_or("");

    // No args: category summary
    if arg.is_empty() {
        let entries = server.config.entries();
        let mut out = format!(
            "#yGame Configuration#n  ({} total entries)\n\r#y---------------------------------------------#n\n\r",
            entries.len()
        );
        let mut last_cat = "";
        let mut cat_count = 0;
        let mut total_cats = 0;
        for e in entries {
            let cat = category_prefix(e.key);
            if cat != last_cat {
                if !last_cat.is_empty() {
                    out.push_str(&format!("  #g{:<20}#n  {} entries\n\r", last_cat, cat_count));
                    total_cats += 1;
                }
                last_cat = cat;
                cat_count = 1;
            } else {
                cat_count += 1;
            }
        }
        if !last_cat.is_empty() {
            out.push_str(&format!("  #g{:<20}#n  {} entries\n\r", last_cat, cat_count));
            total_cats += 1;
        }
        out.push_str(&format!(
            "#y---------------------------------------------#n\n\r\
             {} categories.  Use #ycfg <prefix>#n for details.\n\r\
             #ycfg <key> <value>#n to modify.  #ycfg reload#n to reload from disk.\n\r",
            total_cats
        ));
        server.send_to_session(sid, &out);
        return;
    }

    if arg == "reload" {
        match server.config.reload() {
            Ok(()) => server.send_to_session(sid, "Configuration reloaded from disk.\n\r"),
            Err(e) => server.send_to_session(sid, &format!("Reload failed: {}\n\r", e)),
        }
        return;
    }

    if arg == "defaults" {
        server.config.reset_all();
        if let Err(e) = server.config.save() {
            tracing::warn!(error = %e, "config save failed");
        }
        server.send_to_session(sid, "All config values reset to defaults.\n\r");
        return;
    }

    if arg == "reset" {
        if arg2.is_empty() {
            server.send_to_session(sid, "Reset which key?  Usage: cfg reset <key>\n\r");
            return;
        }
        let Some(index) = server.config.index_of(arg2) else {
            server.send_to_session(sid, "Unknown config key.\n\r");
            return;
        };
        server.config.reset_by_index(index);
        let entry = server.config.entry(index).map(|e| (e.key, e.default));
        if let Some((key, default)) = entry {
            server.send_to_session(
                sid,
                &format!("Reset #g{}#n to default: #y{}#n\n\r", key, default),
            );
        }
        return;
    }

    // `cfg <key> <value>`
    if !arg2.is_empty() {
        let Some(index) = server.config.index_of(arg) else {
            server.send_to_session(sid, "Unknown config key.\n\r");
            return;
        };
        let Ok(value) = arg2.parse::<i64>() else {
            server.send_to_session(sid, "Values are plain integers.\n\r");
            return;
        };
        server.config.set_by_index(index, value);
        let entry = server
            .config
            .entry(index)
            .map(|e| (e.key, e.value, e.default));
        if let Some((key, value, default)) = entry {
            server.send_to_session(
                sid,
                &format!("Set #g{}#n = #y{}#n (default: {})\n\r", key, value, default),
            );
        }
        return;
    }

    // `cfg <prefix>`: matching entries
    let matches: Vec<(String, i64, i64)> = server
        .config
        .entries()
        .iter()
        .filter(|e| e.key.starts_with(arg))
        .map(|e| (e.key.to_string(), e.value, e.default))
        .collect();

    if matches.is_empty() {
        server.send_to_session(sid, "No matching config keys found.\n\r");
        return;
    }

    let mut out = String::new();
    for (key, value, default) in &matches {
        let modified = if value != default { " #r*#n" } else { "" };
        out.push_str(&format!(
            "  #g{:<40}#n  #y{}#n  (default: {}){}\n\r",
            key, value, default, modified
        ));
    }
    out.push_str(&format!("#y--- {} matching entries ---#n\n\r", matches.len()));
    server.page_to_session(sid, &out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_len_strips_codes() {
        assert_eq!(visible_len("#yMCCP#n"), 4);
        assert_eq!(visible_len("plain"), 5);
        assert_eq!(visible_len("##"), 1);
        assert_eq!(visible_len("#x123ab"), 2);
        assert_eq!(visible_len("#GOn#n (120x40)"), 11);
    }

    #[test]
    fn pad_visible_accounts_for_markup() {
        let padded = pad_visible("#yMXP#n", 6);
        assert_eq!(visible_len(&padded), 6);
    }

    #[test]
    fn table_lines_align() {
        let rows = vec![
            ("#yMCCP#n".to_string(), "Compression".to_string(), "#rOff#n".to_string()),
            ("#yNAWS#n".to_string(), "Window Size".to_string(), "#GOn#n (120x40)".to_string()),
        ];
        let table = render_table(&rows, 80);
        let widths: Vec<usize> = table
            .lines()
            .map(|l| l.trim_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(visible_len)
            .collect();
        // Every rendered line of the box has the same visible width
        let first = widths[0] ;
        assert!(widths.iter().all(|&w| w == first), "{:?}", widths);
    }

    #[test]
    fn category_prefix_extraction() {
        assert_eq!(category_prefix("combat.damage_cap"), "combat");
        assert_eq!(category_prefix("core.pulse_per_second"), "core");
        assert_eq!(category_prefix("flat"), "flat");
    }
}
