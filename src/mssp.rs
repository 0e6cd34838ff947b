//! MSSP - server status replies (telnet option 70).
//!
//! Crawlers and listing sites negotiate `DO MSSP` and receive one
//! subnegotiation of `VAR <name> VAL <value>` pairs describing the
//! server. World-size counters come from the game's status hook; the
//! core contributes identity, uptime and protocol support flags.

use telnet_negotiation::TelnetOption;
use telnet_negotiation::protocol::{MSSP_VAL, MSSP_VAR, subnegotiate};

use crate::config::Settings;
use crate::hooks::StatusCounts;

/// Inputs for one status reply.
pub struct StatusReport<'a> {
    pub settings: &'a Settings,
    pub counts: StatusCounts,
    /// Sessions currently in the playing state
    pub players: usize,
    /// Boot time as a unix timestamp
    pub boot_epoch: i64,
    pub port: u16,
}

fn add_var(buf: &mut Vec<u8>, var: &str, val: &str) {
    buf.push(MSSP_VAR);
    buf.extend_from_slice(var.as_bytes());
    buf.push(MSSP_VAL);
    buf.extend_from_slice(val.as_bytes());
}

/// An extra value for a multi-value variable (GENRE and friends).
fn add_val(buf: &mut Vec<u8>, val: &str) {
    buf.push(MSSP_VAL);
    buf.extend_from_slice(val.as_bytes());
}

/// Build the complete framed reply: `IAC SB 70 <pairs> IAC SE`.
pub fn build_reply(report: &StatusReport) -> Vec<u8> {
    let mut body = Vec::with_capacity(512);

    // Required
    add_var(&mut body, "NAME", &report.settings.game_name);
    add_var(&mut body, "PLAYERS", &report.players.to_string());
    add_var(&mut body, "UPTIME", &report.boot_epoch.to_string());

    // Generic
    add_var(&mut body, "PORT", &report.port.to_string());
    add_var(
        &mut body,
        "CODEBASE",
        concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")),
    );
    add_var(&mut body, "FAMILY", "DikuMUD");
    add_var(&mut body, "LANGUAGE", "English");
    add_var(&mut body, "CREATED", "2026");

    // Categorization
    add_var(&mut body, "GENRE", "Fantasy");
    add_val(&mut body, "Horror");
    add_var(&mut body, "SUBGENRE", "Cyberpunk");
    add_val(&mut body, "Medieval Fantasy");
    add_var(&mut body, "GAMEPLAY", "Hack and Slash");
    add_var(&mut body, "STATUS", "Live");

    // World
    add_var(&mut body, "AREAS", &report.counts.areas.to_string());
    add_var(&mut body, "HELPFILES", &report.counts.help_pages.to_string());
    add_var(&mut body, "MOBILES", &report.counts.mobs.to_string());
    add_var(&mut body, "OBJECTS", &report.counts.objects.to_string());
    add_var(&mut body, "ROOMS", &report.counts.rooms.to_string());

    // Protocol support
    add_var(&mut body, "ANSI", "1");
    add_var(&mut body, "MCCP", "1");
    add_var(&mut body, "GMCP", "1");
    add_var(&mut body, "MCMP", "1");
    add_var(&mut body, "MXP", "1");
    add_var(&mut body, "UTF-8", "0");
    add_var(&mut body, "VT100", "1");
    add_var(&mut body, "XTERM 256 COLORS", "1");

    // Commercial
    add_var(&mut body, "PAY TO PLAY", "0");
    add_var(&mut body, "PAY FOR PERKS", "0");

    subnegotiate(TelnetOption::Mssp.to_byte(), &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let settings = Settings::default();
        build_reply(&StatusReport {
            settings: &settings,
            counts: StatusCounts {
                areas: 42,
                rooms: 1337,
                objects: 900,
                mobs: 450,
                help_pages: 210,
            },
            players: 7,
            boot_epoch: 1_700_000_000,
            port: 8888,
        })
    }

    /// Decode VAR/VAL pairs back out of a framed reply.
    fn pairs(reply: &[u8]) -> Vec<(String, Vec<String>)> {
        let body = &reply[3..reply.len() - 2];
        let mut out: Vec<(String, Vec<String>)> = Vec::new();
        let mut i = 0;
        while i < body.len() {
            assert_eq!(body[i], MSSP_VAR);
            i += 1;
            let var_start = i;
            while i < body.len() && body[i] != MSSP_VAL {
                i += 1;
            }
            let var = String::from_utf8_lossy(&body[var_start..i]).into_owned();
            let mut vals = Vec::new();
            while i < body.len() && body[i] == MSSP_VAL {
                i += 1;
                let val_start = i;
                while i < body.len() && body[i] != MSSP_VAR && body[i] != MSSP_VAL {
                    i += 1;
                }
                vals.push(String::from_utf8_lossy(&body[val_start..i]).into_owned());
            }
            out.push((var, vals));
        }
        out
    }

    #[test]
    fn framed_as_subnegotiation() {
        let reply = sample();
        assert_eq!(&reply[..3], &[255, 250, 70]);
        assert_eq!(&reply[reply.len() - 2..], &[255, 240]);
    }

    #[test]
    fn required_variables_present() {
        let decoded = pairs(&sample());
        let get = |name: &str| {
            decoded
                .iter()
                .find(|(var, _)| var == name)
                .map(|(_, vals)| vals.clone())
                .unwrap_or_default()
        };
        assert_eq!(get("NAME"), vec!["Duskhaven"]);
        assert_eq!(get("PLAYERS"), vec!["7"]);
        assert_eq!(get("UPTIME"), vec!["1700000000"]);
        assert_eq!(get("PORT"), vec!["8888"]);
        assert_eq!(get("ROOMS"), vec!["1337"]);
        assert_eq!(get("AREAS"), vec!["42"]);
        assert_eq!(get("GMCP"), vec!["1"]);
        assert_eq!(get("CREATED"), vec!["2026"]);
    }

    #[test]
    fn genre_is_multi_value() {
        let decoded = pairs(&sample());
        let genre = decoded.iter().find(|(var, _)| var == "GENRE").unwrap();
        assert_eq!(genre.1, vec!["Fantasy", "Horror"]);
        let subgenre = decoded.iter().find(|(var, _)| var == "SUBGENRE").unwrap();
        assert_eq!(subgenre.1, vec!["Cyberpunk", "Medieval Fantasy"]);
    }
}
