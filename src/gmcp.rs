//! GMCP - the structured-messaging sidechannel (telnet option 201).
//!
//! Wire format: `IAC SB 201 <Package.Name> <json> IAC SE`. Package
//! names are dotted ASCII and case-sensitive; payloads are JSON. The
//! server owns the `Core.*` namespace and the convenience emitters;
//! every other inbound package is forwarded to the game untouched.
//!
//! Before any structured message leaves, pending rendered text is
//! flushed to the wire so that the text describing an event always
//! reaches the client ahead of the event's out-of-band data.

use serde_json::{Value, json};
use telnet_negotiation::TelnetOption;
use telnet_negotiation::protocol::subnegotiate;

use crate::config::Settings;
use crate::errors::MudResult;
use crate::hooks::{CharInfo, CharStatus, RoomInfo, Vitals};
use crate::mcmp;
use crate::session::Session;

/// Package capability bits, grouped per dotted namespace.
pub const PKG_CORE: u32 = 1 << 0;
pub const PKG_CHAR: u32 = 1 << 1;
pub const PKG_CHAR_VITALS: u32 = 1 << 2;
pub const PKG_CHAR_STATUS: u32 = 1 << 3;
pub const PKG_CHAR_INFO: u32 = 1 << 4;
pub const PKG_CLIENT_MEDIA: u32 = 1 << 5;
pub const PKG_ROOM_INFO: u32 = 1 << 6;

/// Mask enabled by default as soon as the option is negotiated.
pub const PKG_DEFAULT: u32 =
    PKG_CORE | PKG_CHAR | PKG_CHAR_VITALS | PKG_CHAR_STATUS | PKG_CHAR_INFO;

/// Outcome of an inbound GMCP subnegotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A `Core.*` package the server consumed
    Handled,
    /// Anything else: handed to the game callback unaltered
    Forward { package: String, payload: String },
}

/// Map one advertised capability token ("Pkg.Name 1") to its bits.
/// The version suffix after the first space is ignored.
pub fn parse_package_support(token: &str) -> u32 {
    let name = token
        .trim_start_matches(['"', '[', ' '])
        .split(' ')
        .next()
        .unwrap_or("");

    if name.starts_with("Char.Vitals") {
        PKG_CHAR_VITALS | PKG_CHAR
    } else if name.starts_with("Char.Status") {
        PKG_CHAR_STATUS | PKG_CHAR
    } else if name.starts_with("Char.Info") {
        PKG_CHAR_INFO | PKG_CHAR
    } else if name.starts_with("Char") {
        PKG_CHAR | PKG_CHAR_VITALS | PKG_CHAR_STATUS | PKG_CHAR_INFO
    } else if name.starts_with("Client.Media") {
        PKG_CLIENT_MEDIA
    } else if name.starts_with("Room") {
        PKG_ROOM_INFO
    } else if name.starts_with("Core") {
        PKG_CORE
    } else {
        0
    }
}

/// Labels of the packages set in a mask, for the status display.
pub fn package_names(mask: u32) -> Vec<&'static str> {
    let mut names = Vec::new();
    for (bit, name) in [
        (PKG_CORE, "Core"),
        (PKG_CHAR, "Char"),
        (PKG_CHAR_VITALS, "Char.Vitals"),
        (PKG_CHAR_STATUS, "Char.Status"),
        (PKG_CHAR_INFO, "Char.Info"),
        (PKG_CLIENT_MEDIA, "Client.Media"),
        (PKG_ROOM_INFO, "Room.Info"),
    ] {
        if mask & bit != 0 {
            names.push(name);
        }
    }
    names
}

/// Frame one package + payload as a telnet subnegotiation.
pub fn frame(package: &str, payload: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(package.len() + payload.len() + 1);
    body.extend_from_slice(package.as_bytes());
    if !payload.is_empty() {
        body.push(b' ');
        body.extend_from_slice(payload.as_bytes());
    }
    subnegotiate(TelnetOption::Gmcp.to_byte(), &body)
}

/// Send one structured message, flushing pending text first so event
/// ordering survives on the wire.
pub fn send(session: &mut Session, package: &str, payload: &str) -> MudResult<()> {
    if !session.gmcp_on {
        return Ok(());
    }
    session.flush_output()?;
    session.write_raw_now(&frame(package, payload))
}

/// The option was just negotiated: set the default capability mask and
/// introduce ourselves.
pub fn init(session: &mut Session, settings: &Settings) -> MudResult<()> {
    session.gmcp_on = true;
    session.gmcp_packages = PKG_DEFAULT;

    let hello = json!({
        "name": settings.game_name,
        "version": env!("CARGO_PKG_VERSION"),
    });
    send(session, "Core.Hello", &hello.to_string())?;
    send_gui(session, settings)
}

/// `Client.GUI`: downloadable UI package advertisement. Skipped when no
/// URL is configured.
pub fn send_gui(session: &mut Session, settings: &Settings) -> MudResult<()> {
    if settings.gui_url.is_empty() {
        return Ok(());
    }
    let payload = json!({
        "version": settings.gui_version,
        "url": settings.gui_url,
    });
    send(session, "Client.GUI", &payload.to_string())
}

pub fn send_vitals(session: &mut Session, v: &Vitals) -> MudResult<()> {
    if session.gmcp_packages & (PKG_CHAR | PKG_CHAR_VITALS) == 0 {
        return Ok(());
    }
    let payload = json!({
        "hp": v.hp,
        "maxhp": v.max_hp,
        "mana": v.mana,
        "maxmana": v.max_mana,
        "move": v.mv,
        "maxmove": v.max_mv,
    });
    send(session, "Char.Vitals", &payload.to_string())
}

pub fn send_status(session: &mut Session, status: &CharStatus) -> MudResult<()> {
    if session.gmcp_packages & (PKG_CHAR | PKG_CHAR_STATUS) == 0 {
        return Ok(());
    }
    let payload = json!({
        "level": status.level,
        "class": status.class_name,
        "position": status.position,
        "exp": status.exp,
    });
    send(session, "Char.Status", &payload.to_string())
}

pub fn send_info(session: &mut Session, info: &CharInfo) -> MudResult<()> {
    if session.gmcp_packages & (PKG_CHAR | PKG_CHAR_INFO) == 0 {
        return Ok(());
    }
    let payload = json!({
        "name": info.name,
        "guild": info.guild,
    });
    send(session, "Char.Info", &payload.to_string())
}

/// `Room.Info` in the conventional shape:
/// `{"num": .., "name": .., "area": .., "terrain": .., "exits": {"n": ..}}`
pub fn send_room_info(session: &mut Session, room: &RoomInfo) -> MudResult<()> {
    if session.gmcp_packages & PKG_ROOM_INFO == 0 {
        return Ok(());
    }
    let mut exits = serde_json::Map::new();
    for (dir, vnum) in &room.exits {
        exits.insert(dir.clone(), Value::from(*vnum));
    }
    let payload = json!({
        "num": room.vnum,
        "name": room.name,
        "area": room.area,
        "terrain": room.terrain,
        "exits": exits,
    });
    send(session, "Room.Info", &payload.to_string())
}

/// Capability tokens out of a `Core.Supports.*` payload: a JSON array
/// of strings when well-formed, a quoted-token scan otherwise.
fn support_tokens(payload: &str) -> Vec<String> {
    if let Ok(tokens) = serde_json::from_str::<Vec<String>>(payload) {
        return tokens;
    }
    // Tolerant fallback: pull out "..." spans
    let mut tokens = Vec::new();
    let mut rest = payload;
    while let Some(start) = rest.find('"') {
        rest = &rest[start + 1..];
        let Some(end) = rest.find('"') else { break };
        tokens.push(rest[..end].to_string());
        rest = &rest[end + 1..];
    }
    tokens
}

fn mask_from_tokens(payload: &str) -> u32 {
    support_tokens(payload)
        .iter()
        .fold(0, |mask, token| mask | parse_package_support(token))
}

/// When `Client.Media` first appears in the mask, the media base URL is
/// advertised exactly once.
fn after_mask_change(session: &mut Session, settings: &Settings, before: u32) -> MudResult<()> {
    let now_on = session.gmcp_packages & PKG_CLIENT_MEDIA != 0;
    let was_on = before & PKG_CLIENT_MEDIA != 0;
    if now_on && !was_on && !session.media_default_sent {
        mcmp::send_default(session, settings)?;
        session.media_default_sent = true;
    }
    Ok(())
}

/// Dispatch one inbound GMCP subnegotiation payload.
pub fn handle_subnegotiation(
    session: &mut Session,
    settings: &Settings,
    data: &[u8],
) -> MudResult<Inbound> {
    let text = String::from_utf8_lossy(data);
    let (package, payload) = match text.find(' ') {
        Some(at) => (&text[..at], text[at + 1..].trim()),
        None => (text.as_ref(), ""),
    };

    match package {
        "Core.Supports.Set" => {
            let before = session.gmcp_packages;
            session.gmcp_packages = PKG_CORE | mask_from_tokens(payload);
            after_mask_change(session, settings, before)?;
            Ok(Inbound::Handled)
        }
        "Core.Supports.Add" => {
            let before = session.gmcp_packages;
            session.gmcp_packages |= mask_from_tokens(payload);
            after_mask_change(session, settings, before)?;
            Ok(Inbound::Handled)
        }
        "Core.Supports.Remove" => {
            session.gmcp_packages &= !mask_from_tokens(payload);
            Ok(Inbound::Handled)
        }
        "Core.Hello" => {
            if let Ok(hello) = serde_json::from_str::<Value>(payload) {
                if let Some(client) = hello.get("client").and_then(Value::as_str) {
                    session.client_name = client.to_string();
                }
            }
            Ok(Inbound::Handled)
        }
        _ => Ok(Inbound::Forward {
            package: package.to_string(),
            payload: payload.to_string(),
        }),
    }
}
