//! Client.Media.* - media cues over the structured-messaging channel.
//!
//! Sounds and music ride the GMCP sidechannel as `Client.Media.*`
//! packages. The client opts in by advertising `Client.Media` in its
//! capability set; the server then announces a base URL once and sends
//! load/play/stop cues whose filenames are relative to it.
//!
//! Unset optional fields are omitted from the JSON entirely, never
//! sent as null.

use serde_json::{Map, Value, json};

use crate::config::Settings;
use crate::errors::MudResult;
use crate::gmcp::{self, PKG_CLIENT_MEDIA};
use crate::session::Session;

/// Media types, controlling client-side mixing.
pub const SOUND: &str = "sound";
pub const MUSIC: &str = "music";

/// Conventional tag categories, used for bulk stop.
pub const TAG_COMBAT: &str = "combat";
pub const TAG_UI: &str = "ui";
pub const TAG_ENVIRONMENT: &str = "environment";
pub const TAG_WEATHER: &str = "weather";
pub const TAG_MOVEMENT: &str = "movement";

/// Whether this session negotiated the media package.
pub fn enabled(session: &Session) -> bool {
    session.gmcp_on && session.gmcp_packages & PKG_CLIENT_MEDIA != 0
}

/// `Client.Media.Default` - the base URL all later filenames resolve
/// against. Sent once, when the capability first appears.
pub fn send_default(session: &mut Session, settings: &Settings) -> MudResult<()> {
    if !enabled(session) || settings.media_url.is_empty() {
        return Ok(());
    }
    let payload = json!({ "url": settings.media_url });
    gmcp::send(session, "Client.Media.Default", &payload.to_string())
}

/// `Client.Media.Load` - preload a file for instant playback later.
pub fn send_load(session: &mut Session, name: &str) -> MudResult<()> {
    if !enabled(session) {
        return Ok(());
    }
    let payload = json!({ "name": name });
    gmcp::send(session, "Client.Media.Load", &payload.to_string())
}

/// One play cue. `name` is required; everything else is optional and
/// omitted from the wire when unset.
#[derive(Debug, Clone, Default)]
pub struct MediaPlay {
    pub name: String,
    /// "sound" or "music"
    pub media_type: Option<&'static str>,
    pub tag: Option<&'static str>,
    /// 1-100, relative to the client's master volume
    pub volume: Option<i32>,
    /// Repetitions; -1 loops forever
    pub loops: Option<i32>,
    /// 1-100; higher halts lower-priority sounds
    pub priority: Option<i32>,
    /// Cues with the same key replace each other
    pub key: Option<String>,
    /// Keep an already-playing identical file running
    pub continue_playing: bool,
    /// Accessibility caption
    pub caption: Option<String>,
}

impl MediaPlay {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn payload(&self) -> String {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::from(self.name.clone()));
        if let Some(t) = self.media_type {
            map.insert("type".to_string(), Value::from(t));
        }
        if let Some(tag) = self.tag {
            map.insert("tag".to_string(), Value::from(tag));
        }
        if let Some(volume) = self.volume {
            map.insert("volume".to_string(), Value::from(volume));
        }
        if let Some(loops) = self.loops {
            map.insert("loops".to_string(), Value::from(loops));
        }
        if let Some(priority) = self.priority {
            map.insert("priority".to_string(), Value::from(priority));
        }
        if let Some(key) = &self.key {
            map.insert("key".to_string(), Value::from(key.clone()));
        }
        if self.continue_playing {
            map.insert("continue".to_string(), Value::from(true));
        }
        if let Some(caption) = &self.caption {
            map.insert("caption".to_string(), Value::from(caption.clone()));
        }
        Value::Object(map).to_string()
    }
}

/// `Client.Media.Play`.
pub fn send_play(session: &mut Session, play: &MediaPlay) -> MudResult<()> {
    if !enabled(session) {
        return Ok(());
    }
    gmcp::send(session, "Client.Media.Play", &play.payload())
}

/// A stop filter. Omitted fields mean "match any"; an empty filter
/// stops all media.
#[derive(Debug, Clone, Default)]
pub struct MediaStop {
    pub name: Option<String>,
    pub media_type: Option<&'static str>,
    pub tag: Option<&'static str>,
    pub key: Option<String>,
    /// Fade out instead of cutting
    pub fadeaway: bool,
    /// Fade duration in milliseconds
    pub fadeout: Option<i32>,
}

impl MediaStop {
    fn payload(&self) -> String {
        let mut map = Map::new();
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::from(name.clone()));
        }
        if let Some(t) = self.media_type {
            map.insert("type".to_string(), Value::from(t));
        }
        if let Some(tag) = self.tag {
            map.insert("tag".to_string(), Value::from(tag));
        }
        if let Some(key) = &self.key {
            map.insert("key".to_string(), Value::from(key.clone()));
        }
        if self.fadeaway {
            map.insert("fadeaway".to_string(), Value::from(true));
        }
        if let Some(fadeout) = self.fadeout {
            map.insert("fadeout".to_string(), Value::from(fadeout));
        }
        Value::Object(map).to_string()
    }
}

/// `Client.Media.Stop`.
pub fn send_stop(session: &mut Session, stop: &MediaStop) -> MudResult<()> {
    if !enabled(session) {
        return Ok(());
    }
    gmcp::send(session, "Client.Media.Stop", &stop.payload())
}

/// A looping ambient layer: same key across rooms so walking between
/// rooms of the same kind keeps the loop running instead of
/// restarting it.
pub fn ambient_loop(name: &str, caption: &str) -> MediaPlay {
    MediaPlay {
        name: name.to_string(),
        media_type: Some(MUSIC),
        tag: Some(TAG_ENVIRONMENT),
        volume: Some(20),
        loops: Some(-1),
        priority: Some(10),
        key: Some("ambient".to_string()),
        continue_playing: true,
        caption: Some(caption.to_string()),
    }
}

/// A one-shot event sound at the given volume/priority.
pub fn one_shot(name: &str, tag: &'static str, volume: i32, priority: i32, caption: &str) -> MediaPlay {
    MediaPlay {
        name: name.to_string(),
        media_type: Some(SOUND),
        tag: Some(tag),
        volume: Some(volume),
        loops: Some(1),
        priority: Some(priority),
        key: None,
        continue_playing: false,
        caption: Some(caption.to_string()),
    }
}
