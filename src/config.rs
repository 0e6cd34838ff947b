use crate::errors::ConfigError;

use std::fs;
use std::path::{Path, PathBuf};

/// Generates the configuration key enum and the matching fixed-order
/// defaults table. The enum variant is the internal O(1) index; the
/// dotted name is the stable external identifier used by the `cfg`
/// admin command and the on-disk file.
macro_rules! cfg_entries {
    ($(($variant:ident, $key:literal, $default:literal)),* $(,)?) => {
        /// Type-safe configuration keys, in table order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(usize)]
        pub enum CfgKey {
            $($variant),*
        }

        const CFG_DEFS: &[(&str, i64)] = &[
            $(($key, $default)),*
        ];
    };
}

cfg_entries![
    // Core scheduling
    (PulsePerSecond, "core.pulse_per_second", 4),
    (TickMultiplier, "core.tick_multiplier", 1),
    (IdleWarnPulses, "core.idle_warn_pulses", 2400),
    (IdleClosePulses, "core.idle_close_pulses", 3000),
    (MaxDnsWorkers, "core.max_dns_workers", 50),
    (SlowPulseLimit, "core.slow_pulse_limit", 30),
    // Board / note writing
    (BoardPurgeDays, "board.purge_days", 14),
    (BoardMaxNoteLines, "board.max_note_lines", 200),
    // Game-owned knobs; the server only stores and serves them
    (CombatDamageCap, "combat.damage_cap", 30000),
    (CombatDeathPenalty, "combat.death_penalty", 10),
    (ProgressionXpMultiplier, "progression.xp_multiplier", 100),
    (ProgressionTrainCost, "progression.train_cost", 2000),
    (EconomyShopMarkup, "economy.shop_markup", 120),
    (EconomyRepairCost, "economy.repair_cost", 50),
];

/// Number of registered configuration entries.
pub const CFG_COUNT: usize = CFG_DEFS.len();

/// One `(dotted-name, current, default)` triple.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub key: &'static str,
    pub value: i64,
    pub default: i64,
}

/// Ordered set of named integer knobs with defaults and persistence.
///
/// Defaults are baked into the table at construction; `load` layers
/// file overrides on top. Lookup by enum is the fast path; lookup by
/// dotted name is a linear scan reserved for the admin surface.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    entries: Vec<ConfigEntry>,
    path: Option<PathBuf>,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self {
            entries: CFG_DEFS
                .iter()
                .map(|&(key, default)| ConfigEntry {
                    key,
                    value: default,
                    default,
                })
                .collect(),
            path: None,
        }
    }

    /// O(1) lookup by enum key.
    pub fn get(&self, key: CfgKey) -> i64 {
        self.entries[key as usize].value
    }

    pub fn default_of(&self, key: CfgKey) -> i64 {
        self.entries[key as usize].default
    }

    /// Linear-scan lookup by dotted name (admin-only use).
    pub fn get_by_name(&self, name: &str) -> Option<i64> {
        self.index_of(name).map(|i| self.entries[i].value)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == name)
    }

    pub fn entry(&self, index: usize) -> Option<&ConfigEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn set(&mut self, key: CfgKey, value: i64) {
        self.set_by_index(key as usize, value);
    }

    /// Set by table index and persist.
    pub fn set_by_index(&mut self, index: usize, value: i64) {
        if let Some(e) = self.entries.get_mut(index) {
            e.value = value;
        }
        self.persist();
    }

    pub fn reset_by_index(&mut self, index: usize) {
        if let Some(e) = self.entries.get_mut(index) {
            e.value = e.default;
        }
        self.persist();
    }

    /// Restore every entry to its compile-time default.
    pub fn reset_all(&mut self) {
        for e in &mut self.entries {
            e.value = e.default;
        }
    }

    /// Load overrides from `path`, creating nothing if the file is
    /// absent. Unknown keys are reported, known keys override the
    /// baked-in defaults.
    pub fn load(&mut self, path: &Path) -> Result<(), ConfigError> {
        self.path = Some(path.to_path_buf());

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Ok(()), // first boot: defaults only
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(eq) = line.find('=') else { continue };
            let key = line[..eq].trim();
            let value = line[eq + 1..].trim();

            match self.index_of(key) {
                Some(i) => {
                    let parsed: i64 = value.parse().map_err(|_| {
                        ConfigError::InvalidValue(key.to_string(), value.to_string())
                    })?;
                    self.entries[i].value = parsed;
                }
                None => {
                    tracing::warn!(key, "ignoring unknown config key");
                }
            }
        }

        Ok(())
    }

    /// Reload from the backing file over fresh defaults.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        self.reset_all();
        if let Some(path) = self.path.clone() {
            self.load(&path)?;
        }
        Ok(())
    }

    /// Write every entry back to the backing file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut out = String::from("# Configuration overrides. One `key = value` per line.\n");
        for e in &self.entries {
            out.push_str(&format!("{} = {}\n", e.key, e.value));
        }

        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        fs::write(path, out).map_err(|e| ConfigError::Io(e.to_string()))
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "config save failed");
        }
    }
}

/// Server identity and static strings, loaded from `duskmud.conf`.
///
/// These are the knobs that are not plain integers: names, URLs and the
/// data directory. Missing file means defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub game_name: String,
    pub data_dir: String,
    /// Downloadable client UI package, advertised over the messaging
    /// sidechannel when set.
    pub gui_url: String,
    pub gui_version: String,
    /// Base URL that media cue filenames are resolved against.
    pub media_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            game_name: "Duskhaven".to_string(),
            data_dir: "data".to_string(),
            gui_url: String::new(),
            gui_version: "1.0".to_string(),
            media_url: String::new(),
        }
    }
}

impl Settings {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Ok(settings),
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            let Some(eq) = line.find('=') else { continue };
            let key = line[..eq].trim();
            let value = line[eq + 1..].trim().trim_matches('"');

            match key {
                "game_name" => settings.game_name = value.to_string(),
                "data_dir" => settings.data_dir = value.to_string(),
                "gui_url" => settings.gui_url = value.to_string(),
                "gui_version" => settings.gui_version = value.to_string(),
                "media_url" => settings.media_url = value.to_string(),
                _ => return Err(ConfigError::UnknownKey(key.to_string())),
            }
        }

        Ok(settings)
    }

    /// Path of the integer-registry overrides file.
    pub fn cfg_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("cfg.dat")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_in_table_order() {
        let reg = ConfigRegistry::new();
        assert_eq!(reg.get(CfgKey::PulsePerSecond), 4);
        assert_eq!(reg.get(CfgKey::TickMultiplier), 1);
        assert_eq!(reg.entries().len(), CFG_COUNT);
        assert_eq!(reg.entries()[0].key, "core.pulse_per_second");
    }

    #[test]
    fn enum_index_matches_name_scan() {
        let reg = ConfigRegistry::new();
        for (i, e) in reg.entries().iter().enumerate() {
            assert_eq!(reg.index_of(e.key), Some(i));
        }
    }

    #[test]
    fn set_then_reset_restores_default() {
        let mut reg = ConfigRegistry::new();
        let idx = reg.index_of("combat.damage_cap").unwrap();

        reg.set_by_index(idx, 12345);
        assert_eq!(reg.get(CfgKey::CombatDamageCap), 12345);

        reg.reset_by_index(idx);
        assert_eq!(
            reg.get(CfgKey::CombatDamageCap),
            reg.default_of(CfgKey::CombatDamageCap)
        );
    }

    #[test]
    fn reset_all_restores_every_default() {
        let mut reg = ConfigRegistry::new();
        reg.set(CfgKey::BoardPurgeDays, 99);
        reg.set(CfgKey::EconomyShopMarkup, 7);
        reg.reset_all();
        for e in reg.entries() {
            assert_eq!(e.value, e.default);
        }
    }

    #[test]
    fn unknown_name_lookup_fails() {
        let reg = ConfigRegistry::new();
        assert!(reg.get_by_name("no.such.key").is_none());
        assert!(reg.index_of("combat").is_none());
    }

    #[test]
    fn load_ignores_missing_file() {
        let mut reg = ConfigRegistry::new();
        assert!(reg.load(Path::new("/nonexistent/cfg.dat")).is_ok());
        assert_eq!(reg.get(CfgKey::PulsePerSecond), 4);
    }

    #[test]
    fn settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.game_name, "Duskhaven");
        assert!(s.gui_url.is_empty());
    }
}
