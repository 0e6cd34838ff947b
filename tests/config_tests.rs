//! Configuration registry persistence against a real file.

use duskmud::config::{CfgKey, ConfigRegistry, Settings};

#[test]
fn overrides_survive_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.dat");

    let mut reg = ConfigRegistry::new();
    reg.load(&path).unwrap();

    let idx = reg.index_of("combat.damage_cap").unwrap();
    reg.set_by_index(idx, 45000);
    // set_by_index persists; a fresh registry sees the override
    let mut fresh = ConfigRegistry::new();
    fresh.load(&path).unwrap();
    assert_eq!(fresh.get(CfgKey::CombatDamageCap), 45000);
    // Untouched keys stay at their defaults
    assert_eq!(
        fresh.get(CfgKey::PulsePerSecond),
        fresh.default_of(CfgKey::PulsePerSecond)
    );
}

#[test]
fn set_then_reset_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.dat");

    let mut reg = ConfigRegistry::new();
    reg.load(&path).unwrap();

    let idx = reg.index_of("board.purge_days").unwrap();
    let original = reg.get(CfgKey::BoardPurgeDays);

    reg.set_by_index(idx, 99);
    reg.reset_by_index(idx);

    let mut fresh = ConfigRegistry::new();
    fresh.load(&path).unwrap();
    assert_eq!(fresh.get(CfgKey::BoardPurgeDays), original);
}

#[test]
fn reload_discards_runtime_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.dat");

    let mut reg = ConfigRegistry::new();
    reg.load(&path).unwrap();
    let idx = reg.index_of("economy.shop_markup").unwrap();
    reg.set_by_index(idx, 200);
    reg.save().unwrap();

    // Another change in memory only (simulate by editing then not saving)
    let entry_value = |r: &ConfigRegistry| r.get_by_name("economy.shop_markup").unwrap();
    assert_eq!(entry_value(&reg), 200);

    reg.reload().unwrap();
    assert_eq!(entry_value(&reg), 200, "saved override comes back");
}

#[test]
fn malformed_values_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.dat");
    std::fs::write(&path, "combat.damage_cap = not_a_number\n").unwrap();

    let mut reg = ConfigRegistry::new();
    assert!(reg.load(&path).is_err());
}

#[test]
fn unknown_keys_are_ignored_with_known_ones_applied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.dat");
    std::fs::write(
        &path,
        "# comment line\nsome.future.key = 5\ncore.pulse_per_second = 8\n",
    )
    .unwrap();

    let mut reg = ConfigRegistry::new();
    reg.load(&path).unwrap();
    assert_eq!(reg.get(CfgKey::PulsePerSecond), 8);
}

#[test]
fn settings_file_parsing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("duskmud.conf");
    std::fs::write(
        &path,
        r#"# server identity
[game]
game_name = "Nightfall"
gui_url = "https://example.net/ui.mpackage"
gui_version = "2.1"
media_url = "https://example.net/media/"
"#,
    )
    .unwrap();

    let settings = Settings::load_from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(settings.game_name, "Nightfall");
    assert_eq!(settings.gui_url, "https://example.net/ui.mpackage");
    assert_eq!(settings.gui_version, "2.1");
    assert_eq!(settings.media_url, "https://example.net/media/");
}
