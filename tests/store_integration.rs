use lamco_display_config::multimon::{
    ConfigKey, ConfigStore, Configuration, OutputIdentity, OutputSettings, Rect, StoreError,
};
use tempfile::TempDir;

fn laptop_and_monitor(monitor_x: i32) -> Configuration {
    Configuration::new([
        (
            OutputIdentity::new("eDP-1", "AUO", "0x213d", "0x00000000"),
            OutputSettings::enabled(Rect::new(0, 0, 1920, 1080), 60.0).primary(true),
        ),
        (
            OutputIdentity::new("HDMI-1", "DEL", "DELL U2715H", "GH85D5"),
            OutputSettings::enabled(Rect::new(monitor_x, 0, 2560, 1440), 59.951),
        ),
    ])
    .unwrap()
}

fn monitor_only() -> Configuration {
    Configuration::new([(
        OutputIdentity::new("HDMI-1", "DEL", "DELL U2715H", "GH85D5"),
        OutputSettings::enabled(Rect::new(0, 0, 2560, 1440), 59.951).primary(true),
    )])
    .unwrap()
}

#[test]
fn test_save_and_reload() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("monitors.xml");

    let mut store = ConfigStore::new(&path);
    store.insert_or_replace(laptop_and_monitor(1920));
    store.insert_or_replace(monitor_only());
    store.save_blocking().unwrap();

    let mut reloaded = ConfigStore::new(&path);
    assert_eq!(reloaded.load(&[&path]), Some(path.clone()));
    assert_eq!(reloaded.len(), 2);

    let config = laptop_and_monitor(1920);
    let stored = reloaded.lookup(config.key()).unwrap();
    assert!(stored.full_eq(&config));
}

#[test]
fn test_insert_replaces_same_key() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = ConfigStore::new(temp_dir.path().join("monitors.xml"));

    store.insert_or_replace(laptop_and_monitor(1920));
    store.insert_or_replace(laptop_and_monitor(0));

    assert_eq!(store.len(), 1);
    let stored = store.lookup(laptop_and_monitor(0).key()).unwrap();
    assert_eq!(stored.settings()[1].rect.x, 0);
}

#[test]
fn test_lookup_is_order_sensitive() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = ConfigStore::new(temp_dir.path().join("monitors.xml"));
    store.insert_or_replace(laptop_and_monitor(1920));

    let reversed = ConfigKey::new(laptop_and_monitor(1920).identities().iter().rev().cloned().collect());
    assert!(store.lookup(&reversed).is_none());
}

#[test]
fn test_load_falls_through_to_system_file() {
    let temp_dir = TempDir::new().unwrap();
    let user = temp_dir.path().join("user.xml");
    let broken = temp_dir.path().join("broken.xml");
    let system = temp_dir.path().join("system.xml");

    std::fs::write(&broken, "<monitors version=\"1\"><configuration>").unwrap();
    let mut writer = ConfigStore::new(&system);
    writer.insert_or_replace(monitor_only());
    writer.save_blocking().unwrap();

    let mut store = ConfigStore::new(&user);
    assert_eq!(store.load(&[&user, &broken, &system]), Some(system.clone()));
    assert!(store.lookup(monitor_only().key()).is_some());
}

#[test]
fn test_load_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = ConfigStore::new(temp_dir.path().join("monitors.xml"));

    assert_eq!(store.load(&[temp_dir.path().join("absent.xml")]), None);
    assert!(store.is_empty());
}

#[test]
fn test_read_file_reports_parse_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("monitors.xml");
    std::fs::write(&path, "<monitors version=\"2\"></monitors>").unwrap();

    let err = ConfigStore::read_file(&path).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }));
}

#[tokio::test]
async fn test_async_save_superseded() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("monitors.xml");
    let mut store = ConfigStore::new(&path);

    store.insert_or_replace(laptop_and_monitor(1920));
    store.save();
    store.insert_or_replace(monitor_only());
    store.save();
    store.flush().await;

    let saved = ConfigStore::read_file(&path).unwrap();
    assert_eq!(saved.len(), 2);
    let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name != "monitors.xml")
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
}
