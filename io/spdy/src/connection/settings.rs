//! Received-settings storage and connection defaults.

use std::collections::HashMap;

use crate::frame::{
    Setting, SettingId, SettingsFrame, Version, DEFAULT_INITIAL_CLIENT_WINDOW_SIZE,
};

/// The settings most recently received from the peer.
///
/// Values flagged PERSIST_VALUE are kept like any other received value;
/// nothing is written to disk. CLEAR_SETTINGS empties the store before the
/// frame's own entries are applied.
#[derive(Debug, Default)]
pub struct SettingsStore {
    values: HashMap<u32, Setting>,
}

impl SettingsStore {
    pub fn new() -> Self {
        SettingsStore {
            values: HashMap::new(),
        }
    }

    /// Record the contents of a received SETTINGS frame.
    pub fn store(&mut self, frame: &SettingsFrame) {
        if frame.clear_persisted {
            self.values.clear();
        }
        for setting in &frame.settings {
            self.values.insert(setting.id.to_u32(), *setting);
        }
    }

    /// Look up the most recent value for a setting id.
    pub fn get(&self, id: SettingId) -> Option<Setting> {
        self.values.get(&id.to_u32()).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The SETTINGS frame a server sends as its first frame.
///
/// v2 advertises only the stream limit; v3 also advertises the initial
/// window.
pub fn default_server_settings(
    version: Version,
    max_concurrent_streams: u32,
    initial_window_size: u32,
) -> SettingsFrame {
    let mut settings = Vec::with_capacity(2);
    if version.has_flow_control() {
        settings.push(Setting::new(
            SettingId::InitialWindowSize,
            initial_window_size,
        ));
    }
    settings.push(Setting::new(
        SettingId::MaxConcurrentStreams,
        max_concurrent_streams,
    ));
    SettingsFrame {
        clear_persisted: false,
        settings,
    }
}

/// The SETTINGS frame a client sends as its first frame. Clients advertise
/// a much larger receive window than servers do.
pub fn default_client_settings(
    version: Version,
    max_concurrent_streams: u32,
    initial_window_size: u32,
) -> SettingsFrame {
    let mut settings = Vec::with_capacity(2);
    if version.has_flow_control() {
        settings.push(Setting::new(
            SettingId::InitialWindowSize,
            initial_window_size.max(DEFAULT_INITIAL_CLIENT_WINDOW_SIZE),
        ));
    }
    settings.push(Setting::new(
        SettingId::MaxConcurrentStreams,
        max_concurrent_streams,
    ));
    SettingsFrame {
        clear_persisted: false,
        settings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_get() {
        let mut store = SettingsStore::new();
        store.store(&SettingsFrame {
            clear_persisted: false,
            settings: vec![Setting::new(SettingId::MaxConcurrentStreams, 100)],
        });
        assert_eq!(
            store.get(SettingId::MaxConcurrentStreams).map(|s| s.value),
            Some(100)
        );
        assert!(store.get(SettingId::UploadBandwidth).is_none());
    }

    #[test]
    fn test_later_values_win() {
        let mut store = SettingsStore::new();
        store.store(&SettingsFrame {
            clear_persisted: false,
            settings: vec![Setting::new(SettingId::InitialWindowSize, 100)],
        });
        store.store(&SettingsFrame {
            clear_persisted: false,
            settings: vec![Setting::new(SettingId::InitialWindowSize, 200)],
        });
        assert_eq!(
            store.get(SettingId::InitialWindowSize).map(|s| s.value),
            Some(200)
        );
    }

    #[test]
    fn test_clear_settings_flag() {
        let mut store = SettingsStore::new();
        store.store(&SettingsFrame {
            clear_persisted: false,
            settings: vec![Setting {
                flags: crate::frame::flags::SETTING_PERSIST_VALUE,
                id: SettingId::UploadBandwidth,
                value: 9,
            }],
        });
        store.store(&SettingsFrame {
            clear_persisted: true,
            settings: vec![Setting::new(SettingId::RoundTripTime, 30)],
        });
        assert!(store.get(SettingId::UploadBandwidth).is_none());
        assert_eq!(store.get(SettingId::RoundTripTime).map(|s| s.value), Some(30));
    }

    #[test]
    fn test_default_server_settings_by_version() {
        let frame = default_server_settings(Version::V3, 1000, 65_536);
        assert_eq!(frame.settings.len(), 2);
        assert_eq!(frame.settings[0].id, SettingId::InitialWindowSize);
        assert_eq!(frame.settings[0].value, 65_536);
        assert_eq!(frame.settings[1].id, SettingId::MaxConcurrentStreams);

        // v2 has no flow control and advertises no window.
        let frame = default_server_settings(Version::V2, 1000, 65_536);
        assert_eq!(frame.settings.len(), 1);
        assert_eq!(frame.settings[0].id, SettingId::MaxConcurrentStreams);
    }

    #[test]
    fn test_default_client_settings_use_large_window() {
        let frame = default_client_settings(Version::V3_1, 1000, 65_536);
        assert_eq!(frame.settings[0].id, SettingId::InitialWindowSize);
        assert_eq!(frame.settings[0].value, DEFAULT_INITIAL_CLIENT_WINDOW_SIZE);
    }
}
