use crate::domain::models::CustomColorSlot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Color slots 1..=7 are addressable; slot 0 means "nothing selected".
pub const CUSTOM_COLOR_SLOTS: u8 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "lumistrip".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Durable user preferences: favorites, list-view choice, per-device custom
/// color slots, and the last session's address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub favorite_addresses: Vec<String>,
    #[serde(default = "default_true")]
    pub show_as_list: bool,
    /// Saved color slots keyed by device address.
    #[serde(default)]
    pub custom_colors: HashMap<String, Vec<CustomColorSlot>>,
    #[serde(default)]
    pub last_connected_address: Option<String>,
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            favorite_addresses: Vec::new(),
            show_as_list: default_true(),
            custom_colors: HashMap::new(),
            last_connected_address: None,
            log_settings: LogSettings::default(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("custom color slot {0} out of range (1..={CUSTOM_COLOR_SLOTS}, 0 is reserved)")]
    SlotOutOfRange(u8),
    #[error("custom color must be 6 hex digits, got {0:?}")]
    InvalidColor(String),
}

pub struct PreferencesService {
    preferences: Preferences,
    preferences_path: PathBuf,
}

impl PreferencesService {
    pub fn new() -> anyhow::Result<Self> {
        let preferences_path = Self::default_path()?;
        Ok(Self::with_path(preferences_path))
    }

    /// Open a store at an explicit path, falling back to defaults when the
    /// file is missing or unreadable.
    pub fn with_path(preferences_path: PathBuf) -> Self {
        let preferences = Self::load_from_file(&preferences_path).unwrap_or_default();
        Self {
            preferences,
            preferences_path,
        }
    }

    fn default_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("Lumistrip");
        fs::create_dir_all(&path)?;
        path.push("preferences.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Preferences> {
        let contents = fs::read_to_string(path)?;
        let preferences = serde_json::from_str(&contents)?;
        Ok(preferences)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.preferences)?;
        fs::write(&self.preferences_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Preferences {
        &self.preferences
    }

    pub fn get_mut(&mut self) -> &mut Preferences {
        &mut self.preferences
    }

    pub fn is_favorite(&self, address: &str) -> bool {
        self.preferences
            .favorite_addresses
            .iter()
            .any(|a| a == address)
    }

    pub fn add_favorite(&mut self, address: &str) -> anyhow::Result<()> {
        if !self.is_favorite(address) {
            self.preferences.favorite_addresses.push(address.to_string());
            self.save()?;
        }
        Ok(())
    }

    pub fn remove_favorite(&mut self, address: &str) -> anyhow::Result<()> {
        let before = self.preferences.favorite_addresses.len();
        self.preferences.favorite_addresses.retain(|a| a != address);
        if self.preferences.favorite_addresses.len() != before {
            self.save()?;
        }
        Ok(())
    }

    pub fn set_show_as_list(&mut self, show_as_list: bool) -> anyhow::Result<()> {
        self.preferences.show_as_list = show_as_list;
        self.save()
    }

    pub fn set_last_connected(&mut self, address: Option<String>) -> anyhow::Result<()> {
        self.preferences.last_connected_address = address;
        self.save()
    }

    /// Store one custom color slot for a device. Slot 0 is the "nothing
    /// selected" sentinel and is rejected; a slot id already present for
    /// the address is overwritten.
    pub fn set_custom_color(&mut self, address: &str, slot: CustomColorSlot) -> anyhow::Result<()> {
        if slot.id == 0 || slot.id > CUSTOM_COLOR_SLOTS {
            return Err(PreferenceError::SlotOutOfRange(slot.id).into());
        }
        if slot.hex_color.len() != 6 || !slot.hex_color.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PreferenceError::InvalidColor(slot.hex_color).into());
        }

        let slots = self
            .preferences
            .custom_colors
            .entry(address.to_string())
            .or_default();
        match slots.iter_mut().find(|s| s.id == slot.id) {
            Some(existing) => *existing = slot,
            None => slots.push(slot),
        }
        self.save()
    }

    pub fn custom_colors(&self, address: &str) -> &[CustomColorSlot] {
        self.preferences
            .custom_colors
            .get(address)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> PreferencesService {
        let path = std::env::temp_dir().join(format!(
            "lumistrip-prefs-{}-{}.json",
            std::process::id(),
            tag
        ));
        let _ = fs::remove_file(&path);
        PreferencesService::with_path(path)
    }

    fn slot(id: u8, hex: &str) -> CustomColorSlot {
        CustomColorSlot {
            id,
            hex_color: hex.to_string(),
        }
    }

    #[test]
    fn slot_zero_is_never_persisted() {
        let mut store = temp_store("slot0");
        let err = store
            .set_custom_color("AA:BB", slot(0, "FF0000"))
            .unwrap_err();
        assert_eq!(
            err.downcast::<PreferenceError>().unwrap(),
            PreferenceError::SlotOutOfRange(0)
        );
        assert!(store.custom_colors("AA:BB").is_empty());
    }

    #[test]
    fn slot_ids_are_bounded() {
        let mut store = temp_store("slot8");
        assert!(store.set_custom_color("AA:BB", slot(8, "FF0000")).is_err());
        assert!(store.set_custom_color("AA:BB", slot(7, "FF0000")).is_ok());
        assert!(store.set_custom_color("AA:BB", slot(1, "00FF00")).is_ok());
    }

    #[test]
    fn custom_color_hex_is_validated() {
        let mut store = temp_store("hex");
        assert!(store.set_custom_color("AA:BB", slot(1, "XYZ123")).is_err());
        assert!(store.set_custom_color("AA:BB", slot(1, "FFF")).is_err());
    }

    #[test]
    fn same_slot_id_overwrites() {
        let mut store = temp_store("overwrite");
        store.set_custom_color("AA:BB", slot(3, "FF0000")).unwrap();
        store.set_custom_color("AA:BB", slot(3, "0000FF")).unwrap();

        let slots = store.custom_colors("AA:BB");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].hex_color, "0000FF");
    }

    #[test]
    fn slots_are_keyed_per_address() {
        let mut store = temp_store("keyed");
        store.set_custom_color("AA:BB", slot(1, "FF0000")).unwrap();
        store.set_custom_color("CC:DD", slot(1, "00FF00")).unwrap();

        assert_eq!(store.custom_colors("AA:BB")[0].hex_color, "FF0000");
        assert_eq!(store.custom_colors("CC:DD")[0].hex_color, "00FF00");
        assert!(store.custom_colors("EE:FF").is_empty());
    }

    #[test]
    fn favorites_deduplicate_and_round_trip() {
        let mut store = temp_store("favorites");
        store.add_favorite("AA:BB").unwrap();
        store.add_favorite("AA:BB").unwrap();
        store.set_last_connected(Some("AA:BB".to_string())).unwrap();
        assert_eq!(store.get().favorite_addresses.len(), 1);

        // Reload from disk: everything persisted.
        let path = store.preferences_path.clone();
        let reloaded = PreferencesService::with_path(path);
        assert!(reloaded.is_favorite("AA:BB"));
        assert_eq!(
            reloaded.get().last_connected_address.as_deref(),
            Some("AA:BB")
        );

        let mut reloaded = reloaded;
        reloaded.remove_favorite("AA:BB").unwrap();
        assert!(!reloaded.is_favorite("AA:BB"));
    }
}
