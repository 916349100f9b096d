//! Theme settings shared by every page.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Default accent color.
pub const DEFAULT_COLOR: &str = "violet";

/// Default font family.
pub const DEFAULT_FONT_FAMILY: &str = "Poppins";

/// User-chosen accent color and font.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub color: String,
    pub font_family: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR.to_string(),
            font_family: DEFAULT_FONT_FAMILY.to_string(),
        }
    }
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub font_family: Option<String>,
}

/// Process-wide settings holder. Values are stored as given.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsStore {
    #[must_use]
    pub fn new(initial: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    #[must_use]
    pub fn get(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_color(&self, color: impl Into<String>) {
        self.write().color = color.into();
    }

    pub fn set_font(&self, font_family: impl Into<String>) {
        self.write().font_family = font_family.into();
    }

    /// Apply a partial update and return the resulting settings.
    pub fn apply(&self, update: SettingsUpdate) -> Settings {
        let mut guard = self.write();
        if let Some(color) = update.color {
            guard.color = color;
        }
        if let Some(font_family) = update.font_family {
            guard.font_family = font_family;
        }
        guard.clone()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Settings> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let store = SettingsStore::default();
        assert_eq!(store.get().color, "violet");
        assert_eq!(store.get().font_family, "Poppins");
    }

    #[test]
    fn test_setters_share_state() {
        let store = SettingsStore::default();
        let other = store.clone();
        store.set_color("tomato");
        other.set_font("Inter");
        assert_eq!(
            store.get(),
            Settings {
                color: "tomato".to_string(),
                font_family: "Inter".to_string(),
            }
        );
    }

    #[test]
    fn test_partial_update() {
        let store = SettingsStore::default();
        let update: SettingsUpdate = serde_json::from_str(r#"{"font_family":"Lato"}"#).unwrap();
        let settings = store.apply(update);
        assert_eq!(settings.color, "violet");
        assert_eq!(settings.font_family, "Lato");
    }
}
