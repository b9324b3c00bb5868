//! Print settings carried by a job and its document.

use serde::{Deserialize, Serialize};

/// Settings a document is printed with.
///
/// `Default` is the cleared value a job falls back to after a failure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    pub device_name: String,
    pub title: String,
    pub copies: u32,
    pub dpi: u32,
    pub color: bool,
    pub collate: bool,
}

impl PrintSettings {
    /// Settings for one monochrome copy at 300 dpi on `device_name`.
    pub fn for_device(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            copies: 1,
            dpi: 300,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_copies(mut self, copies: u32) -> Self {
        self.copies = copies;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_resets_to_empty() {
        let mut settings = PrintSettings::for_device("laser-1")
            .with_title("report")
            .with_copies(2);
        assert!(!settings.is_empty());

        settings.clear();
        assert!(settings.is_empty());
    }

    #[test]
    fn test_missing_fields_deserialize_to_defaults() {
        let settings: PrintSettings =
            serde_json::from_str(r#"{"device_name": "inkjet", "color": true}"#).unwrap();
        assert_eq!(settings.device_name, "inkjet");
        assert!(settings.color);
        assert_eq!(settings.copies, 0);
    }
}
