use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::annotation::{HighlightColor, HighlightStyle};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "flowreader";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WritingMode {
    #[default]
    Auto,
    HorizontalTb,
    HorizontalRl,
    VerticalRl,
    VerticalLr,
}

impl WritingMode {
    /// `(vertical, rtl)` forced by this mode, or `None` for `auto`.
    pub fn direction(&self) -> Option<(bool, bool)> {
        match self {
            WritingMode::Auto => None,
            WritingMode::HorizontalTb => Some((false, false)),
            WritingMode::HorizontalRl => Some((false, true)),
            WritingMode::VerticalRl => Some((true, true)),
            WritingMode::VerticalLr => Some((true, false)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnMode {
    #[default]
    Auto,
    One,
    Two,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub writing_mode: WritingMode,
    pub vertical: bool,
    pub rtl: bool,
    pub scrolled: bool,
    pub continuous_scroll: bool,
    pub column_mode: ColumnMode,
    pub gap_percent: f64,
    pub max_inline_size: f64,
    pub max_column_count: u32,
    /// `None` sizes the block axis from the container.
    pub max_block_size: Option<f64>,
    pub animated: bool,
    pub default_font_size: f64,
    pub minimum_font_size: f64,
    pub line_height: f64,
    pub zoom_level: f64,
    pub paragraph_margin: f64,
    pub full_justification: bool,
    pub hyphenation: bool,
    pub disable_click: bool,
    pub swap_click_area: bool,
    pub volume_keys_to_flip: bool,
    pub scrolling_overlap: f64,
    pub show_header: bool,
    pub show_footer: bool,
    pub show_bars_on_scroll: bool,
    pub allow_script: bool,
    pub theme: String,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            writing_mode: WritingMode::Auto,
            vertical: false,
            rtl: false,
            scrolled: false,
            continuous_scroll: false,
            column_mode: ColumnMode::Auto,
            gap_percent: 5.0,
            max_inline_size: 720.0,
            max_column_count: 2,
            max_block_size: None,
            animated: false,
            default_font_size: 16.0,
            minimum_font_size: 8.0,
            line_height: 1.6,
            zoom_level: 100.0,
            paragraph_margin: 1.0,
            full_justification: true,
            hyphenation: true,
            disable_click: false,
            swap_click_area: false,
            volume_keys_to_flip: false,
            scrolling_overlap: 0.0,
            show_header: true,
            show_footer: true,
            show_bars_on_scroll: false,
            allow_script: false,
            theme: "light".to_string(),
        }
    }
}

/// A partial update of [`ViewSettings`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettingsPatch {
    pub writing_mode: Option<WritingMode>,
    pub vertical: Option<bool>,
    pub rtl: Option<bool>,
    pub scrolled: Option<bool>,
    pub continuous_scroll: Option<bool>,
    pub column_mode: Option<ColumnMode>,
    pub gap_percent: Option<f64>,
    pub max_inline_size: Option<f64>,
    pub max_column_count: Option<u32>,
    pub max_block_size: Option<Option<f64>>,
    pub animated: Option<bool>,
    pub default_font_size: Option<f64>,
    pub minimum_font_size: Option<f64>,
    pub line_height: Option<f64>,
    pub zoom_level: Option<f64>,
    pub paragraph_margin: Option<f64>,
    pub full_justification: Option<bool>,
    pub hyphenation: Option<bool>,
    pub disable_click: Option<bool>,
    pub swap_click_area: Option<bool>,
    pub volume_keys_to_flip: Option<bool>,
    pub scrolling_overlap: Option<f64>,
    pub show_header: Option<bool>,
    pub show_footer: Option<bool>,
    pub show_bars_on_scroll: Option<bool>,
    pub allow_script: Option<bool>,
    pub theme: Option<String>,
}

macro_rules! merge_fields {
    ($patch:expr, $target:expr, $changed:ident; $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$patch.$field {
                if $target.$field != *value {
                    $target.$field = value.clone();
                    $changed = true;
                }
            }
        )+
    };
}

impl ViewSettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow-merges into `target`. Returns true if any field changed.
    pub fn apply_to(&self, target: &mut ViewSettings) -> bool {
        let mut changed = false;
        merge_fields!(self, target, changed;
            writing_mode, vertical, rtl, scrolled, continuous_scroll, column_mode,
            gap_percent, max_inline_size, max_column_count, max_block_size, animated,
            default_font_size, minimum_font_size, line_height, zoom_level,
            paragraph_margin, full_justification, hyphenation, disable_click,
            swap_click_area, volume_keys_to_flip, scrolling_overlap, show_header,
            show_footer, show_bars_on_scroll, allow_script, theme,
        );
        changed
    }

    pub fn direction(vertical: bool, rtl: bool) -> Self {
        Self {
            vertical: Some(vertical),
            rtl: Some(rtl),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadSettings {
    pub highlight_style: HighlightStyle,
    pub highlight_colors: HashMap<HighlightStyle, HighlightColor>,
    /// Characters of surrounding paragraph text captured with a note.
    pub note_context_chars: usize,
}

impl Default for ReadSettings {
    fn default() -> Self {
        let highlight_colors = HighlightStyle::ALL
            .into_iter()
            .map(|style| (style, HighlightColor::default()))
            .collect();
        Self {
            highlight_style: HighlightStyle::Highlight,
            highlight_colors,
            note_context_chars: 50,
        }
    }
}

impl ReadSettings {
    pub fn color_for(&self, style: HighlightStyle) -> HighlightColor {
        self.highlight_colors
            .get(&style)
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub view: ViewSettings,

    #[serde(default)]
    pub read: ReadSettings,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            view: ViewSettings::default(),
            read: ReadSettings::default(),
        }
    }
}

/// Colors fed into the generated stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemePalette {
    pub name: String,
    pub bg: String,
    pub fg: String,
    pub primary: String,
    pub is_dark: bool,
}

impl ThemePalette {
    pub fn named(name: &str) -> Self {
        let (bg, fg, primary, is_dark) = match name {
            "dark" => ("#222222", "#e0e0e0", "#77bbee", true),
            "sepia" => ("#f1e8d0", "#5b4636", "#008b8b", false),
            "light" => ("#ffffff", "#171717", "#0066cc", false),
            other => {
                warn!("Unknown theme {other:?}, falling back to light");
                ("#ffffff", "#171717", "#0066cc", false)
            }
        };
        Self {
            name: name.to_string(),
            bg: bg.to_string(),
            fg: fg.to_string(),
            primary: primary.to_string(),
            is_dark,
        }
    }
}

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl Settings {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {path:?}"))?;
        let mut settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {path:?}"))?;
        debug!("Loaded settings from {path:?}");

        if settings.version < CURRENT_VERSION {
            settings.migrate();
            if let Err(e) = settings.save_to_path(path) {
                error!("Failed to save migrated settings: {e:#}");
            }
        }
        Ok(settings)
    }

    /// Loads from `path` (or the platform config location), writing defaults
    /// when no file exists yet. Errors fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(preferred_config_path) {
            Some(path) => path,
            None => {
                warn!("Could not determine config directory, using default settings");
                return Self::default();
            }
        };

        if !path.exists() {
            info!("Settings file not found, creating with defaults at {path:?}");
            let settings = Self::default();
            if let Err(e) = settings.save_to_path(&path) {
                error!("{e:#}");
            }
            return settings;
        }

        Self::load_from_path(&path).unwrap_or_else(|e| {
            error!("{e:#}");
            Self::default()
        })
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {parent:?}"))?;
            }
        }
        let body = serde_yaml::to_string(self).context("Failed to serialize settings")?;
        fs::write(path, format!("{SETTINGS_HEADER}{body}"))
            .with_context(|| format!("Failed to save settings to {path:?}"))?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    fn migrate(&mut self) {
        info!(
            "Migrating settings from v{} to v{}",
            self.version, CURRENT_VERSION
        );
        self.version = CURRENT_VERSION;
    }
}

const SETTINGS_HEADER: &str = "# flowreader settings\n# view: layout and typography, read: annotation defaults\n";

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_patch_reports_changes_only() {
        let mut settings = ViewSettings::default();
        let same = ViewSettingsPatch {
            gap_percent: Some(settings.gap_percent),
            ..Default::default()
        };
        assert!(!same.apply_to(&mut settings));

        let patch = ViewSettingsPatch {
            scrolled: Some(true),
            max_block_size: Some(Some(900.0)),
            ..Default::default()
        };
        assert!(patch.apply_to(&mut settings));
        assert!(settings.scrolled);
        assert_eq!(settings.max_block_size, Some(900.0));
    }

    #[test]
    fn test_writing_mode_direction() {
        assert_eq!(WritingMode::Auto.direction(), None);
        assert_eq!(WritingMode::VerticalRl.direction(), Some((true, true)));
        assert_eq!(WritingMode::HorizontalTb.direction(), Some((false, false)));
    }

    #[test]
    fn test_round_trip_through_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILENAME);

        let mut settings = Settings::default();
        settings.view.column_mode = ColumnMode::Two;
        settings.read.highlight_style = HighlightStyle::Underline;
        settings
            .read
            .highlight_colors
            .insert(HighlightStyle::Underline, HighlightColor::Red);
        settings.save_to_path(&path).unwrap();

        let loaded = Settings::load_from_path(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(
            loaded.read.color_for(HighlightStyle::Underline),
            HighlightColor::Red
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "version: 0\nview:\n  scrolled: true\n").unwrap();

        let loaded = Settings::load_from_path(&path).unwrap();
        assert_eq!(loaded.version, CURRENT_VERSION);
        assert!(loaded.view.scrolled);
        assert_eq!(loaded.view.max_column_count, 2);
        assert_eq!(loaded.read.note_context_chars, 50);
    }

    #[test]
    fn test_load_or_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        let settings = Settings::load_or_default(Some(&path));
        assert_eq!(settings, Settings::default());
        assert!(path.exists());
    }
}
