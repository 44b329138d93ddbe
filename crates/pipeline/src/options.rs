//! Per-run generation settings handed opaquely to the automation session.

use serde::{Deserialize, Serialize};
use tunefleet_core::error::CoreError;

/// Default position of the weirdness and style-influence sliders.
pub const DEFAULT_SLIDER: u8 = 50;

/// Upper bound of both sliders.
pub const MAX_SLIDER: u8 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VocalGender {
    Male,
    Female,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LyricsMode {
    Manual,
    Auto,
    /// Leave the form's own setting untouched.
    #[default]
    Default,
}

/// Optional fine-tuning applied to every prompt in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancedOptions {
    #[serde(default)]
    pub exclude_styles: String,
    #[serde(default)]
    pub vocal_gender: VocalGender,
    #[serde(default)]
    pub lyrics_mode: LyricsMode,
    #[serde(default = "default_slider")]
    pub weirdness: u8,
    #[serde(default = "default_slider")]
    pub style_influence: u8,
    #[serde(default)]
    pub persona_name: Option<String>,
}

fn default_slider() -> u8 {
    DEFAULT_SLIDER
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            exclude_styles: String::new(),
            vocal_gender: VocalGender::Any,
            lyrics_mode: LyricsMode::Default,
            weirdness: DEFAULT_SLIDER,
            style_influence: DEFAULT_SLIDER,
            persona_name: None,
        }
    }
}

impl AdvancedOptions {
    /// True when every field is at its default, so the session can skip
    /// opening the advanced panel.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Press the create button after filling the form. When `false` the
    /// session leaves each form for manual submission.
    #[serde(default)]
    pub auto_submit: bool,
    #[serde(default)]
    pub advanced: Option<AdvancedOptions>,
}

impl GenerationOptions {
    pub fn validate(&self) -> Result<(), CoreError> {
        let Some(adv) = &self.advanced else {
            return Ok(());
        };
        for (name, value) in [("weirdness", adv.weirdness), ("style_influence", adv.style_influence)] {
            if value > MAX_SLIDER {
                return Err(CoreError::Validation(format!(
                    "{name} must be between 0 and {MAX_SLIDER}, got {value}"
                )));
            }
        }
        Ok(())
    }
}
