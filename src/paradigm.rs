//! Experimental paradigm (arena type) identification
//!
//! The paradigm selects which optional behaviours are scored at all and which
//! area-bound threshold applies. Sessions are recognised from their naming
//! convention; an unrecognised name falls back to `Paradigm::Default`.

use serde::{Deserialize, Serialize};

/// Arena / task type of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Paradigm {
    OpenField,
    ElevatedPlusMaze,
    LightDarkBox,
    Rgb,
    Default,
}

impl Paradigm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Paradigm::OpenField => "open_field",
            Paradigm::ElevatedPlusMaze => "elevated_plus_maze",
            Paradigm::LightDarkBox => "light_dark_box",
            Paradigm::Rgb => "rgb",
            Paradigm::Default => "default",
        }
    }

    /// Infer the paradigm from a session identifier.
    ///
    /// The name is split on `_`, `-`, `.` and whitespace; the first token that
    /// names a known arena wins. Returns `None` when no token matches.
    pub fn detect(session_name: &str) -> Option<Paradigm> {
        session_name
            .split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
            .find_map(|token| match token.to_ascii_uppercase().as_str() {
                "OF" | "OFT" | "OPENFIELD" => Some(Paradigm::OpenField),
                "EPM" => Some(Paradigm::ElevatedPlusMaze),
                "LDB" | "LDT" => Some(Paradigm::LightDarkBox),
                "RGB" => Some(Paradigm::Rgb),
                _ => None,
            })
    }

    /// Parse an explicit paradigm label (either the snake_case name or a naming token)
    pub fn from_label(label: &str) -> Option<Paradigm> {
        match label.trim().to_ascii_lowercase().as_str() {
            "open_field" => Some(Paradigm::OpenField),
            "elevated_plus_maze" => Some(Paradigm::ElevatedPlusMaze),
            "light_dark_box" => Some(Paradigm::LightDarkBox),
            "rgb" => Some(Paradigm::Rgb),
            "default" => Some(Paradigm::Default),
            other => Paradigm::detect(other),
        }
    }

    pub fn supports_tail_rattling(&self) -> bool {
        matches!(self, Paradigm::Rgb)
    }

    pub fn supports_wall_rearing(&self) -> bool {
        matches!(self, Paradigm::LightDarkBox)
    }

    pub fn supports_head_dips(&self) -> bool {
        matches!(self, Paradigm::ElevatedPlusMaze)
    }

    pub fn supports_open_rearing(&self) -> bool {
        matches!(self, Paradigm::ElevatedPlusMaze)
    }
}
