pub mod matcher;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod room;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("color channel out of range [0,255]: ({r}, {g}, {b})")]
pub struct InvalidChannelRange {
    pub r: i64,
    pub g: i64,
    pub b: i64,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn from_channels(r: i64, g: i64, b: i64) -> Result<Self, InvalidChannelRange> {
        match (u8::try_from(r), u8::try_from(g), u8::try_from(b)) {
            (Ok(r), Ok(g), Ok(b)) => Ok(Self { r, g, b }),
            _ => Err(InvalidChannelRange { r, g, b }),
        }
    }

    /// Accepts integral floats only; `255.0` is fine, `254.5` is not a channel.
    pub fn from_float_channels(channels: [f64; 3]) -> Result<Self, InvalidChannelRange> {
        let [r, g, b] = channels;
        let to_i64 = |v: f64| {
            if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e9 {
                v as i64
            } else {
                i64::MIN
            }
        };
        Self::from_channels(to_i64(r), to_i64(g), to_i64(b))
    }

    /// Parses `#rrggbb` (the leading `#` is optional, case-insensitive).
    pub fn from_hex(value: &str) -> Option<Self> {
        let digits = value.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        let channel =
            |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
        Some(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn distance(self, other: Self) -> f64 {
        let dr = f64::from(self.r) - f64::from(other.r);
        let dg = f64::from(self.g) - f64::from(other.g);
        let db = f64::from(self.b) - f64::from(other.b);
        (dr * dr + dg * dg + db * db).sqrt()
    }

    pub fn channels(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

/// A validated color for one furnishing target.
///
/// Construction goes through [`ColorAssignment::new`], which rejects assignments carrying
/// neither a name nor a color, and keeps `hex` in lockstep with `rgb`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorAssignment {
    target: String,
    color_name: String,
    rgb: Option<Rgb>,
    hex: Option<String>,
}

impl ColorAssignment {
    pub fn new(
        target: impl Into<String>,
        color_name: impl Into<String>,
        rgb: Option<Rgb>,
    ) -> Option<Self> {
        let target = target.into().trim().to_string();
        let color_name = color_name.into().trim().to_string();
        if target.is_empty() || (color_name.is_empty() && rgb.is_none()) {
            return None;
        }
        Some(Self {
            target,
            color_name,
            hex: rgb.map(Rgb::to_hex),
            rgb,
        })
    }

    pub fn target(&self) -> &str {
        self.target.as_str()
    }

    pub fn color_name(&self) -> &str {
        self.color_name.as_str()
    }

    pub fn rgb(&self) -> Option<Rgb> {
        self.rgb
    }

    pub fn hex(&self) -> Option<&str> {
        self.hex.as_deref()
    }
}

pub fn format_assignments(assignments: &[ColorAssignment]) -> String {
    assignments
        .iter()
        .map(|assignment| {
            let mut line = format!("{}: {}", assignment.target(), assignment.color_name());
            if let Some(rgb) = assignment.rgb() {
                line.push_str(&format!(" (RGB: {}, {}, {})", rgb.r, rgb.g, rgb.b));
            }
            if let Some(hex) = assignment.hex() {
                line.push_str(&format!(" ({hex})"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
