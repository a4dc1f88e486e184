use std::sync::Arc;

use super::registry::{ColorRegistry, NamedColor};
use super::Rgb;

/// Colors farther than this from every registry entry get a synthetic `RGB(r,g,b)` name.
pub const DEFAULT_NAME_DISTANCE_THRESHOLD: f64 = 50.0;

/// Two-way lookup between color names and RGB triples.
#[derive(Debug, Clone)]
pub struct ColorResolver {
    registry: Arc<ColorRegistry>,
    threshold: f64,
}

impl ColorResolver {
    pub fn new(registry: Arc<ColorRegistry>) -> Self {
        Self {
            registry,
            threshold: DEFAULT_NAME_DISTANCE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn registry(&self) -> &ColorRegistry {
        self.registry.as_ref()
    }

    /// Registry name, then an `RGB(r,g,b)` descriptor, then `#rrggbb`.
    pub fn name_to_rgb(&self, name: &str) -> Option<Rgb> {
        self.registry
            .get(name)
            .or_else(|| parse_rgb_descriptor(name))
            .or_else(|| Rgb::from_hex(name))
    }

    /// Nearest registry entry. The first-inserted entry wins on equal distance.
    pub fn nearest(&self, rgb: Rgb) -> Option<(&NamedColor, f64)> {
        let mut best: Option<(&NamedColor, f64)> = None;
        for entry in self.registry.entries() {
            let distance = rgb.distance(entry.rgb);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((entry, distance)),
            }
        }
        best
    }

    pub fn rgb_to_name(&self, rgb: Rgb) -> String {
        match self.nearest(rgb) {
            Some((entry, distance)) if distance <= self.threshold => entry.name.clone(),
            _ => rgb_descriptor(rgb),
        }
    }
}

pub fn rgb_descriptor(rgb: Rgb) -> String {
    format!("RGB({},{},{})", rgb.r, rgb.g, rgb.b)
}

fn parse_rgb_descriptor(value: &str) -> Option<Rgb> {
    let value = value.trim();
    let prefix = value.get(..3)?;
    if !prefix.eq_ignore_ascii_case("rgb") {
        return None;
    }
    let inner = value[3..]
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let channels = inner
        .split(',')
        .map(|part| part.trim().parse::<i64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match channels.as_slice() {
        [r, g, b] => Rgb::from_channels(*r, *g, *b).ok(),
        _ => None,
    }
}
