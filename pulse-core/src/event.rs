use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which feed the dashboard is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Hazard {
    #[default]
    Earthquakes,
    Floods,
}

impl Hazard {
    pub fn label(self) -> &'static str {
        match self {
            Hazard::Earthquakes => "Earthquakes",
            Hazard::Floods => "Floods",
        }
    }
}

impl fmt::Display for Hazard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quake {
    pub id: String,
    pub mag: f64,
    /// Epoch milliseconds.
    pub time: i64,
    pub place: Option<String>,
    pub lon: f64,
    pub lat: f64,
    pub depth: Option<f64>,
    /// Not seen by any earlier poll in this process.
    #[serde(default)]
    pub is_new: bool,
}

impl Quake {
    pub fn event_page_url(&self) -> String {
        format!(
            "https://earthquake.usgs.gov/earthquakes/eventpage/{}",
            self.id
        )
    }
}

/// GDACS alert colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Red,
    Orange,
    Green,
    #[default]
    Unknown,
}

impl AlertLevel {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "red" => AlertLevel::Red,
            "orange" => AlertLevel::Orange,
            "green" => AlertLevel::Green,
            _ => AlertLevel::Unknown,
        }
    }

    /// Severity used to order floods in a tour.
    pub fn rank(self) -> u8 {
        match self {
            AlertLevel::Red => 3,
            AlertLevel::Orange => 2,
            AlertLevel::Green => 1,
            AlertLevel::Unknown => 0,
        }
    }

    pub fn rain_intensity(self) -> f64 {
        match self {
            AlertLevel::Red => 1.4,
            AlertLevel::Orange => 1.0,
            AlertLevel::Green => 0.7,
            AlertLevel::Unknown => 0.6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Red => "red",
            AlertLevel::Orange => "orange",
            AlertLevel::Green => "green",
            AlertLevel::Unknown => "",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FloodLinks {
    pub report: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flood {
    /// `eventid-episodeid`.
    pub id: String,
    pub name: String,
    pub level: AlertLevel,
    pub lat: f64,
    pub lon: f64,
    pub start: i64,
    pub end: i64,
    /// Midpoint of `start` and `end`; the anchor for sorting and filtering.
    pub time: i64,
    pub is_current: bool,
    pub country: Option<String>,
    #[serde(default)]
    pub links: FloodLinks,
}

impl Flood {
    /// `[start, end]` with the bounds put in order, since upstream does not
    /// guarantee `start <= end`.
    pub fn span(&self) -> (i64, i64) {
        (self.start.min(self.end), self.start.max(self.end))
    }

    /// Latest instant the flood is known to touch.
    pub fn recency(&self) -> i64 {
        self.end.max(self.time)
    }
}

/// Either kind of marker on the map.
#[derive(Debug, Clone, PartialEq)]
pub enum HazardEvent {
    Quake(Quake),
    Flood(Flood),
}

impl HazardEvent {
    pub fn id(&self) -> &str {
        match self {
            HazardEvent::Quake(q) => &q.id,
            HazardEvent::Flood(f) => &f.id,
        }
    }

    pub fn lat(&self) -> f64 {
        match self {
            HazardEvent::Quake(q) => q.lat,
            HazardEvent::Flood(f) => f.lat,
        }
    }

    pub fn lon(&self) -> f64 {
        match self {
            HazardEvent::Quake(q) => q.lon,
            HazardEvent::Flood(f) => f.lon,
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            HazardEvent::Quake(q) => q.time,
            HazardEvent::Flood(f) => f.time,
        }
    }

    pub fn hazard(&self) -> Hazard {
        match self {
            HazardEvent::Quake(_) => Hazard::Earthquakes,
            HazardEvent::Flood(_) => Hazard::Floods,
        }
    }

    pub fn has_finite_coords(&self) -> bool {
        self.lat().is_finite() && self.lon().is_finite()
    }
}

/// Ids seen by any poll during this process; never persisted.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags quakes whose id was not seen before, then records all of them.
    pub fn mark(&mut self, quakes: &mut [Quake]) {
        for quake in quakes.iter_mut() {
            quake.is_new = !self.ids.contains(&quake.id);
        }
        self.ids.extend(quakes.iter().map(|q| q.id.clone()));
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Legend bucket for a magnitude: `< 3`, `3 – 5`, `5 – 7`, `≥ 7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagnitudeBand {
    Minor,
    Light,
    Strong,
    Major,
}

impl MagnitudeBand {
    pub fn of(mag: f64) -> Self {
        if mag >= 7.0 {
            MagnitudeBand::Major
        } else if mag >= 5.0 {
            MagnitudeBand::Strong
        } else if mag >= 3.0 {
            MagnitudeBand::Light
        } else {
            MagnitudeBand::Minor
        }
    }

    pub fn rgb(self) -> [u8; 3] {
        match self {
            MagnitudeBand::Minor => [0x38, 0xbd, 0xf8],
            MagnitudeBand::Light => [0x22, 0xc5, 0x5e],
            MagnitudeBand::Strong => [0xf5, 0x9e, 0x0b],
            MagnitudeBand::Major => [0xef, 0x44, 0x44],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MagnitudeBand::Minor => "< 3",
            MagnitudeBand::Light => "3 – 5",
            MagnitudeBand::Strong => "5 – 7",
            MagnitudeBand::Major => "≥ 7",
        }
    }

    pub const ALL: [MagnitudeBand; 4] = [
        MagnitudeBand::Minor,
        MagnitudeBand::Light,
        MagnitudeBand::Strong,
        MagnitudeBand::Major,
    ];
}

pub fn marker_radius(mag: f64) -> f64 {
    (mag * 2.0).max(4.0)
}
