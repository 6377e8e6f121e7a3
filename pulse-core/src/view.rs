use std::time::Duration;

/// Where the map camera should fly. `center` is `[lat, lon]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTarget {
    pub center: [f64; 2],
    pub zoom: f64,
    pub duration: Option<Duration>,
}

impl CameraTarget {
    pub const fn new(lat: f64, lon: f64, zoom: f64) -> Self {
        Self {
            center: [lat, lon],
            zoom,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPreset {
    pub name: &'static str,
    pub target: CameraTarget,
}

/// Default whole-world view the tour returns to.
pub const WORLD_VIEW: CameraTarget = CameraTarget::new(20.0, 0.0, 2.0);

pub const PRESETS: [MapPreset; 4] = [
    MapPreset {
        name: "World",
        target: WORLD_VIEW,
    },
    MapPreset {
        name: "Nigeria",
        target: CameraTarget::new(9.082, 8.6753, 5.0),
    },
    MapPreset {
        name: "UK/Europe",
        target: CameraTarget::new(53.0, -1.5, 5.0),
    },
    MapPreset {
        name: "Pacific Ring",
        target: CameraTarget::new(0.0, 160.0, 3.0),
    },
];
