//! Track points and the synthetic payload generator.
//!
//! A simulated device keeps one base coordinate for its whole lifetime and
//! emits contiguous track segments from it: point `i` of a batch sits at the
//! base plus `i` fixed steps in both latitude and longitude.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Latitude every simulated device clusters around.
pub const REFERENCE_LAT: f64 = 25.0;

/// Longitude every simulated device clusters around.
pub const REFERENCE_LON: f64 = 121.0;

/// Half-width of the window the per-device base coordinate is drawn from.
pub const BASE_JITTER_DEGREES: f64 = 0.1;

/// Offset between successive points of one batch, in degrees.
pub const STEP_DEGREES: f64 = 0.001;

/// Exclusive upper bound for generated speeds.
pub const MAX_SPEED: f64 = 80.0;

/// One GPS observation, serialized exactly as `/api/track` expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub container_id: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    pub speed: f64,
}

/// Reasons the ingestion API would reject a point.
#[derive(Debug, Error, PartialEq)]
pub enum InvalidTrackPoint {
    #[error("container_id required")]
    MissingContainerId,

    #[error("lat out of range: {0}")]
    LatOutOfRange(f64),

    #[error("lon out of range: {0}")]
    LonOutOfRange(f64),

    #[error("speed cannot be negative: {0}")]
    NegativeSpeed(f64),
}

impl TrackPoint {
    /// Checks the point against the ingestion API's acceptance rules.
    pub fn validate(&self) -> Result<(), InvalidTrackPoint> {
        if self.container_id.is_empty() {
            return Err(InvalidTrackPoint::MissingContainerId);
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(InvalidTrackPoint::LatOutOfRange(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(InvalidTrackPoint::LonOutOfRange(self.lon));
        }
        if self.speed < 0.0 {
            return Err(InvalidTrackPoint::NegativeSpeed(self.speed));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Draws a coordinate uniformly within the jitter window around the
    /// reference point.
    pub fn jittered<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            lat: REFERENCE_LAT + rng.gen_range(-BASE_JITTER_DEGREES..=BASE_JITTER_DEGREES),
            lon: REFERENCE_LON + rng.gen_range(-BASE_JITTER_DEGREES..=BASE_JITTER_DEGREES),
        }
    }

    /// Position of the `index`-th point of a segment starting here.
    pub fn offset(&self, index: usize) -> Self {
        Self {
            lat: self.lat + index as f64 * STEP_DEGREES,
            lon: self.lon + index as f64 * STEP_DEGREES,
        }
    }
}

/// Builds a device identifier such as `LOAD4821`.
pub fn container_id<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    format!("{}{}", prefix, rng.gen_range(1000..=9999))
}

/// Per-user generator of track point batches.
#[derive(Debug, Clone)]
pub struct PayloadGenerator {
    container_id: String,
    base: Coordinate,
}

impl PayloadGenerator {
    /// Creates a generator with a freshly randomized base coordinate.
    pub fn new<R: Rng + ?Sized>(container_id: impl Into<String>, rng: &mut R) -> Self {
        Self::with_base(container_id, Coordinate::jittered(rng))
    }

    pub fn with_base(container_id: impl Into<String>, base: Coordinate) -> Self {
        Self {
            container_id: container_id.into(),
            base,
        }
    }

    pub fn base(&self) -> Coordinate {
        self.base
    }

    /// Produces `count` points in generation order.
    pub fn generate<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<TrackPoint> {
        (0..count)
            .map(|i| {
                let position = self.base.offset(i);
                TrackPoint {
                    container_id: self.container_id.clone(),
                    lat: position.lat,
                    lon: position.lon,
                    timestamp: Utc::now(),
                    speed: rng.gen_range(0.0..MAX_SPEED),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn batch_shares_container_and_base() {
        let mut rng = rng();
        let generator = PayloadGenerator::new("LOAD1234", &mut rng);
        let base = generator.base();
        let points = generator.generate(20, &mut rng);

        assert_eq!(points.len(), 20);
        for (i, point) in points.iter().enumerate() {
            assert_eq!(point.container_id, "LOAD1234");
            assert!((point.lat - (base.lat + i as f64 * STEP_DEGREES)).abs() < 1e-9);
            assert!((point.lon - (base.lon + i as f64 * STEP_DEGREES)).abs() < 1e-9);
        }
    }

    #[test]
    fn successive_points_differ_by_one_step() {
        let mut rng = rng();
        let generator = PayloadGenerator::new("FAST9999", &mut rng);
        let points = generator.generate(5, &mut rng);
        for pair in points.windows(2) {
            assert!((pair[1].lat - pair[0].lat - STEP_DEGREES).abs() < 1e-9);
            assert!((pair[1].lon - pair[0].lon - STEP_DEGREES).abs() < 1e-9);
        }
    }

    #[test]
    fn base_stays_fixed_across_batches() {
        let mut rng = rng();
        let generator = PayloadGenerator::new("LOAD1000", &mut rng);
        let first = generator.generate(3, &mut rng);
        let second = generator.generate(3, &mut rng);
        assert_eq!(first[0].lat, second[0].lat);
        assert_eq!(first[0].lon, second[0].lon);
    }

    #[test]
    fn speeds_stay_below_limit() {
        let mut rng = rng();
        let generator = PayloadGenerator::new("LOAD1000", &mut rng);
        for point in generator.generate(5_000, &mut rng) {
            assert!(point.speed >= 0.0 && point.speed < MAX_SPEED, "speed {}", point.speed);
        }
    }

    #[test]
    fn base_coordinate_is_within_jitter_window() {
        let mut rng = rng();
        for _ in 0..1_000 {
            let base = Coordinate::jittered(&mut rng);
            assert!((base.lat - REFERENCE_LAT).abs() <= BASE_JITTER_DEGREES);
            assert!((base.lon - REFERENCE_LON).abs() <= BASE_JITTER_DEGREES);
        }
    }

    #[test]
    fn container_id_has_prefix_and_four_digits() {
        let mut rng = rng();
        for _ in 0..500 {
            let id = container_id("LOAD", &mut rng);
            let digits: u32 = id.strip_prefix("LOAD").unwrap().parse().unwrap();
            assert!((1000..=9999).contains(&digits));
        }
    }

    #[test]
    fn zero_count_yields_empty_batch() {
        let mut rng = rng();
        let generator = PayloadGenerator::new("LOAD1000", &mut rng);
        assert!(generator.generate(0, &mut rng).is_empty());
    }

    #[test]
    fn serializes_to_wire_shape() {
        let point = TrackPoint {
            container_id: "LOAD1234".to_string(),
            lat: 25.01,
            lon: 121.02,
            timestamp: "2024-05-01T12:00:00Z".parse().unwrap(),
            speed: 42.5,
        };
        let value = serde_json::to_value(&point).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 5);
        assert_eq!(object["container_id"], "LOAD1234");
        assert_eq!(object["speed"], 42.5);
        let timestamp = object["timestamp"].as_str().unwrap();
        assert!(timestamp.starts_with("2024-05-01T12:00:00"));
        assert!(timestamp.parse::<DateTime<Utc>>().is_ok());
    }

    #[test]
    fn generated_points_pass_validation() {
        let mut rng = rng();
        let generator = PayloadGenerator::new("LOAD1000", &mut rng);
        for point in generator.generate(20, &mut rng) {
            assert_eq!(point.validate(), Ok(()));
        }
    }

    #[test]
    fn validation_rejects_out_of_range_points() {
        let mut point = TrackPoint {
            container_id: String::new(),
            lat: 25.0,
            lon: 121.0,
            timestamp: Utc::now(),
            speed: 10.0,
        };
        assert_eq!(point.validate(), Err(InvalidTrackPoint::MissingContainerId));

        point.container_id = "LOAD1000".to_string();
        point.lat = 91.0;
        assert_eq!(point.validate(), Err(InvalidTrackPoint::LatOutOfRange(91.0)));

        point.lat = 25.0;
        point.lon = -181.0;
        assert_eq!(point.validate(), Err(InvalidTrackPoint::LonOutOfRange(-181.0)));

        point.lon = 121.0;
        point.speed = -1.0;
        assert_eq!(point.validate(), Err(InvalidTrackPoint::NegativeSpeed(-1.0)));
    }
}
