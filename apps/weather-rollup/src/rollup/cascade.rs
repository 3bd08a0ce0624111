use super::types::{Aggregate, Granularity, Reading, Sample};
use super::window::WindowBuffer;
use super::RollupError;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// One rung of the cascade: which granularity it produces and how many child samples fill it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSpec {
    pub granularity: Granularity,
    pub capacity: NonZeroUsize,
}

impl LevelSpec {
    pub fn new(granularity: Granularity, capacity: usize) -> Result<Self, RollupError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(RollupError::InvalidCapacity {
            granularity,
            capacity,
        })?;
        Ok(Self {
            granularity,
            capacity,
        })
    }

    /// minute=30 readings, hour=60 minutes, day=24 hours, month=30 days, year=12 months.
    pub fn defaults() -> Vec<LevelSpec> {
        Granularity::ALL
            .into_iter()
            .filter_map(|granularity| {
                NonZeroUsize::new(granularity.default_capacity()).map(|capacity| LevelSpec {
                    granularity,
                    capacity,
                })
            })
            .collect()
    }
}

/// The chained windows of a single location.
#[derive(Debug)]
pub struct LocationCascade {
    location_id: String,
    levels: Vec<WindowBuffer>,
}

impl LocationCascade {
    fn new(location_id: &str, specs: &[LevelSpec]) -> Self {
        Self {
            location_id: location_id.to_string(),
            levels: specs
                .iter()
                .map(|spec| WindowBuffer::with_capacity(spec.granularity, spec.capacity))
                .collect(),
        }
    }

    /// Pushes one raw reading into the first level and carries every emission upward.
    /// Emissions come back finest level first.
    pub fn ingest(&mut self, reading: &Reading) -> Vec<Aggregate> {
        let mut emitted = Vec::new();
        let mut carry = Some(Sample::from(reading));

        for level in &mut self.levels {
            let Some(sample) = carry.take() else {
                break;
            };
            if let Some(aggregate) = level.push(&self.location_id, sample, reading.received_at) {
                carry = Some(Sample::from(&aggregate));
                emitted.push(aggregate);
            }
        }

        emitted
    }

    pub fn fill_counts(&self) -> Vec<(Granularity, usize)> {
        self.levels
            .iter()
            .map(|level| (level.granularity(), level.len()))
            .collect()
    }
}

/// Per-location cascades keyed by location id.
///
/// Each location owns its own lock, so readings for different locations can be ingested
/// in parallel while a single location's windows are only ever mutated by one caller at a
/// time. The outer map lock is held just long enough to find or create an entry.
#[derive(Debug)]
pub struct CascadeAggregator {
    specs: Vec<LevelSpec>,
    locations: RwLock<HashMap<String, Arc<Mutex<LocationCascade>>>>,
}

impl Default for CascadeAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CascadeAggregator {
    pub fn new() -> Self {
        Self {
            specs: LevelSpec::defaults(),
            locations: RwLock::new(HashMap::new()),
        }
    }

    /// Custom level chain. Levels must be non-empty and strictly coarser as they go.
    pub fn with_levels(specs: Vec<LevelSpec>) -> Result<Self, RollupError> {
        if specs.is_empty() {
            return Err(RollupError::InvalidLevels("no levels configured".to_string()));
        }
        if specs
            .windows(2)
            .any(|pair| pair[0].granularity >= pair[1].granularity)
        {
            return Err(RollupError::InvalidLevels(
                "levels must be listed finest to coarsest without repeats".to_string(),
            ));
        }
        Ok(Self {
            specs,
            locations: RwLock::new(HashMap::new()),
        })
    }

    pub fn levels(&self) -> &[LevelSpec] {
        &self.specs
    }

    pub fn ingest(&self, reading: &Reading) -> Vec<Aggregate> {
        let cascade = self.cascade_for(&reading.location_id);
        let mut guard = cascade.lock().unwrap_or_else(PoisonError::into_inner);
        guard.ingest(reading)
    }

    /// Buffered sample count per level, or `None` for a location never seen.
    pub fn fill_counts(&self, location_id: &str) -> Option<Vec<(Granularity, usize)>> {
        let cascade = self
            .locations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location_id)
            .cloned()?;
        let guard = cascade.lock().unwrap_or_else(PoisonError::into_inner);
        Some(guard.fill_counts())
    }

    pub fn location_count(&self) -> usize {
        self.locations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn cascade_for(&self, location_id: &str) -> Arc<Mutex<LocationCascade>> {
        if let Some(existing) = self
            .locations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location_id)
        {
            return existing.clone();
        }

        let mut locations = self
            .locations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        locations
            .entry(location_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LocationCascade::new(location_id, &self.specs))))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn reading(location: &str, seq: i64, temperature: f64, humidity: f64) -> Reading {
        Reading {
            location_id: location.to_string(),
            temperature,
            humidity,
            received_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(seq * 2),
        }
    }

    fn small_levels() -> CascadeAggregator {
        CascadeAggregator::with_levels(vec![
            LevelSpec::new(Granularity::Minute, 2).unwrap(),
            LevelSpec::new(Granularity::Hour, 2).unwrap(),
            LevelSpec::new(Granularity::Day, 2).unwrap(),
            LevelSpec::new(Granularity::Month, 2).unwrap(),
            LevelSpec::new(Granularity::Year, 2).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn thirty_readings_emit_one_minute_aggregate() {
        let cascade = CascadeAggregator::new();
        let mut emitted = Vec::new();
        for i in 1..=30 {
            let out = cascade.ingest(&reading("A", i, i as f64, 50.0));
            if i < 30 {
                assert!(out.is_empty(), "reading {i} should not trigger");
            }
            emitted.extend(out);
        }

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].granularity, Granularity::Minute);
        assert_eq!(emitted[0].median_temperature, 15.5);
        assert_eq!(emitted[0].median_humidity, 50.0);
        assert_eq!(emitted[0].computed_at, reading("A", 30, 0.0, 0.0).received_at);
    }

    #[test]
    fn eighteen_hundred_readings_emit_an_hour_after_sixty_minutes() {
        let cascade = CascadeAggregator::new();
        let mut all = Vec::new();
        let mut last_call = Vec::new();
        for i in 1..=1800 {
            last_call = cascade.ingest(&reading("A", i, (i % 30) as f64, 40.0));
            all.extend(last_call.iter().cloned());
        }

        let minutes = all
            .iter()
            .filter(|a| a.granularity == Granularity::Minute)
            .count();
        let hours: Vec<_> = all
            .iter()
            .filter(|a| a.granularity == Granularity::Hour)
            .collect();
        assert_eq!(minutes, 60);
        assert_eq!(hours.len(), 1);
        assert_eq!(all.len(), 61);

        let order: Vec<_> = last_call.iter().map(|a| a.granularity).collect();
        assert_eq!(order, vec![Granularity::Minute, Granularity::Hour]);
        assert_eq!(
            cascade.fill_counts("A").unwrap(),
            vec![
                (Granularity::Minute, 0),
                (Granularity::Hour, 0),
                (Granularity::Day, 1),
                (Granularity::Month, 0),
                (Granularity::Year, 0),
            ]
        );
    }

    #[test]
    fn full_chain_cascades_in_ascending_order() {
        let cascade = small_levels();
        let mut out = Vec::new();
        for i in 1..=32 {
            out = cascade.ingest(&reading("A", i, i as f64, 100.0 - i as f64));
            if i < 32 {
                assert!(out.len() < 5);
            }
        }
        let order: Vec<_> = out.iter().map(|a| a.granularity).collect();
        assert_eq!(order, Granularity::ALL.to_vec());
        // every level's median over 1..=32 collapses to 16.5
        assert_eq!(out[4].median_temperature, 16.5);
        assert_eq!(out[4].median_humidity, 83.5);
    }

    #[test]
    fn parent_trigger_does_not_reset_child() {
        let cascade = small_levels();
        for i in 1..=4 {
            cascade.ingest(&reading("A", i, 1.0, 1.0));
        }
        // minute fired twice, hour fired once and fed day
        assert_eq!(
            cascade.fill_counts("A").unwrap()[..3],
            [
                (Granularity::Minute, 0),
                (Granularity::Hour, 0),
                (Granularity::Day, 1)
            ]
        );
        cascade.ingest(&reading("A", 5, 1.0, 1.0));
        assert_eq!(cascade.fill_counts("A").unwrap()[0], (Granularity::Minute, 1));
        assert_eq!(cascade.fill_counts("A").unwrap()[2], (Granularity::Day, 1));
    }

    #[test]
    fn interleaved_locations_match_isolated_runs() {
        let a: Vec<Reading> = (1..=90)
            .map(|i| reading("A", i, (i * 7 % 13) as f64, (i % 5) as f64))
            .collect();
        let b: Vec<Reading> = (1..=75)
            .map(|i| reading("B", i, -(i as f64), (i * 3 % 11) as f64))
            .collect();

        let isolated = |readings: &[Reading]| {
            let cascade = CascadeAggregator::new();
            readings
                .iter()
                .flat_map(|r| cascade.ingest(r))
                .collect::<Vec<_>>()
        };
        let expected_a = isolated(&a);
        let expected_b = isolated(&b);

        let shared = CascadeAggregator::new();
        let mut got_a = Vec::new();
        let mut got_b = Vec::new();
        let mut ia = a.iter();
        let mut ib = b.iter();
        loop {
            let next_a = ia.next();
            let next_b = ib.next();
            if next_a.is_none() && next_b.is_none() {
                break;
            }
            for r in next_b.into_iter().chain(next_a) {
                for aggregate in shared.ingest(r) {
                    if aggregate.location_id == "A" {
                        got_a.push(aggregate);
                    } else {
                        got_b.push(aggregate);
                    }
                }
            }
        }

        assert_eq!(expected_a.len(), 3);
        assert_eq!(expected_b.len(), 2);
        assert_eq!(got_a, expected_a);
        assert_eq!(got_b, expected_b);
        assert_eq!(shared.location_count(), 2);
    }

    #[test]
    fn concurrent_locations_stay_isolated() {
        let cascade = Arc::new(CascadeAggregator::new());
        let handles: Vec<_> = ["A", "B", "C", "D"]
            .into_iter()
            .map(|location| {
                let cascade = cascade.clone();
                std::thread::spawn(move || {
                    (1..=60)
                        .flat_map(|i| cascade.ingest(&reading(location, i, i as f64, 10.0)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            let emitted = handle.join().unwrap();
            assert_eq!(emitted.len(), 2);
            assert_eq!(emitted[0].median_temperature, 15.5);
            assert_eq!(emitted[1].median_temperature, 45.5);
        }
    }

    #[test]
    fn unknown_location_has_no_fill_counts() {
        let cascade = CascadeAggregator::new();
        assert!(cascade.fill_counts("nowhere").is_none());
    }

    #[test]
    fn rejects_misordered_levels() {
        let err = CascadeAggregator::with_levels(vec![
            LevelSpec::new(Granularity::Hour, 2).unwrap(),
            LevelSpec::new(Granularity::Minute, 2).unwrap(),
        ])
        .unwrap_err();
        assert!(matches!(err, RollupError::InvalidLevels(_)));
        assert!(CascadeAggregator::with_levels(Vec::new()).is_err());
        assert!(LevelSpec::new(Granularity::Day, 0).is_err());
    }
}
