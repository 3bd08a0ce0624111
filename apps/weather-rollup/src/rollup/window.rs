use super::median::median;
use super::types::{Aggregate, Granularity, Sample};
use super::RollupError;
use chrono::{DateTime, Utc};
use std::num::NonZeroUsize;

/// Count-triggered window for one granularity of one location.
///
/// Samples accumulate until `capacity` is reached; the push that fills the window reduces
/// it to an [`Aggregate`] and leaves the buffer empty, so a sample is never counted twice.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    granularity: Granularity,
    capacity: NonZeroUsize,
    samples: Vec<Sample>,
}

impl WindowBuffer {
    pub fn new(granularity: Granularity, capacity: usize) -> Result<Self, RollupError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(RollupError::InvalidCapacity {
            granularity,
            capacity,
        })?;
        Ok(Self::with_capacity(granularity, capacity))
    }

    pub fn with_capacity(granularity: Granularity, capacity: NonZeroUsize) -> Self {
        Self {
            granularity,
            capacity,
            samples: Vec::with_capacity(capacity.get()),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Buffers `sample`; returns the reduced aggregate when this push fills the window.
    pub fn push(
        &mut self,
        location_id: &str,
        sample: Sample,
        at: DateTime<Utc>,
    ) -> Option<Aggregate> {
        self.samples.push(sample);
        if self.samples.len() < self.capacity.get() {
            return None;
        }

        let samples = std::mem::take(&mut self.samples);
        self.samples.reserve(self.capacity.get());
        self.reduce(location_id, &samples, at)
    }

    fn reduce(&self, location_id: &str, samples: &[Sample], at: DateTime<Utc>) -> Option<Aggregate> {
        let temperatures: Vec<f64> = samples.iter().map(|s| s.temperature).collect();
        let humidities: Vec<f64> = samples.iter().map(|s| s.humidity).collect();

        let (Ok(median_temperature), Ok(median_humidity)) =
            (median(&temperatures), median(&humidities))
        else {
            tracing::error!(
                location_id,
                granularity = %self.granularity,
                "window reduced with no samples; dropping emission"
            );
            return None;
        };

        Some(Aggregate {
            location_id: location_id.to_string(),
            granularity: self.granularity,
            median_temperature,
            median_humidity,
            computed_at: at,
        })
    }
}
