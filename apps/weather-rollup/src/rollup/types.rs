use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rollup level. Ordered finest to coarsest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Month,
        Granularity::Year,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    /// Number of child samples that fill one window at this level.
    pub fn default_capacity(self) -> usize {
        match self {
            Granularity::Minute => 30,
            Granularity::Hour => 60,
            Granularity::Day => 24,
            Granularity::Month => 30,
            Granularity::Year => 12,
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            Granularity::Minute => "by_minute",
            Granularity::Hour => "by_hour",
            Granularity::Day => "by_day",
            Granularity::Month => "by_month",
            Granularity::Year => "by_year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown granularity {0:?}; expected one of minute, hour, day, month, year")]
pub struct UnknownGranularity(pub String);

impl FromStr for Granularity {
    type Err = UnknownGranularity;

    /// Accepts only the exact lowercase names.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Granularity::ALL
            .into_iter()
            .find(|level| level.as_str() == raw)
            .ok_or_else(|| UnknownGranularity(raw.to_string()))
    }
}

/// One validated inbound reading. `received_at` is the arrival stamp assigned by the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub location_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub received_at: DateTime<Utc>,
}

/// The (temperature, humidity) pair a window buffers. Raw readings and child aggregates
/// both reduce to this shape before entering a window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub temperature: f64,
    pub humidity: f64,
}

impl From<&Reading> for Sample {
    fn from(reading: &Reading) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
        }
    }
}

impl From<&Aggregate> for Sample {
    fn from(aggregate: &Aggregate) -> Self {
        Self {
            temperature: aggregate.median_temperature,
            humidity: aggregate.median_humidity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub location_id: String,
    pub granularity: Granularity,
    pub median_temperature: f64,
    pub median_humidity: f64,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_exact_granularity_names() {
        assert_eq!("hour".parse::<Granularity>(), Ok(Granularity::Hour));
        assert_eq!("year".parse::<Granularity>(), Ok(Granularity::Year));
        for raw in ["Hour", "MINUTE", " year ", "week", ""] {
            assert_eq!(
                raw.parse::<Granularity>(),
                Err(UnknownGranularity(raw.to_string()))
            );
        }
    }

    #[test]
    fn levels_are_ordered_finest_first() {
        let mut sorted = Granularity::ALL;
        sorted.sort();
        assert_eq!(sorted, Granularity::ALL);
        assert_eq!(Granularity::Day.table_name(), "by_day");
    }
}
