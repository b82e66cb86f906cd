//! Metric snapshots and the rolling per-session history.
//!
//! Every engine loops over the same four service-health metrics. `MetricKind`
//! is the closed set of them; snapshots index into a fixed `[f64; 4]` through
//! it instead of looking fields up by name.

use crate::error::{PulseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::VecDeque;

/// Number of metrics in a snapshot.
pub const NUM_METRICS: usize = 4;

/// Default history capacity: 144 ticks, about 12 minutes at a 5s cadence.
pub const DEFAULT_HISTORY_CAPACITY: usize = 144;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    Rate = 0,
    ErrorRate = 1,
    P99 = 2,
    Saturation = 3,
}

impl MetricKind {
    pub const ALL: [MetricKind; NUM_METRICS] = [
        MetricKind::Rate,
        MetricKind::ErrorRate,
        MetricKind::P99,
        MetricKind::Saturation,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    /// Wire key, matching the JSON field name of the snapshot.
    pub fn key(self) -> &'static str {
        match self {
            Self::Rate => "rate",
            Self::ErrorRate => "errorRate",
            Self::P99 => "p99",
            Self::Saturation => "saturation",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Rate => "Request rate",
            Self::ErrorRate => "Error rate",
            Self::P99 => "P99 latency",
            Self::Saturation => "Saturation",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Rate => "req/s",
            Self::ErrorRate => "%",
            Self::P99 => "ms",
            Self::Saturation => "%",
        }
    }

    /// True when a *drop* in the metric is the harmful direction.
    pub fn inverted(self) -> bool {
        matches!(self, Self::Rate)
    }
}

/// One tick of service-health metrics. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    #[serde(default = "missing_metric", deserialize_with = "nullable_metric")]
    pub rate: f64,
    #[serde(default = "missing_metric", deserialize_with = "nullable_metric")]
    pub error_rate: f64,
    #[serde(default = "missing_metric", deserialize_with = "nullable_metric")]
    pub p99: f64,
    #[serde(default = "missing_metric", deserialize_with = "nullable_metric")]
    pub saturation: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "tickIndex")]
    pub tick: u64,
}

fn missing_metric() -> f64 {
    f64::NAN
}

fn nullable_metric<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl MetricSnapshot {
    pub fn new(
        tick: u64,
        timestamp: DateTime<Utc>,
        rate: f64,
        error_rate: f64,
        p99: f64,
        saturation: f64,
    ) -> Self {
        Self {
            rate,
            error_rate,
            p99,
            saturation,
            timestamp,
            tick,
        }
    }

    /// Build a snapshot from values laid out in `MetricKind::ALL` order.
    pub fn from_values(tick: u64, timestamp: DateTime<Utc>, values: [f64; NUM_METRICS]) -> Self {
        Self::new(tick, timestamp, values[0], values[1], values[2], values[3])
    }

    #[inline]
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Rate => self.rate,
            MetricKind::ErrorRate => self.error_rate,
            MetricKind::P99 => self.p99,
            MetricKind::Saturation => self.saturation,
        }
    }

    #[inline]
    pub fn values(&self) -> [f64; NUM_METRICS] {
        [self.rate, self.error_rate, self.p99, self.saturation]
    }

    /// First metric that is NaN or infinite, if any.
    pub fn first_missing(&self) -> Option<MetricKind> {
        MetricKind::ALL.into_iter().find(|&k| !self.get(k).is_finite())
    }

    pub fn is_complete(&self) -> bool {
        self.first_missing().is_none()
    }
}

/// Bounded FIFO of snapshots in arrival order.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    snapshots: VecDeque<MetricSnapshot>,
    capacity: usize,
    last_tick: Option<u64>,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
            last_tick: None,
        }
    }

    /// Append a snapshot, evicting the oldest when full.
    ///
    /// Fails without touching the buffer if `snapshot.tick` does not advance
    /// past the last accepted tick.
    pub fn push(&mut self, snapshot: MetricSnapshot) -> Result<Option<MetricSnapshot>> {
        if let Some(last) = self.last_tick {
            if snapshot.tick <= last {
                return Err(PulseError::OutOfOrderTick {
                    last,
                    got: snapshot.tick,
                });
            }
        }

        let evicted = if self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front()
        } else {
            None
        };
        self.snapshots.push_back(snapshot);
        self.last_tick = Some(snapshot.tick);
        Ok(evicted)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&MetricSnapshot> {
        self.snapshots.back()
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSnapshot> {
        self.snapshots.iter()
    }

    /// Copy of the `n` oldest snapshots still held.
    pub fn oldest(&self, n: usize) -> Vec<MetricSnapshot> {
        self.snapshots.iter().take(n).copied().collect()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.last_tick = None;
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
