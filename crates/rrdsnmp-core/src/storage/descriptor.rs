//! Archive descriptor: step, data sources and round-robin archive layout.
//!
//! The descriptor fixes the storage capacity of an archive file for its whole
//! lifetime. Each archive keeps `rows × steps × step_secs` seconds of history.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Largest value of a 32-bit hardware counter.
pub const COUNTER32_MAX: f64 = 4_294_967_295.0;

/// Largest value of a 64-bit hardware counter.
pub const COUNTER64_MAX: f64 = u64::MAX as f64;

/// Longest data source name accepted.
const MAX_DS_NAME_LEN: usize = 19;

/// How raw updates of a data source are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DsKind {
    /// Monotonic counter (modulo its domain); the archive stores its rate.
    Counter,
    /// Absolute value stored as-is.
    Gauge,
}

impl fmt::Display for DsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DsKind::Counter => f.write_str("COUNTER"),
            DsKind::Gauge => f.write_str("GAUGE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    pub kind: DsKind,
    /// Longest gap between updates before the interval is treated as unknown.
    pub heartbeat_secs: u64,
    pub min: f64,
    pub max: f64,
}

impl DataSource {
    pub fn counter(name: impl Into<String>, heartbeat_secs: u64, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            kind: DsKind::Counter,
            heartbeat_secs,
            min,
            max,
        }
    }

    pub fn gauge(name: impl Into<String>, heartbeat_secs: u64, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            kind: DsKind::Gauge,
            heartbeat_secs,
            min,
            max,
        }
    }

    /// Size of the value domain, `max - min + 1`. Counters wrap modulo this.
    pub fn modulus(&self) -> f64 {
        self.max - self.min + 1.0
    }
}

/// Function folding primary data points into one archive row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsolidationFn {
    Average,
    Max,
    Min,
    Last,
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsolidationFn::Average => f.write_str("AVERAGE"),
            ConsolidationFn::Max => f.write_str("MAX"),
            ConsolidationFn::Min => f.write_str("MIN"),
            ConsolidationFn::Last => f.write_str("LAST"),
        }
    }
}

/// Layout of one round-robin archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDef {
    pub cf: ConsolidationFn,
    /// Largest tolerated fraction of unknown primary points per row, in `[0, 1)`.
    pub xff: f64,
    /// Primary data points folded into one row.
    pub steps: u32,
    /// Ring capacity.
    pub rows: u32,
}

impl ArchiveDef {
    pub fn new(cf: ConsolidationFn, xff: f64, steps: u32, rows: u32) -> Self {
        Self {
            cf,
            xff,
            steps,
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDescriptor {
    pub path: PathBuf,
    pub step_secs: u64,
    pub data_sources: Vec<DataSource>,
    pub archives: Vec<ArchiveDef>,
}

impl ArchiveDescriptor {
    /// The interface-throughput archive used by the daemon.
    ///
    /// One `outOct` counter with a heartbeat of four steps and a single
    /// AVERAGE archive (xff 0.5, 2 steps per row, 16 rows). With
    /// `wide_counters` the counter domain is 64-bit instead of 32-bit.
    pub fn network(path: impl Into<PathBuf>, step_secs: u64, wide_counters: bool) -> Self {
        let max = if wide_counters {
            COUNTER64_MAX
        } else {
            COUNTER32_MAX
        };
        Self {
            path: path.into(),
            step_secs,
            data_sources: vec![DataSource::counter("outOct", step_secs * 4, 0.0, max)],
            archives: vec![ArchiveDef::new(ConsolidationFn::Average, 0.5, 2, 16)],
        }
    }

    pub fn ds_index(&self, name: &str) -> Option<usize> {
        self.data_sources.iter().position(|ds| ds.name == name)
    }

    /// Seconds of history kept by `archive`.
    pub fn retention_secs(&self, archive: &ArchiveDef) -> u64 {
        u64::from(archive.rows) * u64::from(archive.steps) * self.step_secs
    }

    /// Checks structural constraints, returning a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.step_secs == 0 {
            return Err("step must be > 0".to_string());
        }
        if self.data_sources.is_empty() {
            return Err("at least one data source is required".to_string());
        }
        if self.archives.is_empty() {
            return Err("at least one archive is required".to_string());
        }

        for (i, ds) in self.data_sources.iter().enumerate() {
            if ds.name.is_empty()
                || ds.name.len() > MAX_DS_NAME_LEN
                || !ds
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(format!(
                    "data source name '{}' must be 1-{} chars of [A-Za-z0-9_]",
                    ds.name, MAX_DS_NAME_LEN
                ));
            }
            if self.data_sources[..i].iter().any(|d| d.name == ds.name) {
                return Err(format!("duplicate data source '{}'", ds.name));
            }
            if ds.heartbeat_secs == 0 {
                return Err(format!("data source '{}': heartbeat must be > 0", ds.name));
            }
            if !ds.min.is_finite() || !ds.max.is_finite() || ds.min >= ds.max {
                return Err(format!(
                    "data source '{}': need finite min < max, got [{}, {}]",
                    ds.name, ds.min, ds.max
                ));
            }
            if ds.kind == DsKind::Counter && ds.min < 0.0 {
                return Err(format!(
                    "counter '{}': domain must start at or above 0",
                    ds.name
                ));
            }
        }

        for (i, rra) in self.archives.iter().enumerate() {
            if !(0.0..1.0).contains(&rra.xff) {
                return Err(format!("archive {}: xff must be in [0, 1)", i));
            }
            if rra.steps == 0 {
                return Err(format!("archive {}: steps must be > 0", i));
            }
            if rra.rows == 0 {
                return Err(format!("archive {}: rows must be > 0", i));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_descriptor_matches_layout() {
        let desc = ArchiveDescriptor::network("test.rrd", 5, false);
        assert!(desc.validate().is_ok());
        let ds = &desc.data_sources[0];
        assert_eq!(ds.name, "outOct");
        assert_eq!(ds.kind, DsKind::Counter);
        assert_eq!(ds.heartbeat_secs, 20);
        assert_eq!(ds.max, COUNTER32_MAX);
        assert_eq!(ds.modulus(), 4_294_967_296.0);
        assert_eq!(desc.archives, vec![ArchiveDef::new(ConsolidationFn::Average, 0.5, 2, 16)]);
        assert_eq!(desc.retention_secs(&desc.archives[0]), 160);
    }

    #[test]
    fn test_wide_counter_domain() {
        let desc = ArchiveDescriptor::network("test.rrd", 5, true);
        assert_eq!(desc.data_sources[0].max, COUNTER64_MAX);
        // 2^64 is exactly representable, so the modulus is exact.
        assert_eq!(desc.data_sources[0].modulus(), 18_446_744_073_709_551_616.0);
    }

    #[test]
    fn test_validate_rejects_bad_layouts() {
        let base = ArchiveDescriptor::network("x.rrd", 5, false);

        let mut d = base.clone();
        d.step_secs = 0;
        assert!(d.validate().is_err());

        let mut d = base.clone();
        d.archives[0].xff = 1.0;
        assert!(d.validate().is_err());

        let mut d = base.clone();
        d.archives[0].rows = 0;
        assert!(d.validate().is_err());

        let mut d = base.clone();
        d.data_sources.push(d.data_sources[0].clone());
        assert!(d.validate().unwrap_err().contains("duplicate"));

        let mut d = base.clone();
        d.data_sources[0].name = "out-oct".to_string();
        assert!(d.validate().is_err());

        let mut d = base.clone();
        d.data_sources[0].min = d.data_sources[0].max;
        assert!(d.validate().is_err());

        let mut d = base;
        d.data_sources[0].min = -1.0;
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_ds_index() {
        let mut desc = ArchiveDescriptor::network("x.rrd", 5, false);
        desc.data_sources
            .push(DataSource::gauge("cpuUse", 20, 0.0, 100.0));
        assert_eq!(desc.ds_index("outOct"), Some(0));
        assert_eq!(desc.ds_index("cpuUse"), Some(1));
        assert_eq!(desc.ds_index("inOct"), None);
    }
}
