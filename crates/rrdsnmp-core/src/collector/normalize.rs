//! Turns raw protocol values into a [`Snapshot`] and archive inputs.
//!
//! The normalizer is pure: it checks the response shape, coerces each value
//! into its data source's domain and hands counters to the store unchanged
//! otherwise. Rates are the store's business.

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::collector::oids::{Metric, Oid};
use crate::collector::traits::VarBind;
use crate::storage::descriptor::{ArchiveDescriptor, DataSource, DsKind};
use crate::storage::model::Snapshot;

/// Data-source names the agent knows how to feed, and the metric behind each.
pub const DS_BINDINGS: &[(&str, Metric)] = &[
    ("outOct", Metric::IfHcOutOctets),
    ("inOct", Metric::IfHcInOctets),
    ("cpuIdle", Metric::CpuIdle),
    ("memAvail", Metric::MemAvailReal),
    ("memTotal", Metric::MemTotalReal),
    ("ifSpeed", Metric::IfSpeed),
];

/// A response that does not match the request (the `MalformedResponse` family),
/// or an archive the agent cannot feed.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeError {
    /// Number of variable bindings differs from the number requested.
    CountMismatch { expected: usize, got: usize },
    /// A binding carries a different OID than the one requested at its position.
    OidMismatch {
        position: usize,
        expected: Oid,
        got: Oid,
    },
    /// A binding is not an unsigned number (exception value, string, negative).
    NonNumeric { oid: Oid, type_name: &'static str },
    /// The archive declares a data source with no metric behind it.
    UnboundDataSource(String),
}

impl NormalizeError {
    /// Whether this is a response-shape error rather than a setup error.
    pub fn is_malformed_response(&self) -> bool {
        !matches!(self, NormalizeError::UnboundDataSource(_))
    }
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::CountMismatch { expected, got } => write!(
                f,
                "malformed response: expected {} variables, got {}",
                expected, got
            ),
            NormalizeError::OidMismatch {
                position,
                expected,
                got,
            } => write!(
                f,
                "malformed response: variable {} is {}, expected {}",
                position, got, expected
            ),
            NormalizeError::NonNumeric { oid, type_name } => write!(
                f,
                "malformed response: {} has non-numeric type {}",
                oid, type_name
            ),
            NormalizeError::UnboundDataSource(name) => {
                write!(f, "no metric feeds data source '{}'", name)
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Output of one normalized poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub snapshot: Snapshot,
    /// Archive update values keyed by data source name.
    pub ds_values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    requested: Vec<(Metric, Oid)>,
    bindings: Vec<(DataSource, Metric)>,
}

impl Normalizer {
    /// Builds a normalizer feeding every data source of `descriptor`.
    ///
    /// Interface columns are polled at row `if_index`.
    pub fn for_descriptor(
        descriptor: &ArchiveDescriptor,
        if_index: u32,
    ) -> Result<Self, NormalizeError> {
        let bindings = descriptor
            .data_sources
            .iter()
            .map(|ds| {
                DS_BINDINGS
                    .iter()
                    .find(|(name, _)| *name == ds.name)
                    .map(|(_, metric)| (ds.clone(), *metric))
                    .ok_or_else(|| NormalizeError::UnboundDataSource(ds.name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            requested: Metric::ALL
                .into_iter()
                .map(|m| (m, m.oid(if_index)))
                .collect(),
            bindings,
        })
    }

    /// OIDs to request each cycle, in the order [`normalize`](Self::normalize) expects.
    pub fn oids(&self) -> Vec<Oid> {
        self.requested.iter().map(|(_, oid)| oid.clone()).collect()
    }

    pub fn normalize(&self, captured_at: i64, vars: &[VarBind]) -> Result<Sample, NormalizeError> {
        if vars.len() != self.requested.len() {
            return Err(NormalizeError::CountMismatch {
                expected: self.requested.len(),
                got: vars.len(),
            });
        }

        let mut snapshot = Snapshot {
            captured_at,
            ..Snapshot::default()
        };
        for (position, ((metric, oid), var)) in self.requested.iter().zip(vars).enumerate() {
            if var.oid != *oid {
                return Err(NormalizeError::OidMismatch {
                    position,
                    expected: oid.clone(),
                    got: var.oid.clone(),
                });
            }
            let value = var.value.as_unsigned().ok_or_else(|| NormalizeError::NonNumeric {
                oid: oid.clone(),
                type_name: var.value.type_name(),
            })?;
            snapshot.set(*metric, value);
        }

        let ds_values = self
            .bindings
            .iter()
            .map(|(ds, metric)| (ds.name.clone(), coerce(ds, snapshot.get(*metric))))
            .collect();

        Ok(Sample {
            snapshot,
            ds_values,
        })
    }
}

/// Maps a raw reading into the data source's domain.
///
/// Counters are reduced modulo the domain so a 64-bit reading fits a 32-bit
/// archive the way a 32-bit hardware counter would have wrapped. Gauges are
/// clamped to `[min, max]`.
fn coerce(ds: &DataSource, raw: u128) -> f64 {
    match ds.kind {
        DsKind::Counter => {
            let modulus = ds.modulus() as u128;
            let reduced = if modulus == 0 { raw } else { raw % modulus };
            reduced as f64
        }
        DsKind::Gauge => {
            let v = raw as f64;
            if v < ds.min || v > ds.max {
                let clamped = v.clamp(ds.min, ds.max);
                warn!(
                    "{} reading {} outside [{}, {}], clamped to {}",
                    ds.name, raw, ds.min, ds.max, clamped
                );
                clamped
            } else {
                v
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::traits::ProtocolValue;
    use crate::storage::descriptor::{ArchiveDef, ConsolidationFn};

    fn response(n: &Normalizer, values: [ProtocolValue; 6]) -> Vec<VarBind> {
        n.oids()
            .into_iter()
            .zip(values)
            .map(|(oid, value)| VarBind::new(oid, value))
            .collect()
    }

    fn typical(out_octets: u64) -> [ProtocolValue; 6] {
        [
            ProtocolValue::Integer(92),
            ProtocolValue::Integer(16_384_000),
            ProtocolValue::Integer(8_192_000),
            ProtocolValue::Counter64(1_000),
            ProtocolValue::Counter64(out_octets),
            ProtocolValue::Gauge32(1_000_000_000),
        ]
    }

    #[test]
    fn test_normalize_fills_snapshot_and_outoct() {
        let desc = ArchiveDescriptor::network("x.rrd", 5, false);
        let n = Normalizer::for_descriptor(&desc, 2).unwrap();
        assert_eq!(n.oids().len(), 6);
        assert_eq!(n.oids()[4].to_string(), ".1.3.6.1.2.1.31.1.1.1.10.2");

        let sample = n.normalize(1700, &response(&n, typical(123_456))).unwrap();
        assert_eq!(sample.snapshot.captured_at, 1700);
        assert_eq!(sample.snapshot.cpu_idle_percent, 92);
        assert_eq!(sample.snapshot.mem_total_kb, 16_384_000);
        assert_eq!(sample.snapshot.if_out_octets, 123_456);
        assert_eq!(sample.snapshot.if_speed, 1_000_000_000);
        assert_eq!(sample.ds_values, BTreeMap::from([("outOct".to_string(), 123_456.0)]));
    }

    #[test]
    fn test_wide_reading_wraps_into_32_bit_domain() {
        let narrow = ArchiveDescriptor::network("x.rrd", 5, false);
        let n = Normalizer::for_descriptor(&narrow, 2).unwrap();
        let raw = (1u64 << 32) + 7;
        let sample = n.normalize(0, &response(&n, typical(raw))).unwrap();
        assert_eq!(sample.snapshot.if_out_octets, u128::from(raw));
        assert_eq!(sample.ds_values["outOct"], 7.0);

        let wide = ArchiveDescriptor::network("x.rrd", 5, true);
        let n = Normalizer::for_descriptor(&wide, 2).unwrap();
        let sample = n.normalize(0, &response(&n, typical(raw))).unwrap();
        assert_eq!(sample.ds_values["outOct"], raw as f64);
    }

    #[test]
    fn test_gauge_is_clamped() {
        let desc = ArchiveDescriptor {
            path: "x.rrd".into(),
            step_secs: 5,
            data_sources: vec![DataSource::gauge("cpuIdle", 20, 0.0, 100.0)],
            archives: vec![ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 4)],
        };
        let n = Normalizer::for_descriptor(&desc, 1).unwrap();
        let mut values = typical(0);
        values[0] = ProtocolValue::Integer(250);
        let sample = n.normalize(0, &response(&n, values)).unwrap();
        assert_eq!(sample.snapshot.cpu_idle_percent, 250);
        assert_eq!(sample.ds_values["cpuIdle"], 100.0);
    }

    #[test]
    fn test_count_mismatch_is_malformed() {
        let n = Normalizer::for_descriptor(&ArchiveDescriptor::network("x.rrd", 5, false), 2).unwrap();
        let mut vars = response(&n, typical(1));
        vars.pop();
        let err = n.normalize(0, &vars).unwrap_err();
        assert_eq!(err, NormalizeError::CountMismatch { expected: 6, got: 5 });
        assert!(err.is_malformed_response());
        assert!(err.to_string().starts_with("malformed response"));
    }

    #[test]
    fn test_wrong_oid_or_type_is_malformed() {
        let n = Normalizer::for_descriptor(&ArchiveDescriptor::network("x.rrd", 5, false), 2).unwrap();

        let mut vars = response(&n, typical(1));
        vars.swap(0, 1);
        assert!(matches!(
            n.normalize(0, &vars),
            Err(NormalizeError::OidMismatch { position: 0, .. })
        ));

        let mut values = typical(1);
        values[4] = ProtocolValue::NoSuchInstance;
        assert!(matches!(
            n.normalize(0, &response(&n, values)),
            Err(NormalizeError::NonNumeric {
                type_name: "noSuchInstance",
                ..
            })
        ));

        let mut values = typical(1);
        values[0] = ProtocolValue::Integer(-3);
        assert!(matches!(
            n.normalize(0, &response(&n, values)),
            Err(NormalizeError::NonNumeric { .. })
        ));
    }

    #[test]
    fn test_unbound_data_source() {
        let mut desc = ArchiveDescriptor::network("x.rrd", 5, false);
        desc.data_sources.push(DataSource::gauge("diskFree", 20, 0.0, 1e12));
        let err = Normalizer::for_descriptor(&desc, 2).unwrap_err();
        assert_eq!(err, NormalizeError::UnboundDataSource("diskFree".to_string()));
        assert!(!err.is_malformed_response());
    }
}
