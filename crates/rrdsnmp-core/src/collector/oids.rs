//! Static catalog of polled object identifiers.
//!
//! Scalars from UCD-SNMP-MIB carry their `.0` instance suffix. IF-MIB table
//! columns are stored without an instance and get the interface index
//! appended when a request is built.

use std::fmt;
use std::str::FromStr;

/// UCD-SNMP-MIB scalars and IF-MIB columns, keyed by their MIB names.
pub static OID_CATALOG: &[(&str, &str)] = &[
    // UCD-SNMP-MIB::systemStats
    ("ssIndex", ".1.3.6.1.4.1.2021.11.1.0"),
    ("ssErrorName", ".1.3.6.1.4.1.2021.11.2.0"),
    ("ssSwapIn", ".1.3.6.1.4.1.2021.11.3.0"),
    ("ssSwapOut", ".1.3.6.1.4.1.2021.11.4.0"),
    ("ssCpuIdle", ".1.3.6.1.4.1.2021.11.11.0"),
    ("ssCpuRawUser", ".1.3.6.1.4.1.2021.11.50.0"),
    ("ssCpuRawNice", ".1.3.6.1.4.1.2021.11.51.0"),
    ("ssCpuRawSystem", ".1.3.6.1.4.1.2021.11.52.0"),
    ("ssCpuRawIdle", ".1.3.6.1.4.1.2021.11.53.0"),
    ("ssCpuRawWait", ".1.3.6.1.4.1.2021.11.54.0"),
    ("ssCpuRawKernel", ".1.3.6.1.4.1.2021.11.55.0"),
    ("ssCpuRawInterrupt", ".1.3.6.1.4.1.2021.11.56.0"),
    ("ssIORawSent", ".1.3.6.1.4.1.2021.11.57.0"),
    ("ssIORawReceived", ".1.3.6.1.4.1.2021.11.58.0"),
    ("ssRawInterrupts", ".1.3.6.1.4.1.2021.11.59.0"),
    ("ssRawContexts", ".1.3.6.1.4.1.2021.11.60.0"),
    ("ssCpuRawSoftIRQ", ".1.3.6.1.4.1.2021.11.61.0"),
    ("ssRawSwapIn", ".1.3.6.1.4.1.2021.11.62.0"),
    ("ssRawSwapOut", ".1.3.6.1.4.1.2021.11.63.0"),
    ("ssCpuRawSteal", ".1.3.6.1.4.1.2021.11.64.0"),
    ("ssCpuRawGuest", ".1.3.6.1.4.1.2021.11.65.0"),
    ("ssCpuRawGuestNice", ".1.3.6.1.4.1.2021.11.66.0"),
    // UCD-SNMP-MIB::memory
    ("memTotalReal", ".1.3.6.1.4.1.2021.4.5.0"),
    ("memAvailReal", ".1.3.6.1.4.1.2021.4.6.0"),
    // IF-MIB columns (instance = ifIndex)
    ("ifSpeed", ".1.3.6.1.2.1.2.2.1.5"),
    ("ifHCInOctets", ".1.3.6.1.2.1.31.1.1.1.6"),
    ("ifHCOutOctets", ".1.3.6.1.2.1.31.1.1.1.10"),
];

/// Looks up the dotted OID string for a symbolic MIB name.
pub fn lookup(name: &str) -> Option<&'static str> {
    OID_CATALOG
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, oid)| *oid)
}

/// A numeric object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Self {
        Self(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// Returns a copy with `index` appended as the instance sub-identifier.
    pub fn with_index(&self, index: u32) -> Self {
        let mut arcs = self.0.clone();
        arcs.push(index);
        Self(arcs)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for arc in &self.0 {
            write!(f, ".{}", arc)?;
        }
        Ok(())
    }
}

/// Error returned when a dotted OID string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidParseError(pub String);

impl fmt::Display for OidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid OID '{}'", self.0)
    }
}

impl std::error::Error for OidParseError {}

impl FromStr for Oid {
    type Err = OidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix('.').unwrap_or(s);
        let arcs = trimmed
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| OidParseError(s.to_string()))?;
        if arcs.len() < 2 || arcs[0] > 2 {
            return Err(OidParseError(s.to_string()));
        }
        Ok(Self(arcs))
    }
}

/// Metrics that make up a [`Snapshot`](crate::storage::Snapshot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    CpuIdle,
    MemTotalReal,
    MemAvailReal,
    IfHcInOctets,
    IfHcOutOctets,
    IfSpeed,
}

impl Metric {
    /// Every metric, in the order a request carries them.
    pub const ALL: [Metric; 6] = [
        Metric::CpuIdle,
        Metric::MemTotalReal,
        Metric::MemAvailReal,
        Metric::IfHcInOctets,
        Metric::IfHcOutOctets,
        Metric::IfSpeed,
    ];

    /// MIB name of the metric, as found in [`OID_CATALOG`].
    pub fn mib_name(self) -> &'static str {
        match self {
            Metric::CpuIdle => "ssCpuIdle",
            Metric::MemTotalReal => "memTotalReal",
            Metric::MemAvailReal => "memAvailReal",
            Metric::IfHcInOctets => "ifHCInOctets",
            Metric::IfHcOutOctets => "ifHCOutOctets",
            Metric::IfSpeed => "ifSpeed",
        }
    }

    pub fn from_mib_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.mib_name() == name)
    }

    fn is_interface_column(self) -> bool {
        matches!(
            self,
            Metric::IfHcInOctets | Metric::IfHcOutOctets | Metric::IfSpeed
        )
    }

    /// Resolves the full instance OID for this metric.
    pub fn oid(self, if_index: u32) -> Oid {
        // Catalog entries are compile-time constants covered by tests.
        let base: Oid = lookup(self.mib_name())
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| Oid::new(Vec::new()));
        if self.is_interface_column() {
            base.with_index(if_index)
        } else {
            base
        }
    }
}
