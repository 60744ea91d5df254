//! Snapshot of one successful poll.

use crate::collector::oids::Metric;
use crate::fmt::{FmtStyle, format_bits_per_sec, format_bytes};

const KB_PER_GB: f64 = 1024.0 * 1024.0;

/// Counter and gauge values captured by one poll.
///
/// Values are kept at full transport width; the normalizer decides how they map
/// into archive data-source domains. A snapshot is never mutated after it is
/// published, the next poll replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Unix timestamp (seconds) when the response arrived.
    pub captured_at: i64,
    pub cpu_idle_percent: u128,
    /// Total real memory in kB.
    pub mem_total_kb: u128,
    /// Available real memory in kB.
    pub mem_avail_kb: u128,
    pub if_in_octets: u128,
    pub if_out_octets: u128,
    /// Interface speed in bits per second.
    pub if_speed: u128,
}

impl Snapshot {
    pub fn get(&self, metric: Metric) -> u128 {
        match metric {
            Metric::CpuIdle => self.cpu_idle_percent,
            Metric::MemTotalReal => self.mem_total_kb,
            Metric::MemAvailReal => self.mem_avail_kb,
            Metric::IfHcInOctets => self.if_in_octets,
            Metric::IfHcOutOctets => self.if_out_octets,
            Metric::IfSpeed => self.if_speed,
        }
    }

    pub(crate) fn set(&mut self, metric: Metric, value: u128) {
        let slot = match metric {
            Metric::CpuIdle => &mut self.cpu_idle_percent,
            Metric::MemTotalReal => &mut self.mem_total_kb,
            Metric::MemAvailReal => &mut self.mem_avail_kb,
            Metric::IfHcInOctets => &mut self.if_in_octets,
            Metric::IfHcOutOctets => &mut self.if_out_octets,
            Metric::IfSpeed => &mut self.if_speed,
        };
        *slot = value;
    }

    /// CPU usage as `100 - idle`.
    pub fn cpu_usage_percent(&self) -> u128 {
        100u128.saturating_sub(self.cpu_idle_percent)
    }

    pub fn mem_avail_gb(&self) -> f64 {
        self.mem_avail_kb as f64 / KB_PER_GB
    }

    pub fn mem_total_gb(&self) -> f64 {
        self.mem_total_kb as f64 / KB_PER_GB
    }

    /// One-line derived metrics: CPU usage, memory, interface traffic and speed.
    pub fn summary(&self, style: FmtStyle) -> String {
        match style {
            FmtStyle::Compact => format!(
                "cpu={}% mem={:.2}/{:.2}GB in={} out={} speed={}",
                self.cpu_usage_percent(),
                self.mem_avail_gb(),
                self.mem_total_gb(),
                format_bytes(self.if_in_octets, style),
                format_bytes(self.if_out_octets, style),
                format_bits_per_sec(self.if_speed)
            ),
            FmtStyle::Detail => format!(
                "CPU usage {}%, memory available {:.2} GB of {:.2} GB, \
                 interface in {} out {}, speed {}",
                self.cpu_usage_percent(),
                self.mem_avail_gb(),
                self.mem_total_gb(),
                format_bytes(self.if_in_octets, style),
                format_bytes(self.if_out_octets, style),
                format_bits_per_sec(self.if_speed)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_metrics() {
        let snap = Snapshot {
            cpu_idle_percent: 87,
            mem_total_kb: 16 * 1024 * 1024,
            mem_avail_kb: 4 * 1024 * 1024 + 512 * 1024,
            ..Snapshot::default()
        };
        assert_eq!(snap.cpu_usage_percent(), 13);
        assert!((snap.mem_total_gb() - 16.0).abs() < 1e-9);
        assert!((snap.mem_avail_gb() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_summary_styles() {
        let snap = Snapshot {
            cpu_idle_percent: 90,
            mem_total_kb: 8 * 1024 * 1024,
            mem_avail_kb: 2 * 1024 * 1024,
            if_in_octets: 1536,
            if_out_octets: 3 << 30,
            if_speed: 1_000_000_000,
            ..Snapshot::default()
        };
        assert_eq!(
            snap.summary(FmtStyle::Compact),
            "cpu=10% mem=2.00/8.00GB in=1.5K out=3.0G speed=1 Gbit/s"
        );
        assert_eq!(
            snap.summary(FmtStyle::Detail),
            "CPU usage 10%, memory available 2.00 GB of 8.00 GB, interface in 1.5 KiB out 3.0 GiB, speed 1 Gbit/s"
        );
    }

    #[test]
    fn test_cpu_usage_never_underflows() {
        let snap = Snapshot {
            cpu_idle_percent: 250,
            ..Snapshot::default()
        };
        assert_eq!(snap.cpu_usage_percent(), 0);
    }

    #[test]
    fn test_set_and_get_cover_every_metric() {
        let mut snap = Snapshot::default();
        for (i, metric) in Metric::ALL.into_iter().enumerate() {
            snap.set(metric, i as u128 + 1);
        }
        for (i, metric) in Metric::ALL.into_iter().enumerate() {
            assert_eq!(snap.get(metric), i as u128 + 1);
        }
    }
}
