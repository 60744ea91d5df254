//! Shared formatting helpers for log lines, summaries and chart labels.
//!
//! Functions that differ between compact log output and the verbose export
//! summary are parameterized via [`FmtStyle`].

/// Controls compact (log lines) vs verbose (summary) output.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FmtStyle {
    /// Compact: no spaces, short suffixes ("1.5G")
    Compact,
    /// Detail: spaces, full suffixes ("1.5 GiB")
    Detail,
}

/// Format byte count as human-readable size.
///
/// Compact: `"1.5G"`, `"100.3M"`, `"50.0K"`, `"512B"`
/// Detail:  `"1.5 GiB"`, `"100.3 MiB"`, `"50.0 KiB"`, `"512 B"`
pub fn format_bytes(bytes: u128, style: FmtStyle) -> String {
    let (t, g, m, k, b) = match style {
        FmtStyle::Compact => ("T", "G", "M", "K", "B"),
        FmtStyle::Detail => (" TiB", " GiB", " MiB", " KiB", " B"),
    };
    let f = bytes as f64;
    if bytes >= 1 << 40 {
        format!("{:.1}{}", f / (1u64 << 40) as f64, t)
    } else if bytes >= 1 << 30 {
        format!("{:.1}{}", f / (1u64 << 30) as f64, g)
    } else if bytes >= 1 << 20 {
        format!("{:.1}{}", f / (1u64 << 20) as f64, m)
    } else if bytes >= 1 << 10 {
        format!("{:.1}{}", f / 1024.0, k)
    } else {
        format!("{}{}", bytes, b)
    }
}

/// Format an interface speed in bits per second.
///
/// `"10 Gbit/s"`, `"100 Mbit/s"`, `"0 bit/s"`.
pub fn format_bits_per_sec(bps: u128) -> String {
    const UNITS: [(u128, &str); 3] = [
        (1_000_000_000, "Gbit/s"),
        (1_000_000, "Mbit/s"),
        (1_000, "kbit/s"),
    ];
    for (scale, unit) in UNITS {
        if bps >= scale {
            let v = bps as f64 / scale as f64;
            return if bps % scale == 0 {
                format!("{} {}", bps / scale, unit)
            } else {
                format!("{:.1} {}", v, unit)
            };
        }
    }
    format!("{} bit/s", bps)
}

/// Format a plain number with an SI suffix, for axis labels.
///
/// `"0"`, `"0.80"`, `"12.5"`, `"1.5k"`, `"2.0M"`, `"3.0G"`
pub fn format_si(v: f64) -> String {
    let a = v.abs();
    if a == 0.0 {
        "0".to_string()
    } else if a >= 1e9 {
        format!("{:.1}G", v / 1e9)
    } else if a >= 1e6 {
        format!("{:.1}M", v / 1e6)
    } else if a >= 1e3 {
        format!("{:.1}k", v / 1e3)
    } else if a >= 10.0 {
        format!("{:.1}", v)
    } else {
        format!("{:.2}", v)
    }
}

/// Format an optional timestamp as UTC date-time, `"-"` when absent.
pub fn format_timestamp(ts: Option<i64>) -> String {
    ts.and_then(|t| chrono::DateTime::<chrono::Utc>::from_timestamp(t, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}
