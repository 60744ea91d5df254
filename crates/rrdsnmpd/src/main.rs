//! rrdsnmpd - SNMP host monitoring agent.
//!
//! Polls CPU, memory and interface counters from an SNMP agent at a fixed
//! interval and records outbound traffic in a round-robin archive. On
//! interrupt the recent window is rendered to a graph file and a summary is
//! printed before exiting.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use rrdsnmp_core::Shared;
use rrdsnmp_core::collector::{Normalizer, Sampler, SnmpClient, SystemClock};
use rrdsnmp_core::config::{AgentConfig, ArchiveMode};
use rrdsnmp_core::export::Exporter;
use rrdsnmp_core::graph::SvgRenderer;
use rrdsnmp_core::storage::{Store, StoreError};

/// Exit code for configuration errors and `--version`.
const EXIT_CONFIG: i32 = 2;
/// Exit code after an interrupt-triggered export or a fatal runtime error.
const EXIT_TERMINATED: i32 = 1;

/// SNMP host monitoring agent with round-robin archive.
#[derive(Parser, Debug)]
#[command(name = "rrdsnmpd", about = "SNMP host monitoring agent", disable_version_flag = true)]
struct Args {
    /// SNMP agent host.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// SNMP community string.
    #[arg(long, default_value = "public")]
    community: String,

    /// SNMP agent UDP port.
    #[arg(long, default_value_t = 161)]
    port: u16,

    /// Polling interval (e.g. "5s", "500ms", "1m").
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Archive file path.
    #[arg(long, default_value = "test.rrd")]
    rrddb: PathBuf,

    /// Interface index polled for traffic counters and speed.
    #[arg(long, default_value_t = 2)]
    if_index: u32,

    /// Request timeout.
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Retries for timeouts and transient network errors before giving up.
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Recreate the archive, discarding its history.
    #[arg(long)]
    overwrite: bool,

    /// Reopen an existing archive instead of creating one.
    #[arg(long)]
    resume: bool,

    /// Use a 64-bit domain for the outbound octet counter.
    #[arg(long)]
    wide_counters: bool,

    /// Graph file written on interrupt.
    #[arg(long, default_value = "graph.svg")]
    graph: PathBuf,

    /// Time window covered by the graph.
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    graph_window: Duration,

    /// Print version and exit.
    #[arg(long)]
    version: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn to_config(&self) -> AgentConfig {
        AgentConfig {
            host: self.host.clone(),
            port: self.port,
            community: self.community.clone(),
            interval: self.interval,
            archive_path: self.rrddb.clone(),
            if_index: self.if_index,
            timeout: self.timeout,
            retries: self.retries,
            overwrite: self.overwrite,
            resume: self.resume,
            wide_counters: self.wide_counters,
            graph_path: self.graph.clone(),
            graph_window: self.graph_window,
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["rrdsnmpd", "rrdsnmp_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn open_store(config: &AgentConfig) -> Result<Store, StoreError> {
    match config.archive_mode() {
        ArchiveMode::Create => Store::create(config.descriptor(), false),
        ArchiveMode::Overwrite => {
            warn!(
                "Overwriting {}, previous history is discarded",
                config.archive_path.display()
            );
            Store::create(config.descriptor(), true)
        }
        ArchiveMode::Resume => {
            let store = Store::open(&config.archive_path)?;
            if store.descriptor().step_secs != config.step_secs() {
                warn!(
                    "Archive step is {}s but interval asks for {}s; keeping the archive step",
                    store.descriptor().step_secs,
                    config.step_secs()
                );
            }
            Ok(store)
        }
    }
}

fn run(config: AgentConfig) -> i32 {
    info!("rrdsnmpd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: target={}:{}, interval={:?}, archive={}, ifIndex={}",
        config.host,
        config.port,
        config.interval,
        config.archive_path.display(),
        config.if_index
    );
    if config.wide_counters {
        info!("outOct uses a 64-bit counter domain");
    } else {
        warn!(
            "outOct uses a 32-bit counter domain; ifHCOutOctets wraps it every 4 GiB \
             (use --wide-counters for fast interfaces)"
        );
    }

    let stop = Arc::new(AtomicBool::new(false));

    let client = match SnmpClient::connect(&config.host, config.port, &config.community, config.timeout) {
        Ok(client) => {
            info!("SNMP session open to {}", client.peer());
            client.with_cancel(stop.clone())
        }
        Err(e) => {
            error!("Cannot open SNMP session to {}:{}: {}", config.host, config.port, e);
            return EXIT_TERMINATED;
        }
    };

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("Cannot initialize archive: {}", e);
            return EXIT_TERMINATED;
        }
    };
    let normalizer = match Normalizer::for_descriptor(store.descriptor(), config.if_index) {
        Ok(n) => n,
        Err(e) => {
            error!("Cannot feed archive {}: {}", config.archive_path.display(), e);
            return EXIT_TERMINATED;
        }
    };
    info!("Archive ready at {}", config.archive_path.display());

    let shared = Arc::new(Shared::new(store));
    let clock = Arc::new(SystemClock);

    let (trigger_tx, trigger_rx) = mpsc::channel();
    let interrupts = AtomicUsize::new(0);
    if let Err(e) = ctrlc::set_handler(move || {
        if interrupts.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("Received interrupt, exporting");
            let _ = trigger_tx.send(());
        } else {
            eprintln!("Second interrupt, exiting immediately");
            process::exit(EXIT_TERMINATED);
        }
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let exporter = Exporter::new(
        shared.clone(),
        Box::new(SvgRenderer::new()),
        clock.clone(),
        &config.graph_path,
        config.graph_window,
    );
    let exporter = match exporter.spawn(trigger_rx, stop.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Cannot start exporter: {}", e);
            return EXIT_TERMINATED;
        }
    };

    let mut sampler = Sampler::new(
        client,
        normalizer,
        shared,
        clock,
        config.interval,
        config.retry_policy(),
    );
    let result = sampler.run(&stop);

    if stop.load(Ordering::SeqCst) {
        if let Some(report) = exporter.join() {
            print!("{}", report);
        }
    }
    if let Err(e) = result {
        eprintln!("rrdsnmpd: {}", e);
    }
    info!("Shutdown complete");
    EXIT_TERMINATED
}

fn main() {
    let args = Args::parse();
    if args.version {
        println!("rrdsnmpd {}", env!("CARGO_PKG_VERSION"));
        process::exit(EXIT_CONFIG);
    }

    init_logging(args.verbose, args.quiet);

    let config = args.to_config();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        eprintln!("rrdsnmpd: {}", e);
        process::exit(EXIT_CONFIG);
    }

    process::exit(run(config));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rrdsnmp_core::config::ConfigError;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("rrdsnmpd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = parse(&[]).to_config();
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn test_flags_map_to_config() {
        let args = parse(&[
            "--host",
            "10.0.0.1",
            "--community",
            "secret",
            "--port",
            "1161",
            "--interval",
            "1m 30s",
            "--rrddb",
            "/tmp/net.rrd",
            "--if-index",
            "4",
            "--timeout",
            "750ms",
            "--retries",
            "0",
            "--overwrite",
            "--wide-counters",
            "--graph",
            "out.svg",
            "--graph-window",
            "1h",
            "-vv",
        ]);
        assert_eq!(args.verbose, 2);
        let cfg = args.to_config();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.community, "secret");
        assert_eq!(cfg.port, 1161);
        assert_eq!(cfg.interval, Duration::from_secs(90));
        assert_eq!(cfg.archive_path, PathBuf::from("/tmp/net.rrd"));
        assert_eq!(cfg.if_index, 4);
        assert_eq!(cfg.timeout, Duration::from_millis(750));
        assert_eq!(cfg.retries, 0);
        assert_eq!(cfg.archive_mode(), ArchiveMode::Overwrite);
        assert!(cfg.wide_counters);
        assert_eq!(cfg.graph_path, PathBuf::from("out.svg"));
        assert_eq!(cfg.graph_window, Duration::from_secs(3600));
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_version_flag_is_parsed_not_handled_by_clap() {
        assert!(parse(&["--version"]).version);
    }

    #[test]
    fn test_zero_interval_fails_validation() {
        let cfg = parse(&["--interval", "0s"]).to_config();
        assert_eq!(cfg.validate(), Err(ConfigError::NonPositiveInterval));
    }

    #[test]
    fn test_malformed_interval_is_a_usage_error() {
        for bad in ["abc", "-5s", "5"] {
            let err = Args::try_parse_from(["rrdsnmpd", "--interval", bad]).unwrap_err();
            assert_eq!(err.exit_code(), 2, "{bad}");
        }
    }
}
