//! Fixed-cadence polling loop.
//!
//! Each cycle issues one batched request, normalizes the response, publishes
//! the snapshot and records one archive update. Cycles start `interval` apart;
//! a cycle that overruns its slot is followed immediately by the next one
//! (catch-up) instead of sleeping.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::collector::Shared;
use crate::collector::clock::Clock;
use crate::collector::normalize::{NormalizeError, Normalizer, Sample};
use crate::collector::traits::{ClientError, ProtocolClient};
use crate::fmt::FmtStyle;
use crate::storage::StoreError;
use crate::util::Backoff;

/// Longest uninterrupted sleep before the stop flag is re-checked.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// How transient poll failures are retried before giving up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt; 0 makes every failure fatal.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
        }
    }
}

/// Failure of a single poll.
#[derive(Debug)]
pub enum PollError {
    Client(ClientError),
    Malformed(NormalizeError),
}

impl PollError {
    pub fn is_transient(&self) -> bool {
        match self {
            PollError::Client(e) => e.is_transient(),
            PollError::Malformed(_) => false,
        }
    }

    /// The agent answered, but not with what was asked for.
    pub fn is_malformed_response(&self) -> bool {
        matches!(self, PollError::Malformed(e) if e.is_malformed_response())
    }
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Client(e) => write!(f, "{}", e),
            PollError::Malformed(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PollError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Client(e) => Some(e),
            PollError::Malformed(e) => Some(e),
        }
    }
}

impl From<ClientError> for PollError {
    fn from(e: ClientError) -> Self {
        PollError::Client(e)
    }
}

impl From<NormalizeError> for PollError {
    fn from(e: NormalizeError) -> Self {
        PollError::Malformed(e)
    }
}

/// Failure that ends the sampling loop.
#[derive(Debug)]
pub enum SamplerError {
    /// Polling failed fatally, or kept failing past the retry budget.
    Poll { attempts: u32, source: PollError },
    /// The archive rejected an update in a way that cannot be skipped.
    Store(StoreError),
}

impl fmt::Display for SamplerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerError::Poll { attempts, source } => {
                write!(f, "poll failed after {} attempt(s): {}", attempts, source)
            }
            SamplerError::Store(e) => write!(f, "archive update failed: {}", e),
        }
    }
}

impl std::error::Error for SamplerError {}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Snapshot published and archive updated.
    Recorded,
    /// Snapshot published, archive update rejected and skipped.
    Skipped,
    /// Stop requested before a snapshot was obtained.
    Stopped,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub cycles: u64,
    pub recorded: u64,
    pub skipped: u64,
    pub retries: u64,
    /// Cycles that overran the interval and started the next one immediately.
    pub overruns: u64,
}

pub struct Sampler<C: ProtocolClient> {
    client: C,
    normalizer: Normalizer,
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    retry: RetryPolicy,
    stats: SamplerStats,
}

impl<C: ProtocolClient> Sampler<C> {
    pub fn new(
        client: C,
        normalizer: Normalizer,
        shared: Arc<Shared>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            normalizer,
            shared,
            clock,
            interval,
            retry,
            stats: SamplerStats::default(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Issues one batched request and normalizes the response.
    pub fn poll(&mut self) -> Result<Sample, PollError> {
        let vars = self.client.get(&self.normalizer.oids())?;
        let captured_at = self.clock.unix_now();
        Ok(self.normalizer.normalize(captured_at, &vars)?)
    }

    /// Polls, retrying transient failures with backoff. `None` when stopped.
    fn poll_with_retry(&mut self, stop: &AtomicBool) -> Result<Option<Sample>, SamplerError> {
        let mut backoff = Backoff::new(self.retry.initial_backoff, self.retry.max_backoff);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.poll() {
                Ok(sample) => return Ok(Some(sample)),
                Err(PollError::Client(ClientError::Cancelled)) => return Ok(None),
                Err(e) if e.is_transient() && attempts <= self.retry.max_retries => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Poll failed ({}), retry {}/{} in {:?}",
                        e, attempts, self.retry.max_retries, delay
                    );
                    self.stats.retries += 1;
                    if !self.sleep_until(self.clock.now() + delay, stop) {
                        return Ok(None);
                    }
                }
                Err(source) => {
                    if source.is_malformed_response() {
                        warn!("Agent sent a malformed response: {}", source);
                    }
                    return Err(SamplerError::Poll { attempts, source });
                }
            }
        }
    }

    /// Runs one poll-publish-update cycle.
    pub fn run_cycle(&mut self, stop: &AtomicBool) -> Result<CycleOutcome, SamplerError> {
        let Some(sample) = self.poll_with_retry(stop)? else {
            return Ok(CycleOutcome::Stopped);
        };
        let captured_at = sample.snapshot.captured_at;
        self.shared.publish(sample.snapshot);

        let result = self.shared.store().update(captured_at, &sample.ds_values);
        match result {
            Ok(()) => {
                debug!("Archive updated at {} with {:?}", captured_at, sample.ds_values);
                Ok(CycleOutcome::Recorded)
            }
            Err(e) if e.is_skippable() => {
                warn!("Skipping archive update: {}", e);
                Ok(CycleOutcome::Skipped)
            }
            Err(e) => Err(SamplerError::Store(e)),
        }
    }

    /// Loops until `stop` is raised or a fatal error occurs.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<SamplerStats, SamplerError> {
        info!("Sampling every {:?}", self.interval);
        while !stop.load(Ordering::SeqCst) {
            let started = self.clock.now();
            let outcome = match self.run_cycle(stop) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{}", e);
                    return Err(e);
                }
            };
            match outcome {
                CycleOutcome::Stopped => break,
                CycleOutcome::Recorded => self.stats.recorded += 1,
                CycleOutcome::Skipped => self.stats.skipped += 1,
            }
            self.stats.cycles += 1;

            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed >= self.interval {
                self.stats.overruns += 1;
                debug!(
                    "Cycle took {:?} (interval {:?}), starting next immediately",
                    elapsed, self.interval
                );
            } else if !self.sleep_until(started + self.interval, stop) {
                break;
            }

            if let Some(snapshot) = self.shared.latest() {
                info!("{}", snapshot.summary(FmtStyle::Compact));
            }
        }
        info!(
            "Sampler stopped after {} cycles ({} recorded, {} skipped, {} retries)",
            self.stats.cycles, self.stats.recorded, self.stats.skipped, self.stats.retries
        );
        Ok(self.stats)
    }

    /// Sleeps in short slices until `deadline`. Returns `false` if stopped.
    fn sleep_until(&self, deadline: Instant, stop: &AtomicBool) -> bool {
        loop {
            if stop.load(Ordering::SeqCst) {
                return false;
            }
            let remaining = deadline.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return true;
            }
            self.clock.sleep(remaining.min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{FakeClock, MockClient};
    use crate::collector::traits::{ProtocolValue, VarBind};
    use crate::storage::{ArchiveDescriptor, Store};
    use tempfile::{TempDir, tempdir};

    struct Harness {
        _dir: TempDir,
        clock: Arc<FakeClock>,
        stop: Arc<AtomicBool>,
        shared: Arc<Shared>,
        normalizer: Normalizer,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let desc = ArchiveDescriptor::network(dir.path().join("s.rrd"), 5, false);
        let normalizer = Normalizer::for_descriptor(&desc, 2).unwrap();
        let store = Store::create(desc, false).unwrap();
        Harness {
            _dir: dir,
            clock: Arc::new(FakeClock::new(1000)),
            stop: Arc::new(AtomicBool::new(false)),
            shared: Arc::new(Shared::new(store)),
            normalizer,
        }
    }

    fn reply(n: &Normalizer, out_octets: u64) -> Vec<VarBind> {
        let values = [
            ProtocolValue::Integer(75),
            ProtocolValue::Integer(4_194_304),
            ProtocolValue::Integer(1_048_576),
            ProtocolValue::Counter64(out_octets / 2),
            ProtocolValue::Counter64(out_octets),
            ProtocolValue::Gauge32(100_000_000),
        ];
        n.oids()
            .into_iter()
            .zip(values)
            .map(|(oid, v)| VarBind::new(oid, v))
            .collect()
    }

    fn sampler(h: &Harness, client: MockClient, interval: Duration) -> Sampler<MockClient> {
        Sampler::new(
            client,
            h.normalizer.clone(),
            h.shared.clone(),
            h.clock.clone(),
            interval,
            RetryPolicy::default(),
        )
    }

    fn call_offsets(s: &Sampler<MockClient>) -> Vec<Duration> {
        s.client().calls().iter().map(|(t, _)| *t).collect()
    }

    #[test]
    fn test_cadence_does_not_drift() {
        let h = harness();
        let mut client = MockClient::new(h.clock.clone())
            .with_latency(Duration::from_millis(1300))
            .stop_when_exhausted(h.stop.clone());
        for i in 0..10u64 {
            client.push_reply(reply(&h.normalizer, i * 5000));
        }
        let mut s = sampler(&h, client, Duration::from_secs(5));

        let stats = s.run(&h.stop).unwrap();
        assert_eq!(stats.cycles, 10);
        assert_eq!(stats.recorded, 10);
        assert_eq!(stats.overruns, 0);
        let expected: Vec<Duration> = (0..=10).map(|i| Duration::from_secs(5 * i)).collect();
        assert_eq!(call_offsets(&s), expected);
    }

    #[test]
    fn test_slow_poll_catches_up_without_sleeping() {
        let h = harness();
        let mut client = MockClient::new(h.clock.clone())
            .with_latency(Duration::from_secs(7))
            .stop_when_exhausted(h.stop.clone());
        for i in 0..3u64 {
            client.push_reply(reply(&h.normalizer, i * 100));
        }
        let mut s = sampler(&h, client, Duration::from_secs(5));

        let stats = s.run(&h.stop).unwrap();
        assert_eq!(stats.overruns, 3);
        let expected: Vec<Duration> = (0..=3).map(|i| Duration::from_secs(7 * i)).collect();
        assert_eq!(call_offsets(&s), expected);
    }

    #[test]
    fn test_one_batched_request_and_one_update_per_cycle() {
        let h = harness();
        let mut client = MockClient::new(h.clock.clone())
            .with_latency(Duration::from_secs(1))
            .stop_when_exhausted(h.stop.clone());
        for i in 0..5u64 {
            client.push_reply(reply(&h.normalizer, i * 1000));
        }
        let mut s = sampler(&h, client, Duration::from_secs(5));
        s.run(&h.stop).unwrap();

        // 5 replies plus the call that found the script empty.
        assert_eq!(s.client().calls().len(), 6);
        assert!(s.client().calls().iter().all(|(_, oids)| oids.len() == 6));

        let store = h.shared.store();
        assert_eq!(store.last_update(), Some(1021));
        // PDPs end at 1005..1020; rows every 2 steps at 1010 and 1020.
        assert_eq!(store.archives()[0].len(), 2);
        assert!(store.archives()[0]
            .rows()
            .iter()
            .all(|r| r.values[0] == Some(200.0)));
        drop(store);

        let latest = h.shared.latest().unwrap();
        assert_eq!(latest.captured_at, 1021);
        assert_eq!(latest.if_out_octets, 4000);
        assert_eq!(latest.cpu_usage_percent(), 25);
    }

    #[test]
    fn test_transient_failures_retry_then_recover() {
        let h = harness();
        let mut client = MockClient::new(h.clock.clone()).stop_when_exhausted(h.stop.clone());
        client.push_error(ClientError::Timeout);
        client.push_error(ClientError::Timeout);
        client.push_reply(reply(&h.normalizer, 10));
        let mut s = sampler(&h, client, Duration::from_secs(5));

        assert_eq!(s.run_cycle(&h.stop).unwrap(), CycleOutcome::Recorded);
        assert_eq!(s.stats().retries, 2);
        // Backoff 500ms then 1s.
        assert_eq!(h.clock.elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn test_retry_budget_exhaustion_is_fatal() {
        let h = harness();
        let mut client = MockClient::new(h.clock.clone());
        for _ in 0..4 {
            client.push_error(ClientError::Timeout);
        }
        client.push_reply(reply(&h.normalizer, 10));
        let mut s = sampler(&h, client, Duration::from_secs(5));

        let err = s.run(&h.stop).unwrap_err();
        assert!(matches!(
            err,
            SamplerError::Poll {
                attempts: 4,
                source: PollError::Client(ClientError::Timeout)
            }
        ));
        assert_eq!(h.clock.elapsed(), Duration::from_millis(500 + 1000 + 2000));
        assert!(h.shared.latest().is_none());
    }

    #[test]
    fn test_protocol_and_shape_errors_are_fatal_at_once() {
        let h = harness();
        let mut client = MockClient::new(h.clock.clone());
        client.push_error(ClientError::ErrorStatus { status: 2, index: 5 });
        let mut s = sampler(&h, client, Duration::from_secs(5));
        match s.run_cycle(&h.stop) {
            Err(SamplerError::Poll { attempts: 1, source }) => {
                assert!(!source.is_transient());
                assert!(!source.is_malformed_response());
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut client = MockClient::new(h.clock.clone());
        let mut short = reply(&h.normalizer, 1);
        short.truncate(3);
        client.push_reply(short);
        let mut s = sampler(&h, client, Duration::from_secs(5));
        match s.run_cycle(&h.stop) {
            Err(SamplerError::Poll { source, .. }) => {
                assert!(source.is_malformed_response());
                assert!(matches!(
                    source,
                    PollError::Malformed(NormalizeError::CountMismatch { .. })
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.shared.store().last_update(), None);
    }

    #[test]
    fn test_same_second_updates_are_skipped_not_fatal() {
        let h = harness();
        let mut client = MockClient::new(h.clock.clone()).stop_when_exhausted(h.stop.clone());
        for i in 0..3u64 {
            client.push_reply(reply(&h.normalizer, i));
        }
        let mut s = sampler(&h, client, Duration::from_millis(300));

        let stats = s.run(&h.stop).unwrap();
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.recorded, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(h.shared.store().last_update(), Some(1000));
        // The skipped cycles still published their snapshots.
        assert_eq!(h.shared.latest().unwrap().if_out_octets, 2);
    }

    #[test]
    fn test_stop_interrupts_sleep_and_backoff() {
        let h = harness();
        let mut client = MockClient::new(h.clock.clone());
        client.push_reply(reply(&h.normalizer, 1));
        let mut s = sampler(&h, client, Duration::from_secs(5));
        h.stop.store(true, Ordering::SeqCst);

        let stats = s.run(&h.stop).unwrap();
        assert_eq!(stats.cycles, 0);
        assert!(s.client().calls().is_empty());
        assert!(!s.sleep_until(h.clock.now() + Duration::from_secs(60), &h.stop));
        assert_eq!(h.clock.elapsed(), Duration::ZERO);
    }
}
