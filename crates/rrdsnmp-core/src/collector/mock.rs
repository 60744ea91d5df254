//! Scripted protocol client and manual clock for testing the sampler without
//! a network or real time passing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::collector::clock::Clock;
use crate::collector::oids::Oid;
use crate::collector::traits::{ClientError, ProtocolClient, VarBind};

/// Clock that only moves when slept on or advanced explicitly.
#[derive(Debug)]
pub struct FakeClock {
    origin: Instant,
    unix_origin: i64,
    elapsed: Mutex<Duration>,
}

impl FakeClock {
    pub fn new(unix_origin: i64) -> Self {
        Self {
            origin: Instant::now(),
            unix_origin,
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    /// Time passed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn unix_now(&self) -> i64 {
        self.unix_origin + self.elapsed().as_secs() as i64
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Protocol client replaying a script of replies.
///
/// Each `get` advances the clock by the configured latency, then pops the next
/// reply. Once the script is exhausted the optional stop flag is raised and
/// the call reports [`ClientError::Cancelled`], which ends a sampler run.
pub struct MockClient {
    clock: Arc<FakeClock>,
    latency: Duration,
    script: VecDeque<Result<Vec<VarBind>, ClientError>>,
    stop_when_exhausted: Option<Arc<AtomicBool>>,
    calls: Vec<(Duration, Vec<Oid>)>,
}

impl MockClient {
    pub fn new(clock: Arc<FakeClock>) -> Self {
        Self {
            clock,
            latency: Duration::ZERO,
            script: VecDeque::new(),
            stop_when_exhausted: None,
            calls: Vec::new(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn stop_when_exhausted(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_when_exhausted = Some(flag);
        self
    }

    pub fn push_reply(&mut self, vars: Vec<VarBind>) {
        self.script.push_back(Ok(vars));
    }

    pub fn push_error(&mut self, err: ClientError) {
        self.script.push_back(Err(err));
    }

    /// Clock offset and requested OIDs of every call, in order.
    pub fn calls(&self) -> &[(Duration, Vec<Oid>)] {
        &self.calls
    }
}

impl ProtocolClient for MockClient {
    fn get(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, ClientError> {
        self.calls.push((self.clock.elapsed(), oids.to_vec()));
        self.clock.advance(self.latency);
        match self.script.pop_front() {
            Some(reply) => reply,
            None => {
                if let Some(flag) = &self.stop_when_exhausted {
                    flag.store(true, Ordering::SeqCst);
                }
                Err(ClientError::Cancelled)
            }
        }
    }
}
