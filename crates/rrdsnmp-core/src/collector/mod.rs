//! Host metrics collection over SNMP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Sampler                          │
//! │   fixed cadence, catch-up on overrun, bounded retries    │
//! │                                                          │
//! │  ┌────────────────┐   ┌────────────┐   ┌──────────────┐  │
//! │  │ ProtocolClient │──▶│ Normalizer │──▶│    Shared    │  │
//! │  │    (trait)     │   │  (pure)    │   │ latest│store │  │
//! │  └───────┬────────┘   └────────────┘   └──────────────┘  │
//! └──────────┼───────────────────────────────────────────────┘
//!            │
//!     ┌──────┴───────┐
//!     │              │
//! ┌───▼────────┐ ┌───▼────────┐
//! │ SnmpClient │ │ MockClient │
//! │ (UDP v2c)  │ │ (Testing)  │
//! └────────────┘ └────────────┘
//! ```

pub mod clock;
pub mod mock;
pub mod normalize;
pub mod oids;
pub mod sampler;
mod shared;
pub mod snmp;
pub mod traits;

pub use clock::{Clock, SystemClock};
pub use mock::{FakeClock, MockClient};
pub use normalize::{NormalizeError, Normalizer, Sample};
pub use oids::{Metric, OID_CATALOG, Oid};
pub use sampler::{CycleOutcome, PollError, RetryPolicy, Sampler, SamplerError, SamplerStats};
pub use shared::Shared;
pub use snmp::SnmpClient;
pub use traits::{ClientError, ProtocolClient, ProtocolValue, VarBind};
