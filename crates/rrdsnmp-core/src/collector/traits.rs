//! Abstractions for management-protocol access to enable testing and mocking.
//!
//! The `ProtocolClient` trait lets the sampler talk to a real SNMP agent over
//! UDP or to a scripted mock in tests.

use std::fmt;
use std::io;

use crate::collector::oids::Oid;

/// A typed value returned by the agent for one variable binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolValue {
    /// INTEGER; BER allows arbitrary width, 128 bits covers every agent seen in practice.
    Integer(i128),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl ProtocolValue {
    /// Returns the value as an unsigned integer, if it is numeric and non-negative.
    pub fn as_unsigned(&self) -> Option<u128> {
        match self {
            ProtocolValue::Integer(v) => u128::try_from(*v).ok(),
            ProtocolValue::Counter32(v)
            | ProtocolValue::Gauge32(v)
            | ProtocolValue::TimeTicks(v) => Some(u128::from(*v)),
            ProtocolValue::Counter64(v) => Some(u128::from(*v)),
            _ => None,
        }
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            ProtocolValue::Integer(_) => "Integer",
            ProtocolValue::OctetString(_) => "OctetString",
            ProtocolValue::Null => "Null",
            ProtocolValue::ObjectId(_) => "ObjectIdentifier",
            ProtocolValue::IpAddress(_) => "IpAddress",
            ProtocolValue::Counter32(_) => "Counter32",
            ProtocolValue::Gauge32(_) => "Gauge32",
            ProtocolValue::TimeTicks(_) => "TimeTicks",
            ProtocolValue::Opaque(_) => "Opaque",
            ProtocolValue::Counter64(_) => "Counter64",
            ProtocolValue::NoSuchObject => "noSuchObject",
            ProtocolValue::NoSuchInstance => "noSuchInstance",
            ProtocolValue::EndOfMibView => "endOfMibView",
        }
    }
}

/// One (OID, value) pair of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: ProtocolValue,
}

impl VarBind {
    pub fn new(oid: Oid, value: ProtocolValue) -> Self {
        Self { oid, value }
    }
}

/// Error type for protocol client failures.
#[derive(Debug)]
pub enum ClientError {
    /// No response arrived within the request timeout.
    Timeout,
    /// The request was abandoned because shutdown was requested.
    Cancelled,
    /// Socket-level failure.
    Io(io::Error),
    /// The response could not be decoded.
    Decode(String),
    /// The agent answered with a non-zero error-status.
    ErrorStatus { status: i64, index: i64 },
}

impl ClientError {
    /// Whether the failure is likely to clear up on its own (timeouts,
    /// temporarily unreachable peers).
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Timeout => true,
            ClientError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
            ),
            ClientError::Cancelled | ClientError::Decode(_) | ClientError::ErrorStatus { .. } => {
                false
            }
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Timeout => write!(f, "request timed out"),
            ClientError::Cancelled => write!(f, "request cancelled"),
            ClientError::Io(e) => write!(f, "I/O error: {}", e),
            ClientError::Decode(msg) => write!(f, "decode error: {}", msg),
            ClientError::ErrorStatus { status, index } => {
                write!(f, "agent error-status {} at index {}", status, index)
            }
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}

/// Synchronous request/response access to a management agent.
pub trait ProtocolClient: Send {
    /// Fetches all `oids` in a single request.
    ///
    /// Returns the variable bindings in the order the agent sent them.
    fn get(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, ClientError>;
}

impl<T: ProtocolClient + ?Sized> ProtocolClient for Box<T> {
    fn get(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, ClientError> {
        (**self).get(oids)
    }
}
