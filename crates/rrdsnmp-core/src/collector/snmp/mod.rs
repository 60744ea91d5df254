//! SNMPv2c GET client over UDP.
//!
//! All OIDs of a poll travel in one GetRequest. The receive loop waits in short
//! slices so that a cancellation flag is honoured while a peer is stalled.

pub mod ber;

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::collector::oids::Oid;
use crate::collector::traits::{ClientError, ProtocolClient, VarBind};

/// Longest single blocking receive before the cancellation flag is re-checked.
const RECV_SLICE: Duration = Duration::from_millis(100);

/// Largest possible UDP payload.
const MAX_DATAGRAM: usize = 65_507;

pub struct SnmpClient {
    socket: UdpSocket,
    peer: SocketAddr,
    community: Vec<u8>,
    timeout: Duration,
    next_request_id: i32,
    cancel: Option<Arc<AtomicBool>>,
    recv_buf: Vec<u8>,
}

impl SnmpClient {
    /// Resolves `host:port` and binds a local UDP socket connected to it.
    ///
    /// UDP has no handshake, so this only fails on resolution or socket errors.
    pub fn connect(host: &str, port: u16, community: &str, timeout: Duration) -> io::Result<Self> {
        let peer = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for {}", host),
            )
        })?;

        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(1);

        debug!("SNMP session bound {} -> {}", socket.local_addr()?, peer);

        Ok(Self {
            socket,
            peer,
            community: community.as_bytes().to_vec(),
            timeout,
            next_request_id: (seed & 0x3fff_ffff) as i32 + 1,
            cancel: None,
            recv_buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// Aborts in-flight requests once `flag` becomes `true`.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn next_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = if id >= i32::MAX - 1 { 1 } else { id + 1 };
        id
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

impl ProtocolClient for SnmpClient {
    fn get(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, ClientError> {
        let request_id = self.next_id();
        let packet = ber::encode_get_request(&self.community, request_id, oids);
        self.socket.send(&packet)?;
        trace!(request_id, oids = oids.len(), bytes = packet.len(), "GetRequest sent");

        let deadline = Instant::now() + self.timeout;
        loop {
            if self.cancelled() {
                return Err(ClientError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Timeout);
            }
            self.socket
                .set_read_timeout(Some((deadline - now).min(RECV_SLICE)))?;

            let n = match self.socket.recv(&mut self.recv_buf) {
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let response = ber::decode_response(&self.recv_buf[..n])
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            if response.request_id != request_id {
                debug!(
                    expected = request_id,
                    got = response.request_id,
                    "discarding stale SNMP response"
                );
                continue;
            }
            if response.error_status != 0 {
                return Err(ClientError::ErrorStatus {
                    status: response.error_status,
                    index: response.error_index,
                });
            }
            return Ok(response.varbinds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::traits::ProtocolValue;
    use std::thread;

    /// Answers one GetRequest with `values` (paired with the requested OIDs).
    /// A stale response with the wrong request-id is sent first.
    fn spawn_agent(values: Vec<ProtocolValue>) -> (SocketAddr, thread::JoinHandle<Vec<Oid>>) {
        let agent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = agent.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let (n, from) = agent.recv_from(&mut buf).unwrap();
            let (community, request_id, oids) = ber::decode_get_request(&buf[..n]).unwrap();
            assert_eq!(community, b"public");

            let stale = ber::encode_response(&community, request_id.wrapping_add(1000), 0, &[]);
            agent.send_to(&stale, from).unwrap();

            let varbinds: Vec<VarBind> = oids
                .iter()
                .cloned()
                .zip(values)
                .map(|(oid, value)| VarBind::new(oid, value))
                .collect();
            let reply = ber::encode_response(&community, request_id, 0, &varbinds);
            agent.send_to(&reply, from).unwrap();
            oids
        });
        (addr, handle)
    }

    #[test]
    fn test_batched_get_against_local_agent() {
        let (addr, agent) = spawn_agent(vec![
            ProtocolValue::Integer(93),
            ProtocolValue::Counter64(123_456_789_012),
        ]);
        let mut client =
            SnmpClient::connect("127.0.0.1", addr.port(), "public", Duration::from_secs(2)).unwrap();
        assert_eq!(client.peer(), addr);
        let oids: Vec<Oid> = vec![
            ".1.3.6.1.4.1.2021.11.11.0".parse().unwrap(),
            ".1.3.6.1.2.1.31.1.1.1.10.2".parse().unwrap(),
        ];

        let varbinds = client.get(&oids).unwrap();

        let requested = agent.join().unwrap();
        assert_eq!(requested, oids, "all OIDs travel in one request");
        assert_eq!(varbinds.len(), 2);
        assert_eq!(varbinds[0].value, ProtocolValue::Integer(93));
        assert_eq!(varbinds[1].value, ProtocolValue::Counter64(123_456_789_012));
    }

    #[test]
    fn test_silent_peer_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        let mut client =
            SnmpClient::connect("127.0.0.1", port, "public", Duration::from_millis(250)).unwrap();

        let started = Instant::now();
        let result = client.get(&[".1.3.6.1.2.1.1.3.0".parse().unwrap()]);

        assert!(matches!(result, Err(ClientError::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[test]
    fn test_cancel_flag_aborts_request() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        let flag = Arc::new(AtomicBool::new(true));
        let mut client =
            SnmpClient::connect("127.0.0.1", port, "public", Duration::from_secs(30))
                .unwrap()
                .with_cancel(flag);

        let result = client.get(&[".1.3.6.1.2.1.1.3.0".parse().unwrap()]);
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[test]
    fn test_request_ids_stay_positive() {
        let mut client =
            SnmpClient::connect("127.0.0.1", 161, "public", Duration::from_secs(1)).unwrap();
        client.next_request_id = i32::MAX - 1;
        assert_eq!(client.next_id(), i32::MAX - 1);
        assert_eq!(client.next_id(), 1);
    }
}
