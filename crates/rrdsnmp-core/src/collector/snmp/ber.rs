//! Minimal BER codec for SNMPv2c GetRequest / Response messages.
//!
//! Message layout:
//! ```text
//! SEQUENCE {
//!   INTEGER      version          (1 = v2c)
//!   OCTET STRING community
//!   PDU [A0 GetRequest | A2 Response] {
//!     INTEGER request-id
//!     INTEGER error-status
//!     INTEGER error-index
//!     SEQUENCE OF SEQUENCE { OBJECT IDENTIFIER, value }
//!   }
//! }
//! ```

use std::fmt;

use crate::collector::oids::Oid;
use crate::collector::traits::{ProtocolValue, VarBind};

pub(crate) const TAG_INTEGER: u8 = 0x02;
pub(crate) const TAG_OCTET_STRING: u8 = 0x04;
pub(crate) const TAG_NULL: u8 = 0x05;
pub(crate) const TAG_OID: u8 = 0x06;
pub(crate) const TAG_SEQUENCE: u8 = 0x30;
pub(crate) const TAG_IP_ADDRESS: u8 = 0x40;
pub(crate) const TAG_COUNTER32: u8 = 0x41;
pub(crate) const TAG_GAUGE32: u8 = 0x42;
pub(crate) const TAG_TIMETICKS: u8 = 0x43;
pub(crate) const TAG_OPAQUE: u8 = 0x44;
pub(crate) const TAG_COUNTER64: u8 = 0x46;
pub(crate) const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub(crate) const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub(crate) const TAG_END_OF_MIB_VIEW: u8 = 0x82;
pub(crate) const TAG_GET_REQUEST: u8 = 0xA0;
pub(crate) const TAG_RESPONSE: u8 = 0xA2;

pub(crate) const VERSION_2C: i64 = 1;

/// Error for malformed BER input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BerError(pub String);

impl fmt::Display for BerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BerError {}

fn err<T>(msg: impl Into<String>) -> Result<T, BerError> {
    Err(BerError(msg.into()))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub(crate) fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

pub(crate) fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    write_length(out, content.len());
    out.extend_from_slice(content);
}

/// Minimal two's-complement encoding of a signed integer.
pub(crate) fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        let redundant = (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut tmp = [0u8; 10];
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = tmp.len() - 1;
    for b in &mut tmp[i..last] {
        *b |= 0x80;
    }
    out.extend_from_slice(&tmp[i..]);
}

pub(crate) fn encode_oid(oid: &Oid) -> Vec<u8> {
    let arcs = oid.arcs();
    let mut out = Vec::with_capacity(arcs.len() + 2);
    match arcs {
        [] => {}
        [first] => push_base128(&mut out, u64::from(*first) * 40),
        [first, second, rest @ ..] => {
            push_base128(&mut out, u64::from(*first) * 40 + u64::from(*second));
            for arc in rest {
                push_base128(&mut out, u64::from(*arc));
            }
        }
    }
    out
}

/// Builds a complete v2c GetRequest message for `oids`.
pub fn encode_get_request(community: &[u8], request_id: i32, oids: &[Oid]) -> Vec<u8> {
    let mut varbinds = Vec::with_capacity(oids.len() * 16);
    for oid in oids {
        let mut vb = Vec::with_capacity(16);
        write_tlv(&mut vb, TAG_OID, &encode_oid(oid));
        write_tlv(&mut vb, TAG_NULL, &[]);
        write_tlv(&mut varbinds, TAG_SEQUENCE, &vb);
    }

    let mut pdu = Vec::with_capacity(varbinds.len() + 16);
    write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(i64::from(request_id)));
    write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(0));
    write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(0));
    write_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

    let mut msg = Vec::with_capacity(pdu.len() + community.len() + 8);
    write_tlv(&mut msg, TAG_INTEGER, &encode_integer(VERSION_2C));
    write_tlv(&mut msg, TAG_OCTET_STRING, community);
    write_tlv(&mut msg, TAG_GET_REQUEST, &pdu);

    let mut out = Vec::with_capacity(msg.len() + 4);
    write_tlv(&mut out, TAG_SEQUENCE, &msg);
    out
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Sequential TLV reader over a byte slice.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self) -> Result<u8, BerError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| BerError("unexpected end of input".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn length(&mut self) -> Result<usize, BerError> {
        let first = self.byte()?;
        if first < 0x80 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 {
            return err(format!("unsupported length form 0x{:02x}", first));
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | usize::from(self.byte()?);
        }
        Ok(len)
    }

    pub(crate) fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), BerError> {
        let tag = self.byte()?;
        let len = self.length()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| BerError(format!("length {} overruns buffer", len)))?;
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    pub(crate) fn expect(&mut self, tag: u8) -> Result<&'a [u8], BerError> {
        let (got, content) = self.read_tlv()?;
        if got != tag {
            return err(format!("expected tag 0x{:02x}, got 0x{:02x}", tag, got));
        }
        Ok(content)
    }
}

pub(crate) fn decode_integer(content: &[u8]) -> Result<i128, BerError> {
    if content.is_empty() {
        return err("empty INTEGER");
    }
    if content.len() > 16 {
        return err(format!("INTEGER of {} bytes exceeds 128 bits", content.len()));
    }
    let mut value: i128 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | i128::from(*b);
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8], max_bytes: usize) -> Result<u64, BerError> {
    if content.is_empty() {
        return err("empty unsigned value");
    }
    let skip = content.iter().take_while(|b| **b == 0).count();
    let significant = &content[skip..];
    if significant.len() > max_bytes {
        return err(format!("unsigned value of {} bytes too wide", content.len()));
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn decode_u32(content: &[u8]) -> Result<u32, BerError> {
    // Width was checked to 4 significant bytes.
    decode_unsigned(content, 4).map(|v| v as u32)
}

pub(crate) fn decode_oid(content: &[u8]) -> Result<Oid, BerError> {
    if content.is_empty() {
        return err("empty OBJECT IDENTIFIER");
    }
    let mut subids = Vec::with_capacity(content.len() + 1);
    let mut acc: u64 = 0;
    let mut pending = false;
    for b in content {
        if acc > (u64::MAX >> 7) {
            return err("OID sub-identifier overflow");
        }
        acc = (acc << 7) | u64::from(b & 0x7f);
        pending = true;
        if b & 0x80 == 0 {
            subids.push(acc);
            acc = 0;
            pending = false;
        }
    }
    if pending {
        return err("truncated OID sub-identifier");
    }

    let first = subids[0];
    let (a, b) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };
    let mut arcs = Vec::with_capacity(subids.len() + 1);
    arcs.push(a as u32);
    for v in std::iter::once(b).chain(subids[1..].iter().copied()) {
        arcs.push(u32::try_from(v).map_err(|_| BerError("OID arc exceeds 32 bits".to_string()))?);
    }
    Ok(Oid::new(arcs))
}

fn decode_value(tag: u8, content: &[u8]) -> Result<ProtocolValue, BerError> {
    let value = match tag {
        TAG_INTEGER => ProtocolValue::Integer(decode_integer(content)?),
        TAG_OCTET_STRING => ProtocolValue::OctetString(content.to_vec()),
        TAG_NULL => ProtocolValue::Null,
        TAG_OID => ProtocolValue::ObjectId(decode_oid(content)?),
        TAG_IP_ADDRESS => {
            let octets: [u8; 4] = content
                .try_into()
                .map_err(|_| BerError(format!("IpAddress of {} bytes", content.len())))?;
            ProtocolValue::IpAddress(octets)
        }
        TAG_COUNTER32 => ProtocolValue::Counter32(decode_u32(content)?),
        TAG_GAUGE32 => ProtocolValue::Gauge32(decode_u32(content)?),
        TAG_TIMETICKS => ProtocolValue::TimeTicks(decode_u32(content)?),
        TAG_OPAQUE => ProtocolValue::Opaque(content.to_vec()),
        TAG_COUNTER64 => ProtocolValue::Counter64(decode_unsigned(content, 8)?),
        TAG_NO_SUCH_OBJECT => ProtocolValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => ProtocolValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => ProtocolValue::EndOfMibView,
        other => return err(format!("unsupported value tag 0x{:02x}", other)),
    };
    Ok(value)
}

/// A decoded Response PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

fn small_int(content: &[u8], what: &str) -> Result<i64, BerError> {
    i64::try_from(decode_integer(content)?).map_err(|_| BerError(format!("{} out of range", what)))
}

/// Decodes a complete v2c Response message.
pub fn decode_response(buf: &[u8]) -> Result<Response, BerError> {
    let mut outer = Reader::new(buf);
    let mut msg = Reader::new(outer.expect(TAG_SEQUENCE)?);

    let version = small_int(msg.expect(TAG_INTEGER)?, "version")?;
    if version != VERSION_2C {
        return err(format!("unsupported SNMP version {}", version));
    }
    let _community = msg.expect(TAG_OCTET_STRING)?;

    let mut pdu = Reader::new(msg.expect(TAG_RESPONSE)?);
    let request_id = i32::try_from(small_int(pdu.expect(TAG_INTEGER)?, "request-id")?)
        .map_err(|_| BerError("request-id out of range".to_string()))?;
    let error_status = small_int(pdu.expect(TAG_INTEGER)?, "error-status")?;
    let error_index = small_int(pdu.expect(TAG_INTEGER)?, "error-index")?;

    let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let mut vb = Reader::new(list.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(vb.expect(TAG_OID)?)?;
        let (tag, content) = vb.read_tlv()?;
        varbinds.push(VarBind::new(oid, decode_value(tag, content)?));
    }

    Ok(Response {
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

// ---------------------------------------------------------------------------
// Agent-side helpers for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) fn encode_value(value: &ProtocolValue) -> (u8, Vec<u8>) {
    fn unsigned(v: u64) -> Vec<u8> {
        let bytes = v.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
        let mut out = Vec::new();
        if bytes[skip] & 0x80 != 0 {
            out.push(0);
        }
        out.extend_from_slice(&bytes[skip..]);
        out
    }
    match value {
        ProtocolValue::Integer(v) => (TAG_INTEGER, encode_integer(*v as i64)),
        ProtocolValue::OctetString(s) => (TAG_OCTET_STRING, s.clone()),
        ProtocolValue::Null => (TAG_NULL, Vec::new()),
        ProtocolValue::ObjectId(o) => (TAG_OID, encode_oid(o)),
        ProtocolValue::IpAddress(ip) => (TAG_IP_ADDRESS, ip.to_vec()),
        ProtocolValue::Counter32(v) => (TAG_COUNTER32, unsigned(u64::from(*v))),
        ProtocolValue::Gauge32(v) => (TAG_GAUGE32, unsigned(u64::from(*v))),
        ProtocolValue::TimeTicks(v) => (TAG_TIMETICKS, unsigned(u64::from(*v))),
        ProtocolValue::Opaque(b) => (TAG_OPAQUE, b.clone()),
        ProtocolValue::Counter64(v) => (TAG_COUNTER64, unsigned(*v)),
        ProtocolValue::NoSuchObject => (TAG_NO_SUCH_OBJECT, Vec::new()),
        ProtocolValue::NoSuchInstance => (TAG_NO_SUCH_INSTANCE, Vec::new()),
        ProtocolValue::EndOfMibView => (TAG_END_OF_MIB_VIEW, Vec::new()),
    }
}

#[cfg(test)]
pub(crate) fn encode_response(
    community: &[u8],
    request_id: i32,
    error_status: i64,
    varbinds: &[VarBind],
) -> Vec<u8> {
    let mut list = Vec::new();
    for vb in varbinds {
        let mut entry = Vec::new();
        write_tlv(&mut entry, TAG_OID, &encode_oid(&vb.oid));
        let (tag, content) = encode_value(&vb.value);
        write_tlv(&mut entry, tag, &content);
        write_tlv(&mut list, TAG_SEQUENCE, &entry);
    }
    let mut pdu = Vec::new();
    write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(i64::from(request_id)));
    write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(error_status));
    write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(0));
    write_tlv(&mut pdu, TAG_SEQUENCE, &list);
    let mut msg = Vec::new();
    write_tlv(&mut msg, TAG_INTEGER, &encode_integer(VERSION_2C));
    write_tlv(&mut msg, TAG_OCTET_STRING, community);
    write_tlv(&mut msg, TAG_RESPONSE, &pdu);
    let mut out = Vec::new();
    write_tlv(&mut out, TAG_SEQUENCE, &msg);
    out
}

/// Agent-side view of a GetRequest: (community, request-id, requested OIDs).
#[cfg(test)]
pub(crate) fn decode_get_request(buf: &[u8]) -> Result<(Vec<u8>, i32, Vec<Oid>), BerError> {
    let mut outer = Reader::new(buf);
    let mut msg = Reader::new(outer.expect(TAG_SEQUENCE)?);
    let _version = msg.expect(TAG_INTEGER)?;
    let community = msg.expect(TAG_OCTET_STRING)?.to_vec();
    let mut pdu = Reader::new(msg.expect(TAG_GET_REQUEST)?);
    let request_id = decode_integer(pdu.expect(TAG_INTEGER)?)? as i32;
    pdu.expect(TAG_INTEGER)?;
    pdu.expect(TAG_INTEGER)?;
    let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
    let mut oids = Vec::new();
    while !list.is_empty() {
        let mut vb = Reader::new(list.expect(TAG_SEQUENCE)?);
        oids.push(decode_oid(vb.expect(TAG_OID)?)?);
        vb.expect(TAG_NULL)?;
    }
    Ok((community, request_id, oids))
}
