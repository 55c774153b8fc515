//! Minimal STUN binding client (RFC 5389 subset)
//!
//! Hand-framed binding requests over UDP: enough to learn our reflexive
//! mapping from a public server and to issue RFC 3489 CHANGE-REQUEST
//! probes for cone classification. No authentication attributes - the
//! classification layer treats absent or implausible responses as
//! conservative results, never as trust.

use crate::{NetworkError, Result};
use rand::RngCore;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::trace;

/// STUN magic cookie
const MAGIC: u32 = 0x2112_A442;

/// Binding request message type
const BINDING_REQUEST: u16 = 0x0001;

/// Binding success response message type
const BINDING_SUCCESS: u16 = 0x0101;

/// XOR-MAPPED-ADDRESS attribute
const ATTR_XOR_MAPPED: u16 = 0x0020;

/// MAPPED-ADDRESS attribute (legacy servers)
const ATTR_MAPPED: u16 = 0x0001;

/// CHANGE-REQUEST attribute (RFC 3489)
const ATTR_CHANGE_REQUEST: u16 = 0x0003;

/// CHANGE-REQUEST flag: reply from a different IP
pub const CHANGE_IP: u32 = 0x04;

/// CHANGE-REQUEST flag: reply from a different port
pub const CHANGE_PORT: u32 = 0x02;

/// Default per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Build a binding request; returns (message, transaction id)
pub fn build_binding_request(change_flags: Option<u32>) -> (Vec<u8>, [u8; 12]) {
    let mut txid = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut txid);

    let attr_len: u16 = if change_flags.is_some() { 8 } else { 0 };
    let mut msg = Vec::with_capacity(20 + attr_len as usize);
    msg.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    msg.extend_from_slice(&attr_len.to_be_bytes());
    msg.extend_from_slice(&MAGIC.to_be_bytes());
    msg.extend_from_slice(&txid);
    if let Some(flags) = change_flags {
        msg.extend_from_slice(&ATTR_CHANGE_REQUEST.to_be_bytes());
        msg.extend_from_slice(&4u16.to_be_bytes());
        msg.extend_from_slice(&flags.to_be_bytes());
    }
    (msg, txid)
}

/// Parse a binding success response for our reflexive address
pub fn parse_binding_response(packet: &[u8], txid: &[u8; 12]) -> Result<SocketAddr> {
    if packet.len() < 20 {
        return Err(NetworkError::Stun("response shorter than header".into()));
    }
    let msg_type = u16::from_be_bytes([packet[0], packet[1]]);
    if msg_type != BINDING_SUCCESS {
        return Err(NetworkError::Stun(format!(
            "unexpected message type {:#06x}",
            msg_type
        )));
    }
    let magic = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
    if magic != MAGIC {
        return Err(NetworkError::Stun("bad magic cookie".into()));
    }
    if &packet[8..20] != txid {
        return Err(NetworkError::Stun("transaction id mismatch".into()));
    }

    let body_len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
    let body = packet
        .get(20..20 + body_len)
        .ok_or_else(|| NetworkError::Stun("truncated body".into()))?;

    let mut offset = 0usize;
    let mut fallback_mapped: Option<SocketAddr> = None;
    while offset + 4 <= body.len() {
        let attr_type = u16::from_be_bytes([body[offset], body[offset + 1]]);
        let attr_len = u16::from_be_bytes([body[offset + 2], body[offset + 3]]) as usize;
        let value = body
            .get(offset + 4..offset + 4 + attr_len)
            .ok_or_else(|| NetworkError::Stun("truncated attribute".into()))?;

        match attr_type {
            ATTR_XOR_MAPPED => return parse_address(value, true, txid),
            ATTR_MAPPED => {
                fallback_mapped = parse_address(value, false, txid).ok();
            }
            other => trace!("skipping STUN attribute {:#06x}", other),
        }
        // Attributes are padded to 4-byte boundaries
        offset += 4 + attr_len.div_ceil(4) * 4;
    }

    fallback_mapped.ok_or_else(|| NetworkError::Stun("no mapped address attribute".into()))
}

fn parse_address(value: &[u8], xored: bool, txid: &[u8; 12]) -> Result<SocketAddr> {
    if value.len() < 8 {
        return Err(NetworkError::Stun("short address attribute".into()));
    }
    let family = value[1];
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if xored {
        port ^= (MAGIC >> 16) as u16;
    }
    match family {
        0x01 => {
            let mut octets: [u8; 4] = value[4..8]
                .try_into()
                .map_err(|_| NetworkError::Stun("short v4 address".into()))?;
            if xored {
                let magic = MAGIC.to_be_bytes();
                for (byte, m) in octets.iter_mut().zip(magic) {
                    *byte ^= m;
                }
            }
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        0x02 => {
            let raw = value
                .get(4..20)
                .ok_or_else(|| NetworkError::Stun("short v6 address".into()))?;
            let mut octets: [u8; 16] = raw.try_into().expect("length checked");
            if xored {
                let mut mask = [0u8; 16];
                mask[..4].copy_from_slice(&MAGIC.to_be_bytes());
                mask[4..].copy_from_slice(txid);
                for (byte, m) in octets.iter_mut().zip(mask) {
                    *byte ^= m;
                }
            }
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        other => Err(NetworkError::Stun(format!("unknown family {:#04x}", other))),
    }
}

/// Send one binding request and await the reflexive mapping
pub async fn binding_request(
    socket: &UdpSocket,
    server: SocketAddr,
    change_flags: Option<u32>,
    timeout: Duration,
) -> Result<SocketAddr> {
    let (msg, txid) = build_binding_request(change_flags);
    socket.send_to(&msg, server).await?;

    let mut buf = [0u8; 512];
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or(NetworkError::Timeout("stun request"))?;
        let (len, _from) = tokio::time::timeout(remaining, socket.recv_from(&mut buf))
            .await
            .map_err(|_| NetworkError::Timeout("stun request"))??;
        // Responses to a CHANGE-REQUEST may legitimately arrive from a
        // different source address, so match on transaction id only
        match parse_binding_response(&buf[..len], &txid) {
            Ok(mapped) => return Ok(mapped),
            Err(e) => {
                trace!("ignoring non-matching packet: {}", e);
                continue;
            }
        }
    }
}

/// Resolve a `host:port` STUN server string
pub async fn resolve(server: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(server)
        .await?
        .next()
        .ok_or_else(|| NetworkError::Stun(format!("no address for {}", server)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_success(txid: &[u8; 12], addr: SocketAddr, xored: bool) -> Vec<u8> {
        let (attr_type, value) = match addr.ip() {
            IpAddr::V4(v4) => {
                let mut value = vec![0u8, 0x01];
                let mut port = addr.port();
                let mut octets = v4.octets();
                if xored {
                    port ^= (MAGIC >> 16) as u16;
                    for (b, m) in octets.iter_mut().zip(MAGIC.to_be_bytes()) {
                        *b ^= m;
                    }
                }
                value.extend_from_slice(&port.to_be_bytes());
                value.extend_from_slice(&octets);
                (if xored { ATTR_XOR_MAPPED } else { ATTR_MAPPED }, value)
            }
            IpAddr::V6(_) => unimplemented!("v4 only in tests"),
        };
        let mut msg = Vec::new();
        msg.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
        msg.extend_from_slice(&((4 + value.len()) as u16).to_be_bytes());
        msg.extend_from_slice(&MAGIC.to_be_bytes());
        msg.extend_from_slice(txid);
        msg.extend_from_slice(&attr_type.to_be_bytes());
        msg.extend_from_slice(&(value.len() as u16).to_be_bytes());
        msg.extend_from_slice(&value);
        msg
    }

    #[test]
    fn test_request_layout() {
        let (msg, txid) = build_binding_request(None);
        assert_eq!(msg.len(), 20);
        assert_eq!(&msg[0..2], &BINDING_REQUEST.to_be_bytes());
        assert_eq!(&msg[8..20], &txid);
    }

    #[test]
    fn test_change_request_attribute() {
        let (msg, _) = build_binding_request(Some(CHANGE_IP | CHANGE_PORT));
        assert_eq!(msg.len(), 28);
        assert_eq!(u16::from_be_bytes([msg[2], msg[3]]), 8);
        assert_eq!(u32::from_be_bytes([msg[24], msg[25], msg[26], msg[27]]), 0x06);
    }

    #[test]
    fn test_parse_xor_mapped() {
        let txid = [7u8; 12];
        let addr: SocketAddr = "203.0.113.7:54321".parse().unwrap();
        let packet = build_success(&txid, addr, true);
        assert_eq!(parse_binding_response(&packet, &txid).unwrap(), addr);
    }

    #[test]
    fn test_parse_legacy_mapped() {
        let txid = [3u8; 12];
        let addr: SocketAddr = "198.51.100.2:1234".parse().unwrap();
        let packet = build_success(&txid, addr, false);
        assert_eq!(parse_binding_response(&packet, &txid).unwrap(), addr);
    }

    #[test]
    fn test_txid_mismatch_rejected() {
        let txid = [1u8; 12];
        let packet = build_success(&txid, "192.0.2.1:1000".parse().unwrap(), true);
        assert!(parse_binding_response(&packet, &[2u8; 12]).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        assert!(parse_binding_response(&[0u8; 10], &[0u8; 12]).is_err());
    }
}
