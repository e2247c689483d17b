//! Reflexive-address discovery (§4.5).
//!
//! Sends a single STUN Binding Request over a socket the caller still owns
//! (we only ever borrow it — the tunnel engine reuses the same socket
//! afterwards, see the node supervisor's §4.9 socket-sharing decision) and
//! parses `XOR-MAPPED-ADDRESS` out of the response. Each failure mode is a
//! distinct error variant, as §4.5 requires.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytecodec::{DecodeExt, EncodeExt};
use rand::Rng as _;
use stun_codec::rfc5389::Attribute;
use stun_codec::rfc5389::attributes::XorMappedAddress;
use stun_codec::rfc5389::methods::BINDING;
use stun_codec::{Message, MessageClass, MessageDecoder, MessageEncoder, TransactionId};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_STUN_MESSAGE_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to resolve STUN server {server}: {source}")]
    Resolve {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("STUN server {server} has no resolvable address")]
    NoAddress { server: String },
    #[error("failed to send STUN binding request to {server}: {source}")]
    Send {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?} waiting for a STUN binding response")]
    Timeout(Duration),
    #[error("failed to receive STUN binding response: {0}")]
    Recv(#[source] std::io::Error),
    #[error("failed to decode STUN binding response: {0}")]
    Decode(String),
    #[error("STUN binding response did not contain XOR-MAPPED-ADDRESS")]
    MissingAttribute,
    #[error("STUN binding response mapped an IPv6 address; this mesh is IPv4-only")]
    NotIpv4,
    #[error("no non-loopback local IPv4 address found for the STUN bypass")]
    NoLocalAddress,
}

/// Performs one Binding Request/Response exchange against `server` (a
/// `host:port` string) over `socket`, returning the reflexive `(IPv4, port)`.
///
/// Does not consume `socket`: the same socket is handed to the tunnel engine
/// afterwards.
pub async fn discover(socket: &UdpSocket, server: &str) -> Result<(Ipv4Addr, u16), DiscoveryError> {
    let server_addr = resolve(server).await?;

    let request = build_binding_request();
    let encoded = MessageEncoder::new()
        .encode_into_bytes(request)
        .map_err(|e| DiscoveryError::Decode(e.to_string()))?;

    socket
        .send_to(&encoded, server_addr)
        .await
        .map_err(|source| DiscoveryError::Send {
            server: server.to_string(),
            source,
        })?;

    let mut buf = [0u8; MAX_STUN_MESSAGE_SIZE];
    let n = timeout(RESPONSE_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| DiscoveryError::Timeout(RESPONSE_TIMEOUT))?
        .map_err(DiscoveryError::Recv)?;

    let response: Message<Attribute> = MessageDecoder::new()
        .decode_from_bytes(&buf[..n])
        .map_err(|e| DiscoveryError::Decode(e.to_string()))?
        .map_err(|e| DiscoveryError::Decode(e.to_string()))?;

    let mapped = response
        .get_attribute::<XorMappedAddress>()
        .ok_or(DiscoveryError::MissingAttribute)?;

    match mapped.address() {
        SocketAddr::V4(addr) => Ok((*addr.ip(), addr.port())),
        SocketAddr::V6(_) => Err(DiscoveryError::NotIpv4),
    }
}

/// The explicit, opt-in bypass: the first non-loopback local IPv4 address,
/// paired with the node's own listen port. Used when the deployment
/// declares STUN unnecessary (e.g. inside a controlled lab network).
pub fn bypass(listen_port: u16) -> Result<(Ipv4Addr, u16), DiscoveryError> {
    let ip = if_addrs::get_if_addrs()
        .map_err(|_| DiscoveryError::NoLocalAddress)?
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .find_map(|iface| match iface.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .ok_or(DiscoveryError::NoLocalAddress)?;

    Ok((ip, listen_port))
}

async fn resolve(server: &str) -> Result<SocketAddr, DiscoveryError> {
    let mut addrs = tokio::net::lookup_host(server)
        .await
        .map_err(|source| DiscoveryError::Resolve {
            server: server.to_string(),
            source,
        })?;

    addrs.next().ok_or_else(|| DiscoveryError::NoAddress {
        server: server.to_string(),
    })
}

fn build_binding_request() -> Message<Attribute> {
    let transaction_id = TransactionId::new(rand::thread_rng().gen());
    Message::new(MessageClass::Request, BINDING, transaction_id)
}
