// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! DNS listeners over UDP and TCP.
//!
//! Each configured address gets one UDP socket and one TCP listener, or
//! several of each with SO_REUSEPORT when the operator asks for them. TCP
//! carries the usual 2-byte length framing and serves multiple requests
//! per connection until the peer goes quiet.

pub mod access;
pub mod handler;
pub mod tsig;

pub use handler::DnsHandler;
pub use tsig::TsigKeyring;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, warn};

/// Idle timeout before a TCP connection is dropped.
const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest inbound message we accept.
const MAX_REQUEST_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Bind a UDP socket, optionally with SO_REUSEPORT so several listeners
/// can share the address.
pub fn bind_udp(addr: SocketAddr, reuse_port: bool) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    #[cfg(unix)]
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Bind a TCP listener, optionally with SO_REUSEPORT.
pub fn bind_tcp(addr: SocketAddr, reuse_port: bool) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}

/// Serve DNS over one UDP socket until the process exits.
pub async fn run_udp(socket: std::net::UdpSocket, handler: Arc<DnsHandler>) -> io::Result<()> {
    let socket = Arc::new(UdpSocket::from_std(socket)?);
    let mut buf = [0u8; MAX_REQUEST_SIZE];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(error) => {
                warn!(%error, "udp receive failed");
                continue;
            }
        };
        let raw = buf[..len].to_vec();
        let handler = Arc::clone(&handler);
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            let Some(response) = handler.handle(&raw, src, Transport::Udp) else {
                return;
            };
            let Some(bytes) = encode_udp(response.message, response.udp_max) else {
                return;
            };
            if let Err(error) = socket.send_to(&bytes, src).await {
                warn!(%error, %src, "udp send failed");
            }
        });
    }
}

/// Accept TCP connections and serve framed requests on each.
pub async fn run_tcp(listener: std::net::TcpListener, handler: Arc<DnsHandler>) -> io::Result<()> {
    let listener = TcpListener::from_std(listener)?;
    loop {
        let (stream, src) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "tcp accept failed");
                continue;
            }
        };
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            if let Err(error) = serve_tcp_connection(stream, src, handler).await {
                debug!(%error, %src, "tcp connection closed");
            }
        });
    }
}

async fn serve_tcp_connection(
    mut stream: TcpStream,
    src: SocketAddr,
    handler: Arc<DnsHandler>,
) -> io::Result<()> {
    loop {
        let len = match tokio::time::timeout(TCP_IDLE_TIMEOUT, stream.read_u16()).await {
            Ok(Ok(len)) => usize::from(len),
            // idle or closed; either way we are done with this peer
            Ok(Err(_)) | Err(_) => return Ok(()),
        };
        if len == 0 || len > MAX_REQUEST_SIZE {
            return Ok(());
        }
        let mut raw = vec![0u8; len];
        stream.read_exact(&mut raw).await?;

        let Some(response) = handler.handle(&raw, src, Transport::Tcp) else {
            return Ok(());
        };
        let bytes = match response.message.to_vec() {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "failed to encode response");
                return Ok(());
            }
        };
        stream.write_u16(bytes.len() as u16).await?;
        stream.write_all(&bytes).await?;
    }
}

/// Encode a response for UDP, truncating to the negotiated size when the
/// full form does not fit.
fn encode_udp(message: Message, max_size: usize) -> Option<Vec<u8>> {
    let bytes = match message.to_vec() {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(%error, "failed to encode response");
            return None;
        }
    };
    if bytes.len() <= max_size {
        return Some(bytes);
    }
    let mut truncated = Message::new();
    truncated
        .set_id(message.id())
        .set_message_type(message.message_type())
        .set_op_code(message.op_code())
        .set_recursion_desired(message.recursion_desired())
        .set_authoritative(message.authoritative())
        .set_response_code(message.response_code())
        .set_truncated(true);
    for query in message.queries() {
        truncated.add_query(query.clone());
    }
    if let Some(edns) = message.edns() {
        truncated.set_edns(edns.clone());
    }
    match truncated.to_vec() {
        Ok(bytes) => Some(bytes),
        Err(error) => {
            warn!(%error, "failed to encode truncated response");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use hickory_proto::op::{MessageType, OpCode, Query, ResponseCode};
    use hickory_proto::rr::rdata::TXT;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::str::FromStr;

    use super::*;

    #[test]
    fn bind_udp_and_tcp_on_ephemeral_ports() {
        let udp = bind_udp("127.0.0.1:0".parse().unwrap(), false).unwrap();
        assert_eq!(udp.local_addr().unwrap().ip(), "127.0.0.1".parse::<std::net::IpAddr>().unwrap());
        let tcp = bind_tcp("127.0.0.1:0".parse().unwrap(), false).unwrap();
        assert_ne!(tcp.local_addr().unwrap().port(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn reuse_port_allows_double_binding() {
        let first = bind_udp("127.0.0.1:0".parse().unwrap(), true).unwrap();
        let addr = first.local_addr().unwrap();
        let _second = bind_udp(addr, true).unwrap();
    }

    #[test]
    fn small_responses_are_untouched() {
        let mut message = Message::new();
        message.set_id(9).set_message_type(MessageType::Response).set_op_code(OpCode::Query);
        let bytes = encode_udp(message.clone(), 512).unwrap();
        assert_eq!(bytes, message.to_vec().unwrap());
    }

    #[test]
    fn oversized_udp_responses_get_truncated() {
        let mut message = Message::new();
        message
            .set_id(9)
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_response_code(ResponseCode::NoError)
            .add_query(Query::query(Name::from_str("big.example.com.").unwrap(), RecordType::TXT));
        for i in 0..64 {
            message.add_answer(Record::from_rdata(
                Name::from_str("big.example.com.").unwrap(),
                60,
                RData::TXT(TXT::new(vec![format!("padding padding padding {i}")])),
            ));
        }
        assert!(message.to_vec().unwrap().len() > 512);

        let bytes = encode_udp(message, 512).unwrap();
        assert!(bytes.len() <= 512);
        let parsed = Message::from_vec(&bytes).unwrap();
        assert!(parsed.truncated());
        assert!(parsed.answers().is_empty());
        assert_eq!(parsed.queries().len(), 1);
    }
}
