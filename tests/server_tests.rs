// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end listener tests against real sockets.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use zonesync::server::{self, DnsHandler, TsigKeyring};
use zonesync::zone::{Catalog, RecordData, SoaData, Tree, ZoneData};

fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

fn test_catalog() -> Arc<Catalog> {
    let data = ZoneData {
        suffix: name("example.com."),
        origin: name("example.com."),
        ttl: 60,
        ns: vec![name("ns1.example.com.")],
        soa: SoaData {
            mname: name("ns1.example.com."),
            rname: name("hostmaster.example.com."),
            refresh: 3600,
            retry: 900,
            expire: 604800,
            minimum: 300,
        },
        static_records: BTreeMap::new(),
        allow_transfer: vec!["127.0.0.0/8".parse().unwrap()],
    };
    let catalog = Catalog::new(vec![data]);
    let zone = &catalog.zones()[0];
    let mut tree = Tree::new();
    tree.add("host", RecordData::A("10.0.0.1".parse().unwrap()));
    tree.add("alias", RecordData::Cname(name("host.example.com.")));
    tree.sort();
    zone.replace_tree(tree);
    zone.set_serial(2_024_030_701);
    Arc::new(catalog)
}

fn query(qname: &str, qtype: RecordType) -> Vec<u8> {
    let mut message = Message::new();
    message
        .set_id(4242)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name(qname), qtype));
    message.to_vec().unwrap()
}

async fn start_udp(handler: Arc<DnsHandler>) -> SocketAddr {
    let socket = server::bind_udp("127.0.0.1:0".parse().unwrap(), false).unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(server::run_udp(socket, handler));
    addr
}

async fn start_tcp(handler: Arc<DnsHandler>) -> SocketAddr {
    let listener = server::bind_tcp("127.0.0.1:0".parse().unwrap(), false).unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::run_tcp(listener, handler));
    addr
}

#[tokio::test]
async fn udp_round_trip() {
    let handler = Arc::new(DnsHandler::new(test_catalog(), Arc::new(TsigKeyring::default())));
    let addr = start_udp(handler).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(&query("host.example.com.", RecordType::A), addr).await.unwrap();

    let mut buf = [0u8; 4096];
    let len = tokio::time::timeout(Duration::from_secs(5), client.recv(&mut buf))
        .await
        .expect("timed out waiting for a response")
        .unwrap();
    let response = Message::from_vec(&buf[..len]).unwrap();

    assert_eq!(response.id(), 4242);
    assert!(response.authoritative());
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].record_type(), RecordType::A);
}

#[tokio::test]
async fn udp_nxdomain_has_soa_authority() {
    let handler = Arc::new(DnsHandler::new(test_catalog(), Arc::new(TsigKeyring::default())));
    let addr = start_udp(handler).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(&query("missing.example.com.", RecordType::A), addr).await.unwrap();

    let mut buf = [0u8; 4096];
    let len = tokio::time::timeout(Duration::from_secs(5), client.recv(&mut buf))
        .await
        .expect("timed out waiting for a response")
        .unwrap();
    let response = Message::from_vec(&buf[..len]).unwrap();

    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert_eq!(response.name_servers().len(), 1);
    assert_eq!(response.name_servers()[0].record_type(), RecordType::SOA);
}

async fn tcp_exchange(addr: SocketAddr, request: &[u8]) -> Message {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_u16(request.len() as u16).await.unwrap();
    stream.write_all(request).await.unwrap();

    let len = tokio::time::timeout(Duration::from_secs(5), stream.read_u16())
        .await
        .expect("timed out waiting for a response")
        .unwrap();
    let mut buf = vec![0u8; usize::from(len)];
    stream.read_exact(&mut buf).await.unwrap();
    Message::from_vec(&buf).unwrap()
}

#[tokio::test]
async fn tcp_round_trip() {
    let handler = Arc::new(DnsHandler::new(test_catalog(), Arc::new(TsigKeyring::default())));
    let addr = start_tcp(handler).await;

    let response = tcp_exchange(addr, &query("host.example.com.", RecordType::A)).await;
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(response.answers().len(), 1);
}

#[tokio::test]
async fn tcp_axfr_streams_the_zone() {
    let handler = Arc::new(DnsHandler::new(test_catalog(), Arc::new(TsigKeyring::default())));
    let addr = start_tcp(handler).await;

    let response = tcp_exchange(addr, &query("example.com.", RecordType::AXFR)).await;
    let answers = response.answers();
    // SOA, NS, alias CNAME, host A, SOA
    assert_eq!(answers.len(), 5);
    assert_eq!(answers.first().unwrap().record_type(), RecordType::SOA);
    assert_eq!(answers.last().unwrap().record_type(), RecordType::SOA);
}
