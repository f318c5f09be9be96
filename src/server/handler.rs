// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The authoritative query handler.
//!
//! Every inbound message is answered with exactly one response. Questions
//! are resolved against the zone that owns the first question's name; a
//! CNAME at the queried name short-circuits resolution and the target is
//! chased within the same zone only.

use std::net::SocketAddr;

use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::CNAME;
use hickory_proto::rr::{RData, RecordType};
use tracing::{debug, warn};

use crate::zone::{Catalog, ZoneManager, ZoneView};

use super::access::Access;
use super::tsig::{find_tsig, sign_response, TsigKeyring};
use super::Transport;

/// Payload size advertised in our EDNS0 OPT record.
const EDNS_PAYLOAD: u16 = 4096;

/// A response ready for the wire, with the UDP size cap negotiated from
/// the request.
pub struct Response {
    pub message: Message,
    pub udp_max: usize,
}

/// Outcome of a single question: keep accumulating into the response, or
/// stop and send what we have.
enum Flow {
    Continue,
    Respond,
}

pub struct DnsHandler {
    catalog: std::sync::Arc<Catalog>,
    keyring: std::sync::Arc<TsigKeyring>,
}

impl DnsHandler {
    pub fn new(catalog: std::sync::Arc<Catalog>, keyring: std::sync::Arc<TsigKeyring>) -> Self {
        Self { catalog, keyring }
    }

    /// Handle one raw inbound message. `None` means nothing is sent back
    /// (unparseable datagrams are dropped).
    pub fn handle(&self, raw: &[u8], src: SocketAddr, transport: Transport) -> Option<Response> {
        let request = match Message::from_vec(raw) {
            Ok(message) => message,
            Err(error) => {
                debug!(%src, %error, "dropping unparseable message");
                return None;
            }
        };
        if request.message_type() != MessageType::Query {
            return None;
        }

        let udp_max = usize::from(
            request.edns().map(|edns| edns.max_payload().max(512)).unwrap_or(512),
        );
        let mut response = reply_skeleton(&request);

        if request.op_code() != OpCode::Query {
            response.set_response_code(ResponseCode::NotImp);
            return Some(Response { message: response, udp_max });
        }
        let Some(query) = request.queries().first() else {
            return Some(Response { message: response, udp_max });
        };
        let Some(zone) = self.catalog.find(query.name()) else {
            response.set_response_code(ResponseCode::Refused);
            return Some(Response { message: response, udp_max });
        };

        // A signed request is verified against its wire form before any
        // resolution. A bad signature gets the bare reply back, unsigned.
        let mut sign = None;
        if let Some(record) = find_tsig(&request) {
            match self.keyring.verify(record.name(), raw) {
                Ok(verified) => sign = Some(verified),
                Err(error) => {
                    warn!(key = %record.name(), %src, %error, "tsig verification failed");
                    return Some(Response { message: response, udp_max });
                }
            }
        }

        response.set_authoritative(true);
        let view = zone.view();
        for query in request.queries() {
            match self.answer(zone, &view, query, &mut response, src, transport) {
                Flow::Continue => {}
                Flow::Respond => break,
            }
        }

        if let Some((signer, request_mac)) = sign {
            if let Err(error) = sign_response(&signer, &request_mac, &mut response) {
                warn!(%error, "failed to sign response");
            }
        }
        Some(Response { message: response, udp_max })
    }

    fn answer(
        &self,
        zone: &ZoneManager,
        view: &ZoneView<'_>,
        query: &Query,
        response: &mut Message,
        src: SocketAddr,
        transport: Transport,
    ) -> Flow {
        let qname = query.name();
        let qtype = query.query_type();

        // CNAME probe: a CNAME at the name answers any type, with the
        // target's records of the queried type appended.
        let (cnames, cname_total) = view.resolve(qname, &[RecordType::CNAME], false);
        if let Some(cname) = cnames.first() {
            response.add_answer(cname.clone());
            if qtype != RecordType::CNAME {
                if let Some(RData::CNAME(CNAME(target))) = cname.data() {
                    let (glue, glue_total) = view.resolve(target, &[qtype], false);
                    if glue_total != 0 {
                        for record in glue {
                            response.add_answer(record);
                        }
                    }
                }
            }
            return Flow::Respond;
        }

        match qtype {
            RecordType::SOA => match view.soa(qname) {
                Some(soa) => {
                    response.add_answer(soa);
                    Flow::Continue
                }
                None => {
                    response.add_name_server(view.soa_on_error());
                    Flow::Respond
                }
            },
            RecordType::NS => match view.ns_records(qname) {
                Some(records) => {
                    for record in records {
                        response.add_answer(record);
                    }
                    Flow::Continue
                }
                None => {
                    response.add_name_server(view.soa_on_error());
                    Flow::Respond
                }
            },
            RecordType::A | RecordType::AAAA | RecordType::TXT => {
                let (answers, total) = view.resolve(qname, &[qtype], false);
                if answers.is_empty() {
                    response.set_response_code(if total == 0 {
                        ResponseCode::NXDomain
                    } else {
                        ResponseCode::NoError
                    });
                    response.add_name_server(view.soa_on_error());
                    return Flow::Respond;
                }
                for record in answers {
                    response.add_answer(record);
                }
                Flow::Continue
            }
            RecordType::CNAME => {
                // the probe above did not fire
                response.set_response_code(if cname_total == 0 {
                    ResponseCode::NXDomain
                } else {
                    ResponseCode::NoError
                });
                response.add_name_server(view.soa_on_error());
                Flow::Respond
            }
            RecordType::AXFR => {
                self.transfer(zone, view, query, response, src, transport);
                Flow::Respond
            }
            _ => Flow::Continue,
        }
    }

    /// Stream the zone as one envelope: SOA, NS set, every CNAME/A/AAAA
    /// record, closing SOA. Failed preconditions leave the reply bare;
    /// the silence is deliberate.
    fn transfer(
        &self,
        zone: &ZoneManager,
        view: &ZoneView<'_>,
        query: &Query,
        response: &mut Message,
        src: SocketAddr,
        transport: Transport,
    ) {
        if transport != Transport::Tcp {
            debug!(%src, "refusing zone transfer over udp");
            return;
        }
        let access = Access::new(zone.data().allow_transfer.iter().cloned());
        if !access.allowed(src.ip()) {
            debug!(%src, zone = %zone.origin(), "zone transfer not allowed");
            return;
        }
        if query.name() != zone.origin() {
            return;
        }
        let Some(soa) = view.soa(query.name()) else {
            return;
        };
        let Some(ns) = view.ns_records(query.name()) else {
            return;
        };
        let (records, _) = view.resolve(
            query.name(),
            &[RecordType::CNAME, RecordType::A, RecordType::AAAA],
            true,
        );
        response.add_answer(soa.clone());
        for record in ns {
            response.add_answer(record);
        }
        for record in records {
            response.add_answer(record);
        }
        response.add_answer(soa);
    }
}

/// The reply every path starts from: same id and questions, response bit,
/// EDNS0 with our payload size.
fn reply_skeleton(request: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired());
    for query in request.queries() {
        response.add_query(query.clone());
    }
    let mut edns = Edns::new();
    edns.set_max_payload(EDNS_PAYLOAD);
    edns.set_version(0);
    edns.set_dnssec_ok(true);
    response.set_edns(edns);
    response
}
