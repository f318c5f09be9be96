// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! TSIG verification and response signing.
//!
//! Requests are verified against the raw wire form (the MAC covers the
//! message as transmitted, so the parsed form is not enough). A response to
//! a correctly signed request is signed with the same key, with the
//! request MAC chained into the response MAC as RFC 8945 requires. A
//! response to a badly signed request is sent unsigned.

use std::collections::HashMap;
use std::ops::Range;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use hickory_proto::error::ProtoError;
use hickory_proto::op::Message;
use hickory_proto::rr::dnssec::rdata::tsig::{make_tsig_record, message_tbs, TsigAlgorithm, TSIG};
use hickory_proto::rr::dnssec::tsig::TSigner;
use hickory_proto::rr::{Name, Record, RecordType};
use thiserror::Error;

use crate::config::TsigSecretConfig;

/// Fudge allowed between signer and verifier clocks, in seconds.
const TSIG_FUDGE: u16 = 300;

#[derive(Debug, Error)]
pub enum TsigError {
    #[error("unknown key {0}")]
    UnknownKey(Name),

    #[error("unsupported tsig algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("invalid base64 secret for key {0}")]
    BadSecret(String),

    #[error("invalid key name {0:?}: {1}")]
    BadKeyName(String, ProtoError),

    #[error("mac verification failed: {0}")]
    Verify(#[from] ProtoError),

    #[error("signature time outside the allowed window")]
    TimeWindow,
}

/// The configured TSIG keys, by fully qualified key name.
#[derive(Default)]
pub struct TsigKeyring {
    keys: HashMap<Name, TSigner>,
}

impl TsigKeyring {
    pub fn from_config(secrets: &[TsigSecretConfig]) -> Result<Self, TsigError> {
        let mut keys = HashMap::new();
        for secret in secrets {
            let algorithm = match secret.algorithm.as_deref().unwrap_or("hmac-sha256") {
                "hmac-sha256" => TsigAlgorithm::HmacSha256,
                "hmac-sha384" => TsigAlgorithm::HmacSha384,
                "hmac-sha512" => TsigAlgorithm::HmacSha512,
                other => return Err(TsigError::UnsupportedAlgorithm(other.to_string())),
            };
            let key = BASE64
                .decode(secret.secret.as_bytes())
                .map_err(|_| TsigError::BadSecret(secret.name.clone()))?;
            let name = Name::from_utf8(&secret.name)
                .map_err(|e| TsigError::BadKeyName(secret.name.clone(), e))?;
            let signer = TSigner::new(key, algorithm, name, TSIG_FUDGE)?;
            keys.insert(signer.signer_name().to_lowercase(), signer);
        }
        Ok(Self { keys })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify the raw wire form of a request signed with `key_name`.
    /// Returns the signer and the request MAC for response chaining.
    pub fn verify(&self, key_name: &Name, raw: &[u8]) -> Result<(TSigner, Vec<u8>), TsigError> {
        let signer = self
            .keys
            .get(&key_name.to_lowercase())
            .ok_or_else(|| TsigError::UnknownKey(key_name.clone()))?;
        let (mac, window, _) = signer.verify_message_byte(None, raw, true)?;
        if !in_window(&window, Utc::now().timestamp() as u64) {
            return Err(TsigError::TimeWindow);
        }
        Ok((signer.clone(), mac))
    }
}

fn in_window(window: &Range<u64>, now: u64) -> bool {
    window.contains(&now)
}

/// The TSIG record of a message, wherever the decoder put it.
pub fn find_tsig(message: &Message) -> Option<&Record> {
    message
        .additionals()
        .iter()
        .chain(message.sig0().iter())
        .find(|record| record.record_type() == RecordType::TSIG)
}

/// Sign a response with the key that authenticated the request, chaining
/// the request MAC. The TSIG record is appended as the final record.
pub fn sign_response(
    signer: &TSigner,
    request_mac: &[u8],
    response: &mut Message,
) -> Result<(), ProtoError> {
    let pre_tsig = TSIG::new(
        signer.algorithm().clone(),
        Utc::now().timestamp() as u64,
        signer.fudge(),
        Vec::new(),
        response.id(),
        0,
        Vec::new(),
    );
    let tbs = message_tbs(Some(request_mac), response, &pre_tsig, signer.signer_name())?;
    let mac = signer.sign(&tbs)?;
    let record = make_tsig_record(signer.signer_name().clone(), pre_tsig.set_mac(mac));
    response.add_tsig(record);
    Ok(())
}

#[cfg(test)]
mod tests {
    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::dnssec::rdata::DNSSECRData;
    use hickory_proto::rr::RData;

    use super::*;

    fn keyring() -> TsigKeyring {
        TsigKeyring::from_config(&[TsigSecretConfig {
            name: "transfer-key".into(),
            secret: BASE64.encode(b"0123456789abcdef0123456789abcdef"),
            algorithm: None,
        }])
        .unwrap()
    }

    fn signer(ring: &TsigKeyring) -> TSigner {
        ring.keys[&Name::from_utf8("transfer-key.").unwrap()].clone()
    }

    fn signed_query(signer: &TSigner) -> Vec<u8> {
        let mut message = Message::new();
        message
            .set_id(42)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .add_query(Query::query(Name::from_utf8("example.com.").unwrap(), RecordType::AXFR));
        message
            .finalize(signer, Utc::now().timestamp() as u32)
            .expect("failed to sign query");
        message.to_vec().unwrap()
    }

    #[test]
    fn rejects_md5_and_bad_secrets() {
        let md5 = TsigKeyring::from_config(&[TsigSecretConfig {
            name: "k".into(),
            secret: BASE64.encode(b"key"),
            algorithm: Some("hmac-md5".into()),
        }]);
        assert!(matches!(md5, Err(TsigError::UnsupportedAlgorithm(_))));

        let bad = TsigKeyring::from_config(&[TsigSecretConfig {
            name: "k".into(),
            secret: "not base64 !!!".into(),
            algorithm: None,
        }]);
        assert!(matches!(bad, Err(TsigError::BadSecret(_))));
    }

    #[test]
    fn verifies_a_signed_request() {
        let ring = keyring();
        let raw = signed_query(&signer(&ring));
        let parsed = Message::from_vec(&raw).unwrap();
        let tsig = find_tsig(&parsed).expect("query should carry a tsig record");
        let (_, mac) = ring.verify(tsig.name(), &raw).unwrap();
        assert!(!mac.is_empty());
    }

    #[test]
    fn rejects_unknown_key_and_tampering() {
        let ring = keyring();
        let mut raw = signed_query(&signer(&ring));

        let unknown = ring.verify(&Name::from_utf8("other-key.").unwrap(), &raw);
        assert!(matches!(unknown, Err(TsigError::UnknownKey(_))));

        // flip a bit in the question section
        raw[13] ^= 0x01;
        let tampered = ring.verify(&Name::from_utf8("transfer-key.").unwrap(), &raw);
        assert!(tampered.is_err());
    }

    #[test]
    fn signed_response_carries_chained_tsig() {
        let ring = keyring();
        let signer = signer(&ring);
        let raw = signed_query(&signer);
        let (_, request_mac) = ring.verify(&Name::from_utf8("transfer-key.").unwrap(), &raw).unwrap();

        let mut response = Message::new();
        response.set_id(42).set_message_type(MessageType::Response).set_op_code(OpCode::Query);
        sign_response(&signer, &request_mac, &mut response).unwrap();

        let encoded = response.to_vec().unwrap();
        let parsed = Message::from_vec(&encoded).unwrap();
        let record = find_tsig(&parsed).expect("response should carry a tsig record");
        assert_eq!(record.name(), &Name::from_utf8("transfer-key.").unwrap());
        match record.data() {
            Some(RData::DNSSEC(DNSSECRData::TSIG(tsig))) => assert!(!tsig.mac().is_empty()),
            other => panic!("unexpected rdata: {other:?}"),
        }
    }
}
