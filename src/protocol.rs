//! Wire format.
//!
//! Every datagram except the discovery request is an outer JSON envelope
//! whose `pack` field carries an encrypted inner record:
//!
//! ```text
//! {"cid":"app","i":0,"t":"pack","uid":0,"pack":"<base64 AES-128-ECB>"}
//! ```
//!
//! The inner record's `t` field selects the operation.

use crate::crypto::GreeCipher;
use crate::error::{GreeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;

/// UDP port the unit listens on.
pub const DEFAULT_DEVICE_PORT: u16 = 7000;

/// Client identifier placed in the outer `cid` of requests.
pub const APP_CID: &str = "app";

/// Outer `t` of every enveloped datagram.
pub const ENVELOPE_TYPE: &str = "pack";

define_packet_type! {
    Scan = "scan",
    Dev = "dev",
    Bind = "bind",
    BindOk = "bindok",
    Status = "status",
    Dat = "dat",
    Cmd = "cmd",
    Res = "res",
}

/// Outer, unencrypted routing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub cid: String,
    /// 1 when `pack` is encrypted with the generic key
    #[serde(default)]
    pub i: u8,
    pub t: String,
    #[serde(default)]
    pub uid: u64,
    pub pack: String,
}

impl Envelope {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(data)?;
        if envelope.t != ENVELOPE_TYPE {
            return Err(GreeError::Codec(format!(
                "outer record has t={:?}, expected {:?}",
                envelope.t, ENVELOPE_TYPE
            )));
        }
        Ok(envelope)
    }
}

/// Inner record, tagged by `t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum Pack {
    Scan,
    Dev {
        #[serde(default)]
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mac: Option<String>,
    },
    Bind {
        mac: String,
        uid: u64,
    },
    #[serde(rename = "bindok")]
    BindOk {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mac: Option<String>,
    },
    Status {
        cols: Vec<String>,
        mac: String,
    },
    Dat {
        cols: Vec<String>,
        dat: Vec<i64>,
    },
    Cmd {
        opt: Vec<String>,
        p: Vec<i64>,
    },
    Res {
        opt: Vec<String>,
        val: Vec<i64>,
    },
}

impl Pack {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Pack::Scan => PacketType::Scan,
            Pack::Dev { .. } => PacketType::Dev,
            Pack::Bind { .. } => PacketType::Bind,
            Pack::BindOk { .. } => PacketType::BindOk,
            Pack::Status { .. } => PacketType::Status,
            Pack::Dat { .. } => PacketType::Dat,
            Pack::Cmd { .. } => PacketType::Cmd,
            Pack::Res { .. } => PacketType::Res,
        }
    }
}

/// A decrypted inbound datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPacket {
    /// Outer `cid`, the sender's device id
    pub cid: String,
    /// Inner `t`, kept verbatim for diagnostics
    pub tag: String,
    /// `None` when `tag` is not a packet type this client understands
    pub pack: Option<Pack>,
}

impl InboundPacket {
    pub fn decode(envelope: &Envelope, cipher: &GreeCipher) -> Result<Self> {
        let value: Value = cipher.decrypt(&envelope.pack)?;
        let tag = value
            .get("t")
            .and_then(Value::as_str)
            .ok_or_else(|| GreeError::Codec("inner record has no \"t\" field".into()))?
            .to_string();

        let pack = match PacketType::from_tag(&tag) {
            Some(_) => Some(serde_json::from_value::<Pack>(value)?),
            None => None,
        };

        Ok(Self {
            cid: envelope.cid.clone(),
            tag,
            pack,
        })
    }
}

/// A datagram ready to be handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub target: SocketAddr,
}

/// The discovery request is the one message sent as bare JSON.
pub fn scan_datagram(target: SocketAddr) -> Result<Datagram> {
    Ok(Datagram {
        payload: serde_json::to_vec(&Pack::Scan)?,
        target,
    })
}

/// Encrypt `pack` and wrap it in the outer envelope.
pub fn pack_datagram(
    pack: &Pack,
    cipher: &GreeCipher,
    generic_key: bool,
    target: SocketAddr,
) -> Result<Datagram> {
    let envelope = Envelope {
        cid: APP_CID.to_string(),
        i: u8::from(generic_key),
        t: ENVELOPE_TYPE.to_string(),
        uid: 0,
        pack: cipher.encrypt(pack)?,
    };
    Ok(Datagram {
        payload: serde_json::to_vec(&envelope)?,
        target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CodecKey;
    use serde_json::json;

    fn target() -> SocketAddr {
        "192.168.1.40:7000".parse().unwrap()
    }

    #[test]
    fn scan_is_plain_json() {
        let datagram = scan_datagram(target()).unwrap();
        let value: Value = serde_json::from_slice(&datagram.payload).unwrap();
        assert_eq!(value, json!({"t": "scan"}));
    }

    #[test]
    fn bind_request_is_enveloped_with_generic_key_flag() {
        let cipher = GreeCipher::new(CodecKey::GENERIC);
        let pack = Pack::Bind {
            mac: "f4911e7aca59".into(),
            uid: 0,
        };
        let datagram = pack_datagram(&pack, &cipher, true, target()).unwrap();
        let envelope = Envelope::parse(&datagram.payload).unwrap();
        assert_eq!(envelope.cid, APP_CID);
        assert_eq!(envelope.i, 1);
        assert_eq!(envelope.uid, 0);

        let inner: Value = cipher.decrypt(&envelope.pack).unwrap();
        assert_eq!(inner, json!({"t": "bind", "mac": "f4911e7aca59", "uid": 0}));
    }

    #[test]
    fn decodes_device_reply_with_extra_fields() {
        let cipher = GreeCipher::new(CodecKey::GENERIC);
        let inner = json!({
            "t": "dev", "cid": "f4911e7aca59", "name": "ac1", "mac": "f4911e7aca59",
            "ver": "V1.1.13", "brand": "gree", "lock": 0
        });
        let envelope = Envelope {
            cid: "f4911e7aca59".into(),
            i: 1,
            t: ENVELOPE_TYPE.into(),
            uid: 0,
            pack: cipher.encrypt(&inner).unwrap(),
        };
        let packet = InboundPacket::decode(&envelope, &cipher).unwrap();
        assert_eq!(packet.cid, "f4911e7aca59");
        assert_eq!(
            packet.pack,
            Some(Pack::Dev {
                name: "ac1".into(),
                mac: Some("f4911e7aca59".into())
            })
        );
    }

    #[test]
    fn unknown_tag_decodes_without_pack() {
        let cipher = GreeCipher::new(CodecKey::GENERIC);
        let envelope = Envelope {
            cid: "x".into(),
            i: 0,
            t: ENVELOPE_TYPE.into(),
            uid: 0,
            pack: cipher.encrypt(&json!({"t": "wlan", "r": 200})).unwrap(),
        };
        let packet = InboundPacket::decode(&envelope, &cipher).unwrap();
        assert_eq!(packet.tag, "wlan");
        assert_eq!(packet.pack, None);
    }

    #[test]
    fn known_tag_with_wrong_shape_is_a_codec_error() {
        let cipher = GreeCipher::new(CodecKey::GENERIC);
        let envelope = Envelope {
            cid: "x".into(),
            i: 0,
            t: ENVELOPE_TYPE.into(),
            uid: 0,
            pack: cipher.encrypt(&json!({"t": "dat", "cols": ["Pow"]})).unwrap(),
        };
        assert!(matches!(
            InboundPacket::decode(&envelope, &cipher),
            Err(GreeError::Codec(_))
        ));
    }

    #[test]
    fn envelope_requires_pack_type() {
        assert!(Envelope::parse(br#"{"t":"scan"}"#).is_err());
        assert!(Envelope::parse(br#"{"t":"other","pack":"abc"}"#).is_err());
        assert!(Envelope::parse(b"not json").is_err());
    }

    #[test]
    fn packet_type_tags() {
        assert_eq!(PacketType::from_tag("bindok"), Some(PacketType::BindOk));
        assert_eq!(PacketType::BindOk.as_str(), "bindok");
        assert_eq!(
            Pack::Res {
                opt: vec![],
                val: vec![]
            }
            .packet_type(),
            PacketType::Res
        );
    }
}
