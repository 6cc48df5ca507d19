//! Wire frames. A single message shape carries requests and responses;
//! unused payload sections stay `None` on the wire.

use borsh::{BorshDeserialize, BorshSerialize};
use ustore_primitives::{ErrorCode, Hash, UType};
use ustore_worker::{TypedValue, Value};

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum MessageType {
    Put = 0,
    Get = 1,
    GetChunk = 2,
    GetInfo = 3,
    Branch = 4,
    Rename = 5,
    Merge = 6,
    List = 7,
    Exists = 8,
    GetBranchHead = 9,
    IsBranchHead = 10,
    GetLatestVersion = 11,
    IsLatestVersion = 12,
    Delete = 13,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPayload {
    pub key: Vec<u8>,
    pub branch: Option<Vec<u8>>,
    pub version: Option<Hash>,
    /// Second branch operand: the referring branch of a merge, the new
    /// branch of Branch/Rename.
    pub ref_branch: Option<Vec<u8>>,
    /// Second version operand of a merge.
    pub ref_version: Option<Hash>,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuePayload {
    pub utype: Option<UType>,
    pub base: Option<Hash>,
    pub pos: u64,
    pub dels: u64,
    pub values: Vec<Vec<u8>>,
    pub keys: Vec<Vec<u8>>,
}

impl ValuePayload {
    pub fn to_value(&self) -> Value {
        Value {
            utype: self.utype,
            base: self.base.unwrap_or(Hash::NULL),
            pos: self.pos,
            dels: self.dels,
            vals: self.values.clone(),
            keys: self.keys.clone(),
        }
    }

    pub fn from_typed(value: &TypedValue) -> ValuePayload {
        match value {
            TypedValue::String(data) => ValuePayload {
                utype: Some(UType::String),
                values: vec![data.clone()],
                ..ValuePayload::default()
            },
            TypedValue::Blob(data) => ValuePayload {
                utype: Some(UType::Blob),
                values: vec![data.clone()],
                ..ValuePayload::default()
            },
            TypedValue::List(values) => ValuePayload {
                utype: Some(UType::List),
                values: values.clone(),
                ..ValuePayload::default()
            },
            TypedValue::Map(entries) => ValuePayload {
                utype: Some(UType::Map),
                keys: entries.iter().map(|(k, _)| k.clone()).collect(),
                values: entries.iter().map(|(_, v)| v.clone()).collect(),
                ..ValuePayload::default()
            },
            TypedValue::Set(keys) => ValuePayload {
                utype: Some(UType::Set),
                keys: keys.clone(),
                ..ValuePayload::default()
            },
        }
    }
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponsePayload {
    pub stat: u8,
    pub version: Option<Hash>,
    pub value: Option<ValuePayload>,
    pub chunk: Option<Vec<u8>>,
    pub lst: Vec<Vec<u8>>,
    pub truth: Option<bool>,
    pub info: Option<String>,
}

impl ResponsePayload {
    pub fn status(&self) -> ErrorCode {
        ErrorCode::from_u8(self.stat)
    }
}

/// One frame on the wire: type, source tag, and the three optional payload
/// sections.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct UMessage {
    pub msg_type: MessageType,
    /// Request-slot tag of the issuing client; echoed in the response so
    /// the response dispatcher can wake the right waiter.
    pub source: u32,
    pub request: Option<RequestPayload>,
    pub value: Option<ValuePayload>,
    pub response: Option<ResponsePayload>,
}

impl UMessage {
    pub fn request(msg_type: MessageType, source: u32, request: RequestPayload) -> UMessage {
        UMessage { msg_type, source, request: Some(request), value: None, response: None }
    }

    /// Response frame echoing the request's type and source.
    pub fn respond(&self, response: ResponsePayload) -> UMessage {
        UMessage {
            msg_type: self.msg_type,
            source: self.source,
            request: None,
            value: None,
            response: Some(response),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("message serialization is infallible")
    }

    pub fn decode(frame: &[u8]) -> std::io::Result<UMessage> {
        UMessage::try_from_slice(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip() {
        let msg = UMessage {
            msg_type: MessageType::Merge,
            source: 42,
            request: Some(RequestPayload {
                key: b"k1".to_vec(),
                branch: Some(b"master".to_vec()),
                ref_branch: Some(b"dev".to_vec()),
                ..RequestPayload::default()
            }),
            value: Some(ValuePayload {
                utype: Some(UType::String),
                values: vec![b"Good good study".to_vec()],
                ..ValuePayload::default()
            }),
            response: None,
        };
        let decoded = UMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn response_echoes_type_and_source() {
        let req = UMessage::request(
            MessageType::Get,
            7,
            RequestPayload { key: b"k".to_vec(), ..RequestPayload::default() },
        );
        let resp = req.respond(ResponsePayload {
            stat: ErrorCode::Ok as u8,
            version: Some(Hash::compute(b"v")),
            ..ResponsePayload::default()
        });
        assert_eq!(resp.msg_type, MessageType::Get);
        assert_eq!(resp.source, 7);
        assert_eq!(resp.response.as_ref().unwrap().status(), ErrorCode::Ok);
    }

    #[test]
    fn typed_value_payload_round_trip() {
        let typed = TypedValue::Map(vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ]);
        let payload = ValuePayload::from_typed(&typed);
        assert_eq!(payload.keys.len(), 2);
        let value = payload.to_value();
        assert_eq!(value.utype, Some(UType::Map));
        assert_eq!(value.keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn truncated_frames_fail_to_decode() {
        let msg = UMessage::request(MessageType::Exists, 1, RequestPayload::default());
        let bytes = msg.encode();
        assert!(UMessage::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
