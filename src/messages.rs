//! Wire protocol messages.
//!
//! Every message on the wire is a single JSON object. Requests carry a
//! string `COMMAND` field naming the operation, and peer-to-peer requests
//! additionally carry `SENDER_ID`/`RECIPIENT_ID` hex identifiers (`JOIN`
//! comes from a peer that is not yet in the ring and `NOTIFY` carries its
//! own `RECIP_ID` instead). Responses always carry `SUCCESS`, plus
//! `ERRORS` on failure; payload fields sit beside them at top level.
//!
//! | Command | Request payload | Response payload |
//! |---|---|---|
//! | `JOIN` | `NEW_PEER` | `PREDECESSOR` |
//! | `GET_SUCC` / `GET_PRED` | `KEY` | descriptor fields |
//! | `NOTIFY` | `NEW_PEER`, `RECIP_ID` | - |
//! | `LEAVE` | `NEW_PRED` + `NEW_MIN`, or `NEW_SUCC` | - |
//! | `CREATE_FRAG` | `KEY`, `FRAGMENT` | - |
//! | `READ_FRAG` | `KEY` | `FRAGMENT` |
//! | `SYNCHRONIZE` | `KEYS` | - |
//! | `MAINTENANCE` | - | - |
//!
//! Inbound parsing is bounded by [`MAX_REQUEST_BYTES`] so a broken or
//! hostile peer cannot balloon a session buffer.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::descriptor::PeerDescriptor;
use crate::key::Key;

/// Ceiling on a single inbound request, in bytes. A full 14-fragment block
/// serializes well under this.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// A request envelope: the optional sender/recipient identifiers plus the
/// command payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(rename = "SENDER_ID", default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Key>,
    #[serde(rename = "RECIPIENT_ID", default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Key>,
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    /// A request with no envelope identifiers (`JOIN`, `NOTIFY`).
    pub fn bare(command: Command) -> Request {
        Request { sender: None, recipient: None, command }
    }

    /// A peer-to-peer request tagged with sender and recipient.
    pub fn addressed(sender: &Key, recipient: &Key, command: Command) -> Request {
        Request {
            sender: Some(sender.clone()),
            recipient: Some(recipient.clone()),
            command,
        }
    }
}

/// The command payloads, tagged by the wire `COMMAND` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "COMMAND")]
pub enum Command {
    #[serde(rename = "JOIN")]
    Join {
        #[serde(rename = "NEW_PEER")]
        new_peer: PeerDescriptor,
    },
    #[serde(rename = "GET_SUCC")]
    GetSuccessor {
        #[serde(rename = "KEY")]
        key: Key,
    },
    #[serde(rename = "GET_PRED")]
    GetPredecessor {
        #[serde(rename = "KEY")]
        key: Key,
    },
    #[serde(rename = "NOTIFY")]
    Notify {
        #[serde(rename = "NEW_PEER")]
        new_peer: PeerDescriptor,
        #[serde(rename = "RECIP_ID")]
        recipient: Key,
    },
    /// Sent twice by a leaver: its successor learns its new predecessor and
    /// key range, its predecessor learns the successor replacing the leaver
    /// in finger tables.
    #[serde(rename = "LEAVE")]
    Leave {
        #[serde(rename = "NEW_PRED", default, skip_serializing_if = "Option::is_none")]
        new_pred: Option<PeerDescriptor>,
        #[serde(rename = "NEW_MIN", default, skip_serializing_if = "Option::is_none")]
        new_min: Option<Key>,
        #[serde(rename = "NEW_SUCC", default, skip_serializing_if = "Option::is_none")]
        new_succ: Option<PeerDescriptor>,
    },
    #[serde(rename = "CREATE_FRAG")]
    CreateFragment {
        #[serde(rename = "KEY")]
        key: Key,
        #[serde(rename = "FRAGMENT")]
        fragment: String,
    },
    #[serde(rename = "READ_FRAG")]
    ReadFragment {
        #[serde(rename = "KEY")]
        key: Key,
    },
    #[serde(rename = "SYNCHRONIZE")]
    Synchronize {
        #[serde(rename = "KEYS")]
        keys: Vec<Key>,
    },
    #[serde(rename = "MAINTENANCE")]
    Maintenance,
}

/// `JOIN` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    #[serde(rename = "PREDECESSOR")]
    pub predecessor: PeerDescriptor,
}

/// `READ_FRAG` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentResponse {
    #[serde(rename = "FRAGMENT")]
    pub fragment: String,
}

/// Stamp a response body as successful.
pub fn ok_response(body: Value) -> Value {
    let mut body = if body.is_object() { body } else { json!({}) };
    body["SUCCESS"] = json!(true);
    body
}

/// A failure envelope carrying the error text.
pub fn error_response(errors: &str) -> Value {
    json!({ "SUCCESS": false, "ERRORS": errors })
}

/// Unwrap a response: the body on `SUCCESS`, otherwise the `ERRORS` text as
/// an error.
pub fn expect_success(response: Value) -> Result<Value> {
    if response.get("SUCCESS").and_then(Value::as_bool) == Some(true) {
        return Ok(response);
    }
    let errors = response
        .get("ERRORS")
        .and_then(Value::as_str)
        .unwrap_or("unspecified failure");
    Err(anyhow!("request failed: {errors}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerDescriptor {
        PeerDescriptor::new("127.0.0.1", 5055)
    }

    #[test]
    fn commands_carry_their_wire_tag() {
        let request = Request::bare(Command::Join { new_peer: peer() });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["COMMAND"], "JOIN");
        assert!(json["NEW_PEER"]["ID"].is_string());
        assert!(json.get("SENDER_ID").is_none());
    }

    #[test]
    fn addressed_requests_carry_the_envelope_ids() {
        let us = Key::from_plaintext("us");
        let them = Key::from_plaintext("them");
        let request =
            Request::addressed(&us, &them, Command::GetSuccessor { key: Key::from(9) });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["COMMAND"], "GET_SUCC");
        assert_eq!(json["SENDER_ID"], us.to_hex());
        assert_eq!(json["RECIPIENT_ID"], them.to_hex());
        assert_eq!(json["KEY"], "9");

        let reparsed: Request = serde_json::from_value(json).unwrap();
        assert_eq!(reparsed, request);
    }

    #[test]
    fn maintenance_is_a_bare_command() {
        let json = serde_json::to_value(Request::bare(Command::Maintenance)).unwrap();
        assert_eq!(json, json!({ "COMMAND": "MAINTENANCE" }));
    }

    #[test]
    fn leave_serializes_only_the_present_side() {
        let to_successor = Command::Leave {
            new_pred: Some(peer()),
            new_min: Some(Key::from(4)),
            new_succ: None,
        };
        let json = serde_json::to_value(Request::bare(to_successor)).unwrap();
        assert!(json.get("NEW_PRED").is_some());
        assert_eq!(json["NEW_MIN"], "4");
        assert!(json.get("NEW_SUCC").is_none());
    }

    #[test]
    fn every_command_round_trips() {
        let commands = vec![
            Command::Join { new_peer: peer() },
            Command::GetSuccessor { key: Key::from(1) },
            Command::GetPredecessor { key: Key::from(2) },
            Command::Notify { new_peer: peer(), recipient: Key::from(3) },
            Command::Leave {
                new_pred: None,
                new_min: None,
                new_succ: Some(peer()),
            },
            Command::CreateFragment { key: Key::from(4), fragment: "1:8.000000".into() },
            Command::ReadFragment { key: Key::from(5) },
            Command::Synchronize { keys: vec![Key::from(6), Key::from(7)] },
            Command::Maintenance,
        ];
        for command in commands {
            let request = Request::bare(command);
            let encoded = serde_json::to_string(&request).unwrap();
            let reparsed: Request = serde_json::from_str(&encoded).unwrap();
            assert_eq!(reparsed, request);
        }
    }

    #[test]
    fn unknown_commands_fail_to_parse() {
        let result: Result<Request, _> =
            serde_json::from_value(json!({ "COMMAND": "EXPLODE" }));
        assert!(result.is_err());
    }

    #[test]
    fn success_and_failure_envelopes() {
        let ok = ok_response(json!({ "FRAGMENT": "1:2.000000" }));
        assert_eq!(ok["SUCCESS"], true);
        let body = expect_success(ok).unwrap();
        assert_eq!(body["FRAGMENT"], "1:2.000000");

        let fail = error_response("Invalid command.");
        let err = expect_success(fail).unwrap_err();
        assert!(err.to_string().contains("Invalid command."));
    }
}
