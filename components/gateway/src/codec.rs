//! JSON-RPC 2.0 framing for gateway messages.
//!
//! Every WebSocket frame and user HTTP body is a JSON-RPC envelope carrying
//! a [`Message`] either as `params` (requests) or `result` (responses).
use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// JSON-RPC protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Stable error codes surfaced to users in JSON-RPC error responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Success.
    NoError,
    /// The user request could not be parsed or validated.
    UserMessageParseError,
    /// Internal failure while handling an otherwise valid request.
    FatalError,
}

impl ErrorCode {
    /// Numeric wire representation of the code.
    pub fn code(self) -> i64 {
        match self {
            Self::NoError => 0,
            Self::UserMessageParseError => 1,
            Self::FatalError => 2,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Request {
    jsonrpc: String,
    id: String,
    method: String,
    params: Message,
}

#[derive(Serialize, Deserialize)]
struct Response {
    jsonrpc: String,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
}

#[derive(Serialize, Deserialize)]
struct WireError {
    code: i64,
    message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    data: serde_json::Value,
}

/// Encodes a message as a JSON-RPC request. The envelope `id` and `method`
/// mirror the body fields.
pub fn encode_request(msg: &Message) -> anyhow::Result<Vec<u8>> {
    let req = Request {
        jsonrpc: JSONRPC_VERSION.into(),
        id: msg.body.message_id.clone(),
        method: msg.body.method.clone(),
        params: msg.clone(),
    };
    Ok(serde_json::to_vec(&req)?)
}

/// Decodes a JSON-RPC request. The envelope `id` and `method` are
/// re-injected into the body, so the body fields are authoritative for
/// downstream code regardless of which copy the peer populated.
pub fn decode_request(raw: &[u8]) -> anyhow::Result<Message> {
    let req: Request = serde_json::from_slice(raw).context("malformed JSON-RPC request")?;
    if req.jsonrpc != JSONRPC_VERSION {
        anyhow::bail!("unsupported JSON-RPC version: {:?}", req.jsonrpc);
    }
    let mut msg = req.params;
    msg.body.message_id = req.id;
    msg.body.method = req.method;
    Ok(msg)
}

/// Encodes a message as a successful JSON-RPC response.
pub fn encode_response(msg: &Message) -> anyhow::Result<Vec<u8>> {
    let resp = Response {
        jsonrpc: JSONRPC_VERSION.into(),
        id: msg.body.message_id.clone(),
        result: Some(msg.clone()),
        error: None,
    };
    Ok(serde_json::to_vec(&resp)?)
}

/// Decodes a JSON-RPC response. A populated `error` member is a hard error;
/// `result` and `error` are mutually exclusive.
pub fn decode_response(raw: &[u8]) -> anyhow::Result<Message> {
    let resp: Response = serde_json::from_slice(raw).context("malformed JSON-RPC response")?;
    if resp.jsonrpc != JSONRPC_VERSION {
        anyhow::bail!("unsupported JSON-RPC version: {:?}", resp.jsonrpc);
    }
    if let Some(err) = resp.error {
        anyhow::bail!("error response: code {}: {}", err.code, err.message);
    }
    let mut msg = resp.result.context("response without result")?;
    msg.body.message_id = resp.id;
    Ok(msg)
}

/// Builds a JSON-RPC error response from scratch, for failures where no
/// response [`Message`] exists (parse errors, handler failures).
pub fn encode_new_error_response(
    id: &str,
    code: ErrorCode,
    message: &str,
    data: serde_json::Value,
) -> anyhow::Result<Vec<u8>> {
    let resp = Response {
        jsonrpc: JSONRPC_VERSION.into(),
        id: id.into(),
        result: None,
        error: Some(WireError {
            code: code.code(),
            message: message.into(),
            data,
        }),
    };
    Ok(serde_json::to_vec(&resp)?)
}
