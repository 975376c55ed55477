//! JSON-RPC 2.0 envelope types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::GatewayError;

/// Request `id`: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    String(String),
    Number(i64),
    Null,
}

impl Default for RpcId {
    fn default() -> Self {
        RpcId::Null
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: RpcId,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Invariant checks: `jsonrpc=="2.0"` and non-empty `method`.
    pub fn validate_envelope(&self) -> Result<(), GatewayError> {
        match &self.jsonrpc {
            Some(v) if v == "2.0" => {}
            _ => return Err(GatewayError::conflict("jsonrpc must be \"2.0\"")),
        }
        if self.method.is_empty() {
            return Err(GatewayError::conflict("method must be non-empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RpcId, code: i64, message: impl Into<String>, data: Option<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    pub fn from_gateway_error(id: RpcId, err: &GatewayError) -> Self {
        Self::failure(id, err.rpc_code(), err.message.clone(), err.data.clone())
    }

    /// Error response for an explicit JSON-RPC code that doesn't map cleanly
    /// onto `ErrorKind` (e.g. -32700 parse error, -32001 resource-not-found).
    pub fn failure_code(id: RpcId, code: i64, message: impl Into<String>) -> Self {
        Self::failure(id, code, message, None)
    }
}

pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const RESOURCE_NOT_FOUND: i64 = -32001;
    pub const TOOL_NOT_FOUND: i64 = -32002;
    pub const PROMPT_NOT_FOUND: i64 = -32003;
    pub const SERVICE_UNAVAILABLE: i64 = -32004;
    pub const UNAUTHORIZED: i64 = -32401;
    pub const FORBIDDEN: i64 = -32403;
    pub const NOT_FOUND: i64 = -32404;
    pub const TIMEOUT: i64 = -32408;
    pub const RATE_LIMITED: i64 = -32429;
}
