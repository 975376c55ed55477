//! Gateway error taxonomy.
//!
//! `GatewayError` is the single error type that flows from every subsystem
//! (registry, RBAC, plugins, router, health) up to the JSON-RPC boundary,
//! where [`GatewayError::rpc_code`] maps it onto the gateway's JSON-RPC
//! error codes.

use thiserror::Error;

/// Abstract error kinds shared across the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotFound,
    Unavailable,
    Timeout,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    /// Human-readable diagnostic detail; never contains secrets or PII.
    pub data: Option<String>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MethodNotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// JSON-RPC error code for this kind.
    ///
    /// `Unavailable`/`Timeout`/etc. map onto the MCP-specific extension codes;
    /// `NotFound` intentionally uses the generic `-32404`, distinct from the
    /// more specific resource/tool/prompt "not found" codes the router emits
    /// directly for those cases (see `router::codes`).
    pub fn rpc_code(&self) -> i64 {
        match self.kind {
            ErrorKind::Validation => -32602,
            ErrorKind::Unauthorized => -32401,
            ErrorKind::Forbidden => -32403,
            ErrorKind::NotFound => -32404,
            ErrorKind::MethodNotFound => -32601,
            ErrorKind::Unavailable => -32004,
            ErrorKind::Timeout => -32408,
            ErrorKind::Conflict => -32600,
            ErrorKind::Internal => -32603,
        }
    }

    /// `true` when this error must never trigger a router retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            ErrorKind::Validation | ErrorKind::Forbidden | ErrorKind::Unauthorized
        )
    }
}

/// Startup-time configuration/bootstrap errors (process boundary only; request
/// handling paths always use `GatewayError`, never this type).
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Policy file error: {0}")]
    PolicyError(String),

    #[error("Plugin load error: {0}")]
    PluginLoadError(String),

    #[error("Other startup error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for StartupError {
    fn from(e: anyhow::Error) -> Self {
        StartupError::Other(e.to_string())
    }
}

impl From<crate::config::ConfigError> for StartupError {
    fn from(e: crate::config::ConfigError) -> Self {
        StartupError::ConfigError(e.to_string())
    }
}
