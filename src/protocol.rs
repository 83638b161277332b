// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The JSON wire vocabulary spoken over the enclave stream socket.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

/// Size of the request read buffer; one request must fit.
pub const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Machine-readable failure kinds carried in the `msg` field of error
/// responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// `configure` lacked one or more required fields.
    MissingFields,
    /// The key-release oracle refused or failed to decrypt.
    KmsDecryptFailed,
    /// The request was not a JSON object.
    InvalidJson,
    /// The handler failed for a reason not worth telling the caller.
    InternalError,
    /// The enclave has not been configured yet.
    NotConfigured,
    /// `store`/`retrieve` lacked a key or value.
    MissingParams,
    /// The request `type` is absent or unrecognized.
    UnknownType,
    /// `configure` was called on an already configured enclave.
    AlreadyConfigured,
}

impl ErrorKind {
    /// The wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MissingFields => "missing_fields",
            ErrorKind::KmsDecryptFailed => "kms_decrypt_failed",
            ErrorKind::InvalidJson => "invalid_json",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::MissingParams => "missing_params",
            ErrorKind::UnknownType => "unknown_type",
            ErrorKind::AlreadyConfigured => "already_configured",
        }
    }
}

/// Builds `{status: "error", msg: <kind>}`, with `details` when provided.
pub fn error_response(kind: ErrorKind, details: Option<String>) -> Value {
    let mut response = json!({"status": "error", "msg": kind.as_str()});
    if let Some(details) = details {
        response["details"] = Value::String(details);
    }
    response
}

/// Fields of a `configure` request. All four are required and must be
/// nonempty; `missing_fields` names the ones that are not.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigureParams {
    /// AWS access key ID forwarded to the key-release oracle.
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    /// AWS secret access key forwarded to the key-release oracle.
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,
    /// STS session token forwarded to the key-release oracle.
    #[serde(default)]
    pub aws_session_token: Option<String>,
    /// Base64 ciphertext of the 32-byte session key.
    #[serde(default)]
    pub encrypted_tsk: Option<String>,
}

impl ConfigureParams {
    /// Names of required fields that are absent or empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let required: [(&'static str, &Option<String>); 4] = [
            ("aws_access_key_id", &self.aws_access_key_id),
            ("aws_secret_access_key", &self.aws_secret_access_key),
            ("aws_session_token", &self.aws_session_token),
            ("encrypted_tsk", &self.encrypted_tsk),
        ];
        for (name, field) in required {
            if field.as_deref().map_or(true, str::is_empty) {
                missing.push(name);
            }
        }
        missing
    }
}

/// Bytes a store request's `value` turns into: strings as their UTF-8,
/// any other JSON value as its JSON text.
pub fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::String(text) => text.clone().into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

/// Recovers a retrieve payload for the wire: UTF-8 text is parsed further
/// as JSON when it parses, and non-UTF-8 bytes fall back to base64.
pub fn decode_value(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
        }
        Err(_) => Value::String(BASE64.encode(bytes)),
    }
}
