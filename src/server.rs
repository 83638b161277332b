// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The request loop: per-request dispatch, configure-once state, and the
//! fatal-versus-recoverable error policy.

use crate::attest::{AwsCredentials, KeyRelease};
use crate::crypto::SealingKey;
use crate::protocol::{self, ConfigureParams, ErrorKind, MAX_REQUEST_BYTES};
use crate::router::{Router, RouterConfig, RouterError};
use crate::OramError;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Reasons the serve loop stops.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listener could not be created.
    #[error("bind failed: {0}")]
    Bind(#[from] std::io::Error),
    /// The trust boundary failed; all state must be discarded.
    #[error(transparent)]
    Fatal(#[from] OramError),
}

/// The blackboard service. Unconfigured until a successful `configure`
/// releases the session key; reconfiguration is rejected.
pub struct Acb<K> {
    release: K,
    router: Option<Router>,
}

impl<K: KeyRelease> Acb<K> {
    /// A service that will release its key through `release`.
    pub fn new(release: K) -> Self {
        Self {
            release,
            router: None,
        }
    }

    /// Whether `configure` has completed.
    pub fn configured(&self) -> bool {
        self.router.is_some()
    }

    /// Handles one raw request frame.
    ///
    /// Recoverable failures — bad input, unconfigured use, a spoiled
    /// standard-pool entry, any other unexpected handler failure — become
    /// error responses and the service keeps running; only engine failures
    /// propagate as [`OramError`] and must end the process.
    pub fn handle_request(&mut self, raw: &[u8]) -> Result<Value, OramError> {
        let Ok(request) = serde_json::from_slice::<Value>(raw) else {
            return Ok(protocol::error_response(ErrorKind::InvalidJson, None));
        };
        let response = match request.get("type").and_then(Value::as_str) {
            Some("ping") => json!({"status": "ok", "msg": "pong", "oram_enabled": true}),
            Some("configure") => self.handle_configure(&request)?,
            Some("store") => self.handle_store(&request)?,
            Some("retrieve") => self.handle_retrieve(&request)?,
            Some("metrics") => self.handle_metrics(),
            Some("health") => json!({
                "status": "healthy",
                "configured": self.configured(),
                "acb_enabled": self.configured(),
                "timestamp": timestamp(),
            }),
            _ => protocol::error_response(ErrorKind::UnknownType, None),
        };
        Ok(response)
    }

    fn handle_configure(&mut self, request: &Value) -> Result<Value, OramError> {
        if self.router.is_some() {
            return Ok(protocol::error_response(
                ErrorKind::AlreadyConfigured,
                Some("configure is accepted once per process".to_owned()),
            ));
        }

        let Ok(params) = serde_json::from_value::<ConfigureParams>(request.clone()) else {
            return Ok(protocol::error_response(
                ErrorKind::MissingFields,
                Some("malformed configure fields".to_owned()),
            ));
        };
        let missing = params.missing_fields();
        if !missing.is_empty() {
            log::error!("configure rejected, missing fields: {missing:?}");
            return Ok(protocol::error_response(
                ErrorKind::MissingFields,
                Some(format!("Required: {missing:?}")),
            ));
        }

        let credentials = AwsCredentials {
            access_key_id: params.aws_access_key_id.unwrap_or_default(),
            secret_access_key: params.aws_secret_access_key.unwrap_or_default(),
            session_token: params.aws_session_token.unwrap_or_default(),
        };
        let ciphertext = params.encrypted_tsk.unwrap_or_default();
        log::info!("configuring with credentials {credentials:?}");

        let released = match self.release.decrypt(&credentials, &ciphertext) {
            Ok(bytes) => bytes,
            Err(details) => {
                log::error!("key release failed: {details}");
                return Ok(protocol::error_response(
                    ErrorKind::KmsDecryptFailed,
                    Some(details),
                ));
            }
        };
        let key = match SealingKey::from_bytes(&released) {
            Ok(key) => key,
            Err(err) => {
                log::error!("key release returned unusable material: {err}");
                return Ok(protocol::error_response(
                    ErrorKind::KmsDecryptFailed,
                    Some(err.to_string()),
                ));
            }
        };

        self.router = Some(Router::new(RouterConfig::default(), &key, &mut OsRng)?);
        log::info!("configured; blackboard enabled");
        Ok(json!({
            "status": "ok",
            "msg": "configured",
            "timestamp": timestamp(),
            "acb_enabled": true,
            "oram_enabled": true,
        }))
    }

    fn handle_store(&mut self, request: &Value) -> Result<Value, OramError> {
        let Some(router) = self.router.as_mut() else {
            return Ok(protocol::error_response(
                ErrorKind::NotConfigured,
                Some("Call configure first".to_owned()),
            ));
        };
        let key = request.get("key").and_then(Value::as_str).unwrap_or_default();
        let value = request.get("value").filter(|value| !value.is_null());
        let (key, value) = match (key.is_empty(), value) {
            (false, Some(value)) => (key, value),
            _ => {
                return Ok(protocol::error_response(
                    ErrorKind::MissingParams,
                    Some("key and value required".to_owned()),
                ))
            }
        };

        let receipt = match router.store(key, &protocol::encode_value(value), &mut OsRng) {
            Ok(receipt) => receipt,
            Err(RouterError::Fatal(err)) => return Err(err),
            Err(err) => {
                log::error!("store of {key:?} failed: {err}");
                return Ok(protocol::error_response(ErrorKind::InternalError, None));
            }
        };
        let mut response = json!({"status": "ok", "msg": "stored", "key": key});
        merge(&mut response, serde_json::to_value(&receipt));
        Ok(response)
    }

    fn handle_retrieve(&mut self, request: &Value) -> Result<Value, OramError> {
        let Some(router) = self.router.as_mut() else {
            return Ok(protocol::error_response(
                ErrorKind::NotConfigured,
                Some("Call configure first".to_owned()),
            ));
        };
        let key = request.get("key").and_then(Value::as_str).unwrap_or_default();
        if key.is_empty() {
            return Ok(protocol::error_response(
                ErrorKind::MissingParams,
                Some("key required".to_owned()),
            ));
        }

        let (data, receipt) = match router.retrieve(key, &mut OsRng) {
            Ok(result) => result,
            Err(RouterError::Fatal(err)) => return Err(err),
            Err(err) => {
                log::error!("retrieve of {key:?} failed: {err}");
                return Ok(protocol::error_response(ErrorKind::InternalError, None));
            }
        };
        let mut response = match data {
            None => {
                log::info!("key {key:?} not found");
                json!({"status": "ok", "msg": "not_found", "key": key})
            }
            Some(bytes) => {
                log::info!("retrieved {key:?} via {:?} pool", receipt.routed_from);
                json!({
                    "status": "ok",
                    "msg": "retrieved",
                    "key": key,
                    "value": protocol::decode_value(&bytes),
                })
            }
        };
        merge(&mut response, serde_json::to_value(&receipt));
        Ok(response)
    }

    fn handle_metrics(&self) -> Value {
        match &self.router {
            None => protocol::error_response(ErrorKind::NotConfigured, None),
            Some(router) => {
                let mut response = json!({"status": "ok", "msg": "metrics"});
                merge(&mut response, serde_json::to_value(router.metrics()));
                response
            }
        }
    }
}

/// Folds serialized receipt fields into a response object.
fn merge(target: &mut Value, extra: Result<Value, serde_json::Error>) {
    if let (Value::Object(target), Ok(Value::Object(extra))) = (target, extra) {
        target.extend(extra);
    }
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Serves one connection: read a single request frame, answer it, done.
/// I/O failures are logged and dropped; only engine failures propagate.
pub fn handle_connection<K: KeyRelease, S: Read + Write>(
    acb: &mut Acb<K>,
    stream: &mut S,
) -> Result<(), OramError> {
    let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
    let read = match stream.read(&mut buffer) {
        Ok(0) => return Ok(()),
        Ok(read) => read,
        Err(err) => {
            log::warn!("request read failed: {err}");
            return Ok(());
        }
    };
    // A panicking handler answers internal_error like any other unexpected
    // failure; the request is lost but the service keeps serving.
    let response = match catch_unwind(AssertUnwindSafe(|| acb.handle_request(&buffer[..read]))) {
        Ok(response) => response?,
        Err(_) => {
            log::error!("request handler panicked");
            protocol::error_response(ErrorKind::InternalError, None)
        }
    };
    if let Err(err) = stream.write_all(response.to_string().as_bytes()) {
        log::warn!("response write failed: {err}");
    }
    Ok(())
}

/// Binds `addr` and serves connections sequentially until a fatal error.
///
/// One connection carries one request; there is no intra-request
/// concurrency, so the engine state is mutated atomically per access.
pub fn serve<K: KeyRelease>(addr: &str, mut acb: Acb<K>) -> Result<(), ServeError> {
    let listener = TcpListener::bind(addr)?;
    log::info!("listening on {addr}");
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                log::debug!("connection from {peer}");
                handle_connection(&mut acb, &mut stream)?;
            }
            Err(err) => log::warn!("accept failed: {err}"),
        }
    }
}
