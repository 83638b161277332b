// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The enclave binary: logger, listener, sequential request loop.

use acb::attest::KmsToolCli;
use acb::server::{serve, Acb};
use log::LevelFilter;
use simplelog::{Config, SimpleLogger};
use std::process::ExitCode;

fn main() -> ExitCode {
    let level = std::env::var("ACB_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info);
    if SimpleLogger::init(level, Config::default()).is_err() {
        eprintln!("logger already initialized");
    }

    let addr = std::env::var("ACB_LISTEN").unwrap_or_else(|_| "0.0.0.0:5000".to_owned());
    let acb = Acb::new(KmsToolCli::from_env());
    match serve(&addr, acb) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Either the listener never came up or the trust boundary
            // failed mid-flight; in both cases all state is discarded.
            log::error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}
