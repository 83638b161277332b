// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Sensitivity-based routing between the ORAM and standard pools.

use crate::crypto::{DecryptError, SealError, SealingKey};
use crate::oram_pool::{OramPool, OramPoolMetrics};
use crate::standard_pool::{StandardPool, StandardPoolMetrics};
use crate::{OramError, PoolKind, RetrieveStats, StoreStats};
use rand::{CryptoRng, RngCore};
use serde::Serialize;
use thiserror::Error;

/// Key prefixes whose entries are routed to the ORAM pool. Matching is
/// case-insensitive and anchored at the start of the key.
pub const SENSITIVE_PREFIXES: [&str; 6] = [
    "session_key:",
    "ephemeral:",
    "secret:",
    "credential:",
    "private:",
    "token:",
];

/// Why a store landed in its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// The key starts with one of [`SENSITIVE_PREFIXES`].
    SensitivePrefix,
    /// It does not.
    NonSensitive,
}

/// Geometry of the ORAM pool behind the router.
#[derive(Clone, Copy, Debug)]
pub struct RouterConfig {
    /// Capacity of the ORAM pool in blocks.
    pub oram_capacity: usize,
    /// ORAM block size in bytes.
    pub oram_block_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            oram_capacity: 256,
            oram_block_size: 256,
        }
    }
}

/// Returns the pool serving `key`. Classification depends only on the key
/// and is stable for the process lifetime.
pub fn classify(key: &str) -> PoolKind {
    let key = key.to_ascii_lowercase();
    if SENSITIVE_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
    {
        PoolKind::Oram
    } else {
        PoolKind::Standard
    }
}

/// A store receipt: the pool's accounting annotated with the routing
/// decision.
#[derive(Clone, Debug, Serialize)]
pub struct StoreReceipt {
    /// The pool chosen for the write.
    pub routed_to: PoolKind,
    /// What triggered the choice.
    pub reason: RouteReason,
    /// The pool's own accounting.
    #[serde(flatten)]
    pub stats: StoreStats,
}

/// A retrieve receipt: the pool's accounting annotated with its origin.
#[derive(Clone, Debug, Serialize)]
pub struct RetrieveReceipt {
    /// The pool that was consulted.
    pub routed_from: PoolKind,
    /// The pool's own accounting.
    #[serde(flatten)]
    pub stats: RetrieveStats,
}

/// Route counters plus both pools' native metrics.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RouterMetrics {
    /// Routing counters.
    pub routing: RoutingMetrics,
    /// ORAM pool metrics.
    pub oram_pool: OramPoolMetrics,
    /// Standard pool metrics.
    pub standard_pool: StandardPoolMetrics,
}

/// How stores and retrieves have been distributed across the pools.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RoutingMetrics {
    /// Operations routed to the ORAM pool.
    pub oram_routes: u64,
    /// Operations routed to the standard pool.
    pub standard_routes: u64,
    /// Sum of both counters.
    pub total_routes: u64,
    /// Share of ORAM routes, in percent; zero before any routing.
    pub oram_percentage: f64,
}

/// How a routed store or retrieve can fail.
///
/// Only engine failures poison the trust boundary; a standard-pool entry
/// that cannot be sealed or unsealed spoils that one request, and callers
/// answer it as an internal error while the blackboard keeps serving.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The oblivious engine failed; fatal, all state must be discarded.
    #[error(transparent)]
    Fatal(#[from] OramError),
    /// A standard-pool entry failed authenticated decryption; recoverable.
    #[error("standard pool entry failed authentication")]
    CorruptEntry(#[from] DecryptError),
    /// A standard-pool value could not be sealed; recoverable.
    #[error("standard pool value could not be sealed")]
    SealFailed(#[from] SealError),
}

/// The blackboard front end: one ORAM pool, one standard pool, and a
/// prefix check deciding which serves each key.
pub struct Router {
    oram_pool: OramPool,
    standard_pool: StandardPool,
    oram_routes: u64,
    standard_routes: u64,
}

impl Router {
    /// Builds both pools over the shared sealing key.
    pub fn new<R: RngCore + CryptoRng>(
        config: RouterConfig,
        key: &SealingKey,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        Ok(Self {
            oram_pool: OramPool::new(config.oram_capacity, config.oram_block_size, key, rng)?,
            standard_pool: StandardPool::new(key),
            oram_routes: 0,
            standard_routes: 0,
        })
    }

    /// Stores `value` in the pool chosen by the key's prefix.
    pub fn store<R: RngCore + CryptoRng>(
        &mut self,
        key: &str,
        value: &[u8],
        rng: &mut R,
    ) -> Result<StoreReceipt, RouterError> {
        match classify(key) {
            PoolKind::Oram => {
                self.oram_routes += 1;
                let stats = self.oram_pool.store(key, value, rng)?;
                log::info!("stored {key:?} via oram pool");
                Ok(StoreReceipt {
                    routed_to: PoolKind::Oram,
                    reason: RouteReason::SensitivePrefix,
                    stats,
                })
            }
            PoolKind::Standard => {
                self.standard_routes += 1;
                let stats = self.standard_pool.store(key, value, rng)?;
                log::info!("stored {key:?} via standard pool");
                Ok(StoreReceipt {
                    routed_to: PoolKind::Standard,
                    reason: RouteReason::NonSensitive,
                    stats,
                })
            }
        }
    }

    /// Retrieves `key` from the pool its prefix selects.
    pub fn retrieve<R: RngCore + CryptoRng>(
        &mut self,
        key: &str,
        rng: &mut R,
    ) -> Result<(Option<Vec<u8>>, RetrieveReceipt), RouterError> {
        match classify(key) {
            PoolKind::Oram => {
                let (data, stats) = self.oram_pool.retrieve(key, rng)?;
                Ok((
                    data,
                    RetrieveReceipt {
                        routed_from: PoolKind::Oram,
                        stats,
                    },
                ))
            }
            PoolKind::Standard => {
                let (data, stats) = self.standard_pool.retrieve(key)?;
                Ok((
                    data,
                    RetrieveReceipt {
                        routed_from: PoolKind::Standard,
                        stats,
                    },
                ))
            }
        }
    }

    /// Routing and pool metrics.
    pub fn metrics(&self) -> RouterMetrics {
        let total = self.oram_routes + self.standard_routes;
        RouterMetrics {
            routing: RoutingMetrics {
                oram_routes: self.oram_routes,
                standard_routes: self.standard_routes,
                total_routes: total,
                oram_percentage: if total == 0 {
                    0.0
                } else {
                    self.oram_routes as f64 / total as f64 * 100.0
                },
            },
            oram_pool: self.oram_pool.metrics(),
            standard_pool: self.standard_pool.metrics(),
        }
    }

    #[cfg(test)]
    pub(crate) fn standard_pool_mut(&mut self) -> &mut StandardPool {
        &mut self.standard_pool
    }

    /// A short human-readable security report.
    pub fn security_summary(&self) -> String {
        let metrics = self.metrics();
        format!(
            "ACB security summary:\n\
             ORAM-protected accesses: {}\n\
             Standard accesses: {}\n\
             ORAM usage: {:.1}%\n\
             ORAM pool: {} entries, stash {} (peak {}), tree height {}\n\
             Standard pool: {} entries\n",
            metrics.routing.oram_routes,
            metrics.routing.standard_routes,
            metrics.routing.oram_percentage,
            metrics.oram_pool.entries,
            metrics.oram_pool.engine.stash_size,
            metrics.oram_pool.engine.stash_peak,
            metrics.oram_pool.engine.tree_height,
            metrics.standard_pool.entries,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn router(seed: u64) -> (Router, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let key = SealingKey::generate(&mut rng);
        let router = Router::new(RouterConfig::default(), &key, &mut rng).unwrap();
        (router, rng)
    }

    #[test]
    fn sensitive_keys_route_to_oram() {
        let (mut router, mut rng) = router(0);
        let receipt = router
            .store("session_key:user_123", b"secret_session", &mut rng)
            .unwrap();
        assert_eq!(receipt.routed_to, PoolKind::Oram);
        assert_eq!(receipt.reason, RouteReason::SensitivePrefix);
        assert_eq!(receipt.stats.path_length, Some(9));
    }

    #[test]
    fn other_keys_route_to_standard() {
        let (mut router, mut rng) = router(1);
        let receipt = router
            .store("workflow:checkpoint_1", b"state_data", &mut rng)
            .unwrap();
        assert_eq!(receipt.routed_to, PoolKind::Standard);
        assert_eq!(receipt.reason, RouteReason::NonSensitive);
        assert_eq!(receipt.stats.overhead, Some("O(1)"));
    }

    #[test]
    fn every_sensitive_prefix_routes_to_oram() {
        let (mut router, mut rng) = router(2);
        for key in [
            "session_key:test",
            "ephemeral:temp",
            "secret:password",
            "credential:user",
            "private:data",
            "token:auth",
        ] {
            let receipt = router.store(key, b"value", &mut rng).unwrap();
            assert_eq!(receipt.routed_to, PoolKind::Oram, "key {key}");
        }
        for key in ["workflow:x", "metadata:y", "config:z", "data:w"] {
            let receipt = router.store(key, b"value", &mut rng).unwrap();
            assert_eq!(receipt.routed_to, PoolKind::Standard, "key {key}");
        }
    }

    #[test]
    fn classification_ignores_case() {
        let (mut router, mut rng) = router(3);
        for key in ["SESSION_KEY:upper", "Session_Key:mixed", "SECRET:x"] {
            let receipt = router.store(key, b"value", &mut rng).unwrap();
            assert_eq!(receipt.routed_to, PoolKind::Oram, "key {key}");
        }
        assert_eq!(classify("secret:x"), classify("SECRET:x"));
    }

    #[test]
    fn retrieves_come_back_from_the_right_pool() {
        let (mut router, mut rng) = router(4);
        router
            .store("secret:password", b"sensitive_value", &mut rng)
            .unwrap();
        router
            .store("config:setting", b"regular_value", &mut rng)
            .unwrap();

        let (data, receipt) = router.retrieve("secret:password", &mut rng).unwrap();
        assert_eq!(data.unwrap(), b"sensitive_value");
        assert_eq!(receipt.routed_from, PoolKind::Oram);

        let (data, receipt) = router.retrieve("config:setting", &mut rng).unwrap();
        assert_eq!(data.unwrap(), b"regular_value");
        assert_eq!(receipt.routed_from, PoolKind::Standard);
    }

    #[test]
    fn route_counters_accumulate() {
        let (mut router, mut rng) = router(5);
        router.store("secret:a", b"1", &mut rng).unwrap();
        router.store("secret:b", b"2", &mut rng).unwrap();
        router.store("data:c", b"3", &mut rng).unwrap();

        let metrics = router.metrics();
        assert_eq!(metrics.routing.oram_routes, 2);
        assert_eq!(metrics.routing.standard_routes, 1);
        assert_eq!(metrics.routing.total_routes, 3);
    }

    #[test]
    fn empty_router_reports_zero_percentage() {
        let (router, _) = router(6);
        assert_eq!(router.metrics().routing.oram_percentage, 0.0);
    }

    #[test]
    fn mixed_workload_distribution() {
        let (mut router, mut rng) = router(7);
        for i in 0..100 {
            router
                .store(&format!("workflow:step_{i}"), format!("state_{i}").as_bytes(), &mut rng)
                .unwrap();
        }
        for i in 0..10 {
            router
                .store(
                    &format!("session_key:session_{i}"),
                    format!("secret_{i}").as_bytes(),
                    &mut rng,
                )
                .unwrap();
        }

        let metrics = router.metrics();
        assert_eq!(metrics.routing.standard_routes, 100);
        assert_eq!(metrics.routing.oram_routes, 10);
        assert_eq!(metrics.oram_pool.entries, 10);
        assert_eq!(metrics.standard_pool.entries, 100);
        let expected = 10.0 / 110.0 * 100.0;
        assert!((metrics.routing.oram_percentage - expected).abs() < 1e-9);
    }

    #[test]
    fn unknown_keys_miss_in_both_pools() {
        let (mut router, mut rng) = router(8);
        let (data, receipt) = router.retrieve("secret:never", &mut rng).unwrap();
        assert_eq!(data, None);
        assert!(!receipt.stats.found);
        assert_eq!(receipt.routed_from, PoolKind::Oram);

        let (data, receipt) = router.retrieve("config:never", &mut rng).unwrap();
        assert_eq!(data, None);
        assert!(!receipt.stats.found);
        assert_eq!(receipt.routed_from, PoolKind::Standard);
    }

    #[test]
    fn corrupt_standard_entries_fail_recoverably() {
        let (mut router, mut rng) = router(11);
        router.store("config:damaged", b"value", &mut rng).unwrap();
        router.store("config:intact", b"other", &mut rng).unwrap();
        assert!(router.standard_pool_mut().corrupt("config:damaged"));

        assert!(matches!(
            router.retrieve("config:damaged", &mut rng),
            Err(RouterError::CorruptEntry(_))
        ));
        // One spoiled entry leaves the rest of the blackboard serving.
        let (data, _) = router.retrieve("config:intact", &mut rng).unwrap();
        assert_eq!(data.unwrap(), b"other");
    }

    #[test]
    fn security_summary_renders_counts() {
        let (mut router, mut rng) = router(9);
        router.store("secret:x", b"1", &mut rng).unwrap();
        router.store("data:y", b"2", &mut rng).unwrap();
        let summary = router.security_summary();
        assert!(summary.contains("ORAM-protected accesses: 1"));
        assert!(summary.contains("Standard accesses: 1"));
        assert!(summary.contains("ORAM usage: 50.0%"));
    }

    #[test]
    fn store_receipts_serialize_flat() {
        let (mut router, mut rng) = router(10);
        let receipt = router.store("secret:x", b"v", &mut rng).unwrap();
        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(value["routed_to"], "oram");
        assert_eq!(value["reason"], "sensitive_prefix");
        assert_eq!(value["pool"], "oram");
        assert_eq!(value["access_count"], 1);
        assert_eq!(value["path_length"], 9);
        assert!(value.get("overhead").is_none());
    }
}
