//! FILENAME: core/cube-engine/src/cache.rs
//! Materialized Query Cache - Content-addressed snapshots of query results.
//!
//! Every planned query is keyed by its rendered SQL text. The first request
//! for a key runs the query through the aggregation source and stores the
//! rows as a named materialization; every later request reads them back.
//!
//! Names look like `<namespace>_<table fp>_<query fp>`, where the
//! fingerprints are truncated SHA-256 hex digests. Creation runs under an
//! advisory lock derived from the name, inside a savepoint, so concurrent
//! requests for one key create it exactly once and a failed creation leaves
//! the caller's unit of work usable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::error::{CubeError, Result};
use crate::query::AggregateQuery;
use crate::source::{AggregationSource, Row};
use crate::store::{CacheStore, UnitOfWork};

/// Hex digits of the table fingerprint in a materialization name.
pub const TABLE_FINGERPRINT_LEN: usize = 8;

/// Hex digits of the query fingerprint in a materialization name.
pub const QUERY_FINGERPRINT_LEN: usize = 16;

// ============================================================================
// FINGERPRINTS
// ============================================================================

/// The first `len` hex digits of the SHA-256 of `text`.
pub fn fingerprint(text: &str, len: usize) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex.truncate(len);
    hex
}

/// 64-bit advisory lock key for a materialization name.
pub fn lock_key(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

// ============================================================================
// CACHE
// ============================================================================

/// Hit and creation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub created: u64,
}

/// Query results materialized in a `CacheStore`, computed on a miss by an
/// `AggregationSource`.
#[derive(Debug)]
pub struct MaterializedCache<S, A> {
    store: S,
    source: A,
    config: CacheConfig,
    hits: AtomicU64,
    created: AtomicU64,
}

impl<S: CacheStore, A: AggregationSource> MaterializedCache<S, A> {
    pub fn new(store: S, source: A) -> Self {
        Self::with_config(store, source, CacheConfig::default())
    }

    pub fn with_config(store: S, source: A, config: CacheConfig) -> Self {
        MaterializedCache {
            store,
            source,
            config,
            hits: AtomicU64::new(0),
            created: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn source(&self) -> &A {
        &self.source
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
        }
    }

    /// `<namespace>_<table fp>_`: shared by every materialization of a table.
    pub fn table_prefix(&self, table_key: &str) -> String {
        format!(
            "{}_{}_",
            self.config.namespace,
            fingerprint(table_key, TABLE_FINGERPRINT_LEN)
        )
    }

    pub fn materialization_name(&self, table_key: &str, query: &AggregateQuery) -> String {
        format!(
            "{}{}",
            self.table_prefix(table_key),
            fingerprint(&query.to_sql(), QUERY_FINGERPRINT_LEN)
        )
    }

    /// Returns the rows of `query`, materializing them first if needed.
    /// Runs in a unit of work of its own.
    pub fn get(
        &self,
        table_key: &str,
        query: &AggregateQuery,
        timeout: Option<Duration>,
    ) -> Result<Arc<Vec<Row>>> {
        let mut uow = self.store.begin()?;
        let rows = self.get_in(uow.as_mut(), table_key, query, timeout)?;
        uow.commit()?;
        Ok(rows)
    }

    /// Like `get`, inside a unit of work owned by the caller. The advisory
    /// lock is held until that unit of work ends. On failure the unit of work
    /// is rolled back to where it was before the call and stays usable.
    pub fn get_in(
        &self,
        uow: &mut dyn UnitOfWork,
        table_key: &str,
        query: &AggregateQuery,
        timeout: Option<Duration>,
    ) -> Result<Arc<Vec<Row>>> {
        let name = self.materialization_name(table_key, query);
        uow.advisory_lock(lock_key(&name))?;
        uow.savepoint(&name)?;

        match self.read_or_create(uow, &name, query, timeout) {
            Ok(rows) => {
                uow.release(&name)?;
                Ok(rows)
            }
            Err(err) => {
                if let Err(rollback) = uow.rollback_to(&name).and_then(|_| uow.release(&name)) {
                    warn!("rollback failed name={} error={}", name, rollback);
                }
                Err(err)
            }
        }
    }

    fn read_or_create(
        &self,
        uow: &mut dyn UnitOfWork,
        name: &str,
        query: &AggregateQuery,
        timeout: Option<Duration>,
    ) -> Result<Arc<Vec<Row>>> {
        if let Some(rows) = uow.read(name)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("cache hit name={} rows={}", name, rows.len());
            return Ok(rows);
        }

        let rows = self.source.select(query, timeout)?;
        let count = rows.len();
        uow.create(name, rows, self.config.durability)?;
        self.created.fetch_add(1, Ordering::Relaxed);
        info!(
            "materialized name={} rows={} durability={:?}",
            name, count, self.config.durability
        );

        uow.read(name)?
            .ok_or_else(|| CubeError::Store(format!("'{}' vanished after creation", name)))
    }

    /// Drops every materialization of `table_key`. Returns how many went.
    pub fn clear(&self, table_key: &str) -> Result<usize> {
        let prefix = self.table_prefix(table_key);
        let mut dropped = 0;
        for name in self.store.list(&prefix)? {
            if self.store.drop_table(&name)? {
                dropped += 1;
            }
        }
        info!("cleared table={} dropped={}", table_key, dropped);
        Ok(dropped)
    }

    /// Drops every materialization in this namespace whose table is not one
    /// of `known_tables`. Returns how many went.
    pub fn clear_orphans<I, K>(&self, known_tables: I) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let known: FxHashSet<String> = known_tables
            .into_iter()
            .map(|key| fingerprint(key.as_ref(), TABLE_FINGERPRINT_LEN))
            .collect();
        let namespace_prefix = format!("{}_", self.config.namespace);

        let mut dropped = 0;
        for name in self.store.list(&namespace_prefix)? {
            let rest = &name[namespace_prefix.len()..];
            let Some((table_fp, query_fp)) = rest.split_once('_') else {
                continue;
            };
            // Names from a longer namespace sharing our prefix do not parse.
            if !is_hex(table_fp, TABLE_FINGERPRINT_LEN) || !is_hex(query_fp, QUERY_FINGERPRINT_LEN) {
                continue;
            }
            if !known.contains(table_fp) && self.store.drop_table(&name)? {
                dropped += 1;
            }
        }
        info!("cleared orphans namespace={} dropped={}", self.config.namespace, dropped);
        Ok(dropped)
    }
}
