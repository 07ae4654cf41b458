use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use common::db::{self, AsyncDb};
use common::types::SignificantMarketChange;
use tokio::time::Instant;

use crate::compose::{self, ComposeParams, TrendTable};

struct Slot<T> {
    value: Option<Arc<T>>,
    computed_at: Option<Instant>,
    valid: bool,
    refreshing: bool,
    generation: u64,
}

/// A single memoised value with a TTL and explicit invalidation.
///
/// Reads inside the TTL return the snapshot. Once it expires (or is invalidated) the
/// next reader recomputes; readers arriving while that recompute runs get the previous
/// snapshot instead of waiting. A failed recompute serves the last good snapshot.
pub struct TtlCell<T> {
    name: &'static str,
    ttl: Duration,
    slot: Mutex<Slot<T>>,
}

impl<T> TtlCell<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            slot: Mutex::new(Slot {
                value: None,
                computed_at: None,
                valid: false,
                refreshing: false,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes effect for the very next read, including one racing an in-flight recompute.
    pub fn invalidate(&self) {
        let mut slot = self.lock();
        slot.valid = false;
        slot.generation = slot.generation.wrapping_add(1);
    }

    pub fn computed_at(&self) -> Option<Instant> {
        self.lock().computed_at
    }

    pub async fn get_or_refresh<F, Fut>(&self, compute: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let generation = {
            let mut slot = self.lock();
            let fresh = slot.valid
                && slot
                    .computed_at
                    .is_some_and(|at| at.elapsed() < self.ttl);
            match (&slot.value, fresh, slot.refreshing) {
                (Some(v), true, _) => {
                    metrics::counter!("fundtrend_cache_hits_total", "cell" => self.name).increment(1);
                    return Ok(Arc::clone(v));
                }
                (Some(v), false, true) => {
                    metrics::counter!("fundtrend_cache_hits_total", "cell" => self.name).increment(1);
                    tracing::debug!(cell = self.name, "refresh in flight; serving previous snapshot");
                    return Ok(Arc::clone(v));
                }
                _ => {}
            }
            slot.refreshing = true;
            slot.generation
        };

        metrics::counter!("fundtrend_cache_misses_total", "cell" => self.name).increment(1);
        let _guard = RefreshGuard { cell: self };

        match compute().await {
            Ok(value) => {
                let value = Arc::new(value);
                let mut slot = self.lock();
                slot.value = Some(Arc::clone(&value));
                slot.computed_at = Some(Instant::now());
                // An invalidation that landed mid-compute keeps the cell stale.
                slot.valid = slot.generation == generation;
                Ok(value)
            }
            Err(e) => {
                metrics::counter!("fundtrend_cache_refresh_failures_total", "cell" => self.name)
                    .increment(1);
                let last = self.lock().value.clone();
                match last {
                    Some(v) => {
                        tracing::warn!(cell = self.name, error = %e, "refresh failed; serving last good snapshot");
                        Ok(v)
                    }
                    None => Err(e),
                }
            }
        }
    }
}

struct RefreshGuard<'a, T> {
    cell: &'a TtlCell<T>,
}

impl<T> Drop for RefreshGuard<'_, T> {
    fn drop(&mut self) {
        self.cell.lock().refreshing = false;
    }
}

/// Global snapshot of the composed trend table and the significant-date list.
pub struct ResultCache {
    table: TtlCell<TrendTable>,
    significant: TtlCell<Vec<SignificantMarketChange>>,
}

impl ResultCache {
    pub fn new(table_ttl: Duration, significant_ttl: Duration) -> Self {
        Self {
            table: TtlCell::new("trend_table", table_ttl),
            significant: TtlCell::new("significant_dates", significant_ttl),
        }
    }

    pub fn from_config(cfg: &common::config::Cache) -> Self {
        Self::new(
            Duration::from_secs(cfg.table_ttl_secs),
            Duration::from_secs(cfg.significant_ttl_secs),
        )
    }

    pub async fn trend_table(&self, db: &AsyncDb, params: &ComposeParams) -> Result<Arc<TrendTable>> {
        self.table
            .get_or_refresh(|| compose::build_trend_table(db, params))
            .await
    }

    pub async fn significant_dates(
        &self,
        db: &AsyncDb,
        index_name: &str,
    ) -> Result<Arc<Vec<SignificantMarketChange>>> {
        let index = index_name.to_string();
        self.significant
            .get_or_refresh(|| {
                db.call_named("cache.significant_dates", move |conn| {
                    Ok(db::significant_changes(conn, &index)?)
                })
            })
            .await
    }

    /// Forces both snapshots to recompute on their next read.
    pub fn invalidate(&self) {
        self.table.invalidate();
        self.significant.invalidate();
        tracing::debug!("result cache invalidated");
    }
}
