// Monitoring and observability
// Per-operation counters for the store, cache and bus plus tracing setup

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Environment;

/// Metrics shared by the store wrapper, the cache overlay and the ingestor
#[derive(Debug, Default)]
pub struct MetricsCollector {
    operation_metrics: RwLock<HashMap<String, OperationMetrics>>,
    cache_metrics: RwLock<CacheMetrics>,
    bus_metrics: RwLock<BusMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
    pub last_called: Option<SystemTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub errors: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusMetrics {
    pub published: u64,
    pub publish_failures: u64,
    pub acked: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOperation {
    Hit,
    Miss,
    Write,
    Invalidation,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Published,
    PublishFailed,
    Acked,
    DeadLettered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub operations: HashMap<String, OperationMetrics>,
    pub cache: CacheMetrics,
    pub cache_hit_rate: f64,
    pub bus: BusMetrics,
    pub snapshot_time: SystemTime,
}

impl MetricsSnapshot {
    pub fn operation(&self, name: &str) -> OperationMetrics {
        self.operations.get(name).cloned().unwrap_or_default()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_operation(&self, operation: &str, duration: Duration, success: bool) {
        let mut metrics = self.operation_metrics.write().await;
        let entry = metrics.entry(operation.to_string()).or_default();

        entry.total_calls += 1;
        if success {
            entry.success_count += 1;
        } else {
            entry.error_count += 1;
        }

        let duration_ms = duration.as_secs_f64() * 1000.0;
        entry.avg_duration_ms = (entry.avg_duration_ms * (entry.total_calls - 1) as f64
            + duration_ms)
            / entry.total_calls as f64;
        if duration_ms > entry.max_duration_ms {
            entry.max_duration_ms = duration_ms;
        }
        entry.last_called = Some(SystemTime::now());
    }

    pub async fn record_cache_operation(&self, operation: CacheOperation) {
        let mut metrics = self.cache_metrics.write().await;
        match operation {
            CacheOperation::Hit => metrics.hits += 1,
            CacheOperation::Miss => metrics.misses += 1,
            CacheOperation::Write => metrics.writes += 1,
            CacheOperation::Invalidation => metrics.invalidations += 1,
            CacheOperation::Error => metrics.errors += 1,
        }
    }

    pub async fn record_bus_event(&self, event: BusEvent) {
        let mut metrics = self.bus_metrics.write().await;
        match event {
            BusEvent::Published => metrics.published += 1,
            BusEvent::PublishFailed => metrics.publish_failures += 1,
            BusEvent::Acked => metrics.acked += 1,
            BusEvent::DeadLettered => metrics.dead_lettered += 1,
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let cache = self.cache_metrics.read().await.clone();
        MetricsSnapshot {
            operations: self.operation_metrics.read().await.clone(),
            cache_hit_rate: cache.hit_rate(),
            cache,
            bus: self.bus_metrics.read().await.clone(),
            snapshot_time: SystemTime::now(),
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter; production output is JSON lines.
pub fn init_tracing(environment: Environment) -> Arc<MetricsCollector> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        Environment::Development => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if installed.is_ok() {
        info!(?environment, "Tracing initialized");
    }

    Arc::new(MetricsCollector::new())
}
