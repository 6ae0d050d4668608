use std::sync::Arc;
use tracing::info;

use crate::config::{Config, Secrets};
use crate::error::{AppError, AppResult};
use crate::infrastructure::{
    bus::{InMemoryBus, MessageBus},
    cache::{Cache, InMemoryCache},
    cache_layer::CachedGraphStore,
    event_emitter::EventEmitter,
    graph_store::{FeedStore, GraphStore},
    memory_graph_store::InMemoryGraphStore,
    monitoring::MetricsCollector,
    security::{JwtSettings, JwtValidator},
    sqlite_database::SqliteGraphStore,
    store_decorators::ObservedGraphStore,
};
use crate::services::{
    EventIngestor, RecommendationEngine, RelationshipService, FEED_ROUTES, SOCIAL_GRAPH_ROUTES,
};

pub const SOCIAL_GRAPH_SERVICE: &str = "socialgraph";
pub const FEED_SERVICE: &str = "feed";

const MEMORY_URL: &str = "memory://";

/// Drivers behind the ports, opened once per process
#[derive(Debug, Clone)]
pub struct Adapters {
    pub store: Arc<dyn FeedStore>,
    pub cache: Arc<dyn Cache>,
    pub bus: Arc<dyn MessageBus>,
    pub metrics: Arc<MetricsCollector>,
}

impl Adapters {
    /// Open the adapters named by the secrets. The store accepts `sqlite:`
    /// urls or `memory://`; the cache and bus only ship in-process drivers.
    pub async fn open(
        secrets: &Secrets,
        config: &Config,
        metrics: Arc<MetricsCollector>,
    ) -> AppResult<Self> {
        let store: Arc<dyn FeedStore> = if secrets.database_url == MEMORY_URL {
            Arc::new(InMemoryGraphStore::new())
        } else if secrets.database_url.starts_with("sqlite:") {
            Arc::new(SqliteGraphStore::connect(&secrets.database_url).await?)
        } else {
            return Err(AppError::Configuration(
                "DATABASE_URL must be a sqlite: url or memory://".to_string(),
            ));
        };
        store.ensure_schema().await?;

        if secrets.cache_url != MEMORY_URL {
            return Err(AppError::Configuration(
                "CACHE_URL must be memory://".to_string(),
            ));
        }
        if secrets.bus_url != MEMORY_URL {
            return Err(AppError::Configuration("BUS_URL must be memory://".to_string()));
        }

        Ok(Self {
            store,
            cache: Arc::new(InMemoryCache::new(config.cache.capacity)),
            bus: Arc::new(InMemoryBus::with_history(config.bus.history)),
            metrics,
        })
    }

    pub fn in_memory(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            store: Arc::new(InMemoryGraphStore::new()),
            cache: Arc::new(InMemoryCache::new(10_000)),
            bus: Arc::new(InMemoryBus::new()),
            metrics,
        }
    }

    fn observed_store(&self) -> Arc<ObservedGraphStore<dyn FeedStore>> {
        Arc::new(ObservedGraphStore::new(
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct SocialGraphState {
    pub relationships: RelationshipService,
    pub validator: Arc<JwtValidator>,
    pub metrics: Arc<MetricsCollector>,
}

#[derive(Debug, Clone)]
pub struct FeedState {
    pub engine: RecommendationEngine,
    pub validator: Arc<JwtValidator>,
    pub metrics: Arc<MetricsCollector>,
}

impl SocialGraphState {
    /// Compose store -> observation -> cache, and the ingestor that feeds it
    pub fn build(
        adapters: &Adapters,
        config: &Config,
        jwt: &JwtSettings,
    ) -> (Self, EventIngestor) {
        let observed: Arc<dyn GraphStore> = adapters.observed_store();
        let cached = Arc::new(CachedGraphStore::new(
            observed,
            Arc::clone(&adapters.cache),
            config.cache.settings(),
            Arc::clone(&adapters.metrics),
        ));
        let emitter = EventEmitter::new(Arc::clone(&adapters.bus), Arc::clone(&adapters.metrics));
        let ingestor = EventIngestor::new(
            cached.clone(),
            Arc::clone(&adapters.bus),
            SOCIAL_GRAPH_SERVICE,
            SOCIAL_GRAPH_ROUTES,
            Arc::clone(&adapters.metrics),
        );
        info!("Social graph state ready");

        (
            Self {
                relationships: RelationshipService::new(cached, emitter),
                validator: Arc::new(JwtValidator::new(jwt)),
                metrics: Arc::clone(&adapters.metrics),
            },
            ingestor,
        )
    }
}

impl FeedState {
    pub fn build(adapters: &Adapters, config: &Config, jwt: &JwtSettings) -> (Self, EventIngestor) {
        let observed = adapters.observed_store();
        let ingestor = EventIngestor::new(
            observed.clone() as Arc<dyn GraphStore>,
            Arc::clone(&adapters.bus),
            FEED_SERVICE,
            FEED_ROUTES,
            Arc::clone(&adapters.metrics),
        );
        info!("Feed state ready");

        (
            Self {
                engine: RecommendationEngine::new(observed, config.feed.settings()),
                validator: Arc::new(JwtValidator::new(jwt)),
                metrics: Arc::clone(&adapters.metrics),
            },
            ingestor,
        )
    }
}
