//! Shared application state.

use std::sync::Arc;

use kbase_chat::Generator;
use kbase_core::KbaseConfig;
use kbase_infer::Embedder;
use kbase_ingest::{Ingester, ObjectStorage};
use kbase_resolve::Resolver;
use kbase_runtime::{Orchestrator, RuntimeLimits};
use kbase_store::SqliteStore;

use crate::auth::{Authenticator, JwtService, LocalAuthenticator};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: KbaseConfig,
    pub store: Arc<SqliteStore>,
    pub ingester: Ingester,
    pub orchestrator: Orchestrator,
    pub jwt: JwtService,
    pub authenticator: Arc<dyn Authenticator>,
    pub embedding_model: String,
    pub generation_model: String,
}

impl AppState {
    /// Wire the services over one store. The store doubles as the vector index.
    pub fn new(
        config: KbaseConfig,
        store: Arc<SqliteStore>,
        storage: Arc<dyn ObjectStorage>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        limits: RuntimeLimits,
    ) -> Self {
        let embedding_model = embedder.model_name().to_string();
        let generation_model = generator.model_name().to_string();

        let ingester = Ingester::new(store.clone(), storage, embedder.clone());
        let resolver = Arc::new(Resolver::new(store.clone(), store.clone(), embedder));
        let orchestrator = Orchestrator::new(store.clone(), resolver, generator, limits);
        let jwt = JwtService::from_config(&config);
        let authenticator = Arc::new(LocalAuthenticator::new(store.clone()));

        Self {
            config,
            store,
            ingester,
            orchestrator,
            jwt,
            authenticator,
            embedding_model,
            generation_model,
        }
    }

    /// Swap the authenticator, e.g. for a directory-backed one.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }
}
