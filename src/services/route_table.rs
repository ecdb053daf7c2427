//! Namespace → model → client lookup, built once at startup.

use crate::core::config::{DirectFlavor, GatewayConfig, ProviderConfig, DEFAULT_NAMESPACE};
use crate::core::error::{AppError, ConfigError};
use crate::services::client::ProviderClient;
use crate::services::direct::DirectClient;
use crate::services::pool::WeightedPoolClient;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Externally visible model record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvertisedModel {
    pub id: String,
    pub created: i64,
    pub owned_by: String,
    pub object: &'static str,
}

impl AdvertisedModel {
    pub fn new(namespace: &str, model: &str, created: i64) -> Self {
        let id = if namespace == DEFAULT_NAMESPACE {
            model.to_string()
        } else {
            format!("{}/{}", namespace, model)
        };
        Self {
            id,
            created,
            owned_by: namespace.to_string(),
            object: "model",
        }
    }
}

struct Route {
    client: Arc<dyn ProviderClient>,
    /// Which provider entry declared this route, for duplicate warnings
    origin: String,
}

/// Immutable routing table. Never mutated once requests are being served.
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<String, HashMap<String, Route>>,
    models: Vec<AdvertisedModel>,
    created: i64,
}

impl ProviderConfig {
    /// Construct the client this entry describes.
    pub fn build_client(
        &self,
        http: &reqwest::Client,
    ) -> Result<Arc<dyn ProviderClient>, ConfigError> {
        let client: Arc<dyn ProviderClient> = match self {
            ProviderConfig::Direct(config) => Arc::new(DirectClient::from_config(
                config,
                DirectFlavor::Any,
                http.clone(),
            )?),
            ProviderConfig::OpenAi(config) => Arc::new(DirectClient::from_config(
                config,
                DirectFlavor::OpenAi,
                http.clone(),
            )?),
            ProviderConfig::Azure(config) => Arc::new(DirectClient::from_config(
                config,
                DirectFlavor::Azure,
                http.clone(),
            )?),
            ProviderConfig::WeightedPool(config) => {
                Arc::new(WeightedPoolClient::from_config(config, http)?)
            }
        };
        Ok(client)
    }
}

impl RouteTable {
    /// Empty table whose advertised models carry `created` as their timestamp.
    pub fn new(created: i64) -> Self {
        Self {
            created,
            ..Default::default()
        }
    }

    /// Build from validated configuration, one client per provider entry.
    pub fn from_config(
        config: &GatewayConfig,
        http: &reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let mut table = Self::new(chrono::Utc::now().timestamp());

        for namespace in &config.namespaces {
            for (index, provider) in namespace.providers.iter().enumerate() {
                let client =
                    provider
                        .build_client(http)
                        .map_err(|e| ConfigError::InvalidProvider {
                            namespace: namespace.name.clone(),
                            index,
                            reason: e.to_string(),
                        })?;
                let origin = format!("provider #{} ({})", index, provider.kind());
                for model in provider.models() {
                    table.insert_at(&namespace.name, model, client.clone(), origin.clone());
                }
            }
        }

        tracing::info!(
            "Route table built: {} namespaces, {} models",
            table.routes.len(),
            table.models.len()
        );
        Ok(table)
    }

    /// Register a route. A later registration of the same pair replaces the client but
    /// keeps the model's original position in the advertised list.
    pub fn insert(&mut self, namespace: &str, model: &str, client: Arc<dyn ProviderClient>) {
        let origin = format!("{} client", client.kind());
        self.insert_at(namespace, model, client, origin);
    }

    fn insert_at(
        &mut self,
        namespace: &str,
        model: &str,
        client: Arc<dyn ProviderClient>,
        origin: String,
    ) {
        let models = self.routes.entry(namespace.to_string()).or_default();
        let previous = models.insert(
            model.to_string(),
            Route {
                client,
                origin: origin.clone(),
            },
        );

        match previous {
            Some(previous) => tracing::warn!(
                namespace = %namespace,
                model = %model,
                "Model declared more than once; {} replaces {}",
                origin,
                previous.origin
            ),
            None => self
                .models
                .push(AdvertisedModel::new(namespace, model, self.created)),
        }
    }

    /// Look up the client for a split model identifier.
    pub fn resolve(
        &self,
        namespace: &str,
        model: &str,
    ) -> Result<Arc<dyn ProviderClient>, AppError> {
        let models = self
            .routes
            .get(namespace)
            .ok_or(AppError::NamespaceNotFound)?;
        models
            .get(model)
            .map(|route| route.client.clone())
            .ok_or(AppError::ModelNotFound)
    }

    /// Advertised models in registration order.
    pub fn list_models(&self) -> &[AdvertisedModel] {
        &self.models
    }

    pub fn namespace_count(&self) -> usize {
        self.routes.len()
    }
}
