//! Weighted pool of interchangeable clients.
//!
//! Each call independently picks one member with probability proportional to its weight.
//! There is no failover: if the chosen member fails, the call fails.

use crate::core::config::PoolConfig;
use crate::core::error::{ConfigError, ProviderError};
use crate::core::metrics::get_metrics;
use crate::services::client::{ChunkStream, Endpoint, ProviderClient};
use crate::services::direct::DirectClient;
use async_trait::async_trait;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde_json::Value;
use std::sync::Arc;

/// One selectable member of a pool.
#[derive(Clone)]
pub struct PoolMember {
    /// `client_{i}` by declaration order
    pub label: String,
    pub client: Arc<dyn ProviderClient>,
    pub weight: u32,
}

impl PoolMember {
    pub fn new(index: usize, client: Arc<dyn ProviderClient>, weight: u32) -> Self {
        Self {
            label: format!("client_{}", index),
            client,
            weight,
        }
    }
}

pub struct WeightedPoolClient {
    name: String,
    members: Vec<PoolMember>,
    weighted_index: WeightedIndex<u32>,
}

impl WeightedPoolClient {
    /// Build a pool; fails if there are no members or a weight is zero.
    pub fn new(name: impl Into<String>, members: Vec<PoolMember>) -> Result<Self, ConfigError> {
        let name = name.into();
        if let Some(member) = members.iter().find(|m| m.weight == 0) {
            return Err(ConfigError::Invalid(format!(
                "pool `{}` member {} has zero weight",
                name, member.label
            )));
        }
        let weights: Vec<u32> = members.iter().map(|m| m.weight).collect();
        if weights
            .iter()
            .try_fold(0u32, |total, weight| total.checked_add(*weight))
            .is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "pool `{}` total weight exceeds {}",
                name,
                u32::MAX
            )));
        }
        let weighted_index = WeightedIndex::new(&weights)
            .map_err(|e| ConfigError::Invalid(format!("pool `{}`: {}", name, e)))?;

        Ok(Self {
            name,
            members,
            weighted_index,
        })
    }

    /// One OpenAI-compatible member per configured key, all sharing `base_url`.
    pub fn from_config(config: &PoolConfig, http: &reqwest::Client) -> Result<Self, ConfigError> {
        let keys = config.members().map_err(ConfigError::Invalid)?;
        let members = keys
            .into_iter()
            .enumerate()
            .map(|(i, (api_key, weight))| {
                let client: Arc<dyn ProviderClient> = Arc::new(DirectClient::openai(
                    http.clone(),
                    config.base_url.clone(),
                    api_key,
                ));
                PoolMember::new(i, client, weight)
            })
            .collect();

        Self::new(config.base_url.clone(), members)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[PoolMember] {
        &self.members
    }

    /// Draw a member using the thread-local RNG.
    pub fn select(&self) -> &PoolMember {
        self.select_with(&mut thread_rng())
    }

    /// Draw a member using the given RNG.
    pub fn select_with<R: Rng + ?Sized>(&self, rng: &mut R) -> &PoolMember {
        let member = &self.members[self.weighted_index.sample(rng)];
        tracing::debug!(pool = %self.name, member = %member.label, "Selected pool member");
        get_metrics()
            .pool_selections
            .with_label_values(&[&self.name, &member.label])
            .inc();
        member
    }
}

#[async_trait]
impl ProviderClient for WeightedPoolClient {
    fn kind(&self) -> &'static str {
        "weighted_pool"
    }

    async fn respond(&self, endpoint: Endpoint, body: &Value) -> Result<Value, ProviderError> {
        let member = self.select();
        member.client.respond(endpoint, body).await
    }

    async fn respond_stream(
        &self,
        endpoint: Endpoint,
        body: &Value,
    ) -> Result<ChunkStream, ProviderError> {
        let member = self.select();
        member.client.respond_stream(endpoint, body).await
    }
}
