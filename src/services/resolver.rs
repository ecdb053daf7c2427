//! Bearer-token check and model identifier resolution.

use crate::core::config::DEFAULT_NAMESPACE;
use crate::core::error::{AppError, Result};
use crate::services::client::ProviderClient;
use crate::services::route_table::RouteTable;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

/// Hash an API key using SHA-256.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Accepted bearer tokens, stored as SHA-256 digests.
#[derive(Debug, Clone, Default)]
pub struct AuthTokenSet {
    hashes: HashSet<String>,
}

impl AuthTokenSet {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hashes = tokens
            .into_iter()
            .filter(|t| !t.as_ref().is_empty())
            .map(|t| hash_key(t.as_ref()))
            .collect();
        Self { hashes }
    }

    /// Exact, case-sensitive membership.
    pub fn contains(&self, token: &str) -> bool {
        self.hashes.contains(&hash_key(token))
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// A client-supplied model identifier split into namespace and model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelId<'a> {
    pub namespace: &'a str,
    pub model: &'a str,
}

impl<'a> ModelId<'a> {
    /// Split on the first `/`; an id without one belongs to the default namespace.
    /// Everything after the first `/` is the model name, slashes included.
    pub fn parse(id: &'a str) -> Self {
        match id.split_once('/') {
            Some((namespace, model)) => Self { namespace, model },
            None => Self {
                namespace: DEFAULT_NAMESPACE,
                model: id,
            },
        }
    }
}

/// A successfully resolved call target.
#[derive(Clone)]
pub struct ResolvedRoute {
    pub namespace: String,
    pub model: String,
    pub client: Arc<dyn ProviderClient>,
}

/// Immutable request context shared by every handler.
pub struct Resolver {
    tokens: AuthTokenSet,
    routes: RouteTable,
}

impl Resolver {
    pub fn new(tokens: AuthTokenSet, routes: RouteTable) -> Self {
        Self { tokens, routes }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Reject calls whose bearer token is missing or unknown.
    pub fn authorize(&self, token: Option<&str>) -> Result<()> {
        match token {
            Some(token) if self.tokens.contains(token) => Ok(()),
            _ => Err(AppError::Unauthorized),
        }
    }

    /// Find the client for a model identifier. No auth check.
    pub fn route(&self, model_id: &str) -> Result<ResolvedRoute> {
        let id = ModelId::parse(model_id);
        let client = self.routes.resolve(id.namespace, id.model)?;
        Ok(ResolvedRoute {
            namespace: id.namespace.to_string(),
            model: id.model.to_string(),
            client,
        })
    }

    /// Authorize, then route. Auth failures win over lookup failures.
    pub fn resolve(&self, token: Option<&str>, model_id: &str) -> Result<ResolvedRoute> {
        self.authorize(token)?;
        self.route(model_id)
    }
}
