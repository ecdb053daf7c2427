//! Routing and relay services.
//!
//! Provider clients (direct and weighted pool), the route table built from configuration,
//! the request resolver, and the relay engine that executes a resolved call.

pub mod client;
pub mod direct;
pub mod pool;
pub mod relay;
pub mod resolver;
pub mod route_table;
pub mod sse;

// Re-export commonly used types
pub use client::{ChunkStream, Endpoint, ProviderClient};
pub use direct::DirectClient;
pub use pool::{PoolMember, WeightedPoolClient};
pub use relay::{relay_once, relay_stream, RelayRequest, TextAccumulator};
pub use resolver::{AuthTokenSet, ModelId, ResolvedRoute, Resolver};
pub use route_table::{AdvertisedModel, RouteTable};
