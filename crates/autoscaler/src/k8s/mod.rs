//! Kubernetes integration module.
//!
//! The main components are:
//! - [`ResourceCache`]: watch-backed, synchronization-gated local copy of pods or nodes
//! - [`Lister`]: the read side of a cache used by the scan loop
//! - [`resources`]: helpers reading requests, capacity and state off cached objects

pub mod kube_client;
pub mod lister;
pub mod quantity;
pub mod resource_cache;
pub mod resources;
pub mod types;

pub use lister::ListFilter;
pub use lister::ListScope;
pub use lister::Lister;
pub use resource_cache::ResourceCache;
pub use types::KubernetesError;
