//! Long-lived services: the broadcast hub and the game session registry.

pub mod hub;
pub mod registry;

pub use hub::{BroadcastHub, GameFeed, WireFrame};
pub use registry::SessionRegistry;
