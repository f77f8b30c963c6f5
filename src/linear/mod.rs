//! Linear issue tracker integration.
//!
//! The GraphQL client lives here. The engine only ever consumes it
//! through the `RemoteEntityService` trait, so everything above this
//! module stays tracker-agnostic and testable against a scripted remote.

pub mod client;

pub use client::LinearClient;
