//! Purpose: Client library for subscribing to PQStream change-data-capture streams.
//! Exports: `api` (client, subscriptions, transport seam), `core` (codec, states, errors).
//! Role: Backs the `pqs` binary and any Rust caller that consumes change events.
//! Invariants: One subscription yields events in arrival order and exactly one terminal outcome.
//! Invariants: The library logs through `tracing` and never installs a subscriber.
pub mod api;
pub mod core;
