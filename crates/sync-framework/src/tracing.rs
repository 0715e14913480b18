//! # Observability & Tracing
//!
//! [`setup_tracing`] installs the process-wide subscriber. Call it once from
//! a binary; libraries and tests never install one.
//!
//! ## Configuration
//!
//! Levels come from `RUST_LOG`. The compact format hides module paths
//! (`with_target(false)`): every event already carries the `model`,
//! `collection` or `store` field that identifies where it came from.
//!
//! ```bash
//! # Request outcomes, service updates, poller lifecycle
//! RUST_LOG=info cargo run --bin sync-console
//!
//! # Every request, reconciliation counts, model syncs
//! RUST_LOG=debug cargo run --bin sync-console
//!
//! # Just the framework
//! RUST_LOG=sync_framework=debug cargo run --bin sync-console
//! ```
//!
//! ## What Gets Traced
//!
//! - **Stores**: each request (`store` span), retries, failures with status
//! - **Models**: fetch/save/destroy entry, id changes on sync
//! - **Collections**: records applied, removed count, whether anything changed
//!
//! With `RUST_LOG=debug` a collection refresh reads like:
//!
//! ```text
//! DEBUG fetch: Fetching collection collection="server" store=".../proxy/compute/ORD/servers"
//! INFO fetch: Fetched store=".../proxy/compute/ORD/servers"
//! DEBUG Applied records collection="server" records=12 removed=1 reconcile=true changed=true
//! ```

/// Initializes the `tracing` subscriber with `RUST_LOG` filtering and the
/// compact format.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
