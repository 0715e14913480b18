//! # Sync Console
//!
//! Loads a bootstrap payload, requires every merged listing in the catalog
//! once, then keeps the polled ones fresh until Ctrl-C.
//!
//! ```bash
//! RUST_LOG=info cargo run --bin sync-console -- bootstrap.json
//! CONSOLE_BOOTSTRAP=bootstrap.json CONSOLE_POLL_INTERVAL_SECS=10 cargo run --bin sync-console
//! ```

use std::sync::Arc;
use sync_console::catalog::ResourceKind;
use sync_console::config::{Bootstrap, BOOTSTRAP_ENV};
use sync_console::context::ConsoleContext;
use sync_console::dependency::DependencyRequest;
use sync_console::polling::OwnerId;
use sync_console::registry::RequireOutcome;
use sync_framework::tracing::setup_tracing;
use sync_framework::HttpTransport;
use tracing::{error, info, warn, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(BOOTSTRAP_ENV).ok())
        .ok_or_else(|| format!("usage: sync-console <bootstrap.json> (or set {BOOTSTRAP_ENV})"))?;
    let mut bootstrap = Bootstrap::load(&path).map_err(|e| e.to_string())?;
    bootstrap.config.apply_env().map_err(|e| e.to_string())?;

    info!(bootstrap = %path, "Starting console sync");
    let context = ConsoleContext::from_bootstrap(bootstrap, Arc::new(HttpTransport::new()))
        .map_err(|e| e.to_string())?;

    // Only service types some provider offers.
    let service_types = context.providers().service_types();
    let requests: Vec<(DependencyRequest, String)> = context
        .catalog()
        .classes()
        .iter()
        .filter(|class| class.kind() == ResourceKind::Collection)
        .filter(|class| service_types.iter().any(|offered| offered == class.service_type()))
        .map(|class| {
            (
                DependencyRequest::aggregate_class(class.service_type(), class.name()),
                class.name().to_string(),
            )
        })
        .collect();

    let span = tracing::info_span!("initial_load", classes = requests.len());
    async {
        let batch: Vec<DependencyRequest> = requests.iter().map(|(request, _)| request.clone()).collect();
        match context.registry().require(&batch).await {
            Ok(RequireOutcome::Loaded) => info!("Every listing loaded"),
            Ok(RequireOutcome::TimedOut) => warn!("Every listing timed out"),
            Ok(RequireOutcome::Errored(failures)) => {
                for failure in failures {
                    warn!(%failure, "Listing failed");
                }
            }
            Err(e) => error!(error = %e, "Could not resolve listings"),
        }
    }
    .instrument(span)
    .await;

    for aggregate in context.registry().aggregates() {
        for class in context.catalog().for_service_type(aggregate.service_type()) {
            if let Ok(syncer) = aggregate.syncer(class.name()) {
                info!(
                    service_type = aggregate.service_type(),
                    class = class.name(),
                    models = syncer.aggregate().len(),
                    "Loaded"
                );
            }
        }
    }

    let owner = OwnerId::next();
    for (request, class) in &requests {
        match context.orchestrator().register(request, owner) {
            Ok(true) => info!(%class, "Polling"),
            Ok(false) => {}
            Err(e) => error!(%class, error = %e, "Could not poll"),
        }
    }

    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
    info!("Shutting down");
    context.shutdown().await;

    info!("Console sync stopped");
    Ok(())
}
