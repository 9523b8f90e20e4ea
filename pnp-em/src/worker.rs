//! Pipeline worker pool
//!
//! Each worker pulls raw bus payloads from the shared inbound channel and
//! runs the full pipeline: decode, normalize, reconcile, notify. Workers
//! share no mutable state beyond the database pool and the catalog cache.
//! On shutdown, workers stop pulling new messages but finish the one in
//! flight.

use crate::catalog::CatalogSource;
use crate::db::StorageGateway;
use crate::decoder::MessageDecoder;
use crate::normalize::{classify, normalize, str_field, Event};
use crate::notify::{intent_for_incident, intent_for_maintenance};
use crate::reconcile::{reconcile_incident, reconcile_maintenance, Action};
use crate::retry::{run_with_retry, Disposition};
use crate::PipelineError;
use pnp_common::events::NotificationSender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Everything a worker needs, shared across the pool
pub struct PipelineServices {
    pub decoder: MessageDecoder,
    pub catalog: Arc<dyn CatalogSource>,
    pub gateway: StorageGateway,
    pub notifications: NotificationSender,
    pub allowed_cnames: Vec<String>,
    pub retry_backoff: Duration,
}

/// Inbound raw payloads from the bus consumer
pub type InboundReceiver = Arc<Mutex<mpsc::Receiver<Vec<u8>>>>;

/// Spawn the worker pool. Workers exit when the inbound channel closes or
/// the cancellation token fires.
pub fn spawn_workers(
    count: usize,
    services: Arc<PipelineServices>,
    inbound: InboundReceiver,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            let services = Arc::clone(&services);
            let inbound = Arc::clone(&inbound);
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                info!(worker_id, "Pipeline worker started");

                loop {
                    let message = {
                        let mut rx = inbound.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => None,
                            message = rx.recv() => message,
                        }
                    };

                    let Some(payload) = message else { break };
                    process_message(&services, &payload, &shutdown).await;
                }

                info!(worker_id, "Pipeline worker stopped");
            })
        })
        .collect()
}

/// Run one payload through the full pipeline and report its disposition
pub async fn process_message(
    services: &PipelineServices,
    payload: &[u8],
    shutdown: &CancellationToken,
) -> Disposition {
    let start = Instant::now();

    // Decoding is deterministic; its failures are permanent and never worth
    // a retry.
    let map = match services.decoder.decode(payload) {
        Ok(map) => map,
        Err(e) => {
            error!(tag = e.tag().as_str(), %e, "Failed to decode message");
            return Disposition::Discarded(e.tag());
        }
    };

    let span = info_span!(
        "message",
        kind = classify(&map).as_str(),
        source = str_field(&map, "source").as_deref().unwrap_or(""),
        source_id = str_field(&map, "number").as_deref().unwrap_or(""),
    );

    async {
        // Normalization runs inside the retry loop: a catalog outage is a
        // transient failure, and reconciling against a partial CRN view
        // would turn it into a wrong write.
        let disposition =
            run_with_retry("reconcile", services.retry_backoff, shutdown, || async {
                let event =
                    normalize(&map, services.catalog.as_ref(), &services.allowed_cnames).await?;
                reconcile_and_notify(services, &event).await
            })
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match disposition {
            Disposition::Completed(action) => {
                info!(action = action.as_str(), duration_ms, "Message processed");
            }
            Disposition::Discarded(tag) => {
                error!(tag = tag.as_str(), duration_ms, "Message discarded");
            }
            Disposition::Shutdown => {
                info!(duration_ms, "Shutdown requested, message returned to the bus");
            }
        }
        disposition
    }
    .instrument(span)
    .await
}

/// One reconciliation attempt, including the notification side effect.
/// The intent is sent only after the write succeeded, so a retried attempt
/// cannot double-notify.
async fn reconcile_and_notify(
    services: &PipelineServices,
    event: &Event,
) -> Result<Action, PipelineError> {
    match event {
        Event::Incident(incident) => {
            let outcome = reconcile_incident(&services.gateway, incident).await?;
            if let Some(intent) = intent_for_incident(&outcome) {
                if services.notifications.send(intent).await.is_err() {
                    warn!("Notification channel closed, dropping intent");
                }
            }
            Ok(outcome.action)
        }
        Event::Maintenance(maintenance) => {
            let outcome = reconcile_maintenance(&services.gateway, maintenance).await?;
            if let Some(intent) = intent_for_maintenance(&outcome, maintenance.bulk) {
                if services.notifications.send(intent).await.is_err() {
                    warn!("Notification channel closed, dropping intent");
                }
            }
            Ok(outcome.action)
        }
    }
}
