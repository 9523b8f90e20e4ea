//! End-to-end pipeline tests: encrypted payload in, stored rows and
//! notification intents out.

use std::sync::Arc;
use std::time::Duration;

use pnp_common::db::create_schema;
use pnp_common::events::{notification_channel, ChangeDescriptor, NotificationReceiver};
use pnp_common::ids::record_id;
use pnp_common::model::{IncidentState, MaintenanceState};
use pnp_em::catalog::{HttpCatalog, StaticCatalog};
use pnp_em::db::StorageGateway;
use pnp_em::decoder::MessageDecoder;
use pnp_em::error::ErrorTag;
use pnp_em::reconcile::Action;
use pnp_em::retry::Disposition;
use pnp_em::worker::{process_message, PipelineServices};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;

const KEY: [u8; 32] = [42u8; 32];

struct Harness {
    services: Arc<PipelineServices>,
    notifications: NotificationReceiver,
    shutdown: CancellationToken,
}

impl Harness {
    async fn new() -> Harness {
        // A single connection keeps every query on the same in-memory
        // database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        create_schema(&pool).await.unwrap();

        let (tx, notifications) = notification_channel(32);
        let services = Arc::new(PipelineServices {
            decoder: MessageDecoder::new(&KEY),
            catalog: Arc::new(StaticCatalog::new(
                &["cloudant", "keyprotect"],
                &[("cloudant-shard-7", "cloudant")],
            )),
            gateway: StorageGateway::new(pool, Duration::from_secs(30), false),
            notifications: tx,
            allowed_cnames: Vec::new(),
            retry_backoff: Duration::from_millis(1),
        });

        Harness {
            services,
            notifications,
            shutdown: CancellationToken::new(),
        }
    }

    async fn deliver(&self, body: &Value) -> Disposition {
        let payload = self.services.decoder.encode(body.to_string().as_bytes());
        process_message(&self.services, &payload, &self.shutdown).await
    }

    fn try_next_intent(&mut self) -> Option<pnp_common::events::NotificationIntent> {
        self.notifications.try_recv().ok()
    }
}

fn incident(update_time: &str) -> Value {
    json!({
        "source": "servicenow",
        "number": "INC0012345",
        "sys_created_on": "2024-01-01 00:00:00",
        "sys_updated_on": update_time,
        "short_description": "Elevated error rates",
        "u_current_status": "Investigating",
        "u_description_customer_impact": "Requests may fail",
        "incident_state": "1",
        "u_status": "Confirmed CIE",
        "priority": "1",
        "crn": ["crn:v1:pubcloud:public:cloudant:us-south::::"]
    })
}

fn maintenance(update_time: &str) -> Value {
    json!({
        "source": "servicenow",
        "number": "CHG0001234",
        "sys_created_on": "2024-02-01 00:00:00",
        "sys_updated_on": update_time,
        "short_description": "Database upgrade",
        "state": "Scheduled",
        "disruptive": true,
        "maintenance_duration": 120,
        "crn": ["crn:v1:pubcloud:public:cloudant:us-south::::"]
    })
}

#[tokio::test]
async fn fresh_publishable_incident_inserts_and_notifies() {
    let mut h = Harness::new().await;

    let disposition = h.deliver(&incident("2024-01-02 08:30:00")).await;
    assert_eq!(disposition, Disposition::Completed(Action::Inserted));

    let stored = h
        .services
        .gateway
        .read_incident(&record_id("servicenow", "INC0012345"))
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(stored.state, IncidentState::New);
    assert!(!stored.pnp_removed);
    assert!(stored.is_publishable());

    let intent = h.try_next_intent().expect("insert should notify");
    assert_eq!(intent.change, ChangeDescriptor::Inserted);
    assert_eq!(intent.crns.len(), 1);
}

#[tokio::test]
async fn stale_update_is_skipped() {
    let mut h = Harness::new().await;
    h.deliver(&incident("2024-01-02 08:30:00")).await;
    h.try_next_intent();

    let mut stale = incident("2024-01-02 08:00:00");
    stale["short_description"] = json!("should not land");
    let disposition = h.deliver(&stale).await;
    assert_eq!(disposition, Disposition::Completed(Action::Skipped));

    let stored = h
        .services
        .gateway
        .read_incident(&record_id("servicenow", "INC0012345"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.short_description, "Elevated error rates");
    assert!(h.try_next_intent().is_none());
}

#[tokio::test]
async fn severity_downgrade_tombstones_without_notifying() {
    let mut h = Harness::new().await;
    h.deliver(&incident("2024-01-02 08:30:00")).await;
    h.try_next_intent();

    let mut downgraded = incident("2024-01-03 00:00:00");
    downgraded["priority"] = json!("3");
    let disposition = h.deliver(&downgraded).await;
    assert_eq!(disposition, Disposition::Completed(Action::Tombstoned));

    let stored = h
        .services
        .gateway
        .read_incident(&record_id("servicenow", "INC0012345"))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.pnp_removed);
    assert!(h.try_next_intent().is_none());
}

#[tokio::test]
async fn requalifying_update_restores_and_notifies() {
    let mut h = Harness::new().await;
    h.deliver(&incident("2024-01-02 08:30:00")).await;
    let mut downgraded = incident("2024-01-03 00:00:00");
    downgraded["priority"] = json!("3");
    h.deliver(&downgraded).await;
    while h.try_next_intent().is_some() {}

    let disposition = h.deliver(&incident("2024-01-04 00:00:00")).await;
    assert_eq!(disposition, Disposition::Completed(Action::Restored));

    let stored = h
        .services
        .gateway
        .read_incident(&record_id("servicenow", "INC0012345"))
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.pnp_removed);

    let intent = h.try_next_intent().expect("restore should notify");
    assert_eq!(intent.change, ChangeDescriptor::Restored);
}

#[tokio::test]
async fn bulk_refresh_with_unchanged_content_is_a_silent_skip() {
    let mut h = Harness::new().await;
    h.deliver(&maintenance("2024-02-02 00:00:00")).await;
    h.try_next_intent();

    let mut replay = maintenance("2024-02-03 00:00:00");
    replay["Process"] = json!("BULK");
    let disposition = h.deliver(&replay).await;
    assert_eq!(disposition, Disposition::Completed(Action::Skipped));

    let stored = h
        .services
        .gateway
        .read_maintenance(&record_id("servicenow", "CHG0001234"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, MaintenanceState::Scheduled);
    assert!(h.try_next_intent().is_none());
}

#[tokio::test]
async fn bulk_refresh_with_changed_content_writes_but_does_not_notify() {
    let mut h = Harness::new().await;
    h.deliver(&maintenance("2024-02-02 00:00:00")).await;
    h.try_next_intent();

    let mut replay = maintenance("2024-02-03 00:00:00");
    replay["Process"] = json!("BULK");
    replay["short_description"] = json!("Database upgrade (rescheduled)");
    let disposition = h.deliver(&replay).await;
    assert_eq!(disposition, Disposition::Completed(Action::Updated));

    let stored = h
        .services
        .gateway
        .read_maintenance(&record_id("servicenow", "CHG0001234"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.short_description, "Database upgrade (rescheduled)");
    assert!(h.try_next_intent().is_none());
}

#[tokio::test]
async fn malformed_timestamp_is_discarded_without_retry() {
    let mut h = Harness::new().await;
    let mut bad = incident("not a timestamp");
    bad["sys_updated_on"] = json!("2024-13-45 99:99:99");
    let disposition = h.deliver(&bad).await;
    assert_eq!(disposition, Disposition::Discarded(ErrorTag::ParseError));
    assert!(h.try_next_intent().is_none());
}

#[tokio::test]
async fn undecryptable_payload_is_discarded() {
    let h = Harness::new().await;
    let disposition = process_message(&h.services, b"not a ciphertext", &h.shutdown).await;
    assert_eq!(
        disposition,
        Disposition::Discarded(ErrorTag::DecryptionError)
    );
}

#[tokio::test]
async fn validation_rejection_is_permanent() {
    let h = Harness::new().await;
    // Unknown classification with no prior row fails publishability and is
    // skipped, never inserted; unknown state on a maintenance with a prior
    // is the validation path.
    h.deliver(&maintenance("2024-03-01 00:00:00")).await;
    let mut bad = maintenance("2024-03-02 00:00:00");
    bad["state"] = json!("mystery");
    let disposition = h.deliver(&bad).await;
    assert_eq!(
        disposition,
        Disposition::Discarded(ErrorTag::ValidationError)
    );
}

#[tokio::test]
async fn events_converge_regardless_of_arrival_order() {
    let first = incident("2024-01-02 00:00:00");
    let mut second = incident("2024-01-03 00:00:00");
    second["u_current_status"] = json!("Mitigated");

    let h_forward = Harness::new().await;
    h_forward.deliver(&first).await;
    h_forward.deliver(&second).await;

    let h_reverse = Harness::new().await;
    h_reverse.deliver(&second).await;
    h_reverse.deliver(&first).await;

    let id = record_id("servicenow", "INC0012345");
    let forward = h_forward
        .services
        .gateway
        .read_incident(&id)
        .await
        .unwrap()
        .unwrap();
    let reverse = h_reverse
        .services
        .gateway
        .read_incident(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forward, reverse);
}

#[tokio::test]
async fn catalog_outage_defers_the_message_instead_of_tombstoning() {
    let mut h = Harness::new().await;
    h.deliver(&incident("2024-01-02 08:30:00")).await;
    h.try_next_intent();

    // Same store, but the catalog upstream is unreachable and has never
    // produced a snapshot. Every CRN would look ineligible if the outage
    // were swallowed.
    let outage = Arc::new(PipelineServices {
        decoder: MessageDecoder::new(&KEY),
        catalog: Arc::new(HttpCatalog::new(
            "http://127.0.0.1:1",
            Duration::from_secs(3600),
        )),
        gateway: h.services.gateway.clone(),
        notifications: h.services.notifications.clone(),
        allowed_cnames: Vec::new(),
        retry_backoff: Duration::from_millis(1),
    });

    let payload = outage
        .decoder
        .encode(incident("2024-01-03 00:00:00").to_string().as_bytes());
    let interrupted = CancellationToken::new();
    interrupted.cancel();
    let disposition = process_message(&outage, &payload, &interrupted).await;

    // Transient: the attempt is retried, not acked, so shutdown returns
    // the message to the bus.
    assert_eq!(disposition, Disposition::Shutdown);

    let stored = h
        .services
        .gateway
        .read_incident(&record_id("servicenow", "INC0012345"))
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.pnp_removed);
    assert_eq!(stored.short_description, "Elevated error rates");
    assert!(h.try_next_intent().is_none());
}

#[tokio::test]
async fn subcomponent_crns_coalesce_to_the_status_page_parent() {
    let h = Harness::new().await;
    let mut event = incident("2024-01-02 00:00:00");
    event["crn"] = json!([
        "crn:v1:pubcloud:public:cloudant-shard-7:us-south::::",
        "crn:v1:pubcloud:public:cloudant:us-south::::"
    ]);
    h.deliver(&event).await;

    let stored = h
        .services
        .gateway
        .read_incident(&record_id("servicenow", "INC0012345"))
        .await
        .unwrap()
        .unwrap();
    // Both entries rewrite to the same parent and dedup to one
    assert_eq!(stored.crns.len(), 1);
    assert_eq!(stored.crns[0].service, "cloudant");
}
