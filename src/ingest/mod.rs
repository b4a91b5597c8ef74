//! Ingest front-end: batch validation, idempotent intake, dead-lettering.
//! Grounded on `api/routes.rs`'s handler idiom (`State`/`Json`/typed response
//! wrappers) and `auth/middleware.rs`'s error-to-response mapping.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::entities::{DeadLetterEvent, IngestRequestStatus, RawEvent};
use crate::domain::error::PipelineError;
use crate::domain::events::{validate_batch, EventV1};
use crate::store::{IdempotencyOutcome, Store};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub schema_version: String,
    pub tenant_id: String,
    pub received_events: usize,
    pub inserted_events: usize,
    pub duplicate_events: usize,
    pub request_idempotency_key: Option<String>,
}

fn request_sha256(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

fn tenant_of(event: &EventV1) -> &str {
    &event.envelope().tenant_id
}

/// Handles one ingest request end to end: validates, enforces idempotency,
/// inserts raw events, and finalizes the idempotency ledger. `raw_body` is
/// the exact bytes received, used both for the JSON parse and the digest —
/// order matters, since the digest must cover what the client actually sent.
pub async fn handle_ingest(
    store: &dyn Store,
    raw_body: &[u8],
    idempotency_key: Option<&str>,
) -> Result<IngestResponse, PipelineError> {
    let sha = request_sha256(raw_body);

    let parsed: Value = serde_json::from_slice(raw_body).map_err(|_| PipelineError::MalformedBody)?;

    let events = match validate_batch(&parsed) {
        Ok(events) => events,
        Err(errors) => {
            dead_letter(store, None, "schema_invalid", &errors, &parsed).await;
            return Err(PipelineError::SchemaInvalid {
                errors: serde_json::to_value(&errors).unwrap_or(Value::Null),
            });
        }
    };

    if events.is_empty() {
        dead_letter(store, None, "empty_batch", &Vec::<()>::new(), &parsed).await;
        return Err(PipelineError::EmptyBatch);
    }

    let tenant = tenant_of(&events[0]).to_string();
    if events.iter().any(|e| tenant_of(e) != tenant) {
        dead_letter(store, None, "mixed_tenant", &Vec::<()>::new(), &parsed).await;
        return Err(PipelineError::MixedTenant);
    }

    if let Some(key) = idempotency_key {
        match store
            .check_idempotency(&tenant, key, &sha)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?
        {
            IdempotencyOutcome::ReplayCompleted { response_body, .. } => {
                return serde_json::from_value(response_body)
                    .map_err(|e| PipelineError::Internal(e.to_string()));
            }
            IdempotencyOutcome::InProgress => return Err(PipelineError::IdempotencyInProgress),
            IdempotencyOutcome::Conflict => return Err(PipelineError::IdempotencyConflict),
            IdempotencyOutcome::Fresh => {
                store
                    .begin_idempotent_request(&tenant, key, &sha)
                    .await
                    .map_err(|e| PipelineError::Transient(e.to_string()))?;
            }
        }
    }

    let now = Utc::now();
    let raw_events: Vec<RawEvent> = events
        .iter()
        .map(|e| {
            let env = e.envelope();
            RawEvent {
                tenant: tenant.clone(),
                event_id: env.event_id,
                schema_version: env.schema_version.clone(),
                event_type: env.event_type.clone(),
                event_time: env.event_time,
                ingest_time: now,
                payload: serde_json::to_value(e).expect("EventV1 always serializes"),
                idempotency_key: idempotency_key.map(str::to_string),
                attempt_count: 0,
                processed_at: None,
                processing_error: None,
            }
        })
        .collect();

    let insert_result = store.insert_raw_events(raw_events).await;

    let outcome = match insert_result {
        Ok(outcome) => outcome,
        Err(e) => {
            dead_letter(store, Some(&tenant), "database_failure", &Vec::<()>::new(), &parsed).await;
            if let Some(key) = idempotency_key {
                let _ = store
                    .finalize_idempotent_request(
                        &tenant,
                        key,
                        IngestRequestStatus::Failed,
                        500,
                        Value::Null,
                    )
                    .await;
            }
            return Err(PipelineError::Transient(e.to_string()));
        }
    };

    let response = IngestResponse {
        ok: true,
        schema_version: "v1".to_string(),
        tenant_id: tenant.clone(),
        received_events: outcome.received,
        inserted_events: outcome.inserted,
        duplicate_events: outcome.received - outcome.inserted,
        request_idempotency_key: idempotency_key.map(str::to_string),
    };

    if let Some(key) = idempotency_key {
        let body = serde_json::to_value(&response).unwrap_or(Value::Null);
        store
            .finalize_idempotent_request(&tenant, key, IngestRequestStatus::Completed, 200, body)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;
    }

    store
        .audit(crate::domain::entities::AuditEntry {
            tenant: Some(tenant.clone()),
            actor: "ingest".to_string(),
            action: "events.ingested".to_string(),
            details: serde_json::json!({
                "received": response.received_events,
                "inserted": response.inserted_events,
            }),
            created_at: now,
        })
        .await
        .unwrap_or_else(|e| tracing::warn!(error = %e, "audit log write failed"));

    Ok(response)
}

async fn dead_letter(
    store: &dyn Store,
    tenant: Option<&str>,
    reason: &str,
    errors: &impl Serialize,
    raw_body: &Value,
) {
    let entry = DeadLetterEvent {
        tenant: tenant.map(str::to_string),
        reason: reason.to_string(),
        errors: serde_json::to_value(errors).unwrap_or(Value::Null),
        raw_body: raw_body.clone(),
        created_at: Utc::now(),
    };
    if let Err(e) = store.insert_dead_letter(entry).await {
        tracing::error!(error = %e, reason, "failed to record dead letter");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use uuid::Uuid;

    fn valid_event(tenant: &str) -> Value {
        json!({
            "schema_version": "v1",
            "type": "AgentRunStarted",
            "event_id": Uuid::new_v4(),
            "tenant_id": tenant,
            "orchestration_run_id": "run-1",
            "workflow_id": "wf-1",
            "request_timestamp": Utc::now().to_rfc3339(),
            "event_time": Utc::now().to_rfc3339(),
            "agent": {
                "agent_run_id": Uuid::new_v4(),
                "agent_id": "agent-a",
                "agent_version": "1.0.0"
            }
        })
    }

    #[tokio::test]
    async fn accepts_valid_batch_and_inserts_events() {
        let store = MemoryStore::new();
        let body = serde_json::to_vec(&json!([valid_event("acme")])).unwrap();
        let resp = handle_ingest(&store, &body, None).await.unwrap();
        assert_eq!(resp.received_events, 1);
        assert_eq!(resp.inserted_events, 1);
        assert_eq!(resp.tenant_id, "acme");
    }

    #[tokio::test]
    async fn rejects_empty_batch() {
        let store = MemoryStore::new();
        let body = serde_json::to_vec(&json!([])).unwrap();
        let err = handle_ingest(&store, &body, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch));
    }

    #[tokio::test]
    async fn rejects_mixed_tenant_batch() {
        let store = MemoryStore::new();
        let body = serde_json::to_vec(&json!([valid_event("acme"), valid_event("globex")])).unwrap();
        let err = handle_ingest(&store, &body, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::MixedTenant));
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let store = MemoryStore::new();
        let err = handle_ingest(&store, b"not json", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedBody));
    }

    #[tokio::test]
    async fn idempotent_replay_returns_identical_response() {
        let store = MemoryStore::new();
        let body = serde_json::to_vec(&json!([valid_event("acme")])).unwrap();

        let first = handle_ingest(&store, &body, Some("key-1")).await.unwrap();
        let second = handle_ingest(&store, &body, Some("key-1")).await.unwrap();

        assert_eq!(first.received_events, second.received_events);
        assert_eq!(first.inserted_events, second.inserted_events);
        // Only inserted once despite two calls.
        assert_eq!(first.inserted_events, 1);
    }

    #[tokio::test]
    async fn conflicting_body_with_same_key_is_rejected() {
        let store = MemoryStore::new();
        let body_a = serde_json::to_vec(&json!([valid_event("acme")])).unwrap();
        let body_b = serde_json::to_vec(&json!([valid_event("acme"), valid_event("acme")])).unwrap();

        handle_ingest(&store, &body_a, Some("key-1")).await.unwrap();
        let err = handle_ingest(&store, &body_b, Some("key-1")).await.unwrap_err();
        assert!(matches!(err, PipelineError::IdempotencyConflict));
    }

    #[tokio::test]
    async fn schema_invalid_dead_letters_and_returns_400_equivalent() {
        let store = MemoryStore::new();
        let body = serde_json::to_vec(&json!([{"type": "NotReal"}])).unwrap();
        let err = handle_ingest(&store, &body, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::SchemaInvalid { .. }));
    }
}
