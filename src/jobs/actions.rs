//! Action store (C11): deduplicated insertion of recommended actions.
//! Grounded on `route_quality/mitigation.rs`'s `MitigationController::check_cooldown`
//! and its action/event enums, generalized from a fixed mitigation set to an
//! open `action_type` string with a per-type cooldown table.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::entities::{ActionStatus, AuditEntry, RecommendedAction};
use crate::store::Store;

/// Default cooldown, in hours, per action type. An unrecognized action type
/// falls back to the `run_investigation` cooldown.
fn cooldown_hours(action_type: &str) -> i64 {
    match action_type {
        "increase_eval_sampling" => 6,
        "require_human_review" => 12,
        "route_fallback" => 12,
        "run_investigation" => 6,
        _ => 6,
    }
}

/// Inserts a RecommendedAction unless an open action with the same type and
/// canonical target already exists within its cooldown window. Returns
/// `true` if a new action was created.
pub async fn propose_action(
    store: &dyn Store,
    tenant: &str,
    action_type: &str,
    target: Value,
    payload: Value,
    decided_by: &str,
) -> anyhow::Result<bool> {
    let target_key = crate::store::memory::canonical_json(&target);
    let lookback = cooldown_hours(action_type);

    if store.has_recent_open_action(tenant, action_type, &target_key, lookback).await? {
        return Ok(false);
    }

    let action_id = Uuid::new_v4();
    store
        .insert_recommended_action(RecommendedAction {
            tenant: tenant.to_string(),
            action_id,
            action_type: action_type.to_string(),
            target,
            payload,
            decided_by: decided_by.to_string(),
            status: ActionStatus::Open,
            created_at: Utc::now(),
        })
        .await?;

    store
        .audit(AuditEntry {
            tenant: Some(tenant.to_string()),
            actor: decided_by.to_string(),
            action: format!("action.created:{action_type}"),
            details: serde_json::json!({ "action_id": action_id }),
            created_at: Utc::now(),
        })
        .await
        .unwrap_or_else(|e| tracing::warn!(error = %e, "audit log write failed"));

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn second_proposal_within_cooldown_is_deduped() {
        let store = MemoryStore::new();
        let target = json!({"workflow_id": "wf-1"});

        let first = propose_action(&store, "acme", "run_investigation", target.clone(), json!({}), "job")
            .await
            .unwrap();
        let second = propose_action(&store, "acme", "run_investigation", target, json!({}), "job")
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.action_count(), 1);
    }

    #[tokio::test]
    async fn different_targets_both_create_actions() {
        let store = MemoryStore::new();
        propose_action(&store, "acme", "run_investigation", json!({"workflow_id": "wf-1"}), json!({}), "job")
            .await
            .unwrap();
        propose_action(&store, "acme", "run_investigation", json!({"workflow_id": "wf-2"}), json!({}), "job")
            .await
            .unwrap();
        assert_eq!(store.action_count(), 2);
    }
}
