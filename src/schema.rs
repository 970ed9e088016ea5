//! JSON-schema pre-validation for inbound `/submit/` bodies. The schema is
//! a single self-contained document, so it is compiled once from an
//! embedded string with no `$ref` resolver needed.

use std::sync::OnceLock;

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::ProxyError;

static TASK_SCHEMA_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/task.schema.json"));

fn task_schema() -> &'static JSONSchema {
    static SCHEMA: OnceLock<JSONSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let schema: Value = serde_json::from_str(TASK_SCHEMA_JSON).expect("embedded task schema is valid JSON");
        JSONSchema::options().compile(&schema).expect("embedded task schema is a valid JSON Schema")
    })
}

/// Validate a raw `{"task": {...}}` body against the Task schema before it
/// is deserialized into a typed [`crate::catalog::Task`], producing a
/// human-readable "task missing required keys" `ValidationError` instead
/// of serde's generic field-missing message.
pub fn validate_submit_body(body: &Value) -> Result<(), ProxyError> {
    task_schema().validate(body).map_err(|errors| {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        ProxyError::Validation(format!("task failed schema validation: {}", messages.join("; ")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_task() {
        let body = json!({
            "task": {
                "uuid": "u1",
                "username": "alice",
                "name": "echo_hello_world",
                "cwd": "/h/a",
                "params": [],
                "dirs": { "parent": "/h/a/p", "input": "/h/a/i", "output": "/h/a/o", "error": "/h/a/e" },
                "slurm": {
                    "partition": "q", "cpus_per_task": 1, "mem": 100, "time": 60,
                    "nodes": 1, "ntasks_per_node": 1, "output": "o.txt", "error": "e.txt", "job_name": "j"
                }
            }
        });
        assert!(validate_submit_body(&body).is_ok());
    }

    #[test]
    fn rejects_missing_required_keys() {
        let body = json!({ "task": { "uuid": "u1" } });
        let err = validate_submit_body(&body).unwrap_err();
        assert!(matches!(err, ProxyError::Validation(_)));
    }

    #[test]
    fn rejects_missing_task_wrapper() {
        let body = json!({ "uuid": "u1" });
        assert!(validate_submit_body(&body).is_err());
    }
}
