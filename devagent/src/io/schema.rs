//! JSON Schema checks for structured output from external capabilities.

use anyhow::{Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

pub const META_PLAN_SCHEMA: &str = include_str!("../../schemas/meta_plan.schema.json");
pub const PROGRAM_SCHEMA: &str = include_str!("../../schemas/program.schema.json");

/// Validate `instance` against the schema source `schema`, reporting every
/// violation in one error.
pub fn validate_json(name: &str, schema: &str, instance: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(schema).map_err(|err| anyhow!("parse {name} schema: {err}"))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid {name} schema: {err}"))?;
    if !compiled.is_valid(instance) {
        let messages = compiled
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "{name} schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meta_plan_schema_accepts_minimal_plan() {
        let plan = json!({
            "focus_spec": {"task_type": "fix_failures"},
            "selector_profile": {"weights": {"error_pattern": 1.0}}
        });
        validate_json("meta_plan", META_PLAN_SCHEMA, &plan).expect("valid");
    }

    #[test]
    fn meta_plan_schema_rejects_unknown_kind_and_task() {
        let plan = json!({
            "focus_spec": {"task_type": "refactor"},
            "selector_profile": {"weights": {"gossip": 1.0}}
        });
        let err = validate_json("meta_plan", META_PLAN_SCHEMA, &plan).unwrap_err();
        assert!(err.to_string().contains("meta_plan schema validation failed"));
    }

    #[test]
    fn program_schema_checks_instruction_shapes() {
        let ok = json!({"instructions": [
            {"kind": "RUN", "payload": {"cmd": "echo hi"}},
            {"kind": "EDIT", "payload": {"file_path": "a.txt", "content": "x"}},
            {"kind": "META", "payload": {"memory_mode": "DOWN"}}
        ]});
        validate_json("program", PROGRAM_SCHEMA, &ok).expect("valid");

        let bad = json!({"instructions": [{"kind": "SHELL", "payload": {"cmd": "ls"}}]});
        assert!(validate_json("program", PROGRAM_SCHEMA, &bad).is_err());
        assert!(validate_json("program", PROGRAM_SCHEMA, &json!({})).is_err());
    }
}
