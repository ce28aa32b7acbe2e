//! Intent and argument validation.
//!
//! Two layers: structural checks on intents (non-empty IDs, positive
//! amounts, interface presence on create) and a small JSON-Schema subset
//! checker used to validate invoke arguments against a method's declared
//! `input_schema` (`type`, `required`, `properties` — the slice artifact
//! interfaces actually use).

use bedrock::{Amount, Intent, WriteSpec};

/// A human-readable validation failure, surfaced as `invalid_argument`.
pub type Violation = String;

/// Structural checks the dispatcher runs before anything else.
pub fn check_intent(intent: &Intent) -> Result<(), Violation> {
    if intent.principal().as_str().is_empty() {
        return Err("principal_id must be non-empty".into());
    }
    if let Some(target) = intent.target()
        && target.as_str().is_empty()
    {
        return Err("artifact_id must be non-empty".into());
    }
    match intent {
        Intent::Transfer { amount, to, .. } => {
            if to.as_str().is_empty() {
                return Err("transfer target must be non-empty".into());
            }
            if !amount.is_positive() {
                return Err("transfer amount must be positive".into());
            }
            if let Amount::Units(n) = amount
                && *n == i64::MAX
            {
                return Err("transfer amount out of range".into());
            }
            Ok(())
        }
        Intent::Write { spec, .. } => check_write(spec),
        Intent::UpdateMetadata { updates, .. } => {
            if updates.is_empty() {
                return Err("update_metadata requires at least one entry".into());
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_write(spec: &WriteSpec) -> Result<(), Violation> {
    if spec.has_loop && !spec.has_standing {
        return Err("has_loop requires has_standing".into());
    }
    if let Some(interface) = &spec.interface
        && interface.description.is_empty()
    {
        return Err("interface.description is required".into());
    }
    Ok(())
}

/// Validate `args` against a JSON-Schema subset.
///
/// Supports `type` (`object`, `array`, `string`, `number`, `integer`,
/// `boolean`, `null`), `required` on objects, and recursion through
/// `properties` / `items`. Anything the schema doesn't constrain passes.
pub fn check_against_schema(
    args: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<(), Violation> {
    check_at(args, schema, "$")
}

fn check_at(
    value: &serde_json::Value,
    schema: &serde_json::Value,
    path: &str,
) -> Result<(), Violation> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(()); // unconstrained
    };

    if let Some(expected) = schema_obj.get("type").and_then(|t| t.as_str()) {
        let matches = match expected {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(format!("{path}: expected {expected}"));
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
        let object = value.as_object();
        for key in required.iter().filter_map(|k| k.as_str()) {
            if object.is_none_or(|o| !o.contains_key(key)) {
                return Err(format!("{path}: missing required field '{key}'"));
            }
        }
    }

    if let (Some(properties), Some(object)) = (
        schema_obj.get("properties").and_then(|p| p.as_object()),
        value.as_object(),
    ) {
        for (key, sub_schema) in properties {
            if let Some(sub_value) = object.get(key) {
                check_at(sub_value, sub_schema, &format!("{path}.{key}"))?;
            }
        }
    }

    if let (Some(items), Some(array)) = (schema_obj.get("items"), value.as_array()) {
        for (index, item) in array.iter().enumerate() {
            check_at(item, items, &format!("{path}[{index}]"))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_principal_is_rejected() {
        let intent = Intent::Noop {
            principal_id: "".into(),
            reason: None,
        };
        assert!(check_intent(&intent).is_err());
    }

    #[test]
    fn non_positive_transfers_are_rejected() {
        let intent = Intent::Transfer {
            principal_id: "a".into(),
            to: "b".into(),
            amount: Amount::Units(0),
            resource: bedrock::ResourceKind::Scrip,
        };
        assert!(check_intent(&intent).is_err());
    }

    #[test]
    fn schema_checks_type_and_required() {
        let schema = json!({
            "type": "object",
            "required": ["to", "amount"],
            "properties": {
                "to": {"type": "string"},
                "amount": {"type": "integer"},
            }
        });
        assert!(check_against_schema(&json!({"to": "bob", "amount": 5}), &schema).is_ok());

        let err = check_against_schema(&json!({"to": "bob"}), &schema).unwrap_err();
        assert!(err.contains("amount"));

        let err =
            check_against_schema(&json!({"to": "bob", "amount": "five"}), &schema).unwrap_err();
        assert!(err.contains("expected integer"));
    }

    #[test]
    fn schema_recurses_into_arrays() {
        let schema = json!({
            "type": "array",
            "items": {"type": "string"}
        });
        assert!(check_against_schema(&json!(["a", "b"]), &schema).is_ok());
        assert!(check_against_schema(&json!(["a", 3]), &schema).is_err());
    }

    #[test]
    fn unconstrained_schemas_pass_everything() {
        assert!(check_against_schema(&json!({"whatever": 1}), &json!(true)).is_ok());
        assert!(check_against_schema(&json!(null), &json!({})).is_ok());
    }
}
