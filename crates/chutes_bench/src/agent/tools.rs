//! Action tools offered to models, derived from the `Action` JSON schema.

use chutes_ladders::{Action, ActionKind};
use serde_json::{Map, Value};
use strum::IntoEnumIterator;

use super::AgentError;
use crate::llm_client::{ToolCall, ToolSpec};

/// One tool per action kind, in declaration order.
///
/// Each tool's parameters are the matching variant of the tagged `Action`
/// schema with the `action` tag removed, since the tool name carries it.
pub fn action_tools() -> Vec<ToolSpec> {
    let schema = Value::from(schemars::schema_for!(Action));
    let variants: Vec<Value> = schema
        .get("oneOf")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    ActionKind::iter()
        .map(|kind| {
            let name = kind.to_string();
            let parameters = variants
                .iter()
                .find(|variant| variant_tag(variant) == Some(name.as_str()))
                .map_or_else(empty_parameters, strip_tag);
            ToolSpec::new(name, kind.description().to_string(), parameters)
        })
        .collect()
}

fn variant_tag(variant: &Value) -> Option<&str> {
    variant
        .pointer("/properties/action/const")
        .or_else(|| variant.pointer("/properties/action/enum/0"))
        .and_then(Value::as_str)
}

fn strip_tag(variant: &Value) -> Value {
    let mut properties = variant
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    properties.remove("action");

    let required: Vec<Value> = variant
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter(|name| name.as_str() != Some("action"))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let mut parameters = Map::new();
    parameters.insert("type".into(), Value::from("object"));
    parameters.insert("properties".into(), Value::Object(properties));
    parameters.insert("required".into(), Value::Array(required));
    Value::Object(parameters)
}

fn empty_parameters() -> Value {
    serde_json::json!({"type": "object", "properties": {}, "required": []})
}

/// Turns a model's tool call into an [`Action`].
///
/// # Errors
///
/// Returns [`AgentError::Malformed`] for an unknown tool, arguments that
/// are not an object, or arguments that do not fit the action.
pub fn action_from_tool_call(call: &ToolCall) -> Result<Action, AgentError> {
    let mut object = match call.arguments() {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(AgentError::Malformed {
                reason: format!("arguments to {} are not an object: {}", call.name(), other),
            });
        }
    };
    object.insert("action".into(), Value::String(call.name().clone()));

    serde_json::from_value(Value::Object(object)).map_err(|e| AgentError::Malformed {
        reason: format!("tool call {} rejected: {}", call.name(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool<'a>(tools: &'a [ToolSpec], name: &str) -> &'a ToolSpec {
        tools
            .iter()
            .find(|tool| tool.name() == name)
            .expect("tool exists")
    }

    #[test]
    fn one_tool_per_action_kind() {
        let tools = action_tools();
        let names: Vec<&str> = tools.iter().map(|tool| tool.name().as_str()).collect();
        let kinds: Vec<String> = ActionKind::iter().map(|kind| kind.to_string()).collect();
        assert_eq!(names, kinds);
        assert!(tools.iter().all(|tool| !tool.description().is_empty()));
    }

    #[test]
    fn square_tools_require_a_square() {
        let tools = action_tools();
        for name in ["move_pawn_to_square", "ascend_ladder_to_square", "descend_chute_to_square"] {
            let parameters = tool(&tools, name).parameters();
            assert_eq!(parameters["required"], json!(["square"]), "{name}");
            assert_eq!(parameters["properties"]["square"]["type"], "integer", "{name}");
            assert!(parameters["properties"].get("action").is_none(), "{name}");
        }
        assert_eq!(tool(&tools, "spin_spinner").parameters()["required"], json!([]));
        assert!(tool(&tools, "send_message").parameters()["properties"]["message"].is_object());
    }

    #[test]
    fn tool_call_becomes_action() {
        let ascend = ToolCall::new("ascend_ladder_to_square".to_string(), json!({"square": 38}));
        assert_eq!(
            action_from_tool_call(&ascend).expect("valid call"),
            Action::Ascend { square: 38 }
        );

        let spin = ToolCall::new("spin_spinner".to_string(), Value::Null);
        assert_eq!(action_from_tool_call(&spin).expect("valid call"), Action::Spin);

        let chat = ToolCall::new("send_message".to_string(), json!({"message": "gg"}));
        assert_eq!(
            action_from_tool_call(&chat).expect("valid call"),
            Action::SendMessage {
                message: "gg".to_string()
            }
        );
    }

    #[test]
    fn malformed_tool_calls_are_rejected() {
        let calls = [
            ToolCall::new("teleport".to_string(), json!({})),
            ToolCall::new("move_pawn_to_square".to_string(), json!({})),
            ToolCall::new("move_pawn_to_square".to_string(), json!({"square": "ten"})),
            ToolCall::new("move_pawn_to_square".to_string(), json!("{square")),
        ];
        for call in calls {
            assert!(
                matches!(action_from_tool_call(&call), Err(AgentError::Malformed { .. })),
                "{call:?}"
            );
        }
    }
}
