//! Compiles the field schema into the `save_user_data` function tool that the
//! realtime voice model calls once it has gathered everything.

use crate::field::FieldDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const SAVE_TOOL_NAME: &str = "save_user_data";
pub const TRANSCRIPT_PARAM: &str = "transcript";

/// A function-call tool definition in the shape the realtime API expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

/// The JSON object schema describing a tool's arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: Map<String, Value>,
    pub required: Vec<String>,
}

/// Builds the `save_user_data` tool from an ordered list of fields.
///
/// Every field becomes a required property in declaration order, followed by
/// the `transcript` array, which is always required and always last.
pub fn compile_save_tool(fields: &[FieldDescriptor]) -> ToolSpec {
    let mut properties = Map::new();
    let mut required = Vec::with_capacity(fields.len() + 1);

    for field in fields {
        properties.insert(
            field.name.clone(),
            json!({
                "type": field.field_type().as_json_type(),
                "description": field.prompt_text(),
            }),
        );
        required.push(field.name.clone());
    }

    properties.insert(TRANSCRIPT_PARAM.to_string(), transcript_schema());

    let fields_list = required.join(", ");
    required.push(TRANSCRIPT_PARAM.to_string());

    ToolSpec {
        kind: "function".to_string(),
        name: SAVE_TOOL_NAME.to_string(),
        description: format!(
            "Save the collected user information and conversation transcript to the database. \
             Call this function only after you have collected ALL required fields ({}) and the \
             user has confirmed the information is correct.",
            fields_list
        ),
        parameters: ParameterSchema {
            kind: "object".to_string(),
            properties,
            required,
        },
    }
}

fn transcript_schema() -> Value {
    json!({
        "type": "array",
        "description": "The full conversation transcript",
        "items": {
            "type": "object",
            "properties": {
                "role": {
                    "type": "string",
                    "enum": ["assistant", "user"],
                    "description": "Who spoke (assistant or user)"
                },
                "content": {
                    "type": "string",
                    "description": "What was said"
                }
            },
            "required": ["role", "content"]
        }
    })
}
