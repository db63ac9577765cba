//! Instruction text for both assistants and the realtime session document
//! that carries the voice instructions to the provider.

use crate::{
    field::{FieldDescriptor, FieldSchema},
    tool_spec::{SAVE_TOOL_NAME, ToolSpec, compile_save_tool},
};
use serde::Serialize;
use std::collections::HashMap;

/// Session configuration sent alongside the SDP offer when opening a voice call.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeSessionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub audio: AudioConfig,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: String,
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioConfig {
    pub output: AudioOutput,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioOutput {
    pub voice: String,
}

impl RealtimeSessionConfig {
    /// Builds the voice session for `schema` with the given model and voice.
    pub fn for_schema(schema: &FieldSchema, model: &str, voice: &str) -> Self {
        Self {
            kind: "realtime".to_string(),
            model: model.to_string(),
            audio: AudioConfig {
                output: AudioOutput {
                    voice: voice.to_string(),
                },
            },
            tools: vec![compile_save_tool(&schema.fields)],
            tool_choice: "auto".to_string(),
            instructions: voice_instructions(&schema.fields),
        }
    }
}

/// Instructions for the realtime voice interviewer.
pub fn voice_instructions(fields: &[FieldDescriptor]) -> String {
    let field_list = serde_json::to_string_pretty(fields).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are a friendly voice assistant conducting an onboarding interview.

Your task:
1. Greet the user warmly and explain you'll be collecting some information
2. Ask for each piece of information one at a time:
{field_list}

3. After collecting all information, summarize everything back to the user
4. Ask for confirmation that all details are correct
5. If confirmed, call the '{tool}' function with all collected data AND the complete conversation transcript
6. After successfully saving, thank the user and end the conversation

Important:
- Be conversational and friendly
- If user wants to correct something, allow them to do so
- Keep track of the entire conversation for the transcript
- Only call {tool} after user confirms all information is correct
- Include the full conversation in the transcript parameter when calling {tool}"#,
        tool = SAVE_TOOL_NAME,
    )
}

/// System prompt for one text-chat turn, including what has been collected so far.
pub fn chat_instructions(fields: &[FieldDescriptor], answers: &HashMap<String, String>) -> String {
    let field_lines = fields
        .iter()
        .map(|f| {
            format!(
                "- {} ({}): {}",
                f.name,
                f.field_type().as_json_type(),
                f.prompt_text()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let pending: Vec<&str> = fields
        .iter()
        .map(|f| f.name.as_str())
        .filter(|name| !answers.contains_key(*name))
        .collect();

    let collected = serde_json::to_string_pretty(answers).unwrap_or_else(|_| "{}".to_string());

    format!(
        "You are a friendly onboarding assistant chatting with a new user.\n\n\
         Collect the following fields, one question at a time:\n{field_lines}\n\n\
         Whenever the user gives you a value, call the `save_answer` tool with the field name as \
         `key` and the value as text. Call `get_session_data` if you need to check what has been \
         stored. When every field is collected, summarise the answers and tell the user they can \
         type 'done' to finish.\n\n\
         # Current Context for This Turn\n\n\
         **Collected answers:**\n```json\n{collected}\n```\n\n\
         **Still missing:** {}",
        if pending.is_empty() {
            "nothing".to_string()
        } else {
            pending.join(", ")
        }
    )
}
