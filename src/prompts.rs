//! System prompt and response schema for study-card generation.
//!
//! Both can be replaced from files (`--prompt-file`, `--schema-file`); the
//! constants here are used only when no override is provided. The prompt is
//! a template: every `[LANGUAGE]` is replaced with the configured language.

use crate::config::StudySetConfig;
use crate::error::Pdf2CardsError;
use serde_json::{json, Value};
use std::path::Path;

/// Placeholder substituted with the target language.
pub const LANGUAGE_PLACEHOLDER: &str = "[LANGUAGE]";

/// Default system prompt template.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an experienced teacher preparing a study set from course material.
You receive one or more pages of a document, as text or as page images.

Write flashcards that help a student learn the material:

1. Cover every important concept, definition, fact, formula and relationship on the pages.
2. Each card has one precise question and a short, self-contained answer.
3. Do not ask about page layout, headers, footers or page numbers.
4. Do not invent content that is not on the pages.
5. Skip pages without learnable content (title pages, tables of contents, blank pages).
6. Write both questions and answers in [LANGUAGE].

Respond with JSON only."#;

/// Build the default OpenAI `response_format` value.
pub fn default_schema() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "study_cards",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "study_cards": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "question": { "type": "string" },
                                "answer": { "type": "string" }
                            },
                            "required": ["question", "answer"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["study_cards"],
                "additionalProperties": false
            }
        }
    })
}

/// Substitute the target language into a prompt template.
pub fn render_prompt(template: &str, language: &str) -> String {
    template.trim().replace(LANGUAGE_PLACEHOLDER, language)
}

/// Resolve the system prompt: literal override, then file, then default.
pub fn load_prompt(config: &StudySetConfig) -> Result<String, Pdf2CardsError> {
    if let Some(ref prompt) = config.system_prompt {
        return Ok(render_prompt(prompt, &config.language));
    }
    if let Some(ref path) = config.prompt_file {
        let template =
            std::fs::read_to_string(path).map_err(|_| Pdf2CardsError::PromptNotFound {
                path: path.clone(),
            })?;
        return Ok(render_prompt(&template, &config.language));
    }
    Ok(render_prompt(DEFAULT_SYSTEM_PROMPT, &config.language))
}

/// Resolve the response schema from `config.schema_file` or the default.
pub fn load_schema(config: &StudySetConfig) -> Result<Value, Pdf2CardsError> {
    match config.schema_file {
        Some(ref path) => read_schema(path),
        None => Ok(default_schema()),
    }
}

fn read_schema(path: &Path) -> Result<Value, Pdf2CardsError> {
    let raw = std::fs::read_to_string(path).map_err(|e| Pdf2CardsError::SchemaInvalid {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| Pdf2CardsError::SchemaInvalid {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    if !value.is_object() {
        return Err(Pdf2CardsError::SchemaInvalid {
            path: path.to_path_buf(),
            detail: "expected a JSON object".into(),
        });
    }
    Ok(value)
}

/// Instruction appended to the system prompt in direct mode, where the
/// provider abstraction has no `response_format` parameter.
///
/// Accepts either a full `response_format` value or a bare JSON schema.
pub fn schema_instructions(schema: &Value) -> String {
    let inner = schema
        .pointer("/json_schema/schema")
        .unwrap_or(schema);
    let pretty = serde_json::to_string_pretty(inner).unwrap_or_else(|_| inner.to_string());
    format!(
        "Your entire reply must be a single JSON object matching this JSON schema, \
without markdown fences or commentary:\n{pretty}"
    )
}
