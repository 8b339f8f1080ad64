//! Content encoding: page records → model input.
//!
//! Two shapes are needed. Direct mode goes through edgequake-llm, which takes
//! base64 [`ImageData`] attachments plus a text body. Batch mode writes raw
//! OpenAI chat-completion content parts into the JSONL request file, where
//! images travel as `data:` URLs.

use super::batcher::Chunk;
use super::extract::{PagePayload, PageRecord};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use serde_json::{json, Value};

/// Text body and image attachments for one direct-mode user message.
pub struct EncodedChunk {
    pub text: String,
    pub images: Vec<ImageData>,
}

/// Encode a chunk for the edgequake-llm chat API.
///
/// Text pages are concatenated with page markers so the model can tell them
/// apart; image pages become high-detail attachments.
pub fn encode_chunk(chunk: &Chunk<'_>) -> EncodedChunk {
    let mut text = String::new();
    let mut images = Vec::new();

    for page in chunk.pages {
        match &page.payload {
            PagePayload::Text(body) => {
                if !text.is_empty() {
                    text.push_str("\n\n");
                }
                text.push_str(&format!("--- Page {} ---\n{}", page.index + 1, body.trim()));
            }
            PagePayload::Image { data, mime_type } => {
                images.push(ImageData::new(STANDARD.encode(data), mime_type.as_str()).with_detail("high"));
            }
        }
    }

    EncodedChunk { text, images }
}

/// Encode a page as an OpenAI chat-completion content part.
pub fn content_part(page: &PageRecord) -> Value {
    match &page.payload {
        PagePayload::Text(body) => json!({ "type": "text", "text": body }),
        PagePayload::Image { data, mime_type } => json!({
            "type": "image_url",
            "image_url": { "url": data_url(data, mime_type) }
        }),
    }
}

fn data_url(data: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}
