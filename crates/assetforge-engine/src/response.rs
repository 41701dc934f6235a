use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::client::GenerateError;

const TEXT_PREVIEW_CHARS: usize = 200;
pub const BODY_PREVIEW_CHARS: usize = 500;

/// `generateContent` reply. Only the fields the pipeline reads are typed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback", alias = "prompt_feedback")]
    pub prompt_feedback: Option<PromptFeedback>,
    /// Leading characters of the raw reply, kept when there are no candidates.
    #[serde(skip)]
    pub body_preview: Option<String>,
}

/// Why the service declined to answer a prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptFeedback {
    #[serde(default, rename = "blockReason", alias = "block_reason")]
    pub block_reason: Option<String>,
    #[serde(default, rename = "blockReasonMessage", alias = "block_reason_message")]
    pub block_reason_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default, rename = "finishReason", alias = "finish_reason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One response part. The service spells the image field either `inlineData`
/// or `inline_data`; both decode into [`Part::Image`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Image {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct InlineData {
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: String,
}

/// Image bytes plus whatever commentary the model returned alongside them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub model_text: String,
}

impl Part {
    pub fn kind(&self) -> &'static str {
        match self {
            Part::Image { .. } => "image",
            Part::Text { .. } => "text",
            Part::Other(_) => "other",
        }
    }
}

impl GenerationResponse {
    pub fn first_candidate(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.first_candidate()
            .and_then(|candidate| candidate.finish_reason.as_deref())
    }

    fn no_candidates_message(&self) -> String {
        let mut message = "no candidates in service response".to_string();
        if let Some(feedback) = self.prompt_feedback.as_ref() {
            if let Some(reason) = feedback.block_reason.as_deref() {
                message.push_str(&format!("; blocked: {reason}"));
            }
            if let Some(detail) = feedback.block_reason_message.as_deref() {
                message.push_str(&format!(" ({detail})"));
            }
        }
        if let Some(preview) = self.body_preview.as_deref() {
            message.push_str(&format!("; response: {preview}"));
        }
        message
    }

    fn first_parts(&self) -> &[Part] {
        self.first_candidate()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| content.parts.as_slice())
            .unwrap_or_default()
    }

    /// Decodes the first candidate. Text parts are concatenated; when several
    /// image parts carry data the last one wins.
    pub fn extract_image(&self) -> Result<GeneratedImage, GenerateError> {
        if self.candidates.is_empty() {
            return Err(GenerateError::Parse(self.no_candidates_message()));
        }

        let mut image: Option<&InlineData> = None;
        let mut model_text = String::new();
        for part in self.first_parts() {
            match part {
                Part::Image { inline_data } if !inline_data.data.is_empty() => {
                    image = Some(inline_data);
                }
                Part::Text { text } => model_text.push_str(text),
                _ => {}
            }
        }

        let Some(inline) = image else {
            return Err(GenerateError::NoImage {
                finish_reason: self.finish_reason().map(str::to_string),
                model_text,
            });
        };
        let bytes = BASE64
            .decode(inline.data.as_bytes())
            .map_err(|err| GenerateError::Parse(format!("image base64 decode failed: {err}")))?;
        Ok(GeneratedImage {
            bytes,
            mime_type: inline.mime_type.clone(),
            model_text,
        })
    }
}

/// Shape summary of a raw reply: top-level keys, per-part kind, truncated
/// text, image MIME and encoded length, finish reason.
pub fn describe_shape(raw: &Value) -> Map<String, Value> {
    let mut shape = Map::new();
    let keys = raw
        .as_object()
        .map(|obj| obj.keys().cloned().map(Value::String).collect::<Vec<_>>())
        .unwrap_or_default();
    shape.insert("keys".to_string(), Value::Array(keys));

    let candidates = raw
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    shape.insert("candidates".to_string(), json!(candidates.len()));
    let Some(first) = candidates.first() else {
        if let Some(feedback) = raw.get("promptFeedback").or_else(|| raw.get("prompt_feedback")) {
            shape.insert("prompt_feedback".to_string(), feedback.clone());
        }
        shape.insert("body".to_string(), json!(body_preview(raw)));
        return shape;
    };

    let parts = first
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let described = parts
        .iter()
        .enumerate()
        .map(|(idx, part)| describe_part(idx, part))
        .collect::<Vec<_>>();
    shape.insert("parts".to_string(), Value::Array(described));
    shape.insert(
        "finish_reason".to_string(),
        first
            .get("finishReason")
            .or_else(|| first.get("finish_reason"))
            .cloned()
            .unwrap_or_else(|| json!("unknown")),
    );
    shape
}

/// Compact JSON of `raw`, cut to [`BODY_PREVIEW_CHARS`].
pub fn body_preview(raw: &Value) -> String {
    let rendered = serde_json::to_string(raw).unwrap_or_default();
    if rendered.chars().count() <= BODY_PREVIEW_CHARS {
        return rendered;
    }
    rendered.chars().take(BODY_PREVIEW_CHARS).collect::<String>() + "…"
}

fn describe_part(idx: usize, part: &Value) -> Value {
    let mut row = Map::new();
    row.insert("index".to_string(), json!(idx));
    let keys = part
        .as_object()
        .map(|obj| obj.keys().cloned().map(Value::String).collect::<Vec<_>>())
        .unwrap_or_default();
    row.insert("keys".to_string(), Value::Array(keys));

    if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
        row.insert("kind".to_string(), json!("image"));
        row.insert(
            "mime_type".to_string(),
            inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .cloned()
                .unwrap_or_else(|| json!("?")),
        );
        let data_len = inline
            .get("data")
            .and_then(Value::as_str)
            .map(str::len)
            .unwrap_or(0);
        row.insert("data_len".to_string(), json!(data_len));
    } else if let Some(text) = part.get("text").and_then(Value::as_str) {
        row.insert("kind".to_string(), json!("text"));
        row.insert(
            "text".to_string(),
            json!(text.chars().take(TEXT_PREVIEW_CHARS).collect::<String>()),
        );
    } else {
        row.insert("kind".to_string(), json!("other"));
    }
    Value::Object(row)
}
