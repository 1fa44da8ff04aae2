//! Prompt-driven operators.
//!
//! An [`LlmOperator`] renders a [`PromptTemplate`] against its inputs, sends
//! the result to the configured [`LlmProvider`] and maps the reply onto its
//! output ports. Operators that expect structured output request a JSON
//! object and parse the reply with [`parse_json_lenient`].

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pipeline::{
    ChatMessage, ChatRequest, LlmProvider, Operator, OperatorContext, OperatorDescriptor,
    OperatorError, OperatorKey, PortMap, PortValue, RegistryError, ResponseFormat,
};
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

/// Sampling temperature for every built-in LLM operator.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Per-call timeout for LLM requests.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(180);

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex")
});

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("fenced block regex"));

// ---------------------------------------------------------------------------
// Prompt templates
// ---------------------------------------------------------------------------

/// System prompt plus a user prompt with `{placeholder}` slots.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptTemplate {
    /// Instructions sent as the system message.
    pub system_prompt: String,
    /// User message; `{port}` is replaced by the value bound to that port.
    pub user_prompt_template: String,
}

impl PromptTemplate {
    /// Parses a YAML prompt file; `source_name` labels errors.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidManifest`] if the YAML is not a prompt.
    pub fn from_yaml(source_name: &str, yaml: &str) -> Result<Self, RegistryError> {
        serde_yaml::from_str(yaml).map_err(|err| RegistryError::InvalidManifest {
            source_name: source_name.to_string(),
            message: err.to_string(),
        })
    }

    /// Builds the system and user messages for `inputs`.
    ///
    /// Image inputs are attached to the user message as JPEG data URLs in
    /// port order instead of being substituted.
    pub fn render(&self, inputs: &PortMap) -> Vec<ChatMessage> {
        let values: BTreeMap<&str, String> = inputs
            .iter()
            .filter_map(|(port, value)| prompt_text(value).map(|text| (port.as_str(), text)))
            .collect();

        let mut user = ChatMessage::user(fill_placeholders(&self.user_prompt_template, &values));
        for value in inputs.values() {
            if let PortValue::Images(images) = value {
                for image in images {
                    user = user.with_image_url(format!(
                        "data:image/jpeg;base64,{}",
                        STANDARD.encode(image)
                    ));
                }
            }
        }
        vec![ChatMessage::system(self.system_prompt.clone()), user]
    }
}

fn prompt_text(value: &PortValue) -> Option<String> {
    match value {
        PortValue::Text(text) => Some(text.clone()),
        PortValue::Json(_) | PortValue::Cards(_) => {
            serde_json::to_string_pretty(&value.to_json()).ok()
        }
        PortValue::PdfBytes(_) => Some(value.describe()),
        PortValue::Images(_) => None,
    }
}

/// Substitutes `{name}` from `values`.
///
/// Unknown placeholders are left verbatim; `{{` and `}}` render as single
/// braces.
pub fn fill_placeholders(template: &str, values: &BTreeMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match caps.get(1) {
            Some(name) => values
                .get(name.as_str())
                .cloned()
                .unwrap_or_else(|| caps[0].to_string()),
            None => caps[0][..1].to_string(),
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Parses JSON out of a model reply.
///
/// 1. Invalid escapes (a backslash not starting a JSON escape) are doubled.
/// 2. A fenced ```` ```json ```` block is preferred when it parses.
/// 3. Otherwise the first JSON value starting at the first `{` or `[` is
///    decoded and any trailing text ignored.
///
/// # Errors
///
/// The decoder error when no JSON value can be recovered.
pub fn parse_json_lenient(content: &str) -> Result<Value, serde_json::Error> {
    let content = escape_stray_backslashes(content);

    if let Some(block) = FENCED_BLOCK.captures(&content).and_then(|caps| caps.get(1)) {
        if let Ok(value) = serde_json::from_str(block.as_str().trim()) {
            return Ok(value);
        }
    }

    let Some(start) = content.find(['{', '[']) else {
        return serde_json::from_str(&content);
    };
    let tail = &content[start..];
    match serde_json::Deserializer::from_str(tail).into_iter::<Value>().next() {
        Some(Ok(value)) => Ok(value),
        _ => serde_json::from_str(tail),
    }
}

fn escape_stray_backslashes(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '\\' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        match chars.get(i + 1) {
            Some('\\' | '"' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => {
                out.push('\\');
                out.push(chars[i + 1]);
                i += 2;
            }
            Some('u')
                if chars.len() > i + 5
                    && chars[i + 2..i + 6].iter().all(char::is_ascii_hexdigit) =>
            {
                out.push('\\');
                i += 1;
            }
            _ => {
                out.push_str("\\\\");
                i += 1;
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// A model reply after optional JSON parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Free-form text.
    Text(String),
    /// Parsed JSON.
    Json(Value),
}

/// Maps a reply onto output ports; `operator` labels errors.
pub type OutputMapper = fn(operator: &OperatorKey, reply: Reply) -> Result<PortMap, OperatorError>;

/// Generic prompt-driven operator.
#[derive(Clone)]
pub struct LlmOperator {
    descriptor: OperatorDescriptor,
    prompt: Arc<PromptTemplate>,
    structured: bool,
    map_output: OutputMapper,
    provider: Arc<dyn LlmProvider>,
}

impl LlmOperator {
    /// Creates the operator. `structured` requests and parses JSON replies.
    pub fn new(
        descriptor: OperatorDescriptor,
        prompt: Arc<PromptTemplate>,
        structured: bool,
        map_output: OutputMapper,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            descriptor,
            prompt,
            structured,
            map_output,
            provider,
        }
    }
}

#[async_trait]
impl Operator for LlmOperator {
    fn descriptor(&self) -> &OperatorDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        inputs: PortMap,
        _ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError> {
        self.validate_inputs(&inputs)?;
        let key = &self.descriptor.key;

        let request = ChatRequest {
            messages: self.prompt.render(&inputs),
            temperature: DEFAULT_TEMPERATURE,
            response_format: if self.structured {
                ResponseFormat::JsonObject
            } else {
                ResponseFormat::Text
            },
            timeout: LLM_TIMEOUT,
        };

        info!(operator = %key, model = self.provider.model(), "LLM request");
        let response = self.provider.complete(request).await?;
        info!(
            operator = %key,
            tokens = response.usage.map(|usage| usage.total().as_u64()),
            preview = %response.content.chars().take(200).collect::<String>(),
            "LLM response"
        );

        let reply = if self.structured {
            let value =
                parse_json_lenient(&response.content).map_err(|err| OperatorError::InvalidData {
                    operator: key.clone(),
                    message: format!("reply is not valid JSON: {err}"),
                })?;
            Reply::Json(value)
        } else {
            Reply::Text(response.content)
        };
        (self.map_output)(key, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{ContentPart, PortKey};
    use serde_json::json;

    #[test]
    fn unknown_placeholders_are_left_verbatim() {
        let mut values = BTreeMap::new();
        values.insert("text", "the paper".to_string());
        let rendered = fill_placeholders("Read {text}. Keep {other} and {{braces}}.", &values);
        assert_eq!(rendered, "Read the paper. Keep {other} and {braces}.");
    }

    #[test]
    fn json_inputs_render_pretty_and_images_attach() {
        let prompt = PromptTemplate {
            system_prompt: "sys".into(),
            user_prompt_template: "Notes:\n{notes}\nImages: {images}".into(),
        };
        let mut inputs = PortMap::new();
        inputs.insert(PortKey::from_static("notes"), PortValue::Json(json!([{"title": "A"}])));
        inputs.insert(PortKey::from_static("images"), PortValue::Images(vec![vec![1, 2, 3]]));

        let messages = prompt.render(&inputs);
        assert_eq!(messages.len(), 2);
        let user = &messages[1];
        assert_eq!(
            user.text(),
            "Notes:\n[\n  {\n    \"title\": \"A\"\n  }\n]\nImages: {images}"
        );
        assert_eq!(
            user.content[1],
            ContentPart::ImageUrl {
                url: "data:image/jpeg;base64,AQID".into()
            }
        );
    }

    #[test]
    fn fenced_block_is_preferred() {
        let reply = "Sure!\n```json\n{\"flashcards\": []}\n```\nanything else {";
        assert_eq!(parse_json_lenient(reply).unwrap(), json!({"flashcards": []}));
    }

    #[test]
    fn trailing_text_after_json_is_ignored() {
        let reply = "Here you go: [{\"title\": \"Intro\"}] Hope this helps!";
        assert_eq!(parse_json_lenient(reply).unwrap(), json!([{"title": "Intro"}]));
    }

    #[test]
    fn stray_backslashes_from_latex_are_escaped() {
        let reply = r#"{"content": "uses \alpha and \\beta and \n and é"}"#;
        let value = parse_json_lenient(reply).unwrap();
        assert_eq!(value["content"], "uses \\alpha and \\beta and \n and \u{e9}");
    }

    #[test]
    fn replies_without_json_fail() {
        assert!(parse_json_lenient("no structured content here").is_err());
    }
}
