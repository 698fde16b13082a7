//! The extraction capability seam and its chat-completions implementation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LlmSettings;
use crate::document::ExtractedDoc;
use crate::error::ExtractionError;

/// Extracts a structured document from raw bytes. Implementations are shared
/// across all extraction workers, so they must be safe to call concurrently.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, content: &[u8], mime_type: &str) -> Result<ExtractedDoc, ExtractionError>;
}

/// Instruction prompt sent with every document. The requested JSON shape is
/// exactly what [`ExtractedDoc`] deserializes.
const EXTRACTION_PROMPT: &str = "Extract all text from this document, using OCR if needed. \
Return the result as a JSON object with the following structure: \
{\"title\": \"document title\", \"pages\": [{\"pageNumber\": 1, \"text\": \"text content of the page\"}, ...]}. \
Preserve the page order of the document exactly. Respond with the JSON object only.";

/// [`TextExtractor`] over an OpenAI-compatible chat-completions API.
pub struct OpenAiExtractor {
    client: reqwest::blocking::Client,
    api_url: String,
    api_key: SecretString,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiExtractor {
    /// Builds the HTTP client. The API key comes from the settings or the
    /// `OPENAI_API_KEY` environment variable.
    pub fn new(settings: &LlmSettings) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()?;

        let api_key = settings
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            warn!("No API key configured for the extraction backend");
        }

        Ok(Self {
            client,
            api_url: settings.api_url.clone(),
            api_key: SecretString::from(api_key),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

impl TextExtractor for OpenAiExtractor {
    fn extract(&self, content: &[u8], mime_type: &str) -> Result<ExtractedDoc, ExtractionError> {
        let data_url = format!(
            "data:{};base64,{}",
            effective_mime(mime_type),
            STANDARD.encode(content)
        );

        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: EXTRACTION_PROMPT,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
        };

        let response: ChatResponse = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()?
            .error_for_status()?
            .json()?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ExtractionError::EmptyResponse)?;

        parse_extraction_response(&text)
    }
}

/// Parses the model's reply into a structured document, tolerating a
/// markdown code fence around the JSON.
pub fn parse_extraction_response(text: &str) -> Result<ExtractedDoc, ExtractionError> {
    let body = strip_code_fence(text.trim());
    let doc = ExtractedDoc::from_json(body)
        .map_err(|e| ExtractionError::ResponseParse(e.to_string()))?;
    if !doc.pages_ordered() {
        return Err(ExtractionError::ResponseParse(
            "page numbers are not non-decreasing".to_string(),
        ));
    }
    Ok(doc)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the fence line (possibly "```json") and the closing fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn effective_mime(mime_type: &str) -> &str {
    if mime_type.is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json_response() {
        let doc = parse_extraction_response(
            r#"{"title": "Memo", "pages": [{"pageNumber": 1, "text": "hello"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.title.as_deref(), Some("Memo"));
        assert_eq!(doc.total_pages(), 1);
    }

    #[test]
    fn test_parse_fenced_response() {
        let text = "```json\n{\"title\": \"Memo\", \"pages\": [{\"pageNumber\": 1, \"text\": \"hi\"}]}\n```";
        let doc = parse_extraction_response(text).unwrap();
        assert_eq!(doc.pages[0].text, "hi");
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse_extraction_response("Sorry, I cannot read this document.").unwrap_err();
        assert!(matches!(err, ExtractionError::ResponseParse(_)));
    }

    #[test]
    fn test_parse_rejects_unordered_pages() {
        let text = r#"{"pages": [{"pageNumber": 3, "text": "a"}, {"pageNumber": 1, "text": "b"}]}"#;
        let err = parse_extraction_response(text).unwrap_err();
        assert!(matches!(err, ExtractionError::ResponseParse(_)));
    }

    #[test]
    fn test_prompt_names_the_expected_fields() {
        assert!(EXTRACTION_PROMPT.contains("pageNumber"));
        assert!(EXTRACTION_PROMPT.contains("\"pages\""));
        assert!(EXTRACTION_PROMPT.contains("\"title\""));
    }

    #[test]
    fn test_effective_mime_fallback() {
        assert_eq!(effective_mime("application/pdf"), "application/pdf");
        assert_eq!(effective_mime(""), "application/octet-stream");
    }

    #[test]
    fn test_request_serialization_shape() {
        let request = ChatRequest {
            model: "gpt-4o",
            temperature: 0.1,
            max_tokens: 4000,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: "prompt" },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:application/pdf;base64,QUJD".to_string(),
                        },
                    },
                ],
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][0]["content"][1]["image_url"]["url"],
            "data:application/pdf;base64,QUJD"
        );
    }
}
