//! OpenAI / Azure OpenAI chat-completions classifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use sitesort_extract::text::{SNIPPET_MAX_CHARS, snippet, truncate_chars};
use sitesort_shared::{ClassificationLabel, Domain, ProviderConfig, Result, SitesortError};

use crate::{Classification, Classifier};

const TOOL_NAME: &str = "classify_site";

const SYSTEM_PROMPT: &str = "Classify websites into: Marketing (business/product sites), \
Portal (login/dashboards), Other (anything that doesnt suit our other categories), \
or Error (any errors/failures).\n\n\
CRITICAL: Always classify as 'Error' if you see: 404/403/500 errors, 'page not found', \
'server error', 'can't be reached', domain parking, or any malfunction indicators.";

const TEMPERATURE: f32 = 0.1;
const MAX_TOKENS: u32 = 500;

/// Default character budget for extracted text in the prompt.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 2800;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

impl Message {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

/// Arguments of the `classify_site` tool call.
#[derive(Debug, Deserialize)]
struct ClassifySiteArgs {
    classification_label: String,
    summary: String,
    confidence_level: f64,
}

fn classify_site_tool() -> serde_json::Value {
    json!([{
        "type": "function",
        "function": {
            "name": TOOL_NAME,
            "description": "Classify a website based on its content. Always classify error pages as 'Error'",
            "parameters": {
                "type": "object",
                "properties": {
                    "domain": {"type": "string", "description": "The domain name of the website"},
                    "classification_label": {
                        "type": "string",
                        "enum": ["Marketing", "Portal", "Other", "Error"],
                        "description": "The primary classification category: 'Marketing' (business/product sites), 'Portal' (login/user systems), 'Other' (functional sites), or 'Error' (404s, server errors, broken sites, domain parking)"
                    },
                    "summary": {"type": "string", "description": "A very brief summary of the website's purpose and content"},
                    "confidence_level": {"type": "number", "description": "A self-reported confidence level between 0.0 and 1.0"}
                },
                "required": ["domain", "classification_label", "summary", "confidence_level"]
            }
        }
    }])
}

// ---------------------------------------------------------------------------
// OpenAiClassifier
// ---------------------------------------------------------------------------

/// [`Classifier`] calling the chat-completions API of OpenAI or Azure OpenAI.
pub struct OpenAiClassifier {
    http_client: Client,
    provider: ProviderConfig,
    max_input_chars: usize,
}

impl OpenAiClassifier {
    /// Create a classifier for an already-resolved provider.
    pub fn new(provider: ProviderConfig) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SitesortError::Classify(format!("failed to build HTTP client: {e}")))?;

        info!(provider = provider.name(), model = provider.model(), "classifier ready");

        Ok(Self {
            http_client,
            provider,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        })
    }

    /// Limit how much extracted text is sent per request.
    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Send a minimal request and return the model's reply.
    pub async fn ping(&self) -> Result<String> {
        let request = self.chat_request(
            vec![Message::user(
                "Hello, respond with 'OK' if you can process this message.",
            )],
            false,
        );
        let response = self.send(&request).await?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(reply.trim().to_string())
    }

    fn endpoint(&self) -> String {
        match &self.provider {
            ProviderConfig::OpenAi { base_url, .. } => format!("{base_url}/chat/completions"),
            ProviderConfig::Azure {
                endpoint,
                deployment,
                api_version,
                ..
            } => format!(
                "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            ),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.provider {
            ProviderConfig::OpenAi { api_key, .. } => request.bearer_auth(api_key),
            ProviderConfig::Azure { api_key, .. } => request.header("api-key", api_key),
        }
    }

    fn chat_request(&self, messages: Vec<Message>, with_tool: bool) -> ChatRequest {
        let model = match &self.provider {
            ProviderConfig::OpenAi { model, .. } => Some(model.clone()),
            ProviderConfig::Azure { .. } => None,
        };
        ChatRequest {
            model,
            messages,
            tools: with_tool.then(classify_site_tool),
            tool_choice: with_tool
                .then(|| json!({"type": "function", "function": {"name": TOOL_NAME}})),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        }
    }

    fn user_content(&self, domain: &Domain, text: &str) -> String {
        let content = truncate_chars(text.trim(), self.max_input_chars);
        let content = if content.is_empty() { "None" } else { content };
        format!(
            "Domain: {domain}\nContent: {content}\n\nClassify this website and provide a brief summary."
        )
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .authorize(self.http_client.post(self.endpoint()))
            .json(request)
            .send()
            .await
            .map_err(|e| SitesortError::Classify(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SitesortError::Classify(format!(
                "API returned {status}: {}",
                truncate_chars(body.trim(), 300)
            )));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| SitesortError::Classify(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    #[instrument(skip_all, fields(domain = %domain, provider = self.provider.name()))]
    async fn classify(&self, domain: &Domain, text: &str) -> Result<Classification> {
        let request = self.chat_request(
            vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(self.user_content(domain, text)),
            ],
            true,
        );

        let response = self.send(&request).await?;
        let classification = parse_tool_call(response, text)?;

        debug!(
            label = %classification.label,
            confidence = classification.confidence,
            "classified"
        );
        Ok(classification)
    }
}

/// Pull the `classify_site` arguments out of a chat response.
fn parse_tool_call(response: ChatResponse, text: &str) -> Result<Classification> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| SitesortError::Classify("response contained no choices".into()))?;

    let call = message
        .tool_calls
        .into_iter()
        .next()
        .ok_or_else(|| SitesortError::Classify("no tool calls in response".into()))?;

    if call.function.name != TOOL_NAME {
        return Err(SitesortError::Classify(format!(
            "unexpected function called: {}",
            call.function.name
        )));
    }

    let args: ClassifySiteArgs = serde_json::from_str(&call.function.arguments)
        .map_err(|e| SitesortError::Classify(format!("invalid tool arguments: {e}")))?;

    let label: ClassificationLabel = args
        .classification_label
        .parse()
        .map_err(|e: SitesortError| SitesortError::Classify(e.cause()))?;

    if !(0.0..=1.0).contains(&args.confidence_level) {
        return Err(SitesortError::Classify(format!(
            "confidence {} outside [0, 1]",
            args.confidence_level
        )));
    }

    Ok(Classification {
        label,
        confidence: args.confidence_level,
        summary: args.summary.trim().to_string(),
        snippet: snippet(text, SNIPPET_MAX_CHARS),
    })
}
