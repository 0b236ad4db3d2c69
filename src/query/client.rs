//! OpenAI-compatible chat completion client and the two query strategies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{ModelQuery, QueryOutput, QueryRequest, QueryResponse, QueryStrategy};
use crate::error::QueryError;

/// Default endpoint when `OPENAI_BASE_URL` is unset.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Client for OpenAI-compatible chat completion APIs.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    /// Base URL for the API.
    api_base: String,
    /// Optional API key for authentication.
    api_key: Option<String>,
    /// HTTP client for making API requests.
    http_client: Client,
}

impl OpenAiClient {
    /// Creates a client for `api_base`.
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
        }
    }

    /// Creates a client from `OPENAI_BASE_URL` and `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::MissingApiKey` if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self, QueryError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| QueryError::MissingApiKey)?;
        let api_base =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Ok(Self::new(api_base, Some(api_key)))
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Posts a chat completion body and returns the raw JSON response.
    async fn chat_completion(&self, body: &Value) -> Result<Value, QueryError> {
        let url = format!("{}/chat/completions", self.api_base);

        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request
            .json(body)
            .send()
            .await
            .map_err(|e| QueryError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(QueryError::RateLimited(message));
            }
            return Err(QueryError::ApiError {
                code: status_code,
                message,
            });
        }

        http_response
            .json()
            .await
            .map_err(|e| QueryError::ParseError(format!("Failed to parse API response: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Builds the chat completion body shared by both strategies.
fn base_body(request: &QueryRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(ref system) = request.system_message {
        messages.push(json!({ "role": "system", "content": system }));
    }
    if let Some(ref user) = request.user_message {
        messages.push(json!({ "role": "user", "content": user }));
    }

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

/// Builds a body that forces a call to the request's function, if any.
fn function_call_body(request: &QueryRequest) -> Value {
    let mut body = base_body(request);
    if let Some(ref function) = request.function {
        body["tools"] = json!([{
            "type": "function",
            "function": {
                "name": function.name,
                "description": function.description,
                "parameters": function.parameters,
            }
        }]);
        body["tool_choice"] = json!({
            "type": "function",
            "function": { "name": function.name }
        });
    }
    body
}

fn usage(response: &Value) -> (u32, u32) {
    let field = |name: &str| {
        response["usage"][name]
            .as_u64()
            .map(|n| n as u32)
            .unwrap_or(0)
    };
    (field("prompt_tokens"), field("completion_tokens"))
}

/// Extracts the text answer of the first choice.
fn parse_text_response(response: &Value) -> Result<QueryResponse, QueryError> {
    let message = response["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or(QueryError::EmptyResponse)?;

    let content = message["content"].as_str().unwrap_or_default().to_string();
    let (prompt_tokens, completion_tokens) = usage(response);

    Ok(QueryResponse {
        output: QueryOutput::Text(content),
        prompt_tokens,
        completion_tokens,
    })
}

/// Extracts the first tool call of the first choice.
fn parse_function_response(response: &Value) -> Result<QueryResponse, QueryError> {
    let message = response["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or(QueryError::EmptyResponse)?;

    let call = message["tool_calls"]
        .get(0)
        .map(|call| &call["function"])
        .ok_or_else(|| QueryError::ParseError("response contains no tool call".to_string()))?;

    let name = call["name"]
        .as_str()
        .ok_or_else(|| QueryError::ParseError("tool call has no name".to_string()))?
        .to_string();

    // Arguments arrive as a JSON-encoded string.
    let arguments = match &call["arguments"] {
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| QueryError::ParseError(format!("invalid tool arguments: {}", e)))?,
        other => other.clone(),
    };

    let (prompt_tokens, completion_tokens) = usage(response);

    Ok(QueryResponse {
        output: QueryOutput::FunctionCall { name, arguments },
        prompt_tokens,
        completion_tokens,
    })
}

/// Plain chat completion: text in, text out.
pub struct PlainQuery {
    client: OpenAiClient,
}

impl PlainQuery {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelQuery for PlainQuery {
    fn strategy(&self) -> QueryStrategy {
        QueryStrategy::Plain
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, QueryError> {
        debug!(model = %request.model, "Sending plain query");
        let response = self.client.chat_completion(&base_body(&request)).await?;
        parse_text_response(&response)
    }
}

/// Chat completion that forces a call to the request's function.
///
/// Requests without a function fall back to a plain text query.
pub struct FunctionCallingQuery {
    client: OpenAiClient,
}

impl FunctionCallingQuery {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelQuery for FunctionCallingQuery {
    fn strategy(&self) -> QueryStrategy {
        QueryStrategy::FunctionCalling
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, QueryError> {
        if request.function.is_none() {
            let response = self.client.chat_completion(&base_body(&request)).await?;
            return parse_text_response(&response);
        }

        debug!(model = %request.model, "Sending function-calling query");
        let response = self
            .client
            .chat_completion(&function_call_body(&request))
            .await?;
        parse_function_response(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FunctionSpec;

    fn submit_function() -> FunctionSpec {
        FunctionSpec {
            name: "submit_review".to_string(),
            description: "Review the execution output".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "is_bug": { "type": "boolean" } },
                "required": ["is_bug"]
            }),
        }
    }

    #[test]
    fn test_base_body() {
        let request = QueryRequest::new("gpt-4o")
            .with_system("system prompt")
            .with_temperature(0.0);
        let body = base_body(&request);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["temperature"], 0.0);
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_function_call_body_forces_tool() {
        let request = QueryRequest::new("gpt-4o")
            .with_user("review this")
            .with_function(submit_function());
        let body = function_call_body(&request);

        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "submit_review");
        assert_eq!(body["tool_choice"]["function"]["name"], "submit_review");
    }

    #[test]
    fn test_parse_text_response() {
        let response = json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
        });
        let parsed = parse_text_response(&response).unwrap();

        assert_eq!(parsed.output.as_text(), Some("hello"));
        assert_eq!(parsed.prompt_tokens, 12);
        assert_eq!(parsed.completion_tokens, 3);
    }

    #[test]
    fn test_parse_function_response() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "submit_review", "arguments": "{\"is_bug\": false}" }
                    }]
                }
            }]
        });
        let parsed = parse_function_response(&response).unwrap();

        assert_eq!(
            parsed.output,
            QueryOutput::FunctionCall {
                name: "submit_review".to_string(),
                arguments: json!({ "is_bug": false }),
            }
        );
        assert_eq!(parsed.prompt_tokens, 0);
    }

    #[test]
    fn test_parse_function_response_without_call() {
        let response = json!({
            "choices": [{ "message": { "role": "assistant", "content": "no tools here" } }]
        });
        assert!(matches!(
            parse_function_response(&response),
            Err(QueryError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_empty_choices() {
        let response = json!({ "choices": [] });
        assert!(matches!(
            parse_text_response(&response),
            Err(QueryError::EmptyResponse)
        ));
    }

    #[test]
    fn test_api_base_trailing_slash() {
        let client = OpenAiClient::new("http://localhost:4000/v1/", None);
        assert_eq!(client.api_base(), "http://localhost:4000/v1");
    }
}
