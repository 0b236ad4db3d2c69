//! Model query strategies for LLM-backed agents.
//!
//! Agents ask a model for either free text or a structured function call. The
//! choice is made per agent through `query_strategy` in its `config.yaml`:
//!
//! ```text
//! plain             → chat completion, text back
//! function_calling  → chat completion with one tool, forced call, JSON back
//! ```
//!
//! The launcher exports the choice to the agent as `QUERY_STRATEGY`.
//!
//! Both strategies talk to an OpenAI-compatible endpoint through
//! [`OpenAiClient`].

pub mod client;

pub use client::{FunctionCallingQuery, OpenAiClient, PlainQuery};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Which query implementation an agent uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStrategy {
    #[default]
    Plain,
    FunctionCalling,
}

impl std::fmt::Display for QueryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryStrategy::Plain => write!(f, "plain"),
            QueryStrategy::FunctionCalling => write!(f, "function_calling"),
        }
    }
}

impl std::str::FromStr for QueryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(QueryStrategy::Plain),
            "function_calling" | "function-calling" => Ok(QueryStrategy::FunctionCalling),
            other => Err(format!(
                "unknown query strategy '{}' (expected plain or function_calling)",
                other
            )),
        }
    }
}

/// A function the model is asked to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: serde_json::Value,
}

/// One query to a model.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub model: String,
    pub system_message: Option<String>,
    pub user_message: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Only honoured by [`QueryStrategy::FunctionCalling`].
    pub function: Option<FunctionSpec>,
}

impl QueryRequest {
    /// Creates a request for `model` with no messages.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_message: None,
            user_message: None,
            temperature: None,
            max_tokens: None,
            function: None,
        }
    }

    /// Sets the system message.
    pub fn with_system(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Sets the user message.
    pub fn with_user(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the completion token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the function the model should call.
    pub fn with_function(mut self, function: FunctionSpec) -> Self {
        self.function = Some(function);
        self
    }
}

/// What a model returned.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Text(String),
    FunctionCall {
        name: String,
        arguments: serde_json::Value,
    },
}

impl QueryOutput {
    /// Returns the text, if this is a text answer.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            QueryOutput::Text(text) => Some(text),
            QueryOutput::FunctionCall { .. } => None,
        }
    }
}

/// Result of one query with its token accounting.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub output: QueryOutput,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Strategy for asking a model.
#[async_trait]
pub trait ModelQuery: Send + Sync {
    /// Strategy this implementation provides.
    fn strategy(&self) -> QueryStrategy;

    /// Sends one query.
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, QueryError>;
}

/// Builds the query implementation selected by `strategy`.
pub fn create_query(strategy: QueryStrategy, client: OpenAiClient) -> Box<dyn ModelQuery> {
    match strategy {
        QueryStrategy::Plain => Box::new(PlainQuery::new(client)),
        QueryStrategy::FunctionCalling => Box::new(FunctionCallingQuery::new(client)),
    }
}
