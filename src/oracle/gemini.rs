//! Gemini-backed selection oracle
//!
//! Capabilities are offered as function declarations. Resolved exchanges are
//! replayed as `functionCall` / `functionResponse` pairs so each pass sees
//! the whole turn so far.

use crate::error::OrchestrationError;
use crate::gemini::{
    Content, FunctionDeclaration, GeminiClient, GenerateRequest, GenerationConfig, Part, Tool,
};
use crate::models::{CapabilityCall, TurnRole};
use crate::oracle::{OracleReply, OracleRequest, SelectionOracle};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

pub struct GeminiOracle {
    client: GeminiClient,
    generation: GenerationConfig,
}

impl GeminiOracle {
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            generation: GenerationConfig::default(),
        }
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }
}

#[async_trait]
impl SelectionOracle for GeminiOracle {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn consult(&self, request: &OracleRequest<'_>) -> Result<OracleReply> {
        let body = build_request(request, &self.generation);
        let response = self.client.generate(&body).await?;

        let calls: Vec<CapabilityCall> = response
            .function_calls()
            .into_iter()
            .map(|call| CapabilityCall::new(call.name.clone(), call.args.clone()))
            .collect();

        if !calls.is_empty() {
            debug!(thread_id = request.thread_id, calls = calls.len(), "Gemini requested capabilities");
            return Ok(OracleReply::Invoke(calls));
        }

        let text = response.text();
        if text.is_empty() {
            return Err(OrchestrationError::oracle(format!(
                "empty answer (finish reason: {})",
                response.finish_reason().unwrap_or("unknown")
            )));
        }
        Ok(OracleReply::Answer(text))
    }
}

pub(crate) fn build_request(request: &OracleRequest<'_>, generation: &GenerationConfig) -> GenerateRequest {
    let mut contents: Vec<Content> = request
        .history
        .iter()
        .map(|turn| match turn.role {
            TurnRole::User => Content::user(vec![Part::text(turn.content.clone())]),
            TurnRole::Assistant => Content::model(vec![Part::text(turn.content.clone())]),
        })
        .collect();

    contents.push(Content::user(vec![Part::text(request.user_message)]));

    for exchange in request.exchanges {
        if exchange.outcomes.is_empty() {
            continue;
        }
        contents.push(Content::model(
            exchange
                .outcomes
                .iter()
                .map(|o| Part::call(o.call.name.clone(), o.call.arguments.clone()))
                .collect(),
        ));
        contents.push(Content::user(
            exchange
                .outcomes
                .iter()
                .map(|o| Part::response(o.call.name.clone(), json!({ "content": o.render() })))
                .collect(),
        ));
    }

    let declarations = request
        .capabilities
        .iter()
        .map(|d| FunctionDeclaration {
            name: d.name.clone(),
            description: d.description.clone(),
            parameters: d.takes_arguments().then(|| d.argument_schema.clone()),
        })
        .collect();

    GenerateRequest {
        contents,
        tools: vec![Tool {
            function_declarations: declarations,
        }],
        system_instruction: Some(Content::system(request.system_prompt)),
        generation_config: generation.clone(),
    }
}
