use routecodex_protocol::gemini::count_tokens::request::CountTokensRequest as GeminiCountTokensRequest;
use routecodex_protocol::gemini::generate_content::request::{
    GenerateContentPath as GeminiGenerateContentPath,
    GenerateContentRequest as GeminiGenerateContentRequest,
    GenerateContentRequestBody as GeminiGenerateContentRequestBody,
};
use routecodex_protocol::openai::count_tokens::request::{
    InputTokenCountRequest as OpenAIInputTokenCountRequest,
    InputTokenCountRequestBody as OpenAIInputTokenCountRequestBody,
};

use crate::generate_content::gemini2openai_response;

/// OpenAI's input-tokens endpoint mirrors the Responses request shape, so we
/// route through the existing generateContent-to-Responses transform.
pub fn transform_request(request: GeminiCountTokensRequest) -> OpenAIInputTokenCountRequest {
    let embedded: Option<GeminiGenerateContentRequestBody> = request
        .body
        .generate_content_request
        .and_then(|value| serde_json::from_value(value).ok());

    let body = match embedded {
        Some(body) => body,
        None => GeminiGenerateContentRequestBody {
            contents: request.body.contents.unwrap_or_default(),
            model: None,
            tools: None,
            tool_config: None,
            safety_settings: None,
            system_instruction: None,
            generation_config: None,
            cached_content: None,
        },
    };

    let synthetic = GeminiGenerateContentRequest {
        path: GeminiGenerateContentPath {
            model: request.path.model,
        },
        body,
    };

    let response_request = gemini2openai_response::request::transform_request(synthetic);

    OpenAIInputTokenCountRequest {
        body: OpenAIInputTokenCountRequestBody {
            model: response_request.body.model,
            input: response_request.body.input,
            previous_response_id: response_request.body.previous_response_id,
            tools: response_request.body.tools,
            text: response_request.body.text,
            reasoning: response_request.body.reasoning,
            truncation: response_request.body.truncation,
            instructions: response_request.body.instructions,
            conversation: response_request.body.conversation,
            tool_choice: response_request.body.tool_choice,
            parallel_tool_calls: response_request.body.parallel_tool_calls,
        },
    }
}
