use routecodex_protocol::gemini::count_tokens::request::{
    CountTokensPath as GeminiCountTokensPath, CountTokensRequest as GeminiCountTokensRequest,
    CountTokensRequestBody as GeminiCountTokensRequestBody,
};
use routecodex_protocol::openai::count_tokens::request::InputTokenCountRequest as OpenAIInputTokenCountRequest;
use routecodex_protocol::openai::create_response::request::{
    CreateResponseRequest as OpenAICreateResponseRequest,
    CreateResponseRequestBody as OpenAICreateResponseRequestBody,
};

use crate::generate_content::openai_response2gemini;

/// OpenAI's input-tokens endpoint mirrors the Responses request shape, so we
/// route through the existing Responses-to-generateContent transform.
pub fn transform_request(request: OpenAIInputTokenCountRequest) -> GeminiCountTokensRequest {
    let synthetic = OpenAICreateResponseRequest {
        body: OpenAICreateResponseRequestBody {
            model: request.body.model,
            input: request.body.input,
            include: None,
            parallel_tool_calls: request.body.parallel_tool_calls,
            store: None,
            instructions: request.body.instructions,
            stream: None,
            stream_options: None,
            conversation: request.body.conversation,
            previous_response_id: request.body.previous_response_id,
            reasoning: request.body.reasoning,
            context_management: None,
            background: None,
            max_output_tokens: None,
            max_tool_calls: None,
            text: request.body.text,
            tools: request.body.tools,
            tool_choice: request.body.tool_choice,
            prompt: None,
            truncation: request.body.truncation,
            top_logprobs: None,
            metadata: None,
            temperature: None,
            top_p: None,
            user: None,
            safety_identifier: None,
            prompt_cache_key: None,
            service_tier: None,
            prompt_cache_retention: None,
        },
    };

    let generated = openai_response2gemini::request::transform_request(synthetic);

    GeminiCountTokensRequest {
        path: GeminiCountTokensPath {
            model: generated.path.model,
        },
        body: GeminiCountTokensRequestBody {
            contents: None,
            generate_content_request: Some(
                serde_json::to_value(&generated.body).unwrap_or(serde_json::Value::Null),
            ),
        },
    }
}
