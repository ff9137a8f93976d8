use routecodex_protocol::claude::count_tokens::request::{
    CountTokensRequest as ClaudeCountTokensRequest,
    CountTokensRequestBody as ClaudeCountTokensRequestBody,
};
use routecodex_protocol::gemini::count_tokens::request::CountTokensRequest as GeminiCountTokensRequest;
use routecodex_protocol::gemini::generate_content::request::{
    GenerateContentPath as GeminiGenerateContentPath,
    GenerateContentRequest as GeminiGenerateContentRequest,
    GenerateContentRequestBody as GeminiGenerateContentRequestBody,
};

use crate::generate_content::gemini2claude;

/// Gemini's countTokens body carries either `contents` directly or an embedded
/// `generateContentRequest`; both collapse to the same Content list we already
/// know how to turn into Claude messages.
pub fn transform_request(request: GeminiCountTokensRequest) -> ClaudeCountTokensRequest {
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

    let message = gemini2claude::request::transform_request(synthetic);

    ClaudeCountTokensRequest {
        headers: message.headers,
        body: ClaudeCountTokensRequestBody {
            messages: message.body.messages,
            model: message.body.model,
            system: message.body.system,
            tools: message.body.tools,
            tool_choice: message.body.tool_choice,
            thinking: message.body.thinking,
            output_config: message.body.output_config,
            output_format: message.body.output_format,
            context_management: message.body.context_management,
            mcp_servers: message.body.mcp_servers,
        },
    }
}
