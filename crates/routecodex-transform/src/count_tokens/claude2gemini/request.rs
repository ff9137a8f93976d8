use routecodex_protocol::claude::count_tokens::request::CountTokensRequest as ClaudeCountTokensRequest;
use routecodex_protocol::claude::create_message::request::{
    CreateMessageRequest as ClaudeCreateMessageRequest,
    CreateMessageRequestBody as ClaudeCreateMessageRequestBody,
};
use routecodex_protocol::gemini::count_tokens::request::{
    CountTokensPath as GeminiCountTokensPath, CountTokensRequest as GeminiCountTokensRequest,
    CountTokensRequestBody as GeminiCountTokensRequestBody,
};

use crate::generate_content::claude2gemini;

/// Gemini's countTokens endpoint accepts a full embedded generateContentRequest, so we
/// route through the existing create-message-to-generateContent transform instead of
/// duplicating its content/tool mapping.
pub fn transform_request(request: ClaudeCountTokensRequest) -> GeminiCountTokensRequest {
    let synthetic = ClaudeCreateMessageRequest {
        headers: request.headers,
        body: ClaudeCreateMessageRequestBody {
            max_tokens: 1,
            messages: request.body.messages,
            model: request.body.model,
            container: None,
            context_management: request.body.context_management,
            mcp_servers: request.body.mcp_servers,
            metadata: None,
            output_config: request.body.output_config,
            output_format: request.body.output_format,
            service_tier: None,
            stop_sequences: None,
            stream: None,
            system: request.body.system,
            temperature: None,
            thinking: request.body.thinking,
            tool_choice: request.body.tool_choice,
            tools: request.body.tools,
            top_k: None,
            top_p: None,
        },
    };

    let generated = claude2gemini::request::transform_request(synthetic);

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
