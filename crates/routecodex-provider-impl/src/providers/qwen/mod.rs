use bytes::Bytes;

use routecodex_provider_core::{
    Credential, DispatchRule, DispatchTable, HttpMethod, Proto, ProviderConfig, ProviderError,
    ProviderResult, UpstreamCtx, UpstreamHttpRequest, UpstreamProvider,
    credential::DeviceOAuthCredential,
};

use crate::auth_extractor;

mod oauth;

const PROVIDER_NAME: &str = "qwen";
const DEFAULT_BASE_URL: &str = "https://portal.qwen.ai/v1";

const DISPATCH_TABLE: DispatchTable = DispatchTable::new([
    // Claude
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    // Gemini
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    // OpenAI chat completions
    DispatchRule::Native,
    DispatchRule::Native,
    // OpenAI Responses (transform down to chat completions)
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    // OpenAI basic ops
    DispatchRule::Unsupported,
    DispatchRule::Native,
    DispatchRule::Unsupported,
    // OAuth start/callback (device code), usage unsupported
    DispatchRule::Native,
    DispatchRule::Native,
    DispatchRule::Unsupported,
]);

#[derive(Debug, Default)]
pub struct QwenProvider;

impl QwenProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for QwenProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn dispatch_table(&self, _config: &ProviderConfig) -> DispatchTable {
        DISPATCH_TABLE
    }

    async fn build_openai_chat(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        req: &routecodex_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let base_url = qwen_base_url(config, credential)?;
        let access_token = qwen_access_token(credential)?;
        let url = build_url(&base_url, "/chat/completions");
        let is_stream = req.body.stream.unwrap_or(false);
        let body =
            serde_json::to_vec(&req.body).map_err(|err| ProviderError::Other(err.to_string()))?;
        let mut headers = Vec::new();
        auth_extractor::set_bearer(&mut headers, access_token);
        auth_extractor::set_accept_json(&mut headers);
        auth_extractor::set_content_type_json(&mut headers);
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(Bytes::from(body)),
            is_stream,
        })
    }

    async fn build_openai_models_list(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        _req: &routecodex_protocol::openai::list_models::request::ListModelsRequest,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let base_url = qwen_base_url(config, credential)?;
        let access_token = qwen_access_token(credential)?;
        let url = build_url(&base_url, "/models");
        let mut headers = Vec::new();
        auth_extractor::set_bearer(&mut headers, access_token);
        auth_extractor::set_accept_json(&mut headers);
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Get,
            url,
            headers,
            body: None,
            is_stream: false,
        })
    }

    fn decide_unavailable(
        &self,
        ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        req: &routecodex_provider_core::Request,
        failure: &routecodex_provider_core::provider::UpstreamFailure,
    ) -> Option<routecodex_provider_core::provider::UnavailableDecision> {
        let _ = (ctx, config, credential, req);
        routecodex_provider_core::provider::default_decide_unavailable(failure)
    }

    fn oauth_start(
        &self,
        ctx: &UpstreamCtx,
        config: &ProviderConfig,
        req: &routecodex_provider_core::OAuthStartRequest,
    ) -> ProviderResult<routecodex_provider_core::UpstreamHttpResponse> {
        oauth::oauth_start(ctx, config, req)
    }

    fn oauth_callback(
        &self,
        ctx: &UpstreamCtx,
        config: &ProviderConfig,
        req: &routecodex_provider_core::OAuthCallbackRequest,
    ) -> ProviderResult<routecodex_provider_core::OAuthCallbackResult> {
        oauth::oauth_callback(ctx, config, req)
    }

    fn on_auth_failure<'a>(
        &'a self,
        ctx: &'a UpstreamCtx,
        _config: &'a ProviderConfig,
        credential: &'a Credential,
        _req: &'a routecodex_provider_core::Request,
        _failure: &'a routecodex_provider_core::provider::UpstreamFailure,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = ProviderResult<routecodex_provider_core::AuthRetryAction>>
                + Send
                + 'a,
        >,
    > {
        oauth::on_auth_failure(ctx, credential)
    }
}

pub(crate) fn qwen_base_url<'a>(
    config: &'a ProviderConfig,
    credential: &'a Credential,
) -> ProviderResult<String> {
    let configured = match config {
        ProviderConfig::Qwen(cfg) => cfg.base_url.clone(),
        _ => {
            return Err(ProviderError::InvalidConfig(
                "expected ProviderConfig::Qwen".to_string(),
            ));
        }
    };
    if let Some(base) = configured {
        return Ok(base);
    }
    match credential {
        Credential::Qwen(DeviceOAuthCredential {
            resource_url: Some(url),
            ..
        }) if !url.trim().is_empty() => Ok(url.clone()),
        _ => Ok(DEFAULT_BASE_URL.to_string()),
    }
}

fn qwen_access_token(credential: &Credential) -> ProviderResult<&str> {
    match credential {
        Credential::Qwen(DeviceOAuthCredential { access_token, .. }) => Ok(access_token.as_str()),
        _ => Err(ProviderError::InvalidConfig(
            "expected Credential::Qwen".to_string(),
        )),
    }
}

fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/{}", path.trim_start_matches('/'))
}
