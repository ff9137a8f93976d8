use bytes::Bytes;

use routecodex_provider_core::{
    Credential, DispatchRule, DispatchTable, HttpMethod, Proto, ProviderConfig, ProviderError,
    ProviderResult, UpstreamCtx, UpstreamHttpRequest, UpstreamProvider,
    credential::ApiKeyCredential,
};

use crate::auth_extractor;

const PROVIDER_NAME: &str = "lmstudio";
const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";

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
    // OpenAI Responses (transform down to chat completions; most local
    // runtimes never implement the Responses surface)
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    // OpenAI basic ops
    DispatchRule::Unsupported,
    DispatchRule::Native,
    DispatchRule::Native,
    // OAuth / usage: local server has neither
    DispatchRule::Unsupported,
    DispatchRule::Unsupported,
    DispatchRule::Unsupported,
]);

#[derive(Debug, Default)]
pub struct LmStudioProvider;

impl LmStudioProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for LmStudioProvider {
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
        let base_url = lmstudio_base_url(config)?;
        let url = build_url(&base_url, "/chat/completions");
        let is_stream = req.body.stream.unwrap_or(false);
        let body =
            serde_json::to_vec(&req.body).map_err(|err| ProviderError::Other(err.to_string()))?;
        let mut headers = Vec::new();
        if let Some(key) = lmstudio_api_key(credential)? {
            auth_extractor::set_bearer(&mut headers, key);
        }
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
        let base_url = lmstudio_base_url(config)?;
        let url = build_url(&base_url, "/models");
        let mut headers = Vec::new();
        if let Some(key) = lmstudio_api_key(credential)? {
            auth_extractor::set_bearer(&mut headers, key);
        }
        auth_extractor::set_accept_json(&mut headers);
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Get,
            url,
            headers,
            body: None,
            is_stream: false,
        })
    }

    async fn build_openai_models_get(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        req: &routecodex_protocol::openai::get_model::request::GetModelRequest,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let base_url = lmstudio_base_url(config)?;
        let url = build_url(&base_url, &format!("/models/{}", req.path.model));
        let mut headers = Vec::new();
        if let Some(key) = lmstudio_api_key(credential)? {
            auth_extractor::set_bearer(&mut headers, key);
        }
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
}

fn lmstudio_base_url(config: &ProviderConfig) -> ProviderResult<String> {
    match config {
        ProviderConfig::LmStudio(cfg) => Ok(cfg
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())),
        _ => Err(ProviderError::InvalidConfig(
            "expected ProviderConfig::LmStudio".to_string(),
        )),
    }
}

/// LM Studio's local server runs with no auth by default; an empty key is
/// treated as "send no Authorization header" rather than an error.
fn lmstudio_api_key(credential: &Credential) -> ProviderResult<Option<&str>> {
    match credential {
        Credential::LmStudio(ApiKeyCredential { api_key }) if !api_key.trim().is_empty() => {
            Ok(Some(api_key.as_str()))
        }
        Credential::LmStudio(ApiKeyCredential { .. }) => Ok(None),
        _ => Err(ProviderError::InvalidConfig(
            "expected Credential::LmStudio".to_string(),
        )),
    }
}

fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/{}", path.trim_start_matches('/'))
}
