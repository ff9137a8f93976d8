use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use routecodex_provider_core::credential::IFlowCredential;
use routecodex_provider_core::{
    AuthRetryAction, Credential, OAuthCallbackRequest, OAuthCallbackResult, OAuthCredential,
    OAuthStartRequest, ProviderConfig, ProviderError, ProviderResult, UpstreamCtx,
    UpstreamHttpResponse,
};

use crate::providers::http_client::{SharedClientKind, client_for_ctx};
use crate::providers::oauth_common::{
    block_on, first_i64_field, first_str_field, generate_pkce_pair, generate_state,
    is_permanent_oauth_error, parse_query_value, resolve_manual_code_and_state,
    unwrap_oauth_response,
};

const DEVICE_CODE_URL: &str = "https://iflow.cn/oauth/device/code";
const TOKEN_URL: &str = "https://iflow.cn/oauth/token";
const AUTHORIZE_URL: &str = "https://iflow.cn/oauth/authorize";
const CLIENT_ID: &str = "10009311001";
const DEVICE_SCOPE: &str = "openid profile model.completion";
const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const MANUAL_REDIRECT_URI: &str = "http://localhost:51122/oauth-callback";
const OAUTH_STATE_TTL_SECS: u64 = 600;

#[derive(Debug)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    verification_uri_complete: Option<String>,
    expires_in: Option<i64>,
    interval: Option<i64>,
}

impl DeviceCodeResponse {
    fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|err| err.to_string())?;
        let value = unwrap_oauth_response(&value);
        let device_code = first_str_field(value, &["device_code", "deviceCode"])
            .ok_or("missing device_code")?
            .to_string();
        let user_code = first_str_field(value, &["user_code", "userCode"])
            .ok_or("missing user_code")?
            .to_string();
        let verification_uri =
            first_str_field(value, &["verification_uri", "verification_url", "verificationUri"])
                .ok_or("missing verification_uri")?
                .to_string();
        let verification_uri_complete = first_str_field(
            value,
            &["verification_uri_complete", "verificationUriComplete"],
        )
        .map(str::to_string);
        Ok(Self {
            device_code,
            user_code,
            verification_uri,
            verification_uri_complete,
            expires_in: first_i64_field(value, &["expires_in", "expiresIn"]),
            interval: first_i64_field(value, &["interval"]),
        })
    }
}

#[derive(Debug)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    api_key: Option<String>,
}

impl TokenResponse {
    fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|err| err.to_string())?;
        let value = unwrap_oauth_response(&value);
        let access_token = first_str_field(value, &["access_token", "accessToken"])
            .ok_or("missing access_token")?
            .to_string();
        Ok(Self {
            access_token,
            refresh_token: first_str_field(value, &["refresh_token", "refreshToken"])
                .map(str::to_string),
            expires_in: first_i64_field(value, &["expires_in", "expiresIn"]),
            api_key: first_str_field(value, &["api_key", "apiKey"]).map(str::to_string),
        })
    }
}

fn token_error_code(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    let value = unwrap_oauth_response(&value);
    first_str_field(value, &["error", "error_code", "code"]).map(str::to_string)
}

/// Pending PKCE state for the authorization-code ("web") login style, keyed
/// by `state`. iFlow's web style may omit `code_verifier` on exchange, so it
/// is carried but not required.
#[derive(Debug)]
struct WebOAuthState {
    redirect_uri: String,
    created_at: Instant,
    code_verifier: String,
}

static WEB_OAUTH_STATES: OnceLock<Mutex<HashMap<String, WebOAuthState>>> = OnceLock::new();

fn web_oauth_states() -> &'static Mutex<HashMap<String, WebOAuthState>> {
    WEB_OAUTH_STATES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn prune_web_oauth_states(states: &mut HashMap<String, WebOAuthState>) {
    let now = Instant::now();
    states.retain(|_, entry| {
        now.duration_since(entry.created_at) <= Duration::from_secs(OAUTH_STATE_TTL_SECS)
    });
}

/// Starts either the device-code flow (default) or, when `mode=web` is
/// present in the start request's query, the authorization-code+PKCE web
/// login style.
pub(super) fn oauth_start(
    ctx: &UpstreamCtx,
    _config: &ProviderConfig,
    req: &OAuthStartRequest,
) -> ProviderResult<UpstreamHttpResponse> {
    if parse_query_value(req.query.as_deref(), "mode").as_deref() == Some("web") {
        return web_oauth_start(req);
    }
    let device = request_device_code(ctx)?;
    Ok(json_response(serde_json::json!({
        "device_code": device.device_code,
        "user_code": device.user_code,
        "verification_uri": device.verification_uri,
        "verification_uri_complete": device.verification_uri_complete,
        "expires_in": device.expires_in,
        "interval": device.interval.unwrap_or(5),
        "mode": "device_code",
        "instructions": "Open verification_uri_complete, approve, then poll /oauth/callback with device_code.",
    })))
}

fn web_oauth_start(req: &OAuthStartRequest) -> ProviderResult<UpstreamHttpResponse> {
    let redirect_uri = parse_query_value(req.query.as_deref(), "redirect")
        .or_else(|| parse_query_value(req.query.as_deref(), "redirect_uri"))
        .unwrap_or_else(|| MANUAL_REDIRECT_URI.to_string());
    let state = generate_state();
    let pkce = generate_pkce_pair();
    let auth_url = build_authorize_url(&redirect_uri, &state, &pkce.challenge);

    let mut guard = web_oauth_states()
        .lock()
        .map_err(|_| ProviderError::Other("oauth state lock failed".to_string()))?;
    prune_web_oauth_states(&mut guard);
    guard.insert(
        state.clone(),
        WebOAuthState {
            redirect_uri: redirect_uri.clone(),
            created_at: Instant::now(),
            code_verifier: pkce.verifier,
        },
    );

    Ok(json_response(serde_json::json!({
        "auth_url": auth_url,
        "state": state,
        "redirect_uri": redirect_uri,
        "mode": "web",
        "instructions": "Open auth_url, then submit code (or callback_url) to /oauth/callback.",
    })))
}

fn build_authorize_url(redirect_uri: &str, state: &str, code_challenge: &str) -> String {
    let params = [
        ("response_type", "code"),
        ("client_id", CLIENT_ID),
        ("redirect", redirect_uri),
        ("scope", DEVICE_SCOPE),
        ("code_challenge_method", "S256"),
        ("code_challenge", code_challenge),
        ("state", state),
    ];
    let qs = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", AUTHORIZE_URL, qs)
}

pub(super) fn oauth_callback(
    ctx: &UpstreamCtx,
    _config: &ProviderConfig,
    req: &OAuthCallbackRequest,
) -> ProviderResult<OAuthCallbackResult> {
    if parse_query_value(req.query.as_deref(), "state").is_some()
        || parse_query_value(req.query.as_deref(), "callback_url").is_some()
    {
        return web_oauth_callback(ctx, req);
    }
    let Some(device_code) = parse_query_value(req.query.as_deref(), "device_code") else {
        return Ok(OAuthCallbackResult {
            response: json_error(400, "missing device_code"),
            credential: None,
        });
    };

    match poll_device_token(ctx, &device_code) {
        Ok(tokens) => Ok(OAuthCallbackResult {
            response: json_response(serde_json::json!({
                "access_token": tokens.access_token,
                "api_key": tokens.api_key,
            })),
            credential: Some(credential_from_tokens(&tokens)),
        }),
        Err(PollError::Pending(code)) => Ok(OAuthCallbackResult {
            response: json_response(serde_json::json!({ "status": code })),
            credential: None,
        }),
        Err(PollError::Other(msg)) => Ok(OAuthCallbackResult {
            response: json_error(400, &msg),
            credential: None,
        }),
    }
}

fn web_oauth_callback(
    ctx: &UpstreamCtx,
    req: &OAuthCallbackRequest,
) -> ProviderResult<OAuthCallbackResult> {
    if let Some(error) = parse_query_value(req.query.as_deref(), "error") {
        let detail = parse_query_value(req.query.as_deref(), "error_description").unwrap_or(error);
        return Ok(OAuthCallbackResult {
            response: json_error(400, &detail),
            credential: None,
        });
    }
    let (code, state_param) = match resolve_manual_code_and_state(req.query.as_deref()) {
        Ok(v) => v,
        Err(msg) => {
            return Ok(OAuthCallbackResult {
                response: json_error(400, msg),
                credential: None,
            });
        }
    };

    let (oauth_state, ambiguous_state) = {
        let mut guard = web_oauth_states()
            .lock()
            .map_err(|_| ProviderError::Other("oauth state lock failed".to_string()))?;
        prune_web_oauth_states(&mut guard);
        if let Some(state_id) = state_param.as_deref() {
            (guard.remove(state_id), false)
        } else if guard.len() == 1 {
            let key = guard.keys().next().cloned();
            (key.and_then(|state_id| guard.remove(&state_id)), false)
        } else {
            (None, !guard.is_empty())
        }
    };
    if ambiguous_state {
        return Ok(OAuthCallbackResult {
            response: json_error(400, "ambiguous_state"),
            credential: None,
        });
    }
    let Some(oauth_state) = oauth_state else {
        return Ok(OAuthCallbackResult {
            response: json_error(400, "missing state"),
            credential: None,
        });
    };

    let tokens = exchange_code_for_tokens(
        ctx,
        &code,
        &oauth_state.redirect_uri,
        Some(&oauth_state.code_verifier),
    )?;
    Ok(OAuthCallbackResult {
        response: json_response(serde_json::json!({
            "access_token": tokens.access_token,
            "api_key": tokens.api_key,
        })),
        credential: Some(credential_from_tokens(&tokens)),
    })
}

fn credential_from_tokens(tokens: &TokenResponse) -> OAuthCredential {
    OAuthCredential {
        name: Some("iflow:device".to_string()),
        settings_json: None,
        credential: Credential::IFlow(IFlowCredential {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone().unwrap_or_default(),
            expires_at: tokens.expires_in.map(|v| v + now()).unwrap_or(now() + 3600),
            api_key: tokens.api_key.clone(),
        }),
    }
}

pub(super) fn on_auth_failure<'a>(
    ctx: &'a UpstreamCtx,
    credential: &'a Credential,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ProviderResult<AuthRetryAction>> + Send + 'a>>
{
    Box::pin(async move {
        let (refresh_token, previous_expires_at) = match credential {
            Credential::IFlow(cred) if !cred.refresh_token.is_empty() => {
                (cred.refresh_token.clone(), cred.expires_at)
            }
            // A static API key has nothing to refresh; surface the failure as-is.
            _ => return Ok(AuthRetryAction::None),
        };

        // iFlow permits only a single refresh attempt per failure; unlike Qwen's
        // linear backoff, a failed refresh here is always terminal for this call.
        let coordinator = routecodex_provider_core::credential::single_flight::global();
        let credential = credential.clone();
        let result = coordinator
            .run(
                "iflow",
                &refresh_token,
                || match &credential {
                    Credential::IFlow(cred) if cred.expires_at != previous_expires_at => {
                        Some(credential.clone())
                    }
                    _ => None,
                },
                || async move {
                    let tokens = refresh_access_token(ctx, &refresh_token).await?;
                    let mut updated = credential.clone();
                    if let Credential::IFlow(cred) = &mut updated {
                        cred.access_token = tokens.access_token;
                        if let Some(refresh) = tokens.refresh_token {
                            cred.refresh_token = refresh;
                        }
                        cred.expires_at =
                            tokens.expires_in.map(|v| v + now()).unwrap_or(cred.expires_at);
                        if tokens.api_key.is_some() {
                            cred.api_key = tokens.api_key;
                        }
                    }
                    Ok(updated)
                },
            )
            .await;

        result.map(|updated| AuthRetryAction::UpdateCredential(Box::new(updated)))
    })
}

enum PollError {
    Pending(String),
    Other(String),
}

fn request_device_code(ctx: &UpstreamCtx) -> ProviderResult<DeviceCodeResponse> {
    block_on(async move {
        let client = client_for_ctx(ctx, SharedClientKind::Global)?;
        let body = format!(
            "client_id={}&scope={}",
            urlencoding::encode(CLIENT_ID),
            urlencoding::encode(DEVICE_SCOPE),
        );
        let resp = client
            .post(DEVICE_CODE_URL)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Other(format!(
                "device_code_request_failed: {status} {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        DeviceCodeResponse::from_bytes(&bytes).map_err(ProviderError::Other)
    })
}

fn poll_device_token(ctx: &UpstreamCtx, device_code: &str) -> Result<TokenResponse, PollError> {
    block_on(async move {
        let client = client_for_ctx(ctx, SharedClientKind::Global)
            .map_err(|err| PollError::Other(err.to_string()))?;
        let body = format!(
            "grant_type={}&client_id={}&device_code={}",
            urlencoding::encode(GRANT_TYPE_DEVICE_CODE),
            urlencoding::encode(CLIENT_ID),
            urlencoding::encode(device_code),
        );
        let resp = client
            .post(TOKEN_URL)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| PollError::Other(err.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| PollError::Other(err.to_string()))?;
        if status.is_success() {
            return TokenResponse::from_bytes(&bytes).map_err(PollError::Other);
        }
        if let Some(code) = token_error_code(&bytes)
            && matches!(code.as_str(), "authorization_pending" | "slow_down")
        {
            return Err(PollError::Pending(code));
        }
        Err(PollError::Other(format!(
            "device_token_poll_failed: {status} {}",
            String::from_utf8_lossy(&bytes)
        )))
    })
}

async fn refresh_access_token(ctx: &UpstreamCtx, refresh_token: &str) -> ProviderResult<TokenResponse> {
    let client = client_for_ctx(ctx, SharedClientKind::Global)?;
    let body = format!(
        "grant_type=refresh_token&client_id={}&refresh_token={}",
        urlencoding::encode(CLIENT_ID),
        urlencoding::encode(refresh_token),
    );
    let resp = client
        .post(TOKEN_URL)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    if !status.is_success() {
        if let Some(code) = token_error_code(&bytes)
            && is_permanent_oauth_error(&code)
        {
            return Err(ProviderError::OAuthPermanent(code));
        }
        return Err(ProviderError::Other(format!(
            "refresh_token_failed: {status} {}",
            String::from_utf8_lossy(&bytes)
        )));
    }
    TokenResponse::from_bytes(&bytes).map_err(ProviderError::Other)
}

/// Exchanges an authorization code for tokens. iFlow's web login style may
/// omit `code_verifier` on exchange, so it is passed only when present.
fn exchange_code_for_tokens(
    ctx: &UpstreamCtx,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&str>,
) -> ProviderResult<TokenResponse> {
    block_on(async move {
        let client = client_for_ctx(ctx, SharedClientKind::Global)?;
        let mut body = format!(
            "code={}&client_id={}&redirect={}&grant_type=authorization_code",
            urlencoding::encode(code),
            urlencoding::encode(CLIENT_ID),
            urlencoding::encode(redirect_uri),
        );
        if let Some(verifier) = code_verifier {
            body.push_str(&format!("&code_verifier={}", urlencoding::encode(verifier)));
        }
        let resp = client
            .post(TOKEN_URL)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Other(format!(
                "oauth_token_failed: {status} {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        TokenResponse::from_bytes(&bytes).map_err(ProviderError::Other)
    })
}

/// iFlow sometimes answers an expired-token condition with HTTP 200 and a
/// business-level error body (`{"status":"439","msg":"...token has expired..."}`)
/// instead of HTTP 401. Detect that shape so callers can treat it as an auth
/// failure rather than a successful response.
pub(crate) fn is_expired_token_business_error(status: u16, body: &[u8]) -> bool {
    if status != 200 {
        return false;
    }
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return false;
    };
    let code = value.get("status").and_then(|v| v.as_str());
    let msg = value
        .get("msg")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    code == Some("439") || msg.to_ascii_lowercase().contains("token has expired")
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn json_response(value: serde_json::Value) -> UpstreamHttpResponse {
    use bytes::Bytes;
    use routecodex_provider_core::{UpstreamBody, header_set};
    let bytes = serde_json::to_vec(&value).unwrap_or_default();
    let mut headers = Vec::new();
    header_set(&mut headers, "content-type", "application/json");
    UpstreamHttpResponse {
        status: 200,
        headers,
        body: UpstreamBody::Bytes(Bytes::from(bytes)),
    }
}

fn json_error(status: u16, message: &str) -> UpstreamHttpResponse {
    use bytes::Bytes;
    use routecodex_provider_core::{UpstreamBody, header_set};
    let value = serde_json::json!({ "error": message });
    let bytes = serde_json::to_vec(&value).unwrap_or_default();
    let mut headers = Vec::new();
    header_set(&mut headers, "content-type", "application/json");
    UpstreamHttpResponse {
        status,
        headers,
        body: UpstreamBody::Bytes(Bytes::from(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceCodeResponse, TokenResponse, build_authorize_url, token_error_code};

    #[test]
    fn device_code_response_tolerates_result_wrapper() {
        let body = serde_json::json!({
            "result": {
                "device_code": "dc-2",
                "user_code": "WXYZ-9876",
                "verificationUri": "https://iflow.cn/device",
            }
        });
        let parsed = DeviceCodeResponse::from_bytes(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(parsed.device_code, "dc-2");
        assert_eq!(parsed.verification_uri, "https://iflow.cn/device");
    }

    #[test]
    fn token_response_reads_api_key_alias() {
        let body = serde_json::json!({"accessToken": "tok", "apiKey": "sk-live"});
        let parsed = TokenResponse::from_bytes(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(parsed.access_token, "tok");
        assert_eq!(parsed.api_key.as_deref(), Some("sk-live"));
    }

    #[test]
    fn token_error_code_tolerates_bare_shape() {
        let body = serde_json::json!({"error_code": "invalid_grant"});
        let code = token_error_code(&serde_json::to_vec(&body).unwrap());
        assert_eq!(code.as_deref(), Some("invalid_grant"));
    }

    #[test]
    fn authorize_url_uses_redirect_param_not_redirect_uri() {
        let url = build_authorize_url("http://localhost:51122/oauth-callback", "st1", "chal1");
        assert!(url.contains("redirect=http"));
        assert!(!url.contains("redirect_uri="));
        assert!(url.contains("state=st1"));
        assert!(url.contains("code_challenge=chal1"));
    }
}
