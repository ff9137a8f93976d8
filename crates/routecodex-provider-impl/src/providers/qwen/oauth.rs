use std::time::{SystemTime, UNIX_EPOCH};

use routecodex_provider_core::credential::DeviceOAuthCredential;
use routecodex_provider_core::{
    AuthRetryAction, Credential, OAuthCallbackRequest, OAuthCallbackResult, OAuthCredential,
    OAuthStartRequest, ProviderConfig, ProviderError, ProviderResult, UpstreamCtx,
    UpstreamHttpResponse,
};

use crate::providers::http_client::{SharedClientKind, client_for_ctx};
use crate::providers::oauth_common::{
    block_on, first_i64_field, first_str_field, is_permanent_oauth_error, parse_query_value,
    unwrap_oauth_response,
};

const DEVICE_CODE_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/device/code";
const TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";
const DEVICE_SCOPE: &str = "openid profile email model.completion";
const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

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
    /// Qwen's device/device_code endpoint is tolerant-parsed the same way the
    /// token endpoint is: unwrap a `data`/`result` envelope if present, accept
    /// `verification_uri`/`verification_url` aliasing.
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
    resource_url: Option<String>,
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
            resource_url: first_str_field(value, &["resource_url", "resourceUrl"])
                .map(str::to_string),
        })
    }
}

fn token_error_code(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    let value = unwrap_oauth_response(&value);
    first_str_field(value, &["error", "error_code", "code"]).map(str::to_string)
}

/// Starts the device-code flow: requests a user/verification code pair from
/// Qwen and hands the caller the device code so it can poll `oauth_callback`.
pub(super) fn oauth_start(
    ctx: &UpstreamCtx,
    _config: &ProviderConfig,
    _req: &OAuthStartRequest,
) -> ProviderResult<UpstreamHttpResponse> {
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

/// Polls the token endpoint once with the caller-supplied `device_code`.
/// Qwen returns `authorization_pending` until the user approves; the caller
/// is expected to retry this call on that specific error.
pub(super) fn oauth_callback(
    ctx: &UpstreamCtx,
    _config: &ProviderConfig,
    req: &OAuthCallbackRequest,
) -> ProviderResult<OAuthCallbackResult> {
    let Some(device_code) = parse_query_value(req.query.as_deref(), "device_code") else {
        return Ok(OAuthCallbackResult {
            response: json_error(400, "missing device_code"),
            credential: None,
        });
    };

    match poll_device_token(ctx, &device_code) {
        Ok(tokens) => {
            let credential = OAuthCredential {
                name: Some("qwen:device".to_string()),
                settings_json: None,
                credential: Credential::Qwen(DeviceOAuthCredential {
                    access_token: tokens.access_token.clone(),
                    refresh_token: tokens.refresh_token.clone().unwrap_or_default(),
                    expires_at: tokens.expires_in.map(|v| v + now()).unwrap_or(now() + 3600),
                    resource_url: tokens.resource_url.clone(),
                }),
            };
            Ok(OAuthCallbackResult {
                response: json_response(serde_json::json!({
                    "access_token": tokens.access_token,
                    "resource_url": tokens.resource_url,
                })),
                credential: Some(credential),
            })
        }
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

pub(super) fn on_auth_failure<'a>(
    ctx: &'a UpstreamCtx,
    credential: &'a Credential,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ProviderResult<AuthRetryAction>> + Send + 'a>>
{
    Box::pin(async move {
        let (refresh_token, previous_expires_at) = match credential {
            Credential::Qwen(cred) if !cred.refresh_token.is_empty() => {
                (cred.refresh_token.clone(), cred.expires_at)
            }
            _ => return Ok(AuthRetryAction::None),
        };

        let coordinator = routecodex_provider_core::credential::single_flight::global();
        let credential = credential.clone();
        let result = coordinator
            .run(
                "qwen",
                &refresh_token,
                || match &credential {
                    Credential::Qwen(cred) if cred.expires_at != previous_expires_at => {
                        Some(credential.clone())
                    }
                    _ => None,
                },
                || async move {
                    let tokens = refresh_access_token(ctx, &refresh_token).await?;
                    let mut updated = credential.clone();
                    if let Credential::Qwen(cred) = &mut updated {
                        cred.access_token = tokens.access_token;
                        if let Some(refresh) = tokens.refresh_token {
                            cred.refresh_token = refresh;
                        }
                        cred.expires_at =
                            tokens.expires_in.map(|v| v + now()).unwrap_or(cred.expires_at);
                        if tokens.resource_url.is_some() {
                            cred.resource_url = tokens.resource_url;
                        }
                    }
                    Ok(updated)
                },
            )
            .await;

        match result {
            Ok(updated) => Ok(AuthRetryAction::UpdateCredential(Box::new(updated))),
            Err(ProviderError::OAuthPermanent(code)) => {
                Err(ProviderError::OAuthPermanent(code))
            }
            Err(err) => Err(err),
        }
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
    use super::{DeviceCodeResponse, TokenResponse, token_error_code};

    #[test]
    fn device_code_response_tolerates_data_wrapper_and_camel_case() {
        let body = serde_json::json!({
            "data": {
                "deviceCode": "dc-1",
                "userCode": "ABCD-1234",
                "verification_uri": "https://chat.qwen.ai/device",
                "verificationUriComplete": "https://chat.qwen.ai/device?user_code=ABCD-1234",
                "expiresIn": 600,
            }
        });
        let parsed = DeviceCodeResponse::from_bytes(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(parsed.device_code, "dc-1");
        assert_eq!(parsed.user_code, "ABCD-1234");
        assert_eq!(
            parsed.verification_uri_complete.as_deref(),
            Some("https://chat.qwen.ai/device?user_code=ABCD-1234")
        );
    }

    #[test]
    fn token_response_tolerates_bare_shape() {
        let body = serde_json::json!({"access_token": "tok", "refresh_token": "ref", "expires_in": 3600});
        let parsed = TokenResponse::from_bytes(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(parsed.access_token, "tok");
        assert_eq!(parsed.refresh_token.as_deref(), Some("ref"));
    }

    #[test]
    fn token_error_code_reads_through_result_wrapper() {
        let body = serde_json::json!({"result": {"error": "authorization_pending"}});
        let code = token_error_code(&serde_json::to_vec(&body).unwrap());
        assert_eq!(code.as_deref(), Some("authorization_pending"));
    }
}
