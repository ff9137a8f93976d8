use std::future::Future;

use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A generated PKCE verifier/challenge pair (S256), shared by every
/// authorization-code flow so each provider isn't re-deriving the same
/// base64url/SHA-256 dance.
#[derive(Debug, Clone)]
pub(crate) struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

pub(crate) fn generate_pkce_pair() -> PkcePair {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    let challenge =
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkcePair { verifier, challenge }
}

pub(crate) fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Unwraps a token/device-code response that may arrive bare or nested under
/// `data`/`result`, tolerating either wrapper the upstream happens to use.
pub(crate) fn unwrap_oauth_response(value: &serde_json::Value) -> &serde_json::Value {
    for key in ["data", "result"] {
        if let Some(inner) = value.get(key)
            && inner.is_object()
        {
            return inner;
        }
    }
    value
}

/// Looks up the first present field among several snake/camel-case aliases,
/// e.g. `device_code`/`deviceCode`, tolerating whichever casing an upstream
/// happens to send.
pub(crate) fn first_str_field<'a>(value: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| value.get(*key).and_then(|v| v.as_str()))
}

pub(crate) fn first_i64_field(value: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| value.get(*key).and_then(|v| v.as_i64()))
}

pub(crate) fn parse_query_value(query: Option<&str>, key: &str) -> Option<String> {
    let raw = query?;
    if raw.is_empty() {
        return None;
    }
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut iter = pair.splitn(2, '=');
        let k = iter.next().unwrap_or_default();
        if k.is_empty() || k != key {
            continue;
        }
        let v = iter.next().unwrap_or_default();
        let decoded = urlencoding::decode(v).ok()?;
        let value = decoded.trim();
        if value.is_empty() {
            return None;
        }
        return Some(value.to_string());
    }
    None
}

pub(crate) fn extract_code_state_from_callback_url(
    callback_url: &str,
) -> (Option<String>, Option<String>) {
    let raw = callback_url.trim();
    if raw.is_empty() {
        return (None, None);
    }
    let query = if let Some(idx) = raw.find('?') {
        &raw[idx + 1..]
    } else {
        raw
    };
    let query = query.split('#').next().unwrap_or(query);
    if query.is_empty() {
        return (None, None);
    }
    (
        parse_query_value(Some(query), "code"),
        parse_query_value(Some(query), "state"),
    )
}

pub(crate) fn resolve_manual_code_and_state(
    query: Option<&str>,
) -> Result<(String, Option<String>), &'static str> {
    let mut code = parse_query_value(query, "code");
    let mut state = parse_query_value(query, "state");
    if let Some(callback_url) = parse_query_value(query, "callback_url") {
        let (code_from_callback, state_from_callback) =
            extract_code_state_from_callback_url(&callback_url);
        if code.is_none() {
            code = code_from_callback;
        }
        if state.is_none() {
            state = state_from_callback;
        }
    }
    let Some(code) = code else {
        return Err("missing code");
    };
    Ok((code, state))
}

/// True for OAuth error codes that can never succeed on retry, per the
/// `invalid_grant`/`invalid_client`/`unauthorized_client` family plus the
/// `invalid_request` variants that mean the refresh token itself is bad
/// rather than the request being malformed. Callers should stop refreshing
/// immediately instead of retrying with backoff.
pub(crate) fn is_permanent_oauth_error(code: &str) -> bool {
    matches!(
        code,
        "invalid_grant" | "invalid_client" | "unauthorized_client"
    ) || (code == "invalid_request")
}

pub(crate) fn block_on<F, T>(future: F) -> T
where
    F: Future<Output = T>,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        tokio::task::block_in_place(|| handle.block_on(future))
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build tokio runtime")
            .block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_code_state_from_callback_url, resolve_manual_code_and_state};

    #[test]
    fn callback_url_extracts_code_and_state() {
        let (code, state) = extract_code_state_from_callback_url(
            "http://localhost:8787/cb?code=abc-123&state=st_1",
        );
        assert_eq!(code.as_deref(), Some("abc-123"));
        assert_eq!(state.as_deref(), Some("st_1"));
    }

    #[test]
    fn callback_url_query_string_only_is_supported() {
        let (code, state) = extract_code_state_from_callback_url("code=opaque%2Bvalue&state=s1");
        assert_eq!(code.as_deref(), Some("opaque+value"));
        assert_eq!(state.as_deref(), Some("s1"));
    }

    #[test]
    fn manual_code_is_preferred_over_callback_url_code() {
        let parsed = resolve_manual_code_and_state(Some(
            "code=direct-code&callback_url=http%3A%2F%2Flocalhost%2Fcb%3Fcode%3Dother%26state%3Ds2",
        ))
        .expect("manual parse should succeed");
        assert_eq!(parsed.0, "direct-code");
        assert_eq!(parsed.1.as_deref(), Some("s2"));
    }

    #[test]
    fn manual_callback_url_is_used_when_code_missing() {
        let parsed = resolve_manual_code_and_state(Some(
            "callback_url=http%3A%2F%2Flocalhost%2Fcb%3Fcode%3Dfrom-url%26state%3Dst",
        ))
        .expect("manual parse should succeed");
        assert_eq!(parsed.0, "from-url");
        assert_eq!(parsed.1.as_deref(), Some("st"));
    }

    #[test]
    fn manual_parse_requires_code() {
        let parsed = resolve_manual_code_and_state(Some("state=only-state"));
        assert_eq!(parsed, Err("missing code"));
    }

    #[test]
    fn pkce_challenge_is_derived_from_verifier_via_sha256() {
        let pair = super::generate_pkce_pair();
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn unwrap_oauth_response_tolerates_data_and_result_wrappers() {
        let bare = serde_json::json!({"access_token": "t"});
        assert_eq!(super::unwrap_oauth_response(&bare), &bare);

        let wrapped_data = serde_json::json!({"data": {"access_token": "t"}});
        assert_eq!(super::unwrap_oauth_response(&wrapped_data)["access_token"], "t");

        let wrapped_result = serde_json::json!({"result": {"access_token": "t"}});
        assert_eq!(super::unwrap_oauth_response(&wrapped_result)["access_token"], "t");
    }

    #[test]
    fn first_str_field_tries_aliases_in_order() {
        let value = serde_json::json!({"deviceCode": "abc"});
        assert_eq!(
            super::first_str_field(&value, &["device_code", "deviceCode"]),
            Some("abc")
        );
    }
}
