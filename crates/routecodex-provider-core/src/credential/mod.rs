mod model_unavailable_queue;
mod pool;
pub mod single_flight;
mod state;
mod unavailable_queue;

pub use pool::{AcquireError, CredentialPool};
pub use single_flight::RefreshCoordinator;
pub use state::{CredentialId, CredentialState, UnavailableReason};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Credential {
    OpenAI(ApiKeyCredential),
    Qwen(DeviceOAuthCredential),
    IFlow(IFlowCredential),
    LmStudio(ApiKeyCredential),
    Gemini(ApiKeyCredential),
    Antigravity(AntigravityCredential),
    Custom(ApiKeyCredential),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyCredential {
    pub api_key: String,
}

/// Qwen's OAuth device-code credential. `resource_url` is the tenant-scoped
/// API base returned alongside the token set, used in place of the static
/// default base URL when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceOAuthCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
}

/// iFlow supports both the device-code flow and an authorization-code+PKCE
/// web flow; both resolve into this same credential shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IFlowCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntigravityCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub project_id: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iflow_credential_allows_api_key_only() {
        let value = serde_json::json!({
            "IFlow": {
                "access_token": "",
                "refresh_token": "",
                "expires_at": 0,
                "api_key": "sk-iflow-abc"
            }
        });
        let cred: Credential = serde_json::from_value(value).expect("credential should parse");
        match cred {
            Credential::IFlow(secret) => {
                assert_eq!(secret.api_key.as_deref(), Some("sk-iflow-abc"));
            }
            other => panic!("unexpected credential variant: {other:?}"),
        }
    }
}
