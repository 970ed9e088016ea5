use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use lettre::Message;
use serde::{Deserialize, Serialize};

use super::{NotifyArgs, NotifyError, Notifier};
use crate::config::Config;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";
const SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

#[derive(Debug, Deserialize)]
struct ServiceAccountCredentials {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    TOKEN_URL.to_string()
}

#[derive(Serialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// `GMAIL`: a self-signed JWT service-account exchange (no OAuth crate in
/// the retrieved corpus — see DESIGN.md), reusing `jsonwebtoken` the same
/// way `TokenMinter` does, then a plain `reqwest` call to send the MIME
/// message base64url-encoded, matching `notify_via_gmail`'s
/// `EmailMessage`-then-`raw` shape.
pub struct GmailNotifier {
    http: reqwest::Client,
    credentials_path: std::path::PathBuf,
}

impl GmailNotifier {
    pub fn from_config(config: &Config) -> Self {
        GmailNotifier {
            http: reqwest::Client::new(),
            credentials_path: config.gmail_credentials_path.clone(),
        }
    }

    async fn fetch_access_token(&self) -> Result<String, NotifyError> {
        let raw = std::fs::read_to_string(&self.credentials_path)
            .map_err(|e| NotifyError::Transport(format!("failed to read gmail credentials: {e}")))?;
        let creds: ServiceAccountCredentials =
            serde_json::from_str(&raw).map_err(|e| NotifyError::Transport(format!("invalid gmail credentials: {e}")))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .as_secs() as i64;
        let claims = AssertionClaims {
            iss: creds.client_email,
            scope: SCOPE.to_string(),
            aud: creds.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(creds.private_key.as_bytes())
            .map_err(|e| NotifyError::Transport(format!("invalid gmail private key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| NotifyError::Transport(format!("failed to sign gmail assertion: {e}")))?;

        let resp = self
            .http
            .post(&creds.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &assertion),
            ])
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifyError::Transport(format!("gmail token exchange returned {}", resp.status())));
        }
        let token: TokenResponse = resp.json().await.map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl Notifier for GmailNotifier {
    async fn notify(&self, args: &NotifyArgs) -> Result<(), NotifyError> {
        let (sender, recipient, subject, body) = match args {
            NotifyArgs::Email { sender, recipient, subject, body } => (sender, recipient, subject, body),
            other => return Err(NotifyError::InvalidArgs(format!("GMAIL notifier received {other:?}"))),
        };

        let message = Message::builder()
            .from(sender.parse().map_err(|e| NotifyError::InvalidArgs(format!("invalid sender: {e}")))?)
            .to(recipient.parse().map_err(|e| NotifyError::InvalidArgs(format!("invalid recipient: {e}")))?)
            .subject(subject.clone())
            .body(body.clone())
            .map_err(|e| NotifyError::InvalidArgs(format!("failed to build message: {e}")))?;
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(message.formatted());

        let access_token = self.fetch_access_token().await?;
        let resp = self
            .http
            .post(SEND_URL)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifyError::Transport(format!("gmail send returned {}", resp.status())));
        }
        Ok(())
    }
}
