use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::oauth2;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

const APP_NAME: &str = "gmail-rules";
const TOKEN_KEY: &str = "gmail_token";

/// Reading messages and changing their labels needs nothing broader.
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.modify"];

pub type GmailAuthenticator =
    oauth2::authenticator::Authenticator<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenData {
    tokens: Vec<TokenInfo>,
}

fn keyring_entry() -> Result<Entry> {
    Entry::new(APP_NAME, TOKEN_KEY).map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
}

/// Keeps the OAuth token in the OS keyring instead of a file next to the
/// database.
pub struct RingStorage;

#[async_trait]
impl TokenStorage for RingStorage {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<()> {
        let data = TokenData {
            tokens: vec![token],
        };
        let serialized = serde_json::to_string(&data).context("Failed to serialize tokens")?;

        keyring_entry()?
            .set_password(&serialized)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;
        debug!("Stored OAuth token in keyring");
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        self.get_all()
            .await
            .ok()
            .and_then(|data| data.tokens.into_iter().next())
    }
}

impl RingStorage {
    async fn get_all(&self) -> Result<TokenData> {
        match keyring_entry()?.get_password() {
            Ok(serialized) => {
                serde_json::from_str(&serialized).context("Failed to deserialize tokens")
            }
            Err(keyring::Error::NoEntry) => Ok(TokenData::default()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }

    /// Forgets the cached token so the next start runs the consent flow
    /// again. Returns whether there was anything to forget.
    pub async fn clear_token(&self) -> Result<bool> {
        match keyring_entry()?.delete_password() {
            Ok(()) => {
                info!("Cleared cached OAuth token");
                Ok(true)
            }
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }
}

pub struct Authenticator;

impl Authenticator {
    pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
        let path = path.as_ref();
        read_application_secret(path)
            .await
            .with_context(|| format!("Failed to read application secret from {}", path.display()))
    }

    /// Builds the installed-app flow. The consent URL is printed on first use
    /// and the redirect is caught on a local port.
    pub async fn authenticate(secret: ApplicationSecret) -> Result<GmailAuthenticator> {
        InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
            .with_storage(Box::new(RingStorage))
            .build()
            .await
            .context("Failed to build authenticator")
    }
}
