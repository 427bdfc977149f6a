//! Public client for the Central Credential Provider GetPassword endpoint.

use std::ops::Deref;
use std::sync::Arc;

use ccp_core::params::{self, SearchCriteria};
use ccp_core::{ClientConfig, SecretResult, SecretString};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::classify::{classify, describe_request};
use crate::error::ProviderError;
use crate::pool::SessionPool;

/// Path of the GetPassword resource on the provider host.
pub const ACCOUNTS_PATH: &str = "/AIMWebService/api/Accounts";

/// Credential provider client.
///
/// Clones share one [`SessionPool`], and therefore one session and gate.
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    pool: Arc<SessionPool>,
    base_url: Option<String>,
}

impl CredentialProvider {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_pool(Arc::new(SessionPool::new(config)))
    }

    /// Use a pool that may also be held by another client.
    pub fn with_pool(pool: Arc<SessionPool>) -> Self {
        Self {
            pool,
            base_url: None,
        }
    }

    /// Create a client that talks to `base_url` instead of `https://{host}`
    /// (for tests).
    #[cfg(test)]
    pub fn with_base_url(config: ClientConfig, base_url: String) -> Self {
        Self {
            pool: Arc::new(SessionPool::new(config)),
            base_url: Some(base_url.trim_end_matches('/').to_owned()),
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn config(&self) -> &ClientConfig {
        self.pool.config()
    }

    /// Open the session now and close it when the returned scope drops.
    pub fn open(&self) -> Result<SessionScope<'_>, ProviderError> {
        self.pool.acquire()?;
        Ok(SessionScope { provider: self })
    }

    /// Close the session. Returns whether one was open.
    pub fn close(&self) -> bool {
        self.pool.release()
    }

    /// Fetch the secret matching `criteria`.
    pub async fn get_secret(&self, criteria: SearchCriteria) -> Result<SecretString, ProviderError> {
        let (secret, _) = self.execute(criteria).await?.into_parts();
        Ok(secret)
    }

    /// Fetch the secret and every other field the provider returned.
    pub async fn get_secret_detail(
        &self,
        criteria: SearchCriteria,
    ) -> Result<SecretResult, ProviderError> {
        self.execute(criteria).await
    }

    /// Validate `criteria`, send one GetPassword request and classify the
    /// response. Never retries.
    pub async fn execute(&self, mut criteria: SearchCriteria) -> Result<SecretResult, ProviderError> {
        params::validate(&mut criteria)?;

        let session = self.pool.acquire()?;
        let required = self.pool.config().required()?;
        criteria.inject_appid(required.appid);

        let url = match &self.base_url {
            Some(base) => format!("{base}{ACCOUNTS_PATH}"),
            None => format!("https://{}{ACCOUNTS_PATH}", required.host),
        };
        let request = describe_request(&url, &criteria);

        let _permit = session
            .permit()
            .await
            .map_err(|_| ProviderError::GateClosed {
                request: request.clone(),
            })?;
        debug!("sending GetPassword request ({request})");

        let outcome = match session
            .client()
            .get(&url)
            .header(CONTENT_TYPE, "application/json")
            .query(&criteria.query_pairs())
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                match response.bytes().await {
                    Ok(body) => classify(status, content_type.as_deref(), &body, &request),
                    Err(e) => Err(transport(e, &request)),
                }
            }
            Err(e) => Err(transport(e, &request)),
        };

        if let Err(e) = &outcome {
            warn!("GetPassword request failed: {e}");
        }
        outcome
    }
}

fn transport(source: reqwest::Error, request: &str) -> ProviderError {
    // The URL carries the appid in its query string.
    ProviderError::Transport {
        request: request.to_owned(),
        source: source.without_url(),
    }
}

/// Keeps the provider session open; closes it on drop.
#[derive(Debug)]
pub struct SessionScope<'a> {
    provider: &'a CredentialProvider,
}

impl Deref for SessionScope<'_> {
    type Target = CredentialProvider;

    fn deref(&self) -> &Self::Target {
        self.provider
    }
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        self.provider.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
