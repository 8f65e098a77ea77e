//! Session-aware HTTP client for the daemon's Web API.

use std::time::Duration;

use lodestar_api_models::{LOGIN_PATH, LoginForm};
use lodestar_sync::{FetchError, StatusPolicy};
use reqwest::header::REFERER;
use reqwest::{Client, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{GatewayError, GatewayResult};

/// Body the daemon returns when a login succeeds.
const LOGIN_ACCEPTED: &str = "Ok.";

/// Cheaply cloneable client sharing one cookie jar across every source.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: Client,
    base: Url,
}

impl DaemonClient {
    /// Build a client rooted at `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL cannot carry paths or the TLS backend
    /// fails to initialise.
    pub fn new(base_url: Url, timeout: Duration) -> GatewayResult<Self> {
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidBaseUrl {
                value: base_url.to_string(),
            });
        }
        let mut base = base_url;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|source| GatewayError::ClientBuild { source })?;

        Ok(Self { http, base })
    }

    /// Daemon base URL, always ending in `/`.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Open a session; the cookie is kept for every later request.
    ///
    /// # Errors
    ///
    /// Returns `LoginRejected` when the daemon refuses the credentials and
    /// `Request` when no response arrives.
    pub async fn login(&self, username: &str, password: &str) -> GatewayResult<()> {
        let url = self.endpoint_url(LOGIN_PATH)?;
        let form = LoginForm {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(url)
            .header(REFERER, self.base.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|source| GatewayError::Request {
                operation: "auth.login",
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| GatewayError::Request {
                operation: "auth.login.body",
                source,
            })?;
        if !status.is_success() || body.trim() != LOGIN_ACCEPTED {
            return Err(GatewayError::LoginRejected {
                status: status.as_u16(),
            });
        }

        info!(daemon = %self.base, user = username, "daemon session opened");
        Ok(())
    }

    /// GET `path` with `query` and decode the JSON body, classifying every
    /// failure for the poll loop.
    pub(crate) async fn fetch_json<T, Q>(
        &self,
        endpoint: &'static str,
        path: &'static str,
        query: &Q,
        policy: StatusPolicy,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self
            .endpoint_url(path)
            .map_err(|err| FetchError::Transport {
                endpoint,
                source: Box::new(err),
            })?;
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| transport_failure(endpoint, err))?;

        let status = response.status();
        if !status.is_success() {
            debug!(endpoint, status = status.as_u16(), "diff request rejected");
            return Err(policy.failure_for_status(endpoint, status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| transport_failure(endpoint, err))?;
        serde_json::from_slice(&body).map_err(|err| FetchError::Decode {
            endpoint,
            source: Box::new(err),
        })
    }

    fn endpoint_url(&self, path: &'static str) -> GatewayResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|source| GatewayError::InvalidPath { path, source })
    }
}

fn transport_failure(endpoint: &'static str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout { endpoint }
    } else {
        FetchError::Transport {
            endpoint,
            source: Box::new(err),
        }
    }
}
