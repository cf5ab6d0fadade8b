//! REST calls through the same error table and rate-limit parsing as the stream.

use std::sync::{Arc, Mutex, PoisonError};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use tweetstream_core::{map_status, ApiError, AuthError, Authorizer, Headers, Method, RateLimit};
use url::form_urlencoded;

pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com/1.1";

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
}

/// Decoded body plus the rate-limit state reported with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: T,
    pub rate_limit: Option<RateLimit>,
}

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    authorizer: Arc<dyn Authorizer>,
    last_rate_limit: Mutex<Option<RateLimit>>,
}

impl RestClient {
    pub fn new(authorizer: Arc<dyn Authorizer>, user_agent: &str) -> Result<Self, RestError> {
        Self::with_base_url(DEFAULT_BASE_URL, authorizer, user_agent)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        authorizer: Arc<dyn Authorizer>,
        user_agent: &str,
    ) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            authorizer,
            last_rate_limit: Mutex::new(None),
        })
    }

    /// Rate-limit state from the most recent response that carried one.
    pub fn last_rate_limit(&self) -> Option<RateLimit> {
        *self
            .last_rate_limit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse<T>, RestError> {
        self.send(Method::Get, path, params).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse<T>, RestError> {
        self.send(Method::Post, path, params).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse<T>, RestError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let owned: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let authorization = self.authorizer.authorize(method, &url, &owned)?;

        let request = match method {
            Method::Get => self
                .http
                .get(url::Url::parse_with_params(&url, params.iter())?),
            Method::Post => self
                .http
                .post(&url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(
                    form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(params.iter())
                        .finish(),
                ),
        };
        let response = request.header(AUTHORIZATION, authorization).send().await?;

        let status = response.status().as_u16();
        let headers = Headers::from_pairs(response.headers().iter().filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        }));
        let rate_limit = RateLimit::from_headers(&headers);
        if rate_limit.is_some() {
            *self
                .last_rate_limit
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = rate_limit;
        }
        let body = response.bytes().await?;
        tracing::debug!(%method, path, status, bytes = body.len(), "rest response");

        if let Some(err) = map_status(status, &headers, &body) {
            tracing::warn!(error = %err, path, "rest call failed");
            return Err(err.into());
        }
        if !(200..300).contains(&status) {
            return Err(RestError::UnexpectedStatus(status));
        }
        let data = serde_json::from_slice(&body)?;
        Ok(ApiResponse { data, rate_limit })
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tweetstream_core::BearerToken;

    #[test]
    fn base_url_is_normalized() {
        let client = RestClient::with_base_url(
            "http://localhost:1/1.1/",
            Arc::new(BearerToken::new("t")),
            "ua",
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:1/1.1");
        assert!(client.last_rate_limit().is_none());
        assert!(format!("{:?}", client).contains("localhost"));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_sending() {
        let client = RestClient::with_base_url(
            "http://127.0.0.1:1",
            Arc::new(BearerToken::new("")),
            "ua",
        )
        .unwrap();
        let err = client
            .get::<serde_json::Value>("account/verify_credentials.json", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Auth(AuthError::MissingCredentials)));
    }
}
