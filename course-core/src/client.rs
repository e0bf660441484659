use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CourseCache;
use crate::catalog::{build_courses, ApiEnvelope, Page, RemoteProduct, RemoteUser};
use crate::config::ApiConfig;
use crate::course::Course;
use crate::error::ClientError;
use crate::session::{clear_credentials, CredentialStore, User, TOKEN_KEY};

const USER_AGENT: &str = concat!("coursebook/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub role: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: User,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// HTTP access to the public catalog and auth endpoints.
///
/// When credentials are attached, each request reads the token from the
/// store and sends it as a bearer header; a 401 answer wipes them.
#[derive(Clone)]
pub struct CatalogClient {
    http: Client,
    base_url: Url,
    page_size: u32,
    max_retries: u8,
    retry_backoff: Duration,
    credentials: Option<Arc<dyn CredentialStore>>,
}

impl CatalogClient {
    pub fn new(http: Client, config: &ApiConfig) -> Result<Self, ClientError> {
        // A trailing slash keeps `join` from dropping the last path segment.
        let mut base = config.base_url.trim_end_matches('/').to_owned();
        base.push('/');
        Ok(Self {
            http,
            base_url: Url::parse(&base)?,
            page_size: config.page_size,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            credentials: None,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ClientError> {
        let http = ClientBuilder::new()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()?;
        Self::new(http, config)
    }

    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn fetch_users(&self) -> Result<Vec<RemoteUser>, ClientError> {
        let page: ApiEnvelope<Page<RemoteUser>> =
            self.get_page("public/randomusers", 1).await?;
        Ok(page.data.data)
    }

    pub async fn fetch_products(&self) -> Result<Vec<RemoteProduct>, ClientError> {
        let page: ApiEnvelope<Page<RemoteProduct>> =
            self.get_page("public/randomproducts", 1).await?;
        Ok(page.data.data)
    }

    /// Users first, then products, paired into courses.
    pub async fn fetch_catalog(&self) -> Result<Vec<Course>, ClientError> {
        let users = self.fetch_users().await?;
        let products = self.fetch_products().await?;
        let courses = build_courses(&products, &users)?;
        info!(courses = courses.len(), instructors = users.len(), "catalog fetched");
        Ok(courses)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let body = LoginRequest { username, password };
        let envelope: ApiEnvelope<LoginResponse> =
            self.send_json(Method::POST, "users/login", &[], Some(&body)).await?;
        Ok(envelope.data)
    }

    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let body = RegisterRequest {
            email,
            username,
            password,
            role: "USER",
        };
        let _: serde_json::Value = self
            .send_json(Method::POST, "users/register", &[], Some(&body))
            .await?;
        info!(%username, "registered account");
        Ok(())
    }

    async fn get_page<T: DeserializeOwned>(&self, path: &str, page: u32) -> Result<T, ClientError> {
        let query = [
            ("page", page.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        self.send_json::<T, ()>(Method::GET, path, &query, None).await
    }

    async fn send_json<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let mut attempt: u8 = 0;
        loop {
            let mut request = self.http.request(method.clone(), url.clone());
            if let Some(body) = body {
                request = request.json(body);
            }
            match self.execute(request, path).await {
                Ok(value) => return Ok(value),
                // Only reads are replayed; a retried POST may repeat a side effect.
                Err(err)
                    if method == Method::GET && err.is_transient() && attempt < self.max_retries =>
                {
                    attempt += 1;
                    let delay = backoff_delay(self.retry_backoff, attempt);
                    warn!(%path, attempt, error = %err, "request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(%path, error = %err, "request failed");
                    return Err(err);
                }
            }
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        mut request: RequestBuilder,
        path: &str,
    ) -> Result<T, ClientError> {
        if let Some(store) = &self.credentials {
            match store.get(TOKEN_KEY).await {
                Ok(Some(token)) => request = request.bearer_auth(token),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to read auth token"),
            }
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(%path, status = status.as_u16(), "response received");

        if status == StatusCode::UNAUTHORIZED {
            if let Some(store) = &self.credentials {
                if let Err(e) = clear_credentials(store.as_ref()).await {
                    warn!(error = %e, "failed to clear credentials after 401");
                }
            }
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                path: path.to_owned(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

/// Linear backoff, capped at `base` when the multiplication overflows.
fn backoff_delay(base: Duration, attempt: u8) -> Duration {
    base.checked_mul(u32::from(attempt)).unwrap_or(base)
}

/// Fetches a fresh catalog into `cache`. On failure the cache keeps what it
/// had.
pub async fn refresh_catalog(
    client: &CatalogClient,
    cache: &mut CourseCache,
) -> Result<usize, ClientError> {
    let courses = client.fetch_catalog().await?;
    let count = courses.len();
    cache.replace_catalog(courses);
    Ok(count)
}
