//! Hub HTTP client
//!
//! Thin JSON wrapper around an already-authenticated `reqwest::Client`.
//! Credentials, TLS and default headers are the caller's business.

use crate::error::{HubError, Result};
use cpflow_cloud::ResourceRef;
use cpflow_config::HubSettings;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const API_PREFIX: &str = "/apis/infra.k8smgmt.io/v3";

/// Project used when the settings name none
pub const DEFAULT_PROJECT: &str = "defaultproject";

/// Path of a project-scoped collection
pub(crate) fn project_path(project: &str) -> String {
    format!("{}/projects/{}", API_PREFIX, project)
}

/// Hub API client
#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
    project: String,
}

impl HubClient {
    /// `client` must already carry authentication (e.g. default headers)
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let trimmed = base_url.trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(HubError::InvalidUrl(base_url));
        }

        Ok(Self {
            base_url: trimmed.to_string(),
            client,
            project: DEFAULT_PROJECT.to_string(),
        })
    }

    /// Client for the hub named in the `hub:` section of the settings file
    pub fn from_settings(client: reqwest::Client, settings: &HubSettings) -> Result<Self> {
        let hub = Self::new(client, settings.base_url.as_str())?;
        Ok(match settings.project.as_deref().map(str::trim) {
            Some(project) if !project.is_empty() => hub.with_project(project),
            _ => hub,
        })
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Default project for resources built with [`HubClient::resource`]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Reference to a resource of `kind` in the default project
    pub fn resource(&self, kind: &str, name: &str) -> ResourceRef {
        ResourceRef::new(kind, self.project.as_str(), name)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        tracing::trace!("GET {}", path);
        let response = self.client.get(self.url(path)).send().await?;
        let response = check(response, path).await?;
        Ok(response.json().await?)
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        tracing::trace!("POST {}", path);
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let response = check(response, path).await?;
        Ok(response.json().await?)
    }

    /// POST whose response body is ignored
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        tracing::trace!("POST {}", path);
        let response = self.client.post(self.url(path)).json(body).send().await?;
        check(response, path).await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        tracing::trace!("DELETE {}", path);
        let response = self.client.delete(self.url(path)).send().await?;
        check(response, path).await?;
        Ok(())
    }
}

async fn check(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(HubError::NotFound(path.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    Err(HubError::Api {
        status: status.as_u16(),
        message: error_message(&body, status),
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: String,
}

fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        if !parsed.message.is_empty() {
            return parsed.message;
        }
        if !parsed.error.is_empty() {
            return parsed.error;
        }
    }

    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        body.to_string()
    }
}
