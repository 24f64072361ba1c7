//! Request/response access to backend resources
//!
//! Session catalog, history and the last generated plan. Every call is
//! independent; callers decide what a failure means.

use std::future::Future;

use dossier_protocol::{CreatedSession, Message, Plan, SessionSummary};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

pub trait ResourceApi: Send + Sync + 'static {
    fn list_sessions(&self) -> impl Future<Output = ClientResult<Vec<SessionSummary>>> + Send;

    /// Returns the backend-assigned session id
    fn create_session(&self) -> impl Future<Output = ClientResult<String>> + Send;

    fn delete_session(&self, session_id: &str) -> impl Future<Output = ClientResult<()>> + Send;

    /// Chronological message log of a session
    fn fetch_history(
        &self,
        session_id: &str,
    ) -> impl Future<Output = ClientResult<Vec<Message>>> + Send;

    /// `None` when no research has been run for the session yet
    fn fetch_plan(
        &self,
        session_id: &str,
    ) -> impl Future<Output = ClientResult<Option<Plan>>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpResources {
    http: reqwest::Client,
    base: String,
}

impl HttpResources {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base: config.http_base()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Backend liveness probe
    pub async fn health(&self) -> ClientResult<serde_json::Value> {
        let url = format!("{}/health", self.base);
        let response = self.http.get(&url).send().await?;
        decode(response, "GET", url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let url = format!("{}{}", self.base, path);
        let response = self.http.get(&url).send().await?;
        decode(response, "GET", url).await
    }
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    method: &'static str,
    url: String,
) -> ClientResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Status {
            method,
            url,
            status: status.as_u16(),
        });
    }
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

impl ResourceApi for HttpResources {
    async fn list_sessions(&self) -> ClientResult<Vec<SessionSummary>> {
        let sessions: Vec<SessionSummary> = self.get_json("/sessions").await?;
        debug!(
            component = "resources",
            event = "sessions.listed",
            count = sessions.len(),
        );
        Ok(sessions)
    }

    async fn create_session(&self) -> ClientResult<String> {
        let url = format!("{}/session", self.base);
        let response = self.http.post(&url).send().await?;
        let created: CreatedSession = decode(response, "POST", url).await?;
        info!(
            component = "resources",
            event = "session.created",
            session_id = %created.id,
        );
        Ok(created.id)
    }

    async fn delete_session(&self, session_id: &str) -> ClientResult<()> {
        let url = format!("{}/session/{}", self.base, session_id);
        let response = self.http.delete(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(
                component = "resources",
                event = "session.delete.already_gone",
                session_id = %session_id,
            );
            return Ok(());
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                method: "DELETE",
                url,
                status: status.as_u16(),
            });
        }
        info!(
            component = "resources",
            event = "session.deleted",
            session_id = %session_id,
        );
        Ok(())
    }

    async fn fetch_history(&self, session_id: &str) -> ClientResult<Vec<Message>> {
        self.get_json(&format!("/session/{session_id}/history"))
            .await
    }

    async fn fetch_plan(&self, session_id: &str) -> ClientResult<Option<Plan>> {
        let url = format!("{}/plan/{}", self.base, session_id);
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response, "GET", url).await.map(Some)
    }
}
