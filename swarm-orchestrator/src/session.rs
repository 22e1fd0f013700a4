//! HTTP-backed implementation of the remote agent-session service

use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use serde::Deserialize;
use swarm_orchestrator_sdk::{async_trait, AgentSessionService, SessionPoll, SessionResult};

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    session_id: Uuid,
}

/// Talks to the agent-session service over its REST surface. Only the five
/// boundary operations are used; nothing else about the service is assumed.
pub struct HttpSessionService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AgentSessionService for HttpSessionService {
    async fn create_session(
        &self,
        model: &str,
        working_dir: Option<&Path>,
    ) -> SessionResult<Uuid> {
        let body = serde_json::json!({
            "model": model,
            "working_dir": working_dir.map(|p| p.display().to_string()),
        });
        let response = self
            .client
            .post(self.url("/sessions"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let created: CreateSessionResponse = response.json().await?;
        Ok(created.session_id)
    }

    async fn send_prompt(&self, session_id: &Uuid, prompt: &str) -> SessionResult<()> {
        self.client
            .post(self.url(&format!("/sessions/{}/prompt", session_id)))
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn poll_status(&self, session_id: &Uuid) -> SessionResult<SessionPoll> {
        let response = self
            .client
            .get(self.url(&format!("/sessions/{}/status", session_id)))
            .send()
            .await?
            .error_for_status()?;
        let poll: SessionPoll = response.json().await?;
        Ok(poll)
    }

    async fn fetch_transcript(&self, session_id: &Uuid) -> SessionResult<String> {
        let response = self
            .client
            .get(self.url(&format!("/sessions/{}/transcript", session_id)))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    async fn cancel_session(&self, session_id: &Uuid) -> SessionResult<()> {
        self.client
            .post(self.url(&format!("/sessions/{}/cancel", session_id)))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
