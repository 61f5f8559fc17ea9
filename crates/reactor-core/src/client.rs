//! JSON-over-HTTP client bound to one cell's agent server.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ReactorError, Result};

/// Session/prompt options recognized by the agent server's RPC surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_reply: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

/// Result of a prompt or command execution.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptResult {
    pub session_id: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    /// Process exit status, populated for `execute_command` (shell/test/git
    /// invocations); absent for free-form prompts.
    #[serde(default)]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_reply: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [String]>,
    prompt: &'a str,
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    session_id: &'a str,
    command: &'a str,
    args: &'a [String],
}

/// A thin wrapper around the agent server's HTTP RPCs, bound to one base URL
/// for the lifetime of the owning cell (INV-4).
#[derive(Debug, Clone)]
pub struct AgentClient {
    base_url: String,
    port: u16,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>, port: u16) -> Self {
        Self {
            base_url: base_url.into(),
            port,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<R> {
        debug!(port = self.port, path, "agent client request");
        let mut req = self.http.request(method, self.url(path)).timeout(Duration::from_secs(600));
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req.send().await.map_err(|e| {
            ReactorError::AgentExecutionError(format!("request to {path} failed: {e}"))
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            let truncated: String = body_text.chars().take(500).collect();
            return Err(ReactorError::AgentExecutionError(format!(
                "{path} returned {status}: {truncated}"
            )));
        }

        resp.json::<R>()
            .await
            .map_err(|e| ReactorError::AgentExecutionError(format!("malformed response from {path}: {e}")))
    }

    /// Opens or reuses a session and sends a text prompt (INV-6: the only way
    /// file mutations happen inside a cell's worktree).
    pub async fn execute_prompt(&self, prompt: &str, opts: &PromptOptions) -> Result<PromptResult> {
        let body = PromptRequest {
            session_id: opts.session_id.as_deref(),
            title: opts.title.as_deref(),
            model: opts.model.as_deref(),
            agent: opts.agent.as_deref(),
            no_reply: opts.no_reply,
            system_prompt: opts.system_prompt.as_deref(),
            tools: opts.tools.as_deref(),
            prompt,
        };
        self.send(reqwest::Method::POST, "/session/prompt", Some(&body)).await
    }

    /// Invokes a named command (e.g. a shell/test run) through the server.
    pub async fn execute_command(
        &self,
        session_id: &str,
        command: &str,
        args: &[String],
    ) -> Result<PromptResult> {
        let body = CommandRequest { session_id, command, args };
        self.send(reqwest::Method::POST, "/session/command", Some(&body)).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        self.send::<(), _>(reqwest::Method::GET, "/session", None).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionInfo> {
        self.send::<(), _>(reqwest::Method::GET, &format!("/session/{session_id}"), None)
            .await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.send::<(), ()>(reqwest::Method::DELETE, &format!("/session/{session_id}"), None)
            .await
    }

    pub async fn abort_session(&self, session_id: &str) -> Result<()> {
        self.send::<(), ()>(reqwest::Method::POST, &format!("/session/{session_id}/abort"), None)
            .await
    }

    pub async fn file_status(&self, session_id: &str) -> Result<Vec<String>> {
        self.send::<(), _>(reqwest::Method::GET, &format!("/session/{session_id}/files"), None)
            .await
    }

    pub async fn read_file(&self, session_id: &str, path: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct FileBody {
            content: String,
        }
        let body: FileBody = self
            .send::<(), _>(
                reqwest::Method::GET,
                &format!("/session/{session_id}/file?path={path}"),
                None,
            )
            .await?;
        Ok(body.content)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_and_port_are_retained() {
        let client = AgentClient::new("http://localhost:8123", 8123);
        assert_eq!(client.base_url(), "http://localhost:8123");
        assert_eq!(client.port(), 8123);
    }

    #[tokio::test]
    async fn connection_refused_is_agent_execution_error() {
        // Nothing is listening on this port.
        let client = AgentClient::new("http://localhost:1", 1);
        let result = client.execute_prompt("hi", &PromptOptions::default()).await;
        assert!(matches!(result, Err(ReactorError::AgentExecutionError(_))));
    }
}
