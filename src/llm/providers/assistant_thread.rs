//! Assistant/thread family: providers with server-side conversational state
//! and asynchronous run semantics. The session (assistant + thread) is
//! created lazily on first use; screenshots are uploaded as files and
//! referenced from the message text; runs are polled until terminal.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::{AgentError, AgentResult};
use crate::llm::json_extract::parse_instructions;
use crate::llm::provider::ModelProvider;
use crate::llm::types::InstructionSet;
use crate::screen::Screenshot;

const MAX_RETRIES: u32 = 3;
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(20);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Ceiling on how long one run may stay non-terminal before we give up.
const MAX_RUN_WAIT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
struct Session {
    assistant_id: String,
    thread_id: String,
}

pub struct AssistantThreadProvider {
    model: String,
    base_url: String,
    api_key: String,
    context: String,
    client: reqwest::Client,
    session: Mutex<Option<Session>>,
    uploaded_files: Mutex<Vec<String>>,
}

impl AssistantThreadProvider {
    pub fn new(model: String, base_url: String, api_key: String, context: String) -> Self {
        Self {
            model,
            base_url,
            api_key,
            context,
            client: reqwest::Client::new(),
            session: Mutex::new(None),
            uploaded_files: Mutex::new(Vec::new()),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn check(&self, response: reqwest::Response) -> AgentResult<serde_json::Value> {
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Model(format!("{status}: {body}")));
        }
        Ok(response.json().await?)
    }

    /// Creates the assistant and thread on first use.
    async fn ensure_session(&self) -> AgentResult<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        tracing::info!(model = %self.model, "creating assistant");
        let assistant = self
            .check(
                self.post("/assistants")
                    .json(&serde_json::json!({
                        "name": "Deskpilot Backend",
                        "instructions": self.context,
                        "model": self.model,
                    }))
                    .send()
                    .await?,
            )
            .await?;
        let assistant_id = id_of(&assistant, "assistant")?;
        tracing::info!(assistant_id = %assistant_id, "assistant created");

        let thread = self
            .check(self.post("/threads").json(&serde_json::json!({})).send().await?)
            .await?;
        let thread_id = id_of(&thread, "thread")?;
        tracing::info!(thread_id = %thread_id, "thread created");

        let session = Session {
            assistant_id,
            thread_id,
        };
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn upload_screenshot(&self, shot: &Screenshot) -> AgentResult<String> {
        let file_name = format!("screenshot-{}.png", uuid::Uuid::new_v4());
        let part = reqwest::multipart::Part::bytes(shot.png_bytes.clone())
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(|e| AgentError::Model(format!("invalid upload part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);

        let json = self
            .check(self.post("/files").multipart(form).send().await?)
            .await?;
        let file_id = id_of(&json, "file")?;
        self.uploaded_files.lock().await.push(file_id.clone());
        tracing::info!(file_id = %file_id, "screenshot uploaded");
        Ok(file_id)
    }

    /// Sends one message to the thread and waits for the run to finish,
    /// retrying the whole exchange when the provider rate-limits.
    async fn send_message(&self, text: &str) -> AgentResult<String> {
        let mut attempt = 0;
        loop {
            match self.send_message_once(text).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_rate_limit() => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(e);
                    }
                    tracing::warn!(
                        attempt,
                        delay_secs = RATE_LIMIT_DELAY.as_secs(),
                        "rate limited, waiting before retry"
                    );
                    tokio::time::sleep(RATE_LIMIT_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_message_once(&self, text: &str) -> AgentResult<String> {
        let session = self.ensure_session().await?;

        self.check(
            self.post(&format!("/threads/{}/messages", session.thread_id))
                .json(&serde_json::json!({"role": "user", "content": text}))
                .send()
                .await?,
        )
        .await?;

        let run = self
            .check(
                self.post(&format!("/threads/{}/runs", session.thread_id))
                    .json(&serde_json::json!({"assistant_id": session.assistant_id}))
                    .send()
                    .await?,
            )
            .await?;
        let run_id = id_of(&run, "run")?;

        self.wait_for_run(&session, &run_id).await?;
        self.latest_message_text(&session).await
    }

    async fn wait_for_run(&self, session: &Session, run_id: &str) -> AgentResult<()> {
        let started = tokio::time::Instant::now();
        loop {
            let run = self
                .check(
                    self.get(&format!("/threads/{}/runs/{run_id}", session.thread_id))
                        .send()
                        .await?,
                )
                .await?;
            match run["status"].as_str().unwrap_or("") {
                "completed" => return Ok(()),
                status @ ("failed" | "cancelled" | "expired") => {
                    let last_error = run["last_error"].to_string();
                    tracing::error!(status, last_error = %last_error, "run ended abnormally");
                    return Err(AgentError::Model(format!(
                        "run {status}: {last_error}"
                    )));
                }
                "requires_action" => {
                    tracing::error!("run requires manual action, aborting");
                    return Err(AgentError::Model("run requires manual action".into()));
                }
                status => {
                    if started.elapsed() >= MAX_RUN_WAIT {
                        return Err(AgentError::Model(format!(
                            "run still `{status}` after {}s",
                            MAX_RUN_WAIT.as_secs()
                        )));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn latest_message_text(&self, session: &Session) -> AgentResult<String> {
        let json = self
            .check(
                self.get(&format!("/threads/{}/messages?limit=1", session.thread_id))
                    .send()
                    .await?,
            )
            .await?;
        json["data"][0]["content"][0]["text"]["value"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| AgentError::Model(format!("thread reply without text: {json}")))
    }

    fn format_message(&self, request: &str, step_num: u32, file_id: Option<&str>) -> String {
        let mut text = format!("Step {step_num}: {request}");
        if let Some(id) = file_id {
            text.push_str(&format!("\nScreenshot file_id: {id}"));
        }
        text
    }

    async fn delete(&self, path: &str, what: &str) {
        let result = self
            .client
            .delete(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(what, path, "deleted");
            }
            Ok(resp) => {
                tracing::warn!(what, path, status = %resp.status(), "delete failed");
            }
            Err(e) => {
                tracing::warn!(what, path, error = %e, "delete failed");
            }
        }
    }
}

#[async_trait]
impl ModelProvider for AssistantThreadProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn supports_vision(&self) -> bool {
        true
    }

    async fn get_instructions(
        &self,
        request: &str,
        step_num: u32,
        screenshot: Option<&Screenshot>,
    ) -> AgentResult<InstructionSet> {
        let file_id = match screenshot {
            Some(shot) => Some(self.upload_screenshot(shot).await?),
            None => None,
        };
        let message = self.format_message(request, step_num, file_id.as_deref());
        let raw = self.send_message(&message).await?;
        parse_instructions(&raw)
    }

    async fn send_raw(&self, request: &str) -> AgentResult<String> {
        self.send_message(request).await
    }

    async fn release(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            self.delete(&format!("/threads/{}", session.thread_id), "thread")
                .await;
            self.delete(&format!("/assistants/{}", session.assistant_id), "assistant")
                .await;
        }
        let files = std::mem::take(&mut *self.uploaded_files.lock().await);
        for file_id in files {
            self.delete(&format!("/files/{file_id}"), "file").await;
        }
    }
}

fn id_of(json: &serde_json::Value, what: &str) -> AgentResult<String> {
    json["id"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| AgentError::Model(format!("{what} response without id: {json}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_references_uploaded_screenshot() {
        let provider = AssistantThreadProvider::new(
            "gpt-4o".into(),
            "https://api.openai.com/v1".into(),
            "sk-test".into(),
            "context".into(),
        );
        let text = provider.format_message("open calculator", 3, Some("file-abc"));
        assert_eq!(
            text,
            "Step 3: open calculator\nScreenshot file_id: file-abc"
        );

        let bare = provider.format_message("open calculator", 0, None);
        assert_eq!(bare, "Step 0: open calculator");
    }

    #[test]
    fn id_extraction_requires_id_field() {
        assert_eq!(
            id_of(&serde_json::json!({"id": "run_1"}), "run").unwrap(),
            "run_1"
        );
        assert!(id_of(&serde_json::json!({"object": "run"}), "run").is_err());
    }
}
