//! Stateless chat-completions family. The whole context travels with every
//! request, and the screenshot (when the variant has vision) goes inline as
//! a base64 data URL.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{AgentError, AgentResult};
use crate::llm::json_extract::parse_instructions;
use crate::llm::provider::ModelProvider;
use crate::llm::types::{ChatMessage, ContentPart, ImageUrl, InstructionSet, MessageContent};
use crate::screen::Screenshot;

const MAX_TOKENS: u32 = 800;
const MAX_RETRIES: u32 = 3;
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(20);

pub struct ChatCompletionProvider {
    model: String,
    base_url: String,
    api_key: String,
    context: String,
    vision: bool,
    client: reqwest::Client,
}

impl ChatCompletionProvider {
    pub fn new(
        model: String,
        base_url: String,
        api_key: String,
        context: String,
        vision: bool,
    ) -> Self {
        Self {
            model,
            base_url,
            api_key,
            context,
            vision,
            client: reqwest::Client::new(),
        }
    }

    fn format_request(&self, request: &str, step_num: u32, screenshot: Option<&Screenshot>) -> MessageContent {
        let request_data = serde_json::json!({
            "original_user_request": request,
            "step_num": step_num,
        });
        // The context rides along on every call; this family has no
        // server-side session to remember it.
        let mut parts = vec![ContentPart::Text {
            text: format!("{}{}", self.context, request_data),
        }];
        if let Some(shot) = screenshot {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{}", shot.base64),
                },
            });
        }
        MessageContent::Parts(parts)
    }

    /// Sends one chat-completions request, waiting out rate limits up to the
    /// retry bound.
    async fn send(&self, content: MessageContent) -> AgentResult<String> {
        let message = ChatMessage {
            role: "user".into(),
            content,
        };
        let body = serde_json::json!({
            "model": self.model,
            "messages": [message],
            "max_tokens": MAX_TOKENS,
        });

        let mut attempt = 0;
        loop {
            tracing::debug!(model = %self.model, attempt, "sending chat completion request");
            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                attempt += 1;
                if attempt >= MAX_RETRIES {
                    return Err(AgentError::RateLimited(format!(
                        "still rate limited after {MAX_RETRIES} attempts"
                    )));
                }
                tracing::warn!(
                    attempt,
                    delay_secs = RATE_LIMIT_DELAY.as_secs(),
                    "rate limited, waiting before retry"
                );
                tokio::time::sleep(RATE_LIMIT_DELAY).await;
                continue;
            }
            if !status.is_success() {
                let err_body = response.text().await.unwrap_or_default();
                return Err(AgentError::Model(format!("{status}: {err_body}")));
            }

            let json: serde_json::Value = response.json().await?;
            return json["choices"][0]["message"]["content"]
                .as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| {
                    AgentError::Model(format!("response without message content: {json}"))
                });
        }
    }
}

#[async_trait]
impl ModelProvider for ChatCompletionProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    async fn get_instructions(
        &self,
        request: &str,
        step_num: u32,
        screenshot: Option<&Screenshot>,
    ) -> AgentResult<InstructionSet> {
        let content = self.format_request(request, step_num, screenshot);
        let raw = self.send(content).await?;
        parse_instructions(&raw)
    }

    async fn send_raw(&self, request: &str) -> AgentResult<String> {
        self.send(MessageContent::Text(request.to_string())).await
    }

    async fn release(&self) {
        // Nothing held server-side for this family.
        tracing::info!(model = %self.model, "chat completion provider released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(vision: bool) -> ChatCompletionProvider {
        ChatCompletionProvider::new(
            "gpt-4-vision-preview".into(),
            "https://api.openai.com/v1".into(),
            "sk-test".into(),
            "context.".into(),
            vision,
        )
    }

    #[test]
    fn request_without_screenshot_is_text_only() {
        let content = provider(false).format_request("open calculator", 0, None);
        match content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 1);
                match &parts[0] {
                    ContentPart::Text { text } => {
                        assert!(text.starts_with("context."));
                        assert!(text.contains("open calculator"));
                        assert!(text.contains("\"step_num\":0"));
                    }
                    other => panic!("unexpected part: {other:?}"),
                }
            }
            MessageContent::Text(_) => panic!("expected parts"),
        }
    }

    #[test]
    fn screenshot_becomes_inline_data_url() {
        let shot = Screenshot {
            png_bytes: vec![1, 2, 3],
            base64: "AQID".into(),
            path: "/tmp/s.png".into(),
            width: 1,
            height: 1,
        };
        let content = provider(true).format_request("req", 2, Some(&shot));
        match content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                match &parts[1] {
                    ContentPart::ImageUrl { image_url } => {
                        assert_eq!(image_url.url, "data:image/png;base64,AQID");
                    }
                    other => panic!("unexpected part: {other:?}"),
                }
            }
            MessageContent::Text(_) => panic!("expected parts"),
        }
    }
}
