//! The model client the Orchestration Loop talks to. Owns the provider and
//! the screenshot policy: capture per call for vision models, one call per
//! configured screenshot with key-wise merging, raw fallback for when
//! structured fetching keeps failing.

use std::sync::Arc;

use crate::config::Settings;
use crate::context::build_context;
use crate::errors::{AgentError, AgentResult};
use crate::llm::provider::ModelProvider;
use crate::llm::registry;
use crate::llm::types::InstructionSet;
use crate::screen::ScreenProvider;
use crate::status::StatusSink;

pub struct LlmClient {
    provider: Arc<dyn ModelProvider>,
    screen: Arc<dyn ScreenProvider>,
    status: StatusSink,
    number_of_screenshots: u32,
}

impl LlmClient {
    pub async fn new(
        settings: &Settings,
        screen: Arc<dyn ScreenProvider>,
        status: StatusSink,
    ) -> AgentResult<Self> {
        let screen_size = match screen.size().await {
            Ok(size) => Some(size),
            Err(e) => {
                tracing::warn!(error = %e, "could not read screen size for context");
                None
            }
        };
        let context = build_context(settings, screen_size);
        let provider = registry::create_provider(settings, context)?;
        Ok(Self::from_parts(
            provider,
            screen,
            status,
            settings.number_of_screenshots,
        ))
    }

    pub fn from_parts(
        provider: Arc<dyn ModelProvider>,
        screen: Arc<dyn ScreenProvider>,
        status: StatusSink,
        number_of_screenshots: u32,
    ) -> Self {
        Self {
            provider,
            screen,
            status,
            number_of_screenshots,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.name()
    }

    /// One logical model consultation for the given step.
    ///
    /// With N > 1 screenshots configured this issues N sequential calls, one
    /// per fresh capture, merged key-by-key with first-non-empty-wins. Some
    /// variants cannot take several images in one call, so a multi-look
    /// decision is approximated by merging single-image calls. A single
    /// failed call is skipped when redundancy exists.
    pub async fn get_instructions(
        &self,
        request: &str,
        step_num: u32,
    ) -> AgentResult<InstructionSet> {
        if !self.provider.supports_vision() {
            return self.provider.get_instructions(request, step_num, None).await;
        }

        let shots = self.number_of_screenshots.max(1);
        let mut merged: Option<InstructionSet> = None;
        let mut last_error: Option<AgentError> = None;

        for shot_index in 0..shots {
            let attempt = self.consult_with_screenshot(request, step_num).await;
            match attempt {
                Ok(set) => match merged.as_mut() {
                    Some(merged) => merged.merge(set),
                    None => merged = Some(set),
                },
                Err(e) => {
                    if shots > 1 {
                        tracing::warn!(shot_index, error = %e, "screenshot attempt failed, skipping");
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        merged.ok_or_else(|| {
            last_error.unwrap_or_else(|| AgentError::Model("no screenshot attempt succeeded".into()))
        })
    }

    async fn consult_with_screenshot(
        &self,
        request: &str,
        step_num: u32,
    ) -> AgentResult<InstructionSet> {
        let shot = self.screen.capture().await?;
        self.status.send_artifact(
            "I took a screenshot and sent it to the AI model",
            shot.path.clone(),
        );
        self.provider
            .get_instructions(request, step_num, Some(&shot))
            .await
    }

    /// Last-resort unstructured call; the raw text stands in for a
    /// completion message.
    pub async fn raw_completion(&self, request: &str) -> AgentResult<String> {
        self.provider.send_raw(request).await
    }

    pub async fn release(&self) {
        self.provider.release().await;
    }
}
