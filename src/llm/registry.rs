//! Maps the configured model name onto a provider family. Unrecognized
//! names get an explicit, logged fallback instead of a silent guess.

use std::sync::Arc;

use crate::config::{Settings, DEFAULT_MODEL_NAME};
use crate::errors::{AgentError, AgentResult};
use crate::llm::provider::ModelProvider;
use crate::llm::providers::assistant_thread::AssistantThreadProvider;
use crate::llm::providers::chat_completion::ChatCompletionProvider;

pub fn create_provider(
    settings: &Settings,
    context: String,
) -> AgentResult<Arc<dyn ModelProvider>> {
    let api_key = settings.resolved_api_key();
    if api_key.is_empty() {
        return Err(AgentError::Config(
            "no API key configured (settings api_key or DESKPILOT_API_KEY)".into(),
        ));
    }
    let base_url = settings.resolved_base_url();
    let model = if settings.model.is_empty() {
        DEFAULT_MODEL_NAME.to_string()
    } else {
        settings.model.clone()
    };

    let provider: Arc<dyn ModelProvider> = match model.as_str() {
        // Assistant-API capable models keep their context server-side.
        "gpt-4o" | "gpt-4o-mini" | "gpt-4-turbo" => Arc::new(AssistantThreadProvider::new(
            model.clone(),
            base_url,
            api_key,
            context,
        )),
        "gpt-4-vision-preview" => Arc::new(ChatCompletionProvider::new(
            model.clone(),
            base_url,
            api_key,
            context,
            true,
        )),
        // Text-only variants: no screenshot acquisition at all.
        "claude-3-sonnet" | "mistral-large" => Arc::new(ChatCompletionProvider::new(
            model.clone(),
            base_url,
            api_key,
            context,
            false,
        )),
        other => {
            tracing::warn!(
                model = other,
                "model not explicitly supported, using chat completions with vision"
            );
            Arc::new(ChatCompletionProvider::new(
                model.clone(),
                base_url,
                api_key,
                context,
                true,
            ))
        }
    };
    tracing::info!(model = %model, "model provider created");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(model: &str) -> Settings {
        Settings {
            model: model.into(),
            api_key: "sk-test".into(),
            ..Default::default()
        }
    }

    #[test]
    fn known_models_map_to_their_family() {
        let p = create_provider(&settings("gpt-4o"), "ctx".into()).unwrap();
        assert_eq!(p.name(), "gpt-4o");
        assert!(p.supports_vision());

        let p = create_provider(&settings("mistral-large"), "ctx".into()).unwrap();
        assert!(!p.supports_vision());
    }

    #[test]
    fn unrecognized_model_falls_back_to_chat_completions() {
        let p = create_provider(&settings("my-local-model"), "ctx".into()).unwrap();
        assert_eq!(p.name(), "my-local-model");
        assert!(p.supports_vision());
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let mut s = settings("gpt-4o");
        s.api_key.clear();
        // The env fallback must not mask the failure in tests.
        std::env::remove_var("DESKPILOT_API_KEY");
        assert!(matches!(
            create_provider(&s, "ctx".into()),
            Err(AgentError::Config(_))
        ));
    }
}
