//! Assembles the persistent system context sent with every model call:
//! what the agent can do, what machine it is on, and what the user has
//! customized.

use crate::config::Settings;

/// Core instructions describing the reply contract and the action catalogue.
const BASE_CONTEXT: &str = "\
You are an agent that can control a computer by executing commands based on user requests. \
You will receive a user request, and may have access to a screenshot. \
If the user request is a command, you MUST reply with JSON that contains a list of steps. \
Each step must have a `function` (the name of the action to perform) and `parameters` \
(a dictionary with the required parameters for that action), as well as a \
`human_readable_justification`. \
The `human_readable_justification` should be written as if you are a human expressing what \
you are trying to achieve. \
When the user request is fully complete, return a `done` message that acknowledges \
completion, explaining to the user what you did, and your reasoning. The done message MUST \
be inside the done key in the JSON response. \
The format of the JSON should be \
{\"steps\": [{\"function\": \"...\", \"parameters\": {\"key1\": \"value1\", ...}, \
\"human_readable_justification\": \"...\"}, {...}, ...], \"done\": \"...\"} \
If the user request is not complete, the done key must be null. \
If the user request is complete, and you don't need to perform any more steps, the steps \
must be an empty list `[]`. \
You MUST always reply in valid JSON, even if you don't know how to reply, or there is an \
error. \
If the user request is a question, answer it directly inside the done field, without steps. \
You will have access to `open_application` and `close_application` functions, and must \
specify the application name in the `application_name` parameter. \
You will also have access to `sleep`, `write`, `press`, `hotkey`, `scroll`, `moveTo`, \
`click`, `doubleClick` commands for interacting with the OS. \
`sleep` takes `secs`; `write` takes `string` and an optional `interval`; `press` takes \
`keys` with optional `presses` and `interval`; `hotkey` takes the keys to combine as its \
parameter values in order; `scroll` takes `amount`; `moveTo`, `click` and `doubleClick` \
take `x` and `y` with an optional `duration` or `button`.";

pub fn operating_system() -> String {
    format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Best-effort inventory of installed applications. Only macOS exposes a
/// directory we can cheaply enumerate; elsewhere the model gets "Unknown"
/// and has to rely on `open_application` spawning by name.
pub fn locally_installed_apps() -> Vec<String> {
    if cfg!(target_os = "macos") {
        match std::fs::read_dir("/Applications") {
            Ok(entries) => {
                let apps: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().into_string().ok())
                    .filter(|name| name.ends_with(".app"))
                    .collect();
                tracing::info!(count = apps.len(), "listed installed applications");
                apps
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not list /Applications");
                vec!["Unknown".to_string()]
            }
        }
    } else {
        vec!["Unknown".to_string()]
    }
}

/// Builds the full context string for one model session from the current
/// settings snapshot and the primary screen size.
pub fn build_context(settings: &Settings, screen_size: Option<(u32, u32)>) -> String {
    let mut context = String::from(BASE_CONTEXT);

    context.push_str(&format!(
        " Locally installed apps are {}.",
        locally_installed_apps().join(",")
    ));
    context.push_str(&format!(" OS is {}.", operating_system()));
    if let Some((w, h)) = screen_size {
        context.push_str(&format!(" Primary screen size is ({w}, {h}).\n"));
    }

    if !settings.default_browser.is_empty() {
        context.push_str(&format!("\nDefault browser is {}.", settings.default_browser));
    }
    if !settings.custom_llm_instructions.is_empty() {
        context.push_str(&format!(
            "\nCustom user-added info: {}.",
            settings.custom_llm_instructions
        ));
    }
    if settings.number_of_screenshots > 0 {
        context.push_str(&format!(
            "\nThe number of screenshots you must take for this command is {}",
            settings.number_of_screenshots
        ));
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_carries_user_customizations() {
        let mut settings = Settings::default();
        settings.default_browser = "Firefox".into();
        settings.custom_llm_instructions = "prefer dark mode".into();

        let ctx = build_context(&settings, Some((1920, 1080)));
        assert!(ctx.contains("Default browser is Firefox."));
        assert!(ctx.contains("prefer dark mode"));
        assert!(ctx.contains("(1920, 1080)"));
    }

    #[test]
    fn context_mentions_action_catalogue() {
        let ctx = build_context(&Settings::default(), None);
        for name in ["open_application", "close_application", "doubleClick", "hotkey"] {
            assert!(ctx.contains(name), "missing {name}");
        }
    }
}
