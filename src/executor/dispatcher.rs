//! Dispatches one structured action against the OS: wait/pointer/keyboard
//! primitives plus application open/close. Unknown function names are a
//! deliberate no-op; the model occasionally invents actions, and one stray
//! name must not abort an otherwise good plan.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::errors::{AgentError, AgentResult};
use crate::executor::input::{InputDriver, MouseButton};
use crate::executor::process;
use crate::llm::types::Action;
use crate::status::StatusSink;

const DEFAULT_WRITE_INTERVAL_SECS: f64 = 0.1;
const DEFAULT_PRESS_INTERVAL_SECS: f64 = 0.2;
const DEFAULT_MOVE_DURATION_SECS: f64 = 0.2;
const DEFAULT_SCROLL_AMOUNT: i64 = 100;

pub struct ActionExecutor {
    input: Arc<dyn InputDriver>,
    status: StatusSink,
}

impl ActionExecutor {
    pub fn new(input: Arc<dyn InputDriver>, status: StatusSink) -> Self {
        Self { input, status }
    }

    /// Executes one action. The pre-execution status message goes out before
    /// the primitive runs so the UI shows what is being attempted even if it
    /// then fails.
    pub async fn execute(&self, action: &Action) -> AgentResult<()> {
        let function = action.function.as_str();
        self.status.send(format!("Performing {function}"));

        match function {
            "sleep" => {
                let secs = require_f64(action, "secs")?;
                tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
                Ok(())
            }
            "write" => {
                let text = str_param(action, "string")
                    .or_else(|| str_param(action, "text"))
                    .ok_or_else(|| param_error(action, "string"))?;
                let interval = duration_param(action, "interval", DEFAULT_WRITE_INTERVAL_SECS);
                self.run_input(move |input| input.write(&text, interval)).await
            }
            "press" => {
                let keys = keys_param(action, &["keys", "key"])
                    .ok_or_else(|| param_error(action, "keys"))?;
                let presses = f64_param(action, "presses").unwrap_or(1.0).max(1.0) as u32;
                let interval = duration_param(action, "interval", DEFAULT_PRESS_INTERVAL_SECS);
                self.run_input(move |input| input.press(&keys, presses, interval))
                    .await
            }
            "hotkey" => {
                // Parameter values are the keys to combine, in order.
                let keys: Vec<String> = action
                    .parameters
                    .values()
                    .filter_map(value_as_string)
                    .collect();
                if keys.is_empty() {
                    return Err(param_error(action, "keys"));
                }
                self.run_input(move |input| input.hotkey(&keys)).await
            }
            "scroll" => {
                let amount =
                    f64_param(action, "amount").unwrap_or(DEFAULT_SCROLL_AMOUNT as f64) as i32;
                self.run_input(move |input| input.scroll(amount)).await
            }
            "moveTo" => {
                let (x, y) = point_params(action)?;
                let duration = duration_param(action, "duration", DEFAULT_MOVE_DURATION_SECS);
                self.run_input(move |input| input.move_to(x, y)).await?;
                // duration acts as a settle delay after the pointer jump
                tokio::time::sleep(duration).await;
                Ok(())
            }
            "click" => {
                let (x, y) = point_params(action)?;
                let button = button_param(action);
                self.run_input(move |input| input.click_at(x, y, button, 1))
                    .await
            }
            "doubleClick" => {
                let (x, y) = point_params(action)?;
                let button = button_param(action);
                self.run_input(move |input| input.click_at(x, y, button, 2))
                    .await
            }
            "open_application" => match str_param(action, "application_name") {
                Some(name) => {
                    let result =
                        tokio::task::spawn_blocking(move || process::open_application(&name))
                            .await
                            .map_err(|e| AgentError::Executor(format!("task failed: {e}")))?;
                    self.report_application_failure(result)
                }
                None => {
                    tracing::warn!("open_application without application_name, ignoring");
                    Ok(())
                }
            },
            "close_application" => match str_param(action, "application_name") {
                Some(name) => {
                    let result =
                        tokio::task::spawn_blocking(move || process::close_application(&name))
                            .await
                            .map_err(|e| AgentError::Executor(format!("task failed: {e}")))?;
                    self.report_application_failure(result)
                }
                None => {
                    tracing::warn!("close_application without application_name, ignoring");
                    Ok(())
                }
            },
            other => {
                tracing::warn!(function = other, "no such function in the action catalogue");
                Ok(())
            }
        }
    }

    /// Application-not-found surfaces as a status message for the user and an
    /// error for the caller; the step still counts as failed.
    fn report_application_failure(&self, result: AgentResult<()>) -> AgentResult<()> {
        if let Err(AgentError::ApplicationNotFound(name)) = &result {
            self.status.send(format!("No application found with name {name}"));
        }
        result
    }

    async fn run_input<F>(&self, op: F) -> AgentResult<()>
    where
        F: FnOnce(&dyn InputDriver) -> AgentResult<()> + Send + 'static,
    {
        let input = Arc::clone(&self.input);
        tokio::task::spawn_blocking(move || op(input.as_ref()))
            .await
            .map_err(|e| AgentError::Executor(format!("input task failed: {e}")))?
    }
}

// ── Parameter access ─────────────────────────────────────────────────────────
// The model sometimes sends numbers as strings; accept both.

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn f64_param(action: &Action, key: &str) -> Option<f64> {
    action.parameters.get(key).and_then(value_as_f64)
}

fn str_param(action: &Action, key: &str) -> Option<String> {
    action.parameters.get(key).and_then(value_as_string)
}

fn require_f64(action: &Action, key: &str) -> AgentResult<f64> {
    f64_param(action, key).ok_or_else(|| param_error(action, key))
}

fn duration_param(action: &Action, key: &str, default_secs: f64) -> Duration {
    Duration::from_secs_f64(f64_param(action, key).unwrap_or(default_secs).max(0.0))
}

fn point_params(action: &Action) -> AgentResult<(i32, i32)> {
    let x = require_f64(action, "x")? as i32;
    let y = require_f64(action, "y")? as i32;
    Ok((x, y))
}

fn button_param(action: &Action) -> MouseButton {
    str_param(action, "button")
        .map(|name| MouseButton::from_name(&name))
        .unwrap_or(MouseButton::Left)
}

/// `keys` may be a single name or a list of names.
fn keys_param(action: &Action, candidates: &[&str]) -> Option<Vec<String>> {
    for key in candidates {
        match action.parameters.get(*key) {
            Some(Value::Array(values)) => {
                let keys: Vec<String> = values.iter().filter_map(value_as_string).collect();
                if !keys.is_empty() {
                    return Some(keys);
                }
            }
            Some(value) => {
                if let Some(name) = value_as_string(value) {
                    return Some(vec![name]);
                }
            }
            None => {}
        }
    }
    None
}

fn param_error(action: &Action, key: &str) -> AgentError {
    let parameters = Value::Object(action.parameters.clone());
    tracing::error!(
        function = %action.function,
        parameters = %parameters,
        missing = key,
        "missing or invalid parameter"
    );
    AgentError::Executor(format!(
        "{} requires parameter `{key}`",
        action.function
    ))
}
