//! The request-execution loop: fetch instructions from the model, run them,
//! decide whether to continue or stop. One Core serves one front-end; at
//! most one request is active at a time and a new request preempts the old
//! one through the shared interrupt flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::{Settings, SettingsStore};
use crate::executor::dispatcher::ActionExecutor;
use crate::executor::input::InputDriver;
use crate::executor::interpreter::{Interpreter, ProcessOutcome};
use crate::llm::client::LlmClient;
use crate::screen::ScreenProvider;
use crate::status::StatusSink;

const MAX_FETCH_RETRIES: u32 = 3;
const FETCH_BACKOFF_STEP: Duration = Duration::from_millis(100);
/// Grace period between interrupting the previous request and starting the
/// next one.
const PREEMPTION_GRACE: Duration = Duration::from_millis(100);

const NO_MODEL_STATUS: &str = "Set your API key in settings and restart the app";
const FETCH_FAILED_STATUS: &str = "Failed to fetch valid instructions after multiple retries.";

/// How one run ended. Exactly one of these is reported per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Completed(String),
    Interrupted,
    Failed(String),
}

pub struct Core {
    status: StatusSink,
    interrupt: Arc<AtomicBool>,
    settings: Settings,
    settings_rx: watch::Receiver<Settings>,
    screen: Arc<dyn ScreenProvider>,
    interpreter: Interpreter,
    llm: Option<LlmClient>,
}

impl Core {
    pub async fn new(
        store: &SettingsStore,
        screen: Arc<dyn ScreenProvider>,
        input: Arc<dyn InputDriver>,
        status: StatusSink,
    ) -> Self {
        let interrupt = Arc::new(AtomicBool::new(false));
        let executor = ActionExecutor::new(input, status.clone());
        let interpreter = Interpreter::new(executor, status.clone(), Arc::clone(&interrupt));

        let settings = store.current();
        let llm = match LlmClient::new(&settings, Arc::clone(&screen), status.clone()).await {
            Ok(client) => {
                tracing::info!(model = %client.model_name(), "model client initialized");
                Some(client)
            }
            Err(e) => {
                let message = format!("{NO_MODEL_STATUS}. Error: {e}");
                status.send(message);
                tracing::error!(error = %e, "model client initialization failed");
                None
            }
        };

        Self {
            status,
            interrupt,
            settings,
            settings_rx: store.subscribe(),
            screen,
            interpreter,
            llm,
        }
    }

    /// Shareable cancellation handle for the front-end.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Requests cooperative cancellation of whatever is running. An OS
    /// primitive already in flight finishes; nothing further starts.
    pub fn cancel(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Entry point for a new user request. Any in-flight run is interrupted
    /// first, given a grace pause to observe the flag, and then the flag is
    /// cleared for the new run.
    pub async fn execute_user_request(&mut self, request: &str) -> TerminalStatus {
        self.cancel();
        tokio::time::sleep(PREEMPTION_GRACE).await;
        self.execute(request).await
    }

    async fn execute(&mut self, request: &str) -> TerminalStatus {
        self.interrupt.store(false, Ordering::SeqCst);
        self.reload_settings_if_changed().await;

        let Some(llm) = self.llm.as_ref() else {
            self.status.send(NO_MODEL_STATUS);
            tracing::warn!("request refused, model client unavailable");
            return TerminalStatus::Failed(NO_MODEL_STATUS.into());
        };

        let mut step_num: u32 = 0;
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return self.report_interrupted();
            }

            // ── Fetch instructions with bounded retries ───────────────────
            let mut instructions = None;
            let mut retries = 0;
            while retries < MAX_FETCH_RETRIES {
                if self.interrupt.load(Ordering::SeqCst) {
                    return self.report_interrupted();
                }
                match llm.get_instructions(request, step_num).await {
                    Ok(set) if !set.is_empty() => {
                        instructions = Some(set);
                        break;
                    }
                    Ok(_) => {
                        retries += 1;
                        tracing::warn!(
                            retries,
                            max = MAX_FETCH_RETRIES,
                            "model returned empty instructions, retrying"
                        );
                        tokio::time::sleep(FETCH_BACKOFF_STEP * retries).await;
                    }
                    Err(e) => {
                        retries += 1;
                        tracing::error!(error = %e, retries, "error fetching instructions");
                        tokio::time::sleep(FETCH_BACKOFF_STEP * retries).await;
                    }
                }
                if self.interrupt.load(Ordering::SeqCst) {
                    return self.report_interrupted();
                }
            }

            // ── Raw-conversation fallback ─────────────────────────────────
            let Some(set) = instructions else {
                match llm.raw_completion(request).await {
                    Ok(text) if !text.is_empty() => {
                        self.status.send(text.clone());
                        return TerminalStatus::Completed(text);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "raw conversation fallback failed");
                    }
                }
                self.status.send(FETCH_FAILED_STATUS);
                tracing::error!("{FETCH_FAILED_STATUS}");
                return TerminalStatus::Failed(FETCH_FAILED_STATUS.into());
            };

            // ── Execute the steps (done is honored only afterwards) ───────
            match self.interpreter.process(&set.steps).await {
                ProcessOutcome::Completed => {}
                ProcessOutcome::StepFailed { index } => {
                    let step_json = serde_json::to_string(&set.steps[index])
                        .unwrap_or_else(|_| format!("step {index}"));
                    self.status
                        .send(format!("Unable to process command step: {step_json}"));
                    tracing::error!(index, step = %step_json, "step execution failed");
                    return TerminalStatus::Failed("Unable to execute the request".into());
                }
                ProcessOutcome::Interrupted => return self.report_interrupted(),
            }

            // ── Decide: stop or fetch the next turn ───────────────────────
            if set.has_done() {
                let done = set.done.unwrap_or_default();
                self.status.send(done.clone());
                self.play_ding_on_completion();
                return TerminalStatus::Completed(done);
            }

            self.status
                .send("Fetching further instructions based on current state");
            step_num += 1;
        }
    }

    fn report_interrupted(&self) -> TerminalStatus {
        self.status.send("Interrupted");
        tracing::info!("execution interrupted");
        TerminalStatus::Interrupted
    }

    fn play_ding_on_completion(&self) {
        if self.settings.play_ding_on_completion {
            use std::io::Write as _;
            print!("\x07");
            let _ = std::io::stdout().flush();
        }
    }

    /// Picks up a new settings snapshot published since the last run and
    /// rebuilds the model client from it. Mid-run settings stay frozen.
    async fn reload_settings_if_changed(&mut self) {
        if !self.settings_rx.has_changed().unwrap_or(false) {
            return;
        }
        self.settings = self.settings_rx.borrow_and_update().clone();
        tracing::info!(model = %self.settings.model, "settings changed, rebuilding model client");
        if let Some(old) = self.llm.take() {
            old.release().await;
        }
        match LlmClient::new(&self.settings, Arc::clone(&self.screen), self.status.clone()).await {
            Ok(client) => self.llm = Some(client),
            Err(e) => {
                let message = format!("{NO_MODEL_STATUS}. Error: {e}");
                self.status.send(message);
                tracing::error!(error = %e, "model client rebuild failed");
            }
        }
    }

    /// Releases provider-side resources. Call when the front-end shuts down.
    pub async fn cleanup(&mut self) {
        if let Some(llm) = self.llm.take() {
            llm.release().await;
        }
        tracing::info!("core cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use crate::executor::dispatcher::tests::RecordingDriver;
    use crate::llm::client::tests::{step, FakeScreen, ScriptedProvider};
    use crate::llm::types::{Action, InstructionSet};

    struct Harness {
        core: Core,
        provider: Arc<ScriptedProvider>,
        driver: Arc<RecordingDriver>,
    }

    async fn harness(provider: ScriptedProvider) -> Harness {
        let provider = Arc::new(provider);
        let driver = Arc::new(RecordingDriver::default());
        let screen: Arc<dyn ScreenProvider> = Arc::new(FakeScreen::new());
        let (status, _rx) = StatusSink::channel();
        let store = SettingsStore::new(Settings::default());

        let interrupt = Arc::new(AtomicBool::new(false));
        let executor = ActionExecutor::new(driver.clone(), status.clone());
        let interpreter = Interpreter::new(executor, status.clone(), Arc::clone(&interrupt));
        let llm = LlmClient::from_parts(
            provider.clone(),
            Arc::clone(&screen),
            status.clone(),
            1,
        );

        let core = Core {
            status,
            interrupt,
            settings: Settings::default(),
            settings_rx: store.subscribe(),
            screen,
            interpreter,
            llm: Some(llm),
        };
        Harness {
            core,
            provider,
            driver,
        }
    }

    fn scroll_step(amount: i64) -> Action {
        let mut action = step("scroll");
        action
            .parameters
            .insert("amount".into(), serde_json::json!(amount));
        action
    }

    #[tokio::test]
    async fn done_terminates_without_further_model_call() {
        let mut h = harness(ScriptedProvider::new(vec![Ok(InstructionSet {
            steps: vec![],
            done: Some("All done".into()),
        })]))
        .await;

        let result = h.core.execute_user_request("do the thing").await;
        assert_eq!(result, TerminalStatus::Completed("All done".into()));
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.provider.raw_call_count(), 0);
    }

    #[tokio::test]
    async fn recurses_with_incremented_step_until_done() {
        let mut h = harness(ScriptedProvider::new(vec![
            Ok(InstructionSet {
                steps: vec![scroll_step(1)],
                done: None,
            }),
            Ok(InstructionSet {
                steps: vec![],
                done: Some("Finished".into()),
            }),
        ]))
        .await;

        let result = h.core.execute_user_request("scroll a bit").await;
        assert_eq!(result, TerminalStatus::Completed("Finished".into()));
        assert_eq!(*h.provider.seen_steps.lock().unwrap(), vec![0, 1]);
        assert_eq!(h.driver.recorded().len(), 1);
    }

    #[tokio::test]
    async fn steps_run_before_done_is_honored() {
        let mut h = harness(ScriptedProvider::new(vec![Ok(InstructionSet {
            steps: vec![scroll_step(2)],
            done: Some("Did it".into()),
        })]))
        .await;

        let result = h.core.execute_user_request("one turn").await;
        assert_eq!(result, TerminalStatus::Completed("Did it".into()));
        assert_eq!(h.driver.recorded().len(), 1);
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn retry_bound_then_raw_fallback() {
        let mut scripted = ScriptedProvider::new(vec![
            Err(AgentError::Model("bad".into())),
            Err(AgentError::Model("bad".into())),
            Err(AgentError::Model("bad".into())),
        ]);
        scripted.raw_response = Some("Here is what I know.".into());
        let mut h = harness(scripted).await;

        let result = h.core.execute_user_request("explain").await;
        assert_eq!(h.provider.call_count(), MAX_FETCH_RETRIES);
        assert_eq!(h.provider.raw_call_count(), 1);
        assert_eq!(
            result,
            TerminalStatus::Completed("Here is what I know.".into())
        );
    }

    #[tokio::test]
    async fn fallback_failure_fails_the_run() {
        let mut h = harness(ScriptedProvider::new(vec![
            Err(AgentError::Model("bad".into())),
            Err(AgentError::Model("bad".into())),
            Err(AgentError::Model("bad".into())),
        ]))
        .await;

        let result = h.core.execute_user_request("explain").await;
        assert_eq!(result, TerminalStatus::Failed(FETCH_FAILED_STATUS.into()));
    }

    #[tokio::test]
    async fn empty_instruction_sets_count_against_retries() {
        let mut h = harness(ScriptedProvider::new(vec![
            Ok(InstructionSet::default()),
            Ok(InstructionSet::default()),
            Ok(InstructionSet::default()),
        ]))
        .await;

        let result = h.core.execute_user_request("noop").await;
        assert_eq!(h.provider.call_count(), MAX_FETCH_RETRIES);
        assert!(matches!(result, TerminalStatus::Failed(_)));
    }

    #[tokio::test]
    async fn failing_step_fails_the_run() {
        let bad_click = step("click"); // no coordinates
        let mut h = harness(ScriptedProvider::new(vec![Ok(InstructionSet {
            steps: vec![scroll_step(1), bad_click, scroll_step(9)],
            done: Some("never reached".into()),
        })]))
        .await;

        let result = h.core.execute_user_request("click around").await;
        assert_eq!(
            result,
            TerminalStatus::Failed("Unable to execute the request".into())
        );
        // The step after the failure never ran.
        assert_eq!(h.driver.recorded().len(), 1);
    }

    #[tokio::test]
    async fn stale_interrupt_is_cleared_at_run_start() {
        let mut h = harness(ScriptedProvider::new(vec![Ok(InstructionSet {
            steps: vec![],
            done: Some("ran anyway".into()),
        })]))
        .await;

        h.core.cancel();
        let result = h.core.execute_user_request("fresh run").await;
        assert_eq!(result, TerminalStatus::Completed("ran anyway".into()));
    }

    #[tokio::test]
    async fn cancel_mid_plan_stops_before_next_step() {
        let mut sleep_action = step("sleep");
        sleep_action
            .parameters
            .insert("secs".into(), serde_json::json!(0.3));
        let h = harness(ScriptedProvider::new(vec![Ok(InstructionSet {
            steps: vec![sleep_action, scroll_step(5)],
            done: Some("unreachable".into()),
        })]))
        .await;

        let interrupt = h.core.interrupt_handle();
        let driver = Arc::clone(&h.driver);
        let mut core = h.core;
        let run = tokio::spawn(async move { core.execute_user_request("slow plan").await });

        // Land inside the sleep step, after the preemption grace pause.
        tokio::time::sleep(Duration::from_millis(250)).await;
        interrupt.store(true, Ordering::SeqCst);

        assert_eq!(run.await.unwrap(), TerminalStatus::Interrupted);
        // The scroll after the checkpoint never reached the driver.
        assert!(driver.recorded().is_empty());
    }

    #[tokio::test]
    async fn missing_model_client_fails_immediately() {
        let mut h = harness(ScriptedProvider::new(vec![])).await;
        h.core.llm = None;

        let result = h.core.execute_user_request("anything").await;
        assert_eq!(result, TerminalStatus::Failed(NO_MODEL_STATUS.into()));
        assert_eq!(h.provider.call_count(), 0);
    }
}
