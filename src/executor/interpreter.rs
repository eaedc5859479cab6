//! Runs an ordered instruction list through the Action Executor. Fail-fast:
//! later actions assume earlier ones succeeded (a click precedes the typing
//! it enables), so the first failure ends the plan.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::executor::dispatcher::ActionExecutor;
use crate::llm::types::Action;
use crate::status::StatusSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every action executed without failure.
    Completed,
    /// Execution stopped at `index`; no later step was attempted.
    StepFailed { index: usize },
    Interrupted,
}

pub struct Interpreter {
    executor: ActionExecutor,
    status: StatusSink,
    interrupt: Arc<AtomicBool>,
}

impl Interpreter {
    pub fn new(
        executor: ActionExecutor,
        status: StatusSink,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            executor,
            status,
            interrupt,
        }
    }

    pub async fn process(&self, steps: &[Action]) -> ProcessOutcome {
        for (index, action) in steps.iter().enumerate() {
            if self.interrupt.load(Ordering::SeqCst) {
                tracing::info!(index, "plan interrupted before step");
                return ProcessOutcome::Interrupted;
            }

            if let Some(justification) = &action.justification {
                self.status.send(justification.clone());
            }

            if action.is_malformed() {
                tracing::error!(
                    action = %action_json(action),
                    "missing `function` in command"
                );
                return ProcessOutcome::StepFailed { index };
            }

            tracing::info!(
                function = %action.function,
                parameters = %serde_json::Value::Object(action.parameters.clone()),
                justification = action.justification.as_deref().unwrap_or(""),
                "now performing"
            );

            if let Err(e) = self.executor.execute(action).await {
                tracing::error!(
                    error = %e,
                    action = %action_json(action),
                    "error executing command"
                );
                return ProcessOutcome::StepFailed { index };
            }

            if self.interrupt.load(Ordering::SeqCst) {
                tracing::info!(index, "plan interrupted after step");
                return ProcessOutcome::Interrupted;
            }
        }
        ProcessOutcome::Completed
    }
}

fn action_json(action: &Action) -> String {
    serde_json::to_string(action).unwrap_or_else(|_| format!("{action:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::dispatcher::tests::{action, RecordedCall, RecordingDriver};
    use serde_json::json;

    fn interpreter(driver: Arc<RecordingDriver>) -> Interpreter {
        let (status, _rx) = StatusSink::channel();
        let executor = ActionExecutor::new(driver.clone(), status.clone());
        Interpreter::new(executor, status, Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn all_steps_run_in_order() {
        let driver = Arc::new(RecordingDriver::default());
        let interp = interpreter(Arc::clone(&driver));

        let steps = vec![
            action("moveTo", json!({"x": 1, "y": 1, "duration": 0})),
            action("scroll", json!({"amount": 3})),
        ];
        assert_eq!(interp.process(&steps).await, ProcessOutcome::Completed);
        assert_eq!(
            driver.recorded(),
            vec![RecordedCall::MoveTo(1, 1), RecordedCall::Scroll(3)]
        );
    }

    #[tokio::test]
    async fn stops_at_first_failing_step() {
        let driver = Arc::new(RecordingDriver::default());
        let interp = interpreter(Arc::clone(&driver));

        let steps = vec![
            action("scroll", json!({"amount": 1})),
            action("click", json!({"y": 2})), // missing x
            action("scroll", json!({"amount": 9})),
        ];
        assert_eq!(
            interp.process(&steps).await,
            ProcessOutcome::StepFailed { index: 1 }
        );
        // The step after the failure never reached the driver.
        assert_eq!(driver.recorded(), vec![RecordedCall::Scroll(1)]);
    }

    #[tokio::test]
    async fn missing_function_fails_the_step() {
        let driver = Arc::new(RecordingDriver::default());
        let interp = interpreter(Arc::clone(&driver));

        let steps = vec![action("", json!({"x": 1}))];
        assert_eq!(
            interp.process(&steps).await,
            ProcessOutcome::StepFailed { index: 0 }
        );
        assert!(driver.recorded().is_empty());
    }

    #[tokio::test]
    async fn justification_reaches_the_status_sink() {
        let driver = Arc::new(RecordingDriver::default());
        let (status, mut rx) = StatusSink::channel();
        let executor = ActionExecutor::new(driver.clone(), status.clone());
        let interp = Interpreter::new(executor, status, Arc::new(AtomicBool::new(false)));

        let mut act = action("scroll", json!({"amount": 1}));
        act.justification = Some("Scrolling down to reveal the button".into());
        interp.process(&[act]).await;

        match rx.recv().await {
            Some(crate::status::StatusUpdate::Message(m)) => {
                assert_eq!(m, "Scrolling down to reveal the button")
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupt_set_before_processing_skips_all_steps() {
        let driver = Arc::new(RecordingDriver::default());
        let (status, _rx) = StatusSink::channel();
        let executor = ActionExecutor::new(driver.clone(), status.clone());
        let interrupt = Arc::new(AtomicBool::new(true));
        let interp = Interpreter::new(executor, status, interrupt);

        let steps = vec![action("scroll", json!({"amount": 1}))];
        assert_eq!(interp.process(&steps).await, ProcessOutcome::Interrupted);
        assert!(driver.recorded().is_empty());
    }
}
