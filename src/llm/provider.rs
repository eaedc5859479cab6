use async_trait::async_trait;

use crate::errors::AgentResult;
use crate::llm::types::InstructionSet;
use crate::screen::Screenshot;

/// One model backend family. The client picks the screenshot policy off
/// `supports_vision` and otherwise treats every family identically.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Model identifier this provider was built for.
    fn name(&self) -> &str;

    /// Whether requests should carry a screenshot.
    fn supports_vision(&self) -> bool;

    /// One structured call: formats the request, sends it, decodes the
    /// response into an instruction set.
    async fn get_instructions(
        &self,
        request: &str,
        step_num: u32,
        screenshot: Option<&Screenshot>,
    ) -> AgentResult<InstructionSet>;

    /// Unstructured call used as the last-resort fallback; returns the raw
    /// response text without JSON decoding.
    async fn send_raw(&self, request: &str) -> AgentResult<String>;

    /// Releases provider-side resources (conversation session, uploaded
    /// artifacts). Called when the surrounding session ends.
    async fn release(&self);
}
