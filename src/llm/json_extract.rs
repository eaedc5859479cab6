//! Best-effort extraction of the first top-level JSON object from free-form
//! model text. The model is asked to reply in pure JSON but routinely wraps
//! it in prose or markdown fences, so we scan for the first `{` and its
//! balancing `}`, string- and escape-aware.

use crate::errors::{AgentError, AgentResult};
use crate::llm::types::InstructionSet;

/// Returns the first balanced top-level JSON object in `text`, or None.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decodes the model's raw text into an `InstructionSet`. An unparsable
/// response is an error, never a silent empty set.
pub fn parse_instructions(raw: &str) -> AgentResult<InstructionSet> {
    let object = extract_json_object(raw).ok_or_else(|| {
        tracing::error!(response = %raw, "no JSON object in model response");
        AgentError::Parse("no JSON object found in model response".into())
    })?;
    serde_json::from_str(object).map_err(|e| {
        tracing::error!(error = %e, response = %object, "model response failed to decode");
        AgentError::Parse(format!("could not decode instructions: {e}"))
    })
}
