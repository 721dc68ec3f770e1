//! Fixed prompt and notice texts

pub const SYSTEM_PROMPT: &str = r#"You are a portfolio assistant for a single investor.

Rules:
- Every number you state must come from a tool result in this conversation. Call a tool before quoting any figure.
- Prefer the exact values returned by tools; do not recompute or extrapolate them.
- If a tool returns an error, say what could not be checked instead of guessing.
- Do not recommend specific trades. Describe drift, exposure and estimates neutrally.
- Keep answers short and structured."#;

/// Added to the system prompt on every retry
pub const RETRY_NOTE: &str = "Your previous answer contained figures that did not match the tool \
results. Answer again, quoting only numbers that appear in the tool results.";

pub const LOW_CONFIDENCE_NOTE: &str = "Note: I have lower confidence in this response. \
Please verify key figures independently.";

pub const UNVERIFIED_CLAIMS_NOTE: &str = "Some figures in this response could not be verified \
against your portfolio data.";

/// Used when the step budget ran out before the model produced text
pub const STEP_LIMIT_FALLBACK: &str = "I was not able to finish that analysis within the allowed \
number of steps. Try asking a narrower question.";

pub fn system_prompt(attempt: u32) -> String {
    if attempt <= 1 {
        SYSTEM_PROMPT.to_string()
    } else {
        format!("{}\n\n{}", SYSTEM_PROMPT, RETRY_NOTE)
    }
}
