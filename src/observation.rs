//! Per-request observation records, emitted exactly once per inbound
//! request (including on failure paths) and handed to an [`ObservationSink`].
//!
//! The default sink logs via `tracing`, standing in for the external
//! SQLite-backed traffic-log/token-usage services the spec reserves as
//! out-of-scope collaborators (§6).

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub enum Protocol {
    Openai,
    Anthropic,
    Gemini,
}

#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub id: String,
    pub timestamp: i64,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub duration_ms: u64,
    pub original_model: String,
    pub mapped_model: String,
    pub account_email: Option<String>,
    pub error: Option<String>,
    pub protocol: Protocol,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

pub trait ObservationSink: Send + Sync {
    fn record(&self, observation: Observation);
}

pub struct TracingSink;

impl ObservationSink for TracingSink {
    fn record(&self, observation: Observation) {
        tracing::info!(
            id = %observation.id,
            status = observation.status,
            duration_ms = observation.duration_ms,
            original_model = %observation.original_model,
            mapped_model = %observation.mapped_model,
            account_email = observation.account_email.as_deref().unwrap_or(""),
            protocol = ?observation.protocol,
            input_tokens = observation.input_tokens,
            output_tokens = observation.output_tokens,
            error = observation.error.as_deref().unwrap_or(""),
            "observation"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_sink_accepts_an_error_observation() {
        let sink = TracingSink;
        sink.record(Observation {
            id: "obs-1".into(),
            timestamp: 0,
            method: "POST".into(),
            url: "/v1/messages".into(),
            status: 401,
            duration_ms: 5,
            original_model: "claude-opus-4".into(),
            mapped_model: "claude-sonnet-4-5".into(),
            account_email: None,
            error: Some("authentication failed".into()),
            protocol: Protocol::Anthropic,
            input_tokens: None,
            output_tokens: None,
        });
    }
}
