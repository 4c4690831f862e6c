use rand::RngCore;
use tracing::{Span, info_span, warn};

use overseer_types::SpanContext;

/// Creates and re-attaches per-ToolCall root spans.
///
/// Each ToolCall gets exactly one span for its whole lifetime: the first
/// non-terminal reconciliation mints it (as a child of the parent Task's
/// span when one is available) and persists the hex-encoded context on the
/// record; every later reconciliation re-enters the same identifiers.
#[derive(Debug, Clone, Default)]
pub struct Tracer;

impl Tracer {
    pub fn new() -> Self {
        Self
    }

    /// Mints a span context. A child span shares the parent's trace id; a
    /// detached span starts a fresh trace.
    pub fn root_span(&self, parent: Option<&SpanContext>) -> SpanContext {
        let mut rng = rand::thread_rng();

        let trace_id = match parent.and_then(SpanContext::trace_id_bytes) {
            Some(bytes) => bytes,
            None => {
                let mut bytes = [0u8; 16];
                rng.fill_bytes(&mut bytes);
                bytes
            }
        };

        let mut span_id = [0u8; 8];
        rng.fill_bytes(&mut span_id);

        SpanContext::from_bytes(trace_id, span_id)
    }

    /// Builds a tracing span carrying the persisted identifiers. Best
    /// effort: a malformed stored context is logged and produces a span
    /// without trace fields, never an error.
    pub fn attach(&self, name: &str, context: &SpanContext) -> Span {
        match SpanContext::parse(&context.trace_id, &context.span_id) {
            Ok(ctx) => info_span!(
                "tool_call",
                otel.name = %name,
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
            ),
            Err(error) => {
                warn!(%name, %error, "Stored span context is malformed; attaching without trace ids");
                info_span!("tool_call", otel.name = %name)
            }
        }
    }
}
