//! Logging init helper for the hosting process.
//!
//! The transport/session host (out of scope, see spec §1) owns the actual
//! process entrypoint, but it needs a one-line way to get the same
//! structured-JSON-to-stderr logging the core's own `tracing` calls assume.
//! This mirrors the shape of the teacher's `ops::tracing::Layer` +
//! `ops::stderr_log_handler` pair, collapsed into a single `init()` since we
//! have no need for the custom per-span `Log` shape here.

use tracing_subscriber::prelude::*;

/// Install a global `tracing` subscriber that writes newline-delimited JSON
/// to stderr, honoring `RUST_LOG` for level filtering. Call once at process
/// startup. Idempotent calls after the first are a no-op (the underlying
/// `tracing` global default can only be set once per process).
pub fn init() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Fields every shard-scoped log line should carry, attached via
/// `tracing::info_span!("shard", shard_id = %id, namespace = %ns)` at the
/// entry points of `lattice-shard` and `lattice-graph`.
pub const SHARD_SPAN_NAME: &str = "shard";
pub const ORCHESTRATOR_SPAN_NAME: &str = "orchestrator";
