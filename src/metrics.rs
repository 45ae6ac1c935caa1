use tracing::trace;

// Trace-based counters; the Prometheus recorder is only installed by the
// server binary so tests never touch global metric state.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "catalyst.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128, ok: bool) {
    trace!(
        target = "catalyst.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        ok = ok,
        "stage_elapsed"
    );
}

pub fn publish_outcome(platform: &'static str, success: bool, refresh_attempts: u32) {
    trace!(
        target = "catalyst.metrics",
        platform = platform,
        success = success,
        refresh_attempts = refresh_attempts,
        "publish_outcome"
    );
}
