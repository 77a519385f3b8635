use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// RFC 3339 UTC timestamps
struct UtcTimer;

impl fmt::time::FormatTime for UtcTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }
}

/// Install the global tracing subscriber. Honors `RUST_LOG`, defaults to
/// `info`. Safe to call more than once; later calls are no-ops.
pub fn init_logger() {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::Layer::new()
        .with_target(true)
        .with_level(true)
        .with_timer(UtcTimer);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .try_init();
}
