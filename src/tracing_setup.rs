use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with the configured level and output format.
///
/// `level` is an `EnvFilter` directive (e.g. `"info"` or
/// `"dendrite=debug,tower_http=info"`); `RUST_LOG` is not consulted.
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(include_spans)
                    .with_span_list(include_spans),
            )
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::info!(
        level,
        json = json_format,
        spans = include_spans,
        "Dendrite logging initialized"
    );
    Ok(())
}

/// Configure tracing for specific service components
pub fn configure_component_tracing(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Create a request-scoped tracing span
pub fn create_request_span(method: &str, uri: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.uri = uri,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Create the span a leader's downstream computation runs in
pub fn create_dispatch_span(target: &str, key: &str) -> tracing::Span {
    tracing::info_span!(
        "dispatch",
        dispatch.target = target,
        request.key = key,
        dispatch.outcome = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}
