use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, Layer, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    registry::LookupSpan, util::SubscriberInitExt,
};

/// Installs the global subscriber. `RUST_LOG` takes precedence over `verbose`.
pub fn init_logging(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env().ok();

    tracing_subscriber::registry()
        .with(level_filter(verbose, env_filter))
        .with(fmt::layer().with_target(false))
        .init();
}

/// The env filter when one was given, otherwise `tasas` at `debug` or `warn` and everything
/// else at `warn`.
fn level_filter<S>(
    verbose: bool,
    env_filter: Option<EnvFilter>,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(env_filter) = env_filter {
        return env_filter.boxed();
    }
    let app_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    Targets::new()
        .with_target("tasas", app_level)
        .with_default(LevelFilter::WARN)
        .boxed()
}
