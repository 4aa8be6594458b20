use anyhow::{Context, Result};
use tracing::{Span, info_span};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Default directive for `-v` repetitions when `RUST_LOG` is unset. The
/// library's filter and finder events sit at debug.
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "info,common_properties=debug",
        _ => "debug",
    }
}

/// Logs go to stderr; stdout carries the result tree.
pub fn init_logging(verbosity: u8) -> Result<()> {
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let fmt_layer = fmt::layer()
        .compact()
        .with_ansi(false)
        .with_target(verbosity > 0)
        .with_writer(std::io::stderr)
        .boxed();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    Ok(())
}

/// Span every event of one search run is recorded under.
pub fn run_span(case_uuid: &str, scope: &'static str, view: &'static str) -> Span {
    info_span!("run", case = %case_uuid, scope, view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_widens_the_default_filter() {
        assert_eq!(default_directive(0), "info");
        assert_eq!(default_directive(1), "info,common_properties=debug");
        assert_eq!(default_directive(5), "debug");
        for verbosity in 0..3 {
            assert!(EnvFilter::try_new(default_directive(verbosity)).is_ok());
        }
    }
}
