//! Structured logging initialization for the tether daemon.
//!
//! One stderr layer is installed: JSON lines in robot mode, pretty output on a
//! terminal, compact plain output otherwise. The HTTP surface's request
//! tracing (`tower_http`) is only enabled while the API is served.

use std::io::{self, IsTerminal};

use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// What the process is about to do, as far as logging cares.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// JSON lines for machine consumption.
    pub json: bool,
    /// 0 = info, 1 = debug, 2+ = trace.
    pub verbose: u8,
    /// Errors only; wins over `verbose`.
    pub quiet: bool,
    /// The HTTP API is being served.
    pub http: bool,
}

impl LogOptions {
    /// Filter used when `RUST_LOG` is unset.
    pub fn directives(&self) -> String {
        let level = if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        };

        let mut directives = format!("tether={level}");
        if self.http {
            let http_level = match (self.quiet, self.verbose) {
                (true, _) => "error",
                (false, 0) => "warn",
                (false, _) => "debug",
            };
            directives.push_str(",tower_http=");
            directives.push_str(http_level);
        }
        directives
    }

    /// With `-vv`, span closes time every gphoto2 command.
    fn span_events(&self) -> FmtSpan {
        if self.verbose >= 2 && !self.quiet {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn stderr_layer(options: &LogOptions) -> BoxedLayer {
    let spans = options.span_events();
    if options.json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_events(spans)
            .with_writer(io::stderr)
            .boxed()
    } else if io::stderr().is_terminal() {
        fmt::layer()
            .with_target(false)
            .with_span_events(spans)
            .with_writer(io::stderr)
            .boxed()
    } else {
        // Piped or redirected: no ANSI escapes
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_span_events(spans)
            .compact()
            .with_writer(io::stderr)
            .boxed()
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging(options: &LogOptions) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.directives()));

    tracing_subscriber::registry()
        .with(stderr_layer(options).with_filter(filter))
        .init();
}
