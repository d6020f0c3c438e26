// src/logging.rs

//! Injected logging capability
//!
//! Components never reach for a process-wide logger. Each one receives a
//! [`Logger`] in its dependency struct: a cloneable handle on a
//! `tracing::Span` naming the component and, where known, the application.
//! Events emitted while the span is entered (sync code) or while an
//! instrumented future runs (async code) carry that context.

use std::future::Future;
use tracing::instrument::Instrumented;
use tracing::{Instrument, Span};

/// Logging handle threaded through component constructors
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
}

impl Logger {
    /// Root logger for one process run
    pub fn root() -> Self {
        Self {
            span: tracing::info_span!("relpack"),
        }
    }

    /// Logger that drops everything (for callers without a subscriber)
    pub fn disabled() -> Self {
        Self { span: Span::none() }
    }

    /// Derive a logger for a named component
    pub fn child(&self, component: &'static str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "component", name = component),
        }
    }

    /// Derive a logger scoped to one application id
    pub fn for_app(&self, app_id: &str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "app", id = app_id),
        }
    }

    /// Enter the span for the duration of a synchronous scope
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// Attach the span to a future
    pub fn instrument<F: Future>(&self, future: F) -> Instrumented<F> {
        future.instrument(self.span.clone())
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::root()
    }
}

/// Install the stderr subscriber (`RUST_LOG` overrides the `info` default)
pub fn init_subscriber(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
