//! Application span helpers.
//!
//! # Design
//! - Provides an application-level span guard so top-level spans carry mode/build info.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    #[must_use]
    /// Enter the application-level tracing span for the lifetime of the guard.
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "console",
            mode = %mode,
            build_sha = %build_sha(),
            daemon = tracing::field::Empty
        )));
        let guard = span.enter();
        Self { _guard: guard }
    }
}

/// Record the daemon endpoint the console is mirroring on the active span.
pub fn record_daemon(url: &str) {
    Span::current().record("daemon", tracing::field::display(url));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_context_guard_records_daemon_field() {
        let guard = GlobalContextGuard::new("test");
        record_daemon("http://127.0.0.1:8080");
        drop(guard);
    }
}
