//! Injected logging capability.
//!
//! Every toolwire component receives a [`Logger`] in its constructor and
//! emits its `tracing` events with that logger's span as the parent, so the
//! embedding application decides where events go and how they are tagged.
//! There is no global fallback.

use tracing::Span;

/// Handle to the span a component logs under.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
}

impl Logger {
    /// Log under an existing span.
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// A root logger for one component, e.g. `Logger::component("hub")`.
    pub fn component(name: &'static str) -> Self {
        Self::new(tracing::info_span!("toolwire", component = name))
    }

    /// A logger whose events are attached to no span. Useful in tests.
    pub fn disabled() -> Self {
        Self::new(Span::none())
    }

    /// Child logger tagged with a server name.
    pub fn for_server(&self, server: &str) -> Self {
        Self::new(tracing::info_span!(parent: &self.span, "server", name = %server))
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logger_has_no_span() {
        let log = Logger::disabled();
        assert!(log.span().is_none());
        // Children of a disabled parent are still valid handles.
        let child = log.for_server("fs");
        let _guard = child.span().enter();
    }
}
