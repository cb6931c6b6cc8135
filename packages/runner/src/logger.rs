// ABOUTME: Four-level logger capability consumed by the runner and mount subsystem
// ABOUTME: Default implementation forwards to tracing with a component field

use std::fmt;
use std::sync::Arc;

/// Logger interface handed to the runner and to every mount operation
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards log calls to `tracing`, tagging each event with a component name
#[derive(Clone)]
pub struct TracingLogger {
    component: String,
}

impl TracingLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn shared(component: impl Into<String>) -> Arc<dyn Logger> {
        Arc::new(Self::new(component))
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

impl fmt::Debug for TracingLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingLogger")
            .field("component", &self.component)
            .finish()
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(component = %self.component, "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(component = %self.component, "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(component = %self.component, "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(component = %self.component, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_logger_keeps_component() {
        let logger = TracingLogger::new("runner");
        assert_eq!(logger.component(), "runner");
        // No subscriber installed; calls must not panic
        logger.debug("debug");
        logger.info("info");
        logger.warn("warn");
        logger.error("error");
    }
}
