//! Aggregated reporting for observer callback failures.
//!
//! A misbehaving event observer must never take down the connection or
//! starve the observers registered after it. Failures raised while
//! delivering a single event are collected into one [`UncaughtError`]:
//! the first failure becomes the primary, the rest are attached as
//! suppressed detail. The aggregate is handed to the connection's
//! [`Handler`] after every observer for that dispatch has run.

use std::fmt;
use std::sync::Arc;

/// An aggregate of one or more failures raised outside the engine's
/// control, typically by event observer callbacks.
#[derive(Debug)]
pub struct UncaughtError {
    /// Where the failures occurred (event keyword, observer description).
    pub context: String,
    /// The first failure raised.
    pub primary: String,
    /// Subsequent failures from the same dispatch, in order.
    pub suppressed: Vec<String>,
}

impl fmt::Display for UncaughtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uncaught failure in {}: {}", self.context, self.primary)?;
        for s in &self.suppressed {
            write!(f, "; suppressed: {}", s)?;
        }
        Ok(())
    }
}

/// Sink for [`UncaughtError`]s. Shared by the connection and cheap to clone.
pub type Handler = Arc<dyn Fn(UncaughtError) + Send + Sync>;

/// A handler that logs each failure at error level.
pub fn print() -> Handler {
    Arc::new(|e| tracing::error!("{e}"))
}

/// A handler that silently discards failures.
pub fn ignore() -> Handler {
    Arc::new(|_| {})
}

/// Collector used while iterating observers for one dispatch.
///
/// The first pushed failure becomes the primary; the rest become
/// suppressed detail. [`Suppressed::finish`] invokes the handler only
/// if at least one failure was recorded.
pub(crate) struct Suppressed {
    context: String,
    primary: Option<String>,
    rest: Vec<String>,
}

impl Suppressed {
    pub(crate) fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            primary: None,
            rest: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, failure: String) {
        if self.primary.is_none() {
            self.primary = Some(failure);
        } else {
            self.rest.push(failure);
        }
    }

    pub(crate) fn finish(self, handler: &Handler) {
        if let Some(primary) = self.primary {
            handler(UncaughtError {
                context: self.context,
                primary,
                suppressed: self.rest,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture() -> (Handler, Arc<Mutex<Vec<UncaughtError>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Handler = Arc::new(move |e| sink.lock().unwrap().push(e));
        (handler, seen)
    }

    #[test]
    fn empty_collector_never_fires() {
        let (handler, seen) = capture();
        Suppressed::new("dispatch").finish(&handler);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn first_failure_is_primary_rest_suppressed() {
        let (handler, seen) = capture();
        let mut collector = Suppressed::new("STATUS_CLIENT dispatch");
        collector.push("observer 1 panicked".to_string());
        collector.push("observer 3 panicked".to_string());
        collector.finish(&handler);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].primary, "observer 1 panicked");
        assert_eq!(seen[0].suppressed, vec!["observer 3 panicked".to_string()]);
        assert_eq!(seen[0].context, "STATUS_CLIENT dispatch");
    }

    #[test]
    fn display_includes_suppressed() {
        let err = UncaughtError {
            context: "ctx".to_string(),
            primary: "boom".to_string(),
            suppressed: vec!["later".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("boom"));
        assert!(text.contains("suppressed: later"));
    }
}
