use std::fmt;
use std::sync::Arc;

type Sink = Arc<dyn Fn(&str) + Send + Sync>;

/// Logging capability handed to each session.
///
/// A `Logger` without a sink drops everything, nothing is logged unless the
/// owner of the session asks for it.
#[derive(Clone, Default)]
pub struct Logger {
    sink: Option<Sink>,
}

impl Logger {
    /// A logger that discards every message
    pub fn silent() -> Self {
        Self { sink: None }
    }

    /// A logger that passes each formatted message to the given function
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            sink: Some(Arc::new(sink)),
        }
    }

    /// A logger that forwards to the `log` facade at debug level
    pub fn debug() -> Self {
        Self::new(|msg| log::debug!("{}", msg))
    }

    /// Prefix every message with the given tag, e.g. the peer address
    pub fn with_prefix(&self, prefix: impl fmt::Display) -> Self {
        match &self.sink {
            None => Self::silent(),
            Some(sink) => {
                let sink = sink.clone();
                let prefix = prefix.to_string();
                Self::new(move |msg| sink(&format!("{} {}", prefix, msg)))
            }
        }
    }

    pub(crate) fn log(&self, args: fmt::Arguments<'_>) {
        if let Some(sink) = &self.sink {
            sink(&args.to_string());
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
