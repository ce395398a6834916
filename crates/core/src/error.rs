use thiserror::Error;

/// Result type for fsstream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fsstream operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file or environment could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// A manager was asked for with an unusable configuration (empty watch
    /// set, missing consumer, no execution context). Raised before any
    /// native resource is allocated.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The native notification facility refused to allocate a subscription
    #[error("Failed to create event stream: {0}")]
    StreamCreation(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Creates a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a stream creation error
    pub fn stream_creation(msg: impl Into<String>) -> Self {
        Self::StreamCreation(msg.into())
    }

    /// Adds context to any error
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }

    pub fn is_stream_creation(&self) -> bool {
        matches!(self, Self::StreamCreation(_))
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::with_context(context, e))
    }
}
