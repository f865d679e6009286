//! Error types for pagewire
//!
//! Errors are structured: a kind, the location in the page definition where
//! resolution failed, an underlying cause and an actionable help message.

use std::fmt;
use std::time::Duration;

/// Result type alias for pagewire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pagewire operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Location in the page definition (e.g., "slots.main[0].config.menu")
    pub path: Option<String>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error parsing a page definition or reference
    Parse,
    /// Structural error in the resolver registry
    Registry(RegistryErrorKind),
    /// Error raised while invoking a resolver
    Resolver(ResolverErrorKind),
    /// I/O error (file not found, etc.)
    Io,
    /// Internal error (bug in pagewire)
    Internal,
}

/// Registry errors. These are configuration mistakes and abort the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryErrorKind {
    /// A prefix collides with an already registered ancestor or descendant
    Conflict { prefix: String, existing: String },
    /// A binding cannot be registered as declared
    InvalidBinding { prefix: String },
    /// A resolved source path does not reach a registered resolver
    UnresolvedSource { source: String },
}

/// Resolver errors. The engine recovers from these by yielding `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverErrorKind {
    /// Resolver returned an error
    Custom { resolver: String, message: String },
    /// Resolver did not complete in time
    Timeout { resolver: String, after: Duration },
}

impl Error {
    /// Create a new parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Parse,
            path: None,
            help: None,
            cause: Some(message.into()),
        }
    }

    /// Create a registration conflict error
    pub fn registration_conflict(prefix: impl Into<String>, existing: impl Into<String>) -> Self {
        let existing = existing.into();
        Self {
            kind: ErrorKind::Registry(RegistryErrorKind::Conflict {
                prefix: prefix.into(),
                existing: existing.clone(),
            }),
            path: None,
            help: Some(format!(
                "Resolver prefixes must not nest; choose a prefix that does not overlap '{}'",
                existing
            )),
            cause: None,
        }
    }

    /// Create an invalid binding error
    pub fn invalid_binding(prefix: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Registry(RegistryErrorKind::InvalidBinding {
                prefix: prefix.into(),
            }),
            path: None,
            help: None,
            cause: Some(message.into()),
        }
    }

    /// Create an unresolved source error
    pub fn unresolved_source(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            kind: ErrorKind::Registry(RegistryErrorKind::UnresolvedSource {
                source: source.clone(),
            }),
            path: None,
            help: Some(format!(
                "Register a resolver whose prefix matches '{}' or check the $source for typos",
                source
            )),
            cause: None,
        }
    }

    /// Create a custom resolver error
    pub fn resolver_custom(resolver: impl Into<String>, message: impl Into<String>) -> Self {
        let resolver_name = resolver.into();
        Self {
            kind: ErrorKind::Resolver(ResolverErrorKind::Custom {
                resolver: resolver_name.clone(),
                message: message.into(),
            }),
            path: None,
            help: Some(format!(
                "Check the '{}' resolver implementation",
                resolver_name
            )),
            cause: None,
        }
    }

    /// Create a resolver timeout error
    pub fn resolver_timeout(resolver: impl Into<String>, after: Duration) -> Self {
        Self {
            kind: ErrorKind::Resolver(ResolverErrorKind::Timeout {
                resolver: resolver.into(),
                after,
            }),
            path: None,
            help: Some("Raise EngineOptions::resolver_timeout or speed up the data source".into()),
            cause: None,
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Io,
            path: None,
            help: None,
            cause: Some(message.into()),
        }
    }

    /// Create an internal error (bug in pagewire)
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            path: None,
            help: Some("This is likely a bug in pagewire. Please report it.".into()),
            cause: Some(message.into()),
        }
    }

    /// Add path context to the error, keeping an existing one
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// Add an underlying cause to the error
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Whether this error came from a resolver invocation
    pub fn is_resolver_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Resolver(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Parse => write!(f, "Parse error")?,
            ErrorKind::Registry(r) => match r {
                RegistryErrorKind::Conflict { prefix, existing } => write!(
                    f,
                    "Cannot register resolver {}, because the resolver {} already exists",
                    prefix, existing
                )?,
                RegistryErrorKind::InvalidBinding { prefix } => {
                    write!(f, "Invalid resolver binding: {}", prefix)?
                }
                RegistryErrorKind::UnresolvedSource { source } => {
                    write!(f, "Cannot find resolver for source {}", source)?
                }
            },
            ErrorKind::Resolver(r) => match r {
                ResolverErrorKind::Custom { resolver, message } => {
                    write!(f, "Resolver '{}' error: {}", resolver, message)?
                }
                ResolverErrorKind::Timeout { resolver, after } => write!(
                    f,
                    "Resolver '{}' timed out after {}ms",
                    resolver,
                    after.as_millis()
                )?,
            },
            ErrorKind::Io => write!(f, "I/O error")?,
            ErrorKind::Internal => write!(f, "Internal error")?,
        }

        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::parse(err.to_string())
    }
}
