//! Error types for the service router

use thiserror::Error;

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;

/// Error types that can occur while loading, routing or serving
#[derive(Error, Debug, Clone)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid URI pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid parameter template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Unsupported services document version {0}")]
    UnsupportedVersion(u32),

    #[error("Unknown generator type '{0}'")]
    UnknownGenerator(String),

    #[error("No service matches {0}")]
    NotFound(String),

    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed {
        method: String,
        path: String,
        allow: Vec<String>,
    },

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::IoError(err.to_string())
    }
}

impl From<http::Error> for RouterError {
    fn from(err: http::Error) -> Self {
        RouterError::HttpError(err.to_string())
    }
}

impl RouterError {
    /// Convert error to HTTP status code
    ///
    /// Routing misses keep their own codes (404 / 405); configuration
    /// problems are operator errors and surface as 500 if they ever reach
    /// a request.
    pub fn to_http_status(&self) -> u16 {
        match self {
            RouterError::NotFound(_) => 404,
            RouterError::MethodNotAllowed { .. } => 405,
            RouterError::HttpError(_) => 400,
            RouterError::ConfigError(_)
            | RouterError::InvalidPattern { .. }
            | RouterError::InvalidTemplate { .. }
            | RouterError::UnsupportedVersion(_)
            | RouterError::UnknownGenerator(_)
            | RouterError::Render(_)
            | RouterError::IoError(_)
            | RouterError::InternalError(_) => 500,
        }
    }

    /// Whether this error belongs to the configuration class
    ///
    /// Configuration errors abort a load and leave the registry untouched.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RouterError::ConfigError(_)
                | RouterError::InvalidPattern { .. }
                | RouterError::InvalidTemplate { .. }
                | RouterError::UnsupportedVersion(_)
                | RouterError::UnknownGenerator(_)
        )
    }

    /// Create an InvalidPattern error
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        RouterError::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidTemplate error
    pub fn invalid_template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        RouterError::InvalidTemplate {
            template: template.into(),
            reason: reason.into(),
        }
    }
}

/// Uniform failure shape for a single generator invocation
///
/// Whatever went wrong inside a generator is folded into this structure
/// before it reaches the aggregator: an identifying code, a message, the
/// HTTP status the failure stands for and an optional upstream cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct GeneratorError {
    pub code: String,
    pub message: String,
    pub status: u16,
    pub cause: Option<String>,
    /// Effective name of the failing generator, filled in by the dispatcher
    pub generator: Option<String>,
}

impl GeneratorError {
    /// Create a new generator error with status 500
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        GeneratorError {
            code: code.into(),
            message: message.into(),
            status: 500,
            cause: None,
            generator: None,
        }
    }

    /// Create a "not found" generator error (status 404)
    pub fn not_found(message: impl Into<String>) -> Self {
        GeneratorError::new("not-found", message).with_status(404)
    }

    /// Override the HTTP status this error stands for
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Attach an upstream cause
    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub(crate) fn for_generator(mut self, name: &str) -> Self {
        if self.generator.is_none() {
            self.generator = Some(name.to_string());
        }
        self
    }
}

/// All generator failures of one request, in invocation order
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("{} generator failure(s)", .errors.len())]
pub struct CompoundError {
    errors: Vec<GeneratorError>,
}

impl CompoundError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: GeneratorError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneratorError> {
        self.errors.iter()
    }

    pub fn first(&self) -> Option<&GeneratorError> {
        self.errors.first()
    }

    pub fn into_vec(self) -> Vec<GeneratorError> {
        self.errors
    }
}

/// Renderer failure classes
///
/// Each class maps to its own diagnostic identifier so operators can tell
/// a missing template from a broken one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Malformed output document: {0}")]
    MalformedOutput(String),

    #[error("Transformation failed: {0}")]
    Transform(String),
}

impl RenderError {
    /// Stable diagnostic identifier for logs and error documents
    pub fn diagnostic_id(&self) -> &'static str {
        match self {
            RenderError::TemplateNotFound(_) => "render.template-not-found",
            RenderError::MalformedOutput(_) => "render.malformed-output",
            RenderError::Transform(_) => "render.transform",
        }
    }
}
