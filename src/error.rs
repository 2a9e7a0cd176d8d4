//! Error taxonomy for the tool and provider layers.
//!
//! Startup errors (`SchemaError`, `SynthesisError`) abort initialization.
//! `ValidationError` and `DispatchError` never escape a tool invocation; the
//! registry folds them into a [`ToolCallResult`](crate::types::ToolCallResult).
//! `ProviderError` is surfaced to the caller of the conversation loop.

use thiserror::Error;

/// Failure to load or parse the OpenAPI document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document could not be read from disk.
    #[error("Failed to read OpenAPI document {path}: {message}")]
    Read { path: String, message: String },

    /// The document could not be fetched over HTTP.
    #[error("Failed to fetch OpenAPI document {url}: {message}")]
    Fetch { url: String, message: String },

    /// The document is neither valid JSON nor valid YAML.
    #[error("Failed to parse OpenAPI document: {0}")]
    Parse(String),

    /// A field the loader cannot do without is absent or malformed.
    #[error("OpenAPI document is missing required field '{0}'")]
    MissingField(String),
}

/// Failure to turn one operation into a tool.
///
/// Logged and skipped: the affected operation yields no tool.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// A schema type has no counterpart in [`ParamKind`](crate::tools::ParamKind).
    #[error("Parameter '{param}' of '{operation}' has unsupported type '{type_name}'")]
    UnsupportedType {
        operation: String,
        param: String,
        type_name: String,
    },

    /// The tool name is already taken in the registry.
    #[error("Duplicate tool name '{0}'")]
    DuplicateName(String),
}

/// A caller-supplied argument does not satisfy the tool signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required argument is absent or null.
    #[error("Missing required argument '{0}'")]
    MissingRequired(String),

    /// An argument could not be converted to its declared type.
    #[error("Argument '{name}' expected {expected}: {message}")]
    InvalidValue {
        name: String,
        expected: &'static str,
        message: String,
    },

    /// The argument payload is not a JSON object.
    #[error("Tool arguments must be a JSON object, got {0}")]
    NotAnObject(String),

    /// No tool with that name is registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl ValidationError {
    pub(crate) fn invalid(name: &str, expected: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            expected,
            message: message.into(),
        }
    }
}

/// Failure while executing a backend HTTP request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Timeout, refused connection, TLS failure and the like.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-2xx status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Failure reported by an LLM provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Bad or missing API key.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The vendor throttled the request. Not retried here.
    #[error("Rate limited: {0}")]
    RateLimit(String),

    /// Network failure, timeout or 5xx.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The vendor response could not be translated.
    #[error("Unparseable provider response: {0}")]
    Format(String),

    /// Any other 4xx the vendor returns.
    #[error("Provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The factory was given a type tag it does not know.
    #[error("Unknown provider type: {0}")]
    UnknownProvider(String),

    /// Settings the provider cannot run without are absent.
    #[error("Provider misconfigured: {0}")]
    Misconfigured(String),
}

impl ProviderError {
    /// Classify a non-2xx vendor response.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth(body),
            429 => Self::RateLimit(body),
            500..=599 => Self::Unavailable(format!("HTTP {status}: {body}")),
            _ => Self::Rejected {
                status,
                message: body,
            },
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Unavailable(format!("request timed out: {err}"))
        } else {
            Self::Unavailable(err.to_string())
        }
    }

    /// Whether the conversation must stop on this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RateLimit(_) | Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ProviderError::from_status(401, "bad key".into()),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, "slow down".into()),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            ProviderError::from_status(503, String::new()),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            ProviderError::from_status(400, "bad".into()),
            ProviderError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn fatality() {
        assert!(ProviderError::Auth(String::new()).is_fatal());
        assert!(ProviderError::Format(String::new()).is_fatal());
        assert!(!ProviderError::RateLimit(String::new()).is_fatal());
    }
}
