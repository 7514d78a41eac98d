//! Crate-wide typed error boundaries.
//!
//! Each layer gets its own `#[derive(thiserror::Error)]` enum; glue code
//! (the orchestrator, the CLI) wraps these in `anyhow::Result` with
//! `.context(...)` rather than re-typing them, matching the rest of this
//! crate's error-handling idiom.

use thiserror::Error;

/// Known IBKR Flex Web Service error codes this crate classifies explicitly.
/// Unknown codes fall back to `StatementError` treatment (see `flex::codes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexErrorCode(pub u32);

impl std::fmt::Display for FlexErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by the Flex transport adapter (C3).
#[derive(Debug, Error)]
pub enum FlexTransportError {
    #[error("Flex token expired (code {0})")]
    TokenExpired(FlexErrorCode),

    #[error("Flex token invalid (code {0})")]
    TokenInvalid(FlexErrorCode),

    #[error("Flex request phase failed: code {code} ({message})")]
    RequestPhase { code: FlexErrorCode, message: String },

    #[error("Flex statement phase failed: code {code} ({message})")]
    StatementPhase { code: FlexErrorCode, message: String },

    #[error("Flex poll timed out after {attempts} attempts")]
    PollTimeout { attempts: u32 },

    #[error("Flex transport connection failed")]
    Connection(#[source] reqwest::Error),

    #[error("Flex request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("Failed to deserialize Flex XML response")]
    Deserialization(#[from] quick_xml::de::DeError),

    #[error("Ingestion cancelled during retry wait")]
    Cancelled,
}

/// Errors raised by section preflight (C4).
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("missing required Flex sections: {0:?}")]
    MissingRequiredSection(Vec<&'static str>),
}

/// A single failed field normalization during canonical mapping.
#[derive(Debug, Error)]
#[error("contract violation in section {section} row {source_row_ref} field {field}: invalid value {raw_value:?}")]
pub struct MappingContractViolationError {
    pub section: String,
    pub source_row_ref: String,
    pub field: String,
    pub raw_value: Option<String>,
}

/// Top-level deterministic error codes surfaced on a failed ingestion run,
/// per `spec.md` §4.1 "Error classification".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionErrorCode {
    TokenExpired,
    TokenInvalid,
    RequestError,
    StatementError,
    PollTimeout,
    TransportError,
    MissingRequiredSection,
    CanonicalMappingContractViolation,
    RunAlreadyActive,
    Cancelled,
    Internal,
}

impl IngestionErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenExpired => "INGESTION_TOKEN_EXPIRED_ERROR",
            Self::TokenInvalid => "INGESTION_TOKEN_INVALID_ERROR",
            Self::RequestError => "INGESTION_REQUEST_ERROR",
            Self::StatementError => "INGESTION_STATEMENT_ERROR",
            Self::PollTimeout => "INGESTION_POLL_TIMEOUT",
            Self::TransportError => "INGESTION_TRANSPORT_ERROR",
            Self::MissingRequiredSection => "MISSING_REQUIRED_SECTION",
            Self::CanonicalMappingContractViolation => "CANONICAL_MAPPING_CONTRACT_VIOLATION",
            Self::RunAlreadyActive => "RUN_ALREADY_ACTIVE",
            Self::Cancelled => "INGESTION_CANCELLED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for IngestionErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure that should finalize an ingestion run as `failed`, carrying
/// the deterministic code plus a structured diagnostics payload.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct IngestionFailure {
    pub code: IngestionErrorCode,
    pub message: String,
    pub diagnostics: serde_json::Value,
}

impl IngestionFailure {
    pub fn new(code: IngestionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            diagnostics: serde_json::Value::Null,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: serde_json::Value) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

impl From<&FlexTransportError> for IngestionErrorCode {
    fn from(err: &FlexTransportError) -> Self {
        match err {
            FlexTransportError::TokenExpired(_) => IngestionErrorCode::TokenExpired,
            FlexTransportError::TokenInvalid(_) => IngestionErrorCode::TokenInvalid,
            FlexTransportError::RequestPhase { .. } => IngestionErrorCode::RequestError,
            FlexTransportError::StatementPhase { .. } | FlexTransportError::Deserialization(_) => {
                IngestionErrorCode::StatementError
            }
            FlexTransportError::PollTimeout { .. } => IngestionErrorCode::PollTimeout,
            FlexTransportError::Connection(_) | FlexTransportError::Timeout(_) => {
                IngestionErrorCode::TransportError
            }
            FlexTransportError::Cancelled => IngestionErrorCode::Cancelled,
        }
    }
}

impl From<&PreflightError> for IngestionErrorCode {
    fn from(_: &PreflightError) -> Self {
        IngestionErrorCode::MissingRequiredSection
    }
}

impl From<&MappingContractViolationError> for IngestionErrorCode {
    fn from(_: &MappingContractViolationError) -> Self {
        IngestionErrorCode::CanonicalMappingContractViolation
    }
}
