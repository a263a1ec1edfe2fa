//! Error types and result definitions for snapshot operations.
//!
//! [`SnapshotError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, the originating error and the callsite location. Errors coming from several
//! workers can be aggregated into a single value.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use tokio_postgres::error::SqlState;

/// Result type used throughout the snapshot engine.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the snapshot engine.
///
/// Cloning is cheap: the source and the backtrace are shared.
#[derive(Debug, Clone)]
pub struct SnapshotError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Failures of several concurrent workers.
    Many {
        errors: Vec<SnapshotError>,
        location: &'static Location<'static>,
    },
}

/// Categories of failures that can occur during a snapshot run.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,

    // Query & Execution Errors
    SourceQueryFailed,
    SourceLockTimeout,
    SourceOperationCanceled,

    // Schema Errors
    SourceSchemaError,
    TableNotFound,

    // Data & Conversion Errors
    ConversionError,
    InvalidData,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    SourceIoError,
    DeserializationError,

    // Security & Authentication Errors
    EncryptionError,
    AuthenticationError,
    PermissionDenied,

    // Snapshot Lifecycle Errors
    SnapshotExportFailed,
    SnapshotImportFailed,
    SourceSnapshotTooOld,
    TableStatsFailed,
    SchemaSizeFailed,
    SnapshotCanceled,
    TableWorkerPanic,
    RangeWorkerPanic,

    // Output Errors
    ProcessorError,
    ProgressError,

    // State Errors
    InvalidState,
    SourceDatabaseInRecovery,
    SourceDatabaseShutdown,

    // General Errors
    SourceError,
    Unknown,
}

impl SnapshotError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`] if
    /// the aggregate is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "Multiple errors occurred",
        }
    }

    /// Returns the dynamic detail of this error, if any.
    ///
    /// For aggregated errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the callsite location where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Renders the error on a single line, without location and backtrace.
    ///
    /// Nested sources are appended after the detail, separated by `: `.
    pub fn summary(&self) -> String {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let mut summary = payload.description.to_string();
                if let Some(detail) = &payload.detail {
                    summary.push_str(": ");
                    summary.push_str(detail);
                }

                if let Some(source) = payload.source.as_deref()
                    && let Some(nested) = source.downcast_ref::<SnapshotError>()
                {
                    summary.push_str(": ");
                    summary.push_str(&nested.summary());
                }

                summary
            }
            ErrorRepr::Many { errors, .. } => errors
                .iter()
                .map(|err| err.summary())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    /// Attaches an originating error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SnapshotError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for SnapshotError {
    fn eq(&self, other: &SnapshotError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f)?;
                write_backtrace(payload.backtrace.as_ref(), f)?;

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    if let Some(first_line) = lines.next() {
                        write!(f, "\n  {}. {}", index + 1, first_line)?;
                    }

                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_backtrace(backtrace: &Backtrace, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rendered_backtrace = backtrace.to_string();
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n  Backtrace:")?;
        for line in rendered_backtrace.lines() {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(detail) = detail {
        write!(f, "\n  Detail:")?;
        for line in detail.lines() {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

/// Creates a [`SnapshotError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SnapshotError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SnapshotError {
        SnapshotError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`SnapshotError`] from an error kind, static description and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for SnapshotError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SnapshotError {
        SnapshotError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates several errors. A single error is returned as is.
impl<E> From<Vec<E>> for SnapshotError
where
    E: Into<SnapshotError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> SnapshotError {
        let location = Location::caller();

        let mut errors: Vec<SnapshotError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        SnapshotError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for SnapshotError {
    #[track_caller]
    fn from(err: std::io::Error) -> SnapshotError {
        let detail = err.to_string();
        SnapshotError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for SnapshotError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SnapshotError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        SnapshotError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Classifies [`tokio_postgres::Error`]s by their SQLSTATE.
impl From<tokio_postgres::Error> for SnapshotError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> SnapshotError {
        let (kind, description) = match err.code() {
            Some(sqlstate) => classify_sqlstate(sqlstate),
            // No SQL state means a client side or connection issue.
            None => (
                ErrorKind::SourceConnectionFailed,
                "PostgreSQL connection failed",
            ),
        };

        let detail = err.to_string();
        SnapshotError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps a SQLSTATE to an error kind, looking at the exact code first and at its class otherwise.
fn classify_sqlstate(sqlstate: &SqlState) -> (ErrorKind, &'static str) {
    match *sqlstate {
        SqlState::UNDEFINED_TABLE => {
            return (ErrorKind::TableNotFound, "PostgreSQL table not found");
        }
        SqlState::INSUFFICIENT_PRIVILEGE => {
            return (ErrorKind::PermissionDenied, "PostgreSQL permission denied");
        }
        // Raised by `SET TRANSACTION SNAPSHOT` for unknown snapshot identifiers.
        SqlState::INVALID_PARAMETER_VALUE => {
            return (
                ErrorKind::SourceQueryFailed,
                "PostgreSQL invalid parameter value",
            );
        }
        SqlState::SNAPSHOT_TOO_OLD => {
            return (ErrorKind::SourceSnapshotTooOld, "PostgreSQL snapshot too old");
        }
        SqlState::QUERY_CANCELED => {
            return (ErrorKind::SourceOperationCanceled, "PostgreSQL query canceled");
        }
        SqlState::LOCK_NOT_AVAILABLE => {
            return (ErrorKind::SourceLockTimeout, "PostgreSQL lock not available");
        }
        SqlState::CANNOT_CONNECT_NOW => {
            return (
                ErrorKind::SourceDatabaseInRecovery,
                "PostgreSQL database in recovery",
            );
        }
        SqlState::ADMIN_SHUTDOWN | SqlState::CRASH_SHUTDOWN => {
            return (ErrorKind::SourceDatabaseShutdown, "PostgreSQL shutdown");
        }
        _ => {}
    }

    match sqlstate.code().get(..2) {
        Some("08") => (
            ErrorKind::SourceConnectionFailed,
            "PostgreSQL connection failed",
        ),
        Some("28") => (
            ErrorKind::AuthenticationError,
            "PostgreSQL authentication failed",
        ),
        Some("22") => (ErrorKind::ConversionError, "PostgreSQL data exception"),
        Some("42") => (
            ErrorKind::SourceSchemaError,
            "PostgreSQL syntax error or access rule violation",
        ),
        Some("53") => (
            ErrorKind::SourceConnectionFailed,
            "PostgreSQL insufficient resources",
        ),
        Some("25" | "40" | "55") => (ErrorKind::InvalidState, "PostgreSQL transaction failed"),
        Some("57") => (
            ErrorKind::SourceOperationCanceled,
            "PostgreSQL operator intervention",
        ),
        Some("58" | "XX") => (ErrorKind::SourceIoError, "PostgreSQL system error"),
        _ => (ErrorKind::SourceError, "PostgreSQL error"),
    }
}

impl From<rustls::Error> for SnapshotError {
    #[track_caller]
    fn from(err: rustls::Error) -> SnapshotError {
        let detail = err.to_string();
        SnapshotError::from_components(
            ErrorKind::EncryptionError,
            Cow::Borrowed("TLS configuration failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
