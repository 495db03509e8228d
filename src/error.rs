/// What category of failure occurred.
///
/// Normal in-grid fits never error: out-of-grid points flow through as NaN
/// and degenerate statistics (all-color measurement sets) are valid results.
/// Errors are reserved for misconfiguration and inputs that cannot be fitted
/// at all.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// Invalid configuration (bad ranges, unsupported minimizer method, ...).
    Config,
    /// Input data that makes the statistic undefined (zero error on an
    /// absolute flux, mismatched array lengths, empty measurement set).
    DegenerateInput,
}

#[derive(Clone)]
pub struct FitError {
    kind: ErrorKind,
    message: String,
}

impl FitError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn degenerate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DegenerateInput, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for FitError {}
