use thiserror::Error;

/// Main error type for the remedial action optimizer
#[derive(Error, Debug)]
pub enum RaoError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Sensitivity error: {0}")]
    Sensitivity(#[from] SensitivityError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised by a network model or the network copy pool
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Unknown network action: {action_id}")]
    UnknownAction { action_id: String },

    #[error("No network copy available after {timeout_seconds} seconds")]
    PoolExhausted { timeout_seconds: u64 },

    #[error("Network pool is closed")]
    PoolClosed,
}

/// Sensitivity computation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensitivityError {
    #[error("Load flow diverged: {message}")]
    Divergence { message: String },

    #[error("Sensitivity computation failed: {message}")]
    ComputationFailed { message: String },
}

/// Errors raised while building or solving a linear problem
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Invalid linear problem: {message}")]
    InvalidProblem { message: String },

    #[error("Solver backend failure: {message}")]
    Backend { message: String },
}

/// Search tree orchestration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Root leaf evaluation failed: {message}")]
    RootEvaluationFailed { message: String },

    #[error("Worker thread pool could not be created: {message}")]
    ThreadPool { message: String },

    #[error("Leaf evaluation for {combination} panicked")]
    WorkerPanicked { combination: String },

    #[error("Depth {depth} did not complete within {timeout_seconds} seconds")]
    DepthTimeout { depth: usize, timeout_seconds: u64 },
}

/// Result type alias for optimizer operations
pub type RaoResult<T> = Result<T, RaoError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::RaoError::Validation(format!($($arg)*))
    };
}
