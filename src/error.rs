use thiserror_no_std::Error;

/// Errors raised by the history log and by the flash record store beneath it.
///
/// The flash collaborator reports the same kinds, so results from flash calls
/// are forwarded without translation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogError {
    #[error("required argument missing")]
    NullArgument,
    #[error("module or flash not initialized")]
    InvalidState,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("record or page not found")]
    NotFound,
    #[error("flash full")]
    NoMemory,
    #[error("flash operation already in progress")]
    Busy,
    #[error("record does not fit")]
    DataSize,
    #[error("unrecoverable flash failure")]
    Fatal,
}

impl LogError {
    /// Combine the outcome of one more step into an accumulated outcome.
    ///
    /// Every step still runs; the first error seen is the one reported.
    pub(crate) fn merge(acc: Result<(), LogError>, step: Result<(), LogError>) -> Result<(), LogError> {
        match (acc, step) {
            (Err(first), _) => Err(first),
            (Ok(()), step) => step,
        }
    }

    /// Drop a `NotFound` result, which only means there was nothing to free.
    pub(crate) fn mask_not_found(result: Result<(), LogError>) -> Result<(), LogError> {
        match result {
            Err(LogError::NotFound) => Ok(()),
            other => other,
        }
    }
}
