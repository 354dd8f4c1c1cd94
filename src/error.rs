//! Binary-level error type.
//!
//! Library modules return their own `thiserror` enums; they are folded into
//! [`AppError`] here together with the process exit code:
//!
//! - 2: bad input or usage (files, manifest, timing, blood)
//! - 3: data shape mismatch
//! - 4: computation failure (thread pool, allocation)

use crate::fit::DriverError;
use crate::io::IoError;
use crate::models::ContextError;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<IoError> for AppError {
    fn from(e: IoError) -> Self {
        Self::new(2, e.to_string())
    }
}

impl From<ContextError> for AppError {
    fn from(e: ContextError) -> Self {
        Self::new(2, e.to_string())
    }
}

impl From<DriverError> for AppError {
    fn from(e: DriverError) -> Self {
        let code = match e {
            DriverError::Shape(_) => 3,
            DriverError::ScratchAllocation { .. } | DriverError::ThreadPool(_) => 4,
        };
        Self::new(code, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(AppError::from(DriverError::Shape("x".into())).exit_code(), 3);
        assert_eq!(AppError::from(DriverError::ThreadPool("x".into())).exit_code(), 4);
        let source = Vec::<f64>::new().try_reserve_exact(usize::MAX).unwrap_err();
        let scratch = AppError::from(DriverError::ScratchAllocation { worker: 3, source });
        assert_eq!(scratch.exit_code(), 4);
        assert!(scratch.to_string().contains("worker 3"));
        assert_eq!(AppError::from(ContextError::NoFrames).exit_code(), 2);
        assert_eq!(AppError::from(IoError::Manifest("x".into())).exit_code(), 2);
    }
}
