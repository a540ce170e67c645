//! Conversions from external infrastructure errors into domain errors.

use std::io::{Error as IoError, ErrorKind};

use fastbreak_domain::FastBreakError;
use serde_json::Error as JsonError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub FastBreakError);

impl From<InfraError> for FastBreakError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<FastBreakError> for InfraError {
    fn from(value: FastBreakError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoFastBreakError {
    fn into_fastbreak(self) -> FastBreakError;
}

/* -------------------------------------------------------------------------- */
/* std::io::Error → FastBreakError */
/* -------------------------------------------------------------------------- */

impl IntoFastBreakError for IoError {
    fn into_fastbreak(self) -> FastBreakError {
        match self.kind() {
            ErrorKind::NotFound => FastBreakError::NotFound(format!("file not found: {self}")),
            ErrorKind::PermissionDenied => {
                FastBreakError::Persistence(format!("permission denied: {self}"))
            }
            ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
                FastBreakError::Persistence(format!("corrupt data: {self}"))
            }
            _ => FastBreakError::Persistence(format!("i/o failure: {self}")),
        }
    }
}

impl From<IoError> for InfraError {
    fn from(value: IoError) -> Self {
        InfraError(value.into_fastbreak())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → FastBreakError */
/* -------------------------------------------------------------------------- */

impl IntoFastBreakError for JsonError {
    fn into_fastbreak(self) -> FastBreakError {
        if self.is_io() {
            return FastBreakError::Persistence(format!("i/o failure while encoding: {self}"));
        }
        FastBreakError::Persistence(format!(
            "invalid snapshot at line {} column {}: {self}",
            self.line(),
            self.column()
        ))
    }
}

impl From<JsonError> for InfraError {
    fn from(value: JsonError) -> Self {
        InfraError(value.into_fastbreak())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = IoError::new(ErrorKind::NotFound, "queue.json");
        let FastBreakError::NotFound(message) = FastBreakError::from(InfraError::from(err)) else {
            panic!("expected NotFound");
        };
        assert!(message.contains("queue.json"));
    }

    #[test]
    fn other_io_errors_map_to_persistence() {
        let err = IoError::new(ErrorKind::Other, "disk full");
        assert!(matches!(
            FastBreakError::from(InfraError::from(err)),
            FastBreakError::Persistence(_)
        ));
    }

    #[test]
    fn json_syntax_error_reports_position() {
        let err = serde_json::from_str::<serde_json::Value>("{\n  \"jobs\": [").expect_err("eof");
        let FastBreakError::Persistence(message) = InfraError::from(err).0 else {
            panic!("expected Persistence");
        };
        assert!(message.contains("line 2"));
    }

    #[test]
    fn domain_errors_round_trip_through_newtype() {
        let original = FastBreakError::Queue("closed".into());
        let back: FastBreakError = InfraError::from(original.clone()).into();
        assert_eq!(back, original);
    }
}
