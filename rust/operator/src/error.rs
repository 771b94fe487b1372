//! Failure classification shared by every curation stage.

use stackable_operator::kube;
use strum::{Display, IntoStaticStr};

/// How a stage failure should be treated by whoever runs the stage.
#[derive(Clone, Copy, Debug, Display, Eq, IntoStaticStr, PartialEq)]
pub enum ErrorKind {
    /// API hiccups, conflicts, objects that have not shown up yet.
    Transient,
    /// The request itself is wrong; retrying will not help.
    Validation,
    /// A remote operator (Hive, Hypershift, Tower) reported a terminal failure.
    RemoteOperator,
    /// A monitor loop ran out of attempts.
    Timeout,
}

impl ErrorKind {
    /// Exit code of the worker process for a stage that failed this way.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Transient => 1,
            ErrorKind::Validation => 2,
            ErrorKind::Timeout => 3,
            ErrorKind::RemoteOperator => 4,
        }
    }
}

pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// API errors are never terminal on their own, except for requests the API
/// server rejected as invalid.
impl Classify for kube::Error {
    fn kind(&self) -> ErrorKind {
        match self {
            kube::Error::Api(response) if response.code == 400 || response.code == 422 => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ErrorKind::Transient, 1)]
    #[case(ErrorKind::Validation, 2)]
    #[case(ErrorKind::Timeout, 3)]
    #[case(ErrorKind::RemoteOperator, 4)]
    fn exit_codes(#[case] kind: ErrorKind, #[case] code: i32) {
        assert_eq!(kind.exit_code(), code);
    }
}
