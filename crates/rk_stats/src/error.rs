use thiserror::Error;

/// Errors reported while creating or registering stats.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatsError {
    #[error("stat name must not be empty")]
    EmptyName,

    #[error("duration stat `{0}` must be longer than 3 characters and end in `_us`")]
    InvalidDurationName(String),

    #[error("stat `{name}` does not start with the group prefix `{prefix}`")]
    OutsideGroup { name: String, prefix: String },

    #[error("stat `{0}` is already registered")]
    Duplicate(String),
}
