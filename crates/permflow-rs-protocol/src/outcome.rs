use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw outcome reported by a host flow started by a launcher.
///
/// The coordinator only logs it; the granted state is always re-read from
/// the permission's probe afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchOutcome {
    /// Host result code (e.g. an activity result code).
    pub code: i32,
    /// Optional host payload returned with the result.
    #[serde(default)]
    pub data: Option<Value>,
}

impl LaunchOutcome {
    /// Result code hosts use for a flow that finished normally.
    pub const RESULT_OK: i32 = -1;
    /// Result code hosts use for a flow the user backed out of.
    pub const RESULT_CANCELED: i32 = 0;

    /// Outcome of a flow that finished normally.
    pub fn ok() -> Self {
        Self {
            code: Self::RESULT_OK,
            data: None,
        }
    }

    /// Outcome of a flow the user backed out of.
    pub fn canceled() -> Self {
        Self {
            code: Self::RESULT_CANCELED,
            data: None,
        }
    }

    /// Attach host data to the outcome.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
