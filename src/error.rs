use std::time::Duration;

use thiserror::Error;

/// Driver-level failures with a meaningful distinction for the operator.
///
/// Both variants are fatal for the run (the ledger already counted the
/// attempt, so the next invocation picks up where this one died); the split
/// exists so the log tells markup drift apart from a stalled backend.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("element `{selector}` did not reach state `{condition}` within {timeout:?}")]
    ElementTimeout {
        selector: String,
        condition: &'static str,
        timeout: Duration,
    },

    #[error("no network response matching `{fragment}` within {timeout:?}")]
    ResponseTimeout { fragment: String, timeout: Duration },
}
