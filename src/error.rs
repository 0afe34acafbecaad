use snafu::Snafu;

/// Errors returned by the rebuild coordination service.
///
/// These map 1:1 onto the five error kinds of the rebuild protocol: a target
/// not recognising a pool/container handle, loss of leadership mid-operation,
/// a failed allocation while queuing a task, an RPC that could not be created
/// or delivered, and an aggregated non-zero status observed from a target
/// query.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
#[allow(missing_docs)]
pub enum RebuildError {
    #[snafu(display("Target does not recognise this pool/container handle"))]
    NoHandle {},
    #[snafu(display("No longer leader for this rebuild"))]
    NotLeader {},
    #[snafu(display("Failed to allocate rebuild task"))]
    NoMem {},
    #[snafu(display("Transport failure during {operation}: {reason}"))]
    TransportFailure { operation: String, reason: String },
    #[snafu(display(
        "Aggregated target query reported non-zero status {status}"
    ))]
    AggregatedTargetFailure { status: i32 },
}

impl RebuildError {
    /// Maps this error onto the `i32` status code carried over the wire by
    /// every RPC reply in §6. Codes are stable identifiers, not `errno`
    /// values from any particular platform.
    pub fn as_status(&self) -> i32 {
        match self {
            Self::NoHandle {} => -1,
            Self::NotLeader {} => -2,
            Self::NoMem {} => -3,
            Self::TransportFailure { .. } => -4,
            Self::AggregatedTargetFailure { .. } => -5,
        }
    }
}
