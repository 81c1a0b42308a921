use std::fmt;
use std::sync::Arc;

use crate::error::Error;

pub type WriteHook = Arc<dyn Fn(&str, usize) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&str, &Error) + Send + Sync>;
pub type MaintenanceFailureHook = Arc<dyn Fn(&str, MaintenanceOp, &Error, u32) + Send + Sync>;

/// Which background operation a maintenance callback refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaintenanceOp {
    Compact,
    Vacuum,
}

impl fmt::Display for MaintenanceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceOp::Compact => write!(f, "compact"),
            MaintenanceOp::Vacuum => write!(f, "vacuum"),
        }
    }
}

/// Observer callbacks. The engine never depends on any of them being
/// set; `tracing` carries the same events for operators that only want
/// logs.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Called after a mutation blob is durable: `(collection, records)`.
    pub on_write: Option<WriteHook>,
    /// Called when a background task hits an error (including ones that
    /// will be retried): `(collection, error)`.
    pub on_error: Option<ErrorHook>,
    /// Called once a maintenance operation exhausted its retries:
    /// `(collection, op, error, attempts)`.
    pub on_maintenance_failure: Option<MaintenanceFailureHook>,
}

impl Hooks {
    pub(crate) fn write(&self, collection: &str, count: usize) {
        if let Some(hook) = &self.on_write {
            hook(collection, count);
        }
    }

    pub(crate) fn error(&self, collection: &str, err: &Error) {
        if let Some(hook) = &self.on_error {
            hook(collection, err);
        }
    }

    pub(crate) fn maintenance_failure(
        &self,
        collection: &str,
        op: MaintenanceOp,
        err: &Error,
        attempts: u32,
    ) {
        if let Some(hook) = &self.on_maintenance_failure {
            hook(collection, op, err, attempts);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_write", &self.on_write.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_maintenance_failure", &self.on_maintenance_failure.is_some())
            .finish()
    }
}
