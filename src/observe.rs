use std::time::Duration;

use crate::context::CallContext;
use crate::error::Error;
use crate::retry::RetryErrorInfo;

/// Synchronous hooks into the call lifecycle. Every method has an empty
/// default so implementors only override what they watch.
pub trait Observer: Send + Sync {
    fn on_operation_start(&self, _context: &CallContext) {}

    fn on_attempt_start(&self, _context: &CallContext, _attempt: usize) {}

    fn on_retry_scheduled(&self, _context: &CallContext, _info: &RetryErrorInfo, _delay: Duration) {
    }

    fn on_operation_complete(
        &self,
        _context: &CallContext,
        _error: Option<&Error>,
        _elapsed: Duration,
    ) {
    }
}
