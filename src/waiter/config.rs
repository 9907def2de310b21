use std::time::Duration;

use crate::Result;
use crate::error::Error;
use crate::waiter::acceptor::{Acceptor, AcceptorState};

pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_secs(300);

/// Validated acceptor list plus default delay bounds.
#[derive(Clone, Debug)]
pub struct WaiterConfig<I, O> {
    acceptors: Vec<Acceptor<I, O>>,
    min_delay: Duration,
    max_delay: Duration,
    max_wait_time: Duration,
}

impl<I, O> WaiterConfig<I, O> {
    /// Fails unless at least one acceptor selects
    /// [`AcceptorState::Success`].
    pub fn new(acceptors: Vec<Acceptor<I, O>>) -> Result<Self> {
        if acceptors.is_empty() {
            return Err(Error::WaiterConfiguration {
                message: "waiter requires at least one acceptor",
            });
        }
        if !acceptors
            .iter()
            .any(|acceptor| acceptor.state == AcceptorState::Success)
        {
            return Err(Error::WaiterConfiguration {
                message: "waiter requires at least one success acceptor",
            });
        }
        Ok(Self {
            acceptors,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_wait_time: DEFAULT_MAX_WAIT_TIME,
        })
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Result<Self> {
        validate_delays(min_delay, max_delay)?;
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        Ok(self)
    }

    pub fn with_max_wait_time(mut self, max_wait_time: Duration) -> Self {
        self.max_wait_time = max_wait_time;
        self
    }

    pub fn acceptors(&self) -> &[Acceptor<I, O>] {
        &self.acceptors
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn max_wait_time(&self) -> Duration {
        self.max_wait_time
    }

    /// State of the first acceptor that matches, in declaration order.
    pub fn evaluate(
        &self,
        input: &I,
        result: &std::result::Result<O, Error>,
    ) -> Option<AcceptorState> {
        self.acceptors
            .iter()
            .find(|acceptor| acceptor.matches(input, result))
            .map(|acceptor| acceptor.state)
    }
}

pub(crate) fn validate_delays(min_delay: Duration, max_delay: Duration) -> Result<()> {
    if min_delay.is_zero() {
        return Err(Error::WaiterConfiguration {
            message: "min_delay must be greater than zero",
        });
    }
    if min_delay > max_delay {
        return Err(Error::WaiterConfiguration {
            message: "min_delay must not exceed max_delay",
        });
    }
    Ok(())
}
