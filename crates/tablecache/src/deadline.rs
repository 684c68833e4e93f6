// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

use tick::{Clock, FutureExt};

use crate::{Error, ErrorKind, Result};

/// A point in time by which an operation must finish, shared by all of its steps.
#[derive(Debug, Clone)]
pub(crate) struct Deadline {
    clock: Clock,
    expires_at: Option<Instant>,
}

impl Deadline {
    /// A deadline `timeout` from now, or none.
    pub(crate) fn after(clock: &Clock, timeout: Option<Duration>) -> Self {
        Self {
            clock: clock.clone(),
            expires_at: timeout.map(|timeout| clock.instant() + timeout),
        }
    }

    /// Runs `future` to completion unless the deadline passes first.
    pub(crate) async fn run<F: Future>(&self, future: F) -> Result<F::Output> {
        let Some(expires_at) = self.expires_at else {
            return Ok(future.await);
        };

        let remaining = expires_at.saturating_duration_since(self.clock.instant());
        if remaining.is_zero() {
            return Err(Error::caused_by(ErrorKind::Timeout, "deadline elapsed"));
        }

        future
            .timeout(&self.clock, remaining)
            .await
            .map_err(|e| Error::caused_by(ErrorKind::Timeout, e))
    }
}

#[cfg(test)]
mod tests {
    use tick::ClockControl;

    use super::*;

    #[tokio::test]
    async fn no_deadline_waits_for_completion() {
        let deadline = Deadline::after(&Clock::new_tokio(), None);
        let value = deadline.run(async { 5 }).await.expect("no deadline");
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn elapsed_deadline_fails_without_polling() {
        let control = ClockControl::new();
        let deadline = Deadline::after(&control.to_clock(), Some(Duration::from_millis(10)));
        control.advance(Duration::from_millis(10));

        let error = deadline.run(async { 5 }).await.expect_err("deadline elapsed");
        assert_eq!(error.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn slow_future_times_out() {
        let clock = Clock::new_tokio();
        let deadline = Deadline::after(&clock, Some(Duration::from_millis(10)));

        let error = deadline
            .run(std::future::pending::<()>())
            .await
            .expect_err("pending future should time out");
        assert_eq!(error.kind(), ErrorKind::Timeout);
    }
}
