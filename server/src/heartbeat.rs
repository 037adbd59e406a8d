//! Per-connection liveness deadline

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Deadline that expires after `timeout` without inbound traffic.
///
/// A single timer is allocated per connection and pushed back in place on
/// every frame, so resets never leave stale timers behind.
pub struct LivenessTimer {
    timeout: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl LivenessTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sleep: Box::pin(tokio::time::sleep(timeout)),
        }
    }

    /// Push the deadline to `now + timeout`.
    pub fn reset(&mut self) {
        let deadline = Instant::now() + self.timeout;
        self.sleep.as_mut().reset(deadline);
    }

    /// Completes when the deadline passes. Cancel-safe; meant to sit in a
    /// `select!` next to the frame reader.
    pub fn expired(&mut self) -> Expired<'_> {
        Expired { timer: self }
    }
}

pub struct Expired<'a> {
    timer: &'a mut LivenessTimer,
}

impl Future for Expired<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.timer.sleep.as_mut().poll(cx)
    }
}
