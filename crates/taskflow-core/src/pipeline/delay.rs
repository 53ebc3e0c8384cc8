//! Delay - handler 実行前に一定時間待つ hook
//!
//! 待機中に `shutdown_now` が来たら `Interrupted` で失敗する（handler は実行されない）。

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use super::chain::HandlerHook;
use crate::app::pool::interrupted;
use crate::domain::{BoxError, Interrupted, Payload};

#[derive(Debug, Clone, Copy)]
pub struct DelayHook {
    delay: Duration,
}

impl DelayHook {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl<T: Payload> HandlerHook<T> for DelayHook {
    async fn before_handle(&self, _payload: &mut T) -> Result<(), BoxError> {
        if self.delay.is_zero() {
            info!("no delay configured");
            return Ok(());
        }

        info!(delay_ms = self.delay.as_millis() as u64, "delaying execution");
        let started = Instant::now();
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(()),
            _ = interrupted() => {
                let waited = started.elapsed();
                warn!(waited_ms = waited.as_millis() as u64, "delay interrupted");
                Err(Box::new(Interrupted { waited }) as BoxError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_configured_delay() {
        let hook = DelayHook::new(Duration::from_secs(2));
        let started = Instant::now();

        HandlerHook::<u8>::before_handle(&hook, &mut 0).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_returns_immediately() {
        let hook = DelayHook::new(Duration::ZERO);
        let started = Instant::now();

        HandlerHook::<u8>::before_handle(&hook, &mut 0).await.unwrap();

        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
