/// Request-scoped cancellation and deadlines
///
/// Every storage and billing call made by the core runs under an
/// [`OpContext`]. The context carries a cancellation token and an optional
/// deadline; [`OpContext::run`] races the operation against both. An
/// interrupted operation is dropped, which releases any open cursor and
/// returns its pooled connection.
///
/// # Example
///
/// ```no_run
/// use skyaccounts_shared::context::OpContext;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), skyaccounts_shared::error::AccountsError> {
/// let ctx = OpContext::with_timeout(Duration::from_secs(5));
/// let answer = ctx.run("answer", async { Ok(42) }).await?;
/// assert_eq!(answer, 42);
/// # Ok(())
/// # }
/// ```

use crate::error::{AccountsError, InterruptReason};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline for one request
#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}

impl OpContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context whose deadline is `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Cancels the context
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs `operation` unless the context is cancelled or its deadline passes
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, or
    /// [`AccountsError::Interrupted`] when the context stopped it.
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AccountsError>
    where
        F: Future<Output = Result<T, AccountsError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(AccountsError::Interrupted {
                operation,
                reason: InterruptReason::Cancelled,
            });
        }

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| AccountsError::Interrupted {
                        operation,
                        reason: InterruptReason::DeadlineExceeded,
                    })?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AccountsError::Interrupted {
                operation,
                reason: InterruptReason::Cancelled,
            }),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = OpContext::background();
        let value = ctx.run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_after_cancel() {
        let ctx = OpContext::background();
        ctx.cancel();
        let err = ctx.run("noop", async { Ok(7) }).await.unwrap_err();
        assert!(matches!(
            err,
            AccountsError::Interrupted {
                reason: InterruptReason::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_past_deadline() {
        let ctx = OpContext::with_timeout(Duration::from_millis(50));
        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccountsError::Interrupted {
                operation: "slow",
                reason: InterruptReason::DeadlineExceeded,
            }
        ));
    }
}
