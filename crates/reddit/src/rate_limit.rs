//! Request budget for the Reddit API.
//!
//! Reddit grants a fixed number of OAuth requests per window. The limiter
//! keeps one budget for the whole client and also honours the remaining
//! count Reddit reports in its response headers.

use std::sync::Arc;
use std::time::Duration;

use ada_common::{AppError, AppResult};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Time window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct BudgetState {
    /// Requests spent in the current window.
    count: u32,
    window_start: Instant,
    /// Window end announced by the server, if any.
    server_reset: Option<Instant>,
}

/// Rate limit check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed.
    Allowed,
    /// Budget exhausted until the window rolls over.
    Limited {
        /// Time until the window resets.
        retry_after: Duration,
    },
}

/// Shared request budget.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Arc<Mutex<BudgetState>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BudgetState {
                count: 0,
                window_start: Instant::now(),
                server_reset: None,
            })),
        }
    }

    /// Spend one request if the budget allows it.
    pub async fn check(&self) -> RateLimitResult {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let window_end = state
            .server_reset
            .unwrap_or(state.window_start + self.config.window);
        if now >= window_end {
            state.count = 0;
            state.window_start = now;
            state.server_reset = None;
        }

        if state.count >= self.config.max_requests {
            let window_end = state
                .server_reset
                .unwrap_or(state.window_start + self.config.window);
            return RateLimitResult::Limited {
                retry_after: window_end.saturating_duration_since(now),
            };
        }

        state.count += 1;
        RateLimitResult::Allowed
    }

    /// Spend one request, waiting once for the window to roll over.
    ///
    /// Fails with `TransientGateway` if the budget is still exhausted after
    /// the wait.
    pub async fn acquire(&self) -> AppResult<()> {
        match self.check().await {
            RateLimitResult::Allowed => return Ok(()),
            RateLimitResult::Limited { retry_after } => {
                tracing::debug!(
                    wait_ms = retry_after.as_millis() as u64,
                    "Request budget exhausted, waiting"
                );
                tokio::time::sleep(retry_after).await;
            }
        }
        match self.check().await {
            RateLimitResult::Allowed => Ok(()),
            RateLimitResult::Limited { retry_after } => Err(AppError::TransientGateway(format!(
                "rate limited, retry after {}s",
                retry_after.as_secs()
            ))),
        }
    }

    /// Align the budget with `x-ratelimit-remaining` and `x-ratelimit-reset`.
    pub async fn observe(&self, remaining: f64, reset: Duration) {
        let mut state = self.state.lock().await;
        let remaining = remaining.max(0.0) as u32;
        let used = self.config.max_requests.saturating_sub(remaining);
        state.count = state.count.max(used);
        state.server_reset = Some(Instant::now() + reset);
    }

    /// Remaining requests in the current window.
    pub async fn remaining(&self) -> u32 {
        let state = self.state.lock().await;
        self.config.max_requests.saturating_sub(state.count)
    }
}
