use crate::error::AppError;
use crate::rate_limit::RateLimiter;
use live_state::LiveState;
use live_state::ingestion::FeedSender;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub live: Arc<LiveState>,
    /// Producer side of the pipeline's ingest queue.
    pub feed: FeedSender,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(live: Arc<LiveState>, feed: FeedSender) -> Self {
        Self {
            live,
            feed,
            rate_limiter: Arc::new(RateLimiter::default()),
            started_at: Instant::now(),
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Arc::new(rate_limiter);
        self
    }

    /// Validate a requested stream delay against the configured maximum.
    pub fn check_delay(&self, delay_secs: Option<f64>) -> Result<f64, AppError> {
        let delay_secs = delay_secs.unwrap_or(0.0);
        let config = self.live.config();
        if config.accepts_delay(delay_secs) {
            Ok(delay_secs)
        } else {
            Err(AppError::BadRequest(format!(
                "delay must be between 0 and {} seconds, got {}",
                config.max_delay_secs, delay_secs
            )))
        }
    }
}
