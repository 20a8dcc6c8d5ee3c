use std::sync::Arc;
use std::time::Duration;

use ratelimit::Ratelimiter;

use crate::proxy::ProxyError;

/// Process-wide request budget. One token bucket holding `budget` tokens,
/// refilled by `budget` every second: caps average QPS, permits bursts of up
/// to ~budget, no per-route or per-client fairness. The available count
/// never reads negative.
#[derive(Clone)]
pub struct RateLimit {
	limiter: Arc<Ratelimiter>,
}

impl std::fmt::Debug for RateLimit {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RateLimit").finish()
	}
}

impl RateLimit {
	pub fn new(budget: u64) -> anyhow::Result<RateLimit> {
		let limiter = Ratelimiter::builder(budget, Duration::from_secs(1))
			.max_tokens(budget)
			.initial_available(budget)
			.build()
			.map_err(|e| anyhow::anyhow!("building rate limiter: {e}"))?;
		Ok(RateLimit {
			limiter: Arc::new(limiter),
		})
	}

	/// Charge one request against the budget.
	pub fn check_request(&self) -> Result<(), ProxyError> {
		self
			.limiter
			.try_wait()
			.map_err(|_| ProxyError::RateLimitExceeded)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn burst_is_bounded_by_budget() {
		let limiter = RateLimit::new(2).unwrap();

		assert!(limiter.check_request().is_ok());
		assert!(limiter.check_request().is_ok());
		assert!(limiter.check_request().is_err(), "third call within one tick must be rejected");
	}

	#[test]
	fn budget_refills() {
		let limiter = RateLimit::new(1).unwrap();

		assert!(limiter.check_request().is_ok());
		assert!(limiter.check_request().is_err());
		std::thread::sleep(Duration::from_millis(1100));
		assert!(limiter.check_request().is_ok(), "budget must drain back after a second");
	}
}
