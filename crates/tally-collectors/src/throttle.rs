//! Per-provider request throttling.
//!
//! Every vendor call waits on its provider's bucket before it is sent. A provider gets
//! a minute bucket sized from `requestsPerMinute`/`burstCapacity` and, when declared,
//! an hour bucket sized from `requestsPerHour`. Buckets are shared by all tenants.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tally_core::ProviderId;

use crate::collector::RateLimits;

type Bucket<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

struct ProviderBuckets<C: Clock> {
    minute: Bucket<C>,
    hour: Option<Bucket<C>>,
}

impl<C: Clock> ProviderBuckets<C> {
    fn new(limits: RateLimits, clock: &C) -> Self {
        let burst = limits.burst_capacity;
        Self {
            minute: RateLimiter::direct_with_clock(
                window_quota(limits.requests_per_minute, burst, Duration::from_secs(60)),
                clock,
            ),
            hour: limits.requests_per_hour.map(|per_hour| {
                RateLimiter::direct_with_clock(
                    window_quota(per_hour, burst, Duration::from_secs(3600)),
                    clock,
                )
            }),
        }
    }

    /// Take one cell from every bucket, or report how long to wait.
    fn try_acquire(&self, clock: &C) -> Result<(), Duration> {
        self.minute
            .check()
            .map_err(|not_until| not_until.wait_time_from(clock.now()))?;
        if let Some(hour) = &self.hour {
            hour.check()
                .map_err(|not_until| not_until.wait_time_from(clock.now()))?;
        }
        Ok(())
    }
}

/// Quota allowing at most `limit` cells in any window of length `window`.
///
/// With burst `b`, GCRA admits `b` cells at once and then one per period; spreading the
/// remaining `limit - b` cells over `limit - b + 1` periods keeps every half-open window
/// at or under `limit`.
fn window_quota(limit: u32, burst: u32, window: Duration) -> Quota {
    let limit = limit.max(1);
    let burst = burst.clamp(1, limit);
    let periods = limit - burst + 1;
    let period = window / periods;

    // Both values are at least one.
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_hour(NonZeroU32::MIN))
        .allow_burst(burst)
}

/// Token buckets scoped per provider.
///
/// Providers without registered limits are not throttled.
pub struct ProviderThrottle<C: Clock = DefaultClock> {
    clock: C,
    buckets: DashMap<ProviderId, Arc<ProviderBuckets<C>>>,
}

impl ProviderThrottle<DefaultClock> {
    /// Create a throttle on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(DefaultClock::default())
    }
}

impl Default for ProviderThrottle<DefaultClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ProviderThrottle<C> {
    /// Create a throttle on a custom clock.
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            buckets: DashMap::new(),
        }
    }

    /// Size (or resize) a provider's buckets.
    pub fn configure(&self, provider: &ProviderId, limits: RateLimits) {
        tracing::debug!(
            provider = %provider,
            requests_per_minute = limits.requests_per_minute,
            requests_per_hour = ?limits.requests_per_hour,
            burst_capacity = limits.burst_capacity,
            "Configured provider throttle"
        );
        self.buckets.insert(
            provider.clone(),
            Arc::new(ProviderBuckets::new(limits, &self.clock)),
        );
    }

    fn buckets(&self, provider: &ProviderId) -> Option<Arc<ProviderBuckets<C>>> {
        self.buckets.get(provider).map(|entry| Arc::clone(entry.value()))
    }

    /// Take a call slot without waiting.
    ///
    /// # Errors
    ///
    /// Returns the time until a slot may be available.
    pub fn try_acquire(&self, provider: &ProviderId) -> Result<(), Duration> {
        match self.buckets(provider) {
            Some(buckets) => buckets.try_acquire(&self.clock),
            None => Ok(()),
        }
    }

    /// Wait until a call slot is available and take it.
    pub async fn acquire(&self, provider: &ProviderId) {
        let Some(buckets) = self.buckets(provider) else {
            return;
        };
        while let Err(wait) = buckets.try_acquire(&self.clock) {
            tracing::trace!(provider = %provider, wait_ms = wait.as_millis(), "Throttled");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    fn limits(per_minute: u32, burst: u32) -> RateLimits {
        RateLimits {
            requests_per_minute: per_minute,
            requests_per_hour: None,
            burst_capacity: burst,
        }
    }

    /// Hammer the throttle for `duration` in `step` increments and return the
    /// offsets (in ms) of every admitted call.
    fn admitted(
        throttle: &ProviderThrottle<FakeRelativeClock>,
        clock: &FakeRelativeClock,
        provider: &ProviderId,
        duration: Duration,
        step: Duration,
    ) -> Vec<u128> {
        let mut admitted = Vec::new();
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            // Many concurrent tenants: keep asking until refused.
            while throttle.try_acquire(provider).is_ok() {
                admitted.push(elapsed.as_millis());
            }
            clock.advance(step);
            elapsed += step;
        }
        admitted
    }

    fn max_in_window(admitted: &[u128], window_ms: u128) -> usize {
        admitted
            .iter()
            .map(|&start| {
                admitted
                    .iter()
                    .filter(|&&t| t >= start && t < start + window_ms)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn never_exceeds_per_minute_limit() {
        for (per_minute, burst) in [(10, 1), (10, 5), (10, 10), (60, 20), (7, 100)] {
            let clock = FakeRelativeClock::default();
            let throttle = ProviderThrottle::with_clock(clock.clone());
            let provider = ProviderId::new("retell").unwrap();
            throttle.configure(&provider, limits(per_minute, burst));

            let admitted = admitted(
                &throttle,
                &clock,
                &provider,
                Duration::from_secs(300),
                Duration::from_millis(250),
            );

            let max = max_in_window(&admitted, 60_000);
            assert!(
                max <= per_minute as usize,
                "rpm={per_minute} burst={burst}: {max} calls in one minute"
            );
            // Sustained throughput is what the burst leaves of the limit.
            let sustained = per_minute - burst.min(per_minute) + 1;
            assert!(admitted.len() >= 4 * sustained as usize);
        }
    }

    #[test]
    fn hour_bucket_caps_sustained_rate() {
        let clock = FakeRelativeClock::default();
        let throttle = ProviderThrottle::with_clock(clock.clone());
        let provider = ProviderId::new("twilio").unwrap();
        throttle.configure(
            &provider,
            RateLimits {
                requests_per_minute: 100,
                requests_per_hour: Some(120),
                burst_capacity: 10,
            },
        );

        let admitted = admitted(
            &throttle,
            &clock,
            &provider,
            Duration::from_secs(3600),
            Duration::from_secs(1),
        );
        assert!(max_in_window(&admitted, 3_600_000) <= 120);
        assert!(max_in_window(&admitted, 60_000) <= 100);
    }

    #[test]
    fn unconfigured_provider_is_not_throttled() {
        let throttle = ProviderThrottle::new();
        let provider = ProviderId::new("openrouter").unwrap();
        for _ in 0..1000 {
            assert!(throttle.try_acquire(&provider).is_ok());
        }
    }

    #[tokio::test]
    async fn acquire_waits_for_next_slot() {
        let throttle = ProviderThrottle::new();
        let provider = ProviderId::new("retell").unwrap();
        // 1200/min with burst 1 admits a call every 50ms.
        throttle.configure(&provider, limits(1200, 1));

        let started = std::time::Instant::now();
        for _ in 0..5 {
            throttle.acquire(&provider).await;
        }
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
