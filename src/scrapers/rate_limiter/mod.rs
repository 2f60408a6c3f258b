//! Adaptive request pacing for a scrape session.
//!
//! Spaces requests with a jittered delay, backs off multiplicatively on
//! failures and resets on success. Also owns the identity (user agent and
//! proxy) rotation so a blocked session can present a fresh face.

mod config;
mod session_state;

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

pub use config::{
    RateControlConfig, MAX_DEFERRAL, SLOWDOWN_AFTER_REQUESTS, SLOWDOWN_CAP, SLOWDOWN_FACTOR,
};
pub use session_state::SessionState;

use super::fetch::Identity;
use super::http_client::user_agent::user_agent_pool;

/// How the next user agent is picked from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOrder {
    RoundRobin,
    Random,
}

/// Rate controller owned by one scrape session.
#[derive(Debug)]
pub struct RateController {
    config: RateControlConfig,
    state: SessionState,
    user_agents: Vec<String>,
    order: RotationOrder,
    rng: StdRng,
}

impl RateController {
    pub fn new(config: RateControlConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Create a controller with a fixed seed for reproducible delays.
    pub fn with_seed(config: RateControlConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: RateControlConfig, rng: StdRng) -> Self {
        let user_agents = user_agent_pool(config.rotate_user_agents);
        let min_delay = config.min_delay.min(config.max_delay);
        Self {
            state: SessionState::new(min_delay),
            order: RotationOrder::Random,
            user_agents,
            config,
            rng,
        }
    }

    /// Use a specific user agent pool and rotation order.
    pub fn with_user_agents(mut self, user_agents: Vec<String>, order: RotationOrder) -> Self {
        if !user_agents.is_empty() {
            self.user_agents = user_agents;
        }
        self.order = order;
        self.state.user_agent_index = None;
        self
    }

    pub fn config(&self) -> &RateControlConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current backoff multiplier.
    pub fn multiplier(&self) -> f64 {
        self.state.backoff_multiplier
    }

    /// Successful requests recorded so far.
    pub fn request_count(&self) -> u64 {
        self.state.request_count
    }

    /// Sample the next inter-request delay.
    ///
    /// Uniform in `[min, max]`, scaled by the backoff multiplier.
    pub fn next_delay(&mut self) -> Duration {
        let min = self.state.effective_min_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64().max(min);
        let base = if max > min {
            self.rng.random_range(min..=max)
        } else {
            min
        };
        Duration::from_secs_f64(base * self.state.backoff_multiplier)
    }

    /// How long to wait before the next request may start.
    ///
    /// Zero before the first request unless a server deferral is pending.
    pub fn delay_before_next(&mut self) -> Duration {
        let delay = if self.state.last_request.is_some() {
            self.next_delay()
        } else {
            Duration::ZERO
        };
        let wait = self.state.time_until_ready(delay);
        if wait > Duration::ZERO {
            debug!("Rate limiting: waiting {:?}", wait);
        }
        wait
    }

    /// Mark that a request is starting now.
    pub fn mark_request(&mut self) {
        self.state.last_request = Some(Instant::now());
        if self
            .state
            .not_before
            .is_some_and(|t| t <= Instant::now())
        {
            self.state.not_before = None;
        }
    }

    /// Report a successful page: resets backoff and counts the request.
    pub fn record_success(&mut self) {
        if self.state.backoff_multiplier > 1.0 {
            info!("Recovered from backoff after {} failures", self.state.consecutive_failures);
        }
        self.state.backoff_multiplier = 1.0;
        self.state.consecutive_failures = 0;
        self.state.request_count += 1;

        if self.state.request_count > SLOWDOWN_AFTER_REQUESTS {
            let crept = self.state.effective_min_delay.as_secs_f64() * SLOWDOWN_FACTOR;
            let ceiling = SLOWDOWN_CAP.min(self.config.max_delay);
            self.state.effective_min_delay = Duration::from_secs_f64(crept).min(ceiling);
        }
    }

    /// Report a failed attempt: grows the multiplier up to its ceiling.
    pub fn record_failure(&mut self) {
        self.state.consecutive_failures += 1;
        let grown = self.state.backoff_multiplier * self.config.backoff_factor;
        self.state.backoff_multiplier = grown.min(self.config.max_multiplier).max(1.0);
        debug!(
            "Backoff multiplier now {:.2} after {} failures",
            self.state.backoff_multiplier, self.state.consecutive_failures
        );
    }

    /// Do not start another request before `wait` has elapsed.
    ///
    /// Waits longer than [`MAX_DEFERRAL`] are cut down to it.
    pub fn defer(&mut self, wait: Duration) {
        let wait = wait.min(MAX_DEFERRAL);
        let now = Instant::now();
        let until = now.checked_add(wait).unwrap_or(now);
        self.state.not_before = Some(match self.state.not_before {
            Some(existing) => existing.max(until),
            None => until,
        });
        info!("Server asked us to wait {:?}", wait);
    }

    /// Current identity without rotating. Picks one on first use.
    pub fn identity(&mut self) -> Identity {
        if self.state.user_agent_index.is_none() {
            return self.rotate_identity();
        }
        self.current_identity()
    }

    /// Identity for the request about to start.
    ///
    /// Rotates on every request when user-agent rotation or a proxy list
    /// is configured, and always after a block.
    pub fn identity_for_request(&mut self, after_block: bool) -> Identity {
        if after_block || self.config.rotate_user_agents || !self.config.proxies.is_empty() {
            self.rotate_identity()
        } else {
            self.identity()
        }
    }

    /// Switch to a different user agent and the next proxy in the list.
    ///
    /// With more than one user agent the new one always differs from the
    /// previous one.
    pub fn rotate_identity(&mut self) -> Identity {
        let len = self.user_agents.len();
        let next = match (self.state.user_agent_index, self.order) {
            (_, _) if len <= 1 => 0,
            (None, RotationOrder::RoundRobin) => 0,
            (None, RotationOrder::Random) => self.rng.random_range(0..len),
            (Some(prev), RotationOrder::RoundRobin) => (prev + 1) % len,
            (Some(prev), RotationOrder::Random) => {
                let pick = self.rng.random_range(0..len - 1);
                if pick >= prev {
                    pick + 1
                } else {
                    pick
                }
            }
        };
        self.state.user_agent_index = Some(next);

        if !self.config.proxies.is_empty() {
            let proxy = match self.state.proxy_index {
                Some(prev) => (prev + 1) % self.config.proxies.len(),
                None => 0,
            };
            self.state.proxy_index = Some(proxy);
        }

        let identity = self.current_identity();
        debug!(
            "Using identity: {} via {}",
            identity.user_agent,
            identity.proxy.as_deref().unwrap_or("direct")
        );
        identity
    }

    fn current_identity(&self) -> Identity {
        let user_agent = self
            .state
            .user_agent_index
            .and_then(|i| self.user_agents.get(i))
            .cloned()
            .unwrap_or_default();
        let proxy = self
            .state
            .proxy_index
            .and_then(|i| self.config.proxies.get(i))
            .cloned();
        Identity { user_agent, proxy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: f64, max: f64) -> RateControlConfig {
        RateControlConfig {
            min_delay: Duration::from_secs_f64(min),
            max_delay: Duration::from_secs_f64(max),
            backoff_factor: 1.5,
            max_multiplier: 8.0,
            rotate_user_agents: true,
            proxies: Vec::new(),
        }
    }

    #[test]
    fn test_delay_within_bounds() {
        let mut controller = RateController::with_seed(config(2.0, 5.0), 7);
        for _ in 0..500 {
            let d = controller.next_delay().as_secs_f64();
            assert!((2.0..=5.0).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn test_delay_bounds_scale_with_multiplier() {
        let mut controller = RateController::with_seed(config(2.0, 5.0), 11);
        controller.record_failure();
        controller.record_failure();
        let mult = controller.multiplier();
        for _ in 0..200 {
            let d = controller.next_delay().as_secs_f64();
            assert!(d >= 2.0 * mult - 1e-9 && d <= 5.0 * mult + 1e-9);
        }
    }

    #[test]
    fn test_failure_grows_multiplier() {
        let mut controller = RateController::new(config(0.0, 0.0));
        assert_eq!(controller.multiplier(), 1.0);
        controller.record_failure();
        assert!((controller.multiplier() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_success_resets_multiplier() {
        let mut controller = RateController::new(config(0.0, 0.0));
        controller.record_failure();
        controller.record_failure();
        controller.record_success();
        assert_eq!(controller.multiplier(), 1.0);
        assert_eq!(controller.request_count(), 1);
    }

    #[test]
    fn test_multiplier_is_capped() {
        let mut controller = RateController::new(config(0.0, 0.0));
        for _ in 0..50 {
            controller.record_failure();
        }
        assert_eq!(controller.multiplier(), 8.0);
    }

    #[test]
    fn test_first_request_has_no_delay() {
        let mut controller = RateController::new(config(2.0, 5.0));
        assert_eq!(controller.delay_before_next(), Duration::ZERO);
        controller.mark_request();
        assert!(controller.delay_before_next() > Duration::ZERO);
    }

    #[test]
    fn test_defer_sets_floor() {
        let mut controller = RateController::new(config(0.0, 0.0));
        controller.defer(Duration::from_secs(30));
        let wait = controller.delay_before_next();
        assert!(wait > Duration::from_secs(29));
    }

    #[test]
    fn test_huge_deferral_is_capped() {
        let mut controller = RateController::new(config(0.0, 0.0));
        controller.defer(Duration::from_secs(u64::MAX));
        let wait = controller.delay_before_next();
        assert!(wait <= MAX_DEFERRAL);
        assert!(wait > MAX_DEFERRAL - Duration::from_secs(1));
    }

    #[test]
    fn test_gradual_slowdown_stays_under_max() {
        let mut controller = RateController::with_seed(config(1.0, 3.0), 3);
        for _ in 0..100 {
            controller.record_success();
        }
        let min = controller.state().effective_min_delay;
        assert!(min > Duration::from_secs(1));
        assert!(min <= Duration::from_secs(3));
        for _ in 0..100 {
            assert!(controller.next_delay() <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_identity_rotates_per_request() {
        let mut controller = RateController::with_seed(config(0.0, 0.0), 9);
        let first = controller.identity_for_request(false);
        let second = controller.identity_for_request(false);
        assert_ne!(first.user_agent, second.user_agent);
    }

    #[test]
    fn test_fixed_identity_without_rotation() {
        let mut fixed = config(0.0, 0.0);
        fixed.rotate_user_agents = false;
        let agents = vec!["ua-a".to_string(), "ua-b".to_string()];
        let mut controller =
            RateController::new(fixed).with_user_agents(agents, RotationOrder::RoundRobin);
        let first = controller.identity_for_request(false);
        assert_eq!(controller.identity_for_request(false), first);
        assert_ne!(controller.identity_for_request(true), first);
    }

    #[test]
    fn test_rotation_never_repeats() {
        let mut controller = RateController::with_seed(config(0.0, 0.0), 5);
        let mut previous = controller.identity().user_agent;
        for _ in 0..50 {
            let next = controller.rotate_identity().user_agent;
            assert_ne!(next, previous);
            previous = next;
        }
    }

    #[test]
    fn test_round_robin_rotation() {
        let agents = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut controller = RateController::new(config(0.0, 0.0))
            .with_user_agents(agents, RotationOrder::RoundRobin);
        let seen: Vec<String> = (0..4).map(|_| controller.rotate_identity().user_agent).collect();
        assert_eq!(seen, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_proxy_round_robin() {
        let mut cfg = config(0.0, 0.0);
        cfg.proxies = vec!["http://p1:8080".into(), "http://p2:8080".into()];
        let mut controller = RateController::new(cfg);
        assert_eq!(controller.identity().proxy.as_deref(), Some("http://p1:8080"));
        assert_eq!(controller.rotate_identity().proxy.as_deref(), Some("http://p2:8080"));
        assert_eq!(controller.rotate_identity().proxy.as_deref(), Some("http://p1:8080"));
    }

    #[test]
    fn test_identity_is_stable_without_rotation() {
        let mut controller = RateController::new(config(0.0, 0.0));
        let first = controller.identity();
        assert_eq!(controller.identity(), first);
    }
}
