//! Picks an available account for the executor and records rate-limit /
//! quota-exceeded outcomes.
//!
//! The round-robin pointer and the 60-second time-window reuse rule are
//! carried over from `proxy/token_manager.rs::get_token` in the source
//! repo, pulled out into a standalone component decoupled from token
//! refresh (which now lives in [`crate::executor`]).

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_REUSE_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_RATE_LIMIT_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    FillFirst,
}

#[derive(Debug, Clone, Default)]
struct RateLimitInfo {
    rate_limited_until: Option<Instant>,
    quota_exceeded: bool,
    error_message: Option<String>,
}

impl RateLimitInfo {
    fn is_available(&self) -> bool {
        if self.quota_exceeded {
            return false;
        }
        match self.rate_limited_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }
}

pub struct LoadBalancer {
    accounts: Mutex<Vec<String>>,
    limits: DashMap<String, RateLimitInfo>,
    current_index: AtomicUsize,
    strategy: Strategy,
    reuse_window: Duration,
    last_pick: Mutex<Option<(String, Instant)>>,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            accounts: Mutex::new(Vec::new()),
            limits: DashMap::new(),
            current_index: AtomicUsize::new(0),
            strategy,
            reuse_window: DEFAULT_REUSE_WINDOW,
            last_pick: Mutex::new(None),
        }
    }

    pub fn set_accounts(&self, account_ids: Vec<String>) {
        *self.accounts.lock().unwrap() = account_ids;
    }

    fn available_ids(&self) -> Vec<String> {
        self.accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|id| self.limits.get(*id).map(|l| l.is_available()).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Pick an account id, honoring the time-window reuse rule unless
    /// `quota_group` is `"image_gen"` or `force_rotate` is set.
    pub fn pick(&self, quota_group: &str, force_rotate: bool) -> Option<String> {
        if !force_rotate && quota_group != "image_gen" {
            let last = self.last_pick.lock().unwrap().clone();
            if let Some((id, at)) = last {
                if at.elapsed() < self.reuse_window
                    && self.limits.get(&id).map(|l| l.is_available()).unwrap_or(true)
                {
                    return Some(id);
                }
            }
        }

        let available = self.available_ids();
        if available.is_empty() {
            return None;
        }

        let picked = match self.strategy {
            Strategy::FillFirst => available[0].clone(),
            Strategy::RoundRobin => {
                let idx = self.current_index.fetch_add(1, Ordering::SeqCst) % available.len();
                available[idx].clone()
            }
        };

        if quota_group != "image_gen" {
            *self.last_pick.lock().unwrap() = Some((picked.clone(), Instant::now()));
        }

        Some(picked)
    }

    pub fn mark_rate_limited(&self, account_id: &str, retry_after: Option<Duration>) {
        let duration = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_DURATION);
        let mut entry = self.limits.entry(account_id.to_string()).or_default();
        entry.rate_limited_until = Some(Instant::now() + duration);
    }

    pub fn mark_quota_exceeded(&self, account_id: &str, message: Option<String>) {
        let mut entry = self.limits.entry(account_id.to_string()).or_default();
        entry.quota_exceeded = true;
        entry.error_message = message;
    }

    pub fn clear(&self, account_id: &str) {
        self.limits.remove(account_id);
    }

    pub fn is_available(&self, account_id: &str) -> bool {
        self.limits.get(account_id).map(|l| l.is_available()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_through_accounts() {
        let lb = Arc::new(LoadBalancer::new(Strategy::RoundRobin));
        lb.set_accounts(vec!["a".into(), "b".into()]);
        let first = lb.pick("chat", true).unwrap();
        // force_rotate bypasses the reuse window each time
        let second = lb.pick("chat", true).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn reuse_window_returns_same_account() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        lb.set_accounts(vec!["a".into(), "b".into()]);
        let first = lb.pick("chat", false).unwrap();
        let second = lb.pick("chat", false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn image_gen_skips_reuse_window() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        lb.set_accounts(vec!["a".into(), "b".into()]);
        let _ = lb.pick("chat", false);
        let first = lb.pick("image_gen", false).unwrap();
        let second = lb.pick("image_gen", false).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn rate_limited_account_is_skipped_until_expiry() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        lb.set_accounts(vec!["a".into(), "b".into()]);
        lb.mark_rate_limited("a", Some(Duration::from_millis(10)));
        let picked = lb.pick("chat", true).unwrap();
        assert_eq!(picked, "b");
        std::thread::sleep(Duration::from_millis(20));
        assert!(lb.is_available("a"));
    }

    #[test]
    fn quota_exceeded_has_no_automatic_expiry() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        lb.set_accounts(vec!["a".into()]);
        lb.mark_quota_exceeded("a", Some("exhausted".into()));
        std::thread::sleep(Duration::from_millis(5));
        assert!(lb.pick("chat", true).is_none());
    }

    #[test]
    fn clear_restores_availability() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        lb.set_accounts(vec!["a".into()]);
        lb.mark_quota_exceeded("a", None);
        lb.clear("a");
        assert!(lb.pick("chat", true).is_some());
    }
}
