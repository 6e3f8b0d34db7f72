/*!
 * Rate Limiter
 * Reward/punish admission control per client, plus a global active-request
 * ceiling
 *
 * Each client starts at health 100. Two requests closer together than
 * `delta` cost `penalty` health; well-spaced requests earn it back
 * proportionally. A client at health 0 is dropped until it recovers or the
 * garbage collector clears it.
 */

use log::debug;

use super::manager::ClientDataManager;
use crate::core::types::Tid;
use crate::registry::properties::Tunables;

pub struct RateLimiter {
    delta_ms: i64,
    penalty: f64,
    reward: f64,
}

impl RateLimiter {
    pub fn new(tunables: &Tunables) -> Self {
        Self {
            delta_ms: tunables.rate_limiter_delta_ms.max(1),
            penalty: tunables.penalty_factor,
            reward: tunables.reward_factor,
        }
    }

    /// Per-client admission. The last-request timestamp is updated before
    /// the decision, so a rejected request still resets the window.
    pub fn admit(&self, cdm: &ClientDataManager, tid: Tid, now_ms: i64) -> bool {
        let Some(last) = cdm.last_ts(tid) else {
            return false;
        };
        cdm.set_last_ts(tid, now_ms);

        let gap = now_ms - last;
        let delta = if gap < self.delta_ms {
            -self.penalty
        } else {
            self.reward * (gap as f64 / self.delta_ms as f64)
        };
        let Some(updated) = cdm.bump_health(tid, delta) else {
            return false;
        };

        if updated <= 0.0 {
            debug!("tid {} exhausted its health, throttling", tid);
            return false;
        }
        true
    }

    /// Global admission against the configured ceiling on simultaneously
    /// active requests
    pub fn global_admit(&self, live_count: usize, ceiling: usize) -> bool {
        live_count < ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Permission;

    fn limiter(delta_ms: i64, penalty: f64, reward: f64) -> RateLimiter {
        RateLimiter {
            delta_ms,
            penalty,
            reward,
        }
    }

    #[test]
    fn test_first_request_admitted() {
        let cdm = ClientDataManager::new();
        cdm.upsert(1, 2, Permission::ThirdParty).unwrap();
        let rl = limiter(5, 2.0, 0.4);
        assert!(rl.admit(&cdm, 2, 1_000_000));
        assert_eq!(cdm.last_ts(2), Some(1_000_000));
        assert_eq!(cdm.health(2), Some(100.0));
    }

    #[test]
    fn test_burst_drains_health_then_throttles() {
        let cdm = ClientDataManager::new();
        cdm.upsert(1, 2, Permission::ThirdParty).unwrap();
        let rl = limiter(5, 2.0, 0.4);

        // Requests spaced 1 ms apart: the first is rewarded (large gap from
        // epoch), every one after that is punished by 2.
        let mut outcomes = Vec::new();
        for i in 0..60 {
            outcomes.push(rl.admit(&cdm, 2, 1_000_000 + i));
        }

        // 100 / 2 = 50 punished requests empty the pool; the 51st request
        // onward is rejected.
        assert!(outcomes[..50].iter().all(|&ok| ok));
        assert!(outcomes[50..].iter().all(|&ok| !ok));
        assert_eq!(cdm.health(2), Some(0.0));
    }

    #[test]
    fn test_rejected_request_still_resets_timestamp() {
        let cdm = ClientDataManager::new();
        cdm.upsert(1, 2, Permission::ThirdParty).unwrap();
        cdm.set_health(2, 1.0);
        let rl = limiter(5, 2.0, 0.4);

        assert!(!rl.admit(&cdm, 2, 1_000_000));
        assert_eq!(cdm.last_ts(2), Some(1_000_000));
    }

    #[test]
    fn test_good_behavior_recovers_health() {
        let cdm = ClientDataManager::new();
        cdm.upsert(1, 2, Permission::ThirdParty).unwrap();
        cdm.set_health(2, 10.0);
        cdm.set_last_ts(2, 1_000_000);
        let rl = limiter(5, 2.0, 0.4);

        // Gap of 100 ms = 20 deltas, reward 0.4 * 20 = 8
        assert!(rl.admit(&cdm, 2, 1_000_100));
        assert_eq!(cdm.health(2), Some(18.0));
    }

    #[test]
    fn test_health_capped_at_hundred() {
        let cdm = ClientDataManager::new();
        cdm.upsert(1, 2, Permission::ThirdParty).unwrap();
        cdm.set_last_ts(2, 0);
        let rl = limiter(5, 2.0, 0.4);
        assert!(rl.admit(&cdm, 2, 10_000_000));
        assert_eq!(cdm.health(2), Some(100.0));
    }

    #[test]
    fn test_global_ceiling() {
        let rl = limiter(5, 2.0, 0.4);
        assert!(rl.global_admit(9, 10));
        assert!(!rl.global_admit(10, 10));
    }

    #[test]
    fn test_unknown_tid_rejected() {
        let cdm = ClientDataManager::new();
        let rl = limiter(5, 2.0, 0.4);
        assert!(!rl.admit(&cdm, 42, 1000));
    }
}
