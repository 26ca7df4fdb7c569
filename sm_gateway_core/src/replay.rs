//! 防重放：nonce + 时间戳窗口
//!
//! 每个 (appid, nonce) 的状态：未出现 -> 已接受（到期前）-> 可清理。
//! 检查与登记在同一把锁内完成，同一 nonce 的并发请求只有一个能通过。

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::debug;

/// 当前 Unix 秒
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// 首次出现，已登记
    Ok,
    /// 时间戳超出窗口
    Expired,
    /// 窗口内重复使用
    Replayed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NonceKey {
    appid: String,
    nonce: String,
}

/// 防重放守卫
#[derive(Debug, Default)]
pub struct ReplayGuard {
    /// (appid, nonce) -> 到期时间
    records: Mutex<HashMap<NonceKey, u64>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<NonceKey, u64>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 检查并登记 nonce
    ///
    /// 到期时间取 `max(now, timestamp) + window`，保证时间戳仍在窗口内时记录不会先被清理。
    pub fn check_and_register(
        &self,
        appid: &str,
        nonce: &str,
        timestamp: u64,
        now: u64,
        window: u64,
    ) -> ReplayOutcome {
        if now.abs_diff(timestamp) > window {
            return ReplayOutcome::Expired;
        }

        let expiry = now.max(timestamp).saturating_add(window);
        let key = NonceKey {
            appid: appid.to_string(),
            nonce: nonce.to_string(),
        };

        let mut records = self.records();
        match records.entry(key) {
            Entry::Occupied(entry) if *entry.get() >= now => ReplayOutcome::Replayed,
            Entry::Occupied(mut entry) => {
                // 过期记录视同未出现
                entry.insert(expiry);
                ReplayOutcome::Ok
            }
            Entry::Vacant(entry) => {
                entry.insert(expiry);
                ReplayOutcome::Ok
            }
        }
    }

    /// 清理已到期记录，返回清理数量
    pub fn evict_expired(&self, now: u64) -> usize {
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, expiry| *expiry >= now);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// 启动后台清理任务；守卫被释放后任务自行退出
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let guard = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即返回
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(guard) = guard.upgrade() else {
                    break;
                };
                let evicted = guard.evict_expired(unix_now());
                if evicted > 0 {
                    debug!("Evicted {} expired nonce records, {} remain", evicted, guard.len());
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const WINDOW: u64 = 300;
    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_window_boundary() {
        let guard = ReplayGuard::new();
        assert_eq!(
            guard.check_and_register("app_001", "1234567890", NOW - WINDOW, NOW, WINDOW),
            ReplayOutcome::Ok
        );
        assert_eq!(
            guard.check_and_register("app_001", "1234567891", NOW - WINDOW - 1, NOW, WINDOW),
            ReplayOutcome::Expired
        );
        assert_eq!(
            guard.check_and_register("app_001", "1234567892", NOW + WINDOW, NOW, WINDOW),
            ReplayOutcome::Ok
        );
        assert_eq!(
            guard.check_and_register("app_001", "1234567893", NOW + WINDOW + 1, NOW, WINDOW),
            ReplayOutcome::Expired
        );
    }

    #[test]
    fn test_expired_does_not_register() {
        let guard = ReplayGuard::new();
        guard.check_and_register("app_001", "1234567890", NOW - 1000, NOW, WINDOW);
        assert!(guard.is_empty());
    }

    #[test]
    fn test_replay_detected() {
        let guard = ReplayGuard::new();
        assert_eq!(
            guard.check_and_register("app_001", "12345678901234567890", NOW, NOW, WINDOW),
            ReplayOutcome::Ok
        );
        assert_eq!(
            guard.check_and_register("app_001", "12345678901234567890", NOW, NOW + 10, WINDOW),
            ReplayOutcome::Replayed
        );
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_apps_are_independent() {
        let guard = ReplayGuard::new();
        assert_eq!(
            guard.check_and_register("app_001", "12345678901234567890", NOW, NOW, WINDOW),
            ReplayOutcome::Ok
        );
        assert_eq!(
            guard.check_and_register("app_002", "12345678901234567890", NOW, NOW, WINDOW),
            ReplayOutcome::Ok
        );
    }

    #[test]
    fn test_future_timestamp_keeps_record() {
        let guard = ReplayGuard::new();
        let ts = NOW + WINDOW;
        assert_eq!(
            guard.check_and_register("app_001", "1234567890", ts, NOW, WINDOW),
            ReplayOutcome::Ok
        );
        // 时间戳仍在窗口内的最后一秒，记录必须还在
        let later = ts + WINDOW;
        guard.evict_expired(later);
        assert_eq!(
            guard.check_and_register("app_001", "1234567890", ts, later, WINDOW),
            ReplayOutcome::Replayed
        );
    }

    #[test]
    fn test_evict_expired() {
        let guard = ReplayGuard::new();
        guard.check_and_register("app_001", "1111111111", NOW, NOW, 10);
        guard.check_and_register("app_001", "2222222222", NOW, NOW, 1000);
        assert_eq!(guard.evict_expired(NOW + 11), 1);
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_stale_record_is_reusable_after_expiry() {
        let guard = ReplayGuard::new();
        guard.check_and_register("app_001", "1111111111", NOW, NOW, 10);
        let later = NOW + 11;
        assert_eq!(
            guard.check_and_register("app_001", "1111111111", later, later, 10),
            ReplayOutcome::Ok
        );
    }

    #[test]
    fn test_concurrent_same_nonce() {
        let guard = Arc::new(ReplayGuard::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = Arc::clone(&guard);
                thread::spawn(move || {
                    guard.check_and_register("app_001", "98765432109876543210", NOW, NOW, WINDOW)
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| *outcome == ReplayOutcome::Ok)
            .count();
        assert_eq!(accepted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_guard_dropped() {
        let guard = Arc::new(ReplayGuard::new());
        let handle = guard.spawn_sweeper(Duration::from_secs(1));
        drop(guard);
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts() {
        let guard = Arc::new(ReplayGuard::new());
        // 到期时间早于当前真实时间
        guard.check_and_register("app_001", "1111111111", 1000, 1000, 10);
        let handle = guard.spawn_sweeper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(guard.is_empty());
        handle.abort();
    }
}
