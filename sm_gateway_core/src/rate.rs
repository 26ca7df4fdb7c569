//! 按 appid 的请求计数
//!
//! 只做单调递增计数，没有时间窗口；需要真正限流时应替换为令牌桶或滑动窗口。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 请求计数器
#[derive(Debug, Default)]
pub struct RateCounter {
    counts: Mutex<HashMap<String, u64>>,
}

impl RateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 计数加一并返回新值
    pub fn increment(&self, appid: &str) -> u64 {
        let mut counts = self.counts();
        let count = counts.entry(appid.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// 查询当前计数
    pub fn get(&self, appid: &str) -> u64 {
        self.counts().get(appid).copied().unwrap_or(0)
    }
}
