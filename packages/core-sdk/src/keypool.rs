use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::RelayError;

/**
 * \brief API Key 轮询池。
 *
 * 游标是全局的：所有请求共享同一个游标，每次取 Key 推进一格并按池大小
 * 取模回绕。这样配额消耗会摊到所有入站流量上，但不提供公平性或
 * 配额感知保证。
 */
#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    /** \brief 已加载的 Key 数量；0 表示未配置。 */
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /**
     * \brief 取出当前游标指向的 Key 并推进游标。
     *
     * 读取与推进是一个原子操作：并发的两次取用不会在游标移动前拿到
     * 同一个下标，存储值始终小于池大小。
     */
    pub fn next_key(&self) -> Result<&str, RelayError> {
        let len = self.keys.len();
        if len == 0 {
            return Err(RelayError::NoKeysConfigured);
        }
        let index = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
        {
            Ok(prev) => prev,
            // 闭包总是返回 Some，这个分支不会发生
            Err(prev) => prev,
        };
        Ok(&self.keys[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn pool_of(n: usize) -> KeyPool {
        KeyPool::new((0..n).map(|i| format!("key-{}", i)).collect())
    }

    #[test]
    fn test_round_robin_returns_each_key_once_then_wraps() {
        for n in 1..=5 {
            let pool = pool_of(n);
            let mut drawn = Vec::new();
            for _ in 0..n {
                drawn.push(pool.next_key().expect("draw").to_string());
            }
            let expected: Vec<String> = (0..n).map(|i| format!("key-{}", i)).collect();
            assert_eq!(drawn, expected, "pool size {}", n);
            assert_eq!(pool.next_key().expect("wrap draw"), "key-0");
        }
    }

    #[test]
    fn test_empty_pool_fails_with_no_keys_configured() {
        let pool = KeyPool::new(Vec::new());
        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        for _ in 0..3 {
            match pool.next_key() {
                Err(RelayError::NoKeysConfigured) => {}
                other => panic!("expected NoKeysConfigured, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_cursor_is_shared_across_callers() {
        let pool = pool_of(3);
        assert_eq!(pool.next_key().expect("draw 1"), "key-0");
        assert_eq!(pool.next_key().expect("draw 2"), "key-1");
        // 新的"请求"继续沿用同一游标，不会从头开始
        assert_eq!(pool.next_key().expect("draw 3"), "key-2");
        assert_eq!(pool.next_key().expect("draw 4"), "key-0");
    }

    #[test]
    fn test_concurrent_draws_are_evenly_distributed() {
        let pool = Arc::new(pool_of(4));
        let draws_per_thread = 100;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                let mut counts = vec![0usize; 4];
                for _ in 0..draws_per_thread {
                    let key = pool.next_key().expect("concurrent draw");
                    let idx: usize = key
                        .strip_prefix("key-")
                        .expect("key name")
                        .parse()
                        .expect("key index");
                    counts[idx] += 1;
                }
                counts
            }));
        }
        let mut totals = vec![0usize; 4];
        for handle in handles {
            let counts = handle.join().expect("join");
            for (total, c) in totals.iter_mut().zip(counts) {
                *total += c;
            }
        }
        // 8 线程 * 100 次 = 800 次取用，4 个 Key 每个恰好 200 次
        assert_eq!(totals, vec![200, 200, 200, 200]);
    }
}
