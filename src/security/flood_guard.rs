//! 按 (会话, 消息类型) 的洪水限流器
//!
//! 只有配置里出现的消息类型才受管制，其余一律放行。
//! 计数器归属于会话本身（随会话销毁一起丢弃），跨会话互不影响，
//! 调用方已持有域锁，这里不需要再加锁。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::FloodingConfig;
use crate::model::MessageKind;

/// 单个 (会话, 消息类型) 的计数器
#[derive(Debug, Clone)]
pub struct FloodCounter {
    /// 当前窗口内的消息数
    pub count: u32,
    /// 窗口到期时间
    pub reset_at: Instant,
}

/// 单类消息的限流规则
#[derive(Debug, Clone)]
pub struct FloodRule {
    /// 计数器重置间隔
    pub reset_interval: Duration,
    /// 窗口内允许的最大消息数
    pub max_updates: u32,
    /// 触发限流时回给客户端的提示语
    pub error_message: String,
}

/// 限流判定结果
#[derive(Debug, Clone, PartialEq)]
pub enum FloodDecision {
    Allow,
    Block { message: String },
}

/// 洪水限流器
pub struct FloodGuard {
    rules: HashMap<MessageKind, FloodRule>,
}

impl FloodGuard {
    pub fn new(rules: HashMap<MessageKind, FloodRule>) -> Self {
        Self { rules }
    }

    /// 从配置构造。管制的消息类型集合由配置决定：say / avatar / name。
    pub fn from_config(config: &FloodingConfig) -> Self {
        let mut rules = HashMap::new();
        for (kind, rule) in [
            (MessageKind::Say, &config.say),
            (MessageKind::Avatar, &config.avatar),
            (MessageKind::Name, &config.name),
        ] {
            rules.insert(
                kind,
                FloodRule {
                    reset_interval: Duration::from_millis(rule.reset_interval_ms),
                    max_updates: rule.max_updates,
                    error_message: rule.error_message.clone(),
                },
            );
        }
        Self { rules }
    }

    /// 该消息类型是否受管制
    pub fn governs(&self, kind: MessageKind) -> bool {
        self.rules.contains_key(&kind)
    }

    /// 检查并更新计数器
    ///
    /// 算法，按 (会话, 消息类型)：
    /// 1. 还没有计数器：建 `{count: 1, reset_at: now + window}`，放行；
    /// 2. `reset_at` 已过期：重置为 `{count: 1, reset_at: now + window}`，放行；
    /// 3. 否则计数 +1；超过上限则拦截，**并把 `reset_at` 再顺延一个完整窗口**
    ///    —— 被拦后继续发只会推迟恢复，不会按原计划重置。
    pub fn check(
        &self,
        counters: &mut HashMap<MessageKind, FloodCounter>,
        kind: MessageKind,
        now: Instant,
    ) -> FloodDecision {
        let Some(rule) = self.rules.get(&kind) else {
            return FloodDecision::Allow;
        };

        match counters.get_mut(&kind) {
            None => {
                counters.insert(
                    kind,
                    FloodCounter {
                        count: 1,
                        reset_at: now + rule.reset_interval,
                    },
                );
                FloodDecision::Allow
            }
            Some(counter) if now >= counter.reset_at => {
                counter.count = 1;
                counter.reset_at = now + rule.reset_interval;
                FloodDecision::Allow
            }
            Some(counter) => {
                counter.count += 1;
                if counter.count > rule.max_updates {
                    counter.reset_at += rule.reset_interval;
                    FloodDecision::Block {
                        message: rule.error_message.clone(),
                    }
                } else {
                    FloodDecision::Allow
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(max_updates: u32, window: Duration) -> FloodGuard {
        let mut rules = HashMap::new();
        rules.insert(
            MessageKind::Say,
            FloodRule {
                reset_interval: window,
                max_updates,
                error_message: "Stop that shit".to_string(),
            },
        );
        FloodGuard::new(rules)
    }

    #[test]
    fn test_ungoverned_kind_always_allows() {
        let guard = guard(1, Duration::from_secs(1));
        let mut counters = HashMap::new();
        let now = Instant::now();

        for _ in 0..100 {
            assert_eq!(
                guard.check(&mut counters, MessageKind::Move, now),
                FloodDecision::Allow
            );
        }
        // 不受管制的类型不会建计数器
        assert!(counters.is_empty());
    }

    #[test]
    fn test_allows_up_to_max_then_blocks() {
        let window = Duration::from_secs(10);
        let guard = guard(3, window);
        let mut counters = HashMap::new();
        let now = Instant::now();

        // 窗口内前 3 条放行
        for _ in 0..3 {
            assert_eq!(
                guard.check(&mut counters, MessageKind::Say, now),
                FloodDecision::Allow
            );
        }

        // 第 4 条拦截，且窗口从拦截时刻顺延一整个周期
        let decision = guard.check(&mut counters, MessageKind::Say, now);
        assert!(matches!(decision, FloodDecision::Block { .. }));
        assert_eq!(counters[&MessageKind::Say].reset_at, now + window * 2);
    }

    #[test]
    fn test_window_expiry_resets_counter_to_one() {
        let window = Duration::from_secs(10);
        let guard = guard(3, window);
        let mut counters = HashMap::new();
        let now = Instant::now();

        for _ in 0..4 {
            guard.check(&mut counters, MessageKind::Say, now);
        }
        // 等到（顺延后的）reset_at 过期，下一条放行且计数重置为 1
        let later = now + window * 2;
        assert_eq!(
            guard.check(&mut counters, MessageKind::Say, later),
            FloodDecision::Allow
        );
        assert_eq!(counters[&MessageKind::Say].count, 1);
        assert_eq!(counters[&MessageKind::Say].reset_at, later + window);
    }

    #[test]
    fn test_penalty_extends_on_every_blocked_attempt() {
        let window = Duration::from_secs(10);
        let guard = guard(1, window);
        let mut counters = HashMap::new();
        let now = Instant::now();

        assert_eq!(
            guard.check(&mut counters, MessageKind::Say, now),
            FloodDecision::Allow
        );

        // 持续硬发：每次拦截都再顺延一个窗口
        for i in 0..3u32 {
            let decision = guard.check(&mut counters, MessageKind::Say, now);
            assert!(matches!(decision, FloodDecision::Block { .. }));
            assert_eq!(
                counters[&MessageKind::Say].reset_at,
                now + window * (i + 2)
            );
        }
    }

    #[test]
    fn test_block_carries_configured_message() {
        let guard = guard(1, Duration::from_secs(5));
        let mut counters = HashMap::new();
        let now = Instant::now();

        guard.check(&mut counters, MessageKind::Say, now);
        match guard.check(&mut counters, MessageKind::Say, now) {
            FloodDecision::Block { message } => assert_eq!(message, "Stop that shit"),
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_counters_created_lazily() {
        let guard = FloodGuard::from_config(&FloodingConfig::default());
        let mut counters = HashMap::new();
        let now = Instant::now();

        // 只有实际发过的类型才有计数器
        guard.check(&mut counters, MessageKind::Say, now);
        assert!(counters.contains_key(&MessageKind::Say));
        assert!(!counters.contains_key(&MessageKind::Avatar));
        assert!(!counters.contains_key(&MessageKind::Name));
    }
}
