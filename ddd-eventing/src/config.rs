//! 异步执行器配置
//!
//! 可直接构造、通过 serde 从应用配置反序列化，或用 `from_env` 从环境变量读取：
//! - `EVENTING_EXECUTOR_WORKERS`
//! - `EVENTING_EXECUTOR_QUEUE_CAPACITY`
//! - `EVENTING_EXECUTOR_SATURATION`：`block`、`block:<ms>`、`caller-runs`、`reject`
//!
use crate::error::{EventError, EventResult};
use serde::Deserialize;
use std::{str::FromStr, time::Duration};

const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// 队列已满时的提交策略；任何策略都不会静默丢弃事件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum SaturationPolicy {
    /// 短暂阻塞等待空位，超时则返回 `ExecutorSaturated`
    Block {
        #[serde(default = "default_block_timeout_ms")]
        timeout_ms: u64,
    },
    /// 在提交者任务上直接执行（降级），失败仍被隔离
    CallerRuns,
    /// 立即返回 `ExecutorSaturated`
    Reject,
}

fn default_block_timeout_ms() -> u64 {
    DEFAULT_BLOCK_TIMEOUT.as_millis() as u64
}

impl Default for SaturationPolicy {
    fn default() -> Self {
        SaturationPolicy::Block {
            timeout_ms: default_block_timeout_ms(),
        }
    }
}

impl FromStr for SaturationPolicy {
    type Err = EventError;

    fn from_str(s: &str) -> EventResult<Self> {
        match s.trim() {
            "block" => Ok(SaturationPolicy::default()),
            "caller-runs" => Ok(SaturationPolicy::CallerRuns),
            "reject" => Ok(SaturationPolicy::Reject),
            other => match other.strip_prefix("block:") {
                Some(ms) => Ok(SaturationPolicy::Block {
                    timeout_ms: ms.trim().parse()?,
                }),
                None => Err(EventError::invalid_config(format!(
                    "unknown saturation policy: {other}"
                ))),
            },
        }
    }
}

/// 异步执行器配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 同时运行的任务上限
    pub workers: usize,
    /// 等待队列容量
    pub queue_capacity: usize,
    /// 队列满时的策略
    pub saturation: SaturationPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 1024,
            saturation: SaturationPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> EventResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EventResult<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("EVENTING_EXECUTOR_WORKERS") {
            config.workers = v.trim().parse()?;
        }
        if let Some(v) = lookup("EVENTING_EXECUTOR_QUEUE_CAPACITY") {
            config.queue_capacity = v.trim().parse()?;
        }
        if let Some(v) = lookup("EVENTING_EXECUTOR_SATURATION") {
            config.saturation = v.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EventResult<()> {
        if self.workers == 0 {
            return Err(EventError::invalid_config("workers must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(EventError::invalid_config(
                "queue_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}
