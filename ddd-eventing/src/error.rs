//! 事件分发统一错误定义
//!
//! 只有会改变调用方可见结果的失败才会成为 `EventError`：
//! 同步监听器失败、执行器饱和/关闭、提交前阶段失败以及底层提交/回滚失败。
//! 异步任务与事务解析期的监听器失败走 `report::FailureReporter`，不会返回给调用方。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventError {
    // --- 发布期 ---
    #[error("sync handler failed: handler={handler}, reason={source}")]
    SyncHandler {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    // --- 异步执行器 ---
    #[error("async executor saturated: handler={handler}, capacity={capacity}")]
    ExecutorSaturated { handler: String, capacity: usize },
    #[error("async executor is shut down: handler={handler}")]
    ExecutorShutdown { handler: String },

    // --- 事务解析 ---
    #[error("before-commit handler failed, commit aborted: handler={handler}, reason={source}")]
    BeforeCommit {
        handler: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("commit failed: {source}")]
    Commit {
        #[source]
        source: anyhow::Error,
    },
    #[error("rollback failed: {source}")]
    Rollback {
        #[source]
        source: anyhow::Error,
    },

    // --- 配置 ---
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

/// 统一 Result 类型别名
pub type EventResult<T> = Result<T, EventError>;

impl EventError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        EventError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// 该错误是否意味着调用方应回滚当前工作单元
    pub fn is_handler_failure(&self) -> bool {
        matches!(
            self,
            EventError::SyncHandler { .. } | EventError::BeforeCommit { .. }
        )
    }
}

impl From<std::num::ParseIntError> for EventError {
    fn from(err: std::num::ParseIntError) -> Self {
        EventError::InvalidConfig {
            reason: err.to_string(),
        }
    }
}
