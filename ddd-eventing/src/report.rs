//! 监听器失败上报（FailureReporter）
//!
//! 异步任务与事务解析期的监听器失败不会返回给发布者，
//! 而是以处理器粒度交给上报器，用于日志、指标或补偿。
//!
use crate::listener::TransactionPhase;
use async_trait::async_trait;
use std::any::Any;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// 异步工作池中的任务失败
    Async,
    /// 异步任务 panic
    AsyncPanic,
    /// 事务解析期间某阶段的调用失败
    Resolution(TransactionPhase),
}

/// 一次被隔离的监听器失败
#[derive(Clone, Debug)]
pub struct ListenerFailure {
    pub handler: String,
    pub event_type: String,
    pub kind: FailureKind,
    pub reason: String,
}

#[async_trait]
pub trait FailureReporter: Send + Sync {
    async fn report(&self, failure: ListenerFailure);
}

/// 默认上报器：仅记录 warn 日志
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingFailureReporter;

#[async_trait]
impl FailureReporter for TracingFailureReporter {
    async fn report(&self, failure: ListenerFailure) {
        tracing::warn!(
            handler = %failure.handler,
            event_type = %failure.event_type,
            kind = ?failure.kind,
            reason = %failure.reason,
            "listener failure isolated"
        );
    }
}

/// 提取 panic 载荷中的消息
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
