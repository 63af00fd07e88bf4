//! 事件分发器（EventDispatcher）
//!
//! 发布时的决策引擎：按注册表顺序遍历匹配的监听器，
//! - `Sync`：条件成立则就地 await，失败立即返回并停止后续分发；
//! - `Async`：条件成立则提交给执行器，不等待结果；
//! - `Transactional`：有活动事务时条件成立则挂到事务上；
//!   没有事务时按 `fallback_execution` 退化为同步执行，或直接丢弃（不求值条件）。
//!
use crate::error::{EventError, EventResult};
use crate::event::DomainEvent;
use crate::executor::{AsyncExecutor, AsyncTask, AsyncTaskHandle};
use crate::listener::{DeliveryMode, ListenerRegistration};
use crate::registry::ListenerRegistry;
use crate::transaction::TransactionContext;
use bon::Builder;
use std::sync::Arc;

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::event_dispatcher_builder::{IsUnset, SetRegistry, State as BuilderState};

/// 一次发布的分发结果
#[derive(Debug, Default)]
pub struct PublishReport {
    /// 就地执行的监听器数（同步与事务退化执行）
    pub invoked: usize,
    /// 已提交给执行器的任务句柄，按提交顺序
    pub submitted: Vec<AsyncTaskHandle>,
    /// 挂到事务上的调用数
    pub deferred: usize,
    /// 条件不成立而跳过的监听器数
    pub skipped: usize,
    /// 没有活动事务且不允许退化执行而丢弃的监听器数
    pub dropped: usize,
}

/// 注册表在构建时移入，此后只读，分发路径无需加锁
#[derive(Builder)]
pub struct EventDispatcher<E: DomainEvent> {
    #[builder(setters(vis = "pub(crate)"))]
    registry: ListenerRegistry<E>,
    executor: AsyncExecutor<E>,
}

// 受 typestate 限制，仅当 `registry` 尚未设置时可调用，链式调用一次即可。
impl<E: DomainEvent, S: BuilderState> EventDispatcherBuilder<E, S> {
    pub fn listeners(
        self,
        registrations: Vec<ListenerRegistration<E>>,
    ) -> EventDispatcherBuilder<E, SetRegistry<S>>
    where
        <S as BuilderState>::Registry: IsUnset,
    {
        self.registry(ListenerRegistry::new(registrations))
    }
}

impl<E: DomainEvent> EventDispatcher<E> {
    pub fn registry(&self) -> &ListenerRegistry<E> {
        &self.registry
    }

    pub fn executor(&self) -> &AsyncExecutor<E> {
        &self.executor
    }

    /// 发布事件；`tx` 为当前工作单元的事务上下文，没有则传 `None`
    pub async fn publish(
        &self,
        event: impl Into<Arc<E>>,
        mut tx: Option<&mut TransactionContext<E>>,
    ) -> EventResult<PublishReport> {
        let event: Arc<E> = event.into();
        let mut report = PublishReport::default();

        for registration in self.registry.matching(&event) {
            match registration.mode() {
                DeliveryMode::Sync => {
                    self.invoke_inline(&registration, &event, &mut report)
                        .await?;
                }
                DeliveryMode::Async => {
                    if !registration.condition_holds(&event) {
                        Self::skip(&registration, &event, &mut report);
                        continue;
                    }
                    let task = AsyncTask::new(registration.clone(), event.clone());
                    let handle = self.executor.submit(task).await?;
                    tracing::debug!(
                        handler = %registration.handler_name(),
                        event_type = %event.event_type(),
                        "submitted to async executor"
                    );
                    report.submitted.push(handle);
                }
                DeliveryMode::Transactional(phase) => match tx.as_deref_mut() {
                    Some(ctx) if ctx.is_active() => {
                        if !registration.condition_holds(&event) {
                            Self::skip(&registration, &event, &mut report);
                            continue;
                        }
                        ctx.enqueue(registration.clone(), event.clone(), phase);
                        tracing::debug!(
                            handler = %registration.handler_name(),
                            event_type = %event.event_type(),
                            ?phase,
                            "deferred until transaction resolution"
                        );
                        report.deferred += 1;
                    }
                    _ if registration.fallback_execution() => {
                        self.invoke_inline(&registration, &event, &mut report)
                            .await?;
                    }
                    _ => {
                        tracing::debug!(
                            handler = %registration.handler_name(),
                            event_type = %event.event_type(),
                            ?phase,
                            "no active transaction, dropped"
                        );
                        report.dropped += 1;
                    }
                },
            }
        }

        Ok(report)
    }

    /// 依次发布多个事件，遇到第一个错误即停止
    pub async fn publish_batch(
        &self,
        events: Vec<E>,
        mut tx: Option<&mut TransactionContext<E>>,
    ) -> EventResult<Vec<PublishReport>> {
        let mut reports = Vec::with_capacity(events.len());
        for event in events {
            reports.push(self.publish(event, tx.as_deref_mut()).await?);
        }
        Ok(reports)
    }

    async fn invoke_inline(
        &self,
        registration: &ListenerRegistration<E>,
        event: &E,
        report: &mut PublishReport,
    ) -> EventResult<()> {
        if !registration.condition_holds(event) {
            Self::skip(registration, event, report);
            return Ok(());
        }

        report.invoked += 1;
        registration
            .invoke(event)
            .await
            .map_err(|source| EventError::SyncHandler {
                handler: registration.handler_name().to_string(),
                source,
            })
    }

    fn skip(registration: &ListenerRegistration<E>, event: &E, report: &mut PublishReport) {
        tracing::debug!(
            handler = %registration.handler_name(),
            event_type = %event.event_type(),
            "condition not met, skipped"
        );
        report.skipped += 1;
    }
}
