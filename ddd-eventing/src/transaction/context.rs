use crate::event::DomainEvent;
use crate::listener::{ListenerRegistration, TransactionPhase};
use crate::report::panic_message;
use futures_util::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Resolving,
    Resolved,
}

/// 挂在事务上、等待指定阶段执行的一次调用
pub struct PendingInvocation<E: DomainEvent> {
    registration: Arc<ListenerRegistration<E>>,
    event: Arc<E>,
    phase: TransactionPhase,
}

impl<E: DomainEvent> PendingInvocation<E> {
    pub fn handler_name(&self) -> &str {
        self.registration.handler_name()
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    /// 执行调用；panic 被捕获并转为普通失败
    pub(crate) async fn invoke(&self) -> anyhow::Result<()> {
        match AssertUnwindSafe(self.registration.invoke(&self.event))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(
                    handler = %self.handler_name(),
                    phase = ?self.phase,
                    %reason,
                    "transactional handler panicked"
                );
                Err(anyhow::anyhow!("handler panicked: {reason}"))
            }
        }
    }
}

/// 单个工作单元的事务上下文
///
/// 由执行该工作单元的任务独占：分发器通过 `&mut` 追加，
/// 解析器按值接收并排空。
pub struct TransactionContext<E: DomainEvent> {
    state: TransactionState,
    pending: Vec<PendingInvocation<E>>,
}

impl<E: DomainEvent> TransactionContext<E> {
    pub fn begin() -> Self {
        Self {
            state: TransactionState::Active,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn pending(&self) -> &[PendingInvocation<E>] {
        &self.pending
    }

    pub(crate) fn enqueue(
        &mut self,
        registration: Arc<ListenerRegistration<E>>,
        event: Arc<E>,
        phase: TransactionPhase,
    ) {
        debug_assert!(self.is_active(), "enqueue on inactive transaction context");
        self.pending.push(PendingInvocation {
            registration,
            event,
            phase,
        });
    }

    /// 进入 Resolving 并一次性取走待执行调用
    pub(crate) fn begin_resolution(&mut self) -> Vec<PendingInvocation<E>> {
        self.state = TransactionState::Resolving;
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn finish(&mut self) {
        self.state = TransactionState::Resolved;
    }
}

impl<E: DomainEvent> Drop for TransactionContext<E> {
    fn drop(&mut self) {
        if self.is_active() && !self.pending.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                "transaction context dropped without resolution, pending invocations discarded"
            );
        }
    }
}
