//! 事务解析器（TransactionResolver）
//!
//! 工作单元结束时按阶段执行挂起的调用：
//! - 提交：BeforeCommit → 底层提交 → AfterCommit → AfterCompletion；
//! - 回滚：底层回滚 → AfterRollback → AfterCompletion；
//! - 每组内部保持入队顺序，全部在解析任务上串行执行。
//!
//! BeforeCommit 失败会中止提交：跳过剩余 BeforeCommit 调用，不执行底层提交，
//! 按回滚结算并返回 `EventError::BeforeCommit`。
//! After* 阶段的失败只上报，不影响同一轮解析中后续调用。
//! 处理器 panic 在各阶段都按失败处理，不会冒泡到调用方。
//!
use super::context::{PendingInvocation, TransactionContext};
use crate::error::{EventError, EventResult};
use crate::event::DomainEvent;
use crate::listener::TransactionPhase;
use crate::report::{FailureKind, FailureReporter, ListenerFailure, TracingFailureReporter};
use async_trait::async_trait;
use std::sync::Arc;

/// 底层工作单元边界（如数据库事务）
#[async_trait]
pub trait UnitOfWork: Send {
    async fn commit(&mut self) -> anyhow::Result<()>;

    async fn rollback(&mut self) -> anyhow::Result<()>;
}

/// 没有底层资源的工作单元，提交/回滚总是成功
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopUnitOfWork;

#[async_trait]
impl UnitOfWork for NoopUnitOfWork {
    async fn commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

/// 一次解析的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolutionReport {
    pub outcome: Outcome,
    /// 实际执行的调用数
    pub invoked: usize,
    /// 其中失败（已上报）的调用数
    pub failed: usize,
}

impl ResolutionReport {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            invoked: 0,
            failed: 0,
        }
    }
}

#[derive(Clone)]
pub struct TransactionResolver {
    reporter: Arc<dyn FailureReporter>,
}

impl Default for TransactionResolver {
    fn default() -> Self {
        Self::new(Arc::new(TracingFailureReporter))
    }
}

impl TransactionResolver {
    pub fn new(reporter: Arc<dyn FailureReporter>) -> Self {
        Self { reporter }
    }

    pub async fn resolve<E: DomainEvent>(
        &self,
        ctx: TransactionContext<E>,
        outcome: Outcome,
    ) -> EventResult<ResolutionReport> {
        match outcome {
            Outcome::Commit => self.commit(ctx).await,
            Outcome::Rollback => self.rollback(ctx).await,
        }
    }

    pub async fn commit<E: DomainEvent>(
        &self,
        ctx: TransactionContext<E>,
    ) -> EventResult<ResolutionReport> {
        self.commit_with(ctx, &mut NoopUnitOfWork).await
    }

    pub async fn rollback<E: DomainEvent>(
        &self,
        ctx: TransactionContext<E>,
    ) -> EventResult<ResolutionReport> {
        self.rollback_with(ctx, &mut NoopUnitOfWork).await
    }

    pub async fn commit_with<E: DomainEvent>(
        &self,
        mut ctx: TransactionContext<E>,
        uow: &mut dyn UnitOfWork,
    ) -> EventResult<ResolutionReport> {
        let pending = ctx.begin_resolution();
        let mut report = ResolutionReport::new(Outcome::Commit);

        if let Err((handler, source)) = self.run_before_commit(&pending, &mut report).await {
            tracing::warn!(%handler, reason = %source, "before-commit handler failed, rolling back");
            report.outcome = Outcome::Rollback;
            if let Err(err) = uow.rollback().await {
                tracing::error!(error = %err, "rollback after aborted commit failed");
            }
            self.run_after_rollback(&pending, &mut report).await;
            ctx.finish();
            return Err(EventError::BeforeCommit { handler, source });
        }

        if let Err(source) = uow.commit().await {
            tracing::warn!(reason = %source, "commit failed, resolving as rollback");
            report.outcome = Outcome::Rollback;
            self.run_after_rollback(&pending, &mut report).await;
            ctx.finish();
            return Err(EventError::Commit { source });
        }

        self.run_phase(&pending, TransactionPhase::AfterCommit, &mut report)
            .await;
        self.run_phase(&pending, TransactionPhase::AfterCompletion, &mut report)
            .await;
        ctx.finish();

        tracing::debug!(invoked = report.invoked, failed = report.failed, "transaction committed");
        Ok(report)
    }

    pub async fn rollback_with<E: DomainEvent>(
        &self,
        mut ctx: TransactionContext<E>,
        uow: &mut dyn UnitOfWork,
    ) -> EventResult<ResolutionReport> {
        let pending = ctx.begin_resolution();
        let mut report = ResolutionReport::new(Outcome::Rollback);

        let rolled_back = uow.rollback().await;
        self.run_after_rollback(&pending, &mut report).await;
        ctx.finish();

        rolled_back.map_err(|source| EventError::Rollback { source })?;
        tracing::debug!(invoked = report.invoked, failed = report.failed, "transaction rolled back");
        Ok(report)
    }

    /// 失败即停，返回失败的处理器名与原因
    async fn run_before_commit<E: DomainEvent>(
        &self,
        pending: &[PendingInvocation<E>],
        report: &mut ResolutionReport,
    ) -> Result<(), (String, anyhow::Error)> {
        for inv in phase_group(pending, TransactionPhase::BeforeCommit) {
            report.invoked += 1;
            if let Err(err) = inv.invoke().await {
                report.failed += 1;
                return Err((inv.handler_name().to_string(), err));
            }
        }
        Ok(())
    }

    async fn run_after_rollback<E: DomainEvent>(
        &self,
        pending: &[PendingInvocation<E>],
        report: &mut ResolutionReport,
    ) {
        self.run_phase(pending, TransactionPhase::AfterRollback, report)
            .await;
        self.run_phase(pending, TransactionPhase::AfterCompletion, report)
            .await;
    }

    async fn run_phase<E: DomainEvent>(
        &self,
        pending: &[PendingInvocation<E>],
        phase: TransactionPhase,
        report: &mut ResolutionReport,
    ) {
        for inv in phase_group(pending, phase) {
            report.invoked += 1;
            if let Err(err) = inv.invoke().await {
                report.failed += 1;
                self.reporter
                    .report(ListenerFailure {
                        handler: inv.handler_name().to_string(),
                        event_type: inv.event().event_type().to_string(),
                        kind: FailureKind::Resolution(phase),
                        reason: format!("{err:#}"),
                    })
                    .await;
            }
        }
    }
}

fn phase_group<E: DomainEvent>(
    pending: &[PendingInvocation<E>],
    phase: TransactionPhase,
) -> impl Iterator<Item = &PendingInvocation<E>> {
    pending.iter().filter(move |inv| inv.phase() == phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{DeliveryMode, FnHandler, ListenerRegistration};
    use crate::transaction::TransactionState;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    struct Saved;

    impl DomainEvent for Saved {
        fn event_type(&self) -> &str {
            "saved"
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Default)]
    struct SpyReporter {
        failures: Mutex<Vec<ListenerFailure>>,
    }

    #[async_trait]
    impl FailureReporter for SpyReporter {
        async fn report(&self, failure: ListenerFailure) {
            self.failures.lock().unwrap().push(failure);
        }
    }

    /// 记录底层提交/回滚调用
    struct RecordingUow {
        log: Log,
        fail_commit: bool,
    }

    #[async_trait]
    impl UnitOfWork for RecordingUow {
        async fn commit(&mut self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("COMMIT".into());
            if self.fail_commit {
                anyhow::bail!("constraint violation");
            }
            Ok(())
        }

        async fn rollback(&mut self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("ROLLBACK".into());
            Ok(())
        }
    }

    fn enqueue(
        ctx: &mut TransactionContext<Saved>,
        log: &Log,
        name: &str,
        phase: TransactionPhase,
        fail: bool,
    ) {
        let log = log.clone();
        let label = name.to_string();
        let handler = FnHandler::new(name, move |_: &Saved| {
            log.lock().unwrap().push(label.clone());
            if fail {
                anyhow::bail!("{label} failed");
            }
            Ok(())
        });
        let registration = ListenerRegistration::builder()
            .handler(Arc::new(handler))
            .mode(DeliveryMode::Transactional(phase))
            .build();
        ctx.enqueue(Arc::new(registration), Arc::new(Saved), phase);
    }

    fn enqueue_panicking(
        ctx: &mut TransactionContext<Saved>,
        name: &str,
        phase: TransactionPhase,
    ) {
        let handler = FnHandler::new(name, |_: &Saved| -> anyhow::Result<()> {
            panic!("boom");
        });
        let registration = ListenerRegistration::builder()
            .handler(Arc::new(handler))
            .mode(DeliveryMode::Transactional(phase))
            .build();
        ctx.enqueue(Arc::new(registration), Arc::new(Saved), phase);
    }

    fn all_phases(log: &Log) -> TransactionContext<Saved> {
        let mut ctx = TransactionContext::begin();
        enqueue(&mut ctx, log, "completion", TransactionPhase::AfterCompletion, false);
        enqueue(&mut ctx, log, "after-commit-1", TransactionPhase::AfterCommit, false);
        enqueue(&mut ctx, log, "rollback", TransactionPhase::AfterRollback, false);
        enqueue(&mut ctx, log, "before", TransactionPhase::BeforeCommit, false);
        enqueue(&mut ctx, log, "after-commit-2", TransactionPhase::AfterCommit, false);
        ctx
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn commit_runs_phases_around_the_commit() {
        let log = Log::default();
        let ctx = all_phases(&log);
        let mut uow = RecordingUow {
            log: log.clone(),
            fail_commit: false,
        };

        let report = TransactionResolver::default()
            .commit_with(ctx, &mut uow)
            .await
            .unwrap();

        assert_eq!(
            entries(&log),
            ["before", "COMMIT", "after-commit-1", "after-commit-2", "completion"]
        );
        assert_eq!(report.outcome, Outcome::Commit);
        assert_eq!(report.invoked, 4);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn rollback_skips_commit_phases() {
        let log = Log::default();
        let ctx = all_phases(&log);
        let mut uow = RecordingUow {
            log: log.clone(),
            fail_commit: false,
        };

        let report = TransactionResolver::default()
            .rollback_with(ctx, &mut uow)
            .await
            .unwrap();

        assert_eq!(entries(&log), ["ROLLBACK", "rollback", "completion"]);
        assert_eq!(report.outcome, Outcome::Rollback);
        assert_eq!(report.invoked, 2);
    }

    #[tokio::test]
    async fn before_commit_failure_aborts_commit() {
        let log = Log::default();
        let mut ctx = TransactionContext::begin();
        enqueue(&mut ctx, &log, "validate", TransactionPhase::BeforeCommit, true);
        enqueue(&mut ctx, &log, "never", TransactionPhase::BeforeCommit, false);
        enqueue(&mut ctx, &log, "coupon", TransactionPhase::AfterCommit, false);
        enqueue(&mut ctx, &log, "compensate", TransactionPhase::AfterRollback, false);
        enqueue(&mut ctx, &log, "completion", TransactionPhase::AfterCompletion, false);
        let mut uow = RecordingUow {
            log: log.clone(),
            fail_commit: false,
        };

        let err = TransactionResolver::default()
            .commit_with(ctx, &mut uow)
            .await
            .unwrap_err();

        assert!(
            matches!(err, EventError::BeforeCommit { ref handler, .. } if handler == "validate")
        );
        assert_eq!(
            entries(&log),
            ["validate", "ROLLBACK", "compensate", "completion"]
        );
    }

    #[tokio::test]
    async fn failed_commit_resolves_as_rollback() {
        let log = Log::default();
        let ctx = all_phases(&log);
        let mut uow = RecordingUow {
            log: log.clone(),
            fail_commit: true,
        };

        let err = TransactionResolver::default()
            .commit_with(ctx, &mut uow)
            .await
            .unwrap_err();

        assert!(matches!(err, EventError::Commit { .. }));
        assert_eq!(
            entries(&log),
            ["before", "COMMIT", "rollback", "completion"]
        );
    }

    #[tokio::test]
    async fn after_phase_failures_do_not_cascade() {
        let log = Log::default();
        let reporter = Arc::new(SpyReporter::default());
        let mut ctx = TransactionContext::begin();
        enqueue(&mut ctx, &log, "first", TransactionPhase::AfterCommit, true);
        enqueue(&mut ctx, &log, "second", TransactionPhase::AfterCommit, false);
        enqueue(&mut ctx, &log, "completion", TransactionPhase::AfterCompletion, true);

        let report = TransactionResolver::new(reporter.clone())
            .resolve(ctx, Outcome::Commit)
            .await
            .unwrap();

        assert_eq!(entries(&log), ["first", "second", "completion"]);
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 2);

        let failures = reporter.failures.lock().unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].handler, "first");
        assert_eq!(
            failures[0].kind,
            FailureKind::Resolution(TransactionPhase::AfterCommit)
        );
        assert_eq!(
            failures[1].kind,
            FailureKind::Resolution(TransactionPhase::AfterCompletion)
        );
    }

    #[tokio::test]
    async fn after_phase_panic_is_reported_and_does_not_cascade() {
        let log = Log::default();
        let reporter = Arc::new(SpyReporter::default());
        let mut ctx = TransactionContext::begin();
        enqueue_panicking(&mut ctx, "boom", TransactionPhase::AfterCommit);
        enqueue(&mut ctx, &log, "later", TransactionPhase::AfterCommit, false);
        enqueue(&mut ctx, &log, "completion", TransactionPhase::AfterCompletion, false);

        let report = TransactionResolver::new(reporter.clone())
            .commit(ctx)
            .await
            .unwrap();

        assert_eq!(entries(&log), ["later", "completion"]);
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 1);

        let failures = reporter.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].handler, "boom");
        assert_eq!(
            failures[0].kind,
            FailureKind::Resolution(TransactionPhase::AfterCommit)
        );
        assert!(failures[0].reason.contains("boom"));
    }

    #[tokio::test]
    async fn before_commit_panic_aborts_commit() {
        let log = Log::default();
        let mut ctx = TransactionContext::begin();
        enqueue_panicking(&mut ctx, "validate", TransactionPhase::BeforeCommit);
        enqueue(&mut ctx, &log, "coupon", TransactionPhase::AfterCommit, false);
        enqueue(&mut ctx, &log, "compensate", TransactionPhase::AfterRollback, false);
        let mut uow = RecordingUow {
            log: log.clone(),
            fail_commit: false,
        };

        let err = TransactionResolver::default()
            .commit_with(ctx, &mut uow)
            .await
            .unwrap_err();

        assert!(
            matches!(err, EventError::BeforeCommit { ref handler, .. } if handler == "validate")
        );
        assert_eq!(entries(&log), ["ROLLBACK", "compensate"]);
    }

    #[test]
    fn dropping_unresolved_context_invokes_nothing() {
        let log = Log::default();
        let ctx = all_phases(&log);
        assert_eq!(ctx.state(), TransactionState::Active);

        drop(ctx);

        assert!(entries(&log).is_empty());
    }

    #[test]
    fn resolution_drains_and_deactivates() {
        let log = Log::default();
        let mut ctx = all_phases(&log);
        assert!(ctx.is_active());
        assert_eq!(ctx.pending().len(), 5);

        let drained = ctx.begin_resolution();
        assert_eq!(drained.len(), 5);
        assert_eq!(ctx.state(), TransactionState::Resolving);
        assert!(ctx.pending().is_empty());

        ctx.finish();
        assert_eq!(ctx.state(), TransactionState::Resolved);
    }
}
