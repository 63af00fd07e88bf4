//! 异步执行器（AsyncExecutor）
//!
//! 有界工作池：发布者把 `(注册项, 事件)` 投入有界 mpsc 队列后立即返回，
//! 调度循环在工作许可范围内为每个任务 spawn 独立的 tokio 任务执行：
//! - 任务之间没有顺序保证；
//! - 任务不继承发布者的事务上下文或任务局部变量；
//! - 失败与 panic 都被捕获并交给 `FailureReporter`，不会传播给发布者；
//! - 队列满时按 `SaturationPolicy` 处理，绝不静默丢弃。
//!
use crate::config::{ExecutorConfig, SaturationPolicy};
use crate::error::{EventError, EventResult};
use crate::event::DomainEvent;
use crate::listener::ListenerRegistration;
use crate::report::{
    FailureKind, FailureReporter, ListenerFailure, TracingFailureReporter, panic_message,
};
use futures_util::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::sync::{
    Semaphore,
    mpsc::{self, error::SendTimeoutError, error::TrySendError},
};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// 提交给执行器的最小工作单元：恰好一个注册项与一个事件
pub struct AsyncTask<E: DomainEvent> {
    registration: Arc<ListenerRegistration<E>>,
    event: Arc<E>,
    token: CancellationToken,
}

impl<E: DomainEvent> AsyncTask<E> {
    pub fn new(registration: Arc<ListenerRegistration<E>>, event: Arc<E>) -> Self {
        Self {
            registration,
            event,
            token: CancellationToken::new(),
        }
    }

    pub fn handler_name(&self) -> &str {
        self.registration.handler_name()
    }

    pub fn handle(&self) -> AsyncTaskHandle {
        AsyncTaskHandle {
            handler: self.handler_name().to_string(),
            token: self.token.clone(),
        }
    }

    async fn execute(self, reporter: &dyn FailureReporter) {
        if self.token.is_cancelled() {
            tracing::debug!(handler = %self.handler_name(), "async task cancelled before start");
            return;
        }

        let outcome = AssertUnwindSafe(self.registration.invoke(&self.event))
            .catch_unwind()
            .await;

        let (kind, reason) = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => (FailureKind::Async, format!("{err:#}")),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(handler = %self.handler_name(), %reason, "async handler panicked");
                (FailureKind::AsyncPanic, reason)
            }
        };

        reporter
            .report(ListenerFailure {
                handler: self.handler_name().to_string(),
                event_type: self.event.event_type().to_string(),
                kind,
                reason,
            })
            .await;
    }
}

/// 已提交任务的句柄：仅支持开始前的尽力取消
#[derive(Clone, Debug)]
pub struct AsyncTaskHandle {
    handler: String,
    token: CancellationToken,
}

impl AsyncTaskHandle {
    pub fn handler_name(&self) -> &str {
        &self.handler
    }

    /// 若任务尚未开始则不再执行；已在运行的任务不受影响
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct AsyncExecutor<E: DomainEvent> {
    tx: mpsc::Sender<AsyncTask<E>>,
    config: ExecutorConfig,
    reporter: Arc<dyn FailureReporter>,
}

impl<E: DomainEvent> Clone for AsyncExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            config: self.config,
            reporter: self.reporter.clone(),
        }
    }
}

impl<E: DomainEvent> AsyncExecutor<E> {
    /// 以默认上报器启动执行器
    pub fn start(config: ExecutorConfig) -> EventResult<(Self, ExecutorHandle)> {
        Self::start_with_reporter(config, Arc::new(TracingFailureReporter))
    }

    /// 启动调度循环，返回执行器与用于关闭/等待的句柄；需在 tokio 运行时内调用
    pub fn start_with_reporter(
        config: ExecutorConfig,
        reporter: Arc<dyn FailureReporter>,
    ) -> EventResult<(Self, ExecutorHandle)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let token = CancellationToken::new();
        let task = tokio::spawn(Self::dispatch_loop(
            rx,
            token.clone(),
            config.workers,
            reporter.clone(),
        ));

        tracing::debug!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            saturation = ?config.saturation,
            "async executor started"
        );

        let executor = Self {
            tx,
            config,
            reporter,
        };
        Ok((executor, ExecutorHandle { token, task: Some(task) }))
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// 当前排队（尚未被调度循环取走）的任务数
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// 提交任务；常规情况下入队即返回
    pub async fn submit(&self, task: AsyncTask<E>) -> EventResult<AsyncTaskHandle> {
        let handle = task.handle();
        match self.tx.try_send(task) {
            Ok(()) => Ok(handle),
            Err(TrySendError::Closed(task)) => Err(EventError::ExecutorShutdown {
                handler: task.handler_name().to_string(),
            }),
            Err(TrySendError::Full(task)) => self.submit_saturated(task, handle).await,
        }
    }

    async fn submit_saturated(
        &self,
        task: AsyncTask<E>,
        handle: AsyncTaskHandle,
    ) -> EventResult<AsyncTaskHandle> {
        let capacity = self.config.queue_capacity;
        match self.config.saturation {
            SaturationPolicy::Reject => Err(EventError::ExecutorSaturated {
                handler: task.handler_name().to_string(),
                capacity,
            }),
            SaturationPolicy::Block { timeout_ms } => {
                match self
                    .tx
                    .send_timeout(task, Duration::from_millis(timeout_ms))
                    .await
                {
                    Ok(()) => Ok(handle),
                    Err(SendTimeoutError::Timeout(task)) => Err(EventError::ExecutorSaturated {
                        handler: task.handler_name().to_string(),
                        capacity,
                    }),
                    Err(SendTimeoutError::Closed(task)) => Err(EventError::ExecutorShutdown {
                        handler: task.handler_name().to_string(),
                    }),
                }
            }
            SaturationPolicy::CallerRuns => {
                tracing::warn!(
                    handler = %task.handler_name(),
                    capacity,
                    "async executor saturated, running task on caller"
                );
                task.execute(self.reporter.as_ref()).await;
                Ok(handle)
            }
        }
    }

    async fn dispatch_loop(
        mut rx: mpsc::Receiver<AsyncTask<E>>,
        token: CancellationToken,
        workers: usize,
        reporter: Arc<dyn FailureReporter>,
    ) {
        let permits = Arc::new(Semaphore::new(workers));
        let mut running: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    Self::log_join(joined);
                }
                maybe_task = rx.recv() => match maybe_task {
                    Some(task) => Self::spawn_task(&mut running, &permits, task, &reporter).await,
                    None => break,
                }
            }
        }

        // 关闭：拒绝新提交，已入队的任务照常执行完
        rx.close();
        while let Some(task) = rx.recv().await {
            Self::spawn_task(&mut running, &permits, task, &reporter).await;
        }
        while let Some(joined) = running.join_next().await {
            Self::log_join(joined);
        }
        tracing::debug!("async executor stopped");
    }

    async fn spawn_task(
        running: &mut JoinSet<()>,
        permits: &Arc<Semaphore>,
        task: AsyncTask<E>,
        reporter: &Arc<dyn FailureReporter>,
    ) {
        // Semaphore 不会被 close，acquire 只会成功
        let Ok(permit) = permits.clone().acquire_owned().await else {
            return;
        };
        let reporter = reporter.clone();
        running.spawn(async move {
            let _permit = permit;
            task.execute(reporter.as_ref()).await;
        });
    }

    fn log_join(joined: Result<(), tokio::task::JoinError>) {
        if let Err(err) = joined {
            tracing::error!(error = %err, "async worker task aborted");
        }
    }
}

/// 执行器运行句柄：用于优雅关闭与等待任务结束
pub struct ExecutorHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ExecutorHandle {
    /// 停止接收新任务；已入队与运行中的任务会继续执行完
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
