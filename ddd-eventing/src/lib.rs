//! 进程内领域事件分发核心（ddd-eventing）
//!
//! 让应用代码发布领域事件，并由相互独立的监听器按不同投递语义响应：
//! - `Sync`：在发布者的调用栈内立即执行，失败直接返回给发布者；
//! - `Async`：交给有界工作池（`AsyncExecutor`）异步执行，失败被隔离；
//! - `Transactional`：挂到当前工作单元（`TransactionContext`）上，
//!   待提交/回滚时由 `TransactionResolver` 按阶段执行。
//!
//! 不提供持久化队列、跨进程投递或分布式一致性，仅协调单进程内
//! 一个工作单元范围的投递语义。
//!
//! 典型用法：
//! 1. 为事件类型实现 `DomainEvent`，为监听器实现 `EventHandler`；
//! 2. 启动时构建 `ListenerRegistration` 列表，交给 `EventDispatcher::builder()`；
//! 3. 每个工作单元 `TransactionContext::begin()`，调用 `publish`；
//! 4. 结束时通过 `TransactionResolver` 提交或回滚。
//!
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod executor;
pub mod listener;
pub mod registry;
pub mod report;
pub mod transaction;

pub use config::{ExecutorConfig, SaturationPolicy};
pub use dispatcher::{EventDispatcher, PublishReport};
pub use error::{EventError, EventResult};
pub use event::DomainEvent;
pub use executor::{AsyncExecutor, AsyncTask, AsyncTaskHandle, ExecutorHandle};
pub use listener::{
    Condition, DeliveryMode, EventHandler, FnHandler, HandledEventType, ListenerRegistration,
    TransactionPhase,
};
pub use registry::ListenerRegistry;
pub use report::{FailureKind, FailureReporter, ListenerFailure, TracingFailureReporter};
pub use transaction::{
    NoopUnitOfWork, Outcome, PendingInvocation, ResolutionReport, TransactionContext,
    TransactionResolver, TransactionState, UnitOfWork,
};
