//! 事务上下文与解析器
//!
//! 状态机：无上下文 → `TransactionContext::begin()` → Active →
//! 提交/回滚 → Resolving → Resolved → 丢弃。
//! 解析操作按值接收上下文，因此每次 begin 至多解析一次，
//! 解析过程中也不可能再向同一上下文追加调用。
//!
mod context;
mod resolver;

pub use context::{PendingInvocation, TransactionContext, TransactionState};
pub use resolver::{NoopUnitOfWork, Outcome, ResolutionReport, TransactionResolver, UnitOfWork};
