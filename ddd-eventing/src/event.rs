use chrono::{DateTime, Utc};
use std::fmt;

/// 可被分发的领域事件需要满足的能力边界
///
/// 事件构造后不可变，按值判等（`PartialEq`），没有独立的身份标识；
/// 一次 `publish` 会把事件包进 `Arc`，只读地共享给该次发布触发的所有监听器调用。
pub trait DomainEvent: fmt::Debug + PartialEq + Send + Sync + 'static {
    /// 事件类型（形如 `member.registered`），用于匹配监听器声明的兴趣
    fn event_type(&self) -> &str;

    /// 事件发生时间
    fn occurred_at(&self) -> DateTime<Utc>;
}
