//! 监听器（EventHandler）与注册项（ListenerRegistration）
//!
//! 注册项描述“谁、以何种方式、在什么条件下”响应事件：
//! - `handler`：处理逻辑与其声明关心的事件类型；
//! - `mode`：同步 / 异步 / 事务阶段；
//! - `order`：越小越先执行，相同则按注册先后；
//! - `condition`：可选谓词，在分发时按模式求值；
//! - `fallback_execution`：事务型监听器在没有活动事务时是否退化为同步执行。
//!
use crate::event::DomainEvent;
use async_trait::async_trait;
use bon::Builder;
use std::{fmt, marker::PhantomData, sync::Arc};

use self::listener_registration_builder::{IsUnset, SetCondition, State as BuilderState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandledEventType {
    One(String),
    Many(Vec<String>),
    All,
}

impl HandledEventType {
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            HandledEventType::All => true,
            HandledEventType::One(t) => t == event_type,
            HandledEventType::Many(ts) => ts.iter().any(|t| t == event_type),
        }
    }
}

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync {
    /// 处理器名称（用于日志与失败上报）
    fn handler_name(&self) -> &str;

    /// 返回该处理器关心的事件类型，默认全部
    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::All
    }

    /// 处理事件
    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}

/// 以闭包实现的处理器，适合简单的同步逻辑
pub struct FnHandler<E, F> {
    name: String,
    handled: HandledEventType,
    f: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> FnHandler<E, F>
where
    E: DomainEvent,
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            handled: HandledEventType::All,
            f,
            _event: PhantomData,
        }
    }

    pub fn handling(mut self, handled: HandledEventType) -> Self {
        self.handled = handled;
        self
    }
}

#[async_trait]
impl<E, F> EventHandler<E> for FnHandler<E, F>
where
    E: DomainEvent,
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    fn handled_event_type(&self) -> HandledEventType {
        self.handled.clone()
    }

    async fn handle(&self, event: &E) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

/// 事务阶段：相对于工作单元结束的触发时机
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    BeforeCommit,
    AfterCommit,
    AfterRollback,
    AfterCompletion,
}

/// 投递模式；事务阶段只对事务模式有意义，因此放在变体内
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    Sync,
    Async,
    Transactional(TransactionPhase),
}

impl DeliveryMode {
    pub fn after_commit() -> Self {
        DeliveryMode::Transactional(TransactionPhase::AfterCommit)
    }

    pub fn phase(&self) -> Option<TransactionPhase> {
        match self {
            DeliveryMode::Transactional(phase) => Some(*phase),
            _ => None,
        }
    }
}

/// 分发条件谓词
pub type Condition<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// 监听器注册项，启动时构建，此后不可变
#[derive(Builder)]
pub struct ListenerRegistration<E: DomainEvent> {
    handler: Arc<dyn EventHandler<E>>,
    #[builder(default = DeliveryMode::Sync)]
    mode: DeliveryMode,
    #[builder(default)]
    order: i32,
    condition: Option<Condition<E>>,
    #[builder(default)]
    fallback_execution: bool,
}

// 便捷方法：直接接收闭包作为条件，内部包装为 `Condition<E>`。
// 受 typestate 限制，与 `condition(...)` 二选一。
impl<E: DomainEvent, S: BuilderState> ListenerRegistrationBuilder<E, S> {
    pub fn when<F>(self, f: F) -> ListenerRegistrationBuilder<E, SetCondition<S>>
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
        S::Condition: IsUnset,
    {
        self.condition(Arc::new(f))
    }
}

impl<E: DomainEvent> ListenerRegistration<E> {
    pub fn handler(&self) -> &Arc<dyn EventHandler<E>> {
        &self.handler
    }

    pub fn handler_name(&self) -> &str {
        self.handler.handler_name()
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn fallback_execution(&self) -> bool {
        self.fallback_execution
    }

    /// 是否关心该事件类型（与条件无关）
    pub fn accepts(&self, event: &E) -> bool {
        self.handler.handled_event_type().matches(event.event_type())
    }

    /// 求值条件，缺省为 true
    pub fn condition_holds(&self, event: &E) -> bool {
        self.condition.as_ref().is_none_or(|c| c(event))
    }

    pub async fn invoke(&self, event: &E) -> anyhow::Result<()> {
        self.handler.handle(event).await
    }
}

impl<E: DomainEvent> fmt::Debug for ListenerRegistration<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("handler", &self.handler_name())
            .field("mode", &self.mode)
            .field("order", &self.order)
            .field("condition", &self.condition.is_some())
            .field("fallback_execution", &self.fallback_execution)
            .finish()
    }
}
