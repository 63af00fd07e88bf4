//! 监听器注册表（ListenerRegistry）
//!
//! 启动时一次性构建，之后只读：注册项按 `order` 升序、同序按注册先后保存，
//! `matching` 只做事件类型匹配，条件谓词留到分发时按模式求值。
//!
use crate::event::DomainEvent;
use crate::listener::ListenerRegistration;
use std::sync::Arc;

pub struct ListenerRegistry<E: DomainEvent> {
    entries: Vec<Arc<ListenerRegistration<E>>>,
}

impl<E: DomainEvent> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<E: DomainEvent> ListenerRegistry<E> {
    pub fn new(registrations: Vec<ListenerRegistration<E>>) -> Self {
        let mut registry = Self::default();
        for r in registrations {
            registry.register(r);
        }
        registry
    }

    /// 注册监听器（仅限配置期）
    pub fn register(&mut self, registration: ListenerRegistration<E>) {
        // 插到所有 order <= 新项的条目之后，保持同序的注册先后
        let at = self
            .entries
            .partition_point(|r| r.order() <= registration.order());
        self.entries.insert(at, Arc::new(registration));
    }

    /// 返回关心该事件类型的全部注册项，已按执行顺序排列
    pub fn matching(&self, event: &E) -> Vec<Arc<ListenerRegistration<E>>> {
        self.entries
            .iter()
            .filter(|r| r.accepts(event))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ListenerRegistration<E>>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{DeliveryMode, FnHandler, HandledEventType};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Ev(&'static str);

    impl DomainEvent for Ev {
        fn event_type(&self) -> &str {
            self.0
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    fn reg(name: &str, order: i32, handled: HandledEventType) -> ListenerRegistration<Ev> {
        ListenerRegistration::builder()
            .handler(Arc::new(
                FnHandler::new(name, |_: &Ev| Ok(())).handling(handled),
            ))
            .order(order)
            .build()
    }

    fn names(regs: &[Arc<ListenerRegistration<Ev>>]) -> Vec<String> {
        regs.iter().map(|r| r.handler_name().to_string()).collect()
    }

    #[test]
    fn orders_by_rank_then_registration_sequence() {
        let registry = ListenerRegistry::new(vec![
            reg("c", 5, HandledEventType::All),
            reg("a", 0, HandledEventType::All),
            reg("b", 0, HandledEventType::All),
            reg("z", -1, HandledEventType::All),
        ]);

        assert_eq!(names(&registry.matching(&Ev("x"))), ["z", "a", "b", "c"]);
    }

    #[test]
    fn filters_by_declared_event_type() {
        let registry = ListenerRegistry::new(vec![
            reg("signup", 0, HandledEventType::One("member.registered".into())),
            reg("any", 1, HandledEventType::All),
            reg(
                "both",
                2,
                HandledEventType::Many(vec!["member.left".into(), "member.registered".into()]),
            ),
        ]);

        assert_eq!(
            names(&registry.matching(&Ev("member.registered"))),
            ["signup", "any", "both"]
        );
        assert_eq!(names(&registry.matching(&Ev("member.left"))), ["any", "both"]);
        assert_eq!(names(&registry.matching(&Ev("other"))), ["any"]);
    }

    #[test]
    fn register_keeps_order_after_construction() {
        let mut registry = ListenerRegistry::default();
        assert!(registry.is_empty());

        registry.register(reg("late", 1, HandledEventType::All));
        registry.register(reg("early", 0, HandledEventType::All));
        registry.register(reg("late-2", 1, HandledEventType::All));

        assert_eq!(registry.len(), 3);
        assert!(!registry.is_empty());
        let order: Vec<_> = registry.iter().map(|r| r.handler_name()).collect();
        assert_eq!(order, ["early", "late", "late-2"]);
    }

    #[test]
    fn matching_does_not_evaluate_conditions() {
        let evaluated = Arc::new(AtomicUsize::new(0));
        let counter = evaluated.clone();
        let registry = ListenerRegistry::new(vec![
            ListenerRegistration::builder()
                .handler(Arc::new(FnHandler::new("guarded", |_: &Ev| Ok(()))))
                .mode(DeliveryMode::Async)
                .when(move |_: &Ev| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    false
                })
                .build(),
        ]);

        assert_eq!(registry.matching(&Ev("x")).len(), 1);
        assert_eq!(evaluated.load(Ordering::SeqCst), 0);
    }
}
