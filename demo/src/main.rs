//! 会员注册示例：同步审计、异步欢迎邮件、提交后发券、回滚补偿
//!
//! 环境变量（可写在 `.env`）：
//! - `RUST_LOG`，默认 `demo=info,ddd_eventing=debug`
//! - `EVENTING_EXECUTOR_WORKERS` / `EVENTING_EXECUTOR_QUEUE_CAPACITY` / `EVENTING_EXECUTOR_SATURATION`
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ddd_eventing::{
    AsyncExecutor, DeliveryMode, DomainEvent, EventDispatcher, EventError, EventHandler,
    ExecutorConfig, FnHandler, HandledEventType, ListenerRegistration, TransactionContext,
    TransactionPhase, TransactionResolver, UnitOfWork,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ulid::Ulid;

const REGISTERED: &str = "member.registered";
const WITHDRAWN: &str = "member.withdrawn";

#[derive(Debug, Clone, PartialEq)]
enum MemberEvent {
    Registered {
        member_id: String,
        email: String,
        name: String,
        occurred_at: DateTime<Utc>,
    },
    Withdrawn {
        member_id: String,
        occurred_at: DateTime<Utc>,
    },
}

impl MemberEvent {
    fn member_id(&self) -> &str {
        match self {
            MemberEvent::Registered { member_id, .. } | MemberEvent::Withdrawn { member_id, .. } => {
                member_id
            }
        }
    }

    fn email(&self) -> Option<&str> {
        match self {
            MemberEvent::Registered { email, .. } => Some(email),
            MemberEvent::Withdrawn { .. } => None,
        }
    }
}

impl DomainEvent for MemberEvent {
    fn event_type(&self) -> &str {
        match self {
            MemberEvent::Registered { .. } => REGISTERED,
            MemberEvent::Withdrawn { .. } => WITHDRAWN,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MemberEvent::Registered { occurred_at, .. }
            | MemberEvent::Withdrawn { occurred_at, .. } => *occurred_at,
        }
    }
}

#[derive(Debug, Clone)]
struct Member {
    id: String,
    email: String,
    name: String,
}

/// 以 email 为唯一键的内存会员表
#[derive(Default, Clone)]
struct MemberStore {
    inner: Arc<Mutex<HashMap<String, Member>>>,
}

impl MemberStore {
    fn begin(&self) -> StoreTransaction {
        StoreTransaction {
            store: self.clone(),
            staged: Vec::new(),
        }
    }

    fn exists(&self, email: &str) -> bool {
        self.inner.lock().unwrap().contains_key(email)
    }

    fn names(&self) -> Vec<String> {
        let members = self.inner.lock().unwrap();
        let mut names: Vec<String> = members
            .values()
            .map(|m| format!("{}({})", m.name, m.id))
            .collect();
        names.sort();
        names
    }
}

/// 暂存写入，提交时才落到 `MemberStore`
struct StoreTransaction {
    store: MemberStore,
    staged: Vec<Member>,
}

impl StoreTransaction {
    fn stage(&mut self, member: Member) {
        self.staged.push(member);
    }
}

#[async_trait]
impl UnitOfWork for StoreTransaction {
    async fn commit(&mut self) -> anyhow::Result<()> {
        let mut members = self.store.inner.lock().unwrap();
        if let Some(dup) = self.staged.iter().find(|m| members.contains_key(&m.email)) {
            anyhow::bail!("duplicate email: {}", dup.email);
        }
        for m in self.staged.drain(..) {
            members.insert(m.email.clone(), m);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        self.staged.clear();
        Ok(())
    }
}

struct WelcomeMailer;

#[async_trait]
impl EventHandler<MemberEvent> for WelcomeMailer {
    fn handler_name(&self) -> &str {
        "welcome-mailer"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::One(REGISTERED.into())
    }

    async fn handle(&self, event: &MemberEvent) -> anyhow::Result<()> {
        // 模拟外部邮件网关耗时
        tokio::time::sleep(Duration::from_millis(50)).await;
        tracing::info!(email = ?event.email(), "welcome mail sent");
        Ok(())
    }
}

fn listeners(
    store: &MemberStore,
    coupons: &Arc<AtomicUsize>,
) -> Vec<ListenerRegistration<MemberEvent>> {
    let registered = || HandledEventType::One(REGISTERED.into());
    let guard_store = store.clone();
    let coupons = coupons.clone();

    vec![
        ListenerRegistration::builder()
            .handler(Arc::new(
                FnHandler::new("audit", |e: &MemberEvent| {
                    if let MemberEvent::Registered { email, name, .. } = e {
                        if !email.contains('@') {
                            anyhow::bail!("malformed email: {email}");
                        }
                        tracing::info!(member_id = %e.member_id(), %name, "audit recorded");
                    }
                    Ok(())
                })
                .handling(registered()),
            ))
            .order(0)
            .build(),
        ListenerRegistration::builder()
            .handler(Arc::new(WelcomeMailer))
            .mode(DeliveryMode::Async)
            .when(|e: &MemberEvent| e.email().is_some_and(|m| m.ends_with("co.kr")))
            .build(),
        ListenerRegistration::builder()
            .handler(Arc::new(
                FnHandler::new("unique-email", move |e: &MemberEvent| match e.email() {
                    Some(email) if guard_store.exists(email) => {
                        anyhow::bail!("email already registered: {email}")
                    }
                    _ => Ok(()),
                })
                .handling(registered()),
            ))
            .mode(DeliveryMode::Transactional(TransactionPhase::BeforeCommit))
            .build(),
        ListenerRegistration::builder()
            .handler(Arc::new(
                FnHandler::new("coupon", move |e: &MemberEvent| {
                    coupons.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(member_id = %e.member_id(), "signup coupon issued");
                    Ok(())
                })
                .handling(registered()),
            ))
            .mode(DeliveryMode::after_commit())
            .build(),
        ListenerRegistration::builder()
            .handler(Arc::new(
                FnHandler::new("signup-cleanup", |e: &MemberEvent| {
                    tracing::warn!(member_id = %e.member_id(), "signup rolled back, nothing issued");
                    Ok(())
                })
                .handling(registered()),
            ))
            .mode(DeliveryMode::Transactional(TransactionPhase::AfterRollback))
            .build(),
        ListenerRegistration::builder()
            .handler(Arc::new(FnHandler::new("metrics", |e: &MemberEvent| {
                tracing::info!(event_type = %e.event_type(), "unit of work completed");
                Ok(())
            })))
            .mode(DeliveryMode::Transactional(TransactionPhase::AfterCompletion))
            .order(10)
            .build(),
        ListenerRegistration::builder()
            .handler(Arc::new(
                FnHandler::new("farewell", |e: &MemberEvent| {
                    tracing::info!(member_id = %e.member_id(), "farewell note queued");
                    Ok(())
                })
                .handling(HandledEventType::One(WITHDRAWN.into())),
            ))
            .mode(DeliveryMode::after_commit())
            .fallback_execution(true)
            .build(),
    ]
}

#[derive(Debug, thiserror::Error)]
enum SignupError {
    #[error("eventing: {0}")]
    Eventing(#[from] EventError),
}

struct MemberService {
    store: MemberStore,
    dispatcher: EventDispatcher<MemberEvent>,
    resolver: TransactionResolver,
}

impl MemberService {
    async fn register(&self, email: &str, name: &str) -> Result<String, SignupError> {
        let member = Member {
            id: Ulid::new().to_string(),
            email: email.to_string(),
            name: name.to_string(),
        };
        let event = MemberEvent::Registered {
            member_id: member.id.clone(),
            email: member.email.clone(),
            name: member.name.clone(),
            occurred_at: Utc::now(),
        };
        let member_id = member.id.clone();

        let mut uow = self.store.begin();
        let mut tx = TransactionContext::begin();
        uow.stage(member);

        if let Err(err) = self.dispatcher.publish(event, Some(&mut tx)).await {
            self.resolver.rollback_with(tx, &mut uow).await?;
            return Err(err.into());
        }
        self.resolver.commit_with(tx, &mut uow).await?;
        Ok(member_id)
    }

    /// 没有事务包裹的发布：只有允许退化执行的监听器会运行
    async fn withdraw(&self, member_id: &str) -> Result<(), SignupError> {
        let event = MemberEvent::Withdrawn {
            member_id: member_id.to_string(),
            occurred_at: Utc::now(),
        };
        self.dispatcher.publish(event, None).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "demo=info,ddd_eventing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ExecutorConfig::from_env()?;
    let (executor, executor_handle) = AsyncExecutor::start(config)?;

    let store = MemberStore::default();
    let coupons = Arc::new(AtomicUsize::new(0));
    let service = MemberService {
        store: store.clone(),
        dispatcher: EventDispatcher::builder()
            .listeners(listeners(&store, &coupons))
            .executor(executor)
            .build(),
        resolver: TransactionResolver::default(),
    };

    let dispatcher = &service.dispatcher;
    for registration in dispatcher.registry().iter() {
        tracing::debug!(?registration, "listener registered");
    }
    tracing::info!(
        listeners = dispatcher.registry().len(),
        workers = dispatcher.executor().config().workers,
        queue_capacity = dispatcher.executor().config().queue_capacity,
        "member service ready"
    );

    let first = service.register("test@co.kr", "Kim").await?;
    tracing::info!(member_id = %first, "registered");

    let second = service.register("test@other.com", "Lee").await?;
    tracing::info!(member_id = %second, "registered");

    for (email, name) in [("test@co.kr", "Park"), ("broken-address", "Choi")] {
        match service.register(email, name).await {
            Ok(id) => tracing::info!(member_id = %id, "registered"),
            Err(err) => tracing::warn!(%email, error = %err, "registration rejected"),
        }
    }

    service.withdraw(&second).await?;

    executor_handle.shutdown();
    executor_handle.join().await;

    tracing::info!(
        members = ?store.names(),
        coupons = coupons.load(Ordering::SeqCst),
        "demo finished"
    );
    Ok(())
}
