//! Application wiring.
//!
//! Builds every participant with its injected collaborators, subscribes
//! the runners before any saga starts, and owns the background tasks
//! (runners, sweeper, audit maintenance). No module-level mutable state:
//! the whole system is a value.

use crate::audit::{AuditRecorder, AuditSink};
use crate::config::Config;
use crate::gateway::PaymentGateway;
use crate::notifier::{NotificationParticipant, NotificationSender};
use crate::participants::{
    CouponStore, CouponValidator, InventoryParticipant, ItemParticipant, OrderParticipant,
    PaymentParticipant, UserParticipant,
};
use crate::storage::{InventoryStore, ItemStore, OrderStore, UserStore};
use crate::sweeper::ReservationSweeper;
use purchase_saga_core::bus::{EventBus, EventBusError};
use purchase_saga_core::clock::Clock;
use purchase_saga_core::kv::KvStore;
use purchase_saga_runtime::{DeadLetterQueue, Participant, ParticipantRunner};
use std::sync::Arc;
use tokio::sync::watch;

/// The durable stores every participant group needs.
pub struct Stores {
    /// Order rows (order participant)
    pub orders: Arc<dyn OrderStore>,
    /// User rows (user participant)
    pub users: Arc<dyn UserStore>,
    /// Item rows + stock reservations (item participant)
    pub items: Arc<dyn ItemStore>,
    /// Inventory rows (inventory participant)
    pub inventory: Arc<dyn InventoryStore>,
    /// Coupon rows (coupon validator)
    pub coupons: Arc<dyn CouponStore>,
}

/// The running saga system.
pub struct SagaApp {
    orders_api: Arc<OrderParticipant>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SagaApp {
    /// Wire every participant and start their runners, the sweeper and
    /// the audit maintenance task. Subscriptions are established before
    /// this returns, so a saga started right after cannot outrun them.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if any subscription fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        config: &Config,
        bus: Arc<dyn EventBus>,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        stores: Stores,
        gateway: Arc<dyn PaymentGateway>,
        audit_sink: Arc<dyn AuditSink>,
        notifications: Arc<dyn NotificationSender>,
        dlq: Arc<dyn DeadLetterQueue>,
    ) -> Result<Self, EventBusError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let retry = config.retry.to_policy();

        let orders_api = Arc::new(OrderParticipant::new(
            Arc::clone(&stores.orders),
            Arc::clone(&stores.users),
            Arc::clone(&stores.items),
            Arc::clone(&bus),
            Arc::clone(&clock),
        ));
        let user = Arc::new(UserParticipant::new(
            Arc::clone(&stores.users),
            Arc::clone(&kv),
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.reservations.balance_ttl,
        ));
        let inventory = Arc::new(InventoryParticipant::new(
            Arc::clone(&stores.inventory),
            Arc::clone(&stores.users),
            Arc::clone(&kv),
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.locks.ttl,
            config.reservations.slot_ttl,
        ));
        let item = Arc::new(ItemParticipant::new(
            Arc::clone(&stores.items),
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.reservations.stock_ttl,
        ));
        let payment = Arc::new(PaymentParticipant::new(
            Arc::clone(&kv),
            gateway,
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.reservations.balance_ttl,
        ));
        let coupon = Arc::new(CouponValidator::new(
            Arc::clone(&stores.coupons),
            Arc::clone(&bus),
            Arc::clone(&clock),
        ));
        let notifier = Arc::new(NotificationParticipant::new(
            notifications,
            Arc::clone(&bus),
            Arc::clone(&clock),
        ));
        let audit = Arc::new(AuditRecorder::new(
            audit_sink,
            Arc::clone(&clock),
            config.audit.batch_size,
        ));

        let participants: Vec<Arc<dyn Participant>> = vec![
            Arc::clone(&orders_api) as Arc<dyn Participant>,
            user,
            inventory,
            item,
            payment,
            coupon,
            notifier,
            Arc::clone(&audit) as Arc<dyn Participant>,
        ];

        let mut tasks = Vec::new();
        for participant in participants {
            let mut runner = ParticipantRunner::new(
                participant,
                Arc::clone(&bus),
                Arc::clone(&dlq),
                shutdown_rx.clone(),
            )
            .with_retry_policy(retry.clone());
            runner.subscribe().await?;
            tasks.push(runner.spawn());
        }

        tasks.push(
            ReservationSweeper::new(
                Arc::clone(&stores.items),
                Arc::clone(&clock),
                config.reservations.sweep_interval,
                shutdown_rx.clone(),
            )
            .spawn(),
        );
        tasks.push(tokio::spawn(audit.run_maintenance(
            config.audit.flush_interval,
            config.audit.retention,
            shutdown_rx,
        )));

        tracing::info!(tasks = tasks.len(), "saga application started");
        Ok(Self {
            orders_api,
            shutdown: shutdown_tx,
            tasks,
        })
    }

    /// The order admission API.
    #[must_use]
    pub fn orders(&self) -> &OrderParticipant {
        self.orders_api.as_ref()
    }

    /// Stop every background task and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("saga application stopped");
    }
}
