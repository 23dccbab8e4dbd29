//! Payment gateway abstraction.
//!
//! The payment participant charges through this trait; deployments plug in
//! a real processor behind the same contract. The simulated gateway models
//! a bounded external call with a configured success probability and a
//! uniform latency interval.

use crate::config::PaymentConfig;
use purchase_saga_core::types::{Money, OrderId, UserId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Payment gateway failure.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// The processor declined the charge
    #[error("payment declined: {reason}")]
    Declined {
        /// Decline reason from the processor
        reason: String,
    },

    /// The processor did not answer in time
    #[error("payment gateway timeout")]
    Timeout,

    /// Any other processor-side failure
    #[error("payment gateway error: {0}")]
    Other(String),
}

/// A completed charge.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    /// Processor-side transaction identifier
    pub transaction_id: String,
    /// Payment method used
    pub method: String,
}

/// Boxed future returned by gateway calls.
pub type GatewayFuture<'a> =
    Pin<Box<dyn Future<Output = Result<PaymentReceipt, GatewayError>> + Send + 'a>>;

/// Abstraction over payment processors.
pub trait PaymentGateway: Send + Sync {
    /// Charge `amount` for the given order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the charge does not complete.
    fn charge(&self, order_id: OrderId, user_id: UserId, amount: Money) -> GatewayFuture<'_>;
}

/// Simulated gateway: succeeds with the configured probability after a
/// uniformly distributed delay.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    config: PaymentConfig,
}

impl SimulatedGateway {
    /// Create a gateway from payment settings
    #[must_use]
    pub const fn new(config: PaymentConfig) -> Self {
        Self { config }
    }
}

impl PaymentGateway for SimulatedGateway {
    fn charge(&self, order_id: OrderId, user_id: UserId, amount: Money) -> GatewayFuture<'_> {
        Box::pin(async move {
            use rand::Rng;

            let (latency, approved) = {
                let mut rng = rand::thread_rng();
                let latency = rng.gen_range(
                    self.config.latency_min.as_millis()..=self.config.latency_max.as_millis(),
                );
                #[allow(clippy::cast_possible_truncation)]
                let latency = std::time::Duration::from_millis(latency as u64);
                (latency, rng.gen_bool(self.config.success_rate))
            };
            tokio::time::sleep(latency).await;

            if approved {
                let transaction_id = format!("txn_{}", uuid::Uuid::new_v4());
                tracing::info!(
                    order_id = %order_id,
                    user_id = %user_id,
                    amount = amount.cents(),
                    transaction_id = %transaction_id,
                    "payment approved"
                );
                Ok(PaymentReceipt {
                    transaction_id,
                    method: self.config.method.clone(),
                })
            } else {
                tracing::warn!(
                    order_id = %order_id,
                    user_id = %user_id,
                    amount = amount.cents(),
                    "payment declined"
                );
                Err(GatewayError::Declined {
                    reason: "card declined".to_string(),
                })
            }
        })
    }
}

/// Gateway that approves every charge instantly. For tests.
#[derive(Debug, Clone, Default)]
pub struct ApprovingGateway;

impl PaymentGateway for ApprovingGateway {
    fn charge(&self, _order_id: OrderId, _user_id: UserId, _amount: Money) -> GatewayFuture<'_> {
        Box::pin(async move {
            Ok(PaymentReceipt {
                transaction_id: format!("txn_{}", uuid::Uuid::new_v4()),
                method: "credit-card".to_string(),
            })
        })
    }
}

/// Gateway that declines every charge instantly. For tests.
#[derive(Debug, Clone, Default)]
pub struct DecliningGateway;

impl PaymentGateway for DecliningGateway {
    fn charge(&self, _order_id: OrderId, _user_id: UserId, _amount: Money) -> GatewayFuture<'_> {
        Box::pin(async move {
            Err(GatewayError::Declined {
                reason: "card declined".to_string(),
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn payment_config(success_rate: f64) -> PaymentConfig {
        PaymentConfig {
            success_rate,
            latency_min: Duration::from_millis(0),
            latency_max: Duration::from_millis(1),
            method: "credit-card".to_string(),
        }
    }

    #[tokio::test]
    async fn certain_success() {
        let gateway = SimulatedGateway::new(payment_config(1.0));
        let receipt = gateway
            .charge(OrderId::new(), UserId::new(), Money::from_dollars(100))
            .await
            .unwrap();
        assert!(receipt.transaction_id.starts_with("txn_"));
        assert_eq!(receipt.method, "credit-card");
    }

    #[tokio::test]
    async fn certain_failure() {
        let gateway = SimulatedGateway::new(payment_config(0.0));
        let error = gateway
            .charge(OrderId::new(), UserId::new(), Money::from_dollars(100))
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::Declined { .. }));
    }

    #[tokio::test]
    async fn fixed_gateways() {
        assert!(
            ApprovingGateway
                .charge(OrderId::new(), UserId::new(), Money::ZERO)
                .await
                .is_ok()
        );
        assert!(
            DecliningGateway
                .charge(OrderId::new(), UserId::new(), Money::ZERO)
                .await
                .is_err()
        );
    }
}
