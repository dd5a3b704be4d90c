//! User balance contract, RPC client and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{PaymentMode, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::call_log::CallLog;
use crate::error::{Result, ServiceError, codes};
use crate::transport::{RpcTransport, call};

pub const UPDATE_BALANCE: &str = "user.update-balance";

/// A user's refundable balance after an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBalance {
    pub id: UserId,
    #[serde(default)]
    pub refund_balance: Option<Decimal>,
}

/// `user.update-balance` request; `amount` is a JSON number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateBalance {
    pub id: UserId,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub mode: PaymentMode,
}

/// Operations the saga needs from the user service.
#[async_trait]
pub trait UserService: Send + Sync {
    /// Debits (`Checkout`) or credits (`Refund`) the user's balance.
    async fn update_balance(
        &self,
        user_id: &UserId,
        amount: Decimal,
        mode: PaymentMode,
    ) -> Result<UserBalance>;
}

/// User service reached over the request/reply transport.
pub struct RpcUserService {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
}

impl RpcUserService {
    pub fn new(transport: Arc<dyn RpcTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }
}

#[async_trait]
impl UserService for RpcUserService {
    async fn update_balance(
        &self,
        user_id: &UserId,
        amount: Decimal,
        mode: PaymentMode,
    ) -> Result<UserBalance> {
        let request = UpdateBalance {
            id: user_id.clone(),
            amount,
            mode,
        };
        call(self.transport.as_ref(), UPDATE_BALANCE, &request, self.timeout).await
    }
}

#[derive(Debug, Default)]
struct InMemoryUserState {
    balances: HashMap<UserId, Decimal>,
    refunds: Vec<(UserId, Decimal)>,
    fail_on_update: bool,
}

/// In-memory user balances for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserService {
    state: Arc<RwLock<InMemoryUserState>>,
    log: CallLog,
}

impl InMemoryUserService {
    /// Creates a new in-memory user service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service that records its calls into `log`.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            state: Arc::default(),
            log,
        }
    }

    /// Registers a user with a starting balance.
    pub fn add_user(&self, user_id: impl Into<UserId>, balance: Decimal) {
        self.state
            .write()
            .unwrap()
            .balances
            .insert(user_id.into(), balance);
    }

    pub fn balance(&self, user_id: impl Into<UserId>) -> Option<Decimal> {
        self.state
            .read()
            .unwrap()
            .balances
            .get(&user_id.into())
            .copied()
    }

    /// Every successful refund credit, in call order.
    pub fn refunds(&self) -> Vec<(UserId, Decimal)> {
        self.state.read().unwrap().refunds.clone()
    }

    /// Configures the service to fail every balance update.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.state.write().unwrap().fail_on_update = fail;
    }
}

#[async_trait]
impl UserService for InMemoryUserService {
    async fn update_balance(
        &self,
        user_id: &UserId,
        amount: Decimal,
        mode: PaymentMode,
    ) -> Result<UserBalance> {
        self.log.record(UPDATE_BALANCE);
        let mut state = self.state.write().unwrap();

        if state.fail_on_update {
            return Err(ServiceError::fault(
                UPDATE_BALANCE,
                codes::INTERNAL,
                "Failed to update balance",
            ));
        }
        let Some(current) = state.balances.get(user_id).copied() else {
            return Err(ServiceError::fault(
                UPDATE_BALANCE,
                codes::NOT_FOUND,
                "User not found",
            ));
        };

        let next = match mode {
            PaymentMode::Checkout if current < amount => {
                return Err(ServiceError::fault(
                    UPDATE_BALANCE,
                    codes::BAD_REQUEST,
                    "Insufficient balance",
                ));
            }
            PaymentMode::Checkout => current - amount,
            PaymentMode::Refund => {
                state.refunds.push((user_id.clone(), amount));
                current + amount
            }
        };
        state.balances.insert(user_id.clone(), next);

        Ok(UserBalance {
            id: user_id.clone(),
            refund_balance: Some(next),
        })
    }
}
