//! Administrative operations: user provisioning and payment-config CRUD.
//!
//! Every write that touches cached state invalidates the corresponding
//! cache entry immediately after the commit — the TTL is a backstop, not
//! the correctness mechanism.

use std::sync::Arc;

use crate::database::config_repository::{ConfigRepository, PaymentConfig};
use crate::database::order_repository::{OrderRepository, PaymentOrder};
use crate::database::payment_log_repository::{PaymentLog, PaymentLogRepository};
use crate::database::user_repository::{User, UserRepository};
use crate::error::{AppError, AppResult, ErrorCode};
use crate::services::auth::AuthService;
use crate::services::payment::PaymentService;

pub struct AdminService {
    users: Arc<UserRepository>,
    configs: Arc<ConfigRepository>,
    orders: Arc<OrderRepository>,
    logs: Arc<PaymentLogRepository>,
    auth: Arc<AuthService>,
    payment: Arc<PaymentService>,
}

impl AdminService {
    pub fn new(
        users: Arc<UserRepository>,
        configs: Arc<ConfigRepository>,
        orders: Arc<OrderRepository>,
        logs: Arc<PaymentLogRepository>,
        auth: Arc<AuthService>,
        payment: Arc<PaymentService>,
    ) -> Self {
        Self {
            users,
            configs,
            orders,
            logs,
            auth,
            payment,
        }
    }

    /// Create a merchant account; returns the plaintext secret exactly
    /// once.
    pub async fn create_user(&self, username: &str, email: &str) -> AppResult<(User, String)> {
        self.auth.create_user(username, email).await
    }

    pub async fn set_user_status(&self, user_id: i64, status: i16) -> AppResult<User> {
        let user = self
            .users
            .set_status(user_id, status)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::NOT_FOUND, "user not found"))?;

        self.auth.invalidate_user_cache(&user.api_key).await;
        Ok(user)
    }

    pub async fn create_config(
        &self,
        user_id: i64,
        provider: &str,
        config_name: &str,
        config_data: serde_json::Value,
    ) -> AppResult<PaymentConfig> {
        if self.users.get_by_id(user_id).await?.is_none() {
            return Err(AppError::new(ErrorCode::NOT_FOUND, "user not found"));
        }

        let config = self
            .configs
            .create(user_id, provider, config_name, config_data)
            .await?;

        self.payment.invalidate_config_cache(user_id, provider).await;
        Ok(config)
    }

    pub async fn update_config(
        &self,
        config_id: i64,
        config_name: &str,
        config_data: serde_json::Value,
        status: i16,
    ) -> AppResult<PaymentConfig> {
        let updated = self
            .configs
            .update(config_id, config_name, config_data, status)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::NOT_FOUND, "config not found"))?;

        self.payment
            .invalidate_config_cache(updated.user_id, &updated.provider)
            .await;
        Ok(updated)
    }

    pub async fn delete_config(&self, config_id: i64) -> AppResult<()> {
        let deleted = self
            .configs
            .delete(config_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::NOT_FOUND, "config not found"))?;

        self.payment
            .invalidate_config_cache(deleted.user_id, &deleted.provider)
            .await;
        Ok(())
    }

    pub async fn list_configs(&self, user_id: i64) -> AppResult<Vec<PaymentConfig>> {
        Ok(self.configs.list_by_user(user_id).await?)
    }

    pub async fn list_orders(
        &self,
        user_id: i64,
        page: i64,
        page_size: i64,
    ) -> AppResult<(Vec<PaymentOrder>, i64)> {
        Ok(self.orders.list_by_user(user_id, page, page_size).await?)
    }

    pub async fn list_order_logs(
        &self,
        order_id: i64,
        page: i64,
        page_size: i64,
    ) -> AppResult<(Vec<PaymentLog>, i64)> {
        Ok(self.logs.list_by_order(order_id, page, page_size).await?)
    }
}
