use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;

use crate::database::error::DatabaseError;
use crate::payments::types::PaymentStatus;

/// Order lifecycle state. `Success`, `Failed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Closed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Success => "success",
            OrderStatus::Failed => "failed",
            OrderStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Success | OrderStatus::Failed | OrderStatus::Closed
        )
    }

    /// The order state machine. Returns the next state for a
    /// provider-reported status, or `None` when the report is a no-op.
    /// Terminal states ignore every report, so a late or duplicate callback
    /// can never demote a settled order. This is the only place a
    /// transition is decided.
    pub fn advance(self, reported: PaymentStatus) -> Option<OrderStatus> {
        if self.is_terminal() {
            return None;
        }
        match reported {
            PaymentStatus::Success => Some(OrderStatus::Success),
            PaymentStatus::Failed => Some(OrderStatus::Failed),
            PaymentStatus::Closed => Some(OrderStatus::Closed),
            PaymentStatus::Pending | PaymentStatus::Processing => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "success" => Ok(OrderStatus::Success),
            "failed" => Ok(OrderStatus::Failed),
            "closed" => Ok(OrderStatus::Closed),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// Payment order aggregate.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: i64,
    pub order_no: String,
    pub user_id: i64,
    pub provider: String,
    pub config_id: i64,
    pub out_trade_no: String,
    pub trade_no: Option<String>,
    pub subject: String,
    pub body: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
    pub extra_data: Option<serde_json::Value>,
    pub payment_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentOrder {
    /// Typed view of the stored status. An unreadable value is treated as
    /// terminal `Failed` so it cannot re-enter the state machine.
    pub fn order_status(&self) -> OrderStatus {
        OrderStatus::from_str(&self.status).unwrap_or(OrderStatus::Failed)
    }
}

/// Column values for a new order row.
pub struct NewOrder<'a> {
    pub order_no: &'a str,
    pub user_id: i64,
    pub provider: &'a str,
    pub config_id: i64,
    pub out_trade_no: &'a str,
    pub subject: &'a str,
    pub body: Option<&'a str>,
    pub amount: Decimal,
    pub currency: &'a str,
    pub notify_url: Option<&'a str>,
    pub return_url: Option<&'a str>,
    pub client_ip: Option<&'a str>,
    pub extra_data: Option<serde_json::Value>,
}

const ORDER_COLUMNS: &str = "id, order_no, user_id, provider, config_id, out_trade_no, trade_no, \
     subject, body, amount, currency, status, notify_url, return_url, client_ip, extra_data, \
     payment_time, created_at, updated_at";

pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, order: NewOrder<'_>) -> Result<PaymentOrder, DatabaseError> {
        sqlx::query_as::<_, PaymentOrder>(&format!(
            "INSERT INTO payment_orders
                 (order_no, user_id, provider, config_id, out_trade_no, subject, body,
                  amount, currency, status, notify_url, return_url, client_ip, extra_data)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11, $12, $13)
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order.order_no)
        .bind(order.user_id)
        .bind(order.provider)
        .bind(order.config_id)
        .bind(order.out_trade_no)
        .bind(order.subject)
        .bind(order.body)
        .bind(order.amount)
        .bind(order.currency)
        .bind(order.notify_url)
        .bind(order.return_url)
        .bind(order.client_ip)
        .bind(order.extra_data)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::insert)
    }

    pub async fn get_by_order_no(
        &self,
        order_no: &str,
    ) -> Result<Option<PaymentOrder>, DatabaseError> {
        sqlx::query_as::<_, PaymentOrder>(&format!(
            "SELECT {} FROM payment_orders WHERE order_no = $1",
            ORDER_COLUMNS
        ))
        .bind(order_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)
    }

    pub async fn get_by_user_and_out_trade_no(
        &self,
        user_id: i64,
        out_trade_no: &str,
    ) -> Result<Option<PaymentOrder>, DatabaseError> {
        sqlx::query_as::<_, PaymentOrder>(&format!(
            "SELECT {} FROM payment_orders WHERE user_id = $1 AND out_trade_no = $2",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(out_trade_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)
    }

    /// Callback-path lookup. The callback carries no user id; tenant safety
    /// comes from signature verification plus the pinned config.
    pub async fn get_by_out_trade_no(
        &self,
        out_trade_no: &str,
    ) -> Result<Option<PaymentOrder>, DatabaseError> {
        sqlx::query_as::<_, PaymentOrder>(&format!(
            "SELECT {} FROM payment_orders WHERE out_trade_no = $1",
            ORDER_COLUMNS
        ))
        .bind(out_trade_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)
    }

    /// Apply a state transition decided by [`OrderStatus::advance`].
    /// The predicate re-checks that the row is still non-terminal, so a
    /// racing poll and callback converge on the first writer;
    /// `payment_time` is coalesced and therefore written at most once.
    pub async fn apply_transition(
        &self,
        id: i64,
        next: OrderStatus,
        trade_no: Option<&str>,
        payment_time: Option<DateTime<Utc>>,
    ) -> Result<Option<PaymentOrder>, DatabaseError> {
        sqlx::query_as::<_, PaymentOrder>(&format!(
            "UPDATE payment_orders
             SET status = $2,
                 trade_no = COALESCE($3, trade_no),
                 payment_time = COALESCE(payment_time, $4),
                 updated_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'processing')
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(next.as_str())
        .bind(trade_no)
        .bind(payment_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::update)
    }

    /// Record the provider-side id handed back at creation and move the
    /// order to `processing`.
    pub async fn mark_processing(
        &self,
        id: i64,
        trade_no: &str,
    ) -> Result<Option<PaymentOrder>, DatabaseError> {
        sqlx::query_as::<_, PaymentOrder>(&format!(
            "UPDATE payment_orders
             SET status = 'processing', trade_no = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(trade_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::update)
    }

    /// Mark a creation failure. Failed creations may be retried by the
    /// merchant with the same `out_trade_no`, so the unique pair is freed by
    /// status, not by deletion.
    pub async fn mark_failed(&self, id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payment_orders SET status = 'failed', updated_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::update)?;
        Ok(())
    }

    pub async fn list_by_user(
        &self,
        user_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<PaymentOrder>, i64), DatabaseError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payment_orders WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::query)?;

        let offset = (page.max(1) - 1) * page_size;
        let orders = sqlx::query_as::<_, PaymentOrder>(&format!(
            "SELECT {} FROM payment_orders WHERE user_id = $1
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        Ok((orders, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_ignore_every_report() {
        for terminal in [OrderStatus::Success, OrderStatus::Failed, OrderStatus::Closed] {
            for reported in [
                PaymentStatus::Pending,
                PaymentStatus::Processing,
                PaymentStatus::Success,
                PaymentStatus::Failed,
                PaymentStatus::Closed,
            ] {
                assert_eq!(terminal.advance(reported), None);
            }
        }
    }

    #[test]
    fn live_states_follow_reported_status() {
        for live in [OrderStatus::Pending, OrderStatus::Processing] {
            assert_eq!(live.advance(PaymentStatus::Success), Some(OrderStatus::Success));
            assert_eq!(live.advance(PaymentStatus::Failed), Some(OrderStatus::Failed));
            assert_eq!(live.advance(PaymentStatus::Closed), Some(OrderStatus::Closed));
            assert_eq!(live.advance(PaymentStatus::Pending), None);
            assert_eq!(live.advance(PaymentStatus::Processing), None);
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Success,
            OrderStatus::Failed,
            OrderStatus::Closed,
        ] {
            assert_eq!(OrderStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(OrderStatus::from_str("refunded").is_err());
    }
}
