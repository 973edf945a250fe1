//! Order state machine behavior under the poll/callback flows.

use unipay::database::order_repository::OrderStatus;
use unipay::payments::types::PaymentStatus;

#[test]
fn create_then_poll_success_path() {
    // A freshly created order is pending; the provider accepting it moves
    // it to processing; a successful poll settles it.
    let status = OrderStatus::Pending;
    assert_eq!(status.advance(PaymentStatus::Processing), None);

    let status = OrderStatus::Processing;
    let settled = status.advance(PaymentStatus::Success).unwrap();
    assert_eq!(settled, OrderStatus::Success);
    assert!(settled.is_terminal());
}

#[test]
fn callback_before_poll_settles_once() {
    // Scenario: the provider callback lands while the order is still
    // pending, then a poll reports success again. The second report is a
    // no-op under terminal-ignore.
    let after_callback = OrderStatus::Pending
        .advance(PaymentStatus::Success)
        .unwrap();
    assert_eq!(after_callback, OrderStatus::Success);

    assert_eq!(after_callback.advance(PaymentStatus::Success), None);
    assert_eq!(after_callback.advance(PaymentStatus::Failed), None);
    assert_eq!(after_callback.advance(PaymentStatus::Closed), None);
}

#[test]
fn settled_orders_cannot_be_demoted() {
    for terminal in [OrderStatus::Success, OrderStatus::Failed, OrderStatus::Closed] {
        for reported in [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Success,
            PaymentStatus::Failed,
            PaymentStatus::Closed,
        ] {
            assert_eq!(
                terminal.advance(reported),
                None,
                "terminal state {:?} must ignore {:?}",
                terminal,
                reported
            );
        }
    }
}

#[test]
fn failed_and_closed_reports_settle_live_orders() {
    assert_eq!(
        OrderStatus::Pending.advance(PaymentStatus::Failed),
        Some(OrderStatus::Failed)
    );
    assert_eq!(
        OrderStatus::Processing.advance(PaymentStatus::Closed),
        Some(OrderStatus::Closed)
    );
}

#[test]
fn pending_reports_are_noops_on_live_orders() {
    for live in [OrderStatus::Pending, OrderStatus::Processing] {
        assert_eq!(live.advance(PaymentStatus::Pending), None);
        assert_eq!(live.advance(PaymentStatus::Processing), None);
    }
}

#[test]
fn only_success_and_closed_short_circuit_queries() {
    // The query path skips the upstream call only for success/closed;
    // failed orders may be re-created, pending/processing are refreshed.
    let skip_upstream = |status: OrderStatus| {
        matches!(status, OrderStatus::Success | OrderStatus::Closed)
    };
    assert!(skip_upstream(OrderStatus::Success));
    assert!(skip_upstream(OrderStatus::Closed));
    assert!(!skip_upstream(OrderStatus::Failed));
    assert!(!skip_upstream(OrderStatus::Pending));
    assert!(!skip_upstream(OrderStatus::Processing));
}
