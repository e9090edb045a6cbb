//! Cache key builders
//!
//! Keys are versioned so a change to the cached shape can be rolled out by
//! bumping the prefix instead of flushing Redis.

use uuid::Uuid;

const PREFIX: &str = "pharmapay:v1";

/// Payment projection of an order. Keyed on the resolved id, never on the
/// caller's spelling of the lookup.
pub fn payment_by_order(order_id: Uuid) -> String {
    format!("{}:payment:order:{}", PREFIX, order_id)
}

/// Payment projection looked up by transaction id or gateway order id
pub fn payment_by_transaction(transaction_id: &str) -> String {
    format!("{}:payment:txn:{}", PREFIX, transaction_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        let order_id = Uuid::nil();
        assert_eq!(
            payment_by_order(order_id),
            "pharmapay:v1:payment:order:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            payment_by_transaction("TXN2026000001"),
            "pharmapay:v1:payment:txn:TXN2026000001"
        );
    }
}
