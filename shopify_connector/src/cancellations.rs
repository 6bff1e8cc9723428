//! Cancellation reconciliation. Platform orders carry cancellations two ways: a whole-order
//! cancel (non-empty `cancelled_at`) or partial cancels encoded as refunds whose line items
//! restock with `cancel` / `no_restock`. Both collapse into a per-line cancelled map here.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::canonical::{Cancellation, CancellationReason, OrderLine};
use crate::fulfillments::LineFulfillments;
use crate::shopify_order::ShopifyOrder;

/// The cancelled quantity and reason for one platform line item.
#[derive(Debug, Clone, Serialize)]
pub struct CancelledLine {
    pub quantity_cancelled: i64,
    pub cancellation_reason: CancellationReason,
}

/// Derives per-line cancelled quantities for a platform order, given its fulfillment ledger.
///
/// Whole-order cancels report the unfulfilled remainder of every line under the order's
/// platform cancel reason. Partial cancels walk the order's refunds in two passes, `cancel`
/// restocks first, then `no_restock`; a `no_restock` quantity is only counted when it still
/// fits under the line's purchased quantity, and refunds carrying a `refund_discrepancy`
/// adjustment are skipped wholesale since those are price corrections, not cancellations.
pub fn cancelled_line_map(
    order: &ShopifyOrder,
    ledger: &BTreeMap<i64, LineFulfillments>,
) -> BTreeMap<i64, CancelledLine> {
    let whole_order_cancel =
        order.cancelled_at.as_deref().map(|at| !at.is_empty()).unwrap_or(false);

    let mut quantities: BTreeMap<i64, i64> = BTreeMap::new();
    let reason = if whole_order_cancel {
        let reason = CancellationReason::from_platform_code(order.cancel_reason.as_deref());
        for line_item in &order.line_items {
            let fulfilled =
                ledger.get(&line_item.id).map(|f| f.total_fulfilled).unwrap_or_default();
            let remaining = line_item.quantity - fulfilled;
            if remaining > 0 {
                quantities.insert(line_item.id, remaining);
            }
        }
        reason
    } else {
        for pass in ["cancel", "no_restock"] {
            'refunds: for refund in &order.refunds {
                for refund_line in &refund.refund_line_items {
                    quantities.entry(refund_line.line_item_id).or_insert(0);
                    if refund_line.restock_type.as_deref() != Some(pass) {
                        continue;
                    }
                    if pass == "no_restock" {
                        if refund
                            .order_adjustments
                            .iter()
                            .any(|adjustment| adjustment.kind == "refund_discrepancy")
                        {
                            continue 'refunds;
                        }
                        let purchased = refund_line
                            .line_item
                            .as_ref()
                            .map(|line_item| line_item.quantity)
                            .unwrap_or_default();
                        let fulfilled = ledger
                            .get(&refund_line.line_item_id)
                            .map(|f| f.total_fulfilled)
                            .unwrap_or_default();
                        let cancelled = quantities
                            .get(&refund_line.line_item_id)
                            .copied()
                            .unwrap_or_default();
                        if fulfilled + cancelled + refund_line.quantity > purchased {
                            debug!(
                                "Skipping no_restock quantity {} on line {} of order {}: \
                                 exceeds the {} purchased",
                                refund_line.quantity, refund_line.line_item_id, order.id, purchased
                            );
                            continue;
                        }
                    }
                    if let Some(quantity) = quantities.get_mut(&refund_line.line_item_id) {
                        *quantity += refund_line.quantity;
                    }
                }
            }
        }
        CancellationReason::Other
    };

    quantities
        .into_iter()
        .map(|(line_id, quantity_cancelled)| {
            (line_id, CancelledLine { quantity_cancelled, cancellation_reason: reason })
        })
        .collect()
}

/// True when the order has any cancellation signal: a whole-order cancel timestamp, or a line
/// whose purchased quantity exceeds what its fulfillments (of any status) account for.
pub fn order_contains_cancellations(order: &ShopifyOrder) -> bool {
    if order.cancelled_at.as_deref().map(|at| !at.is_empty()).unwrap_or(false) {
        return true;
    }
    order.line_items.iter().any(|line_item| {
        let fulfilled: i64 = order
            .fulfillments
            .iter()
            .flat_map(|fulfillment| fulfillment.line_items.iter())
            .filter(|fulfilled_line| fulfilled_line.id == line_item.id)
            .map(|fulfilled_line| fulfilled_line.quantity)
            .sum();
        line_item.quantity > fulfilled
    })
}

/// One outbound cancellation: the cancellation record plus the line it applies to.
#[derive(Debug, Clone)]
pub struct CancellationGroup {
    pub cancellation: Cancellation,
    pub order_lines: Vec<CancellationLine>,
}

#[derive(Debug, Clone)]
pub struct CancellationLine {
    pub cancellation_reason: CancellationReason,
    pub quantity_cancelled: i64,
    pub order_line: OrderLine,
}

/// Expands canonical order lines into one group per cancellation record, preserving line order.
pub fn cancellation_groups(order_lines: &[OrderLine]) -> Vec<CancellationGroup> {
    let mut groups = Vec::new();
    for order_line in order_lines {
        for cancellation in &order_line.cancellations {
            groups.push(CancellationGroup {
                cancellation: cancellation.clone(),
                order_lines: vec![CancellationLine {
                    cancellation_reason: cancellation.cancellation_reason,
                    quantity_cancelled: cancellation.quantity_cancelled,
                    order_line: order_line.clone(),
                }],
            });
        }
    }
    groups
}
