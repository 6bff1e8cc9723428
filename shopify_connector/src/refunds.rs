//! Refund reconciliation. Inbound, refund records on scanned platform orders become refund
//! candidates for the marketplace side. Outbound, cancellation groups on an action request
//! become refund payloads charged back against the order's sale transaction.

use serde::Serialize;
use serde_json::{json, Value};
use soc_common::Money;

use crate::cancellations::{cancellation_groups, order_contains_cancellations};
use crate::canonical::OrderActionRequest;
use crate::shopify_order::{LineItem, Refund, ShopifyOrder, Transaction};

pub(crate) const TRANSACTION_TYPE_SALE: &str = "sale";
pub(crate) const RESTOCK_TYPE_RETURN: &str = "return";

/// One refunded line item found on a scanned platform order.
#[derive(Debug, Clone, Serialize)]
pub struct RefundCandidate {
    pub id: i64,
    /// `{refund id}-{refund line id}`, unique per refunded line across the order.
    pub refund_number: String,
    pub partial_refund_compatible: bool,
    pub refund_id: i64,
    pub refund_line_id: i64,
    pub refunds: Vec<Refund>,
    pub order_lines: Vec<LineItem>,
}

/// Extracts refund candidates from a scanned platform order.
///
/// Orders showing any cancellation signal are skipped outright, those flow through the
/// cancellation path instead. Refunds without transactions carry no money and are ignored,
/// and `cancel`-restocked lines belong to cancellations, not refunds. A refund with no line
/// items at all is an order-level refund and fans out to every line on the order.
pub fn refund_candidates(order: &ShopifyOrder) -> Vec<RefundCandidate> {
    if order_contains_cancellations(order) {
        return Vec::new();
    }
    let mut candidates = Vec::new();
    for refund in &order.refunds {
        if refund.transactions.is_empty() {
            continue;
        }
        if refund.refund_line_items.is_empty() {
            for line_item in &order.line_items {
                candidates.push(RefundCandidate {
                    id: refund.id,
                    refund_number: format!("{}-{}", refund.id, line_item.id),
                    partial_refund_compatible: true,
                    refund_id: refund.id,
                    refund_line_id: line_item.id,
                    refunds: order.refunds.clone(),
                    order_lines: order.line_items.clone(),
                });
            }
            continue;
        }
        for refund_line in &refund.refund_line_items {
            if refund_line.restock_type.as_deref() == Some("cancel") {
                continue;
            }
            candidates.push(RefundCandidate {
                id: refund.id,
                refund_number: format!("{}-{}", refund.id, refund_line.id),
                partial_refund_compatible: true,
                refund_id: refund.id,
                refund_line_id: refund_line.id,
                refunds: order.refunds.clone(),
                order_lines: order.line_items.clone(),
            });
        }
    }
    candidates
}

/// A non-fatal finding raised while reconciling an action request against the platform order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationWarning {
    pub index: usize,
    pub message: String,
}

/// The outbound refund payloads for an action request, plus any warnings raised while
/// building them.
#[derive(Debug, Clone, Default)]
pub struct RefundBuild {
    pub requests: Vec<Value>,
    pub warnings: Vec<ReconciliationWarning>,
}

/// Builds one refund payload per cancellation group on the request, charging each line's
/// share back against the order's sale transaction.
///
/// A line's refund amount is its cancelled quantity at unit price, plus the proportional
/// share of its sales tax, minus the proportional share of its discount. When the total
/// requested exceeds what the sale transactions collected, a warning is raised but the
/// payloads are still produced; the platform enforces the hard limit. Orders with more than
/// one sale transaction get a warning too, since the charge-back targets only the first.
pub fn build_refund_requests(
    request: &OrderActionRequest,
    transactions: &[Transaction],
) -> RefundBuild {
    let mut build = RefundBuild::default();

    let sales: Vec<&Transaction> = transactions
        .iter()
        .filter(|transaction| transaction.kind == TRANSACTION_TYPE_SALE)
        .collect();
    if sales.len() > 1 {
        build.warnings.push(ReconciliationWarning {
            index: 0,
            message: "Order with multiple transactions found. Cancellations/refunds may fail.  \
                      Please report to feed support team."
                .to_string(),
        });
    }
    let sale = match sales.first() {
        Some(sale) => *sale,
        None => {
            build.warnings.push(ReconciliationWarning {
                index: 0,
                message: "No sale transaction found on the order".to_string(),
            });
            return build;
        }
    };
    let available: Money = sales.iter().map(|transaction| transaction.amount).sum();

    let groups = cancellation_groups(&request.order_lines);
    let mut requested = Money::default();
    for group in &groups {
        for line in &group.order_lines {
            requested += line_refund_amount(line.quantity_cancelled, line);
        }
    }
    if requested > available {
        build.warnings.push(ReconciliationWarning {
            index: 0,
            message: format!(
                "Too much money has been attempted to be refunded \
                 [transaction_amt:{available}, refund amount:{requested}]"
            ),
        });
    }

    for group in &groups {
        let mut refund_line_items = Vec::new();
        let mut refund_transactions = Vec::new();
        for line in &group.order_lines {
            refund_line_items.push(json!({
                "line_item_id": line.order_line.mp_line_number,
                "quantity": line.quantity_cancelled,
                "restock_type": RESTOCK_TYPE_RETURN,
                "location_id": request.location_id,
            }));
            refund_transactions.push(json!({
                "parent_id": sale.id,
                "amount": line_refund_amount(line.quantity_cancelled, line),
                "kind": "refund",
                "gateway": sale.gateway.clone().unwrap_or_default(),
            }));
        }
        build.requests.push(json!({
            "refund": {
                "currency": request.currency,
                "notify": request.notify_customer,
                "refund_line_items": refund_line_items,
                "transactions": refund_transactions,
            }
        }));
    }
    build
}

fn line_refund_amount(
    quantity_cancelled: i64,
    line: &crate::cancellations::CancellationLine,
) -> Money {
    let order_line = &line.order_line;
    let mut amount = order_line.unit_price * quantity_cancelled;
    if order_line.quantity > 0 {
        amount += order_line.sales_tax.proportion(quantity_cancelled, order_line.quantity);
        amount -=
            order_line.discount.abs().proportion(quantity_cancelled, order_line.quantity);
    }
    amount
}
