//! Fulfillment reconciliation: folds platform fulfillment events into a per-line ledger, and
//! groups canonical fulfillment records into shipments for the outbound fulfill call.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::canonical::{Fulfillment, OrderLine};
use crate::shopify_order::ShopifyOrder;

/// Fulfillment statuses that count towards a line's shipped total. Everything else
/// (cancelled, error, failure) is ignored entirely.
pub const READY_FULFILLMENT_STATUSES: &[&str] = &["success", "pending", "open"];

const RETURN_TRACKING_MAP_ATTRIBUTE: &str = "fdx_return_tracking_number_map";
const RETURN_TRACKING_LIST_ATTRIBUTE: &str = "fdx_return_tracking_number_list";

/// The shipment history of one platform line item.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LineFulfillments {
    pub fulfillments: Vec<Fulfillment>,
    pub total_fulfilled: i64,
}

/// Builds the per-line fulfillment ledger for a platform order. Only "ready"-status
/// fulfillments contribute; `total_fulfilled` is the sum of their shipped quantities.
pub fn fulfillment_ledger(order: &ShopifyOrder) -> BTreeMap<i64, LineFulfillments> {
    let return_tracking = tracking_to_return_tracking_map(order);
    let mut ledger: BTreeMap<i64, LineFulfillments> = BTreeMap::new();

    for fulfillment in &order.fulfillments {
        if !READY_FULFILLMENT_STATUSES.contains(&fulfillment.status.as_str()) {
            continue;
        }
        let tracking_number = fulfillment.tracking_number.clone().unwrap_or_default();
        for line_item in &fulfillment.line_items {
            let entry = ledger.entry(line_item.id).or_default();
            entry.fulfillments.push(Fulfillment {
                quantity_shipped: line_item.quantity,
                shipped_date: fulfillment.created_at.clone(),
                tracking_number: tracking_number.clone(),
                carrier: fulfillment.tracking_company.clone().unwrap_or_default(),
                invoice_number: String::new(),
                tracking_url: fulfillment.tracking_url.clone().unwrap_or_default(),
                return_tracking_number: return_tracking
                    .iter()
                    .find(|(tracking, _)| *tracking == tracking_number)
                    .map(|(_, return_tracking)| return_tracking.clone())
                    .unwrap_or_default(),
            });
            entry.total_fulfilled += line_item.quantity;
        }
    }
    ledger
}

/// Resolves return-tracking numbers for each tracking number on the order.
///
/// Two legacy metadata encodings exist. The structured map (JSON pairs of tracking number and
/// return tracking number) takes precedence when present; otherwise a positional
/// comma-delimited list is aligned against tracking numbers in first-seen order. The first
/// non-empty value per tracking number wins; unmatched numbers stay empty.
fn tracking_to_return_tracking_map(order: &ShopifyOrder) -> Vec<(String, String)> {
    let mut map: Vec<(String, String)> = Vec::new();
    for fulfillment in &order.fulfillments {
        let tracking = fulfillment.tracking_number.clone().unwrap_or_default();
        if !map.iter().any(|(t, _)| *t == tracking) {
            map.push((tracking, String::new()));
        }
    }

    let attribute_value = |name: &str| -> Option<String> {
        order
            .note_attributes
            .iter()
            .find(|attribute| attribute.name == name)
            .map(|attribute| attribute.value_str())
    };

    if let Some(raw) = attribute_value(RETURN_TRACKING_MAP_ATTRIBUTE) {
        #[derive(serde::Deserialize)]
        struct Pair {
            #[serde(default)]
            tracking_number: String,
            #[serde(default)]
            return_tracking_number: String,
        }
        let pairs: Vec<Pair> = serde_json::from_str(&raw).unwrap_or_default();
        for pair in pairs {
            if let Some(entry) =
                map.iter_mut().find(|(t, v)| *t == pair.tracking_number && v.is_empty())
            {
                entry.1 = pair.return_tracking_number;
            }
        }
    } else if let Some(raw) = attribute_value(RETURN_TRACKING_LIST_ATTRIBUTE) {
        for (index, return_tracking) in raw.split(',').enumerate() {
            if let Some(entry) = map.get_mut(index) {
                if entry.1.is_empty() {
                    entry.1 = return_tracking.to_string();
                }
            }
        }
    }
    map
}

/// One outbound shipment: the shared tracking record plus the lines and quantities it covers.
#[derive(Debug, Clone)]
pub struct ShipmentGroup {
    pub fulfillment: Fulfillment,
    pub order_lines: Vec<ShipmentLine>,
}

#[derive(Debug, Clone)]
pub struct ShipmentLine {
    pub quantity_shipped: i64,
    pub order_line: OrderLine,
}

/// Groups canonical fulfillment records across lines by carrier + tracking number, in
/// first-seen order. The group-level record keeps the tracking fields of the latest record
/// seen for the shipment; per-line quantities live on the group's lines.
pub fn shipment_groups(order_lines: &[OrderLine]) -> Vec<ShipmentGroup> {
    let mut groups: Vec<(String, ShipmentGroup)> = Vec::new();
    for order_line in order_lines {
        for fulfillment in &order_line.fulfillments {
            let shipment_id = format!("{}{}", fulfillment.carrier, fulfillment.tracking_number);
            let mut record = fulfillment.clone();
            record.quantity_shipped = 0;
            let line = ShipmentLine {
                quantity_shipped: fulfillment.quantity_shipped,
                order_line: order_line.clone(),
            };
            match groups.iter_mut().find(|(id, _)| *id == shipment_id) {
                Some((_, group)) => {
                    group.fulfillment = record;
                    group.order_lines.push(line);
                }
                None => {
                    groups
                        .push((shipment_id, ShipmentGroup { fulfillment: record, order_lines: vec![line] }));
                }
            }
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}
