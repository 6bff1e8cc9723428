//! Flat-file order aggregation. A placement CSV carries one row per order line (or per
//! shipment/cancellation event against a line); rows sharing an order id fold into one
//! [`CanonicalOrder`]. Row-level problems go into the report; only header-level problems abort
//! the batch.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord};
use log::debug;
use serde::Serialize;
use soc_common::helpers::parse_boolean_flag;
use soc_common::Money;

use crate::canonical::{Cancellation, CancellationReason, CanonicalOrder, Fulfillment, OrderLine};
use crate::error::BatchError;

/// Every column a placement CSV may carry. Anything else in the header row aborts the batch.
pub const PLACEMENT_FIELDS: &[&str] = &[
    "mp_order_number",
    "customer_order_number",
    "replaced_mp_order_number",
    "marketplace_name",
    "marketplace_channel",
    "customer_email",
    "customer_full_name",
    "customer_phone",
    "customer_vat",
    "purchase_date",
    "currency",
    "gift_message",
    "delivery_notes",
    "estimated_ship_date",
    "estimated_delivery_date",
    "shipping_full_name",
    "shipping_address_type",
    "shipping_address1",
    "shipping_address2",
    "shipping_address3",
    "shipping_city",
    "shipping_state",
    "shipping_postal_code",
    "shipping_country_code",
    "shipping_phone",
    "paypal_transaction_ids",
    "is_amazon_prime",
    "is_target_two_day",
    "business_order",
    "marketplace_fulfilled",
    "mp_line_number",
    "sku",
    "product_name",
    "quantity",
    "unit_price",
    "sales_tax",
    "shipping_method",
    "shipping_price",
    "shipping_tax",
    "discount_name",
    "discount",
    "shipping_discount_name",
    "shipping_discount",
    "amount_available_for_refund",
    "quantity_shipped",
    "shipped_date",
    "tracking_number",
    "carrier",
    "invoice_number",
    "tracking_url",
    "quantity_cancelled",
    "cancellation_reason",
];

pub const PLACEMENT_REQUIRED_FIELDS: &[&str] =
    &["mp_order_number", "mp_line_number", "sku", "quantity", "unit_price"];

const SHIPMENT_FIELDS: &[&str] =
    &["quantity_shipped", "shipped_date", "tracking_number", "carrier", "invoice_number", "tracking_url"];

const CANCELLATION_FIELDS: &[&str] = &["quantity_cancelled", "cancellation_reason"];

const REPORT_ERROR_PREFIX: &str = "Order not placed due to validation errors :";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
}

/// One line of the batch result report handed back alongside the aggregated orders.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub mp_order_number: String,
    pub mp_line_number: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct BatchOutput {
    /// Aggregated orders in first-seen order.
    pub orders: Vec<CanonicalOrder>,
    /// Anonymous row errors first, then one aggregated entry per failed order.
    pub report: Vec<ReportEntry>,
}

struct Row<'a> {
    record: &'a StringRecord,
    columns: &'a HashMap<String, usize>,
}

impl Row<'_> {
    fn field(&self, name: &str) -> &str {
        self.columns.get(name).and_then(|&i| self.record.get(i)).unwrap_or("")
    }

    fn flag(&self, name: &str) -> bool {
        let value = self.field(name);
        parse_boolean_flag((!value.is_empty()).then_some(value), false)
    }

    /// Empty cells are zero. A non-empty cell that fails to parse fails the row with the
    /// offending field name.
    fn money(&self, name: &str) -> Result<Money, String> {
        let value = self.field(name);
        if value.is_empty() {
            return Ok(Money::default());
        }
        value.parse().map_err(|_| name.to_string())
    }

    fn integer(&self, name: &str) -> Result<i64, String> {
        let value = self.field(name);
        if value.is_empty() {
            return Ok(0);
        }
        value.parse().map_err(|_| name.to_string())
    }

    fn any_present(&self, names: &[&str]) -> bool {
        names.iter().any(|name| !self.field(name).is_empty())
    }
}

/// Reads a placement CSV and folds its rows into canonical orders.
///
/// An order id that produces any row error is "poisoned": the order is dropped from the output
/// and every later row carrying that id is ignored, so a half-broken order can never place.
pub fn aggregate_orders_from_csv<R: Read>(input: R) -> Result<BatchOutput, BatchError> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(input);
    let header_fields: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let unknown: Vec<&str> = header_fields
        .iter()
        .map(String::as_str)
        .filter(|name| !PLACEMENT_FIELDS.contains(name))
        .collect();
    if !unknown.is_empty() {
        return Err(BatchError::UnknownHeaderFields(unknown.join(",")));
    }
    let missing: Vec<&str> = PLACEMENT_REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|name| !header_fields.iter().any(|h| h == name))
        .collect();
    if !missing.is_empty() {
        return Err(BatchError::MissingHeaderFields(missing.join(",")));
    }

    let columns: HashMap<String, usize> =
        header_fields.iter().enumerate().map(|(i, name)| (name.clone(), i)).collect();
    let order_id_column = columns["mp_order_number"];

    // Orders live in slots so the output keeps first-seen order even when an id is poisoned
    // and later tombstoned.
    let mut slots: Vec<Option<CanonicalOrder>> = Vec::new();
    let mut order_index: HashMap<String, usize> = HashMap::new();
    let mut poisoned: HashSet<String> = HashSet::new();
    let mut order_errors: Vec<(String, Vec<String>)> = Vec::new();
    let mut error_index: HashMap<String, usize> = HashMap::new();
    let mut report: Vec<ReportEntry> = Vec::new();

    fn record_error(
        order_errors: &mut Vec<(String, Vec<String>)>,
        error_index: &mut HashMap<String, usize>,
        order_id: &str,
        message: String,
    ) {
        let slot = *error_index.entry(order_id.to_string()).or_insert_with(|| {
            order_errors.push((order_id.to_string(), Vec::new()));
            order_errors.len() - 1
        });
        order_errors[slot].1.push(message);
    }

    for (row_number, record) in reader.records().enumerate() {
        let record = record?;
        let line_number = row_number + 1;

        if record.len() != header_fields.len() {
            let order_id = record.get(order_id_column).unwrap_or("").to_string();
            record_error(
                &mut order_errors,
                &mut error_index,
                &order_id,
                format!("Line {line_number}: Column count mismatch"),
            );
            if !order_id.is_empty() {
                poisoned.insert(order_id.clone());
                if let Some(&slot) = order_index.get(&order_id) {
                    slots[slot] = None;
                }
            }
            continue;
        }

        let row = Row { record: &record, columns: &columns };
        let order_id = row.field("mp_order_number").to_string();

        if order_id.is_empty() {
            report.push(ReportEntry {
                mp_order_number: String::new(),
                mp_line_number: String::new(),
                severity: Severity::Error,
                message: format!(
                    "{REPORT_ERROR_PREFIX}Line {line_number}: Field mp_order_number cannot be empty. "
                ),
            });
            continue;
        }
        if poisoned.contains(&order_id) {
            continue;
        }

        let mut row_failed = false;
        for required in PLACEMENT_REQUIRED_FIELDS {
            if row.field(required).is_empty() {
                record_error(
                    &mut order_errors,
                    &mut error_index,
                    &order_id,
                    format!("Line {line_number}: Field {required} cannot be empty."),
                );
                poisoned.insert(order_id.clone());
                if let Some(&slot) = order_index.get(&order_id) {
                    slots[slot] = None;
                }
                row_failed = true;
                break;
            }
        }
        if row_failed {
            continue;
        }

        let line = match line_from_row(&row) {
            Ok(line) => line,
            Err(bad_field) => {
                record_error(
                    &mut order_errors,
                    &mut error_index,
                    &order_id,
                    format!("Line {line_number}: Field {bad_field} is not a valid number."),
                );
                poisoned.insert(order_id.clone());
                if let Some(&slot) = order_index.get(&order_id) {
                    slots[slot] = None;
                }
                continue;
            }
        };

        let slot = match order_index.get(&order_id) {
            Some(&slot) => slot,
            None => {
                slots.push(Some(order_from_row(&row)));
                let slot = slots.len() - 1;
                order_index.insert(order_id.clone(), slot);
                slot
            }
        };
        if let Some(order) = slots[slot].as_mut() {
            match order.order_lines.iter_mut().find(|l| l.mp_line_number == line.mp_line_number) {
                Some(existing) => {
                    existing.fulfillments.extend(line.fulfillments);
                    existing.cancellations.extend(line.cancellations);
                }
                None => order.order_lines.push(line),
            }
        }
    }

    for (order_id, messages) in order_errors {
        report.push(ReportEntry {
            mp_order_number: order_id,
            mp_line_number: String::new(),
            severity: Severity::Error,
            message: format!("{REPORT_ERROR_PREFIX}{}", messages.join("")),
        });
    }

    let orders: Vec<CanonicalOrder> = slots.into_iter().flatten().collect();
    debug!("Aggregated {} order(s) from batch, {} report entries", orders.len(), report.len());
    Ok(BatchOutput { orders, report })
}

fn order_from_row(row: &Row) -> CanonicalOrder {
    CanonicalOrder {
        mp_order_number: row.field("mp_order_number").to_string(),
        customer_order_number: row.field("customer_order_number").to_string(),
        replaced_mp_order_number: row.field("replaced_mp_order_number").to_string(),
        marketplace_name: row.field("marketplace_name").to_string(),
        marketplace_channel: row.field("marketplace_channel").to_string(),
        customer_email: row.field("customer_email").to_string(),
        customer_full_name: row.field("customer_full_name").to_string(),
        customer_phone: row.field("customer_phone").to_string(),
        customer_vat: row.field("customer_vat").to_string(),
        purchase_date: row.field("purchase_date").to_string(),
        currency: row.field("currency").to_string(),
        gift_message: row.field("gift_message").to_string(),
        delivery_notes: row.field("delivery_notes").to_string(),
        estimated_ship_date: row.field("estimated_ship_date").to_string(),
        estimated_delivery_date: row.field("estimated_delivery_date").to_string(),
        shipping_full_name: row.field("shipping_full_name").to_string(),
        shipping_address_type: row.field("shipping_address_type").to_string(),
        shipping_address1: row.field("shipping_address1").to_string(),
        shipping_address2: row.field("shipping_address2").to_string(),
        shipping_address3: row.field("shipping_address3").to_string(),
        shipping_city: row.field("shipping_city").to_string(),
        shipping_state: row.field("shipping_state").to_string(),
        shipping_postal_code: row.field("shipping_postal_code").to_string(),
        shipping_country_code: row.field("shipping_country_code").to_string(),
        shipping_phone: row.field("shipping_phone").to_string(),
        is_amazon_prime: row.flag("is_amazon_prime"),
        is_target_two_day: row.flag("is_target_two_day"),
        business_order: row.flag("business_order"),
        marketplace_fulfilled: row.flag("marketplace_fulfilled"),
        ..Default::default()
    }
}

fn line_from_row(row: &Row) -> Result<OrderLine, String> {
    let mut line = OrderLine {
        mp_line_number: row.field("mp_line_number").to_string(),
        sku: row.field("sku").to_string(),
        product_name: row.field("product_name").to_string(),
        quantity: row.integer("quantity")?,
        unit_price: row.money("unit_price")?,
        sales_tax: row.money("sales_tax")?,
        shipping_method: row.field("shipping_method").to_string(),
        shipping_price: row.money("shipping_price")?,
        shipping_tax: row.money("shipping_tax")?,
        discount_name: row.field("discount_name").to_string(),
        discount: row.money("discount")?,
        shipping_discount_name: row.field("shipping_discount_name").to_string(),
        shipping_discount: row.money("shipping_discount")?,
        ..Default::default()
    };
    // Sub-records exist only when the row actually carries data in their columns, so a plain
    // placement row never sprouts an empty shipment.
    if row.any_present(SHIPMENT_FIELDS) {
        line.fulfillments.push(Fulfillment {
            quantity_shipped: row.integer("quantity_shipped")?,
            shipped_date: row.field("shipped_date").to_string(),
            tracking_number: row.field("tracking_number").to_string(),
            carrier: row.field("carrier").to_string(),
            invoice_number: row.field("invoice_number").to_string(),
            tracking_url: row.field("tracking_url").to_string(),
            return_tracking_number: String::new(),
        });
    }
    if row.any_present(CANCELLATION_FIELDS) {
        line.cancellations.push(Cancellation {
            quantity_cancelled: row.integer("quantity_cancelled")?,
            cancellation_reason: CancellationReason::from_str(row.field("cancellation_reason"))
                .unwrap_or_default(),
        });
    }
    Ok(line)
}

#[cfg(test)]
mod test {
    use super::*;

    const HEADER: &str = "mp_order_number,mp_line_number,sku,quantity,unit_price,sales_tax,\
                          quantity_shipped,tracking_number,carrier";

    fn run(csv: &str) -> BatchOutput {
        aggregate_orders_from_csv(csv.as_bytes()).unwrap()
    }

    #[test]
    fn unknown_header_aborts_the_batch() {
        let csv = "mp_order_number,mp_line_number,sku,quantity,unit_price,favourite_colour\n";
        let err = aggregate_orders_from_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, BatchError::UnknownHeaderFields(f) if f == "favourite_colour"));
    }

    #[test]
    fn missing_required_header_aborts_the_batch() {
        let csv = "mp_order_number,mp_line_number,sku,quantity\n";
        let err = aggregate_orders_from_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, BatchError::MissingHeaderFields(f) if f == "unit_price"));
    }

    #[test]
    fn rows_sharing_an_order_id_fold_into_one_order() {
        let csv = format!(
            "{HEADER}\nORD-1,1,SKU-A,2,10.00,1.50,,,\nORD-1,2,SKU-B,1,5.00,,,,\nORD-2,1,SKU-C,1,2.00,,,,\n"
        );
        let output = run(&csv);
        assert!(output.report.is_empty());
        assert_eq!(output.orders.len(), 2);
        let first = &output.orders[0];
        assert_eq!(first.mp_order_number, "ORD-1");
        assert_eq!(first.order_lines.len(), 2);
        assert_eq!(first.order_lines[0].unit_price, Money::from_cents(1000));
        assert_eq!(first.order_lines[0].sales_tax, Money::from_cents(150));
        assert!(first.order_lines[0].fulfillments.is_empty());
        assert_eq!(output.orders[1].mp_order_number, "ORD-2");
    }

    #[test]
    fn repeated_line_numbers_merge_shipment_records() {
        let csv = format!(
            "{HEADER}\nORD-1,1,SKU-A,2,10.00,,1,TRACK-1,UPS\nORD-1,1,SKU-A,2,10.00,,1,TRACK-2,UPS\n"
        );
        let output = run(&csv);
        assert_eq!(output.orders.len(), 1);
        let line = &output.orders[0].order_lines[0];
        assert_eq!(line.fulfillments.len(), 2);
        assert_eq!(line.fulfillments[0].tracking_number, "TRACK-1");
        assert_eq!(line.fulfillments[1].tracking_number, "TRACK-2");
        assert_eq!(line.fulfillments[1].quantity_shipped, 1);
    }

    #[test]
    fn missing_required_field_poisons_the_order() {
        let csv = format!(
            "{HEADER}\nORD-1,1,SKU-A,2,,,,,\nORD-1,2,SKU-B,1,5.00,,,,\nORD-2,1,SKU-C,1,2.00,,,,\n"
        );
        let output = run(&csv);
        assert_eq!(output.orders.len(), 1);
        assert_eq!(output.orders[0].mp_order_number, "ORD-2");
        assert_eq!(output.report.len(), 1);
        let entry = &output.report[0];
        assert_eq!(entry.mp_order_number, "ORD-1");
        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(
            entry.message,
            "Order not placed due to validation errors :Line 1: Field unit_price cannot be empty."
        );
    }

    #[test]
    fn poisoned_id_excludes_earlier_and_later_rows() {
        let csv = format!(
            "{HEADER}\nORD-1,1,SKU-A,1,3.00,,,,\nORD-1,2,,1,3.00,,,,\nORD-1,3,SKU-C,1,3.00,,,,\n"
        );
        let output = run(&csv);
        assert!(output.orders.is_empty());
        assert_eq!(output.report.len(), 1);
        assert!(output.report[0].message.contains("Line 2: Field sku cannot be empty."));
    }

    #[test]
    fn empty_order_id_reports_anonymously() {
        let csv = format!("{HEADER}\n,1,SKU-A,1,3.00,,,,\nORD-1,1,SKU-A,1,3.00,,,,\n");
        let output = run(&csv);
        assert_eq!(output.orders.len(), 1);
        assert_eq!(output.report.len(), 1);
        assert_eq!(output.report[0].mp_order_number, "");
        assert_eq!(
            output.report[0].message,
            "Order not placed due to validation errors :Line 1: Field mp_order_number cannot be empty. "
        );
    }

    #[test]
    fn column_count_mismatch_poisons_the_row_order() {
        let csv = format!("{HEADER}\nORD-1,1,SKU-A,1,3.00\nORD-1,2,SKU-B,1,3.00,,,,\n");
        let output = run(&csv);
        assert!(output.orders.is_empty());
        assert_eq!(output.report.len(), 1);
        assert!(output.report[0].message.contains("Line 1: Column count mismatch"));
    }

    #[test]
    fn non_numeric_amount_poisons_the_order() {
        let csv = format!("{HEADER}\nORD-1,1,SKU-A,two,3.00,,,,\n");
        let output = run(&csv);
        assert!(output.orders.is_empty());
        assert!(output.report[0].message.contains("Field quantity is not a valid number."));
    }
}
