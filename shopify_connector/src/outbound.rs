//! Builds the order-placement payload sent to the platform from a canonical order plus the
//! per-store switch set in [`PlaceOrderConfig`].

use serde_json::{json, Map, Value};
use soc_common::Money;

use crate::canonical::{CanonicalOrder, OrderLine};
use crate::config::{PlaceOrderConfig, SourceNameFormat, MARKETPLACE_FULFILL_PLACEHOLDER};
use crate::helpers::{
    convert_country_code_to_iso2, convert_usa_state_to_2_chars, format_phone_number, round_rate,
};

/// Translates a canonical order into the platform's `{"order": {...}}` placement shape.
///
/// Monetary amounts are emitted as 2-decimal strings, tax rates as bare numbers, matching what
/// the platform hands back on reads. The currency fallback applies only to zero-total orders
/// with no currency of their own; a priced order's explicit currency is never overridden.
pub fn build_place_order_payload(order: &CanonicalOrder, config: &PlaceOrderConfig) -> Value {
    let mut customer_email = order.customer_email.clone();
    if customer_email.is_empty() {
        let filtered_name: String =
            order.shipping_full_name.chars().filter(|c| c.is_ascii_alphabetic()).collect();
        customer_email = format!("{filtered_name}_{}", config.dummy_customer_email);
    }

    let marketing_opt_in = order.marketing_opt_in.unwrap_or(false);
    let mut customer_phone = format_phone_number(&order.customer_phone);
    let mut shipping_phone = order.shipping_phone.clone();
    let marketplace_fulfilled = order.marketplace_fulfilled;

    let mut note = format!(
        "Marketplace: {}\nOrder Number: {}",
        order.marketplace_name, order.mp_order_number
    );
    let mut note_attributes: Vec<(String, String)> = vec![
        ("Marketplace".to_string(), order.marketplace_name.clone()),
        ("Order Number".to_string(), order.mp_order_number.clone()),
    ];

    if order.is_amazon_prime {
        note.push_str("\nAmazon Prime: True");
        note_attributes.push(("Amazon Prime".to_string(), "True".to_string()));
    }
    if config.add_customer_order_number_to_notes || config.use_note_attributes {
        note.push_str(&format!("\nCustomer Order Number: {}", order.customer_order_number));
        if !order.customer_order_number.is_empty() || config.add_empty_info {
            note_attributes
                .push(("Customer Order Number".to_string(), order.customer_order_number.clone()));
        }
    }
    if config.add_delivery_notes_to_notes || config.use_note_attributes {
        note.push_str(&format!("\nDelivery Notes: {}", order.delivery_notes));
        if !order.delivery_notes.is_empty() || config.add_empty_info {
            note_attributes.push(("Delivery Notes".to_string(), order.delivery_notes.clone()));
        }
    }
    if config.include_marketplace_promo_note || config.use_note_attributes {
        let promo = format!(
            "{} ${}",
            order.marketplace_promotion_name, order.marketplace_promotion_amount
        );
        note.push_str(&format!("\nMarketplace Sponsored Discount: {promo}"));
        if !order.marketplace_promotion_amount.is_zero() || config.add_empty_info {
            note_attributes.push(("Marketplace Sponsored Discount".to_string(), promo));
        }
    }

    let source_name = match config.source_name_format {
        SourceNameFormat::MarketplaceName => order.marketplace_name.clone(),
        SourceNameFormat::MarketplaceOrderNumber => order.mp_order_number.clone(),
        SourceNameFormat::MarketplaceNameAndOrderNumber => {
            format!("{} {}", order.marketplace_name, order.mp_order_number)
        }
    };

    // Marketplace-fulfilled orders must never trigger real shipping or customer contact, so
    // the identity fields are blanked or replaced with the fixed placeholder.
    let shipping_address2;
    if marketplace_fulfilled {
        note.push_str(&format!("\n{MARKETPLACE_FULFILL_PLACEHOLDER}"));
        note_attributes.push((
            "Marketplace Fulfilled".to_string(),
            MARKETPLACE_FULFILL_PLACEHOLDER.to_string(),
        ));
        shipping_address2 = String::new();
        customer_phone = String::new();
        shipping_phone = String::new();
        customer_email = format!("MARKETPLACE_FULFILLED_{}", config.dummy_customer_email);
    } else {
        shipping_address2 = if order.shipping_address3.is_empty() {
            order.shipping_address2.clone()
        } else {
            format!("{}, {}", order.shipping_address2, order.shipping_address3)
        };
    }

    let mut currency = order.currency.clone();

    let mut line_items: Vec<Value> = Vec::new();
    let mut shipping_lines: Vec<Value> = Vec::new();

    let mut total_tax = Money::default();
    let mut total_amount = Money::default();
    let mut total_shipping_cost = Money::default();
    let mut total_shipping_tax = Money::default();
    let mut total_discounts = Money::default();
    let mut total_shipping_discounts = Money::default();
    let mut discount_names: Vec<String> = Vec::new();
    let mut shipping_discount_names: Vec<String> = Vec::new();
    let mut customization_info = String::new();

    for line in &order.order_lines {
        let taxable = line.sales_tax > Money::default();
        total_amount += line.unit_price * line.quantity;
        total_amount += line.sales_tax;

        let mut line_item = Map::new();
        line_item.insert("price".to_string(), json!(line.unit_price));
        line_item.insert("requires_shipping".to_string(), json!(!marketplace_fulfilled));
        line_item.insert("quantity".to_string(), json!(line.quantity));
        line_item.insert("variant_id".to_string(), json!(line.sku));
        line_item.insert("taxable".to_string(), json!(taxable));
        if marketplace_fulfilled {
            line_item.insert("fulfillment_status".to_string(), json!("fulfilled"));
        }
        if config.use_mp_product_name {
            line_item.insert("title".to_string(), json!(line.product_name));
        }

        if has_additional_properties(line) {
            if customization_info.is_empty() {
                customization_info.push_str("Customization Info:\n");
            }
            customization_info.push_str(&customization_info_for_line(line));
        }

        if taxable {
            let rate = if line.unit_price > Money::default() && line.quantity > 0 {
                round_rate(
                    line.sales_tax.to_f64() / line.quantity as f64 / line.unit_price.to_f64(),
                )
            } else {
                0.0
            };
            line_item.insert(
                "tax_lines".to_string(),
                json!([{"price": line.sales_tax, "title": "Sales Tax", "rate": rate}]),
            );
            total_tax += line.sales_tax;
        }
        line_items.push(Value::Object(line_item));

        let shipping_method = config
            .shipping_method_map
            .get(&line.shipping_method)
            .cloned()
            .unwrap_or_else(|| line.shipping_method.clone());

        let shipping_taxable = line.shipping_tax > Money::default();
        let mut shipping_price = line.shipping_price;
        total_amount += line.shipping_price;
        total_amount += line.shipping_tax;

        if !line.discount.is_zero() {
            let discount = line.discount.abs();
            total_amount -= discount;
            total_discounts += discount;
            let name = if line.discount_name.is_empty() {
                "discount".to_string()
            } else {
                line.discount_name.clone()
            };
            if !discount_names.contains(&name) {
                discount_names.push(name);
            }
        }
        if !line.shipping_discount.is_zero() {
            let shipping_discount = line.shipping_discount.abs();
            total_amount -= shipping_discount;
            total_shipping_discounts += shipping_discount;
            let name = if line.shipping_discount_name.is_empty() {
                "shipping_discount".to_string()
            } else {
                line.shipping_discount_name.clone()
            };
            if !shipping_discount_names.contains(&name) {
                shipping_discount_names.push(name);
            }
            if config.deduct_shipping_discount_from_shipping_price {
                shipping_price -= shipping_discount;
            }
        }
        total_shipping_cost += shipping_price;

        let mut shipping_line = Map::new();
        shipping_line.insert("code".to_string(), json!(shipping_method));
        shipping_line.insert("price".to_string(), json!(shipping_price));
        shipping_line.insert("title".to_string(), json!(shipping_method));
        if shipping_taxable {
            let rate = if shipping_price > Money::default() {
                round_rate(line.shipping_tax.to_f64() / shipping_price.to_f64())
            } else {
                0.0
            };
            shipping_line.insert(
                "tax_lines".to_string(),
                json!([{"price": line.shipping_tax, "title": "Sales Tax", "rate": rate}]),
            );
            total_shipping_tax += line.shipping_tax;
            total_tax += line.shipping_tax;
        }
        shipping_lines.push(Value::Object(shipping_line));
    }

    if config.include_order_line_additional_properties {
        if config.use_note_attributes && (config.add_empty_info || !customization_info.is_empty())
        {
            note_attributes.push(("customization".to_string(), customization_info.clone()));
        } else if !config.use_note_attributes && !customization_info.is_empty() {
            if !note.is_empty() {
                note.push('\n');
            }
            note.push_str(&customization_info);
        }
    }

    if !config.deduct_shipping_discount_from_shipping_price {
        total_discounts += total_shipping_discounts;
        for name in shipping_discount_names {
            if !discount_names.contains(&name) {
                discount_names.push(name);
            }
        }
    }

    if config.aggregate_shipping_lines && !shipping_lines.is_empty() {
        aggregate_shipping(
            &mut line_items,
            &mut shipping_lines,
            total_amount,
            total_tax,
            total_shipping_cost,
            total_shipping_tax,
        );
    }

    let mut payload = Map::new();
    payload.insert("email".to_string(), json!(customer_email));
    payload.insert("buyer_accepts_marketing".to_string(), json!(marketing_opt_in));
    payload.insert("phone".to_string(), json!(customer_phone));
    payload.insert(
        "shipping_address".to_string(),
        json!({
            "address1": if marketplace_fulfilled { MARKETPLACE_FULFILL_PLACEHOLDER } else { order.shipping_address1.as_str() },
            "address2": shipping_address2,
            "city": if marketplace_fulfilled { "" } else { order.shipping_city.as_str() },
            "phone": shipping_phone,
            "zip": order.shipping_postal_code,
            "province_code": convert_usa_state_to_2_chars(&order.shipping_state),
            "country_code": convert_country_code_to_iso2(&order.shipping_country_code),
            "name": if marketplace_fulfilled { MARKETPLACE_FULFILL_PLACEHOLDER } else { order.shipping_full_name.as_str() },
        }),
    );
    payload.insert("source_name".to_string(), json!(source_name));
    // These three stop the platform from sending its own customer notifications.
    payload.insert("send_receipt".to_string(), json!(false));
    payload.insert("send_fulfillment_receipt".to_string(), json!(false));
    payload.insert("suppress_notifications".to_string(), json!(true));

    if config.use_note_attributes {
        payload.insert("note".to_string(), json!(""));
        let attributes: Vec<Value> = note_attributes
            .into_iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();
        payload.insert("note_attributes".to_string(), Value::Array(attributes));
    } else {
        payload.insert("note".to_string(), json!(note));
    }

    if billing_info_complete(order) {
        let mut billing = Map::new();
        billing.insert(
            "address1".to_string(),
            json!(if marketplace_fulfilled {
                MARKETPLACE_FULFILL_PLACEHOLDER
            } else {
                order.billing_address1.as_str()
            }),
        );
        billing.insert(
            "city".to_string(),
            json!(if marketplace_fulfilled { "" } else { order.billing_city.as_str() }),
        );
        billing.insert("phone".to_string(), json!(order.billing_phone));
        billing.insert("zip".to_string(), json!(order.billing_postal_code));
        billing.insert(
            "province_code".to_string(),
            json!(convert_usa_state_to_2_chars(&order.billing_state)),
        );
        billing.insert(
            "country_code".to_string(),
            json!(convert_country_code_to_iso2(&order.billing_country_code)),
        );
        billing.insert(
            "name".to_string(),
            json!(if marketplace_fulfilled {
                MARKETPLACE_FULFILL_PLACEHOLDER
            } else {
                order.billing_full_name.as_str()
            }),
        );
        if !marketplace_fulfilled {
            let billing_address2 = if !order.billing_address2.is_empty()
                && !order.billing_address3.is_empty()
            {
                format!("{}, {}", order.billing_address2, order.billing_address3)
            } else {
                order.billing_address2.clone()
            };
            if !billing_address2.is_empty() {
                billing.insert("address2".to_string(), json!(billing_address2));
            }
        }
        payload.insert("billing_address".to_string(), Value::Object(billing));
    }

    if !order.order_tags.is_empty() {
        payload.insert("tags".to_string(), json!(order.order_tags));
    }
    if !order.customer_tags.is_empty() {
        payload.insert("customer".to_string(), json!({"tags": order.customer_tags}));
    }

    if total_discounts >= Money::from_cents(1) {
        let mut code = discount_names.join(", ");
        code.truncate(255);
        payload.insert(
            "discount_codes".to_string(),
            json!([{"amount": total_discounts, "code": code}]),
        );
    }

    payload.insert("line_items".to_string(), Value::Array(line_items));
    payload.insert("shipping_lines".to_string(), Value::Array(shipping_lines));
    payload.insert("total_tax".to_string(), json!(total_tax.to_string()));

    // The platform rejects transactions with a 0.00 amount.
    if config.transactions && !total_amount.is_zero() {
        payload.insert(
            "transactions".to_string(),
            json!([{
                "amount": total_amount,
                "kind": "sale",
                "status": "success",
                "currency": order.currency,
                "gateway": config.transaction_gateway,
            }]),
        );
    }

    // Some marketplaces omit the currency on zero-total orders. A non-zero total with no
    // currency is bad data and is passed through untouched for the platform to reject.
    if total_amount.is_zero() && currency.is_empty() {
        currency = config.default_currency.clone();
    }
    payload.insert("currency".to_string(), json!(currency));

    payload.insert(
        "inventory_behaviour".to_string(),
        json!(if marketplace_fulfilled { "bypass" } else { "decrement_obeying_policy" }),
    );

    json!({ "order": Value::Object(payload) })
}

fn billing_info_complete(order: &CanonicalOrder) -> bool {
    !(order.billing_full_name.is_empty()
        || order.billing_address1.is_empty()
        || order.billing_city.is_empty()
        || order.billing_state.is_empty()
        || order.billing_postal_code.is_empty()
        || order.billing_country_code.is_empty())
}

fn has_additional_properties(line: &OrderLine) -> bool {
    match &line.order_line_additional_properties {
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// Renders a line's additional properties block: the sku header, then one entry per property.
/// String values holding JSON objects are unpacked one level deep; scalars print inline.
fn customization_info_for_line(line: &OrderLine) -> String {
    let mut info = format!("{}:\n", line.sku);
    let props: Vec<(String, Value)> = match &line.order_line_additional_properties {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Some(Value::Array(items)) => {
            items.iter().enumerate().map(|(i, v)| (i.to_string(), v.clone())).collect()
        }
        _ => Vec::new(),
    };
    for (key, value) in props {
        info.push_str(&format!(" {key}: "));
        let nested = match &value {
            Value::String(s) => serde_json::from_str::<Value>(s)
                .ok()
                .filter(|v| v.is_object() || v.is_array()),
            Value::Object(_) | Value::Array(_) => Some(value.clone()),
            _ => None,
        };
        let Some(data) = nested else {
            info.push_str(&scalar_text(&value));
            info.push('\n');
            continue;
        };
        let entries: Vec<(String, Value)> = match data {
            Value::Object(map) => map.into_iter().collect(),
            Value::Array(items) => {
                items.into_iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect()
            }
            _ => Vec::new(),
        };
        for (sub_key, sub_value) in entries {
            info.push_str(&format!("\n  {sub_key}: "));
            info.push_str(&scalar_text(&sub_value));
            info.push('\n');
        }
    }
    info.push('\n');
    info
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Collapses the per-line shipping lines into one consolidated line and, where each line's tax
/// rate is within 0.01 of the blended rate, snaps the line rates onto it. Lines whose rate
/// genuinely differs stay distinct.
fn aggregate_shipping(
    line_items: &mut [Value],
    shipping_lines: &mut Vec<Value>,
    total_amount: Money,
    total_tax: Money,
    total_shipping_cost: Money,
    total_shipping_tax: Money,
) {
    let code = shipping_lines[0].get("code").cloned().unwrap_or(Value::Null);
    let title = shipping_lines[0].get("title").cloned().unwrap_or(Value::Null);
    let mut aggregate = Map::new();
    aggregate.insert("code".to_string(), code);
    aggregate.insert("price".to_string(), json!(total_shipping_cost));
    aggregate.insert("title".to_string(), title);

    if total_tax > Money::default() {
        let goods_amount = total_amount - total_shipping_cost - total_tax;
        let goods_tax = total_tax - total_shipping_tax;
        let sales_tax_rate = if goods_amount > Money::default() {
            round_rate(goods_tax.to_f64() / goods_amount.to_f64())
        } else {
            0.0
        };

        if !total_shipping_tax.is_zero() {
            let shipping_tax_rate = if total_shipping_cost > Money::default() {
                round_rate(total_shipping_tax.to_f64() / total_shipping_cost.to_f64())
            } else {
                0.0
            };
            let rate = if (shipping_tax_rate - sales_tax_rate).abs() < 0.01 {
                sales_tax_rate
            } else {
                shipping_tax_rate
            };
            aggregate.insert(
                "tax_lines".to_string(),
                json!([{"price": total_shipping_tax, "title": "Sales Tax", "rate": rate}]),
            );
        }

        for line_item in line_items.iter_mut() {
            let Some(tax_line) = line_item
                .get_mut("tax_lines")
                .and_then(Value::as_array_mut)
                .and_then(|lines| lines.first_mut())
                .and_then(Value::as_object_mut)
            else {
                continue;
            };
            let line_rate = tax_line.get("rate").and_then(Value::as_f64).unwrap_or(0.0);
            if (line_rate - sales_tax_rate).abs() < 0.01 {
                tax_line.insert("rate".to_string(), json!(sales_tax_rate));
            }
        }
    }

    shipping_lines.clear();
    shipping_lines.push(Value::Object(aggregate));
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::canonical::OrderLine;
    use std::str::FromStr;

    fn money(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn base_order() -> CanonicalOrder {
        CanonicalOrder {
            mp_order_number: "MP-100".to_string(),
            marketplace_name: "BigBox".to_string(),
            customer_email: "buyer@example.com".to_string(),
            currency: "USD".to_string(),
            shipping_full_name: "Jo Smith".to_string(),
            shipping_address1: "1 Main St".to_string(),
            shipping_city: "Austin".to_string(),
            shipping_state: "Texas".to_string(),
            shipping_postal_code: "78701".to_string(),
            shipping_country_code: "USA".to_string(),
            order_lines: vec![OrderLine {
                mp_line_number: "1".to_string(),
                sku: "41935699247288".to_string(),
                product_name: "Widget".to_string(),
                quantity: 2,
                unit_price: money("10.00"),
                sales_tax: money("1.60"),
                shipping_method: "Ground".to_string(),
                shipping_price: money("5.00"),
                shipping_tax: money("0.40"),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn builds_lines_totals_and_address() {
        let payload = build_place_order_payload(&base_order(), &PlaceOrderConfig::default());
        let order = &payload["order"];
        assert_eq!(order["currency"], "USD");
        assert_eq!(order["email"], "buyer@example.com");
        assert_eq!(order["source_name"], "BigBox MP-100");
        assert_eq!(order["shipping_address"]["province_code"], "TX");
        assert_eq!(order["shipping_address"]["country_code"], "US");
        assert_eq!(order["total_tax"], "2.00");
        assert_eq!(order["inventory_behaviour"], "decrement_obeying_policy");
        assert_eq!(order["send_receipt"], false);
        assert_eq!(order["suppress_notifications"], true);

        let line = &order["line_items"][0];
        assert_eq!(line["price"], "10.00");
        assert_eq!(line["quantity"], 2);
        assert_eq!(line["variant_id"], "41935699247288");
        assert_eq!(line["title"], "Widget");
        assert_eq!(line["taxable"], true);
        // 1.60 tax over 2 units at 10.00 = 0.08/unit
        assert_eq!(line["tax_lines"][0]["rate"], 0.08);

        let shipping = &order["shipping_lines"][0];
        assert_eq!(shipping["code"], "Ground");
        assert_eq!(shipping["price"], "5.00");
        assert_eq!(shipping["tax_lines"][0]["price"], "0.40");

        assert!(order.get("transactions").is_none());
        assert!(order.get("billing_address").is_none());
        assert!(order.get("discount_codes").is_none());
    }

    #[test]
    fn dummy_email_is_synthesized_from_shipping_name() {
        let mut order = base_order();
        order.customer_email.clear();
        let payload = build_place_order_payload(&order, &PlaceOrderConfig::default());
        assert_eq!(payload["order"]["email"], "JoSmith_dummy_customer_override@example.com");
    }

    #[test]
    fn marketplace_fulfilled_blanks_identity_and_bypasses_inventory() {
        let mut order = base_order();
        order.marketplace_fulfilled = true;
        order.customer_phone = "555-867-5309".to_string();
        let payload = build_place_order_payload(&order, &PlaceOrderConfig::default());
        let out = &payload["order"];
        assert_eq!(out["phone"], "");
        assert_eq!(out["email"], "MARKETPLACE_FULFILLED_dummy_customer_override@example.com");
        assert_eq!(out["shipping_address"]["address1"], MARKETPLACE_FULFILL_PLACEHOLDER);
        assert_eq!(out["shipping_address"]["name"], MARKETPLACE_FULFILL_PLACEHOLDER);
        assert_eq!(out["shipping_address"]["city"], "");
        assert_eq!(out["inventory_behaviour"], "bypass");
        let line = &out["line_items"][0];
        assert_eq!(line["requires_shipping"], false);
        assert_eq!(line["fulfillment_status"], "fulfilled");
        let note = out["note"].as_str().unwrap();
        assert!(note.contains(MARKETPLACE_FULFILL_PLACEHOLDER));
    }

    #[test]
    fn default_currency_applies_only_to_zero_total_orders() {
        let mut order = base_order();
        order.currency.clear();
        let payload = build_place_order_payload(&order, &PlaceOrderConfig::default());
        // non-zero total: bad data passes through
        assert_eq!(payload["order"]["currency"], "");

        order.order_lines.clear();
        let payload = build_place_order_payload(&order, &PlaceOrderConfig::default());
        assert_eq!(payload["order"]["currency"], "USD");
    }

    #[test]
    fn transactions_emitted_except_at_zero_total() {
        let config = PlaceOrderConfig {
            transactions: true,
            transaction_gateway: "marketplace".to_string(),
            ..Default::default()
        };
        let order = base_order();
        let payload = build_place_order_payload(&order, &config);
        let tx = &payload["order"]["transactions"][0];
        // 2x10.00 + 1.60 + 5.00 + 0.40
        assert_eq!(tx["amount"], "27.00");
        assert_eq!(tx["kind"], "sale");
        assert_eq!(tx["status"], "success");
        assert_eq!(tx["gateway"], "marketplace");

        let mut zero = base_order();
        zero.order_lines.clear();
        let payload = build_place_order_payload(&zero, &config);
        assert!(payload["order"].get("transactions").is_none());
    }

    #[test]
    fn discounts_fold_into_a_single_discount_code() {
        let mut order = base_order();
        order.order_lines[0].discount = money("-2.00");
        order.order_lines[0].discount_name = "PROMO".to_string();
        order.order_lines[0].shipping_discount = money("1.00");
        let payload = build_place_order_payload(&order, &PlaceOrderConfig::default());
        let code = &payload["order"]["discount_codes"][0];
        assert_eq!(code["amount"], "3.00");
        assert_eq!(code["code"], "PROMO, shipping_discount");
        // amounts subtract from the order total
        assert_eq!(payload["order"]["transactions"], Value::Null);
    }

    #[test]
    fn deduct_switch_moves_shipping_discount_into_shipping_price() {
        let mut order = base_order();
        order.order_lines[0].shipping_discount = money("1.00");
        let config = PlaceOrderConfig {
            deduct_shipping_discount_from_shipping_price: true,
            ..Default::default()
        };
        let payload = build_place_order_payload(&order, &config);
        assert_eq!(payload["order"]["shipping_lines"][0]["price"], "4.00");
        assert!(payload["order"].get("discount_codes").is_none());
    }

    #[test]
    fn note_attributes_mode_empties_the_note() {
        let config = PlaceOrderConfig { use_note_attributes: true, ..Default::default() };
        let payload = build_place_order_payload(&base_order(), &config);
        let out = &payload["order"];
        assert_eq!(out["note"], "");
        let attrs = out["note_attributes"].as_array().unwrap();
        assert_eq!(attrs[0]["name"], "Marketplace");
        assert_eq!(attrs[0]["value"], "BigBox");
        assert_eq!(attrs[1]["name"], "Order Number");
        assert_eq!(attrs[1]["value"], "MP-100");
    }

    #[test]
    fn aggregation_blends_shipping_lines_and_snaps_matching_rates() {
        let mut order = base_order();
        order.order_lines.push(OrderLine {
            mp_line_number: "2".to_string(),
            sku: "SKU-B".to_string(),
            product_name: "Gadget".to_string(),
            quantity: 1,
            unit_price: money("10.00"),
            sales_tax: money("0.80"),
            shipping_method: "Ground".to_string(),
            shipping_price: money("5.00"),
            shipping_tax: money("0.40"),
            ..Default::default()
        });
        let config = PlaceOrderConfig { aggregate_shipping_lines: true, ..Default::default() };
        let payload = build_place_order_payload(&order, &config);
        let shipping = payload["order"]["shipping_lines"].as_array().unwrap();
        assert_eq!(shipping.len(), 1);
        assert_eq!(shipping[0]["price"], "10.00");
        // goods 30.00, goods tax 2.40 -> 0.08; shipping 10.00, tax 0.80 -> 0.08
        assert_eq!(shipping[0]["tax_lines"][0]["rate"], 0.08);
        for line in payload["order"]["line_items"].as_array().unwrap() {
            assert_eq!(line["tax_lines"][0]["rate"], 0.08);
        }
        assert_eq!(payload["order"]["total_tax"], "3.20");
    }

    #[test]
    fn customization_info_lands_in_the_note() {
        let mut order = base_order();
        order.order_lines[0].order_line_additional_properties =
            Some(json!({"engraving": "MOM", "wrap": true}));
        let config = PlaceOrderConfig {
            include_order_line_additional_properties: true,
            ..Default::default()
        };
        let payload = build_place_order_payload(&order, &config);
        let note = payload["order"]["note"].as_str().unwrap();
        assert!(note.contains("Customization Info:"));
        assert!(note.contains("41935699247288:"));
        assert!(note.contains(" engraving: MOM"));
        assert!(note.contains(" wrap: true"));
    }
}
