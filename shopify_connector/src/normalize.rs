//! Inbound direction: turns a platform order record into a [`CanonicalOrder`]. Order-level
//! shipping price and tax are split penny-fairly across the lines, and discount allocations are
//! resolved back to human-readable names through the order's discount applications.

use soc_common::Money;

use crate::canonical::{CanonicalOrder, OrderLine};
use crate::helpers::{convert_country_code_to_iso3, convert_date_to_utc_iso_8601};
use crate::shopify_order::{PaymentDetails, ShopifyOrder};

pub fn normalize_order(order: &ShopifyOrder) -> CanonicalOrder {
    let line_count = order.line_items.len();

    let shipping_tax_total: Money = order
        .shipping_lines
        .iter()
        .flat_map(|line| line.tax_lines.iter())
        .map(|tax_line| tax_line.price)
        .sum();
    let shipping_tax_shares = shipping_tax_total.split_among(line_count);

    let shipping_price_total = order
        .total_shipping_price_set
        .as_ref()
        .map(|set| set.shop_money.amount)
        .unwrap_or_default();
    let shipping_price_shares = shipping_price_total.split_among(line_count);

    let shipping_discount_applications: Vec<_> = order
        .discount_applications
        .iter()
        .filter(|application| application.target_type == "shipping_line")
        .collect();
    let shipping_discount_total: Money =
        shipping_discount_applications.iter().map(|application| application.value).sum();
    let shipping_discount_shares = shipping_discount_total.split_among(line_count);
    let shipping_discount_name = shipping_discount_applications
        .iter()
        .map(|application| application.description.clone().unwrap_or_default())
        .collect::<Vec<_>>()
        .join(", ");

    let shipping_method =
        order.shipping_lines.first().map(|line| line.title.clone()).unwrap_or_default();

    let shipping = order.shipping_address.as_ref();
    let billing = order.billing_address.as_ref();
    let address_field = |value: Option<&Option<String>>| -> String {
        value.and_then(|v| v.clone()).unwrap_or_default()
    };

    let order_lines: Vec<OrderLine> = order
        .line_items
        .iter()
        .enumerate()
        .map(|(index, line_item)| {
            let mut discount_names: Vec<String> = Vec::new();
            let mut discount_sum = Money::default();
            for allocation in &line_item.discount_allocations {
                discount_sum += allocation.amount;
                if let Some(application) =
                    order.discount_applications.get(allocation.discount_application_index)
                {
                    let label = application.label();
                    if !label.is_empty() {
                        discount_names.push(label.to_string());
                    }
                }
            }
            let shipping_discount =
                shipping_discount_shares.get(index).copied().unwrap_or_default();

            OrderLine {
                mp_line_number: line_item.id.to_string(),
                sku: line_item.sku.clone().unwrap_or_default(),
                quantity: line_item.quantity,
                product_name: line_item.title.clone().unwrap_or_default(),
                unit_price: line_item.price,
                discount: -discount_sum,
                discount_name: discount_names.join(", "),
                shipping_discount: -shipping_discount,
                shipping_discount_name: shipping_discount_name.clone(),
                shipping_price: shipping_price_shares.get(index).copied().unwrap_or_default(),
                shipping_tax: shipping_tax_shares.get(index).copied().unwrap_or_default(),
                shipping_method: shipping_method.clone(),
                sales_tax: line_item.tax_lines.iter().map(|tax_line| tax_line.price).sum(),
                ..Default::default()
            }
        })
        .collect();

    CanonicalOrder {
        mp_order_number: order.id.to_string(),
        mp_alt_order_number: order.name.clone(),
        marketplace_name: "Shopify".to_string(),
        sales_channel: "Shopify".to_string(),
        purchase_date: convert_date_to_utc_iso_8601(&order.created_at),
        customer_email: order.email.clone(),
        currency: order.currency.clone(),
        delivery_notes: delivery_notes(order),
        customer_full_name: address_field(billing.map(|a| &a.name)),
        customer_phone: address_field(billing.map(|a| &a.phone)),
        shipping_full_name: address_field(shipping.map(|a| &a.name)),
        shipping_address1: address_field(shipping.map(|a| &a.address1)),
        shipping_address2: address_field(shipping.map(|a| &a.address2)),
        shipping_city: address_field(shipping.map(|a| &a.city)),
        shipping_state: address_field(shipping.map(|a| &a.province_code)),
        shipping_postal_code: address_field(shipping.map(|a| &a.zip)),
        shipping_country_code: convert_country_code_to_iso3(&address_field(
            shipping.map(|a| &a.country_code),
        )),
        shipping_phone: address_field(shipping.map(|a| &a.phone)),
        order_lines,
        ..Default::default()
    }
}

/// The canonical delivery-notes blob: everything a downstream agent might need to eyeball,
/// folded into one text field.
fn delivery_notes(order: &ShopifyOrder) -> String {
    let note = order.note.clone().unwrap_or_default();
    let mut notes = format!("Notes: \n{}\n", note.trim_start());

    if !order.payment_gateway_names.is_empty() {
        let gateways: Vec<String> = order
            .payment_gateway_names
            .iter()
            .map(|gateway| gateway.clone().unwrap_or_default())
            .collect();
        notes.push_str(&format!("Payment Type: {}\n", gateways.join(", ")));
    }
    if let Some(checkout_id) = order.checkout_id.filter(|id| *id != 0) {
        notes.push_str(&format!("Checkout ID: {checkout_id}\n"));
    }
    if order.order_number.filter(|n| *n != 0).is_some() {
        notes.push_str(&format!("Order Number: {}\n", order.name));
    }
    notes.push_str("Additional Details:\n");
    for attribute in &order.note_attributes {
        notes.push_str(&format!("{}: {}\n", attribute.name, attribute.value_str()));
    }
    if let Some(details) = &order.payment_details {
        notes.push_str(&format!("Last 4 CC digits: {}", last_four_cc(details)));
    }
    notes
}

fn last_four_cc(details: &PaymentDetails) -> String {
    let digits: Vec<char> = details
        .credit_card_number
        .as_deref()
        .unwrap_or("")
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits[digits.len().saturating_sub(4)..].iter().collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::shopify_order::{
        Address, DiscountAllocation, DiscountApplication, LineItem, MoneyBag, NoteAttribute,
        PriceSet, ShippingLine, TaxLine,
    };
    use serde_json::json;

    fn platform_order() -> ShopifyOrder {
        ShopifyOrder {
            id: 450789469,
            name: "#1001".to_string(),
            order_number: Some(1001),
            email: "buyer@example.com".to_string(),
            currency: "USD".to_string(),
            note: Some("  leave at door".to_string()),
            created_at: "2024-01-02T09:41:00-05:00".to_string(),
            checkout_id: Some(901414060),
            payment_gateway_names: vec![Some("visa".to_string()), None],
            total_shipping_price_set: Some(PriceSet {
                shop_money: MoneyBag {
                    amount: Money::from_cents(1000),
                    currency_code: "USD".to_string(),
                },
            }),
            shipping_address: Some(Address {
                name: Some("Jo Smith".to_string()),
                address1: Some("1 Main St".to_string()),
                city: Some("Austin".to_string()),
                province_code: Some("TX".to_string()),
                zip: Some("78701".to_string()),
                country_code: Some("US".to_string()),
                phone: Some("555-867-5309".to_string()),
                ..Default::default()
            }),
            shipping_lines: vec![ShippingLine {
                title: "Standard".to_string(),
                price: Money::from_cents(1000),
                tax_lines: vec![TaxLine {
                    price: Money::from_cents(80),
                    title: "Sales Tax".to_string(),
                    rate: 0.08,
                }],
                ..Default::default()
            }],
            discount_applications: vec![
                DiscountApplication {
                    target_type: "line_item".to_string(),
                    value: Money::from_cents(300),
                    code: Some("SUMMER10".to_string()),
                    ..Default::default()
                },
                DiscountApplication {
                    target_type: "shipping_line".to_string(),
                    value: Money::from_cents(100),
                    description: Some("free shipping promo".to_string()),
                    ..Default::default()
                },
            ],
            line_items: vec![
                LineItem {
                    id: 11,
                    sku: Some("SKU-A".to_string()),
                    title: Some("Widget".to_string()),
                    quantity: 2,
                    price: Money::from_cents(1999),
                    tax_lines: vec![TaxLine {
                        price: Money::from_cents(320),
                        title: "Sales Tax".to_string(),
                        rate: 0.08,
                    }],
                    discount_allocations: vec![DiscountAllocation {
                        amount: Money::from_cents(300),
                        discount_application_index: 0,
                    }],
                },
                LineItem {
                    id: 12,
                    sku: Some("SKU-B".to_string()),
                    title: Some("Gadget".to_string()),
                    quantity: 1,
                    price: Money::from_cents(500),
                    ..Default::default()
                },
                LineItem { id: 13, quantity: 1, price: Money::from_cents(100), ..Default::default() },
            ],
            note_attributes: vec![NoteAttribute {
                name: "gift".to_string(),
                value: json!("yes"),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn splits_shipping_price_and_tax_penny_fairly() {
        let canonical = normalize_order(&platform_order());
        assert_eq!(canonical.order_lines.len(), 3);
        let prices: Vec<Money> = canonical.order_lines.iter().map(|l| l.shipping_price).collect();
        assert_eq!(prices.iter().copied().sum::<Money>(), Money::from_cents(1000));
        let taxes: Vec<Money> = canonical.order_lines.iter().map(|l| l.shipping_tax).collect();
        assert_eq!(taxes.iter().copied().sum::<Money>(), Money::from_cents(80));
        for tax in taxes {
            assert!((tax.cents() - 27).abs() <= 1);
        }
    }

    #[test]
    fn maps_identity_and_address_fields() {
        let canonical = normalize_order(&platform_order());
        assert_eq!(canonical.mp_order_number, "450789469");
        assert_eq!(canonical.mp_alt_order_number, "#1001");
        assert_eq!(canonical.marketplace_name, "Shopify");
        assert_eq!(canonical.sales_channel, "Shopify");
        assert_eq!(canonical.purchase_date, "2024-01-02T14:41:00+00:00");
        assert_eq!(canonical.shipping_country_code, "USA");
        assert_eq!(canonical.shipping_state, "TX");
        assert_eq!(canonical.order_lines[0].shipping_method, "Standard");
    }

    #[test]
    fn resolves_discount_allocations_to_names() {
        let canonical = normalize_order(&platform_order());
        let line = &canonical.order_lines[0];
        assert_eq!(line.discount, Money::from_cents(-300));
        assert_eq!(line.discount_name, "SUMMER10");
        assert_eq!(line.shipping_discount_name, "free shipping promo");
        // shipping discount splits across all three lines with flipped sign
        let total: Money =
            canonical.order_lines.iter().map(|l| l.shipping_discount).sum();
        assert_eq!(total, Money::from_cents(-100));
    }

    #[test]
    fn delivery_notes_collect_order_context() {
        let canonical = normalize_order(&platform_order());
        let notes = &canonical.delivery_notes;
        assert!(notes.starts_with("Notes: \nleave at door\n"));
        assert!(notes.contains("Payment Type: visa, \n"));
        assert!(notes.contains("Checkout ID: 901414060\n"));
        assert!(notes.contains("Order Number: #1001\n"));
        assert!(notes.contains("Additional Details:\ngift: yes\n"));
        assert!(!notes.contains("Last 4 CC digits"));
    }

    #[test]
    fn delivery_notes_keep_the_details_header_without_attributes() {
        let mut order = platform_order();
        order.note_attributes.clear();
        let canonical = normalize_order(&order);
        assert!(canonical.delivery_notes.contains("Additional Details:\n"));
        assert!(!canonical.delivery_notes.contains("gift:"));
    }
}
