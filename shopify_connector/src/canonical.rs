use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use soc_common::Money;

/// The connector's own order shape, independent of any marketplace or of Shopify.
///
/// Field names follow the flat-batch and JSON wire contract (`mp_` = marketplace). Orders are
/// built once per batch row group or per inbound platform fetch and discarded after the
/// resulting request or report is emitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalOrder {
    pub mp_order_number: String,
    #[serde(default)]
    pub mp_alt_order_number: String,
    #[serde(default)]
    pub customer_order_number: String,
    #[serde(default)]
    pub replaced_mp_order_number: String,
    #[serde(default)]
    pub marketplace_name: String,
    #[serde(default)]
    pub marketplace_channel: String,
    #[serde(default)]
    pub sales_channel: String,
    #[serde(default)]
    pub customer_email: String,
    #[serde(default)]
    pub customer_full_name: String,
    #[serde(default)]
    pub customer_phone: String,
    #[serde(default)]
    pub customer_vat: String,
    #[serde(default)]
    pub purchase_date: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub gift_message: String,
    #[serde(default)]
    pub delivery_notes: String,
    #[serde(default)]
    pub estimated_ship_date: String,
    #[serde(default)]
    pub estimated_delivery_date: String,
    #[serde(default)]
    pub shipping_full_name: String,
    #[serde(default)]
    pub shipping_address_type: String,
    #[serde(default)]
    pub shipping_address1: String,
    #[serde(default)]
    pub shipping_address2: String,
    #[serde(default)]
    pub shipping_address3: String,
    #[serde(default)]
    pub shipping_city: String,
    #[serde(default)]
    pub shipping_state: String,
    #[serde(default)]
    pub shipping_postal_code: String,
    #[serde(default)]
    pub shipping_country_code: String,
    #[serde(default)]
    pub shipping_phone: String,
    #[serde(default)]
    pub billing_full_name: String,
    #[serde(default)]
    pub billing_address1: String,
    #[serde(default)]
    pub billing_address2: String,
    #[serde(default)]
    pub billing_address3: String,
    #[serde(default)]
    pub billing_city: String,
    #[serde(default)]
    pub billing_state: String,
    #[serde(default)]
    pub billing_postal_code: String,
    #[serde(default)]
    pub billing_country_code: String,
    #[serde(default)]
    pub billing_phone: String,
    #[serde(default)]
    pub order_tags: String,
    #[serde(default)]
    pub customer_tags: String,
    #[serde(default)]
    pub is_amazon_prime: bool,
    #[serde(default)]
    pub is_target_two_day: bool,
    #[serde(default)]
    pub business_order: bool,
    #[serde(default)]
    pub marketplace_fulfilled: bool,
    #[serde(default)]
    pub marketing_opt_in: Option<bool>,
    #[serde(default)]
    pub marketplace_promotion_amount: Money,
    #[serde(default)]
    pub marketplace_promotion_name: String,
    #[serde(default)]
    pub order_lines: Vec<OrderLine>,
}

/// One SKU/quantity/price entry within an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderLine {
    pub mp_line_number: String,
    pub sku: String,
    #[serde(default)]
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    #[serde(default)]
    pub sales_tax: Money,
    #[serde(default)]
    pub shipping_method: String,
    #[serde(default)]
    pub shipping_price: Money,
    #[serde(default)]
    pub shipping_tax: Money,
    #[serde(default)]
    pub discount_name: String,
    #[serde(default)]
    pub discount: Money,
    #[serde(default)]
    pub shipping_discount_name: String,
    #[serde(default)]
    pub shipping_discount: Money,
    #[serde(default)]
    pub order_line_additional_properties: Option<Value>,
    #[serde(default)]
    pub fulfillments: Vec<Fulfillment>,
    #[serde(default)]
    pub cancellations: Vec<Cancellation>,
}

/// A shipment event against an order line. Shipments are grouped across lines by
/// carrier + tracking number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fulfillment {
    #[serde(default)]
    pub quantity_shipped: i64,
    #[serde(default)]
    pub shipped_date: String,
    #[serde(default)]
    pub tracking_number: String,
    #[serde(default)]
    pub carrier: String,
    #[serde(default)]
    pub invoice_number: String,
    #[serde(default)]
    pub tracking_url: String,
    #[serde(default)]
    pub return_tracking_number: String,
}

/// A reduction in expected-to-ship quantity for a line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub quantity_cancelled: i64,
    #[serde(default)]
    pub cancellation_reason: CancellationReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    CustomerCancelled,
    Fraud,
    OutOfStock,
    #[default]
    Other,
}

impl CancellationReason {
    /// Maps Shopify's `cancel_reason` codes onto canonical reasons. Absent or unmapped
    /// codes resolve to `Other`.
    pub fn from_platform_code(code: Option<&str>) -> Self {
        match code {
            Some("customer") => Self::CustomerCancelled,
            Some("fraud") => Self::Fraud,
            Some("inventory") => Self::OutOfStock,
            Some("declined") | Some("other") => Self::Other,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerCancelled => "customer_cancelled",
            Self::Fraud => "fraud",
            Self::OutOfStock => "out_of_stock",
            Self::Other => "other",
        }
    }

    /// The Shopify `cancel_reason` code for this reason. Inverse of [`from_platform_code`]
    /// up to the lossy `Other` bucket.
    ///
    /// [`from_platform_code`]: Self::from_platform_code
    pub fn platform_code(&self) -> &'static str {
        match self {
            Self::CustomerCancelled => "customer",
            Self::Fraud => "fraud",
            Self::OutOfStock => "inventory",
            Self::Other => "other",
        }
    }
}

impl FromStr for CancellationReason {
    type Err = std::convert::Infallible;

    // Unknown reasons from flat files degrade to Other.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "customer_cancelled" => Self::CustomerCancelled,
            "fraud" => Self::Fraud,
            "out_of_stock" => Self::OutOfStock,
            _ => Self::Other,
        })
    }
}

/// A fulfill/cancel/refund instruction for one platform order, expressed in canonical terms.
/// The fulfillment and cancellation sub-records on the order lines carry the work to do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderActionRequest {
    pub mp_order_number: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub notify_customer: bool,
    #[serde(default)]
    pub location_id: Option<i64>,
    #[serde(default)]
    pub order_lines: Vec<OrderLine>,
}
