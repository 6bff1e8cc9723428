use serde::{Deserialize, Serialize};
use serde_json::Value;
use soc_common::Money;

/// An order as returned by the Shopify Admin REST API. Only the fields the connector reads are
/// modelled; everything else in the payload is ignored on deserialization.
///
/// Nullable platform fields are `Option`s, and collections default to empty so that sparse
/// payloads (webhooks, older API versions) still deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShopifyOrder {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub order_number: Option<i64>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub cancelled_at: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub checkout_id: Option<i64>,
    #[serde(default)]
    pub payment_gateway_names: Vec<Option<String>>,
    #[serde(default)]
    pub note_attributes: Vec<NoteAttribute>,
    #[serde(default)]
    pub payment_details: Option<PaymentDetails>,
    #[serde(default)]
    pub discount_applications: Vec<DiscountApplication>,
    #[serde(default)]
    pub total_shipping_price_set: Option<PriceSet>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub shipping_lines: Vec<ShippingLine>,
    #[serde(default)]
    pub fulfillments: Vec<OrderFulfillment>,
    #[serde(default)]
    pub refunds: Vec<Refund>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub price: Money,
    #[serde(default)]
    pub tax_lines: Vec<TaxLine>,
    #[serde(default)]
    pub discount_allocations: Vec<DiscountAllocation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxLine {
    #[serde(default)]
    pub price: Money,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscountAllocation {
    #[serde(default)]
    pub amount: Money,
    #[serde(default)]
    pub discount_application_index: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscountApplication {
    #[serde(default)]
    pub target_type: String,
    #[serde(default)]
    pub value: Money,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl DiscountApplication {
    /// Human label for the application: the code if present, else title, else description.
    pub fn label(&self) -> &str {
        self.code
            .as_deref()
            .or(self.title.as_deref())
            .or(self.description.as_deref())
            .unwrap_or("")
    }
}

/// Free-form key/value metadata attached to an order. Values are usually strings but the
/// platform does not guarantee it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteAttribute {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl NoteAttribute {
    pub fn value_str(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentDetails {
    #[serde(default)]
    pub credit_card_number: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSet {
    #[serde(default)]
    pub shop_money: MoneyBag,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoneyBag {
    #[serde(default)]
    pub amount: Money,
    #[serde(default)]
    pub currency_code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub province_code: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShippingLine {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: Money,
    #[serde(default)]
    pub tax_lines: Vec<TaxLine>,
    #[serde(default)]
    pub discounted_price: Option<Money>,
}

/// A shipment recorded on the platform side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFulfillment {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub tracking_company: Option<String>,
    #[serde(default)]
    pub tracking_url: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    #[serde(default)]
    pub refund_line_items: Vec<RefundLineItem>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub order_adjustments: Vec<OrderAdjustment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundLineItem {
    pub id: i64,
    #[serde(default)]
    pub line_item_id: i64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub restock_type: Option<String>,
    #[serde(default)]
    pub line_item: Option<LineItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub amount: Money,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderAdjustment {
    pub id: i64,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub amount: Money,
}

/// A fulfillment order, the unit the fulfillments endpoint actually addresses. Maps platform
/// line item ids onto fulfillment-order line ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FulfillmentOrder {
    pub id: i64,
    #[serde(default)]
    pub line_items: Vec<FulfillmentOrderLineItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FulfillmentOrderLineItem {
    pub id: i64,
    #[serde(default)]
    pub line_item_id: i64,
    #[serde(default)]
    pub fulfillable_quantity: i64,
}
