use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use soc_common::Secret;

pub const DEFAULT_API_VERSION: &str = "2023-10";
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// Shipping identity placeholder for orders the marketplace fulfils itself.
pub const MARKETPLACE_FULFILL_PLACEHOLDER: &str = "MARKETPLACE FULFILLED - DO NOT FULFILL";

#[derive(Debug, Clone)]
pub struct ShopifyConfig {
    pub store_id: String,
    pub access_token: Secret<String>,
    pub api_version: String,
    /// Cap on consecutive 429 retries for a single request. The external quota is scoped to the
    /// credential, so an unbounded wait could stall a batch forever.
    pub max_rate_limit_retries: u32,
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            store_id: String::new(),
            access_token: Secret::default(),
            api_version: DEFAULT_API_VERSION.to_string(),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
        }
    }
}

impl ShopifyConfig {
    pub fn new(store_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self { store_id: store_id.into(), access_token: Secret::new(access_token.into()), ..Self::default() }
    }

    pub fn new_from_env_or_default() -> Self {
        let store_id = std::env::var("SOC_SHOPIFY_STORE_ID").unwrap_or_else(|_| {
            warn!("SOC_SHOPIFY_STORE_ID not set, using (probably useless) default");
            "example-store".to_string()
        });
        let api_version = std::env::var("SOC_SHOPIFY_API_VERSION").unwrap_or_else(|_| {
            warn!("SOC_SHOPIFY_API_VERSION not set, using {DEFAULT_API_VERSION} as default");
            DEFAULT_API_VERSION.to_string()
        });
        let access_token = Secret::new(std::env::var("SOC_SHOPIFY_ADMIN_ACCESS_TOKEN").unwrap_or_else(|_| {
            warn!("SOC_SHOPIFY_ADMIN_ACCESS_TOKEN not set, using (probably useless) default");
            "shpat_00000000000000".to_string()
        }));
        let max_rate_limit_retries = std::env::var("SOC_SHOPIFY_MAX_RATE_LIMIT_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RATE_LIMIT_RETRIES);
        Self { store_id, access_token, api_version, max_rate_limit_retries }
    }

    pub fn api_base_url(&self) -> String {
        format!("https://{}.myshopify.com/admin/api/{}", self.store_id, self.api_version)
    }

    pub fn orders_url(&self) -> String {
        format!("{}/orders.json", self.api_base_url())
    }
}

/// The outbound "source" tag written onto placed orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceNameFormat {
    #[serde(rename = "Marketplace Name")]
    MarketplaceName,
    #[default]
    #[serde(rename = "Marketplace Name + Marketplace Order Number")]
    MarketplaceNameAndOrderNumber,
    #[serde(rename = "Marketplace Order Number")]
    MarketplaceOrderNumber,
}

/// Per-store switches for the outbound order builder. A partial JSON config deserializes over
/// these defaults, so callers only state what they change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceOrderConfig {
    pub add_delivery_notes_to_notes: bool,
    pub add_empty_info: bool,
    pub aggregate_shipping_lines: bool,
    pub add_customer_order_number_to_notes: bool,
    pub deduct_shipping_discount_from_shipping_price: bool,
    pub default_currency: String,
    pub dummy_customer_email: String,
    pub include_marketplace_promo_note: bool,
    pub shipping_method_map: HashMap<String, String>,
    pub source_name_format: SourceNameFormat,
    pub transaction_gateway: String,
    pub transactions: bool,
    pub use_mp_product_name: bool,
    pub use_note_attributes: bool,
    pub include_order_line_additional_properties: bool,
}

impl Default for PlaceOrderConfig {
    fn default() -> Self {
        Self {
            add_delivery_notes_to_notes: false,
            add_empty_info: false,
            aggregate_shipping_lines: false,
            add_customer_order_number_to_notes: false,
            deduct_shipping_discount_from_shipping_price: false,
            default_currency: "USD".to_string(),
            dummy_customer_email: "dummy_customer_override@example.com".to_string(),
            include_marketplace_promo_note: false,
            shipping_method_map: HashMap::new(),
            source_name_format: SourceNameFormat::default(),
            transaction_gateway: String::new(),
            transactions: false,
            use_mp_product_name: true,
            use_note_attributes: false,
            include_order_line_additional_properties: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config_merges_over_defaults() {
        let config: PlaceOrderConfig =
            serde_json::from_str(r#"{"transactions": true, "default_currency": "CAD"}"#).unwrap();
        assert!(config.transactions);
        assert_eq!(config.default_currency, "CAD");
        assert!(config.use_mp_product_name);
        assert_eq!(config.source_name_format, SourceNameFormat::MarketplaceNameAndOrderNumber);
    }

    #[test]
    fn source_name_format_uses_marketplace_labels() {
        let fmt: SourceNameFormat = serde_json::from_str("\"Marketplace Order Number\"").unwrap();
        assert_eq!(fmt, SourceNameFormat::MarketplaceOrderNumber);
    }
}
