//! Paged refund scanning support: the resumable cursor handed back to callers, Link-header
//! pagination, and the rate-limit backoff read off throttled responses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::PlatformResponse;
use crate::error::ShopifyApiError;
use crate::refunds::RefundCandidate;

/// Financial statuses scanned for refunds, in bucket order. A scan works through each status
/// to exhaustion before moving to the next.
pub const FINANCIAL_STATUSES: &[&str] = &["partially_refunded", "refunded"];

const RATE_LIMIT_HEADER: &str = "X-Shopify-Shop-Api-Call-Limit";

/// A resumable position inside a refund scan: the page token the platform handed out, the
/// status bucket it belongs to, and the page size it was issued under. Serialized as
/// base64-wrapped JSON so callers can treat it as an opaque token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCursor {
    pub limit: u32,
    pub page_info: String,
    pub status: String,
}

impl PageCursor {
    pub fn encode(&self) -> String {
        let json = serde_json::json!({
            "limit": self.limit,
            "page_info": self.page_info,
            "status": self.status,
        });
        base64::encode(json.to_string())
    }

    pub fn decode(cursor: &str) -> Result<Self, ShopifyApiError> {
        let raw = base64::decode(cursor)
            .map_err(|e| ShopifyApiError::InvalidCursor(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| ShopifyApiError::InvalidCursor(e.to_string()))
    }
}

/// Pulls the query parameters of the `rel="next"` link out of a paged response's Link header.
/// Returns `None` when the response is the last page.
pub fn extract_next_page_params(response: &PlatformResponse) -> Option<Vec<(String, String)>> {
    let link_header = response.header("link")?;
    for link in link_header.split(',') {
        let mut parts = link.split(';');
        let url = parts.next()?.trim().trim_start_matches('<').trim_end_matches('>');
        let rel = parts
            .next()
            .map(|rel| rel.trim().trim_start_matches("rel=").trim_matches('"'))
            .unwrap_or_default();
        if rel == "next" {
            let url = reqwest::Url::parse(url).ok()?;
            return Some(
                url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect(),
            );
        }
    }
    None
}

/// How long a throttled (429) response asks us to wait before retrying.
///
/// The call-limit header reads `used/total` where `total` is the bucket size; the wait scales
/// with the bucket, ten seconds per sixty slots. Non-throttled responses return `None`.
pub fn rate_limit_wait(response: &PlatformResponse) -> Option<Duration> {
    if response.response_code != 429 {
        return None;
    }
    let header = response.header(RATE_LIMIT_HEADER)?;
    let total: f64 = header.split('/').nth(1)?.trim().parse().ok()?;
    let wait = (total / 60.0).round() as u64 * 10;
    (wait > 0).then(|| Duration::from_secs(wait))
}

/// One page of a refund scan: the candidates found, the cursor to resume from (absent when
/// the scan is exhausted), and the platform response the page came from.
#[derive(Debug, Default)]
pub struct RefundScan {
    pub refunds: Vec<RefundCandidate>,
    pub cursor: Option<String>,
    pub platform_response: Option<PlatformResponse>,
}
