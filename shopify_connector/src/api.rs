//! The Shopify Admin REST client and the high-level order operations built on it.
//!
//! All HTTP goes through the [`ShopifyTransport`] trait so every operation can be exercised
//! against scripted responses; [`HttpTransport`] is the reqwest-backed implementation used in
//! production. Requests that hit the platform's leaky-bucket throttle are retried with the
//! wait the throttle response asks for, up to the configured cap.

use std::collections::BTreeMap;

use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cancellations::{cancellation_groups, cancelled_line_map, CancelledLine};
use crate::canonical::{CanonicalOrder, OrderActionRequest};
use crate::config::{PlaceOrderConfig, ShopifyConfig};
use crate::error::{ScanError, ShopifyApiError};
use crate::fulfillments::{fulfillment_ledger, shipment_groups, LineFulfillments};
use crate::helpers::convert_date_to_utc_iso_8601;
use crate::normalize::normalize_order;
use crate::outbound::build_place_order_payload;
use crate::refunds::{build_refund_requests, refund_candidates, ReconciliationWarning};
use crate::scanner::{
    extract_next_page_params, rate_limit_wait, PageCursor, RefundScan, FINANCIAL_STATUSES,
};
use crate::shopify_order::{FulfillmentOrder, ShopifyOrder, Transaction};

/// The platform caps order listing pages at 250 records.
pub(crate) const MAX_ORDER_BATCH_SIZE: u32 = 250;

const RESPONSE_ERROR_MESSAGE: &str = "Error returned in the response";
const ALREADY_FULFILLED_MESSAGE: &str = "The order line has already been fulfilled";
const ALREADY_REFUNDED_MESSAGE: &str = "The order line has already been refunded";
const WHITELISTED_FULFILLED_ERROR: &str = "is already fulfilled";
/// Exact refund error bodies meaning the work was already done on the platform side. These
/// are reported as already-refunded rather than failures.
const WHITELISTED_REFUND_ERRORS: &[&str] = &[
    r#"{"errors":{"refund_line_items.quantity":["cannot refund more items than were purchased"]}}"#,
    r#"{"errors":{"refund_line_items":["cannot remove more than the fulfillable quantity."]}}"#,
    r#"{"errors":{"refund_line_items":["cannot refund more than refundable quantity","cannot remove more than the fulfillable quantity."]}}"#,
];

/// A platform HTTP response, flattened to what the operations need.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlatformResponse {
    pub response_code: u16,
    pub headers: Vec<(String, String)>,
    pub response_body: String,
}

impl PlatformResponse {
    pub fn is_error(&self) -> bool {
        self.response_code < 200 || self.response_code > 300
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.response_body).ok()
    }
}

/// A platform HTTP request, ready for any [`ShopifyTransport`] to carry.
#[derive(Debug, Clone)]
pub struct PlatformRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl PlatformRequest {
    pub fn get(url: impl Into<String>, query: Vec<(String, String)>) -> Self {
        Self { method: Method::GET, url: url.into(), query, body: None }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self { method: Method::POST, url: url.into(), query: Vec::new(), body: Some(body) }
    }
}

/// The seam between order operations and HTTP. Production uses [`HttpTransport`]; tests
/// script responses through a stub.
#[allow(async_fn_in_trait)]
pub trait ShopifyTransport {
    async fn call(&self, request: &PlatformRequest) -> Result<PlatformResponse, ShopifyApiError>;
}

/// reqwest-backed transport carrying the access token on every request.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &ShopifyConfig) -> Result<Self, ShopifyApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        let mut token = HeaderValue::from_str(config.access_token.reveal())
            .map_err(|e| ShopifyApiError::Initialization(e.to_string()))?;
        token.set_sensitive(true);
        headers.insert("X-Shopify-Access-Token", token);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ShopifyApiError::Initialization(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ShopifyTransport for HttpTransport {
    async fn call(&self, request: &PlatformRequest) -> Result<PlatformResponse, ShopifyApiError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ShopifyApiError::RestRequestError(e.to_string()))?;
        let response_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();
        let response_body = response
            .text()
            .await
            .map_err(|e| ShopifyApiError::RestResponseError(e.to_string()))?;
        Ok(PlatformResponse { response_code, headers, response_body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlacementStatus {
    Success,
    Error,
}

/// The outcome of placing one order.
#[derive(Debug, Clone, Serialize)]
pub struct PlacementResult {
    pub mp_order_number: String,
    /// The platform order id, empty on failure.
    pub cp_order_number: String,
    pub status: PlacementStatus,
    pub message: String,
}

impl PlacementResult {
    fn from_response(mp_order_number: &str, response: &PlatformResponse) -> Self {
        if response.is_error() {
            return Self {
                mp_order_number: mp_order_number.to_string(),
                cp_order_number: String::new(),
                status: PlacementStatus::Error,
                message: placement_error_message(response),
            };
        }
        let cp_order_number = response
            .json()
            .and_then(|body| body["order"]["id"].as_i64())
            .map(|id| id.to_string())
            .unwrap_or_default();
        Self {
            mp_order_number: mp_order_number.to_string(),
            cp_order_number,
            status: PlacementStatus::Success,
            message: String::new(),
        }
    }
}

/// Renders the `errors` object of a failed placement into one line, `key:value; ` per entry.
fn placement_error_message(response: &PlatformResponse) -> String {
    let fallback = format!("Unexpected response ({})", response.response_code);
    let body = match response.json() {
        Some(body) => body,
        None => return fallback,
    };
    match body.get("errors") {
        Some(Value::Object(errors)) => {
            let mut message = String::new();
            for (key, value) in errors {
                let rendered = match value {
                    Value::Array(items) if items.len() == 1 => scalar_text(&items[0]),
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                message.push_str(&format!("{key}:{rendered}; "));
            }
            message
        }
        Some(Value::String(message)) => message.clone(),
        _ => fallback,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The result of a fulfill or refund pass: per-request findings plus every platform response
/// the pass produced, in order.
#[derive(Debug, Default)]
pub struct ActionOutcome {
    pub errors: Vec<ReconciliationWarning>,
    pub platform_responses: Vec<PlatformResponse>,
}

/// The reconciled state of one platform order.
#[derive(Debug, Serialize)]
pub struct OrderStatus {
    pub id: i64,
    pub fulfillments: BTreeMap<i64, LineFulfillments>,
    pub cancellations: BTreeMap<i64, CancelledLine>,
}

/// The reconciled state of a batch of orders, with the ids the platform did not return.
#[derive(Debug)]
pub struct OrderStatusReport {
    pub statuses: Vec<OrderStatus>,
    pub failed_ids: Vec<i64>,
    pub platform_response: PlatformResponse,
}

#[derive(Deserialize)]
struct OrdersBody {
    #[serde(default)]
    orders: Vec<ShopifyOrder>,
}

#[derive(Deserialize)]
struct FulfillmentOrdersBody {
    #[serde(default)]
    fulfillment_orders: Vec<FulfillmentOrder>,
}

/// A pending fulfillment creation: one tracking record against one platform fulfillment order.
struct FulfillmentDraft {
    fulfillment_order_id: i64,
    shipment_id: String,
    tracking_number: String,
    carrier: String,
    tracking_url: String,
    line_items: Vec<(i64, i64)>,
}

pub struct ShopifyApi<T = HttpTransport> {
    config: ShopifyConfig,
    transport: T,
}

impl ShopifyApi<HttpTransport> {
    pub fn new(config: ShopifyConfig) -> Result<Self, ShopifyApiError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self { config, transport })
    }
}

impl<T: ShopifyTransport> ShopifyApi<T> {
    pub fn with_transport(config: ShopifyConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ShopifyConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends the request, sleeping and retrying when the platform throttles, up to the
    /// configured retry cap. The final response is returned as-is, throttled or not.
    async fn call_with_rate_limit_retry(
        &self,
        request: &PlatformRequest,
    ) -> Result<PlatformResponse, ShopifyApiError> {
        let mut retries = 0;
        loop {
            let response = self.transport.call(request).await?;
            match rate_limit_wait(&response) {
                Some(wait) if retries < self.config.max_rate_limit_retries => {
                    retries += 1;
                    warn!(
                        "Rate limited on {}. Waiting {}s before retry {retries}",
                        request.url,
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                }
                _ => return Ok(response),
            }
        }
    }

    /// Posts an order-placement payload. A rejection for an invalid phone number is retried
    /// once with the phone stripped; every other response comes back unchanged.
    pub async fn place_order(&self, payload: &Value) -> Result<PlatformResponse, ShopifyApiError> {
        let request = PlatformRequest::post(self.config.orders_url(), payload.clone());
        let response = self.call_with_rate_limit_retry(&request).await?;
        if !response.is_error() {
            return Ok(response);
        }
        let invalid_phone = response
            .json()
            .map(|body| body["errors"]["phone"][0] == json!("is invalid"))
            .unwrap_or(false);
        if !invalid_phone {
            return Ok(response);
        }
        debug!("Order placement rejected for invalid phone, retrying without it");
        let mut retry_payload = payload.clone();
        if let Some(order) = retry_payload.get_mut("order").and_then(Value::as_object_mut) {
            order.remove("phone");
        }
        let retry = PlatformRequest::post(self.config.orders_url(), retry_payload);
        self.call_with_rate_limit_retry(&retry).await
    }

    /// Places one canonical order and reports the outcome, never failing on a rejection.
    pub async fn process_place_order(
        &self,
        order: &CanonicalOrder,
        config: &PlaceOrderConfig,
    ) -> Result<PlacementResult, ShopifyApiError> {
        let payload = build_place_order_payload(order, config);
        let response = self.place_order(&payload).await?;
        Ok(PlacementResult::from_response(&order.mp_order_number, &response))
    }

    /// Fetches the given orders and reconciles each into its fulfillment ledger and cancelled
    /// line map. Ids the platform does not return, or the whole batch when the request fails,
    /// are reported in `failed_ids`.
    pub async fn process_order_statuses(
        &self,
        ids: &[i64],
    ) -> Result<OrderStatusReport, ShopifyApiError> {
        let id_list = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        let request = PlatformRequest::get(
            self.config.orders_url(),
            vec![
                ("status".to_string(), "any".to_string()),
                ("ids".to_string(), id_list),
                ("limit".to_string(), MAX_ORDER_BATCH_SIZE.to_string()),
            ],
        );
        let response = self.call_with_rate_limit_retry(&request).await?;
        let orders = if response.is_error() {
            None
        } else {
            serde_json::from_str::<OrdersBody>(&response.response_body).ok()
        };
        let orders = match orders {
            Some(body) => body.orders,
            None => {
                return Ok(OrderStatusReport {
                    statuses: Vec::new(),
                    failed_ids: ids.to_vec(),
                    platform_response: response,
                })
            }
        };
        let statuses: Vec<OrderStatus> = orders
            .iter()
            .map(|order| {
                let ledger = fulfillment_ledger(order);
                let cancellations = cancelled_line_map(order, &ledger);
                OrderStatus { id: order.id, fulfillments: ledger, cancellations }
            })
            .collect();
        let failed_ids = ids
            .iter()
            .filter(|id| !statuses.iter().any(|status| status.id == **id))
            .copied()
            .collect();
        Ok(OrderStatusReport { statuses, failed_ids, platform_response: response })
    }

    /// Creates platform fulfillments for the shipments on the request.
    ///
    /// The request's shipment groups are matched against the order's open fulfillment orders
    /// line by line, transferring shipped quantity into one fulfillment draft per fulfillment
    /// order and tracking record, then each draft is posted. An "is already fulfilled"
    /// rejection is reported as such rather than as a failure.
    pub async fn process_fulfill_order_lines(
        &self,
        request: &OrderActionRequest,
    ) -> Result<ActionOutcome, ShopifyApiError> {
        let mut outcome = ActionOutcome::default();
        let url = format!(
            "{}/orders/{}/fulfillment_orders.json",
            self.config.api_base_url(),
            request.mp_order_number
        );
        let response =
            self.call_with_rate_limit_retry(&PlatformRequest::get(url, Vec::new())).await?;
        let fulfillment_orders = if response.is_error() {
            None
        } else {
            serde_json::from_str::<FulfillmentOrdersBody>(&response.response_body).ok()
        };
        let fulfillment_orders = match fulfillment_orders {
            Some(body) => body.fulfillment_orders,
            None => {
                outcome.errors.push(ReconciliationWarning {
                    index: 0,
                    message: "Failed to get fulfillment orders for the order".to_string(),
                });
                outcome.platform_responses.push(response);
                return Ok(outcome);
            }
        };

        let mut shipments: Vec<(String, String, String, String, Vec<(String, i64)>)> =
            shipment_groups(&request.order_lines)
                .into_iter()
                .map(|group| {
                    let lines = group
                        .order_lines
                        .iter()
                        .map(|line| {
                            (line.order_line.mp_line_number.clone(), line.quantity_shipped)
                        })
                        .collect();
                    let shipment_id = format!(
                        "{}{}",
                        group.fulfillment.carrier, group.fulfillment.tracking_number
                    );
                    (
                        shipment_id,
                        group.fulfillment.tracking_number,
                        group.fulfillment.carrier,
                        group.fulfillment.tracking_url,
                        lines,
                    )
                })
                .collect();

        let mut drafts: Vec<FulfillmentDraft> = Vec::new();
        for fulfillment_order in &fulfillment_orders {
            for fo_line in &fulfillment_order.line_items {
                let mut fulfillable = fo_line.fulfillable_quantity;
                let line_item_id = fo_line.line_item_id.to_string();
                for (shipment_id, tracking_number, carrier, tracking_url, lines) in
                    shipments.iter_mut()
                {
                    for (mp_line_number, quantity_shipped) in lines.iter_mut() {
                        if *mp_line_number != line_item_id {
                            continue;
                        }
                        let transfer = fulfillable.min(*quantity_shipped);
                        if transfer <= 0 {
                            continue;
                        }
                        fulfillable -= transfer;
                        *quantity_shipped -= transfer;
                        let position = drafts
                            .iter()
                            .position(|draft| {
                                draft.fulfillment_order_id == fulfillment_order.id
                                    && draft.shipment_id == *shipment_id
                            })
                            .unwrap_or_else(|| {
                                drafts.push(FulfillmentDraft {
                                    fulfillment_order_id: fulfillment_order.id,
                                    shipment_id: shipment_id.clone(),
                                    tracking_number: tracking_number.clone(),
                                    carrier: carrier.clone(),
                                    tracking_url: tracking_url.clone(),
                                    line_items: Vec::new(),
                                });
                                drafts.len() - 1
                            });
                        let draft = &mut drafts[position];
                        match draft.line_items.iter_mut().find(|(id, _)| *id == fo_line.id) {
                            Some((_, quantity)) => *quantity += transfer,
                            None => draft.line_items.push((fo_line.id, transfer)),
                        }
                    }
                }
            }
        }

        let fulfillments_url = format!("{}/fulfillments.json", self.config.api_base_url());
        for (index, draft) in drafts.iter().enumerate() {
            let line_items: Vec<Value> = draft
                .line_items
                .iter()
                .map(|(id, quantity)| json!({"id": id, "quantity": quantity}))
                .collect();
            let payload = json!({
                "fulfillment": {
                    "tracking_info": {
                        "number": draft.tracking_number,
                        "company": draft.carrier,
                        "url": draft.tracking_url,
                    },
                    "line_items_by_fulfillment_order": [{
                        "fulfillment_order_id": draft.fulfillment_order_id,
                        "fulfillment_order_line_items": line_items,
                    }],
                }
            });
            let response = self
                .call_with_rate_limit_retry(&PlatformRequest::post(
                    fulfillments_url.clone(),
                    payload,
                ))
                .await?;
            if response.is_error() {
                let message = if response
                    .response_body
                    .to_lowercase()
                    .contains(WHITELISTED_FULFILLED_ERROR)
                {
                    ALREADY_FULFILLED_MESSAGE
                } else {
                    RESPONSE_ERROR_MESSAGE
                };
                outcome
                    .errors
                    .push(ReconciliationWarning { index, message: message.to_string() });
            }
            outcome.platform_responses.push(response);
        }
        Ok(outcome)
    }

    /// Cancels the whole platform order, using the reason of the request's first cancellation
    /// group. The customer is notified when the request says so.
    pub async fn process_cancel_order(
        &self,
        request: &OrderActionRequest,
    ) -> Result<PlatformResponse, ShopifyApiError> {
        let reason = cancellation_groups(&request.order_lines)
            .first()
            .map(|group| group.cancellation.cancellation_reason)
            .unwrap_or_default();
        let url = format!(
            "{}/orders/{}/cancel.json",
            self.config.api_base_url(),
            request.mp_order_number
        );
        let payload = json!({
            "reason": reason.platform_code(),
            "email": request.notify_customer,
        });
        self.call_with_rate_limit_retry(&PlatformRequest::post(url, payload)).await
    }

    /// Refunds the cancelled quantities on the request against the order's sale transaction,
    /// one refund per cancellation group. Already-refunded rejections are reported as such.
    pub async fn process_refund_order_lines(
        &self,
        request: &OrderActionRequest,
    ) -> Result<ActionOutcome, ShopifyApiError> {
        let mut outcome = ActionOutcome::default();
        let url = format!(
            "{}/orders/{}/transactions.json",
            self.config.api_base_url(),
            request.mp_order_number
        );
        let response =
            self.call_with_rate_limit_retry(&PlatformRequest::get(url, Vec::new())).await?;
        #[derive(Deserialize)]
        struct TransactionsBody {
            #[serde(default)]
            transactions: Vec<Transaction>,
        }
        let transactions = if response.is_error() {
            None
        } else {
            serde_json::from_str::<TransactionsBody>(&response.response_body).ok()
        };
        let transactions = match transactions {
            Some(body) => body.transactions,
            None => {
                outcome.errors.push(ReconciliationWarning {
                    index: 0,
                    message: "Failed to get transactions for the order".to_string(),
                });
                outcome.platform_responses.push(response);
                return Ok(outcome);
            }
        };

        let build = build_refund_requests(request, &transactions);
        outcome.errors = build.warnings;
        if build.requests.is_empty() {
            outcome.platform_responses.push(response);
            return Ok(outcome);
        }

        let refunds_url = format!(
            "{}/orders/{}/refunds.json",
            self.config.api_base_url(),
            request.mp_order_number
        );
        for (index, payload) in build.requests.iter().enumerate() {
            let response = self
                .call_with_rate_limit_retry(&PlatformRequest::post(
                    refunds_url.clone(),
                    payload.clone(),
                ))
                .await?;
            if response.is_error() {
                let message =
                    if WHITELISTED_REFUND_ERRORS.contains(&response.response_body.as_str()) {
                        ALREADY_REFUNDED_MESSAGE
                    } else {
                        RESPONSE_ERROR_MESSAGE
                    };
                outcome
                    .errors
                    .push(ReconciliationWarning { index, message: message.to_string() });
            }
            outcome.platform_responses.push(response);
        }
        Ok(outcome)
    }

    /// Fetches open, paid, unshipped orders created after `start_date` with ids beyond
    /// `last_order_id`, normalized to canonical form.
    pub async fn process_orders(
        &self,
        start_date: &str,
        last_order_id: i64,
        batch_size: u32,
    ) -> Result<Vec<CanonicalOrder>, ScanError> {
        let query = vec![
            ("status".to_string(), "open".to_string()),
            ("fulfillment_status".to_string(), "unshipped".to_string()),
            ("financial_status".to_string(), "paid".to_string()),
            ("created_at_min".to_string(), convert_date_to_utc_iso_8601(start_date)),
            ("since_id".to_string(), last_order_id.to_string()),
            ("limit".to_string(), batch_size.min(MAX_ORDER_BATCH_SIZE).to_string()),
        ];
        let request = PlatformRequest::get(self.config.orders_url(), query);
        let response = self.call_with_rate_limit_retry(&request).await?;
        if response.is_error() {
            return Err(ScanError::new(
                "Request to get orders was not successful",
                Some(response),
            ));
        }
        let body: OrdersBody = match serde_json::from_str(&response.response_body) {
            Ok(body) => body,
            Err(_) => {
                return Err(ScanError::new(
                    "Invalid json returned in get orders response",
                    Some(response),
                ))
            }
        };
        Ok(body.orders.iter().map(normalize_order).collect())
    }

    /// Scans orders updated in the date window for refunds, one page per call.
    ///
    /// The scan walks the financial status buckets in order, following the platform's page
    /// tokens within a bucket and advancing to the next bucket when one runs dry. A fresh
    /// scan first asks for order counts and returns immediately when the window is empty.
    /// The returned cursor resumes the scan where this page left off; its absence means the
    /// scan is exhausted.
    pub async fn process_order_refunds(
        &self,
        start_date: &str,
        end_date: &str,
        attribution_app_id: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<RefundScan, ScanError> {
        let start_utc = convert_date_to_utc_iso_8601(start_date);
        let end_utc = convert_date_to_utc_iso_8601(end_date);

        let (mut status_index, mut page_info, limit) = match cursor {
            Some(cursor) => {
                let cursor = PageCursor::decode(cursor)?;
                let index = FINANCIAL_STATUSES
                    .iter()
                    .position(|status| *status == cursor.status)
                    .ok_or_else(|| {
                        ScanError::new(
                            format!("Unknown financial status in cursor: {}", cursor.status),
                            None,
                        )
                    })?;
                (index, Some(cursor.page_info), cursor.limit)
            }
            None => {
                let (count, response) = self.refund_order_count(&start_utc, &end_utc).await?;
                if count == 0 {
                    debug!("No orders updated between {start_utc} and {end_utc}");
                    return Ok(RefundScan {
                        refunds: Vec::new(),
                        cursor: None,
                        platform_response: Some(response),
                    });
                }
                (0, None, limit)
            }
        };

        loop {
            let status = FINANCIAL_STATUSES[status_index];
            let request = match &page_info {
                Some(page_info) => PlatformRequest::get(
                    self.config.orders_url(),
                    vec![
                        ("limit".to_string(), limit.to_string()),
                        ("page_info".to_string(), page_info.clone()),
                    ],
                ),
                None => {
                    let mut query = vec![
                        ("status".to_string(), "any".to_string()),
                        ("financial_status".to_string(), status.to_string()),
                        ("updated_at_min".to_string(), start_utc.clone()),
                        ("updated_at_max".to_string(), end_utc.clone()),
                        ("limit".to_string(), limit.to_string()),
                    ];
                    if !attribution_app_id.is_empty() {
                        query.push((
                            "attribution_app_id".to_string(),
                            attribution_app_id.to_string(),
                        ));
                    }
                    PlatformRequest::get(self.config.orders_url(), query)
                }
            };
            let response = self.call_with_rate_limit_retry(&request).await?;
            if response.is_error() {
                return Err(ScanError::new(
                    "Request to get orders was not successful",
                    Some(response),
                ));
            }
            let body: OrdersBody = match serde_json::from_str(&response.response_body) {
                Ok(body) => body,
                Err(_) => {
                    return Err(ScanError::new(
                        "Invalid json returned in get orders response",
                        Some(response),
                    ))
                }
            };
            if body.orders.is_empty() {
                status_index += 1;
                if status_index >= FINANCIAL_STATUSES.len() {
                    return Ok(RefundScan {
                        refunds: Vec::new(),
                        cursor: None,
                        platform_response: Some(response),
                    });
                }
                page_info = None;
                continue;
            }
            let refunds =
                body.orders.iter().flat_map(|order| refund_candidates(order)).collect();
            let cursor = extract_next_page_params(&response).and_then(|params| {
                let page_info = params
                    .iter()
                    .find(|(key, _)| key == "page_info")
                    .map(|(_, value)| value.clone())?;
                Some(PageCursor { limit, page_info, status: status.to_string() }.encode())
            });
            return Ok(RefundScan { refunds, cursor, platform_response: Some(response) });
        }
    }

    /// Sums the order counts across all scanned financial statuses for the date window.
    async fn refund_order_count(
        &self,
        start_utc: &str,
        end_utc: &str,
    ) -> Result<(u64, PlatformResponse), ScanError> {
        let url = format!("{}/orders/count.json", self.config.api_base_url());
        let mut total = 0;
        let mut last_response = PlatformResponse::default();
        for status in FINANCIAL_STATUSES {
            let query = vec![
                ("status".to_string(), "any".to_string()),
                ("financial_status".to_string(), status.to_string()),
                ("updated_at_min".to_string(), start_utc.to_string()),
                ("updated_at_max".to_string(), end_utc.to_string()),
            ];
            let response = self
                .call_with_rate_limit_retry(&PlatformRequest::get(url.clone(), query))
                .await?;
            if response.is_error() {
                return Err(ScanError::new(
                    "Request to get order count was not successful",
                    Some(response),
                ));
            }
            total += response
                .json()
                .and_then(|body| body["count"].as_u64())
                .unwrap_or_default();
            last_response = response;
        }
        Ok((total, last_response))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::canonical::{Cancellation, CancellationReason, Fulfillment, OrderLine};
    use soc_common::Money;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct StubTransport {
        responses: Mutex<VecDeque<PlatformResponse>>,
        requests: Mutex<Vec<PlatformRequest>>,
    }

    impl StubTransport {
        fn new(responses: Vec<PlatformResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<PlatformRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ShopifyTransport for StubTransport {
        async fn call(
            &self,
            request: &PlatformRequest,
        ) -> Result<PlatformResponse, ShopifyApiError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ShopifyApiError::RestRequestError("no scripted response".into()))
        }
    }

    fn ok(body: &str) -> PlatformResponse {
        PlatformResponse {
            response_code: 200,
            headers: Vec::new(),
            response_body: body.to_string(),
        }
    }

    fn rejected(code: u16, body: &str) -> PlatformResponse {
        PlatformResponse {
            response_code: code,
            headers: Vec::new(),
            response_body: body.to_string(),
        }
    }

    fn api(responses: Vec<PlatformResponse>) -> ShopifyApi<StubTransport> {
        ShopifyApi::with_transport(
            ShopifyConfig::new("test-store", "shpat_test"),
            StubTransport::new(responses),
        )
    }

    fn order() -> CanonicalOrder {
        CanonicalOrder {
            mp_order_number: "MP-100".to_string(),
            marketplace_name: "Acme".to_string(),
            customer_phone: "555-867-5309".to_string(),
            order_lines: vec![OrderLine {
                mp_line_number: "1".to_string(),
                sku: "SKU-A".to_string(),
                quantity: 1,
                unit_price: Money::from_cents(1000),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn placing_an_order_reports_the_platform_id() {
        let api = api(vec![ok(r#"{"order":{"id":450789469}}"#)]);
        let result =
            api.process_place_order(&order(), &PlaceOrderConfig::default()).await.unwrap();
        assert_eq!(result.status, PlacementStatus::Success);
        assert_eq!(result.mp_order_number, "MP-100");
        assert_eq!(result.cp_order_number, "450789469");
        assert_eq!(result.message, "");
    }

    #[tokio::test]
    async fn invalid_phone_rejection_retries_without_the_phone() {
        let api = api(vec![
            rejected(422, r#"{"errors":{"phone":["is invalid"]}}"#),
            ok(r#"{"order":{"id":7}}"#),
        ]);
        let result =
            api.process_place_order(&order(), &PlaceOrderConfig::default()).await.unwrap();
        assert_eq!(result.status, PlacementStatus::Success);
        let requests = api.transport.requests();
        assert_eq!(requests.len(), 2);
        let first = requests[0].body.as_ref().unwrap();
        let second = requests[1].body.as_ref().unwrap();
        assert!(first["order"].get("phone").is_some());
        assert!(second["order"].get("phone").is_none());
    }

    #[tokio::test]
    async fn rejection_messages_join_the_errors_object() {
        let api = api(vec![rejected(
            422,
            r#"{"errors":{"line_items":["must have at least one line item"],"email":"is required"}}"#,
        )]);
        let result =
            api.process_place_order(&order(), &PlaceOrderConfig::default()).await.unwrap();
        assert_eq!(result.status, PlacementStatus::Error);
        assert_eq!(result.cp_order_number, "");
        assert!(result.message.contains("line_items:must have at least one line item; "));
        assert!(result.message.contains("email:is required; "));
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_requests_wait_and_retry() {
        let throttled = PlatformResponse {
            response_code: 429,
            headers: vec![("X-Shopify-Shop-Api-Call-Limit".to_string(), "80/80".to_string())],
            response_body: String::new(),
        };
        let api = api(vec![throttled, ok(r#"{"order":{"id":1}}"#)]);
        let result =
            api.process_place_order(&order(), &PlaceOrderConfig::default()).await.unwrap();
        assert_eq!(result.status, PlacementStatus::Success);
        assert_eq!(api.transport.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_retries_stop_at_the_configured_cap() {
        let throttled = || PlatformResponse {
            response_code: 429,
            headers: vec![("X-Shopify-Shop-Api-Call-Limit".to_string(), "80/80".to_string())],
            response_body: String::new(),
        };
        let mut config = ShopifyConfig::new("test-store", "shpat_test");
        config.max_rate_limit_retries = 1;
        let api = ShopifyApi::with_transport(
            config,
            StubTransport::new(vec![throttled(), throttled(), throttled()]),
        );
        let result =
            api.process_place_order(&order(), &PlaceOrderConfig::default()).await.unwrap();
        assert_eq!(result.status, PlacementStatus::Error);
        assert_eq!(api.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn order_statuses_report_missing_ids_as_failed() {
        let api = api(vec![ok(
            r#"{"orders":[{"id":11,"line_items":[{"id":1,"quantity":2}],
                "fulfillments":[{"status":"success","line_items":[{"id":1,"quantity":1}]}]}]}"#,
        )]);
        let report = api.process_order_statuses(&[11, 12]).await.unwrap();
        assert_eq!(report.statuses.len(), 1);
        assert_eq!(report.statuses[0].id, 11);
        assert_eq!(report.statuses[0].fulfillments[&1].total_fulfilled, 1);
        assert_eq!(report.failed_ids, vec![12]);
    }

    #[tokio::test]
    async fn order_statuses_fail_everything_on_a_bad_response() {
        let api = api(vec![rejected(500, "oops")]);
        let report = api.process_order_statuses(&[11, 12]).await.unwrap();
        assert!(report.statuses.is_empty());
        assert_eq!(report.failed_ids, vec![11, 12]);
    }

    fn fulfill_request() -> OrderActionRequest {
        OrderActionRequest {
            mp_order_number: "450789469".to_string(),
            order_lines: vec![OrderLine {
                mp_line_number: "1071823172".to_string(),
                quantity: 2,
                fulfillments: vec![Fulfillment {
                    quantity_shipped: 2,
                    tracking_number: "TRACK-1".to_string(),
                    carrier: "UPS".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fulfilling_posts_one_draft_per_fulfillment_order_and_shipment() {
        let api = api(vec![
            ok(r#"{"fulfillment_orders":[{"id":90,"line_items":[
                {"id":901,"line_item_id":1071823172,"fulfillable_quantity":2}]}]}"#),
            ok(r#"{"fulfillment":{"id":1}}"#),
        ]);
        let outcome = api.process_fulfill_order_lines(&fulfill_request()).await.unwrap();
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.platform_responses.len(), 1);
        let requests = api.transport.requests();
        assert!(requests[1].url.ends_with("/fulfillments.json"));
        let fulfillment = &requests[1].body.as_ref().unwrap()["fulfillment"];
        assert_eq!(fulfillment["tracking_info"]["number"], "TRACK-1");
        assert_eq!(fulfillment["tracking_info"]["company"], "UPS");
        let by_order = &fulfillment["line_items_by_fulfillment_order"][0];
        assert_eq!(by_order["fulfillment_order_id"], 90);
        assert_eq!(by_order["fulfillment_order_line_items"][0]["id"], 901);
        assert_eq!(by_order["fulfillment_order_line_items"][0]["quantity"], 2);
    }

    #[tokio::test]
    async fn already_fulfilled_rejections_are_named() {
        let api = api(vec![
            ok(r#"{"fulfillment_orders":[{"id":90,"line_items":[
                {"id":901,"line_item_id":1071823172,"fulfillable_quantity":2}]}]}"#),
            rejected(422, r#"{"errors":"Line item 901 is already fulfilled"}"#),
        ]);
        let outcome = api.process_fulfill_order_lines(&fulfill_request()).await.unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].message, ALREADY_FULFILLED_MESSAGE);
    }

    #[tokio::test]
    async fn cancelling_uses_the_first_groups_reason() {
        let api = api(vec![ok("{}")]);
        let request = OrderActionRequest {
            mp_order_number: "450789469".to_string(),
            notify_customer: true,
            order_lines: vec![OrderLine {
                mp_line_number: "1".to_string(),
                cancellations: vec![Cancellation {
                    quantity_cancelled: 1,
                    cancellation_reason: CancellationReason::OutOfStock,
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        api.process_cancel_order(&request).await.unwrap();
        let requests = api.transport.requests();
        assert!(requests[0].url.ends_with("/orders/450789469/cancel.json"));
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["reason"], "inventory");
        assert_eq!(body["email"], true);
    }

    fn refund_request() -> OrderActionRequest {
        OrderActionRequest {
            mp_order_number: "450789469".to_string(),
            currency: "USD".to_string(),
            order_lines: vec![OrderLine {
                mp_line_number: "1071823172".to_string(),
                quantity: 2,
                unit_price: Money::from_cents(1000),
                cancellations: vec![Cancellation {
                    quantity_cancelled: 1,
                    cancellation_reason: CancellationReason::Other,
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn refunding_charges_back_against_the_sale_transaction() {
        let api = api(vec![
            ok(r#"{"transactions":[{"id":77,"kind":"sale","amount":"20.00","gateway":"bogus"}]}"#),
            ok(r#"{"refund":{"id":1}}"#),
        ]);
        let outcome = api.process_refund_order_lines(&refund_request()).await.unwrap();
        assert!(outcome.errors.is_empty());
        let requests = api.transport.requests();
        assert!(requests[1].url.ends_with("/orders/450789469/refunds.json"));
        let refund = &requests[1].body.as_ref().unwrap()["refund"];
        assert_eq!(refund["transactions"][0]["parent_id"], 77);
        assert_eq!(refund["transactions"][0]["amount"], "10.00");
    }

    #[tokio::test]
    async fn whitelisted_refund_rejections_are_named() {
        let api = api(vec![
            ok(r#"{"transactions":[{"id":77,"kind":"sale","amount":"20.00"}]}"#),
            rejected(
                422,
                r#"{"errors":{"refund_line_items.quantity":["cannot refund more items than were purchased"]}}"#,
            ),
        ]);
        let outcome = api.process_refund_order_lines(&refund_request()).await.unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].message, ALREADY_REFUNDED_MESSAGE);
    }

    #[tokio::test]
    async fn fetching_orders_normalizes_them() {
        let api = api(vec![ok(
            r##"{"orders":[{"id":450789469,"name":"#1001","email":"b@example.com",
                "currency":"USD","created_at":"2024-01-02T09:41:00-05:00",
                "line_items":[{"id":1,"sku":"SKU-A","quantity":1,"price":"19.99"}]}]}"##,
        )]);
        let orders = api.process_orders("2024-01-01", 0, 50).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].mp_order_number, "450789469");
        assert_eq!(orders[0].order_lines[0].unit_price, Money::from_cents(1999));
        let query = &api.transport.requests()[0].query;
        assert!(query.contains(&("status".to_string(), "open".to_string())));
        assert!(query.contains(&("financial_status".to_string(), "paid".to_string())));
        assert!(query.contains(&("since_id".to_string(), "0".to_string())));
    }
}
