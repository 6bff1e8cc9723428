mod api;
mod batch;
mod cancellations;
mod canonical;
mod config;
mod error;
mod fulfillments;
mod normalize;
mod outbound;
mod refunds;
mod scanner;
mod shopify_order;

pub mod helpers;

pub use api::{
    ActionOutcome,
    HttpTransport,
    OrderStatus,
    OrderStatusReport,
    PlacementResult,
    PlacementStatus,
    PlatformRequest,
    PlatformResponse,
    ShopifyApi,
    ShopifyTransport,
};
pub use batch::{aggregate_orders_from_csv, BatchOutput, ReportEntry, Severity, PLACEMENT_FIELDS, PLACEMENT_REQUIRED_FIELDS};
pub use cancellations::{cancellation_groups, cancelled_line_map, order_contains_cancellations, CancellationGroup, CancellationLine, CancelledLine};
pub use canonical::{CancellationReason, Cancellation, CanonicalOrder, Fulfillment, OrderActionRequest, OrderLine};
pub use config::{PlaceOrderConfig, ShopifyConfig, SourceNameFormat, MARKETPLACE_FULFILL_PLACEHOLDER};
pub use error::{BatchError, ScanError, ShopifyApiError};
pub use fulfillments::{fulfillment_ledger, shipment_groups, LineFulfillments, ShipmentGroup, ShipmentLine, READY_FULFILLMENT_STATUSES};
pub use normalize::normalize_order;
pub use outbound::build_place_order_payload;
pub use refunds::{build_refund_requests, refund_candidates, ReconciliationWarning, RefundBuild, RefundCandidate};
pub use scanner::{extract_next_page_params, rate_limit_wait, PageCursor, RefundScan, FINANCIAL_STATUSES};
pub use shopify_order::{
    Address,
    DiscountApplication,
    FulfillmentOrder,
    LineItem,
    NoteAttribute,
    OrderAdjustment,
    OrderFulfillment,
    Refund,
    RefundLineItem,
    ShopifyOrder,
    Transaction,
};
