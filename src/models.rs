use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{Actor, OrderStatus};

// Order is the central document of the service. Customer and restaurant
// details are snapshots taken at order time, not live references, so the
// record stays accurate even if the referenced entities change later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub order_number: String,
    pub customer: CustomerSnapshot,
    pub restaurant: RestaurantSnapshot,
    pub items: Vec<OrderItem>,
    pub pricing: Pricing,
    pub delivery_info: DeliveryInfo,
    pub status: StatusBlock,
    #[serde(default)]
    pub assignment: Assignment,
    pub payment: Payment,
    pub earnings: Option<EarningsBreakdown>,
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub tracking: Tracking,
    pub cancellation: Option<Cancellation>,
    #[serde(default)]
    pub special_requests: Vec<SpecialRequest>,
    // Monotonic counter, checked and incremented on every persist.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSnapshot {
    pub user_id: Option<String>,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantSnapshot {
    pub merchant_id: Option<String>,
    pub name: String,
    pub phone: String,
    pub address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub landmark: Option<String>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub coordinates: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

// Denormalized copy of the purchased product, not a live join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub price: f64,
    pub discounted_price: Option<f64>,
    pub image: Option<String>,
    pub category: Option<String>,
    pub special_instructions: Option<String>,
}

// total_amount is the settled amount decided by the order creator. The
// service never recomputes it from the line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub items_total: f64,
    #[serde(default)]
    pub discount: f64,
    pub delivery_fee: f64,
    #[serde(default)]
    pub platform_fee: f64,
    #[serde(default)]
    pub tip: f64,
    #[serde(default)]
    pub taxes: f64,
    pub total_amount: f64,
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub coupon_discount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryInfo {
    // Estimated delivery time in minutes.
    pub estimated_time: i64,
    // Distance in kilometers.
    pub distance: f64,
    pub delivery_instructions: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub delivery_slot: Option<DeliverySlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBlock {
    pub current: OrderStatus,
    // Append-only. Entries are never edited or removed; the last entry
    // always matches `current` once a transition has occurred.
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub notes: Option<String>,
    pub updated_by: Actor,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub delivery_agent: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    // Every agent who declined this order, kept forever for audit and so
    // the same agent is not offered the order again.
    #[serde(default)]
    pub rejected_by: Vec<Rejection>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub actual_delivery_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub agent_id: String,
    pub rejected_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub method: PaymentMethod,
    #[serde(default)]
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Wallet,
    Upi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

// Derived payout breakdown for the assigned agent. Recomputed on demand;
// the peak-hour time bonus is folded into priority_bonus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsBreakdown {
    pub delivery_fee: f64,
    pub tip: f64,
    pub distance_bonus: f64,
    pub priority_bonus: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracking {
    pub agent_location: Option<AgentLocation>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    // 4-digit code generated exactly once, on the transition to picked_up.
    #[serde(rename = "deliveryOTP")]
    pub delivery_otp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_by: Actor,
    pub cancelled_at: DateTime<Utc>,
    #[serde(default)]
    pub refund_amount: f64,
    #[serde(default)]
    pub refund_status: RefundStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[default]
    Pending,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialRequest {
    // e.g. "contactless", "leave_at_door"
    #[serde(rename = "type")]
    pub kind: String,
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub delivery_rating: Option<u8>,
    pub delivery_comment: Option<String>,
    pub food_rating: Option<u8>,
    pub food_comment: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

// DeliveryAgent is owned by the agent-management service; this service only
// reads it and increments its aggregate stats when an order is delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAgent {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub phone: String,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub is_active: bool,
    pub is_online: bool,
    pub current_location: Option<AgentLocation>,
    pub rating: f64,
    pub total_deliveries: i64,
    pub completed_deliveries: i64,
    #[serde(default)]
    pub earnings: AgentEarnings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEarnings {
    pub total: f64,
    pub this_month: f64,
    pub last_payout: Option<DateTime<Utc>>,
}

// Read-only view returned to delivery-agent clients. Assembled on demand,
// never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySummary {
    pub order_number: String,
    pub customer: ContactSummary,
    pub restaurant: ContactSummary,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub delivery_info: DeliveryInfo,
    pub earnings: EarningsBreakdown,
    pub status: OrderStatus,
    pub special_requests: Vec<SpecialRequest>,
    #[serde(rename = "deliveryOTP")]
    pub delivery_otp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub name: String,
    pub phone: String,
    pub address: Address,
}

// Payload accepted from the order-creation collaborator. Pricing is taken
// as-is; validating it is the creator's responsibility.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub customer: CustomerSnapshot,
    pub restaurant: RestaurantSnapshot,
    pub items: Vec<OrderItem>,
    pub pricing: Pricing,
    pub delivery_info: DeliveryInfo,
    pub payment: Payment,
    #[serde(default)]
    pub special_requests: Vec<SpecialRequest>,
}
