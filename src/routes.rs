use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use log::warn;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::database::Db;
use crate::error::ServiceError;
use crate::models::{AgentLocation, Cancellation, GeoPoint, NewOrder, Order, PaymentStatus, RefundStatus};
use crate::status::{Actor, OrderStatus, TransitionPolicy};

pub struct AppState {
    pub db: Db,
    pub policy: TransitionPolicy,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/admin/orders", post(create_order).get(list_orders))
        .route("/api/admin/orders/{id}", get(get_order))
        .route("/api/admin/orders/{id}/status", put(admin_update_status))
        .route("/api/admin/orders/{id}/assign", post(assign_agent))
        .route("/api/admin/orders/{id}/cancel", put(cancel_order))
        .route("/api/delivery/orders/available", get(available_orders))
        .route("/api/delivery/orders/active", get(active_orders))
        .route("/api/delivery/orders/history", get(order_history))
        .route("/api/delivery/orders/{id}/accept", post(accept_order))
        .route("/api/delivery/orders/{id}/reject", post(reject_order))
        .route("/api/delivery/orders/{id}/status", put(agent_update_status))
        .route("/api/delivery/orders/{id}/summary", get(order_summary))
        .route("/api/delivery/orders/{id}/location", put(update_location))
        .route("/api/delivery/earnings", get(earnings_summary))
        .with_state(state)
}

// Applies a status change and persists it. A first transition into
// `delivered` also computes the payout and credits the assigned agent's
// aggregate stats, in the same transaction as the order write.
async fn apply_status_change(
    state: &AppState,
    order: &mut Order,
    new_status: OrderStatus,
    location: Option<GeoPoint>,
    notes: &str,
    actor: Actor,
) -> Result<(), ServiceError> {
    let was_delivered = order.status.current == OrderStatus::Delivered;
    let now = Utc::now();
    order.update_status(new_status, location, notes, actor, state.policy, now)?;

    if new_status == OrderStatus::Delivered && !was_delivered {
        if let Some(agent_id) = order.assignment.delivery_agent.clone() {
            let earnings = order.calculate_agent_earnings(now);
            return state
                .db
                .complete_delivery(order, &agent_id, earnings.total, now)
                .await;
        }
        warn!("order {} delivered without an assigned agent", order.order_number);
    }

    state.db.persist(order, now).await
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewOrder>,
) -> Result<Json<Value>, ServiceError> {
    if req.items.is_empty() {
        return Err(ServiceError::Validation(
            "order must contain at least one item".to_string(),
        ));
    }
    if req.items.iter().any(|item| item.quantity < 1) {
        return Err(ServiceError::Validation(
            "item quantity must be at least 1".to_string(),
        ));
    }

    let now = Utc::now();
    let mut order = Order::new(req, now);

    // The 6-digit suffix can collide; the unique index reports it and we
    // re-roll a couple of times before giving up.
    let mut attempts = 0;
    loop {
        match state.db.insert_order(&order).await {
            Ok(()) => break,
            Err(err) if Db::is_duplicate_key(&err) && attempts < 2 => {
                warn!("order number {} already taken, regenerating", order.order_number);
                order.regenerate_order_number();
                attempts += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(Json(json!({
        "success": true,
        "message": "Order created successfully",
        "order": order,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListOrdersQuery {
    status: Option<OrderStatus>,
    payment_status: Option<PaymentStatus>,
    limit: Option<i64>,
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Value>, ServiceError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let orders = state
        .db
        .list_orders(query.status, query.payment_status, limit)
        .await?;

    Ok(Json(json!({ "success": true, "orders": orders })))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    let order = state.db.get_order(&id).await?;
    Ok(Json(json!({ "success": true, "order": order })))
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: OrderStatus,
    notes: Option<String>,
}

async fn admin_update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, ServiceError> {
    let mut order = state.db.get_order(&id).await?;
    apply_status_change(
        &state,
        &mut order,
        req.status,
        None,
        req.notes.as_deref().unwrap_or(""),
        Actor::Admin,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Order status updated successfully",
        "order": order,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignRequest {
    agent_id: String,
}

async fn assign_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<Value>, ServiceError> {
    // Reject assignments to unknown agents before touching the order.
    let agent = state.db.get_agent(&req.agent_id).await?;

    let mut order = state.db.get_order(&id).await?;
    let now = Utc::now();
    order.assign_agent(&agent.id, state.policy, now)?;
    state.db.persist(&mut order, now).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Delivery agent assigned successfully",
        "order": order,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    reason: String,
    refund_amount: Option<f64>,
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Value>, ServiceError> {
    let mut order = state.db.get_order(&id).await?;
    let now = Utc::now();
    let notes = format!("Cancelled by admin: {}", req.reason);

    order.update_status(
        OrderStatus::Cancelled,
        None,
        &notes,
        Actor::Admin,
        state.policy,
        now,
    )?;
    order.cancellation = Some(Cancellation {
        reason: req.reason,
        cancelled_by: Actor::Admin,
        cancelled_at: now,
        refund_amount: req.refund_amount.unwrap_or(0.0),
        refund_status: RefundStatus::Pending,
    });
    state.db.persist(&mut order, now).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Order cancelled successfully",
        "order": order,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailableOrdersQuery {
    #[allow(dead_code)]
    latitude: Option<f64>,
    #[allow(dead_code)]
    longitude: Option<f64>,
    #[allow(dead_code)]
    max_distance: Option<f64>,
}

// Agent location and radius are accepted for API compatibility but not
// yet applied as a filter; every pending unassigned order is offered.
// TODO: filter by haversine distance once restaurant coordinates are
// reliably populated at order creation.
async fn available_orders(
    State(state): State<Arc<AppState>>,
    Query(_query): Query<AvailableOrdersQuery>,
) -> Result<Json<Value>, ServiceError> {
    let orders = state.db.find_available_orders().await?;
    Ok(Json(json!({ "success": true, "orders": orders })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentQuery {
    agent_id: String,
    limit: Option<i64>,
}

async fn active_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AgentQuery>,
) -> Result<Json<Value>, ServiceError> {
    let orders = state.db.agent_active_orders(&query.agent_id).await?;
    Ok(Json(json!({ "success": true, "orders": orders })))
}

async fn order_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AgentQuery>,
) -> Result<Json<Value>, ServiceError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let orders = state.db.agent_order_history(&query.agent_id, limit).await?;
    Ok(Json(json!({ "success": true, "orders": orders })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptRequest {
    agent_id: String,
    location: Option<GeoPoint>,
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AcceptRequest>,
) -> Result<Json<Value>, ServiceError> {
    let mut order = state.db.get_order(&id).await?;
    let now = Utc::now();
    order.accept_by_agent(&req.agent_id, req.location, state.policy, now)?;
    state.db.persist(&mut order, now).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Order accepted",
        "order": order,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectRequest {
    agent_id: String,
    #[serde(default)]
    reason: String,
}

async fn reject_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<Value>, ServiceError> {
    let mut order = state.db.get_order(&id).await?;
    let now = Utc::now();
    order.reject_by_agent(&req.agent_id, &req.reason, state.policy, now)?;
    state.db.persist(&mut order, now).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Order rejected",
        "order": order,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentStatusRequest {
    agent_id: String,
    status: OrderStatus,
    location: Option<GeoPoint>,
    notes: Option<String>,
}

async fn agent_update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AgentStatusRequest>,
) -> Result<Json<Value>, ServiceError> {
    let mut order = state.db.get_order(&id).await?;
    if order.assignment.delivery_agent.as_deref() != Some(req.agent_id.as_str()) {
        return Err(ServiceError::Unauthorized(
            "Agent not authorized to update this order".to_string(),
        ));
    }

    apply_status_change(
        &state,
        &mut order,
        req.status,
        req.location,
        req.notes.as_deref().unwrap_or(""),
        Actor::DeliveryAgent,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Order status updated successfully",
        "order": order,
    })))
}

async fn order_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    let mut order = state.db.get_order(&id).await?;
    // The earnings inside the summary are a fresh snapshot; the summary
    // itself is never persisted.
    let summary = order.delivery_summary(Utc::now());

    Ok(Json(json!({ "success": true, "summary": summary })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationRequest {
    agent_id: String,
    latitude: f64,
    longitude: f64,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<LocationRequest>,
) -> Result<Json<Value>, ServiceError> {
    let mut order = state.db.get_order(&id).await?;
    if order.assignment.delivery_agent.as_deref() != Some(req.agent_id.as_str()) {
        return Err(ServiceError::Unauthorized(
            "Agent not authorized to update this order".to_string(),
        ));
    }

    let now = Utc::now();
    order.tracking.agent_location = Some(AgentLocation {
        latitude: req.latitude,
        longitude: req.longitude,
        last_updated: now,
    });
    state.db.persist(&mut order, now).await?;
    state
        .db
        .update_agent_location(&req.agent_id, req.latitude, req.longitude, now)
        .await?;

    Ok(Json(json!({ "success": true, "message": "Location updated" })))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EarningsPeriod {
    Today,
    Week,
    Month,
}

impl EarningsPeriod {
    fn as_str(&self) -> &'static str {
        match self {
            EarningsPeriod::Today => "today",
            EarningsPeriod::Week => "week",
            EarningsPeriod::Month => "month",
        }
    }

    fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            EarningsPeriod::Today => Utc
                .from_utc_datetime(&now.date_naive().and_hms_opt(0, 0, 0).unwrap()),
            EarningsPeriod::Week => now - Duration::days(7),
            EarningsPeriod::Month => Utc.from_utc_datetime(
                &now.date_naive()
                    .with_day(1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EarningsQuery {
    agent_id: String,
    period: EarningsPeriod,
}

async fn earnings_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EarningsQuery>,
) -> Result<Json<Value>, ServiceError> {
    let since = query.period.since(Utc::now());
    let (total, deliveries) = state.db.agent_earnings_since(&query.agent_id, since).await?;

    Ok(Json(json!({
        "success": true,
        "earnings": {
            "period": query.period.as_str(),
            "total": total,
            "deliveries": deliveries,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earnings_periods_start_where_expected() {
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 15, 30, 0).unwrap();

        assert_eq!(
            EarningsPeriod::Today.since(now),
            Utc.with_ymd_and_hms(2026, 8, 26, 0, 0, 0).unwrap()
        );
        assert_eq!(
            EarningsPeriod::Week.since(now),
            Utc.with_ymd_and_hms(2026, 8, 19, 15, 30, 0).unwrap()
        );
        assert_eq!(
            EarningsPeriod::Month.since(now),
            Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
        );
    }
}
