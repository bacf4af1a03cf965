use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::{info, warn};
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};

use crate::error::ServiceError;
use crate::models::{DeliveryAgent, Order, PaymentStatus};
use crate::status::OrderStatus;

const AVAILABLE_ORDERS_CAP: i64 = 10;

#[derive(Debug, Clone)]
pub struct Db {
    client: Client,
    orders: Collection<Order>,
    agents: Collection<DeliveryAgent>,
}

impl Db {
    pub fn new(client: Client, db_name: &str) -> Self {
        let db = client.database(db_name);
        Db {
            orders: db.collection("orders"),
            agents: db.collection("agents"),
            client,
        }
    }

    // orderNumber carries a unique index so a random-suffix collision
    // surfaces as a duplicate-key write error the caller can retry.
    pub async fn ensure_indexes(&self) -> Result<(), ServiceError> {
        let unique = IndexOptions::builder().unique(true).build();
        self.orders
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "orderNumber": 1 })
                    .options(unique)
                    .build(),
            )
            .await?;
        self.orders
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "status.current": 1, "createdAt": -1 })
                    .build(),
            )
            .await?;
        self.orders
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "assignment.deliveryAgent": 1, "status.current": 1 })
                    .build(),
            )
            .await?;

        info!("order indexes ensured");
        Ok(())
    }

    pub async fn insert_order(&self, order: &Order) -> Result<(), mongodb::error::Error> {
        self.orders.insert_one(order).await?;
        Ok(())
    }

    pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
        match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(write_err)) => write_err.code == 11000,
            _ => false,
        }
    }

    pub async fn get_order(&self, id: &str) -> Result<Order, ServiceError> {
        self.orders
            .find_one(doc! { "_id": id })
            .await?
            .ok_or(ServiceError::OrderNotFound)
    }

    // Compare-and-swap write: the replace only matches if nobody else
    // persisted the order since we read it. A lost race is a conflict,
    // never a silent last-write-wins.
    pub async fn persist(&self, order: &mut Order, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let expected = order.version;
        order.version += 1;
        order.updated_at = now;

        let result = self
            .orders
            .replace_one(doc! { "_id": &order.id, "version": expected }, &*order)
            .await?;
        if result.matched_count == 0 {
            return Err(ServiceError::WriteConflict);
        }
        Ok(())
    }

    // Persists the delivered order and bumps the agent's aggregate stats
    // in one transaction, so a crash cannot leave the order delivered
    // without the matching agent credit or vice versa.
    pub async fn complete_delivery(
        &self,
        order: &mut Order,
        agent_id: &str,
        earnings_total: f64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let expected = order.version;
        order.version += 1;
        order.updated_at = now;

        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        let result = self
            .orders
            .replace_one(doc! { "_id": &order.id, "version": expected }, &*order)
            .session(&mut session)
            .await?;
        if result.matched_count == 0 {
            if let Err(err) = session.abort_transaction().await {
                warn!("failed to abort delivery transaction: {err}");
            }
            return Err(ServiceError::WriteConflict);
        }

        self.agents
            .update_one(
                doc! { "_id": agent_id },
                Self::agent_completion_update(earnings_total),
            )
            .session(&mut session)
            .await?;

        session.commit_transaction().await?;
        Ok(())
    }

    // The stat bump applied to an agent for one completed delivery.
    pub fn agent_completion_update(earnings_total: f64) -> Document {
        doc! {
            "$inc": {
                "status.totalDeliveries": 1_i64,
                "status.completedDeliveries": 1_i64,
                "status.earnings.total": earnings_total,
                "status.earnings.thisMonth": earnings_total,
            }
        }
    }

    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        payment_status: Option<PaymentStatus>,
        limit: i64,
    ) -> Result<Vec<Order>, ServiceError> {
        let mut filter = doc! {};
        if let Some(status) = status {
            filter.insert("status.current", status.as_str());
        }
        if let Some(payment_status) = payment_status {
            filter.insert("payment.status", payment_status.as_str());
        }

        let orders = self
            .orders
            .find(filter)
            .sort(doc! { "createdAt": -1 })
            .limit(limit)
            .await?
            .try_collect()
            .await?;
        Ok(orders)
    }

    // Pending, unassigned orders, oldest first, capped at 10.
    pub async fn find_available_orders(&self) -> Result<Vec<Order>, ServiceError> {
        let orders = self
            .orders
            .find(doc! {
                "status.current": OrderStatus::Pending.as_str(),
                "assignment.deliveryAgent": Bson::Null,
            })
            .sort(doc! { "createdAt": 1 })
            .limit(AVAILABLE_ORDERS_CAP)
            .await?
            .try_collect()
            .await?;
        Ok(orders)
    }

    pub async fn agent_active_orders(&self, agent_id: &str) -> Result<Vec<Order>, ServiceError> {
        let active = vec![
            OrderStatus::Confirmed.as_str(),
            OrderStatus::Preparing.as_str(),
            OrderStatus::ReadyForPickup.as_str(),
            OrderStatus::PickedUp.as_str(),
            OrderStatus::InTransit.as_str(),
        ];

        let orders = self
            .orders
            .find(doc! {
                "assignment.deliveryAgent": agent_id,
                "status.current": { "$in": active },
            })
            .sort(doc! { "assignment.acceptedAt": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(orders)
    }

    pub async fn agent_order_history(
        &self,
        agent_id: &str,
        limit: i64,
    ) -> Result<Vec<Order>, ServiceError> {
        let terminal = vec![OrderStatus::Delivered.as_str(), OrderStatus::Cancelled.as_str()];

        let orders = self
            .orders
            .find(doc! {
                "assignment.deliveryAgent": agent_id,
                "status.current": { "$in": terminal },
            })
            .sort(doc! { "assignment.deliveredAt": -1, "createdAt": -1 })
            .limit(limit)
            .await?
            .try_collect()
            .await?;
        Ok(orders)
    }

    // Sum of stored earnings over the agent's orders delivered since the
    // given instant. Returns (total, delivery count).
    pub async fn agent_earnings_since(
        &self,
        agent_id: &str,
        since: DateTime<Utc>,
    ) -> Result<(f64, u64), ServiceError> {
        let delivered: Vec<Order> = self
            .orders
            .find(doc! {
                "assignment.deliveryAgent": agent_id,
                "status.current": OrderStatus::Delivered.as_str(),
            })
            .await?
            .try_collect()
            .await?;

        let mut total = 0.0;
        let mut count = 0;
        for order in &delivered {
            let Some(delivered_at) = order.assignment.delivered_at else {
                continue;
            };
            if delivered_at >= since {
                total += order.earnings.as_ref().map_or(0.0, |e| e.total);
                count += 1;
            }
        }
        Ok((total, count))
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<DeliveryAgent, ServiceError> {
        self.agents
            .find_one(doc! { "_id": agent_id })
            .await?
            .ok_or(ServiceError::AgentNotFound)
    }

    pub async fn update_agent_location(
        &self,
        agent_id: &str,
        latitude: f64,
        longitude: f64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.agents
            .update_one(
                doc! { "_id": agent_id },
                doc! { "$set": {
                    "status.currentLocation": {
                        "latitude": latitude,
                        "longitude": longitude,
                        "lastUpdated": now.to_rfc3339(),
                    }
                }},
            )
            .await?;
        Ok(())
    }
}
