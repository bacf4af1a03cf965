use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    ReadyForPickup,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    // No further transitions are expected out of a terminal state; only
    // post-delivery feedback fields may still change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    // The expected forward edges of the lifecycle. `confirmed -> pending`
    // is the rejection edge: a declined order goes back to the pool.
    pub fn allowed_next(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Pending, Preparing, Cancelled],
            Preparing => &[ReadyForPickup, PickedUp, Cancelled],
            ReadyForPickup => &[PickedUp, Cancelled],
            PickedUp => &[InTransit, Delivered, Cancelled],
            InTransit => &[Delivered, Cancelled],
            Delivered => &[],
            Cancelled => &[],
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Who performed a mutation. Recorded on every timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Customer,
    Restaurant,
    DeliveryAgent,
    Admin,
    System,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Customer => "customer",
            Actor::Restaurant => "restaurant",
            Actor::DeliveryAgent => "delivery_agent",
            Actor::Admin => "admin",
            Actor::System => "system",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// How strictly the transition table is enforced. Permissive keeps the
// historical behavior: any status may follow any other, off-table edges
// are only logged. Strict turns an off-table edge into an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    #[default]
    Permissive,
    Strict,
}

impl TransitionPolicy {
    // Returns whether the transition may proceed. Callers sequencing a
    // permissive deployment stay responsible for sensible ordering.
    pub fn check(&self, from: OrderStatus, to: OrderStatus) -> bool {
        if from.allowed_next().contains(&to) {
            return true;
        }
        match self {
            TransitionPolicy::Permissive => {
                warn!("off-table status transition {from} -> {to} allowed by permissive policy");
                true
            }
            TransitionPolicy::Strict => false,
        }
    }
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permissive" => Ok(TransitionPolicy::Permissive),
            "strict" => Ok(TransitionPolicy::Strict),
            other => Err(format!("unknown transition policy: {other}")),
        }
    }
}
