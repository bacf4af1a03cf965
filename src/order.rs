use chrono::{DateTime, Duration, Timelike, Utc};
use mongodb::bson::oid::ObjectId;
use rand::Rng;

use crate::error::ServiceError;
use crate::models::*;
use crate::status::{Actor, OrderStatus, TransitionPolicy};

// Agent's share of the delivery fee; the platform keeps the rest.
const AGENT_FEE_SHARE: f64 = 0.75;
// Free radius in km before the per-km distance bonus kicks in.
const FREE_DISTANCE_KM: f64 = 3.0;
const DISTANCE_BONUS_PER_KM: f64 = 5.0;
const HIGH_PRIORITY_BONUS: f64 = 15.0;
const URGENT_PRIORITY_BONUS: f64 = 30.0;
const PEAK_HOUR_BONUS: f64 = 10.0;

impl Order {
    pub fn new(req: NewOrder, now: DateTime<Utc>) -> Self {
        Order {
            id: ObjectId::new().to_hex(),
            order_number: generate_order_number(),
            customer: req.customer,
            restaurant: req.restaurant,
            items: req.items,
            pricing: req.pricing,
            delivery_info: req.delivery_info,
            status: StatusBlock {
                current: OrderStatus::Pending,
                timeline: Vec::new(),
            },
            assignment: Assignment::default(),
            payment: req.payment,
            earnings: None,
            feedback: None,
            tracking: Tracking::default(),
            cancellation: None,
            special_requests: req.special_requests,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // Rolled when an insert loses the unique-index race on order_number.
    pub fn regenerate_order_number(&mut self) {
        self.order_number = generate_order_number();
    }

    // Sets the current status and appends the matching timeline entry.
    // The timeline is append-only; entries are never edited or removed.
    // Under the permissive policy any status may follow any other and the
    // caller stays responsible for sequencing.
    pub fn update_status(
        &mut self,
        new_status: OrderStatus,
        location: Option<GeoPoint>,
        notes: &str,
        updated_by: Actor,
        policy: TransitionPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if !policy.check(self.status.current, new_status) {
            return Err(ServiceError::InvalidTransition {
                from: self.status.current,
                to: new_status,
            });
        }

        self.status.current = new_status;
        self.status.timeline.push(TimelineEntry {
            status: new_status,
            timestamp: now,
            location,
            notes: if notes.is_empty() { None } else { Some(notes.to_string()) },
            updated_by,
        });

        match new_status {
            OrderStatus::PickedUp => {
                self.assignment.picked_up_at = Some(now);
                if self.tracking.delivery_otp.is_none() {
                    self.tracking.delivery_otp = Some(generate_delivery_otp());
                }
            }
            OrderStatus::Delivered => {
                self.assignment.delivered_at = Some(now);
                self.assignment.actual_delivery_time = Some(now);
            }
            _ => {}
        }

        Ok(())
    }

    // Binds an agent to the order. Deliberately an idempotent overwrite:
    // dispatch may reassign a stalled order at any time.
    pub fn assign_agent(
        &mut self,
        agent_id: &str,
        policy: TransitionPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.assignment.delivery_agent = Some(agent_id.to_string());
        self.assignment.assigned_at = Some(now);
        self.assignment.estimated_delivery_time =
            Some(now + Duration::minutes(self.delivery_info.estimated_time));

        self.update_status(
            OrderStatus::Confirmed,
            None,
            "Order assigned to delivery agent",
            Actor::System,
            policy,
            now,
        )
    }

    pub fn accept_by_agent(
        &mut self,
        agent_id: &str,
        location: Option<GeoPoint>,
        policy: TransitionPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if self.assignment.delivery_agent.as_deref() != Some(agent_id) {
            return Err(ServiceError::Unauthorized(
                "Agent not authorized to accept this order".to_string(),
            ));
        }

        self.assignment.accepted_at = Some(now);
        self.update_status(
            OrderStatus::Preparing,
            location,
            "Order accepted by delivery agent",
            Actor::DeliveryAgent,
            policy,
            now,
        )
    }

    // Records the rejection and returns the order to the unassigned pool.
    // The rejection history is never purged.
    pub fn reject_by_agent(
        &mut self,
        agent_id: &str,
        reason: &str,
        policy: TransitionPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.assignment.rejected_by.push(Rejection {
            agent_id: agent_id.to_string(),
            rejected_at: now,
            reason: reason.to_string(),
        });
        self.assignment.delivery_agent = None;
        self.assignment.assigned_at = None;

        let notes = format!("Order rejected: {reason}");
        self.update_status(
            OrderStatus::Pending,
            None,
            &notes,
            Actor::DeliveryAgent,
            policy,
            now,
        )
    }

    // Computes the agent payout from the order's pricing and delivery
    // fields plus the clock passed in. The peak-hour bonus depends on the
    // hour of `at`, so the result is a snapshot, not idempotent. The
    // breakdown is stored on the order and also returned.
    pub fn calculate_agent_earnings(&mut self, at: DateTime<Utc>) -> EarningsBreakdown {
        let base_delivery_fee = self.pricing.delivery_fee * AGENT_FEE_SHARE;
        let tip = self.pricing.tip;

        let distance_bonus =
            (self.delivery_info.distance - FREE_DISTANCE_KM).max(0.0) * DISTANCE_BONUS_PER_KM;

        let priority_bonus = match self.delivery_info.priority {
            Priority::Normal => 0.0,
            Priority::High => HIGH_PRIORITY_BONUS,
            Priority::Urgent => URGENT_PRIORITY_BONUS,
        };

        let hour = at.hour();
        let time_bonus = if (12..=14).contains(&hour) || (19..=22).contains(&hour) {
            PEAK_HOUR_BONUS
        } else {
            0.0
        };

        let total = base_delivery_fee + tip + distance_bonus + priority_bonus + time_bonus;

        let breakdown = EarningsBreakdown {
            delivery_fee: base_delivery_fee,
            tip,
            distance_bonus,
            // The time bonus is folded in here rather than exposed as a
            // separate field.
            priority_bonus: priority_bonus + time_bonus,
            total,
        };

        self.earnings = Some(breakdown.clone());
        breakdown
    }

    // The canonical payload for delivery-agent clients. Earnings are
    // recomputed fresh; inactive special requests are dropped.
    pub fn delivery_summary(&mut self, at: DateTime<Utc>) -> DeliverySummary {
        let earnings = self.calculate_agent_earnings(at);

        DeliverySummary {
            order_number: self.order_number.clone(),
            customer: ContactSummary {
                name: self.customer.name.clone(),
                phone: self.customer.phone.clone(),
                address: self.customer.address.clone(),
            },
            restaurant: ContactSummary {
                name: self.restaurant.name.clone(),
                phone: self.restaurant.phone.clone(),
                address: self.restaurant.address.clone(),
            },
            items: self.items.clone(),
            total_amount: self.pricing.total_amount,
            delivery_info: self.delivery_info.clone(),
            earnings,
            status: self.status.current,
            special_requests: self
                .special_requests
                .iter()
                .filter(|req| req.is_active)
                .cloned()
                .collect(),
            delivery_otp: self.tracking.delivery_otp.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.current.is_terminal()
    }
}

fn generate_order_number() -> String {
    format!("GJD{}", rand::rng().random_range(100000..=999999))
}

fn generate_delivery_otp() -> String {
    rand::rng().random_range(1000..=9999).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn off_peak() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 26, 9, 0, 0).unwrap()
    }

    fn peak() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 26, 13, 0, 0).unwrap()
    }

    fn address() -> Address {
        Address {
            street: "12 Market Rd".to_string(),
            landmark: None,
            city: "Pune".to_string(),
            state: "MH".to_string(),
            zip_code: "411001".to_string(),
            coordinates: None,
        }
    }

    fn test_order() -> Order {
        Order::new(
            NewOrder {
                customer: CustomerSnapshot {
                    user_id: None,
                    name: "Asha".to_string(),
                    phone: "9000000001".to_string(),
                    email: None,
                    address: address(),
                },
                restaurant: RestaurantSnapshot {
                    merchant_id: None,
                    name: "Green Basket".to_string(),
                    phone: "9000000002".to_string(),
                    address: address(),
                },
                items: vec![OrderItem {
                    product_id: None,
                    name: "Rice 5kg".to_string(),
                    quantity: 1,
                    price: 400.0,
                    discounted_price: None,
                    image: None,
                    category: None,
                    special_instructions: None,
                }],
                pricing: Pricing {
                    items_total: 400.0,
                    discount: 0.0,
                    delivery_fee: 100.0,
                    platform_fee: 0.0,
                    tip: 20.0,
                    taxes: 0.0,
                    total_amount: 520.0,
                    coupon_code: None,
                    coupon_discount: 0.0,
                },
                delivery_info: DeliveryInfo {
                    estimated_time: 30,
                    distance: 5.0,
                    delivery_instructions: None,
                    priority: Priority::High,
                    delivery_slot: None,
                },
                payment: Payment {
                    method: PaymentMethod::Cash,
                    status: PaymentStatus::Pending,
                    transaction_id: None,
                    paid_at: None,
                },
                special_requests: Vec::new(),
            },
            off_peak(),
        )
    }

    #[test]
    fn new_order_starts_pending_and_unassigned() {
        let order = test_order();
        assert_eq!(order.status.current, OrderStatus::Pending);
        assert!(order.status.timeline.is_empty());
        assert!(order.assignment.delivery_agent.is_none());
        assert!(order.order_number.starts_with("GJD"));
        assert_eq!(order.order_number.len(), 9);
        assert_eq!(order.version, 0);
    }

    #[test]
    fn timeline_grows_by_one_per_update_and_tracks_current() {
        let mut order = test_order();
        let policy = TransitionPolicy::Permissive;
        let statuses = [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::PickedUp,
            OrderStatus::Delivered,
        ];

        for (i, status) in statuses.iter().enumerate() {
            order
                .update_status(*status, None, "", Actor::System, policy, off_peak())
                .unwrap();
            assert_eq!(order.status.timeline.len(), i + 1);
            assert_eq!(order.status.timeline.last().unwrap().status, order.status.current);
        }
    }

    #[test]
    fn delivery_otp_is_generated_exactly_once() {
        let mut order = test_order();
        let policy = TransitionPolicy::Permissive;

        order
            .update_status(OrderStatus::PickedUp, None, "", Actor::DeliveryAgent, policy, off_peak())
            .unwrap();
        let otp = order.tracking.delivery_otp.clone().expect("otp generated");
        assert_eq!(otp.len(), 4);
        assert!(otp.chars().all(|c| c.is_ascii_digit()));

        order
            .update_status(OrderStatus::PickedUp, None, "", Actor::DeliveryAgent, policy, off_peak())
            .unwrap();
        assert_eq!(order.tracking.delivery_otp.as_deref(), Some(otp.as_str()));
    }

    #[test]
    fn picked_up_and_delivered_stamp_assignment_timestamps() {
        let mut order = test_order();
        let policy = TransitionPolicy::Permissive;
        let now = off_peak();

        order
            .update_status(OrderStatus::PickedUp, None, "", Actor::DeliveryAgent, policy, now)
            .unwrap();
        assert_eq!(order.assignment.picked_up_at, Some(now));

        let later = now + Duration::minutes(25);
        order
            .update_status(OrderStatus::Delivered, None, "", Actor::DeliveryAgent, policy, later)
            .unwrap();
        assert_eq!(order.assignment.delivered_at, Some(later));
        assert_eq!(order.assignment.actual_delivery_time, Some(later));
    }

    #[test]
    fn assign_agent_confirms_and_sets_estimate() {
        let mut order = test_order();
        let now = off_peak();
        order.assign_agent("agent-1", TransitionPolicy::Permissive, now).unwrap();

        assert_eq!(order.assignment.delivery_agent.as_deref(), Some("agent-1"));
        assert_eq!(order.assignment.assigned_at, Some(now));
        assert_eq!(
            order.assignment.estimated_delivery_time,
            Some(now + Duration::minutes(30))
        );
        assert_eq!(order.status.current, OrderStatus::Confirmed);
        let entry = order.status.timeline.last().unwrap();
        assert_eq!(entry.updated_by, Actor::System);
        assert_eq!(entry.notes.as_deref(), Some("Order assigned to delivery agent"));
    }

    #[test]
    fn accept_by_wrong_agent_is_refused_and_leaves_order_unmodified() {
        let mut order = test_order();
        let policy = TransitionPolicy::Permissive;
        order.assign_agent("agent-y", policy, off_peak()).unwrap();
        let timeline_len = order.status.timeline.len();

        let err = order
            .accept_by_agent("agent-x", None, policy, off_peak())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        assert_eq!(err.to_string(), "Agent not authorized to accept this order");

        assert_eq!(order.status.current, OrderStatus::Confirmed);
        assert_eq!(order.status.timeline.len(), timeline_len);
        assert!(order.assignment.accepted_at.is_none());
        assert_eq!(order.assignment.delivery_agent.as_deref(), Some("agent-y"));
    }

    #[test]
    fn accept_by_assigned_agent_moves_to_preparing() {
        let mut order = test_order();
        let policy = TransitionPolicy::Permissive;
        let now = off_peak();
        order.assign_agent("agent-1", policy, now).unwrap();

        let here = GeoPoint { latitude: 18.52, longitude: 73.85 };
        order.accept_by_agent("agent-1", Some(here), policy, now).unwrap();

        assert_eq!(order.status.current, OrderStatus::Preparing);
        assert_eq!(order.assignment.accepted_at, Some(now));
        let entry = order.status.timeline.last().unwrap();
        assert_eq!(entry.updated_by, Actor::DeliveryAgent);
        assert_eq!(entry.location, Some(here));
    }

    #[test]
    fn rejection_preserves_history_across_reassignment() {
        let mut order = test_order();
        let policy = TransitionPolicy::Permissive;
        order.assign_agent("agent-a", policy, off_peak()).unwrap();
        order.reject_by_agent("agent-a", "too far", policy, off_peak()).unwrap();

        assert_eq!(order.status.current, OrderStatus::Pending);
        assert!(order.assignment.delivery_agent.is_none());
        assert!(order.assignment.assigned_at.is_none());
        assert_eq!(
            order.status.timeline.last().unwrap().notes.as_deref(),
            Some("Order rejected: too far")
        );

        order.assign_agent("agent-b", policy, off_peak()).unwrap();
        assert_eq!(order.assignment.delivery_agent.as_deref(), Some("agent-b"));
        assert_eq!(order.assignment.rejected_by.len(), 1);
        assert_eq!(order.assignment.rejected_by[0].agent_id, "agent-a");
        assert_eq!(order.assignment.rejected_by[0].reason, "too far");
    }

    #[test]
    fn earnings_formula_off_peak() {
        let mut order = test_order();
        let breakdown = order.calculate_agent_earnings(off_peak());

        assert_eq!(breakdown.delivery_fee, 75.0);
        assert_eq!(breakdown.tip, 20.0);
        assert_eq!(breakdown.distance_bonus, 10.0);
        assert_eq!(breakdown.priority_bonus, 15.0);
        assert_eq!(breakdown.total, 120.0);
        assert_eq!(order.earnings, Some(breakdown));
    }

    #[test]
    fn earnings_formula_adds_peak_hour_bonus() {
        let mut order = test_order();
        let breakdown = order.calculate_agent_earnings(peak());

        assert_eq!(breakdown.priority_bonus, 25.0);
        assert_eq!(breakdown.total, 130.0);
    }

    #[test]
    fn distance_bonus_is_zero_inside_free_radius() {
        let mut order = test_order();
        order.delivery_info.distance = 2.5;
        let breakdown = order.calculate_agent_earnings(off_peak());
        assert_eq!(breakdown.distance_bonus, 0.0);
    }

    #[test]
    fn delivery_summary_filters_inactive_special_requests() {
        let mut order = test_order();
        order.special_requests = vec![
            SpecialRequest {
                kind: "contactless".to_string(),
                description: None,
                is_active: true,
            },
            SpecialRequest {
                kind: "leave_at_door".to_string(),
                description: None,
                is_active: false,
            },
        ];
        order
            .update_status(
                OrderStatus::PickedUp,
                None,
                "",
                Actor::DeliveryAgent,
                TransitionPolicy::Permissive,
                off_peak(),
            )
            .unwrap();

        let summary = order.delivery_summary(off_peak());
        assert_eq!(summary.special_requests.len(), 1);
        assert_eq!(summary.special_requests[0].kind, "contactless");
        assert_eq!(summary.total_amount, 520.0);
        assert_eq!(summary.earnings.total, 120.0);
        assert!(summary.delivery_otp.is_some());
    }

    #[test]
    fn strict_policy_rejects_jump_and_leaves_order_unmodified() {
        let mut order = test_order();
        let err = order
            .update_status(
                OrderStatus::Delivered,
                None,
                "",
                Actor::Admin,
                TransitionPolicy::Strict,
                off_peak(),
            )
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidTransition { .. }));
        assert_eq!(order.status.current, OrderStatus::Pending);
        assert!(order.status.timeline.is_empty());
        assert!(order.assignment.delivered_at.is_none());
    }

    #[test]
    fn full_lifecycle_under_strict_policy() {
        let mut order = test_order();
        let policy = TransitionPolicy::Strict;
        let now = off_peak();

        order.assign_agent("agent-1", policy, now).unwrap();
        order.accept_by_agent("agent-1", None, policy, now).unwrap();
        order
            .update_status(OrderStatus::ReadyForPickup, None, "", Actor::Restaurant, policy, now)
            .unwrap();
        order
            .update_status(OrderStatus::PickedUp, None, "", Actor::DeliveryAgent, policy, now)
            .unwrap();
        order
            .update_status(OrderStatus::InTransit, None, "", Actor::DeliveryAgent, policy, now)
            .unwrap();
        order
            .update_status(OrderStatus::Delivered, None, "", Actor::DeliveryAgent, policy, now)
            .unwrap();

        assert!(order.is_terminal());
        assert_eq!(order.status.timeline.len(), 6);
        assert!(order.tracking.delivery_otp.is_some());
        assert!(order.assignment.delivered_at.is_some());
    }
}
