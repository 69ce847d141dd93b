//! Order tracking messages and the view state they are folded into.
use serde::{Deserialize, Serialize};

/// Fulfilment status of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    InTransit,
    Delivered,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// Update pushed by the server for one order.
///
/// Only `order_id` is required; the other fields are set when they changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub order_id: String,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub estimated_delivery: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl OrderUpdate {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: None,
            location: None,
            estimated_delivery: None,
            message: None,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Tracking state of one order as shown to the user.
///
/// Usually seeded from the order fetched over REST, then kept current by applying pushed
/// [`OrderUpdate`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingView {
    pub order_id: String,
    pub status: Option<OrderStatus>,
    pub location: Option<String>,
    pub estimated_delivery: Option<String>,
    /// Applied updates, in arrival order.
    pub updates: Vec<OrderUpdate>,
}

impl TrackingView {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            ..Default::default()
        }
    }

    /// Fold an update into this view.
    ///
    /// Updates for other orders are ignored. An empty view adopts the order of the first update.
    /// Returns whether the update was applied.
    pub fn apply(&mut self, update: OrderUpdate) -> bool {
        if self.order_id.is_empty() {
            self.order_id = update.order_id.clone();
        } else if self.order_id != update.order_id {
            log::debug!(
                "ignoring update for order {} in view of order {}",
                update.order_id,
                self.order_id
            );
            return false;
        }
        if let Some(status) = update.status {
            self.status = Some(status);
        }
        if let Some(location) = &update.location {
            self.location = Some(location.clone());
        }
        if let Some(estimated_delivery) = &update.estimated_delivery {
            self.estimated_delivery = Some(estimated_delivery.clone());
        }
        self.updates.push(update);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_update_from_json() {
        let update: OrderUpdate = serde_json::from_value(json!({
            "orderId": "ord-7",
            "status": "in_transit",
            "estimatedDelivery": "2026-10-20",
        }))
        .unwrap();
        assert_eq!(update.order_id, "ord-7");
        assert_eq!(update.status, Some(OrderStatus::InTransit));
        assert_eq!(update.estimated_delivery.as_deref(), Some("2026-10-20"));
        assert_eq!(update.location, None);
    }

    #[test]
    fn unknown_status() {
        let update: OrderUpdate =
            serde_json::from_value(json!({"orderId": "ord-7", "status": "lost_at_sea"})).unwrap();
        assert_eq!(update.status, Some(OrderStatus::Unknown));
    }

    #[test]
    fn apply_merges_present_fields() {
        let mut view = TrackingView::new("ord-7");
        view.location = Some("Addis Ababa".into());
        assert!(view.apply(OrderUpdate::new("ord-7").with_status(OrderStatus::Shipped)));
        assert!(view.apply(OrderUpdate::new("ord-7").with_location("Frankfurt")));

        assert_eq!(view.status, Some(OrderStatus::Shipped));
        assert_eq!(view.location.as_deref(), Some("Frankfurt"));
        assert_eq!(view.updates.len(), 2);
    }

    #[test]
    fn apply_keeps_arrival_order() {
        let mut view = TrackingView::new("ord-7");
        view.apply(OrderUpdate::new("ord-7").with_status(OrderStatus::Delivered));
        view.apply(OrderUpdate::new("ord-7").with_status(OrderStatus::Shipped));
        assert_eq!(view.status, Some(OrderStatus::Shipped));
    }

    #[test]
    fn apply_ignores_other_orders() {
        let mut view = TrackingView::new("ord-7");
        assert!(!view.apply(OrderUpdate::new("ord-8").with_status(OrderStatus::Cancelled)));
        assert_eq!(view, TrackingView::new("ord-7"));
    }

    #[test]
    fn empty_view_adopts_order() {
        let mut view = TrackingView::default();
        assert!(view.apply(OrderUpdate::new("ord-9")));
        assert_eq!(view.order_id, "ord-9");
    }
}
