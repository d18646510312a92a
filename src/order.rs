//! Sell orders, their status channels and the order status state machine
use super::error::{LedgerError, LedgerResult};
use super::ledger::{StockLine, StockOp};
use super::types::{Money, Sku, TimeStamp, WarehouseId};
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Shipping,
    #[n(3)]
    Cancelled,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Completed,
    #[n(2)]
    PendingRefund,
    #[n(3)]
    Refunded,
    #[n(4)]
    Failed,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShippingStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Shipped,
    #[n(2)]
    Delivered,
    #[n(3)]
    Returned,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    #[n(0)]
    Order,
    #[n(1)]
    Payment,
    #[n(2)]
    Shipping,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Approved => "APPROVED",
            OrderStatus::Shipping => "SHIPPING",
            OrderStatus::Cancelled => "CANCELLED",
        })
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::PendingRefund => "PENDING_REFUND",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Failed => "FAILED",
        })
    }
}

impl fmt::Display for ShippingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShippingStatus::Pending => "PENDING",
            ShippingStatus::Shipped => "SHIPPED",
            ShippingStatus::Delivered => "DELIVERED",
            ShippingStatus::Returned => "RETURNED",
        })
    }
}

/// An allowed status edge and the ledger effect it carries per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub effect: Option<StockOp>,
    /// Completed payments move to PENDING_REFUND when this edge is taken.
    pub refunds_payment: bool,
}

const SETTLE: Option<StockOp> = Some(StockOp::Deduct {
    settle_reservation: true,
});

/// The complete order status table. Anything not listed is rejected.
pub static TRANSITIONS: [Transition; 6] = [
    Transition {
        from: OrderStatus::Pending,
        to: OrderStatus::Approved,
        effect: SETTLE,
        refunds_payment: false,
    },
    Transition {
        from: OrderStatus::Pending,
        to: OrderStatus::Shipping,
        effect: SETTLE,
        refunds_payment: false,
    },
    Transition {
        from: OrderStatus::Pending,
        to: OrderStatus::Cancelled,
        effect: Some(StockOp::Release),
        refunds_payment: false,
    },
    Transition {
        from: OrderStatus::Approved,
        to: OrderStatus::Shipping,
        effect: None,
        refunds_payment: false,
    },
    Transition {
        from: OrderStatus::Approved,
        to: OrderStatus::Cancelled,
        effect: Some(StockOp::Restore),
        refunds_payment: true,
    },
    Transition {
        from: OrderStatus::Shipping,
        to: OrderStatus::Cancelled,
        effect: Some(StockOp::Restore),
        refunds_payment: false,
    },
];

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::Shipping,
        OrderStatus::Cancelled,
    ];

    pub fn transition_to(self, next: OrderStatus) -> LedgerResult<&'static Transition> {
        TRANSITIONS
            .iter()
            .find(|t| t.from == self && t.to == next)
            .ok_or_else(|| LedgerError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
    }

    /// Effect of holding an item set in this status, starting from nothing.
    pub fn placement(self) -> Option<StockOp> {
        match self {
            OrderStatus::Pending => Some(StockOp::Reserve),
            OrderStatus::Approved | OrderStatus::Shipping => Some(StockOp::Deduct {
                settle_reservation: false,
            }),
            OrderStatus::Cancelled => None,
        }
    }

    /// Effect that undoes [`OrderStatus::placement`].
    pub fn reversal(self) -> Option<StockOp> {
        match self {
            OrderStatus::Pending => Some(StockOp::Release),
            OrderStatus::Approved | OrderStatus::Shipping => Some(StockOp::Restore),
            OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == OrderStatus::Cancelled
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    #[n(0)]
    pub sku: Sku,
    #[n(1)]
    pub warehouse_id: WarehouseId,
    #[n(2)]
    pub quantity: u64,
    #[n(3)]
    pub price: Money,
    #[n(4)]
    pub discount: Money,
    #[n(5)]
    pub subtotal: Money, // quantity * price - discount, never below zero
}

impl OrderItem {
    pub fn new(sku: &str, warehouse_id: &str, quantity: u64, price: Money) -> Self {
        Self {
            sku: sku.to_string(),
            warehouse_id: warehouse_id.to_string(),
            quantity,
            price,
            discount: Money::ZERO,
            subtotal: price.times(quantity),
        }
    }
    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount = discount;
        self.subtotal = net(self.price.times(self.quantity), discount);
        self
    }
    /// Recomputes `subtotal` from quantity, price and discount.
    pub fn priced(mut self) -> LedgerResult<Self> {
        let gross = self.price.checked_times(self.quantity).ok_or_else(|| {
            LedgerError::InvalidInput(format!("order item {} amount overflows", self.sku))
        })?;
        self.subtotal = net(gross, self.discount);
        Ok(self)
    }
    pub fn stock_line(&self) -> StockLine {
        StockLine::new(&self.sku, &self.warehouse_id, self.quantity)
    }
    pub fn validate(&self) -> LedgerResult<()> {
        if self.sku.trim().is_empty() || self.warehouse_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "order item needs a sku and a warehouse".into(),
            ));
        }
        if self.quantity == 0 {
            return Err(LedgerError::InvalidInput(format!(
                "order item {} has zero quantity",
                self.sku
            )));
        }
        if self.price.is_negative() || self.discount.is_negative() {
            return Err(LedgerError::InvalidInput(format!(
                "order item {} has a negative amount",
                self.sku
            )));
        }
        Ok(())
    }
}

fn net(gross: Money, discount: Money) -> Money {
    if discount > gross {
        Money::ZERO
    } else {
        gross - discount
    }
}

/// Validates an incoming item list and recomputes every subtotal. Callers'
/// subtotals are never trusted.
pub fn prepare_items(items: Vec<OrderItem>) -> LedgerResult<Vec<OrderItem>> {
    if items.is_empty() {
        return Err(LedgerError::InvalidInput("order has no items".into()));
    }
    let items = items
        .into_iter()
        .map(|item| {
            item.validate()?;
            item.priced()
        })
        .collect::<LedgerResult<Vec<_>>>()?;
    items
        .iter()
        .try_fold(Money::ZERO, |total, item| total.checked_add(item.subtotal))
        .ok_or_else(|| LedgerError::InvalidInput("order total overflows".into()))?;
    Ok(items)
}

pub fn stock_lines(items: &[OrderItem]) -> Vec<StockLine> {
    items.iter().map(OrderItem::stock_line).collect()
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    #[n(0)]
    pub timestamp: TimeStamp<Utc>,
    #[n(1)]
    pub actor: String,
    #[n(2)]
    pub status_type: StatusType,
    #[n(3)]
    pub old_status: String,
    #[n(4)]
    pub new_status: String,
}

impl StatusChange {
    pub fn new(actor: &str, status_type: StatusType, old: impl fmt::Display, new: impl fmt::Display) -> Self {
        Self {
            timestamp: TimeStamp::new(),
            actor: actor.to_string(),
            status_type,
            old_status: old.to_string(),
            new_status: new.to_string(),
        }
    }
}

/// Before/after view of the editable part of an order.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OrderSnapshot {
    #[n(0)]
    pub items: Vec<OrderItem>,
    #[n(1)]
    pub total: Money,
    #[n(2)]
    pub customer: Option<String>,
    #[n(3)]
    pub note: Option<String>,
}

impl OrderSnapshot {
    /// sha256 over the CBOR encoding of the item list
    pub fn digest(&self) -> LedgerResult<String> {
        let cbor = minicbor::to_vec(&self.items).map_err(|e| LedgerError::Encode(e.to_string()))?;
        Ok(sha256::digest(&cbor))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct EditEntry {
    #[n(0)]
    pub old_value: OrderSnapshot,
    #[n(1)]
    pub new_value: OrderSnapshot,
    #[n(2)]
    pub old_digest: String,
    #[n(3)]
    pub new_digest: String,
    #[n(4)]
    pub actor: String,
    #[n(5)]
    pub timestamp: TimeStamp<Utc>,
}

/// Caller-supplied order fields.
///
/// `transaction_id` and `initial_status` are only read on creation; edits take
/// `customer` and `note`. Payment and shipping move through their own channels
/// once the order exists.
#[derive(Debug, Clone)]
pub struct OrderMeta {
    pub transaction_id: Option<String>,
    pub initial_status: OrderStatus,
    pub customer: Option<String>,
    pub note: Option<String>,
    pub payment_status: PaymentStatus,
    pub shipping_status: ShippingStatus,
}

impl Default for OrderMeta {
    fn default() -> Self {
        Self {
            transaction_id: None,
            initial_status: OrderStatus::Pending,
            customer: None,
            note: None,
            payment_status: PaymentStatus::Pending,
            shipping_status: ShippingStatus::Pending,
        }
    }
}

impl OrderMeta {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_transaction_id(mut self, transaction_id: &str) -> Self {
        self.transaction_id = Some(transaction_id.to_string());
        self
    }
    pub fn set_initial_status(mut self, status: OrderStatus) -> Self {
        self.initial_status = status;
        self
    }
    pub fn set_customer(mut self, customer: &str) -> Self {
        self.customer = Some(customer.to_string());
        self
    }
    pub fn set_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
    pub fn set_payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_status = status;
        self
    }
    pub fn set_shipping_status(mut self, status: ShippingStatus) -> Self {
        self.shipping_status = status;
        self
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Order {
    #[n(0)]
    pub transaction_id: String,
    #[n(1)]
    pub status: OrderStatus,
    #[n(2)]
    pub items: Vec<OrderItem>,
    #[n(3)]
    pub total: Money,
    #[n(4)]
    pub customer: Option<String>,
    #[n(5)]
    pub note: Option<String>,
    #[n(6)]
    pub payment_status: PaymentStatus,
    #[n(7)]
    pub shipping_status: ShippingStatus,
    #[n(8)]
    pub status_history: Vec<StatusChange>, // append only
    #[n(9)]
    pub edit_history: Vec<EditEntry>, // append only
    #[n(10)]
    pub deleted: bool,
    #[n(11)]
    pub created_by: String,
    #[n(12)]
    pub created_date: TimeStamp<Utc>,
    #[n(13)]
    pub updated_by: String,
    #[n(14)]
    pub updated_date: TimeStamp<Utc>,
}

impl Order {
    pub fn new(transaction_id: String, items: Vec<OrderItem>, meta: &OrderMeta, actor: &str) -> Self {
        let now = TimeStamp::new();
        let total: Money = items.iter().map(|i| i.subtotal).sum();
        Self {
            transaction_id,
            status: meta.initial_status,
            items,
            total,
            customer: meta.customer.clone(),
            note: meta.note.clone(),
            payment_status: meta.payment_status,
            shipping_status: meta.shipping_status,
            status_history: vec![],
            edit_history: vec![],
            deleted: false,
            created_by: actor.to_string(),
            created_date: now.clone(),
            updated_by: actor.to_string(),
            updated_date: now,
        }
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            items: self.items.clone(),
            total: self.total,
            customer: self.customer.clone(),
            note: self.note.clone(),
        }
    }

    pub fn stock_lines(&self) -> Vec<StockLine> {
        stock_lines(&self.items)
    }

    pub fn skus(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.sku.as_str())
    }

    fn touch(&mut self, actor: &str) {
        self.updated_by = actor.to_string();
        self.updated_date = TimeStamp::new();
    }

    pub fn set_status(&mut self, next: OrderStatus, actor: &str) {
        self.status_history
            .push(StatusChange::new(actor, StatusType::Order, self.status, next));
        self.status = next;
        self.touch(actor);
    }

    pub fn set_payment_status(&mut self, next: PaymentStatus, actor: &str) {
        self.status_history.push(StatusChange::new(
            actor,
            StatusType::Payment,
            self.payment_status,
            next,
        ));
        self.payment_status = next;
        self.touch(actor);
    }

    pub fn set_shipping_status(&mut self, next: ShippingStatus, actor: &str) {
        self.status_history.push(StatusChange::new(
            actor,
            StatusType::Shipping,
            self.shipping_status,
            next,
        ));
        self.shipping_status = next;
        self.touch(actor);
    }

    /// Replaces the editable fields and appends the before/after snapshots to
    /// `edit_history`. Creation fields are left alone.
    pub fn replace_items(&mut self, items: Vec<OrderItem>, meta: &OrderMeta, actor: &str) -> LedgerResult<()> {
        let old_value = self.snapshot();
        self.total = items.iter().map(|i| i.subtotal).sum();
        self.items = items;
        self.customer = meta.customer.clone();
        self.note = meta.note.clone();
        let new_value = self.snapshot();

        self.edit_history.push(EditEntry {
            old_digest: old_value.digest()?,
            new_digest: new_value.digest()?,
            old_value,
            new_value,
            actor: actor.to_string(),
            timestamp: TimeStamp::new(),
        });
        self.touch(actor);
        Ok(())
    }
}
