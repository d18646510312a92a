//! Service layer API: product registry and the sell order lifecycle
//!
//! Every mutating call is one unit of work: read every record it needs,
//! validate, stage the ledger effects, then write products and the order
//! together. Nothing is written when any check fails.
use super::config::{AverageCostPolicy, LedgerConfig};
use super::error::{LedgerError, LedgerResult};
use super::ledger::LedgerBatch;
use super::order::{
    Order, OrderItem, OrderMeta, OrderStatus, PaymentStatus, ShippingStatus, prepare_items,
    stock_lines,
};
use super::product::{Price, Product, ProductStatus};
use super::sequence::IdReservation;
use super::store::{Store, UnitOfWork};
use super::telemetry;
use super::transaction::{TransactionRecord, TransactionType};
use super::types::{Sku, TimeStamp, WarehouseId};
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Business rules that vary per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub allow_shipping_edits: bool,
    pub average_cost: AverageCostPolicy,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_shipping_edits: true,
            average_cost: AverageCostPolicy::ExcludeReplaced,
        }
    }
}

impl From<&LedgerConfig> for Policy {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            allow_shipping_edits: config.allow_shipping_edits,
            average_cost: config.average_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedOrder {
    pub id: String,
    pub deleted: bool,
}

/// A (sku, warehouse) whose reserved quantity disagrees with open orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDrift {
    pub sku: Sku,
    pub warehouse: WarehouseId,
    pub recorded: u64,
    pub expected: u64,
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn load_order(uow: &UnitOfWork<'_>, transaction_id: &str) -> LedgerResult<Order> {
    uow.get_record(transaction_id)?
        .and_then(TransactionRecord::into_order)
        .ok_or_else(|| LedgerError::not_found("order", transaction_id))
}

#[derive(Clone)]
pub struct InventoryService {
    pub(crate) store: Store,
    pub(crate) policy: Policy,
}

impl InventoryService {
    pub fn new(instance: Arc<sled::Db>) -> LedgerResult<Self> {
        Ok(Self {
            store: Store::new(instance)?,
            policy: Policy::default(),
        })
    }

    pub fn with_config(instance: Arc<sled::Db>, config: &LedgerConfig) -> LedgerResult<Self> {
        Ok(Self {
            store: Store::new(instance)?.with_max_retries(config.max_retries),
            policy: Policy::from(config),
        })
    }

    /// Installs tracing and opens the store described by `config`.
    pub fn open(config: &LedgerConfig) -> anyhow::Result<Self> {
        telemetry::init_tracing(&config.log_level, config.log_format);
        let db = config
            .open_db()
            .with_context(|| format!("failed to open ledger store at {}", config.db_path.display()))?;
        let service = Self::with_config(Arc::new(db), config)?;
        tracing::info!(
            temporary = config.temporary,
            max_retries = config.max_retries,
            "inventory service ready"
        );
        Ok(service)
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    // ========== Products ==========

    pub fn register_product(&self, product: Product) -> LedgerResult<Product> {
        product.validate()?;
        self.store.unit_of_work(|uow| {
            if uow.get_product(&product.sku)?.is_some() {
                return Err(LedgerError::DuplicateId(product.sku.clone()));
            }
            uow.put_product(&product)?;
            Ok(())
        })?;
        tracing::info!(sku = %product.sku, warehouses = product.warehouse.len(), "product registered");
        Ok(product)
    }

    pub fn get_product(&self, sku: &str) -> LedgerResult<Product> {
        self.store
            .product(sku)?
            .ok_or_else(|| LedgerError::not_found("product", sku))
    }

    /// Updates descriptive fields only. The ledger fields are left untouched.
    pub fn update_product_details(
        &self,
        sku: &str,
        name: &str,
        category: &str,
        price: Price,
    ) -> LedgerResult<Product> {
        self.store.unit_of_work(|uow| {
            let mut product = uow
                .get_product(sku)?
                .ok_or_else(|| LedgerError::not_found("product", sku))?;
            product.name = name.to_string();
            product.category = category.to_string();
            product.price = price.clone();
            product.updated_date = TimeStamp::new();
            product.validate()?;
            uow.put_product(&product)?;
            Ok(product)
        })
    }

    /// Marks a product DELETED. Refused while any of its stock is reserved.
    pub fn soft_delete_product(&self, sku: &str) -> LedgerResult<Product> {
        let product = self.store.unit_of_work(|uow| {
            let mut product = uow
                .get_product(sku)?
                .ok_or_else(|| LedgerError::not_found("product", sku))?;
            let reserved = product.total_reserved()?;
            if reserved > 0 {
                return Err(LedgerError::InvalidInput(format!(
                    "product {sku} still has {reserved} units reserved"
                )));
            }
            product.status = ProductStatus::Deleted;
            product.updated_date = TimeStamp::new();
            uow.put_product(&product)?;
            Ok(product)
        })?;
        tracing::info!(sku, "product soft deleted");
        Ok(product)
    }

    // ========== Transaction ids ==========

    /// Issues and reserves the next id of `family`.
    pub fn generate_transaction_id(&self, family: TransactionType) -> LedgerResult<String> {
        let date = today();
        self.store.unit_of_work(|uow| {
            let reservation = IdReservation::prepare(uow, family, None, date)?;
            reservation.claim(uow)?;
            Ok(reservation.transaction_id)
        })
    }

    // ========== Orders ==========

    #[tracing::instrument(skip(self, items, meta), fields(item_count = items.len()))]
    pub fn create_order(
        &self,
        items: Vec<OrderItem>,
        meta: OrderMeta,
        actor: &str,
    ) -> LedgerResult<Order> {
        let items = prepare_items(items)?;
        if meta.initial_status.is_terminal() {
            return Err(LedgerError::InvalidInput(
                "an order cannot be created cancelled".into(),
            ));
        }
        let lines = stock_lines(&items);
        let date = today();

        let order = self.store.unit_of_work(|uow| {
            let reservation = IdReservation::prepare(
                uow,
                TransactionType::Sell,
                meta.transaction_id.as_deref(),
                date,
            )?;
            let mut batch = LedgerBatch::load(uow, items.iter().map(|i| i.sku.as_str()))?;
            batch.ensure_active(items.iter().map(|i| i.sku.as_str()))?;
            if let Some(op) = meta.initial_status.placement() {
                batch.apply_all(op, &lines)?;
            }

            let order = Order::new(reservation.transaction_id.clone(), items.clone(), &meta, actor);
            reservation.claim(uow)?;
            batch.commit(uow)?;
            uow.put_record(&TransactionRecord::Sell(order.clone()))?;
            Ok(order)
        });

        match order {
            Ok(order) => {
                tracing::info!(
                    transaction_id = %order.transaction_id,
                    status = %order.status,
                    "order created"
                );
                Ok(order)
            }
            Err(e) => {
                tracing::warn!(error = %e, "order creation rejected");
                Err(e)
            }
        }
    }

    /// Moves an order along the status table. `expected` must match the stored
    /// status or the call fails with `StatusMismatch`.
    #[tracing::instrument(skip(self))]
    pub fn transition_order_status(
        &self,
        transaction_id: &str,
        expected: OrderStatus,
        next: OrderStatus,
        actor: &str,
    ) -> LedgerResult<Order> {
        let result = self.store.unit_of_work(|uow| {
            let mut order = load_order(uow, transaction_id)?;
            if order.status != expected {
                return Err(LedgerError::StatusMismatch {
                    expected: expected.to_string(),
                    actual: order.status.to_string(),
                });
            }
            let transition = order.status.transition_to(next)?;

            let mut batch = LedgerBatch::load(uow, order.skus())?;
            if let Some(op) = transition.effect {
                batch.apply_all(op, &order.stock_lines())?;
            }

            order.set_status(next, actor);
            if transition.refunds_payment && order.payment_status == PaymentStatus::Completed {
                order.set_payment_status(PaymentStatus::PendingRefund, actor);
            }

            batch.commit(uow)?;
            uow.put_record(&TransactionRecord::Sell(order.clone()))?;
            Ok(order)
        });

        match result {
            Ok(order) => {
                tracing::info!(status = %order.status, payment = %order.payment_status, "order status changed");
                Ok(order)
            }
            Err(e) => {
                tracing::warn!(error = %e, "order status change rejected");
                Err(e)
            }
        }
    }

    /// Payment side channel. No ledger effect.
    pub fn update_payment_status(
        &self,
        transaction_id: &str,
        expected: PaymentStatus,
        next: PaymentStatus,
        actor: &str,
    ) -> LedgerResult<Order> {
        self.store.unit_of_work(|uow| {
            let mut order = load_order(uow, transaction_id)?;
            if order.payment_status != expected {
                return Err(LedgerError::StatusMismatch {
                    expected: expected.to_string(),
                    actual: order.payment_status.to_string(),
                });
            }
            order.set_payment_status(next, actor);
            uow.put_record(&TransactionRecord::Sell(order.clone()))?;
            Ok(order)
        })
    }

    /// Shipping side channel. No ledger effect.
    pub fn update_shipping_status(
        &self,
        transaction_id: &str,
        expected: ShippingStatus,
        next: ShippingStatus,
        actor: &str,
    ) -> LedgerResult<Order> {
        self.store.unit_of_work(|uow| {
            let mut order = load_order(uow, transaction_id)?;
            if order.shipping_status != expected {
                return Err(LedgerError::StatusMismatch {
                    expected: expected.to_string(),
                    actual: order.shipping_status.to_string(),
                });
            }
            order.set_shipping_status(next, actor);
            uow.put_record(&TransactionRecord::Sell(order.clone()))?;
            Ok(order)
        })
    }

    fn ensure_editable(&self, order: &Order) -> LedgerResult<()> {
        let editable = match order.status {
            OrderStatus::Pending | OrderStatus::Approved => true,
            OrderStatus::Shipping => self.policy.allow_shipping_edits,
            OrderStatus::Cancelled => false,
        };
        if !editable {
            return Err(LedgerError::NotEditable {
                id: order.transaction_id.clone(),
                status: order.status.to_string(),
            });
        }
        Ok(())
    }

    /// Replaces the items of an order without changing its status.
    ///
    /// The old items' effect is reversed and the new items' effect applied on
    /// the same staged snapshots, so each product is written once with the net
    /// result. PENDING orders only move `pending_stock`; APPROVED and SHIPPING
    /// orders only move `stocks` and abort on a shortfall.
    #[tracing::instrument(skip(self, items, meta), fields(item_count = items.len()))]
    pub fn edit_order(
        &self,
        transaction_id: &str,
        items: Vec<OrderItem>,
        meta: OrderMeta,
        actor: &str,
    ) -> LedgerResult<Order> {
        let items = prepare_items(items)?;
        let new_lines = stock_lines(&items);

        let result = self.store.unit_of_work(|uow| {
            let mut order = load_order(uow, transaction_id)?;
            self.ensure_editable(&order)?;

            let touched: BTreeSet<&str> = order
                .skus()
                .chain(items.iter().map(|i| i.sku.as_str()))
                .collect();
            let mut batch = LedgerBatch::load(uow, touched.iter().copied())?;
            let kept: BTreeSet<&str> = order.skus().collect();
            batch.ensure_active(
                items
                    .iter()
                    .map(|i| i.sku.as_str())
                    .filter(|sku| !kept.contains(sku)),
            )?;

            if let Some(op) = order.status.reversal() {
                batch.apply_all(op, &order.stock_lines())?;
            }
            if let Some(op) = order.status.placement() {
                batch.apply_all(op, &new_lines)?;
            }

            order.replace_items(items.clone(), &meta, actor)?;

            batch.commit(uow)?;
            uow.put_record(&TransactionRecord::Sell(order.clone()))?;
            Ok(order)
        });

        match result {
            Ok(order) => {
                tracing::info!(edits = order.edit_history.len(), "order edited");
                Ok(order)
            }
            Err(e) => {
                tracing::warn!(error = %e, "order edit rejected");
                Err(e)
            }
        }
    }

    /// Deletes an order, undoing its ledger effect once.
    ///
    /// `permanent` removes the record. Otherwise the order is cancelled and
    /// flagged `deleted`; repeating a soft delete is a no-op.
    #[tracing::instrument(skip(self))]
    pub fn delete_order(
        &self,
        transaction_id: &str,
        permanent: bool,
        actor: &str,
    ) -> LedgerResult<DeletedOrder> {
        let deleted = self.store.unit_of_work(|uow| {
            let mut order = load_order(uow, transaction_id)?;
            let mut batch = LedgerBatch::load(uow, order.skus())?;

            if permanent {
                if let Some(op) = order.status.reversal() {
                    batch.apply_all(op, &order.stock_lines())?;
                }
                batch.commit(uow)?;
                uow.remove_record(transaction_id)?;
                return Ok(DeletedOrder {
                    id: transaction_id.to_string(),
                    deleted: true,
                });
            }

            if order.deleted {
                return Ok(DeletedOrder {
                    id: transaction_id.to_string(),
                    deleted: true,
                });
            }
            if !order.status.is_terminal() {
                let transition = order.status.transition_to(OrderStatus::Cancelled)?;
                if let Some(op) = transition.effect {
                    batch.apply_all(op, &order.stock_lines())?;
                }
                order.set_status(OrderStatus::Cancelled, actor);
                if transition.refunds_payment && order.payment_status == PaymentStatus::Completed
                {
                    order.set_payment_status(PaymentStatus::PendingRefund, actor);
                }
            }
            order.deleted = true;

            batch.commit(uow)?;
            uow.put_record(&TransactionRecord::Sell(order))?;
            Ok(DeletedOrder {
                id: transaction_id.to_string(),
                deleted: true,
            })
        })?;
        tracing::info!(permanent, "order deleted");
        Ok(deleted)
    }

    // ========== Queries ==========

    pub fn get_order(&self, transaction_id: &str) -> LedgerResult<Order> {
        self.store
            .record(transaction_id)?
            .and_then(TransactionRecord::into_order)
            .ok_or_else(|| LedgerError::not_found("order", transaction_id))
    }

    pub fn get_transaction(&self, transaction_id: &str) -> LedgerResult<TransactionRecord> {
        self.store
            .record(transaction_id)?
            .ok_or_else(|| LedgerError::not_found("transaction", transaction_id))
    }

    /// All records of one family, oldest first.
    pub fn list_transactions(&self, family: TransactionType) -> LedgerResult<Vec<TransactionRecord>> {
        let mut records: Vec<_> = self
            .store
            .records()?
            .into_iter()
            .filter(|r| r.transaction_type() == family)
            .collect();
        records.sort_by_key(|r| r.created_date().to_datetime_utc());
        Ok(records)
    }

    /// Compares every product's `pending_stock` with the sum of its PENDING
    /// order lines. Reads committed state outside a unit of work, so it is only
    /// exact while no writers are active.
    pub fn reservation_report(&self) -> LedgerResult<Vec<ReservationDrift>> {
        let mut expected: BTreeMap<(Sku, WarehouseId), u64> = BTreeMap::new();
        for record in self.store.records()? {
            if let TransactionRecord::Sell(order) = record {
                if order.status != OrderStatus::Pending {
                    continue;
                }
                for item in &order.items {
                    *expected
                        .entry((item.sku.clone(), item.warehouse_id.clone()))
                        .or_default() += item.quantity;
                }
            }
        }

        let mut drifts = vec![];
        for product in self.store.products()? {
            let warehouses: BTreeSet<&WarehouseId> = product
                .pending_stock
                .keys()
                .chain(
                    expected
                        .keys()
                        .filter(|(sku, _)| *sku == product.sku)
                        .map(|(_, warehouse)| warehouse),
                )
                .collect();
            for warehouse in warehouses {
                let recorded = product.reserved(warehouse);
                let want = expected
                    .get(&(product.sku.clone(), warehouse.clone()))
                    .copied()
                    .unwrap_or(0);
                if recorded != want {
                    drifts.push(ReservationDrift {
                        sku: product.sku.clone(),
                        warehouse: warehouse.clone(),
                        recorded,
                        expected: want,
                    });
                }
            }
        }
        if !drifts.is_empty() {
            tracing::warn!(drifts = drifts.len(), "reservation drift detected");
        }
        Ok(drifts)
    }
}
