//! Stock mutation primitives and the staging batch every multi-item operation
//! goes through.
//!
//! A unit of work touching stock proceeds in three phases:
//!
//! 1. [`LedgerBatch::load`] reads every product the operation needs.
//! 2. Effects are applied in order to the staged copies. Any failure returns
//!    before a single write has been issued.
//! 3. [`LedgerBatch::commit`] writes each touched product exactly once.
use super::error::{LedgerError, LedgerResult};
use super::product::Product;
use super::store::UnitOfWork;
use super::types::{Sku, TimeStamp};
use std::collections::{BTreeMap, BTreeSet};

/// One ledger effect applied to a single (sku, warehouse) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockOp {
    /// `pending_stock += qty`
    Reserve,
    /// `pending_stock -= qty`, clamped at zero
    Release,
    /// `stocks -= qty` after a sufficiency check. With `settle_reservation`
    /// the companion `pending_stock` is released as well.
    Deduct { settle_reservation: bool },
    /// `stocks += qty`
    Restore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLine {
    pub sku: Sku,
    pub warehouse: String,
    pub quantity: u64,
}

impl StockLine {
    pub fn new(sku: &str, warehouse: &str, quantity: u64) -> Self {
        Self {
            sku: sku.to_string(),
            warehouse: warehouse.to_string(),
            quantity,
        }
    }
}

fn overflow(product: &Product, warehouse: &str) -> LedgerError {
    LedgerError::InvalidInput(format!(
        "quantity overflow for {} at {}",
        product.sku, warehouse
    ))
}

pub fn reserve(product: &mut Product, warehouse: &str, quantity: u64) -> LedgerResult<()> {
    let reserved = product
        .reserved(warehouse)
        .checked_add(quantity)
        .ok_or_else(|| overflow(product, warehouse))?;
    product
        .pending_stock
        .insert(warehouse.to_string(), reserved);
    Ok(())
}

pub fn release(product: &mut Product, warehouse: &str, quantity: u64) {
    let reserved = product.reserved(warehouse).saturating_sub(quantity);
    product
        .pending_stock
        .insert(warehouse.to_string(), reserved);
}

pub fn deduct(
    product: &mut Product,
    warehouse: &str,
    quantity: u64,
    settle_reservation: bool,
) -> LedgerResult<()> {
    let available = product.available(warehouse);
    let remaining =
        available
            .checked_sub(quantity)
            .ok_or_else(|| LedgerError::InsufficientStock {
                sku: product.sku.clone(),
                warehouse: warehouse.to_string(),
                requested: quantity,
                available,
            })?;
    product.stocks.insert(warehouse.to_string(), remaining);
    if settle_reservation {
        release(product, warehouse, quantity);
    }
    Ok(())
}

pub fn restore(product: &mut Product, warehouse: &str, quantity: u64) -> LedgerResult<()> {
    let available = product
        .available(warehouse)
        .checked_add(quantity)
        .ok_or_else(|| overflow(product, warehouse))?;
    product.stocks.insert(warehouse.to_string(), available);
    Ok(())
}

/// Moves available stock between two warehouses of the same product. The
/// destination joins the product's warehouse set.
pub fn relocate(product: &mut Product, from: &str, to: &str, quantity: u64) -> LedgerResult<()> {
    deduct(product, from, quantity, false)?;
    restore(product, to, quantity)?;
    product.warehouse.insert(to.to_string());
    Ok(())
}

/// Replaces the available count of a warehouse, returning the previous one.
pub fn overwrite(product: &mut Product, warehouse: &str, quantity: u64) -> u64 {
    let previous = product.available(warehouse);
    product.stocks.insert(warehouse.to_string(), quantity);
    product.warehouse.insert(warehouse.to_string());
    previous
}

pub fn apply(op: StockOp, product: &mut Product, warehouse: &str, quantity: u64) -> LedgerResult<()> {
    tracing::debug!(sku = %product.sku, warehouse, quantity, ?op, "ledger effect");
    match op {
        StockOp::Reserve => reserve(product, warehouse, quantity),
        StockOp::Release => {
            release(product, warehouse, quantity);
            Ok(())
        }
        StockOp::Deduct { settle_reservation } => {
            deduct(product, warehouse, quantity, settle_reservation)
        }
        StockOp::Restore => restore(product, warehouse, quantity),
    }
}

/// Product snapshots staged for one unit of work.
#[derive(Debug, Default)]
pub struct LedgerBatch {
    staged: BTreeMap<Sku, Product>,
    dirty: BTreeSet<Sku>,
}

impl LedgerBatch {
    /// Reads every listed sku. Missing products fail with `NotFound`.
    pub fn load<'a, I>(uow: &UnitOfWork<'_>, skus: I) -> LedgerResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut staged = BTreeMap::new();
        for sku in skus {
            if staged.contains_key(sku) {
                continue;
            }
            let product = uow
                .get_product(sku)?
                .ok_or_else(|| LedgerError::not_found("product", sku))?;
            staged.insert(sku.to_string(), product);
        }
        Ok(Self {
            staged,
            dirty: BTreeSet::new(),
        })
    }

    /// Soft-deleted products are invisible to new stock commitments.
    pub fn ensure_active<'a, I>(&self, skus: I) -> LedgerResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for sku in skus {
            match self.staged.get(sku) {
                Some(product) if product.is_active() => {}
                _ => return Err(LedgerError::not_found("product", sku)),
            }
        }
        Ok(())
    }

    pub fn get(&self, sku: &str) -> Option<&Product> {
        self.staged.get(sku)
    }

    pub fn get_mut(&mut self, sku: &str) -> LedgerResult<&mut Product> {
        let product = self
            .staged
            .get_mut(sku)
            .ok_or_else(|| LedgerError::not_found("product", sku))?;
        self.dirty.insert(sku.to_string());
        Ok(product)
    }

    pub fn apply(&mut self, op: StockOp, line: &StockLine) -> LedgerResult<()> {
        let product = self.get_mut(&line.sku)?;
        apply(op, product, &line.warehouse, line.quantity)
    }

    pub fn apply_all(&mut self, op: StockOp, lines: &[StockLine]) -> LedgerResult<()> {
        for line in lines {
            self.apply(op, line)?;
        }
        Ok(())
    }

    pub fn touched(&self) -> usize {
        self.dirty.len()
    }

    /// Writes every touched product once. Must follow all reads of the unit
    /// of work.
    pub fn commit(mut self, uow: &UnitOfWork<'_>) -> LedgerResult<Vec<Product>> {
        let now = TimeStamp::new();
        let mut written = Vec::with_capacity(self.dirty.len());
        for sku in &self.dirty {
            if let Some(mut product) = self.staged.remove(sku) {
                product.updated_date = now.clone();
                uow.put_product(&product)?;
                written.push(product);
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product::new("P1").set_name("beans").set_stock("WH1", 10)
    }

    #[test]
    fn reserve_then_settle() {
        let mut p = product();
        reserve(&mut p, "WH1", 5).unwrap();
        assert_eq!(p.reserved("WH1"), 5);
        assert_eq!(p.available("WH1"), 10);

        deduct(&mut p, "WH1", 5, true).unwrap();
        assert_eq!(p.available("WH1"), 5);
        assert_eq!(p.reserved("WH1"), 0);
    }

    #[test]
    fn release_clamps_at_zero() {
        let mut p = product();
        reserve(&mut p, "WH1", 2).unwrap();
        release(&mut p, "WH1", 7);
        assert_eq!(p.reserved("WH1"), 0);
    }

    #[test]
    fn settle_never_takes_reservation_below_zero() {
        let mut p = product();
        deduct(&mut p, "WH1", 4, true).unwrap();
        assert_eq!(p.reserved("WH1"), 0);
        assert_eq!(p.available("WH1"), 6);
    }

    #[test]
    fn deduct_reports_shortfall_without_touching_stock() {
        let mut p = product();
        let err = deduct(&mut p, "WH1", 11, false).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 11,
                available: 10,
                ..
            }
        ));
        assert_eq!(p.available("WH1"), 10);
    }

    #[test]
    fn relocate_moves_and_registers_destination() {
        let mut p = product();
        relocate(&mut p, "WH1", "WH2", 4).unwrap();
        assert_eq!(p.available("WH1"), 6);
        assert_eq!(p.available("WH2"), 4);
        assert!(p.warehouse.contains("WH2"));
    }

    #[test]
    fn overwrite_returns_previous_count() {
        let mut p = product();
        assert_eq!(overwrite(&mut p, "WH1", 3), 10);
        assert_eq!(overwrite(&mut p, "WH9", 1), 0);
        assert_eq!(p.total_stock().unwrap(), 4);
        assert!(p.warehouse.contains("WH9"));
    }
}
