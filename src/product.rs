//! Product records and the per-warehouse stock ledger they carry
use super::error::{LedgerError, LedgerResult};
use super::types::{Money, Sku, TimeStamp, WarehouseId};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Deleted,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct Price {
    #[n(0)]
    pub buy_price: Money,
    #[n(1)]
    pub buy_price_average: Money,
    #[n(2)]
    pub sell_price: Money,
}

// Key is the sku
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Product {
    #[n(0)]
    pub sku: Sku,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub category: String,
    #[n(3)]
    pub price: Price,
    #[n(4)]
    pub stocks: BTreeMap<WarehouseId, u64>, // available for sale
    #[n(5)]
    pub pending_stock: BTreeMap<WarehouseId, u64>, // reserved by PENDING orders
    #[n(6)]
    pub warehouse: BTreeSet<WarehouseId>,
    #[n(7)]
    pub status: ProductStatus,
    #[n(8)]
    pub created_date: TimeStamp<Utc>,
    #[n(9)]
    pub updated_date: TimeStamp<Utc>,
}

impl Price {
    pub fn new(buy_price: Money, sell_price: Money) -> Self {
        Self {
            buy_price,
            buy_price_average: buy_price,
            sell_price,
        }
    }
}

impl Product {
    /// Construct a new builder object keyed by `sku`
    pub fn new(sku: &str) -> Self {
        let now = TimeStamp::new();
        Self {
            sku: sku.to_string(),
            name: String::new(),
            category: String::new(),
            price: Price::default(),
            stocks: BTreeMap::new(),
            pending_stock: BTreeMap::new(),
            warehouse: BTreeSet::new(),
            status: ProductStatus::Active,
            created_date: now.clone(),
            updated_date: now,
        }
    }
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
    pub fn set_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }
    pub fn set_price(mut self, price: Price) -> Self {
        self.price = price;
        self
    }
    /// Seeds opening stock for a warehouse and registers the warehouse.
    pub fn set_stock(mut self, warehouse: &str, quantity: u64) -> Self {
        self.stocks.insert(warehouse.to_string(), quantity);
        self.warehouse.insert(warehouse.to_string());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }
    pub fn available(&self, warehouse: &str) -> u64 {
        self.stocks.get(warehouse).copied().unwrap_or(0)
    }
    pub fn reserved(&self, warehouse: &str) -> u64 {
        self.pending_stock.get(warehouse).copied().unwrap_or(0)
    }
    pub fn total_stock(&self) -> LedgerResult<u64> {
        self.checked_total(&self.stocks)
    }
    pub fn total_reserved(&self) -> LedgerResult<u64> {
        self.checked_total(&self.pending_stock)
    }
    fn checked_total(&self, levels: &BTreeMap<WarehouseId, u64>) -> LedgerResult<u64> {
        levels
            .values()
            .try_fold(0u64, |total, qty| total.checked_add(*qty))
            .ok_or_else(|| {
                LedgerError::InvalidInput(format!("stock total overflow for {}", self.sku))
            })
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.sku.trim().is_empty() {
            return Err(LedgerError::InvalidInput("sku is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(LedgerError::InvalidInput(format!(
                "product {} has no name",
                self.sku
            )));
        }
        let price = &self.price;
        if price.buy_price.is_negative()
            || price.buy_price_average.is_negative()
            || price.sell_price.is_negative()
        {
            return Err(LedgerError::InvalidInput(format!(
                "product {} has a negative price",
                self.sku
            )));
        }
        Ok(())
    }

    pub fn to_cbor(&self) -> LedgerResult<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| LedgerError::Encode(e.to_string()))
    }
    pub fn from_cbor(bytes: &[u8]) -> LedgerResult<Self> {
        Ok(minicbor::decode(bytes)?)
    }
}
