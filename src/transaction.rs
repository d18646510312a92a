//! Persisted transaction records, keyed by transaction id and discriminated by
//! their transaction type
use super::error::{LedgerError, LedgerResult};
use super::order::Order;
use super::types::{Money, Sku, TimeStamp, WarehouseId};
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    #[n(0)]
    Sell,
    #[n(1)]
    Transfer,
    #[n(2)]
    Adjust,
}

impl TransactionType {
    pub const ALL: [TransactionType; 3] = [
        TransactionType::Sell,
        TransactionType::Transfer,
        TransactionType::Adjust,
    ];

    /// Leading segment of every id issued for this family
    pub fn prefix(&self) -> &'static str {
        match self {
            TransactionType::Sell => "S",
            TransactionType::Transfer => "TRF",
            TransactionType::Adjust => "ADJ",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionType::Sell => "SELL",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::Adjust => "ADJUST",
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementStatus {
    #[n(0)]
    Completed,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    #[n(0)]
    pub sku: Sku,
    #[n(1)]
    pub quantity: u64,
    #[n(2)]
    pub subtotal: Money, // quantity * average buy price at transfer time
}

/// Created and completed in one step; there is no intermediate state.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    #[n(0)]
    pub transaction_id: String,
    #[n(1)]
    pub status: MovementStatus,
    #[n(2)]
    pub items: Vec<TransferItem>,
    #[n(3)]
    pub warehouse: WarehouseId, // source
    #[n(4)]
    pub to_warehouse: WarehouseId,
    #[n(5)]
    pub total: Money,
    #[n(6)]
    pub created_by: String,
    #[n(7)]
    pub created_date: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AdjustItem {
    #[n(0)]
    pub sku: Sku,
    #[n(1)]
    pub quantity: u64, // replaces the warehouse count
    #[n(2)]
    pub new_buy_price: Money,
    #[n(3)]
    pub previous_quantity: u64,
    #[n(4)]
    pub previous_average: Money,
    #[n(5)]
    pub new_average: Money,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Adjust {
    #[n(0)]
    pub transaction_id: String,
    #[n(1)]
    pub status: MovementStatus,
    #[n(2)]
    pub item: AdjustItem,
    #[n(3)]
    pub to_warehouse: WarehouseId,
    #[n(4)]
    pub created_by: String,
    #[n(5)]
    pub created_date: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum TransactionRecord {
    #[n(0)]
    Sell(#[n(0)] Order),
    #[n(1)]
    Transfer(#[n(0)] Transfer),
    #[n(2)]
    Adjust(#[n(0)] Adjust),
}

impl TransactionRecord {
    pub fn transaction_id(&self) -> &str {
        match self {
            TransactionRecord::Sell(order) => &order.transaction_id,
            TransactionRecord::Transfer(transfer) => &transfer.transaction_id,
            TransactionRecord::Adjust(adjust) => &adjust.transaction_id,
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        match self {
            TransactionRecord::Sell(_) => TransactionType::Sell,
            TransactionRecord::Transfer(_) => TransactionType::Transfer,
            TransactionRecord::Adjust(_) => TransactionType::Adjust,
        }
    }

    pub fn created_date(&self) -> &TimeStamp<Utc> {
        match self {
            TransactionRecord::Sell(order) => &order.created_date,
            TransactionRecord::Transfer(transfer) => &transfer.created_date,
            TransactionRecord::Adjust(adjust) => &adjust.created_date,
        }
    }

    pub fn into_order(self) -> Option<Order> {
        match self {
            TransactionRecord::Sell(order) => Some(order),
            _ => None,
        }
    }

    pub fn to_cbor(&self) -> LedgerResult<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| LedgerError::Encode(e.to_string()))
    }
    pub fn from_cbor(bytes: &[u8]) -> LedgerResult<Self> {
        Ok(minicbor::decode(bytes)?)
    }
}
