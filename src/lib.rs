pub mod config;
pub mod error;
pub mod ledger;
pub mod movement;
pub mod order;
pub mod product;
pub mod sequence;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod transaction;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use service::InventoryService;
