//! sled-backed record store and the unit of work every mutation runs in
//!
//! | Tree | Key | Value |
//! |------|-----|-------|
//! | `products` | sku | CBOR [`Product`] |
//! | `transactions` | transaction id | CBOR [`TransactionRecord`] |
//! | `sequences` | family prefix | latest issued transaction id |
use super::error::{LedgerError, LedgerResult};
use super::product::Product;
use super::transaction::{TransactionRecord, TransactionType};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use std::cell::Cell;
use std::sync::Arc;

const PRODUCTS_TREE: &str = "products";
const TRANSACTIONS_TREE: &str = "transactions";
const SEQUENCES_TREE: &str = "sequences";

pub const DEFAULT_MAX_RETRIES: u32 = 16;

#[derive(Clone)]
pub struct Store {
    instance: Arc<sled::Db>,
    products: sled::Tree,
    transactions: sled::Tree,
    sequences: sled::Tree,
    max_retries: u32,
}

impl Store {
    pub fn new(instance: Arc<sled::Db>) -> LedgerResult<Self> {
        let products = instance.open_tree(PRODUCTS_TREE)?;
        let transactions = instance.open_tree(TRANSACTIONS_TREE)?;
        let sequences = instance.open_tree(SEQUENCES_TREE)?;

        Ok(Self {
            instance,
            products,
            transactions,
            sequences,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn instance(&self) -> &Arc<sled::Db> {
        &self.instance
    }

    /// Runs `work` as one atomic unit across all trees. sled runs units one at
    /// a time. A unit that fails with `Conflict` is discarded and re-run from
    /// scratch; after `max_retries` re-runs the call fails with `Contention`.
    pub fn unit_of_work<T, F>(&self, work: F) -> LedgerResult<T>
    where
        F: Fn(&UnitOfWork<'_>) -> LedgerResult<T>,
    {
        let attempts = Cell::new(0u32);

        let outcome = (&self.products, &self.transactions, &self.sequences).transaction(
            |(products, transactions, sequences)| {
                let attempt = attempts.get() + 1;
                attempts.set(attempt);
                if attempt > self.max_retries + 1 {
                    return Err(ConflictableTransactionError::Abort(
                        LedgerError::Contention {
                            attempts: attempt - 1,
                        },
                    ));
                }
                if attempt > 1 {
                    tracing::debug!(attempt, "retrying conflicted unit of work");
                }

                let uow = UnitOfWork::new(products, transactions, sequences);
                match work(&uow) {
                    Ok(value) => Ok(value),
                    Err(LedgerError::Conflict) => Err(ConflictableTransactionError::Conflict),
                    Err(LedgerError::Storage(e)) => Err(ConflictableTransactionError::Storage(e)),
                    Err(e) => Err(ConflictableTransactionError::Abort(e)),
                }
            },
        );

        match outcome {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(LedgerError::Storage(e)),
        }
    }

    // Reads below run outside any unit of work and see the latest committed state.

    pub fn product(&self, sku: &str) -> LedgerResult<Option<Product>> {
        self.products
            .get(sku.as_bytes())?
            .map(|raw| Product::from_cbor(&raw))
            .transpose()
    }

    pub fn record(&self, transaction_id: &str) -> LedgerResult<Option<TransactionRecord>> {
        self.transactions
            .get(transaction_id.as_bytes())?
            .map(|raw| TransactionRecord::from_cbor(&raw))
            .transpose()
    }

    pub fn products(&self) -> LedgerResult<Vec<Product>> {
        self.products
            .iter()
            .values()
            .map(|raw| Product::from_cbor(&raw?))
            .collect()
    }

    pub fn records(&self) -> LedgerResult<Vec<TransactionRecord>> {
        self.transactions
            .iter()
            .values()
            .map(|raw| TransactionRecord::from_cbor(&raw?))
            .collect()
    }

    pub fn flush(&self) -> LedgerResult<usize> {
        Ok(self.instance.flush()?)
    }
}

/// Transactional view handed to [`Store::unit_of_work`] closures.
///
/// Starts in a read phase; the first write switches it to a write phase and
/// any later read fails with `ReadAfterWrite`.
pub struct UnitOfWork<'t> {
    products: &'t TransactionalTree,
    transactions: &'t TransactionalTree,
    sequences: &'t TransactionalTree,
    writing: Cell<bool>,
}

impl<'t> UnitOfWork<'t> {
    fn new(
        products: &'t TransactionalTree,
        transactions: &'t TransactionalTree,
        sequences: &'t TransactionalTree,
    ) -> Self {
        Self {
            products,
            transactions,
            sequences,
            writing: Cell::new(false),
        }
    }

    fn reading(&self) -> LedgerResult<()> {
        if self.writing.get() {
            return Err(LedgerError::ReadAfterWrite);
        }
        Ok(())
    }

    pub fn is_writing(&self) -> bool {
        self.writing.get()
    }

    pub fn get_product(&self, sku: &str) -> LedgerResult<Option<Product>> {
        self.reading()?;
        match self.products.get(sku.as_bytes())? {
            Some(raw) => Ok(Some(Product::from_cbor(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn get_record(&self, transaction_id: &str) -> LedgerResult<Option<TransactionRecord>> {
        self.reading()?;
        match self.transactions.get(transaction_id.as_bytes())? {
            Some(raw) => Ok(Some(TransactionRecord::from_cbor(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn record_exists(&self, transaction_id: &str) -> LedgerResult<bool> {
        self.reading()?;
        Ok(self.transactions.get(transaction_id.as_bytes())?.is_some())
    }

    pub fn latest_id(&self, family: TransactionType) -> LedgerResult<Option<String>> {
        self.reading()?;
        match self.sequences.get(family.prefix().as_bytes())? {
            Some(raw) => Ok(Some(String::from_utf8_lossy(&raw).into_owned())),
            None => Ok(None),
        }
    }

    pub fn put_product(&self, product: &Product) -> LedgerResult<()> {
        self.writing.set(true);
        self.products
            .insert(product.sku.as_bytes(), product.to_cbor()?)?;
        Ok(())
    }

    pub fn put_record(&self, record: &TransactionRecord) -> LedgerResult<()> {
        self.writing.set(true);
        self.transactions
            .insert(record.transaction_id().as_bytes(), record.to_cbor()?)?;
        Ok(())
    }

    pub fn remove_record(&self, transaction_id: &str) -> LedgerResult<()> {
        self.writing.set(true);
        self.transactions.remove(transaction_id.as_bytes())?;
        Ok(())
    }

    pub fn set_latest_id(&self, family: TransactionType, transaction_id: &str) -> LedgerResult<()> {
        self.writing.set(true);
        self.sequences
            .insert(family.prefix().as_bytes(), transaction_id.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temporary() -> Store {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Store::new(Arc::new(db)).unwrap()
    }

    #[test]
    fn aborted_work_leaves_no_trace() {
        let store = temporary();

        let result: LedgerResult<()> = store.unit_of_work(|uow| {
            uow.put_product(&Product::new("P1").set_name("x"))?;
            Err(LedgerError::InvalidInput("abort".into()))
        });

        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
        assert!(store.product("P1").unwrap().is_none());
    }

    #[test]
    fn read_after_write_is_refused() {
        let store = temporary();

        let result = store.unit_of_work(|uow| {
            uow.put_product(&Product::new("P1").set_name("x"))?;
            uow.get_product("P1")
        });

        assert!(matches!(result, Err(LedgerError::ReadAfterWrite)));
        assert!(store.product("P1").unwrap().is_none());
    }

    #[test]
    fn committed_work_is_visible() {
        let store = temporary();

        store
            .unit_of_work(|uow| uow.put_product(&Product::new("P1").set_name("x")))
            .unwrap();

        let product = store.product("P1").unwrap().unwrap();
        assert_eq!(product.name, "x");
        assert_eq!(store.products().unwrap().len(), 1);
    }
}
