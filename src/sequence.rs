//! Human readable transaction ids of the form `<PREFIX>-<YYMMDD>-<N>`
//!
//! `N` continues from the latest id issued for the family. The latest id is
//! tracked in the `sequences` tree and read and advanced inside the same unit
//! of work that writes the record, so two concurrent creators can never read
//! the same latest id.
use super::error::{LedgerError, LedgerResult};
use super::store::UnitOfWork;
use super::transaction::TransactionType;
use chrono::NaiveDate;

pub fn format_id(family: TransactionType, date: NaiveDate, sequence: u64) -> String {
    format!("{}-{}-{}", family.prefix(), date.format("%y%m%d"), sequence)
}

/// Extracts `N` from an id of `family`, or `None` when the id does not follow
/// that family's pattern.
pub fn parse_sequence(family: TransactionType, transaction_id: &str) -> Option<u64> {
    let mut parts = transaction_id.split('-');
    let prefix = parts.next()?;
    let date = parts.next()?;
    let sequence = parts.next()?;

    if prefix != family.prefix() || parts.next().is_some() {
        return None;
    }
    if date.len() != 6 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    sequence.parse().ok()
}

/// An id picked during the read phase of a unit of work. [`IdReservation::claim`]
/// must run in the write phase of the same unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdReservation {
    pub family: TransactionType,
    pub transaction_id: String,
    advances: bool,
}

impl IdReservation {
    /// Picks the next free id for `family`, or validates a caller supplied one.
    pub fn prepare(
        uow: &UnitOfWork<'_>,
        family: TransactionType,
        requested: Option<&str>,
        date: NaiveDate,
    ) -> LedgerResult<Self> {
        let latest = uow
            .latest_id(family)?
            .and_then(|id| parse_sequence(family, &id))
            .unwrap_or(0);

        if let Some(requested) = requested {
            if requested.trim().is_empty() {
                return Err(LedgerError::InvalidInput("transaction id is empty".into()));
            }
            if uow.record_exists(requested)? {
                return Err(LedgerError::DuplicateId(requested.to_string()));
            }
            let advances = parse_sequence(family, requested).is_some_and(|n| n > latest);
            return Ok(Self {
                family,
                transaction_id: requested.to_string(),
                advances,
            });
        }

        let mut sequence = latest + 1;
        loop {
            let candidate = format_id(family, date, sequence);
            if !uow.record_exists(&candidate)? {
                return Ok(Self {
                    family,
                    transaction_id: candidate,
                    advances: true,
                });
            }
            sequence += 1;
        }
    }

    pub fn claim(&self, uow: &UnitOfWork<'_>) -> LedgerResult<()> {
        if self.advances {
            uow.set_latest_id(self.family, &self.transaction_id)?;
        }
        Ok(())
    }
}
