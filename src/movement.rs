//! Stock transfers between warehouses and manual stock count adjustments
use super::config::AverageCostPolicy;
use super::error::{LedgerError, LedgerResult};
use super::ledger::{self, LedgerBatch};
use super::sequence::IdReservation;
use super::service::{InventoryService, today};
use super::transaction::{
    Adjust, AdjustItem, MovementStatus, TransactionRecord, TransactionType, Transfer, TransferItem,
};
use super::types::{Money, Sku, TimeStamp};
use rust_decimal::Decimal;

/// Decimal places kept on a recomputed average buy price
pub const AVERAGE_SCALE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLine {
    pub sku: Sku,
    pub quantity: u64,
}

impl TransferLine {
    pub fn new(sku: &str, quantity: u64) -> Self {
        Self {
            sku: sku.to_string(),
            quantity,
        }
    }
}

/// Blends the counted stock into the average buy price.
///
/// `total_stock` is the product's stock across every warehouse before the
/// adjustment and `replaced` the count being overwritten. A zero `new_price`
/// counts the new stock at the current average. Amounts too large for a
/// decimal fail with `InvalidInput`.
pub fn weighted_average(
    policy: AverageCostPolicy,
    current_average: Money,
    total_stock: u64,
    replaced: u64,
    quantity: u64,
    new_price: Money,
) -> LedgerResult<Money> {
    let price = if new_price.is_zero() {
        current_average
    } else {
        new_price
    };
    let base = match policy {
        AverageCostPolicy::ExcludeReplaced => total_stock.saturating_sub(replaced),
        AverageCostPolicy::Observed => total_stock,
    };
    let overflow = || LedgerError::InvalidInput("average buy price overflows".into());
    let units = Decimal::from(base)
        .checked_add(Decimal::from(quantity))
        .ok_or_else(overflow)?;
    if units.is_zero() {
        return Ok(current_average);
    }

    let held = current_average
        .amount()
        .checked_mul(Decimal::from(base))
        .ok_or_else(overflow)?;
    let counted = price
        .amount()
        .checked_mul(Decimal::from(quantity))
        .ok_or_else(overflow)?;
    let average = held
        .checked_add(counted)
        .and_then(|value| value.checked_div(units))
        .ok_or_else(overflow)?;
    Ok(Money::new(average.round_dp(AVERAGE_SCALE)))
}

impl InventoryService {
    /// Moves available stock of every listed sku from `from` to `to`.
    /// Either every line moves or none does.
    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    pub fn transfer_stock(
        &self,
        transaction_id: Option<&str>,
        items: Vec<TransferLine>,
        from: &str,
        to: &str,
        actor: &str,
    ) -> LedgerResult<Transfer> {
        if from == to {
            return Err(LedgerError::SameWarehouse(from.to_string()));
        }
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(LedgerError::InvalidInput("transfer needs two warehouses".into()));
        }
        if items.is_empty() {
            return Err(LedgerError::InvalidInput("transfer has no items".into()));
        }
        if let Some(line) = items.iter().find(|l| l.quantity == 0) {
            return Err(LedgerError::InvalidInput(format!(
                "transfer line {} has zero quantity",
                line.sku
            )));
        }
        let date = today();

        let result = self.store.unit_of_work(|uow| {
            let reservation =
                IdReservation::prepare(uow, TransactionType::Transfer, transaction_id, date)?;
            let mut batch = LedgerBatch::load(uow, items.iter().map(|l| l.sku.as_str()))?;
            batch.ensure_active(items.iter().map(|l| l.sku.as_str()))?;

            let mut moved = Vec::with_capacity(items.len());
            let mut total = Money::ZERO;
            for line in &items {
                let product = batch.get_mut(&line.sku)?;
                ledger::relocate(product, from, to, line.quantity)?;
                let overflow =
                    || LedgerError::InvalidInput(format!("transfer value of {} overflows", line.sku));
                let subtotal = product
                    .price
                    .buy_price_average
                    .checked_times(line.quantity)
                    .ok_or_else(overflow)?;
                total = total.checked_add(subtotal).ok_or_else(overflow)?;
                moved.push(TransferItem {
                    sku: line.sku.clone(),
                    quantity: line.quantity,
                    subtotal,
                });
            }

            let transfer = Transfer {
                transaction_id: reservation.transaction_id.clone(),
                status: MovementStatus::Completed,
                total,
                items: moved,
                warehouse: from.to_string(),
                to_warehouse: to.to_string(),
                created_by: actor.to_string(),
                created_date: TimeStamp::new(),
            };
            reservation.claim(uow)?;
            batch.commit(uow)?;
            uow.put_record(&TransactionRecord::Transfer(transfer.clone()))?;
            Ok(transfer)
        });

        match result {
            Ok(transfer) => {
                tracing::info!(transaction_id = %transfer.transaction_id, "stock transferred");
                Ok(transfer)
            }
            Err(e) => {
                tracing::warn!(error = %e, "transfer rejected");
                Err(e)
            }
        }
    }

    /// Replaces the available count of `sku` at `warehouse` with `quantity`
    /// and recomputes the average buy price.
    #[tracing::instrument(skip(self))]
    pub fn adjust_stock(
        &self,
        transaction_id: Option<&str>,
        sku: &str,
        quantity: u64,
        new_buy_price: Money,
        warehouse: &str,
        actor: &str,
    ) -> LedgerResult<Adjust> {
        if new_buy_price.is_negative() {
            return Err(LedgerError::InvalidInput(format!(
                "adjustment of {sku} has a negative buy price"
            )));
        }
        if warehouse.trim().is_empty() {
            return Err(LedgerError::InvalidInput("adjustment needs a warehouse".into()));
        }
        let policy = self.policy.average_cost;
        let date = today();

        let result = self.store.unit_of_work(|uow| {
            let reservation =
                IdReservation::prepare(uow, TransactionType::Adjust, transaction_id, date)?;
            let mut batch = LedgerBatch::load(uow, [sku])?;
            batch.ensure_active([sku])?;

            let product = batch.get_mut(sku)?;
            let previous_average = product.price.buy_price_average;
            let total_stock = product.total_stock()?;
            let previous_quantity = ledger::overwrite(product, warehouse, quantity);
            let new_average = weighted_average(
                policy,
                previous_average,
                total_stock,
                previous_quantity,
                quantity,
                new_buy_price,
            )?;
            product.price.buy_price_average = new_average;
            if !new_buy_price.is_zero() {
                product.price.buy_price = new_buy_price;
            }

            let adjust = Adjust {
                transaction_id: reservation.transaction_id.clone(),
                status: MovementStatus::Completed,
                item: AdjustItem {
                    sku: sku.to_string(),
                    quantity,
                    new_buy_price,
                    previous_quantity,
                    previous_average,
                    new_average,
                },
                to_warehouse: warehouse.to_string(),
                created_by: actor.to_string(),
                created_date: TimeStamp::new(),
            };
            reservation.claim(uow)?;
            batch.commit(uow)?;
            uow.put_record(&TransactionRecord::Adjust(adjust.clone()))?;
            Ok(adjust)
        });

        match result {
            Ok(adjust) => {
                tracing::info!(
                    transaction_id = %adjust.transaction_id,
                    average = %adjust.item.new_average,
                    "stock adjusted"
                );
                Ok(adjust)
            }
            Err(e) => {
                tracing::warn!(error = %e, "adjustment rejected");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(raw: &str) -> Money {
        Money::new(raw.parse().unwrap())
    }

    #[test]
    fn observed_formula_counts_replaced_stock_twice() {
        // 10 units at 5.00 in the target warehouse, recounted as 10 at 8.00
        let avg = weighted_average(
            AverageCostPolicy::Observed,
            money("5"),
            10,
            10,
            10,
            money("8"),
        )
        .unwrap();
        assert_eq!(avg, money("6.5"));
    }

    #[test]
    fn excluding_replaced_stock_uses_only_the_count() {
        let avg = weighted_average(
            AverageCostPolicy::ExcludeReplaced,
            money("5"),
            10,
            10,
            10,
            money("8"),
        )
        .unwrap();
        assert_eq!(avg, money("8"));
    }

    #[test]
    fn blends_with_other_warehouses() {
        // 30 units elsewhere at 4.00, target recounted from 10 to 10 at 10.00
        let avg = weighted_average(
            AverageCostPolicy::ExcludeReplaced,
            money("4"),
            40,
            10,
            10,
            money("10"),
        )
        .unwrap();
        assert_eq!(avg, money("5.5"));
    }

    #[test]
    fn zero_price_keeps_the_average() {
        let avg = weighted_average(
            AverageCostPolicy::Observed,
            money("3.25"),
            8,
            2,
            5,
            Money::ZERO,
        )
        .unwrap();
        assert_eq!(avg, money("3.25"));
    }

    #[test]
    fn empty_ledger_keeps_the_average() {
        let avg = weighted_average(
            AverageCostPolicy::ExcludeReplaced,
            money("2"),
            0,
            0,
            0,
            money("9"),
        )
        .unwrap();
        assert_eq!(avg, money("2"));
    }

    #[test]
    fn rounds_to_four_places() {
        let avg = weighted_average(
            AverageCostPolicy::ExcludeReplaced,
            money("1"),
            2,
            0,
            1,
            money("2"),
        )
        .unwrap();
        assert_eq!(avg, money("1.3333"));
    }

    #[test]
    fn overflowing_blend_is_rejected() {
        let result = weighted_average(
            AverageCostPolicy::ExcludeReplaced,
            money("1"),
            0,
            0,
            u64::MAX,
            money("10000000000"),
        );
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
    }
}
