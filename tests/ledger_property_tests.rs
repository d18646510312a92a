//! Property-based tests for the stock ledger
//!
//! Random sequences of orders, status changes, edits, deletions, transfers and
//! adjustments are replayed against a fresh temporary store. After every step
//! the reserved quantities must match the open orders exactly, and a rejected
//! step must leave every product untouched.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use stock_ledger::{
    InventoryService, LedgerError, LedgerResult,
    movement::TransferLine,
    order::{OrderItem, OrderMeta, OrderStatus, TRANSITIONS},
    product::{Price, Product},
    types::Money,
};

const SKUS: [&str; 2] = ["P1", "P2"];
const WAREHOUSES: [&str; 3] = ["WH1", "WH2", "WH3"];

type Levels = BTreeMap<(String, String), (u64, u64)>;

fn service(stock: &[u64]) -> InventoryService {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let service = InventoryService::new(Arc::new(db)).unwrap();
    for (s, sku) in SKUS.iter().enumerate() {
        let product = WAREHOUSES.iter().enumerate().fold(
            Product::new(sku)
                .set_name(sku)
                .set_price(Price::new(Money::from_int(10), Money::from_int(15))),
            |p, (w, warehouse)| p.set_stock(warehouse, stock[s * WAREHOUSES.len() + w]),
        );
        service.register_product(product).unwrap();
    }
    service
}

/// (available, reserved) for every sku and warehouse
fn levels(service: &InventoryService) -> Levels {
    let mut levels = BTreeMap::new();
    for sku in SKUS {
        let product = service.get_product(sku).unwrap();
        for warehouse in WAREHOUSES {
            levels.insert(
                (sku.to_string(), warehouse.to_string()),
                (product.available(warehouse), product.reserved(warehouse)),
            );
        }
    }
    levels
}

fn total_stock(levels: &Levels, sku: &str) -> u64 {
    levels
        .iter()
        .filter(|((s, _), _)| s == sku)
        .map(|(_, (available, _))| available)
        .sum()
}

// PROPERTY TEST STRATEGIES

#[derive(Debug, Clone)]
enum Step {
    Create {
        lines: Vec<(usize, usize, u64)>,
        status: OrderStatus,
    },
    Transition {
        order: usize,
        next: OrderStatus,
    },
    Edit {
        order: usize,
        lines: Vec<(usize, usize, u64)>,
    },
    Delete {
        order: usize,
        permanent: bool,
    },
    Transfer {
        sku: usize,
        from: usize,
        to: usize,
        quantity: u64,
    },
    Adjust {
        sku: usize,
        warehouse: usize,
        quantity: u64,
    },
}

fn status_strategy() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::Pending),
        Just(OrderStatus::Approved),
        Just(OrderStatus::Shipping),
        Just(OrderStatus::Cancelled),
    ]
}

/// Strategy to generate one to three (sku, warehouse, quantity) lines
fn lines_strategy() -> impl Strategy<Value = Vec<(usize, usize, u64)>> {
    prop::collection::vec((0..SKUS.len(), 0..WAREHOUSES.len(), 1u64..=8), 1..=3)
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (lines_strategy(), status_strategy())
            .prop_map(|(lines, status)| Step::Create { lines, status }),
        3 => (any::<usize>(), status_strategy())
            .prop_map(|(order, next)| Step::Transition { order, next }),
        1 => (any::<usize>(), lines_strategy())
            .prop_map(|(order, lines)| Step::Edit { order, lines }),
        1 => (any::<usize>(), any::<bool>())
            .prop_map(|(order, permanent)| Step::Delete { order, permanent }),
        2 => (0..SKUS.len(), 0..WAREHOUSES.len(), 0..WAREHOUSES.len(), 1u64..=10)
            .prop_map(|(sku, from, to, quantity)| Step::Transfer { sku, from, to, quantity }),
        1 => (0..SKUS.len(), 0..WAREHOUSES.len(), 0u64..=20)
            .prop_map(|(sku, warehouse, quantity)| Step::Adjust { sku, warehouse, quantity }),
    ]
}

fn stock_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..=15, SKUS.len() * WAREHOUSES.len())
}

fn items(lines: &[(usize, usize, u64)]) -> Vec<OrderItem> {
    lines
        .iter()
        .map(|&(s, w, q)| OrderItem::new(SKUS[s], WAREHOUSES[w], q, Money::from_int(15)))
        .collect()
}

fn pick(ids: &[String], n: usize) -> Option<&str> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[n % ids.len()].as_str())
    }
}

fn run(service: &InventoryService, ids: &mut Vec<String>, step: &Step) -> LedgerResult<()> {
    match step {
        Step::Create { lines, status } => {
            let order = service.create_order(
                items(lines),
                OrderMeta::new().set_initial_status(*status),
                "prop",
            )?;
            ids.push(order.transaction_id);
        }
        Step::Transition { order, next } => {
            if let Some(id) = pick(ids, *order) {
                let current = service.get_order(id)?.status;
                service.transition_order_status(id, current, *next, "prop")?;
            }
        }
        Step::Edit { order, lines } => {
            if let Some(id) = pick(ids, *order) {
                service.edit_order(id, items(lines), OrderMeta::new(), "prop")?;
            }
        }
        Step::Delete { order, permanent } => {
            if let Some(id) = pick(ids, *order).map(str::to_string) {
                service.delete_order(&id, *permanent, "prop")?;
                if *permanent {
                    ids.retain(|i| *i != id);
                }
            }
        }
        Step::Transfer {
            sku,
            from,
            to,
            quantity,
        } => {
            service.transfer_stock(
                None,
                vec![TransferLine::new(SKUS[*sku], *quantity)],
                WAREHOUSES[*from],
                WAREHOUSES[*to],
                "prop",
            )?;
        }
        Step::Adjust {
            sku,
            warehouse,
            quantity,
        } => {
            service.adjust_stock(
                None,
                SKUS[*sku],
                *quantity,
                Money::ZERO,
                WAREHOUSES[*warehouse],
                "prop",
            )?;
        }
    }
    Ok(())
}

// PROPERTY TESTS
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: reservations always equal the open PENDING lines, and a
    /// rejected step changes no product
    #[test]
    fn prop_random_steps_keep_the_ledger_consistent(
        stock in stock_strategy(),
        steps in prop::collection::vec(step_strategy(), 1..40),
    ) {
        let service = service(&stock);
        let mut ids = vec![];

        for step in &steps {
            let before = service.store().products().unwrap();
            let levels_before = levels(&service);

            match run(&service, &mut ids, step) {
                Ok(()) => {
                    if let Step::Transfer { .. } = step {
                        let after = levels(&service);
                        for sku in SKUS {
                            prop_assert_eq!(total_stock(&levels_before, sku), total_stock(&after, sku));
                        }
                    }
                }
                Err(e) => {
                    prop_assert!(e.is_business_rule(), "unexpected error {:?}", e);
                    prop_assert_eq!(&before, &service.store().products().unwrap());
                }
            }

            prop_assert!(service.reservation_report().unwrap().is_empty());
        }
    }

    /// Property: creating an order and cancelling it restores every level
    #[test]
    fn prop_cancellation_undoes_placement(
        stock in stock_strategy(),
        lines in lines_strategy(),
        status in prop_oneof![
            Just(OrderStatus::Pending),
            Just(OrderStatus::Approved),
            Just(OrderStatus::Shipping),
        ],
    ) {
        let service = service(&stock);
        let initial = levels(&service);

        match service.create_order(items(&lines), OrderMeta::new().set_initial_status(status), "prop") {
            Ok(order) => {
                service
                    .transition_order_status(&order.transaction_id, status, OrderStatus::Cancelled, "prop")
                    .unwrap();
            }
            Err(e) => {
                prop_assert!(matches!(e, LedgerError::InsufficientStock { .. }), "unexpected error {:?}", e);
            }
        }

        prop_assert_eq!(initial, levels(&service));
    }

    /// Property: approval either settles every line or none of them
    #[test]
    fn prop_approval_is_all_or_nothing(
        stock in stock_strategy(),
        lines in lines_strategy(),
    ) {
        let service = service(&stock);
        let order = service.create_order(items(&lines), OrderMeta::new(), "prop").unwrap();
        let reserved = levels(&service);

        let result = service.transition_order_status(
            &order.transaction_id,
            OrderStatus::Pending,
            OrderStatus::Approved,
            "prop",
        );

        let after = levels(&service);
        match result {
            Ok(_) => {
                for ((sku, warehouse), (available, pending)) in &after {
                    let wanted: u64 = lines
                        .iter()
                        .filter(|&&(s, w, _)| SKUS[s] == sku && WAREHOUSES[w] == warehouse)
                        .map(|&(_, _, q)| q)
                        .sum();
                    let (was_available, was_pending) = reserved[&(sku.clone(), warehouse.clone())];
                    prop_assert_eq!(*available, was_available - wanted);
                    prop_assert_eq!(*pending, was_pending - wanted);
                }
            }
            Err(e) => {
                prop_assert!(matches!(e, LedgerError::InsufficientStock { .. }), "unexpected error {:?}", e);
                prop_assert_eq!(reserved, after);
            }
        }
    }

    /// Property: edges outside the transition table are refused with no
    /// ledger effect
    #[test]
    fn prop_unlisted_transitions_are_refused(
        lines in lines_strategy(),
        from in status_strategy(),
        to in status_strategy(),
    ) {
        prop_assume!(!TRANSITIONS.iter().any(|t| t.from == from && t.to == to));

        let service = service(&[50; 6]);
        let start = if from == OrderStatus::Cancelled { OrderStatus::Pending } else { from };
        let order = service
            .create_order(items(&lines), OrderMeta::new().set_initial_status(start), "prop")
            .unwrap();
        if from == OrderStatus::Cancelled {
            service
                .transition_order_status(&order.transaction_id, start, OrderStatus::Cancelled, "prop")
                .unwrap();
        }
        let before = levels(&service);

        let err = service
            .transition_order_status(&order.transaction_id, from, to, "prop")
            .unwrap_err();

        prop_assert!(matches!(err, LedgerError::InvalidTransition { .. }), "unexpected error {:?}", err);
        prop_assert_eq!(before, levels(&service));
        prop_assert_eq!(service.get_order(&order.transaction_id).unwrap().status, from);
    }
}
