use std::{collections::HashSet, thread};

use account_ledger::{
    account::{AccountNumber, UserId},
    command::{PaymentRequest, TransferRequest},
    config::{IdConfig, LedgerConfig},
    engine::Ledger,
    error::LedgerError,
    id::IdGenerator,
    store::{InMemoryStore, LedgerStore, SqliteStore},
    transaction::{PaymentMethod, TransactionStatus},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn in_memory() -> Ledger<InMemoryStore> {
    Ledger::new(InMemoryStore::default(), LedgerConfig::default())
}

fn sqlite() -> Ledger<SqliteStore> {
    Ledger::new(SqliteStore::open_in_memory().unwrap(), LedgerConfig::default())
}

fn open_funded<S: LedgerStore>(ledger: &Ledger<S>, user: UserId, balance: Decimal) -> AccountNumber {
    let account = ledger.create_account(user).unwrap();
    if balance > Decimal::ZERO {
        ledger.deposit(user, balance, None).unwrap();
    }
    account.number().clone()
}

fn total<S: LedgerStore>(ledger: &Ledger<S>) -> Decimal {
    ledger
        .accounts()
        .unwrap()
        .iter()
        .map(|account| account.balance())
        .sum()
}

fn transfer_scenario<S: LedgerStore>(ledger: Ledger<S>) {
    open_funded(&ledger, 1, dec!(100.00));
    let b = open_funded(&ledger, 2, dec!(50.00));

    let tx = ledger
        .transfer(
            1,
            &TransferRequest {
                to_account_number: b,
                amount: dec!(30.00),
            },
        )
        .unwrap();

    assert_eq!(ledger.balance(1).unwrap(), dec!(70.00));
    assert_eq!(ledger.balance(2).unwrap(), dec!(80.00));
    assert_eq!(tx.amount(), dec!(30.00));
    assert_eq!(tx.payment_method().as_str(), "TRANSFER");
    assert_eq!(tx.status().as_str(), "COMPLETED");
    assert_eq!(total(&ledger), dec!(150.00));
}

fn insufficient_balance_scenario<S: LedgerStore>(ledger: Ledger<S>) {
    open_funded(&ledger, 1, dec!(10.00));
    let b = open_funded(&ledger, 2, Decimal::ZERO);
    let before = ledger.transactions(1).unwrap();

    let err = ledger
        .transfer(
            1,
            &TransferRequest {
                to_account_number: b,
                amount: dec!(50.00),
            },
        )
        .unwrap_err();

    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    assert_eq!(ledger.balance(1).unwrap(), dec!(10.00));
    assert_eq!(ledger.balance(2).unwrap(), Decimal::ZERO);
    assert_eq!(ledger.transactions(1).unwrap(), before);
    assert!(ledger.transactions(2).unwrap().is_empty());
}

fn invalid_amounts_mutate_nothing<S: LedgerStore>(ledger: Ledger<S>) {
    open_funded(&ledger, 1, dec!(10.00));
    let b = open_funded(&ledger, 2, dec!(1.00));
    for amount in [Decimal::ZERO, dec!(-0.01), dec!(-10)] {
        let err = ledger
            .transfer(
                1,
                &TransferRequest {
                    to_account_number: b.clone(),
                    amount,
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
    }
    assert_eq!(ledger.balance(1).unwrap(), dec!(10.00));
    assert_eq!(ledger.balance(2).unwrap(), dec!(1.00));
    assert_eq!(ledger.transactions(1).unwrap().len(), 1);
}

fn self_transfer_rejected<S: LedgerStore>(ledger: Ledger<S>) {
    let a = open_funded(&ledger, 1, dec!(10.00));
    let err = ledger
        .transfer(
            1,
            &TransferRequest {
                to_account_number: a,
                amount: dec!(1),
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::SelfTransferNotAllowed { .. }));
    assert_eq!(ledger.balance(1).unwrap(), dec!(10.00));
}

fn deposit_scenario<S: LedgerStore>(ledger: Ledger<S>) {
    open_funded(&ledger, 1, dec!(3.10));
    let tx = ledger
        .deposit(1, dec!(25.50), Some("paycheck".to_string()))
        .unwrap();
    assert_eq!(ledger.balance(1).unwrap(), dec!(28.60));
    assert_eq!(tx.payment_method(), &PaymentMethod::Deposit);
    assert_eq!(tx.description(), Some("paycheck"));
    assert_eq!(ledger.transaction(tx.id()).unwrap(), tx);
}

fn duplicate_account_rejected<S: LedgerStore>(ledger: Ledger<S>) {
    ledger.create_account(1).unwrap();
    let err = ledger.create_account(1).unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyExists { user: 1 }));
    let owned = ledger
        .accounts()
        .unwrap()
        .into_iter()
        .filter(|account| account.owner() == 1)
        .count();
    assert_eq!(owned, 1);
}

fn concurrent_deposits_get_unique_ids<S: LedgerStore>(ledger: Ledger<S>) {
    ledger.create_account(1).unwrap();
    let shared = &ledger;
    let ids: Vec<String> = thread::scope(|scope| {
        let workers: Vec<_> = (0..10)
            .map(|_| {
                scope.spawn(move || {
                    (0..100)
                        .map(|_| {
                            shared
                                .deposit(1, dec!(0.01), None)
                                .unwrap()
                                .id()
                                .to_string()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect()
    });

    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), 1000);
    assert_eq!(ledger.balance(1).unwrap(), dec!(10.00));
    assert_eq!(ledger.transactions(1).unwrap().len(), 1000);
}

fn opposite_transfers_conserve_money<S: LedgerStore>(ledger: Ledger<S>) {
    let a = open_funded(&ledger, 1, dec!(100));
    let b = open_funded(&ledger, 2, dec!(100));
    let c = open_funded(&ledger, 3, dec!(100));

    thread::scope(|scope| {
        let routes = [(1, &b), (2, &a), (2, &c), (3, &a), (1, &c), (3, &b)];
        for (from, to) in routes {
            let ledger = &ledger;
            scope.spawn(move || {
                let request = TransferRequest {
                    to_account_number: to.clone(),
                    amount: dec!(1.25),
                };
                for _ in 0..50 {
                    match ledger.transfer(from, &request) {
                        Ok(_) | Err(LedgerError::InsufficientBalance { .. }) => {}
                        Err(err) => panic!("unexpected transfer failure: {err}"),
                    }
                }
            });
        }
    });

    assert_eq!(total(&ledger), dec!(300));
    for account in ledger.accounts().unwrap() {
        assert!(account.balance() >= Decimal::ZERO);
    }
}

fn receiver_entries_are_configurable<S: LedgerStore>(store: S) {
    let config = LedgerConfig::from_yaml("transfer_entries: sender_and_receiver").unwrap();
    let ledger = Ledger::new(store, config);
    open_funded(&ledger, 1, dec!(20));
    let b = open_funded(&ledger, 2, Decimal::ZERO);

    let tx = ledger
        .transfer(
            1,
            &TransferRequest {
                to_account_number: b,
                amount: dec!(5),
            },
        )
        .unwrap();
    let received = ledger.transactions(2).unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payment_method(), &PaymentMethod::TransferCredit);
    assert_eq!(received[0].owner(), 2);
    assert_eq!(ledger.transactions(1).unwrap()[0], tx);
}

fn payments_stay_pending<S: LedgerStore>(ledger: Ledger<S>) {
    open_funded(&ledger, 1, dec!(5));
    let tx = ledger
        .record_payment(
            1,
            &PaymentRequest {
                amount: dec!(99),
                payment_method: "CARD".to_string(),
                description: None,
            },
        )
        .unwrap();
    assert_eq!(tx.status(), TransactionStatus::Pending);
    assert_eq!(ledger.balance(1).unwrap(), dec!(5));
}

fn concurrent_account_creation_opens_one<S: LedgerStore>(ledger: Ledger<S>) {
    let shared = &ledger;
    let outcomes: Vec<Result<(), LedgerError>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| scope.spawn(move || shared.create_account(1).map(|_| ())))
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    for outcome in &outcomes {
        assert!(matches!(outcome, Ok(()) | Err(LedgerError::AlreadyExists { user: 1 })));
    }
    let owned = ledger
        .accounts()
        .unwrap()
        .into_iter()
        .filter(|account| account.owner() == 1)
        .count();
    assert_eq!(owned, 1);
}

fn balances_near_max_are_rejected_not_overflowed<S: LedgerStore>(ledger: Ledger<S>) {
    let a = open_funded(&ledger, 1, Decimal::MAX);
    let b = open_funded(&ledger, 2, dec!(1));

    let err = ledger.deposit(1, dec!(1), None).unwrap_err();
    assert!(matches!(err, LedgerError::BalanceOverflow { .. }));
    assert_eq!(err.code(), "BALANCE_OVERFLOW");
    assert_eq!(ledger.balance(1).unwrap(), Decimal::MAX);
    assert_eq!(ledger.transactions(1).unwrap().len(), 1);

    // both end balances fit even though their sum does not
    ledger
        .transfer(
            1,
            &TransferRequest {
                to_account_number: b,
                amount: dec!(1),
            },
        )
        .unwrap();
    assert_eq!(ledger.balance(1).unwrap(), Decimal::MAX - dec!(1));
    assert_eq!(ledger.balance(2).unwrap(), dec!(2));

    let err = ledger
        .transfer(
            2,
            &TransferRequest {
                to_account_number: a,
                amount: dec!(2),
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::BalanceOverflow { .. }));
    assert_eq!(ledger.balance(1).unwrap(), Decimal::MAX - dec!(1));
    assert_eq!(ledger.balance(2).unwrap(), dec!(2));

    // the store keeps working after the rejections
    ledger.deposit(2, dec!(1), None).unwrap();
    assert_eq!(ledger.balance(2).unwrap(), dec!(3));
}

fn numbers_survive_forced_collisions<S: LedgerStore>(store: S) {
    // every draw repeats the previous one twice before moving on
    let mut next = 0u64;
    let mut repeats = 0;
    let ids = IdGenerator::with_number_source(move || {
        repeats += 1;
        if repeats == 3 {
            repeats = 0;
            next += 1;
        }
        next
    });
    let config = LedgerConfig {
        ids: IdConfig {
            max_attempts: 8,
            backoff_ms: 0,
        },
        ..LedgerConfig::default()
    };
    let ledger = Ledger::with_id_generator(store, config, ids);
    for user in 0..20 {
        ledger.create_account(user).unwrap();
    }
    let numbers: HashSet<AccountNumber> = ledger
        .accounts()
        .unwrap()
        .into_iter()
        .map(|account| account.number().clone())
        .collect();
    assert_eq!(numbers.len(), 20);
}

macro_rules! on_both_stores {
    ($($property:ident),* $(,)?) => {
        mod in_memory_store {
            use super::*;
            $(
                #[test]
                fn $property() {
                    super::$property(in_memory());
                }
            )*
        }

        mod sqlite_store {
            use super::*;
            $(
                #[test]
                fn $property() {
                    super::$property(sqlite());
                }
            )*
        }
    };
}

on_both_stores!(
    transfer_scenario,
    insufficient_balance_scenario,
    invalid_amounts_mutate_nothing,
    self_transfer_rejected,
    deposit_scenario,
    duplicate_account_rejected,
    concurrent_deposits_get_unique_ids,
    opposite_transfers_conserve_money,
    payments_stay_pending,
    concurrent_account_creation_opens_one,
    balances_near_max_are_rejected_not_overflowed,
);

#[test]
fn receiver_entries_in_memory() {
    receiver_entries_are_configurable(InMemoryStore::default());
}

#[test]
fn receiver_entries_sqlite() {
    receiver_entries_are_configurable(SqliteStore::open_in_memory().unwrap());
}

#[test]
fn forced_collisions_in_memory() {
    numbers_survive_forced_collisions(InMemoryStore::default());
}

#[test]
fn forced_collisions_sqlite() {
    numbers_survive_forced_collisions(SqliteStore::open_in_memory().unwrap());
}
