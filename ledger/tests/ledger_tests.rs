use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use splitter_ledger::{
    replay, DeactivationPolicy, LedgerConfig, LedgerEvent, LedgerStatus, SplitLedger,
    SplitPolicy, SplitterError, TransferError,
};
use splitter_nullables::{NullTransport, PaymentError};
use splitter_types::{Amount, PartyId};

fn alice() -> PartyId {
    PartyId::new("alice")
}
fn bob() -> PartyId {
    PartyId::new("bob")
}
fn carol() -> PartyId {
    PartyId::new("carol")
}
fn dave() -> PartyId {
    PartyId::new("dave")
}
fn emma() -> PartyId {
    PartyId::new("emma")
}

fn amount(raw: u128) -> Amount {
    Amount::new(raw)
}

fn config() -> LedgerConfig {
    LedgerConfig::new(alice(), bob(), carol())
}

fn setup(config: LedgerConfig) -> (Arc<NullTransport>, Arc<SplitLedger>) {
    let transport = Arc::new(NullTransport::new());
    let ledger = Arc::new(SplitLedger::new(&config, transport.clone()));
    for party in [alice(), bob(), carol(), dave(), emma()] {
        transport.fund(&party, amount(10_000_000));
    }
    (transport, ledger)
}

fn deposit_bare(
    transport: &NullTransport,
    ledger: &SplitLedger,
    payer: &PartyId,
    value: u128,
) -> Result<(), PaymentError> {
    transport
        .pay(payer, amount(value), || ledger.deposit_bare(payer, amount(value)))
        .map(|_| ())
}

#[test]
fn bare_deposit_withdraw_and_deactivate_end_to_end() {
    let (transport, ledger) = setup(config());

    deposit_bare(&transport, &ledger, &alice(), 1_000_000).unwrap();
    assert_eq!(transport.balance_of(&alice()), amount(9_000_000));
    assert_eq!(ledger.credit_of(&bob()), amount(500_000));
    assert_eq!(ledger.credit_of(&carol()), amount(500_000));
    assert_eq!(ledger.custodial_balance(), amount(1_000_000));

    let receipt = ledger.withdraw(&bob()).unwrap();
    assert_eq!(receipt.amount, amount(500_000));
    assert_eq!(transport.balance_of(&bob()), amount(10_500_000));
    assert_eq!(ledger.custodial_balance(), amount(500_000));

    ledger.withdraw(&carol()).unwrap();
    assert_eq!(transport.balance_of(&carol()), amount(10_500_000));
    assert_eq!(ledger.custodial_balance(), Amount::ZERO);

    let closed = ledger.deactivate(&alice()).unwrap();
    assert_eq!(closed.returned, Amount::ZERO);
    assert!(!ledger.is_active());
    assert_eq!(ledger.status(), LedgerStatus::Inactive);

    assert!(matches!(ledger.withdraw(&bob()), Err(SplitterError::LedgerInactive)));
    assert!(matches!(ledger.withdraw(&carol()), Err(SplitterError::LedgerInactive)));
}

#[test]
fn split_rounds_odd_unit_to_first_recipient() {
    let (transport, ledger) = setup(config());

    transport
        .pay(&dave(), amount(1_000_000), || {
            ledger.split(&dave(), &emma(), &carol(), amount(1_000_000))
        })
        .unwrap();
    assert_eq!(ledger.credit_of(&emma()), amount(500_000));
    assert_eq!(ledger.credit_of(&carol()), amount(500_000));

    let receipt = transport
        .pay(&dave(), amount(1_000_001), || {
            ledger.split(&dave(), &emma(), &carol(), amount(1_000_001))
        })
        .unwrap();
    assert_eq!(receipt.shares.first, amount(500_001));
    assert_eq!(receipt.shares.second, amount(500_000));
    assert_eq!(ledger.credit_of(&emma()), amount(1_000_001));
    assert_eq!(ledger.credit_of(&carol()), amount(1_000_000));
    assert_eq!(ledger.custodial_balance(), amount(2_000_001));
}

#[test]
fn split_to_same_party_credits_whole_amount() {
    let (_transport, ledger) = setup(config());
    ledger.split(&alice(), &emma(), &emma(), amount(7)).unwrap();
    assert_eq!(ledger.credit_of(&emma()), amount(7));
    assert!(ledger.snapshot().is_solvent());
}

#[test]
fn bare_deposit_from_non_owner_is_refused() {
    let (transport, ledger) = setup(config());

    let err = deposit_bare(&transport, &ledger, &bob(), 1_000_000).unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Rejected(SplitterError::Unauthorized { ref caller, .. }) if *caller == bob()
    ));
    assert_eq!(transport.balance_of(&bob()), amount(10_000_000));
    assert_eq!(ledger.custodial_balance(), Amount::ZERO);
    assert_eq!(ledger.credit_of(&bob()), Amount::ZERO);
    assert_eq!(ledger.credit_of(&carol()), Amount::ZERO);
    assert_eq!(ledger.history().len(), 1);
}

#[test]
fn owner_only_policy_refuses_other_payers() {
    let (transport, ledger) = setup(config().with_split_policy(SplitPolicy::OwnerOnly));

    let err = transport
        .pay(&dave(), amount(100), || ledger.split(&dave(), &emma(), &carol(), amount(100)))
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Rejected(SplitterError::Unauthorized { operation: "split", .. })
    ));
    assert_eq!(ledger.credit_of(&emma()), Amount::ZERO);
    assert_eq!(ledger.credit_of(&carol()), Amount::ZERO);
    assert_eq!(transport.balance_of(&dave()), amount(10_000_000));

    ledger.split(&alice(), &emma(), &carol(), amount(100)).unwrap();
    assert_eq!(ledger.credit_of(&emma()), amount(50));
}

#[test]
fn any_payer_policy_accepts_other_payers() {
    let (_transport, ledger) = setup(config());
    assert_eq!(ledger.split_policy(), SplitPolicy::AnyPayer);

    let receipt = ledger.split(&dave(), &emma(), &carol(), amount(10)).unwrap();
    assert_eq!(receipt.payer, dave());
    assert_eq!(
        ledger.history().last(),
        Some(&LedgerEvent::Split {
            payer: dave(),
            recipient_a: emma(),
            recipient_b: carol(),
            amount: amount(10),
        })
    );
}

#[test]
fn unsplittable_amounts_change_nothing() {
    let (_transport, ledger) = setup(config());
    for raw in [0, 1] {
        assert!(matches!(
            ledger.deposit_bare(&alice(), amount(raw)),
            Err(SplitterError::AmountTooSmall { .. })
        ));
        assert!(matches!(
            ledger.split(&dave(), &emma(), &carol(), amount(raw)),
            Err(SplitterError::AmountTooSmall { .. })
        ));
    }
    assert_eq!(ledger.custodial_balance(), Amount::ZERO);
    assert_eq!(ledger.total_credits(), Amount::ZERO);
}

#[test]
fn overflowing_split_is_rejected_without_mutation() {
    let (_transport, ledger) = setup(config());
    ledger.split(&alice(), &emma(), &carol(), amount(u128::MAX - 1)).unwrap();
    let before = ledger.snapshot();

    let err = ledger.split(&alice(), &emma(), &carol(), amount(10)).unwrap_err();
    assert!(matches!(err, SplitterError::AmountOverflow { .. }));
    assert_eq!(ledger.snapshot(), before);
}

#[test]
fn second_withdrawal_finds_nothing() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();

    ledger.withdraw(&bob()).unwrap();
    let err = ledger.withdraw(&bob()).unwrap_err();
    assert!(matches!(err, SplitterError::NothingToWithdraw { ref party } if *party == bob()));
    assert_eq!(transport.total_sent_to(&bob()), amount(500));
}

#[test]
fn reentrant_withdrawal_sees_zero_credit() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000_000).unwrap();

    let nested = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&nested);
    let weak = Arc::downgrade(&ledger);
    transport.on_receive(&bob(), move |party, _| {
        if let Some(ledger) = weak.upgrade() {
            seen.lock().unwrap().push(ledger.withdraw(party));
        }
        Ok(())
    });

    let receipt = ledger.withdraw(&bob()).unwrap();
    assert_eq!(receipt.amount, amount(500_000));

    let nested = nested.lock().unwrap();
    assert_eq!(nested.len(), 1);
    assert!(matches!(nested[0], Err(SplitterError::NothingToWithdraw { .. })));
    assert_eq!(transport.total_sent_to(&bob()), amount(500_000));
    assert_eq!(transport.balance_of(&bob()), amount(10_500_000));
    assert_eq!(ledger.custodial_balance(), amount(500_000));
    assert_eq!(ledger.pending_payouts(), Amount::ZERO);
}

#[test]
fn deactivation_is_blocked_during_an_in_flight_withdrawal() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();
    ledger.withdraw(&carol()).unwrap();

    let attempt = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&attempt);
    let weak = Arc::downgrade(&ledger);
    transport.on_receive(&bob(), move |_, _| {
        if let Some(ledger) = weak.upgrade() {
            *seen.lock().unwrap() = Some(ledger.deactivate(&alice()));
        }
        Ok(())
    });

    ledger.withdraw(&bob()).unwrap();
    let attempt = attempt.lock().unwrap().take().unwrap();
    assert!(matches!(
        attempt,
        Err(SplitterError::PendingCreditsOutstanding { pending }) if pending == amount(500)
    ));
    assert!(ledger.is_active());
}

#[test]
fn failed_transfer_restores_credit() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();
    transport.refuse_transfers_to(&bob());

    let err = ledger.withdraw(&bob()).unwrap_err();
    assert!(matches!(
        err,
        SplitterError::TransferFailed { source: TransferError::Rejected { .. }, .. }
    ));
    assert_eq!(ledger.credit_of(&bob()), amount(500));
    assert_eq!(ledger.custodial_balance(), amount(1_000));
    assert_eq!(ledger.pending_payouts(), Amount::ZERO);
    assert_eq!(transport.balance_of(&bob()), amount(10_000_000));
    assert_eq!(ledger.history().len(), 2);

    transport.accept_transfers_to(&bob());
    assert_eq!(ledger.withdraw(&bob()).unwrap().amount, amount(500));
}

#[test]
fn reverting_receipt_logic_restores_credit() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();
    transport.on_receive(&carol(), |_, _| Err("revert".into()));

    assert!(matches!(
        ledger.withdraw(&carol()),
        Err(SplitterError::TransferFailed { .. })
    ));
    assert_eq!(ledger.credit_of(&carol()), amount(500));
    assert_eq!(transport.balance_of(&carol()), amount(10_000_000));
}

#[test]
fn offline_transport_fails_withdrawal_atomically() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();
    let before = ledger.snapshot();
    transport.set_offline(true);

    assert!(matches!(
        ledger.withdraw(&bob()),
        Err(SplitterError::TransferFailed {
            source: TransferError::Unavailable(_),
            ..
        })
    ));
    assert_eq!(ledger.snapshot(), before);
}

#[test]
fn deactivation_waits_for_outstanding_credits() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();

    let err = ledger.deactivate(&alice()).unwrap_err();
    assert!(matches!(
        err,
        SplitterError::PendingCreditsOutstanding { pending } if pending == amount(1_000)
    ));
    assert!(ledger.is_active());

    ledger.withdraw(&bob()).unwrap();
    assert!(ledger.deactivate(&alice()).is_err());
    ledger.withdraw(&carol()).unwrap();
    ledger.deactivate(&alice()).unwrap();
    assert!(!ledger.is_active());
}

#[test]
fn only_owner_may_deactivate() {
    let (_transport, ledger) = setup(config());
    let err = ledger.deactivate(&bob()).unwrap_err();
    assert!(matches!(
        err,
        SplitterError::Unauthorized { operation: "deactivate", .. }
    ));
    assert!(ledger.is_active());
}

#[test]
fn deactivated_ledger_rejects_every_operation() {
    let (transport, ledger) = setup(config());
    ledger.deactivate(&alice()).unwrap();

    assert!(matches!(
        deposit_bare(&transport, &ledger, &alice(), 100),
        Err(PaymentError::Rejected(SplitterError::LedgerInactive))
    ));
    assert!(matches!(
        deposit_bare(&transport, &ledger, &dave(), 100),
        Err(PaymentError::Rejected(SplitterError::LedgerInactive))
    ));
    assert!(matches!(
        ledger.split(&dave(), &emma(), &carol(), amount(100)),
        Err(SplitterError::LedgerInactive)
    ));
    assert!(matches!(ledger.withdraw(&bob()), Err(SplitterError::LedgerInactive)));
    assert!(matches!(ledger.deactivate(&alice()), Err(SplitterError::LedgerInactive)));
    assert_eq!(transport.balance_of(&alice()), amount(10_000_000));
    assert_eq!(ledger.custodial_balance(), Amount::ZERO);
}

#[test]
fn forfeit_policy_returns_unpaid_credits_to_owner_once() {
    let (transport, ledger) =
        setup(config().with_deactivation(DeactivationPolicy::ForfeitToOwner));
    deposit_bare(&transport, &ledger, &alice(), 1_001).unwrap();
    ledger.withdraw(&carol()).unwrap();

    let closed = ledger.deactivate(&alice()).unwrap();
    assert_eq!(closed.returned, amount(501));
    assert_eq!(closed.forfeited, amount(501));
    assert_eq!(transport.balance_of(&alice()), amount(10_000_000 - 1_001 + 501));
    assert_eq!(transport.total_sent_to(&alice()), amount(501));
    assert_eq!(ledger.credit_of(&bob()), Amount::ZERO);
    assert_eq!(ledger.custodial_balance(), Amount::ZERO);

    assert!(matches!(ledger.deactivate(&alice()), Err(SplitterError::LedgerInactive)));
    assert_eq!(transport.total_sent_to(&alice()), amount(501));
}

#[test]
fn failed_residual_transfer_keeps_ledger_active() {
    let (transport, ledger) =
        setup(config().with_deactivation(DeactivationPolicy::ForfeitToOwner));
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();
    transport.refuse_transfers_to(&alice());

    assert!(matches!(
        ledger.deactivate(&alice()),
        Err(SplitterError::TransferFailed { .. })
    ));
    assert!(ledger.is_active());
    assert_eq!(ledger.credit_of(&bob()), amount(500));
    assert_eq!(ledger.custodial_balance(), amount(1_000));

    ledger.withdraw(&bob()).unwrap();
}

#[test]
fn subscriber_from_genesis_sees_full_history() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ledger.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    ledger.withdraw(&bob()).unwrap();
    ledger.withdraw(&carol()).unwrap();
    ledger.deactivate(&alice()).unwrap();

    let seen = seen.lock().unwrap();
    let kinds: Vec<_> = seen.iter().map(LedgerEvent::kind).collect();
    assert_eq!(
        kinds,
        ["initialized", "split", "withdrawn", "withdrawn", "deactivated"]
    );
    assert_eq!(*seen, ledger.history());
    assert_eq!(
        seen[0],
        LedgerEvent::Initialized {
            owner: alice(),
            recipient_a: bob(),
            recipient_b: carol(),
        }
    );
}

#[test]
fn listener_may_read_live_state() {
    let (transport, ledger) = setup(config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let weak = Arc::downgrade(&ledger);
    ledger.subscribe(move |event| {
        if let Some(ledger) = weak.upgrade() {
            sink.lock().unwrap().push((event.kind(), ledger.credit_of(&bob())));
        }
    });

    let (done_tx, done_rx) = mpsc::channel();
    let worker = Arc::clone(&ledger);
    let payer = Arc::clone(&transport);
    thread::spawn(move || {
        let _ = done_tx.send(deposit_bare(&payer, &worker, &alice(), 10).is_ok());
    });
    let accepted = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("deposit blocked on its own listener");

    assert!(accepted);
    assert_eq!(
        *seen.lock().unwrap(),
        [("initialized", Amount::ZERO), ("split", amount(5))]
    );
}

#[test]
fn listener_may_call_back_into_the_ledger() {
    let (transport, ledger) = setup(config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let weak = Arc::downgrade(&ledger);
    ledger.subscribe(move |event| {
        sink.lock().unwrap().push(event.kind());
        if let (LedgerEvent::Split { .. }, Some(ledger)) = (event, weak.upgrade()) {
            ledger.withdraw(&bob()).unwrap();
        }
    });

    deposit_bare(&transport, &ledger, &alice(), 10).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        ["initialized", "split", "withdrawn"]
    );
    assert_eq!(transport.balance_of(&bob()), amount(10_000_005));
    assert_eq!(ledger.history().len(), 3);
}

#[test]
fn withdrawal_is_published_in_reservation_order() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();

    // Bob's receipt logic credits bob again while his withdrawal is running.
    let weak = Arc::downgrade(&ledger);
    transport.on_receive(&bob(), move |_, _| {
        if let Some(ledger) = weak.upgrade() {
            ledger
                .split(&dave(), &bob(), &emma(), amount(100))
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    });

    ledger.withdraw(&bob()).unwrap();

    let history = ledger.history();
    let kinds: Vec<_> = history.iter().map(LedgerEvent::kind).collect();
    assert_eq!(kinds, ["initialized", "split", "withdrawn", "split"]);
    assert_eq!(ledger.credit_of(&bob()), amount(50));

    let replayed = replay(&history).unwrap();
    assert_eq!(replayed.to_snapshot(), ledger.snapshot());
}

#[test]
fn failed_withdrawal_does_not_hold_back_later_events() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000).unwrap();

    let weak = Arc::downgrade(&ledger);
    transport.on_receive(&bob(), move |_, _| {
        if let Some(ledger) = weak.upgrade() {
            ledger
                .split(&dave(), &emma(), &emma(), amount(4))
                .map_err(|e| e.to_string())?;
        }
        Err("revert".into())
    });

    assert!(ledger.withdraw(&bob()).is_err());

    let kinds: Vec<_> = ledger.history().iter().map(LedgerEvent::kind).collect();
    assert_eq!(kinds, ["initialized", "split", "split"]);
    assert_eq!(ledger.credit_of(&bob()), amount(500));
    let replayed = replay(&ledger.history()).unwrap();
    assert_eq!(replayed.to_snapshot(), ledger.snapshot());
}

#[test]
fn replayed_history_matches_live_snapshot() {
    let (transport, ledger) = setup(config());
    deposit_bare(&transport, &ledger, &alice(), 1_000_001).unwrap();
    ledger.split(&dave(), &emma(), &bob(), amount(333)).unwrap();
    ledger.withdraw(&bob()).unwrap();

    let replayed = replay(&ledger.history()).unwrap();
    assert_eq!(replayed.to_snapshot(), ledger.snapshot());
    assert_eq!(replayed.to_snapshot().digest(), ledger.snapshot().digest());

    ledger.withdraw(&carol()).unwrap();
    ledger.withdraw(&emma()).unwrap();
    ledger.deactivate(&alice()).unwrap();
    let replayed = replay(&ledger.history()).unwrap();
    assert!(!replayed.active);
    assert_eq!(replayed.to_snapshot().digest_hex(), ledger.snapshot().digest_hex());
}

#[test]
fn concurrent_deposits_and_withdrawals_conserve_value() {
    let (transport, ledger) = setup(config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ledger.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    let payers = ["p0", "p1", "p2", "p3"].map(PartyId::new);
    for payer in &payers {
        transport.fund(payer, amount(1_000_000));
    }

    let mut handles = Vec::new();
    for payer in payers.clone() {
        let transport = Arc::clone(&transport);
        let ledger = Arc::clone(&ledger);
        handles.push(thread::spawn(move || {
            for i in 0..50u128 {
                let value = amount(2 + i);
                transport
                    .pay(&payer, value, || ledger.split(&payer, &bob(), &carol(), value))
                    .unwrap();
            }
        }));
    }
    for party in [bob(), carol()] {
        let ledger = Arc::clone(&ledger);
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                match ledger.withdraw(&party) {
                    Ok(_) | Err(SplitterError::NothingToWithdraw { .. }) => {}
                    Err(e) => panic!("unexpected withdrawal error: {e}"),
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(ledger.snapshot().is_solvent());
    for party in [bob(), carol()] {
        let _ = ledger.withdraw(&party);
    }

    let deposited: u128 = 4 * (0..50u128).map(|i| 2 + i).sum::<u128>();
    let paid = transport.total_sent_to(&bob()).raw() + transport.total_sent_to(&carol()).raw();
    assert_eq!(paid, deposited);
    assert_eq!(ledger.custodial_balance(), Amount::ZERO);
    let replayed = replay(&ledger.history()).unwrap();
    assert_eq!(replayed.to_snapshot(), ledger.snapshot());
    assert_eq!(*seen.lock().unwrap(), ledger.history());
}
