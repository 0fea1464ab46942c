//! End-to-end round lifecycle through the supervisor task: a real tick
//! loop, a real command queue, and an in-memory wallet. Durations are
//! shrunk so a full WAITING -> FLYING -> CRASHED -> WAITING cycle fits in
//! well under a second.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use skyrush_backend::engine::oracle::{crash_point, RoundSeed};
use skyrush_backend::engine::{
    CrashParams, EngineConfig, Rejection, SupervisorHandle, WsServerEvent,
};
use skyrush_backend::ledger::{InMemoryLedger, SettlementLedger};

fn fast_config() -> EngineConfig {
    EngineConfig {
        waiting_ms: 200,
        cooldown_ms: 200,
        tick_ms: 10,
        growth_rate: 0.05,
        growth_exponent: 1.0,
        // Flight always lasts at least ~80ms so an early cash-out cannot
        // race the crash in this test.
        crash: CrashParams {
            p_low: 0.0,
            low_range_cap: 0.0,
            tail_min: 1.5,
            tail_cap: 2.5,
        },
        max_slots_per_player: 2,
        history_depth: 15,
        cashout_grace_ms: 0,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<WsServerEvent>) -> WsServerEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<WsServerEvent>, mut pred: F) -> WsServerEvent
where
    F: FnMut(&WsServerEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn losing_bet_full_cycle_is_fair_and_settles() {
    let ledger = Arc::new(InMemoryLedger::new().with_balance("p1", 100.0));
    let (event_tx, mut rx) = broadcast::channel(1024);
    let supervisor = SupervisorHandle::spawn(fast_config(), ledger.clone(), event_tx);

    // WAITING entry publishes the commitment before any bet is taken.
    let (commitment, waiting_round) = match next_event(&mut rx).await {
        WsServerEvent::RoundWaiting {
            round_id,
            commitment,
            ..
        } => (commitment, round_id),
        other => panic!("expected round_waiting, got {other:?}"),
    };

    let ack = supervisor.place_bet("p1".into(), 0, 10.0).await;
    assert!(
        matches!(ack, WsServerEvent::BetAccepted { stake, .. } if stake == 10.0),
        "expected bet_accepted, got {ack:?}"
    );
    // Escrow taken synchronously before the slot opened.
    assert_eq!(ledger.balance("p1").await.unwrap(), 90.0);

    // Ticks carry a non-decreasing multiplier.
    let mut last = 0.0_f64;
    let crashed = wait_for(&mut rx, |e| {
        if let WsServerEvent::RoundTick { multiplier, .. } = e {
            assert!(*multiplier >= last);
            last = *multiplier;
        }
        matches!(e, WsServerEvent::RoundCrashed { .. })
    })
    .await;

    let WsServerEvent::RoundCrashed {
        round_id,
        crash_point: revealed,
        seed_hex,
        nonce,
    } = crashed
    else {
        unreachable!()
    };
    assert_eq!(round_id, waiting_round);
    assert!(revealed >= 1.0);

    // Commit-reveal verifies: the published commitment binds the seed,
    // and the crash point recomputes from (seed, nonce).
    let seed: [u8; 32] = hex::decode(&seed_hex).unwrap().try_into().unwrap();
    let round_seed = RoundSeed { seed, nonce };
    assert_eq!(round_seed.commitment(), commitment);
    let recomputed = crash_point(&seed, nonce, &fast_config().crash);
    assert!((recomputed - revealed).abs() < 1e-12);

    // Never cashed out: stake forfeited.
    assert_eq!(ledger.balance("p1").await.unwrap(), 90.0);

    // Cooldown expires into a fresh round with a new commitment.
    let next_waiting = wait_for(&mut rx, |e| {
        matches!(e, WsServerEvent::RoundWaiting { .. })
    })
    .await;
    let WsServerEvent::RoundWaiting {
        round_id: next_round,
        commitment: next_commitment,
        ..
    } = next_waiting
    else {
        unreachable!()
    };
    assert_ne!(next_round, waiting_round);
    assert_ne!(next_commitment, commitment);
}

#[tokio::test]
async fn cash_out_credits_the_wallet() {
    let ledger = Arc::new(InMemoryLedger::new().with_balance("p2", 50.0));
    let (event_tx, mut rx) = broadcast::channel(1024);
    let supervisor = SupervisorHandle::spawn(fast_config(), ledger.clone(), event_tx);

    wait_for(&mut rx, |e| matches!(e, WsServerEvent::RoundWaiting { .. })).await;
    let ack = supervisor.place_bet("p2".into(), 0, 10.0).await;
    assert!(matches!(ack, WsServerEvent::BetAccepted { .. }));
    assert_eq!(ledger.balance("p2").await.unwrap(), 40.0);

    // Cash out as soon as the flight starts, well before the earliest
    // possible crash.
    wait_for(&mut rx, |e| matches!(e, WsServerEvent::RoundTick { .. })).await;
    let ack = supervisor.cash_out("p2".into(), 0).await;
    let WsServerEvent::CashOutAccepted {
        multiplier, payout, ..
    } = ack
    else {
        panic!("expected cash_out_accepted, got {ack:?}");
    };
    assert!(multiplier >= 1.0);
    assert!((payout - 10.0 * multiplier).abs() < 1e-9);

    // A duplicate cash-out command is acknowledged as a no-op rejection
    // and never double-paid.
    let dup = supervisor.cash_out("p2".into(), 0).await;
    assert!(
        matches!(
            dup,
            WsServerEvent::CashOutRejected {
                reason: Rejection::NoOpenBet,
                ..
            }
        ),
        "expected duplicate to be rejected, got {dup:?}"
    );

    // The payout credit lands (retry loop is async; poll briefly).
    let expected = 40.0 + payout;
    for _ in 0..50 {
        if (ledger.balance("p2").await.unwrap() - expected).abs() < 1e-9 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!((ledger.balance("p2").await.unwrap() - expected).abs() < 1e-9);
}

#[tokio::test]
async fn bet_with_insufficient_funds_fails_closed() {
    let ledger = Arc::new(InMemoryLedger::new().with_balance("p3", 5.0));
    let (event_tx, mut rx) = broadcast::channel(1024);
    let supervisor = SupervisorHandle::spawn(fast_config(), ledger.clone(), event_tx);

    wait_for(&mut rx, |e| matches!(e, WsServerEvent::RoundWaiting { .. })).await;
    let ack = supervisor.place_bet("p3".into(), 0, 10.0).await;
    assert!(matches!(
        ack,
        WsServerEvent::BetRejected {
            reason: Rejection::InsufficientBalance,
            ..
        }
    ));
    // Nothing escrowed.
    assert_eq!(ledger.balance("p3").await.unwrap(), 5.0);

    // Cash-out with no bet in place is a typed rejection too.
    let ack = supervisor.cash_out("p3".into(), 0).await;
    assert!(matches!(ack, WsServerEvent::CashOutRejected { .. }));
}

#[tokio::test]
async fn ledger_outage_fails_bets_closed() {
    let ledger = Arc::new(InMemoryLedger::new().with_balance("p5", 100.0));
    ledger.set_fail_debits(true);
    let (event_tx, mut rx) = broadcast::channel(1024);
    let mut cfg = fast_config();
    cfg.waiting_ms = 400;
    let supervisor = SupervisorHandle::spawn(cfg, ledger.clone(), event_tx);

    wait_for(&mut rx, |e| matches!(e, WsServerEvent::RoundWaiting { .. })).await;
    let ack = supervisor.place_bet("p5".into(), 0, 10.0).await;
    assert!(matches!(
        ack,
        WsServerEvent::BetRejected {
            reason: Rejection::LedgerUnavailable,
            ..
        }
    ));
    assert_eq!(ledger.balance("p5").await.unwrap(), 100.0);

    // The slot freed up: once the wallet recovers the same index is usable.
    ledger.set_fail_debits(false);
    let ack = supervisor.place_bet("p5".into(), 0, 10.0).await;
    assert!(matches!(ack, WsServerEvent::BetAccepted { .. }));
    assert_eq!(ledger.balance("p5").await.unwrap(), 90.0);
}

#[tokio::test]
async fn cancel_during_waiting_returns_the_stake() {
    let ledger = Arc::new(InMemoryLedger::new().with_balance("p4", 30.0));
    let (event_tx, mut rx) = broadcast::channel(1024);
    let mut cfg = fast_config();
    cfg.waiting_ms = 400;
    let supervisor = SupervisorHandle::spawn(cfg, ledger.clone(), event_tx);

    wait_for(&mut rx, |e| matches!(e, WsServerEvent::RoundWaiting { .. })).await;
    let ack = supervisor.place_bet("p4".into(), 0, 12.0).await;
    assert!(matches!(ack, WsServerEvent::BetAccepted { .. }));
    assert_eq!(ledger.balance("p4").await.unwrap(), 18.0);

    let ack = supervisor.cancel_bet("p4".into(), 0).await;
    assert!(
        matches!(ack, WsServerEvent::BetCancelled { refund, .. } if refund == 12.0),
        "expected bet_cancelled, got {ack:?}"
    );

    for _ in 0..50 {
        if (ledger.balance("p4").await.unwrap() - 30.0).abs() < 1e-9 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(ledger.balance("p4").await.unwrap(), 30.0);
}

#[tokio::test]
async fn history_accumulates_one_record_per_round() {
    let ledger = Arc::new(InMemoryLedger::new());
    let (event_tx, mut rx) = broadcast::channel(1024);
    let supervisor = SupervisorHandle::spawn(fast_config(), ledger, event_tx);

    for _ in 0..2 {
        wait_for(&mut rx, |e| matches!(e, WsServerEvent::RoundCrashed { .. })).await;
    }
    let history = supervisor.history().await;
    assert!(history.len() >= 2);
    // Newest first, all verifiable and in range.
    for record in &history {
        assert!(record.crash_point >= 1.0);
        assert!(!record.seed_hex.is_empty());
    }
    assert!(history[0].ended_at_ms >= history[1].ended_at_ms);
}
