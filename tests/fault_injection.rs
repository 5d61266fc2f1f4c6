use fiatswap::{
    protocol::{PeerAddress, ProtocolError, TradeMessage},
    task::{Intercept, InterceptPoint, TaskError, TaskFailure},
    trade::{Contract, DisputeState, OfferDirection, Phase, TradeError, TradeState},
    transport::TransportError,
};

mod test_framework;
use test_framework::*;

use log::{info, warn};

fn failed_task(result: Result<(), TradeError>) -> TaskFailure {
    match result {
        Err(TradeError::Task(failure)) => failure,
        other => panic!("Expected a task failure, got {:?}", other),
    }
}

/// An intercepted payout signature rolls the seller back to the state before the UI
/// action. Once the intercept is cleared the same action succeeds.
#[test]
fn test_intercept_before_run_rolls_back() {
    // ---- Setup ----
    let framework = TestFramework::init();
    warn!("🧪 Running Test: Intercept before the payout signature");

    let id = "T1";
    let direction = OfferDirection::Sell;
    framework.open_trade(id, direction);
    let (buyer, seller) = (framework.buyer(direction), framework.seller(direction));

    buyer.manager.on_fiat_payment_started(id).unwrap();
    framework.pump_ok();
    assert_eq!(seller.state(id), TradeState::FiatPaymentStartedMsgReceived);

    // ---- Injected failure ----
    info!("💉 Intercepting SignPayoutTx");
    seller
        .manager
        .set_intercept(
            id,
            Some(Intercept {
                task: "SignPayoutTx",
                point: InterceptPoint::BeforeRun,
            }),
        )
        .unwrap();
    let failure = failed_task(seller.manager.on_fiat_payment_received(id));
    assert_eq!(failure.task, "SignPayoutTx");
    assert!(matches!(
        failure.cause,
        TaskError::Intercepted {
            task: "SignPayoutTx",
            point: InterceptPoint::BeforeRun
        }
    ));

    let trade = seller.manager.trade(id).unwrap();
    assert_eq!(trade.state(), TradeState::FiatPaymentStartedMsgReceived);
    assert_eq!(trade.phase(), Phase::FiatPaymentStarted);
    assert!(trade.error_message().unwrap().starts_with("SignPayoutTx failed"));
    assert_eq!(framework.network.count_sent("FinalizePayoutTxRequest"), 0);
    assert!(seller.wallet.record().committed.is_empty());

    // ---- Retry ----
    info!("🔁 Clearing the intercept and retrying");
    seller.manager.set_intercept(id, None).unwrap();
    seller.manager.on_fiat_payment_received(id).unwrap();
    framework.pump_ok();

    assert_eq!(seller.phase(id), Phase::PayoutPaid);
    assert_eq!(buyer.phase(id), Phase::PayoutPaid);
    assert_eq!(framework.network.count_sent("FinalizePayoutTxRequest"), 1);
}

/// The notice went out before the injected failure. The seller applies it once, the
/// buyer's retry sends it again and the duplicate is ignored.
#[test]
fn test_intercept_after_send_tolerates_duplicate() {
    let framework = TestFramework::init();
    warn!("🧪 Running Test: Intercept after the fiat notice was sent");

    let id = "T1";
    let direction = OfferDirection::Buy;
    framework.open_trade(id, direction);
    let (buyer, seller) = (framework.buyer(direction), framework.seller(direction));
    let prior = buyer.state(id);

    buyer
        .manager
        .set_intercept(
            id,
            Some(Intercept {
                task: "SendFiatTransferStarted",
                point: InterceptPoint::AfterRun,
            }),
        )
        .unwrap();
    let failure = failed_task(buyer.manager.on_fiat_payment_started(id));
    assert_eq!(failure.task, "SendFiatTransferStarted");
    assert_eq!(buyer.state(id), prior);
    assert_eq!(framework.network.count_sent("FiatTransferStarted"), 1);

    // The peer already got the notice.
    framework.pump_ok();
    assert_eq!(seller.state(id), TradeState::FiatPaymentStartedMsgReceived);

    info!("🔁 Buyer retries, seller drops the duplicate");
    buyer.manager.set_intercept(id, None).unwrap();
    buyer.manager.on_fiat_payment_started(id).unwrap();
    assert_eq!(buyer.state(id), TradeState::FiatPaymentStartedMsgSent);
    assert_eq!(framework.network.count_sent("FiatTransferStarted"), 2);
    framework.pump_ok();
    assert_eq!(seller.state(id), TradeState::FiatPaymentStartedMsgReceived);

    seller.manager.on_fiat_payment_received(id).unwrap();
    framework.pump_ok();
    assert_eq!(buyer.phase(id), Phase::PayoutPaid);
    assert_eq!(seller.phase(id), Phase::PayoutPaid);
}

/// A failed payout finalization is reported and recorded, but doesn't escalate. A
/// redelivered request completes the trade.
#[test]
fn test_failed_finalization_does_not_open_dispute() {
    let framework = TestFramework::init();
    warn!("🧪 Running Test: Payout finalization fails on the buyer");

    let id = "T1";
    let direction = OfferDirection::Sell;
    framework.open_trade(id, direction);
    let (buyer, seller) = (framework.buyer(direction), framework.seller(direction));

    buyer.manager.on_fiat_payment_started(id).unwrap();
    framework.pump_ok();

    buyer.wallet.fail_on("finalize_payout_tx");
    seller.manager.on_fiat_payment_received(id).unwrap();
    let deliveries = framework.pump();
    assert_eq!(deliveries.len(), 1);
    let (envelope, result) = deliveries.into_iter().next().unwrap();
    assert_eq!(envelope.message.kind(), "FinalizePayoutTxRequest");
    let failure = failed_task(result);
    assert_eq!(failure.task, "SignAndFinalizePayoutTx");
    assert!(matches!(failure.cause, TaskError::Wallet(_)));

    let trade = buyer.manager.trade(id).unwrap();
    assert_eq!(trade.state(), TradeState::FiatPaymentStartedMsgSent);
    assert_eq!(trade.dispute_state(), DisputeState::None);
    assert!(trade.payout_tx().is_none());
    assert!(trade
        .error_message()
        .unwrap()
        .contains("SignAndFinalizePayoutTx"));
    assert!(buyer.arbitration.disputes().is_empty());
    assert_eq!(seller.state(id), TradeState::FinalizePayoutRequestSent);

    info!("🔁 Redelivering the payout request");
    buyer.wallet.heal();
    let request = framework.network.last_sent("FinalizePayoutTxRequest").unwrap();
    buyer
        .manager
        .on_direct_message(request.message, request.from)
        .unwrap();
    framework.pump_ok();

    assert_eq!(buyer.state(id), TradeState::PayoutTxSent);
    assert_eq!(seller.state(id), TradeState::PayoutTxReceived);
}

/// A send failure aborts the sequence and leaves no message on the wire. Nothing is
/// retried behind the user's back.
#[test]
fn test_transport_failure_is_not_retried() {
    let framework = TestFramework::init();
    warn!("🧪 Running Test: Transport failure");

    let id = "T1";
    let direction = OfferDirection::Sell;
    framework.open_trade(id, direction);
    let buyer = framework.buyer(direction);
    let prior = buyer.state(id);

    framework.network.set_failing(&buyer.address, true);
    let failure = failed_task(buyer.manager.on_fiat_payment_started(id));
    assert_eq!(failure.task, "SendFiatTransferStarted");
    assert!(matches!(
        failure.cause,
        TaskError::Transport(TransportError::General(_))
    ));
    assert_eq!(buyer.state(id), prior);
    assert_eq!(framework.network.count_sent("FiatTransferStarted"), 0);
    assert!(framework.pump().is_empty());

    framework.network.set_failing(&buyer.address, false);
    buyer.manager.on_fiat_payment_started(id).unwrap();
    framework.pump_ok();
    assert_eq!(
        framework.seller(direction).state(id),
        TradeState::FiatPaymentStartedMsgReceived
    );
}

/// A panicking wallet call fails the task like any other error.
#[test]
fn test_panic_in_task_is_contained() {
    let framework = TestFramework::init();
    warn!("🧪 Running Test: Panic inside a task");

    let id = "T1";
    let direction = OfferDirection::Buy;
    framework.open_trade(id, direction);
    let (buyer, seller) = (framework.buyer(direction), framework.seller(direction));

    buyer.manager.on_fiat_payment_started(id).unwrap();
    framework.pump_ok();

    seller.wallet.panic_on("sign_payout_tx");
    let failure = failed_task(seller.manager.on_fiat_payment_received(id));
    assert_eq!(failure.task, "SignPayoutTx");
    assert!(matches!(&failure.cause, TaskError::Panicked(m) if m.contains("sign_payout_tx")));
    assert_eq!(seller.state(id), TradeState::FiatPaymentStartedMsgReceived);

    // The trade is still usable.
    seller.wallet.heal();
    seller.manager.on_fiat_payment_received(id).unwrap();
    framework.pump_ok();
    assert_eq!(seller.phase(id), Phase::PayoutPaid);
}

/// A deposit notice with a forged signature or a tampered contract is rejected. The
/// taker keeps waiting for the genuine one, deposit timer still running.
#[test]
fn test_tampered_deposit_notice_is_rejected() {
    let framework = TestFramework::init();
    warn!("🧪 Running Test: Tampered deposit notice");

    let id = "T1";
    let (offerer, taker) = (&framework.offerer, &framework.taker);
    let offer = framework.offer(id, OfferDirection::Sell);
    offerer.manager.place_offer(offer.clone()).unwrap();
    taker.manager.take_offer(offer, OFFER_AMOUNT).unwrap();

    // Deliver the request, hold back the notice.
    let request = framework.network.pop_in_flight().unwrap();
    offerer
        .manager
        .on_direct_message(request.message, request.from)
        .unwrap();
    let genuine = framework.network.pop_in_flight().unwrap();
    let TradeMessage::DepositTxPublished(notice) = &genuine.message else {
        panic!("Expected the deposit notice, got {}", genuine.message);
    };

    // ---- Forged signature ----
    info!("🕵️ Signature by another key");
    let mut forged = notice.clone();
    forged.offerer_contract_signature = Contract::sign_hash(
        &Contract::hash_json(&notice.contract_json),
        &test_keypair("mallory", 0),
    );
    let failure = failed_task(taker.manager.on_direct_message(
        TradeMessage::DepositTxPublished(forged),
        genuine.from.clone(),
    ));
    assert_eq!(failure.task, "ProcessDepositTxPublished");
    assert!(matches!(
        failure.cause,
        TaskError::Protocol(ProtocolError::InvalidContractSignature)
    ));

    // ---- Tampered amount ----
    info!("🕵️ Contract with a doubled amount");
    let mut contract = Contract::from_json(&notice.contract_json).unwrap();
    contract.trade_amount = OFFER_AMOUNT * 2;
    let mut tampered = notice.clone();
    tampered.contract_json = contract.to_json().unwrap();
    let failure = failed_task(taker.manager.on_direct_message(
        TradeMessage::DepositTxPublished(tampered),
        genuine.from.clone(),
    ));
    assert!(matches!(
        failure.cause,
        TaskError::Protocol(ProtocolError::ContractMismatch("trade_amount"))
    ));

    // ---- Tampered fiat terms ----
    info!("🕵️ Contracts with other fiat terms");
    let original = Contract::from_json(&notice.contract_json).unwrap();
    let mut doubled = original.clone();
    doubled.fiat_amount *= 2;
    let mut dollars = original.clone();
    dollars.currency_code = "USD".to_string();
    let mut elsewhere = original;
    elsewhere.offerer_address = PeerAddress::new("elsewhere.onion:9999");
    for (contract, field) in [
        (doubled, "fiat_amount"),
        (dollars, "currency_code"),
        (elsewhere, "offerer_address"),
    ] {
        let mut tampered = notice.clone();
        tampered.contract_json = contract.to_json().unwrap();
        let failure = failed_task(taker.manager.on_direct_message(
            TradeMessage::DepositTxPublished(tampered),
            genuine.from.clone(),
        ));
        assert!(
            matches!(failure.cause, TaskError::Protocol(ProtocolError::ContractMismatch(f)) if f == field),
            "{} not checked: {:?}",
            field,
            failure.cause
        );
    }
    assert_eq!(framework.network.count_sent("ContractCountersigned"), 0);

    let trade = taker.manager.trade(id).unwrap();
    assert_eq!(trade.state(), TradeState::TakerFeePaid);
    assert!(trade.contract().is_none());
    assert!(taker.manager.is_deposit_timeout_armed(id).unwrap());

    // ---- Genuine notice ----
    taker
        .manager
        .on_direct_message(genuine.message, genuine.from)
        .unwrap();
    assert_eq!(taker.state(id), TradeState::DepositPublishedMsgReceived);
    assert!(!taker.manager.is_deposit_timeout_armed(id).unwrap());
}
