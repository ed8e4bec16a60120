//! Payment reconciliation against a scripted gateway.

use project_marketplace::{
    account::{Caller, Role},
    error::{GatewayCategory, MarketError},
    gateway::{ChargeReceipt, ChargeRequest, GatewayError, GatewayFuture, PaymentGateway},
    lifecycle::ProjectService,
    marketplace::{ListingUpdate, MarketplaceService},
    notification::{NotificationKind, NotificationService},
    order::OrderStatus,
    payment::{PaymentService, SettlementOutcome, sign},
    project::{Project, ProjectDraft},
    store::Store,
    types::{Category, Currency},
    utils,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

const SECRET: &str = "whsec_test_secret";

#[derive(Clone, Copy, Debug)]
enum Behaviour {
    Approve,
    Decline,
    Hang,
}

type Hook = Box<dyn FnOnce() + Send>;

/// Gateway double: answers with a scripted outcome and counts calls.
struct ScriptedGateway {
    behaviour: Mutex<Behaviour>,
    charges: AtomicUsize,
    refunds: AtomicUsize,
    during_charge: Mutex<Option<Hook>>,
}

impl ScriptedGateway {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Mutex::new(behaviour),
            charges: AtomicUsize::new(0),
            refunds: AtomicUsize::new(0),
            during_charge: Mutex::new(None),
        })
    }

    fn set(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }
}

impl PaymentGateway for ScriptedGateway {
    fn charge(&self, request: ChargeRequest) -> GatewayFuture<ChargeReceipt> {
        self.charges.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.during_charge.lock().unwrap().take() {
            hook();
        }
        let behaviour = *self.behaviour.lock().unwrap();
        Box::pin(async move {
            match behaviour {
                Behaviour::Approve => Ok(ChargeReceipt {
                    transaction_id: format!("txn_{}", request.merchant_order_id),
                    raw: format!("{{\"amount\":{}}}", request.amount),
                }),
                Behaviour::Decline => Err(GatewayError::Declined {
                    code: "insufficient_funds".into(),
                    message: "Insufficient funds".into(),
                    raw: "{\"status\":\"declined\"}".into(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(GatewayError::Transport("answered too late".into()))
                }
            }
        })
    }

    fn refund(&self, transaction_id: &str, _amount: u64, _currency: Currency) -> GatewayFuture<String> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        let reference = format!("refund_{transaction_id}");
        Box::pin(async move { Ok(reference) })
    }
}

struct Harness {
    gateway: Arc<ScriptedGateway>,
    payments: PaymentService,
    marketplace: Arc<MarketplaceService>,
    notifications: NotificationService,
    store: Store,
    seller: Caller,
    _dir: tempfile::TempDir,
}

fn harness(name: &str, behaviour: Behaviour, timeout: Duration) -> anyhow::Result<Harness> {
    let dir = tempdir()?;
    let store = Store::open(dir.path().join(name))?;
    let notifications = NotificationService::new(store.clone());
    let gateway = ScriptedGateway::new(behaviour);
    let shared: Arc<dyn PaymentGateway> = gateway.clone();

    Ok(Harness {
        payments: PaymentService::new(store.clone(), shared, notifications.clone(), timeout, SECRET),
        marketplace: Arc::new(MarketplaceService::new(store.clone(), notifications.clone())),
        gateway,
        notifications,
        store,
        seller: Caller::new(utils::new_uuid_to_bech32("user_")?, Role::Seller),
        _dir: dir,
    })
}

fn buyer() -> anyhow::Result<Caller> {
    Ok(Caller::new(utils::new_uuid_to_bech32("user_")?, Role::Buyer))
}

/// An approved project listed for sale at `price`.
fn listing(h: &Harness, price: u64) -> anyhow::Result<Project> {
    let projects = ProjectService::new(h.store.clone(), h.notifications.clone());
    let admin = Caller::new("user_admin", Role::Admin);
    let draft = ProjectDraft::new()
        .set_title("Fleet dashboard")
        .set_description("Vehicle tracking dashboard")
        .set_category(Category::WebApp)
        .set_price(price)
        .set_delivery_days(3);
    let project = projects.create(&h.seller, draft)?;
    projects.submit(&h.seller, &project.id)?;
    projects.approve(&admin, &project.id)?;
    Ok(h.marketplace
        .list(&h.seller, &project.id, ListingUpdate::default())?)
}

fn notice(event: &str, order: &str, transaction: &str, amount: Option<u64>) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&serde_json::json!({
        "event": event,
        "orderRef": order,
        "transactionId": transaction,
        "amount": amount,
    }))
    .unwrap();
    let signature = sign(SECRET.as_bytes(), &body).unwrap();
    (body, signature)
}

#[tokio::test]
async fn approved_charge_marks_order_paid_and_project_sold() -> anyhow::Result<()> {
    let h = harness("approved.db", Behaviour::Approve, Duration::from_millis(500))?;
    let project = listing(&h, 18_000)?;
    let alice = buyer()?;

    let (order, created) = h.payments.create_order(&alice, &project.id)?;
    assert!(created);
    assert_eq!(order.amount, 18_000);
    assert_eq!(order.status, OrderStatus::Pending);

    let receipt = h.payments.pay(&alice, &order.id, "tok_card", None).await?;
    assert_eq!(receipt.order.status, OrderStatus::Paid);
    assert_eq!(receipt.order.amount, project.price);
    assert_eq!(
        receipt.order.transaction_id.as_deref(),
        Some(format!("txn_{}", order.id).as_str())
    );
    assert_eq!(receipt.project.sold_to.as_deref(), Some(alice.user_id.as_str()));
    assert!(!receipt.project.is_for_sale);
    assert!(receipt.project.check_invariants());

    // paying again is refused without charging twice
    let again = h.payments.pay(&alice, &order.id, "tok_card", None).await;
    assert!(matches!(again, Err(MarketError::Conflict(_))));
    assert_eq!(h.gateway.charges.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn open_orders_are_reused_per_buyer() -> anyhow::Result<()> {
    let h = harness("reuse.db", Behaviour::Approve, Duration::from_millis(500))?;
    let project = listing(&h, 1_000)?;
    let alice = buyer()?;
    let bob = buyer()?;

    let (first, _) = h.payments.create_order(&alice, &project.id)?;
    let (second, created) = h.payments.create_order(&alice, &project.id)?;
    assert!(!created);
    assert_eq!(first.id, second.id);

    let (other, created) = h.payments.create_order(&bob, &project.id)?;
    assert!(created);
    assert_ne!(other.id, first.id);

    assert!(matches!(
        h.payments.create_order(&h.seller, &project.id),
        Err(MarketError::BadRequest(_))
    ));
    assert!(matches!(
        h.payments.get_order(&bob, &first.id),
        Err(MarketError::Forbidden(_))
    ));
    assert!(matches!(
        h.payments.pay(&bob, &first.id, "tok_card", None).await,
        Err(MarketError::Forbidden(_))
    ));

    Ok(())
}

#[tokio::test]
async fn declined_charge_fails_order_and_can_be_retried() -> anyhow::Result<()> {
    let h = harness("declined.db", Behaviour::Decline, Duration::from_millis(500))?;
    let project = listing(&h, 2_500)?;
    let alice = buyer()?;
    let (order, _) = h.payments.create_order(&alice, &project.id)?;

    match h.payments.pay(&alice, &order.id, "tok_card", None).await {
        Err(MarketError::Gateway { category, message }) => {
            assert_eq!(category, GatewayCategory::Declined);
            assert_eq!(message, "Insufficient funds");
        }
        other => panic!("expected gateway error, got {other:?}"),
    }
    assert_eq!(h.payments.get_order(&alice, &order.id)?.status, OrderStatus::Failed);
    assert!(h.marketplace.get_listing(&project.id)?.is_for_sale);

    let notes = h.notifications.list(&alice, true)?;
    assert!(notes.iter().any(|n| n.kind == NotificationKind::PaymentFailed));

    h.gateway.set(Behaviour::Approve);
    let receipt = h.payments.pay(&alice, &order.id, "tok_card", None).await?;
    assert_eq!(receipt.order.status, OrderStatus::Paid);

    Ok(())
}

#[tokio::test]
async fn gateway_timeout_is_reported_as_its_own_category() -> anyhow::Result<()> {
    let h = harness("timeout.db", Behaviour::Hang, Duration::from_millis(50))?;
    let project = listing(&h, 700)?;
    let alice = buyer()?;
    let (order, _) = h.payments.create_order(&alice, &project.id)?;

    match h.payments.pay(&alice, &order.id, "tok_card", None).await {
        Err(MarketError::Gateway { category, .. }) => {
            assert_eq!(category, GatewayCategory::Timeout)
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(h.payments.get_order(&alice, &order.id)?.status, OrderStatus::Failed);
    assert!(h.store.fetch::<Project>(&project.id)?.is_purchasable());

    Ok(())
}

#[tokio::test]
async fn listing_sold_before_payment_closes_the_order() -> anyhow::Result<()> {
    let h = harness("sold_before.db", Behaviour::Approve, Duration::from_millis(500))?;
    let project = listing(&h, 5_000)?;
    let alice = buyer()?;
    let bob = buyer()?;

    let (order, _) = h.payments.create_order(&alice, &project.id)?;
    h.marketplace.purchase(&bob, &project.id)?;

    assert!(matches!(
        h.payments.pay(&alice, &order.id, "tok_card", None).await,
        Err(MarketError::Conflict(_))
    ));
    assert_eq!(h.gateway.charges.load(Ordering::SeqCst), 0);
    assert_eq!(h.payments.get_order(&alice, &order.id)?.status, OrderStatus::Failed);

    Ok(())
}

#[tokio::test]
async fn approval_racing_a_sale_is_refunded() -> anyhow::Result<()> {
    let h = harness("refund.db", Behaviour::Approve, Duration::from_millis(500))?;
    let project = listing(&h, 9_000)?;
    let alice = buyer()?;
    let bob = buyer()?;

    let (order, _) = h.payments.create_order(&alice, &project.id)?;

    // bob buys directly while alice's charge is in flight
    let marketplace = h.marketplace.clone();
    let project_id = project.id.clone();
    let racer = bob.clone();
    *h.gateway.during_charge.lock().unwrap() = Some(Box::new(move || {
        marketplace.purchase(&racer, &project_id).unwrap();
    }));

    assert!(matches!(
        h.payments.pay(&alice, &order.id, "tok_card", None).await,
        Err(MarketError::Conflict(_))
    ));
    assert_eq!(h.gateway.refunds.load(Ordering::SeqCst), 1);

    let order = h.payments.get_order(&alice, &order.id)?;
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(order.transaction_id, None);

    let project = h.store.fetch::<Project>(&project.id)?;
    assert_eq!(project.sold_to.as_deref(), Some(bob.user_id.as_str()));
    assert!(project.check_invariants());

    Ok(())
}

#[tokio::test]
async fn settlement_notification_is_idempotent() -> anyhow::Result<()> {
    let h = harness("ins.db", Behaviour::Approve, Duration::from_millis(500))?;
    let project = listing(&h, 12_000)?;
    let alice = buyer()?;
    let (order, _) = h.payments.create_order(&alice, &project.id)?;

    let (body, signature) = notice("payment.settled", &order.id, "txn_async_1", Some(12_000));
    assert_eq!(
        h.payments.settle_notification(&body, Some(&signature)).await?,
        SettlementOutcome::Settled
    );
    assert_eq!(
        h.payments.settle_notification(&body, Some(&signature)).await?,
        SettlementOutcome::AlreadySettled
    );

    let order = h.payments.get_order(&alice, &order.id)?;
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.transaction_id.as_deref(), Some("txn_async_1"));
    let project = h.store.fetch::<Project>(&project.id)?;
    assert_eq!(project.sold_to.as_deref(), Some(alice.user_id.as_str()));

    // the synchronous path arriving late does not charge again
    assert!(matches!(
        h.payments.pay(&alice, &order.id, "tok_card", None).await,
        Err(MarketError::Conflict(_))
    ));
    assert_eq!(h.gateway.charges.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn settlement_after_synchronous_payment_is_acknowledged() -> anyhow::Result<()> {
    let h = harness("ins_after_pay.db", Behaviour::Approve, Duration::from_millis(500))?;
    let project = listing(&h, 3_300)?;
    let alice = buyer()?;
    let (order, _) = h.payments.create_order(&alice, &project.id)?;
    let receipt = h.payments.pay(&alice, &order.id, "tok_card", None).await?;
    let transaction = receipt.order.transaction_id.unwrap_or_default();

    let (body, signature) = notice("payment.deposited", &order.id, &transaction, None);
    assert_eq!(
        h.payments.settle_notification(&body, Some(&signature)).await?,
        SettlementOutcome::AlreadySettled
    );

    Ok(())
}

#[tokio::test]
async fn settlement_notifications_are_verified_before_use() -> anyhow::Result<()> {
    let h = harness("ins_verify.db", Behaviour::Approve, Duration::from_millis(500))?;
    let project = listing(&h, 4_000)?;
    let alice = buyer()?;
    let (order, _) = h.payments.create_order(&alice, &project.id)?;

    let (body, _) = notice("payment.settled", &order.id, "txn_forged", Some(4_000));
    assert!(matches!(
        h.payments.settle_notification(&body, None).await,
        Err(MarketError::Unauthorized(_))
    ));
    assert!(matches!(
        h.payments.settle_notification(&body, Some("deadbeef")).await,
        Err(MarketError::Unauthorized(_))
    ));

    let (body, signature) = notice("payment.settled", &order.id, "txn_short", Some(3_999));
    assert!(matches!(
        h.payments.settle_notification(&body, Some(&signature)).await,
        Err(MarketError::Conflict(_))
    ));

    let (body, signature) = notice("payment.refund_requested", &order.id, "txn_x", None);
    assert_eq!(
        h.payments.settle_notification(&body, Some(&signature)).await?,
        SettlementOutcome::Ignored
    );

    // nothing above touched the order or the listing
    assert_eq!(h.payments.get_order(&alice, &order.id)?.status, OrderStatus::Pending);
    assert!(h.store.fetch::<Project>(&project.id)?.is_purchasable());

    Ok(())
}

#[tokio::test]
async fn one_transaction_settles_one_order() -> anyhow::Result<()> {
    let h = harness("txn_unique.db", Behaviour::Approve, Duration::from_millis(500))?;
    let first = listing(&h, 1_500)?;
    let second = listing(&h, 1_500)?;
    let alice = buyer()?;

    let (a, _) = h.payments.create_order(&alice, &first.id)?;
    let (b, _) = h.payments.create_order(&alice, &second.id)?;

    let (body, signature) = notice("payment.settled", &a.id, "txn_shared", None);
    h.payments.settle_notification(&body, Some(&signature)).await?;

    let (body, signature) = notice("payment.settled", &b.id, "txn_shared", None);
    assert!(matches!(
        h.payments.settle_notification(&body, Some(&signature)).await,
        Err(MarketError::Conflict(_))
    ));
    assert_eq!(h.payments.get_order(&alice, &b.id)?.status, OrderStatus::Pending);
    assert!(h.store.fetch::<Project>(&second.id)?.is_purchasable());

    Ok(())
}

#[tokio::test]
async fn late_settlement_for_a_resold_listing_is_refunded() -> anyhow::Result<()> {
    let h = harness("ins_resold.db", Behaviour::Hang, Duration::from_millis(50))?;
    let project = listing(&h, 6_400)?;
    let alice = buyer()?;
    let bob = buyer()?;
    let (order, _) = h.payments.create_order(&alice, &project.id)?;

    // alice's charge times out on our side but the gateway captures it
    assert!(matches!(
        h.payments.pay(&alice, &order.id, "tok_card", None).await,
        Err(MarketError::Gateway { category: GatewayCategory::Timeout, .. })
    ));
    h.marketplace.purchase(&bob, &project.id)?;

    let (body, signature) = notice("payment.settled", &order.id, "txn_late", Some(6_400));
    for _ in 0..2 {
        assert_eq!(
            h.payments.settle_notification(&body, Some(&signature)).await?,
            SettlementOutcome::Refunded
        );
    }
    assert_eq!(h.gateway.refunds.load(Ordering::SeqCst), 1);

    let order = h.payments.get_order(&alice, &order.id)?;
    assert_eq!(order.status, OrderStatus::Refunded);
    assert!(order.gateway_log.iter().any(|e| e.event == "refund.completed"));

    let project = h.store.fetch::<Project>(&project.id)?;
    assert_eq!(project.sold_to.as_deref(), Some(bob.user_id.as_str()));
    assert!(project.check_invariants());

    Ok(())
}
