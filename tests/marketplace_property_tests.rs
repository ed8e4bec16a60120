//! Property-based tests for the lifecycle and marketplace invariants
//!
//! Operation sequences are generated at random and applied to a real store.
//! Whatever the sequence, a stored project must stay consistent: a listed
//! project is approved and unsold, a sold project is off the market for good,
//! and a refused operation leaves the record exactly as it was.

use project_marketplace::{
    account::{Caller, Role},
    error::MarketError,
    lifecycle::ProjectService,
    marketplace::{ListingUpdate, MarketplaceService},
    notification::NotificationService,
    project::{Project, ProjectDraft},
    store::Store,
    types::Category,
};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

#[derive(Debug, Clone)]
enum Op {
    Edit(u64),
    Submit,
    Approve,
    Reject,
    List,
    Unlist,
    Purchase(usize),
    OwnerPurchase,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..100_000).prop_map(Op::Edit),
        Just(Op::Submit),
        Just(Op::Approve),
        Just(Op::Reject),
        Just(Op::List),
        Just(Op::Unlist),
        (0usize..3).prop_map(Op::Purchase),
        Just(Op::OwnerPurchase),
    ]
}

fn draft(price: u64) -> ProjectDraft {
    ProjectDraft::new()
        .set_title("Recipe manager")
        .set_description("Recipe manager with meal planning")
        .set_category(Category::MobileApp)
        .set_price(price)
        .set_delivery_days(4)
}

struct World {
    store: Store,
    projects: ProjectService,
    market: Arc<MarketplaceService>,
    owner: Caller,
    admin: Caller,
}

fn world() -> World {
    let store = Store::temporary().unwrap();
    let notifications = NotificationService::new(store.clone());
    World {
        projects: ProjectService::new(store.clone(), notifications.clone()),
        market: Arc::new(MarketplaceService::new(store.clone(), notifications)),
        store,
        owner: Caller::new("user_owner", Role::Seller),
        admin: Caller::new("user_admin", Role::Admin),
    }
}

fn apply(w: &World, id: &str, op: &Op) -> Result<Project, MarketError> {
    match op {
        Op::Edit(price) => w.projects.edit(&w.owner, id, draft(*price)),
        Op::Submit => w.projects.submit(&w.owner, id),
        Op::Approve => w.projects.approve(&w.admin, id),
        Op::Reject => w.projects.reject(&w.admin, id, "Missing documentation"),
        Op::List => w.market.list(&w.owner, id, ListingUpdate::default()),
        Op::Unlist => w.market.unlist(&w.owner, id),
        Op::Purchase(n) => w
            .market
            .purchase(&Caller::new(format!("user_buyer_{n}"), Role::Buyer), id),
        Op::OwnerPurchase => w.market.purchase(&w.owner, id),
    }
}

/// An approved project listed for sale.
fn listed(w: &World) -> Project {
    let project = w.projects.create(&w.owner, draft(6_000)).unwrap();
    w.projects.submit(&w.owner, &project.id).unwrap();
    w.projects.approve(&w.admin, &project.id).unwrap();
    w.market
        .list(&w.owner, &project.id, ListingUpdate::default())
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariants hold after every operation, successful or not
    #[test]
    fn prop_invariants_survive_any_sequence(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let w = world();
        let project = w.projects.create(&w.owner, draft(1_000)).unwrap();
        let mut sold_to: Option<String> = None;

        for op in &ops {
            let before = w.store.fetch::<Project>(&project.id).unwrap();
            let result = apply(&w, &project.id, op);
            let after = w.store.fetch::<Project>(&project.id).unwrap();

            prop_assert!(after.check_invariants(), "invariant broken after {:?}: {:?}", op, after);
            if result.is_err() {
                prop_assert_eq!(&before, &after);
            }

            // once sold, the buyer never changes and the listing never returns
            if let Some(buyer) = &sold_to {
                prop_assert_eq!(after.sold_to.as_ref(), Some(buyer));
                prop_assert!(!after.is_for_sale);
            }
            sold_to = after.sold_to.clone();
        }
    }

    /// The owner can never buy their own listing
    #[test]
    fn prop_self_purchase_is_always_refused(ops in prop::collection::vec(op_strategy(), 0..10)) {
        let w = world();
        let project = listed(&w);
        for op in &ops {
            let _ = apply(&w, &project.id, op);
        }
        prop_assert!(w.market.purchase(&w.owner, &project.id).is_err());
        let stored = w.store.fetch::<Project>(&project.id).unwrap();
        prop_assert_ne!(stored.sold_to.as_deref(), Some("user_owner"));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// N simultaneous purchases of one listing: exactly one wins
    #[test]
    fn prop_concurrent_purchases_sell_once(buyers in 2usize..10) {
        let w = world();
        let project = listed(&w);
        let barrier = Arc::new(Barrier::new(buyers));

        let handles: Vec<_> = (0..buyers)
            .map(|n| {
                let market = w.market.clone();
                let barrier = barrier.clone();
                let id = project.id.clone();
                thread::spawn(move || {
                    let buyer = Caller::new(format!("user_buyer_{n}"), Role::Buyer);
                    barrier.wait();
                    market.purchase(&buyer, &id).map(|p| (n, p))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        prop_assert_eq!(winners.len(), 1);
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(MarketError::Conflict(_))))
            .count();
        prop_assert_eq!(conflicts, buyers - 1);

        let (winner, _) = winners[0];
        let stored = w.store.fetch::<Project>(&project.id).unwrap();
        let expected = format!("user_buyer_{winner}");
        prop_assert_eq!(stored.sold_to.as_deref(), Some(expected.as_str()));
        prop_assert!(stored.check_invariants());
    }
}
