//! End-to-end allocation scenarios
//!
//! Each test drives the public engine API the way the forecasting
//! pipeline does: build accounts, build a priority tree, allocate.

use allocation::{
    AccountId, AllocationEngine, BasicAccount, Bound, Config, Error, LimitKind, LinkKey,
    LinkRegistry, NodeLimits, Polarity, PriorityNode, Schedule,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine() -> AllocationEngine {
    init_tracing();
    AllocationEngine::new(Config::default()).unwrap()
}

fn mid_period(amount: Decimal) -> Schedule {
    Schedule::from([(dec!(0.5), amount)])
}

fn id(name: &str) -> AccountId {
    AccountId::new(name)
}

#[test]
fn test_ordered_fill_spills_to_next_account() {
    let a = BasicAccount::new("a").with_limit(LimitKind::MaxInflow, dec!(100)).into_handle();
    let b = BasicAccount::new("b").into_handle();
    let tree = PriorityNode::ordered(vec![a.into(), b.into()]);

    let allocation = engine().allocate(&mid_period(dec!(200)), &tree).unwrap();

    assert_eq!(allocation.amount_at(&id("a"), dec!(0.5)), dec!(100));
    assert_eq!(allocation.amount_at(&id("b"), dec!(0.5)), dec!(100));
    assert_eq!(allocation.allocated(), dec!(200));
}

#[test]
fn test_ordered_fill_leaves_later_accounts_untouched() {
    let x = BasicAccount::new("x").with_limit(LimitKind::MaxInflow, dec!(100)).into_handle();
    let y = BasicAccount::new("y").with_limit(LimitKind::MaxInflow, dec!(100)).into_handle();
    let z = BasicAccount::new("z").into_handle();
    let tree = PriorityNode::ordered(vec![x.into(), y.into(), z.into()]);

    let small = engine().allocate(&mid_period(dec!(80)), &tree).unwrap();
    assert_eq!(small.account_total(&id("x")), dec!(80));
    assert!(!small.transactions.contains_key(&id("y")));

    let medium = engine().allocate(&mid_period(dec!(150)), &tree).unwrap();
    assert_eq!(medium.account_total(&id("x")), dec!(100));
    assert_eq!(medium.account_total(&id("y")), dec!(50));
    assert!(!medium.transactions.contains_key(&id("z")));
}

#[test]
fn test_weighted_split_proportionally() {
    let x = BasicAccount::new("x").into_handle();
    let y = BasicAccount::new("y").with_limit(LimitKind::MaxInflow, dec!(500)).into_handle();
    let tree = PriorityNode::weighted(vec![(x.into(), dec!(1)), (y.into(), dec!(1))]);

    let allocation = engine().allocate(&mid_period(dec!(300)), &tree).unwrap();

    assert_eq!(allocation.account_total(&id("x")), dec!(150));
    assert_eq!(allocation.account_total(&id("y")), dec!(150));
}

#[test]
fn test_weighted_overflow_redistributed() {
    let x = BasicAccount::new("x").with_limit(LimitKind::MaxInflow, dec!(30)).into_handle();
    let y = BasicAccount::new("y").into_handle();
    let tree = PriorityNode::weighted(vec![(x.into(), dec!(1)), (y.into(), dec!(1))]);

    let allocation = engine().allocate(&mid_period(dec!(200)), &tree).unwrap();

    assert_eq!(allocation.account_total(&id("x")), dec!(30));
    assert_eq!(allocation.account_total(&id("y")), dec!(170));
    assert_eq!(allocation.shortfall(), Decimal::ZERO);
}

#[test]
fn test_shared_limit_never_exceeded() {
    let registry = LinkRegistry::new();
    let key = LinkKey::new("alice", "rrsp_room");
    let record = registry.register(key.clone(), &id("rrsp"));
    registry.register(key, &id("spousal_rrsp"));
    record.set_limit(Bound::Finite(dec!(100)));

    let rrsp = BasicAccount::new("rrsp")
        .with_link(LimitKind::MaxInflow, record.clone())
        .into_handle();
    let spousal = BasicAccount::new("spousal_rrsp")
        .with_link(LimitKind::MaxInflow, record.clone())
        .into_handle();
    let tree = PriorityNode::weighted(vec![
        (rrsp.clone().into(), dec!(1)),
        (PriorityNode::ordered(vec![spousal.into(), rrsp.into()]), dec!(2)),
    ]);

    let allocation = engine().allocate(&mid_period(dec!(10_000)), &tree).unwrap();

    let linked = allocation.account_total(&id("rrsp")) + allocation.account_total(&id("spousal_rrsp"));
    assert_eq!(linked, dec!(100));
    assert_eq!(allocation.allocated(), dec!(100));
}

#[test]
fn test_linked_weighted_siblings_share_pool_by_weight() {
    let registry = LinkRegistry::new();
    let key = LinkKey::new("erin", "rrsp_room");
    let record = registry.register(key.clone(), &id("a"));
    registry.register(key, &id("b"));
    record.set_limit(Bound::Finite(dec!(60)));

    let a = BasicAccount::new("a").with_link(LimitKind::MaxInflow, record.clone()).into_handle();
    let b = BasicAccount::new("b").with_link(LimitKind::MaxInflow, record.clone()).into_handle();
    let c = BasicAccount::new("c").into_handle();
    let tree = PriorityNode::weighted(vec![(a.into(), dec!(1)), (b.into(), dec!(1)), (c.into(), dec!(2))]);

    let allocation = engine().allocate(&mid_period(dec!(200)), &tree).unwrap();

    assert_eq!(allocation.account_total(&id("a")), dec!(30));
    assert_eq!(allocation.account_total(&id("b")), dec!(30));
    assert_eq!(allocation.account_total(&id("c")), dec!(140));
}

#[test]
fn test_linked_group_split_by_member_capacity() {
    let registry = LinkRegistry::new();
    let key = LinkKey::new("bob", "tfsa_room");
    let record = registry.register(key.clone(), &id("tfsa_a"));
    registry.register(key, &id("tfsa_b"));
    record.set_limit(Bound::Finite(dec!(90)));

    let a = BasicAccount::new("tfsa_a")
        .with_link(LimitKind::MaxInflow, record.clone())
        .into_handle();
    let b = BasicAccount::new("tfsa_b")
        .with_link(LimitKind::MaxInflow, record.clone())
        .into_handle();
    let savings = BasicAccount::new("savings").into_handle();
    let tree = PriorityNode::ordered(vec![PriorityNode::group(vec![a, b]), savings.into()]);

    let engine = engine();
    let allocation = engine.allocate_and_apply(&mid_period(dec!(200)), &tree).unwrap();

    assert_eq!(allocation.account_total(&id("tfsa_a")), dec!(45));
    assert_eq!(allocation.account_total(&id("tfsa_b")), dec!(45));
    assert_eq!(allocation.account_total(&id("savings")), dec!(110));
    // Both members consumed the shared room
    assert_eq!(record.limit(), Bound::ZERO);
}

#[test]
fn test_debt_minimum_paid_regardless_of_position() {
    let debt = BasicAccount::new("debt")
        .with_limit(LimitKind::MinInflow, dec!(10))
        .with_limit(LimitKind::MaxInflow, dec!(1000))
        .into_handle();
    let savings = BasicAccount::new("savings").into_handle();
    let tree = PriorityNode::ordered(vec![savings.into(), debt.into()]);

    let allocation = engine().allocate(&mid_period(dec!(10)), &tree).unwrap();

    assert_eq!(allocation.account_total(&id("debt")), dec!(10));
    assert_eq!(allocation.minimum_total, dec!(10));
    assert!(!allocation.transactions.contains_key(&id("savings")));
}

#[test]
fn test_minimum_withdrawal_paid_before_discretionary() {
    let rrif = BasicAccount::new("rrif")
        .with_limit(LimitKind::MinOutflow, dec!(10))
        .with_limit(LimitKind::MaxOutflow, dec!(500))
        .into_handle();
    let tfsa = BasicAccount::new("tfsa").into_handle();
    let tree = PriorityNode::ordered(vec![tfsa.into(), rrif.into()]);

    let allocation = engine().allocate(&mid_period(dec!(-10)), &tree).unwrap();

    assert_eq!(allocation.polarity, Polarity::Outflow);
    assert_eq!(allocation.account_total(&id("rrif")), dec!(-10));
    assert_eq!(allocation.allocated(), dec!(-10));
}

#[test]
fn test_minimums_skipped_when_disabled() {
    let debt = BasicAccount::new("debt")
        .with_limit(LimitKind::MinInflow, dec!(10))
        .into_handle();
    let savings = BasicAccount::new("savings").into_handle();
    let tree = PriorityNode::ordered(vec![savings.into(), debt.into()]);
    let config = Config {
        assign_minimums: false,
        ..Config::default()
    };

    let allocation = AllocationEngine::new(config)
        .unwrap()
        .allocate(&mid_period(dec!(10)), &tree)
        .unwrap();

    assert_eq!(allocation.account_total(&id("savings")), dec!(10));
    assert_eq!(allocation.minimum_total, Decimal::ZERO);
}

#[test]
fn test_requested_above_capacity_allocates_capacity() {
    let a = BasicAccount::new("a").with_limit(LimitKind::MaxInflow, dec!(40)).into_handle();
    let b = BasicAccount::new("b").with_limit(LimitKind::MaxInflow, dec!(60)).into_handle();
    let tree = PriorityNode::weighted(vec![(a.into(), dec!(1)), (b.into(), dec!(1))]);

    let allocation = engine().allocate(&mid_period(dec!(1000)), &tree).unwrap();

    assert_eq!(allocation.allocated(), dec!(100));
    assert_eq!(allocation.shortfall(), dec!(900));
}

#[test]
fn test_limited_subtree_caps_flow() {
    let a = BasicAccount::new("a").into_handle();
    let b = BasicAccount::new("b").into_handle();
    let tree = PriorityNode::ordered(vec![
        PriorityNode::limited(a.into(), NodeLimits::new().with(LimitKind::MaxInflow, dec!(25))),
        b.into(),
    ]);

    let allocation = engine().allocate(&mid_period(dec!(100)), &tree).unwrap();

    assert_eq!(allocation.account_total(&id("a")), dec!(25));
    assert_eq!(allocation.account_total(&id("b")), dec!(75));
}

#[test]
fn test_amounts_follow_timing_within_capacity() {
    let a = BasicAccount::new("a").with_limit(LimitKind::MaxInflow, dec!(40)).into_handle();
    let b = BasicAccount::new("b").into_handle();
    let tree = PriorityNode::ordered(vec![a.into(), b.into()]);
    let available = Schedule::from([(dec!(0), dec!(50)), (dec!(1), dec!(50))]);

    let allocation = engine().allocate(&available, &tree).unwrap();

    // a's limit spreads evenly over both instants
    assert_eq!(allocation.amount_at(&id("a"), dec!(0)), dec!(20));
    assert_eq!(allocation.amount_at(&id("a"), dec!(1)), dec!(20));
    assert_eq!(allocation.account_total(&id("b")), dec!(60));
}

#[test]
fn test_allocation_serializes() {
    let a = BasicAccount::new("a").into_handle();
    let allocation = engine()
        .allocate(&mid_period(dec!(12.5)), &PriorityNode::account(a))
        .unwrap();

    let json = serde_json::to_value(&allocation).unwrap();
    assert_eq!(json["polarity"], "Inflow");
    assert!(json["transactions"]["a"].is_object());
}

#[test]
fn test_sub_cent_remainder_is_allocated() {
    let a = BasicAccount::new("a").into_handle();

    let allocation = engine()
        .allocate(&mid_period(dec!(100.005)), &PriorityNode::account(a))
        .unwrap();

    assert_eq!(allocation.account_total(&id("a")), dec!(100.005));
    assert_eq!(allocation.allocated(), dec!(100.005));
    assert_eq!(allocation.shortfall(), Decimal::ZERO);
}

#[test]
fn test_sub_cent_remainder_goes_to_last_account_with_room() {
    let x = BasicAccount::new("x").into_handle();
    let y = BasicAccount::new("y").into_handle();
    let tree = PriorityNode::weighted(vec![(x.into(), dec!(1)), (y.into(), dec!(1))]);

    let allocation = engine().allocate(&mid_period(dec!(100.005)), &tree).unwrap();

    assert_eq!(allocation.account_total(&id("x")), dec!(50));
    assert_eq!(allocation.account_total(&id("y")), dec!(50.005));
    assert_eq!(allocation.maximum_total, dec!(100.005));
}

#[test]
fn test_sub_cent_remainder_never_exceeds_a_maximum() {
    let a = BasicAccount::new("a").with_limit(LimitKind::MaxInflow, dec!(50)).into_handle();
    let b = BasicAccount::new("b").with_limit(LimitKind::MaxInflow, dec!(50)).into_handle();
    let tree = PriorityNode::ordered(vec![a.into(), b.into()]);

    let allocation = engine().allocate(&mid_period(dec!(100.005)), &tree).unwrap();

    assert_eq!(allocation.account_total(&id("a")), dec!(50));
    assert_eq!(allocation.account_total(&id("b")), dec!(50));
    assert_eq!(allocation.shortfall(), dec!(0.005));
}

#[test]
fn test_amount_too_large_for_scale_is_rejected() {
    let a = BasicAccount::new("a").with_limit(LimitKind::MaxInflow, dec!(10)).into_handle();
    let b = BasicAccount::new("b").with_limit(LimitKind::MaxInflow, dec!(10)).into_handle();
    let c = BasicAccount::new("c").into_handle();
    let tree = PriorityNode::ordered(vec![a.into(), b.into(), c.into()]);

    let result = engine().allocate(&mid_period(dec!(100000000000000000)), &tree);

    assert!(matches!(result, Err(Error::AmountOutOfRange { .. })));
}

#[test]
fn test_large_amount_within_range_allocates_fully() {
    let a = BasicAccount::new("a").with_limit(LimitKind::MaxInflow, dec!(10)).into_handle();
    let c = BasicAccount::new("c").into_handle();
    let tree = PriorityNode::ordered(vec![a.into(), c.into()]);

    let allocation = engine().allocate(&mid_period(dec!(100000000000000)), &tree).unwrap();

    assert_eq!(allocation.account_total(&id("a")), dec!(10));
    assert_eq!(allocation.account_total(&id("c")), dec!(99999999999990));
}
