//! Concurrent callers through `SharedMarketplace`.
//!
//! Bids race on one auction from several threads. Lock acquisition orders
//! them; every accepted bid must have exceeded the bid before it, and the
//! books must balance once the dust settles.

use std::thread;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tradepost_engine::{InMemoryTokenRegistry, ManualClock, Marketplace, SharedMarketplace};
use tradepost_types::{Address, CommitmentHash, MarketConfig, MarketError, MarketEvent, TokenId};

const OWNER: Address = Address([0xaa; 20]);
const OPERATOR: Address = Address([0xee; 20]);
const SELLER: Address = Address([0x01; 20]);

fn shared() -> (SharedMarketplace<InMemoryTokenRegistry, ManualClock>, ManualClock) {
    let clock = ManualClock::new(Utc::now());
    let mut registry = InMemoryTokenRegistry::new();
    registry.mint(TokenId(1), SELLER).unwrap();
    registry.mint(TokenId(2), SELLER).unwrap();
    registry.set_approval_for_all(SELLER, OPERATOR, true);
    let market = Marketplace::new(
        OWNER,
        OPERATOR,
        MarketConfig::default(),
        registry,
        clock.clone(),
    )
    .unwrap();
    (SharedMarketplace::new(market), clock)
}

#[test]
fn racing_bidders_are_totally_ordered() {
    let (market, clock) = shared();
    let auction = market
        .create_auction(SELLER, TokenId(1), Decimal::ONE, Duration::hours(1))
        .unwrap();

    thread::scope(|s| {
        for t in 0..8u8 {
            let market = market.clone();
            s.spawn(move || {
                let bidder = Address::repeat_byte(0x20 + t);
                for round in 1..=50i64 {
                    let amount = Decimal::from(round * 10 + i64::from(t));
                    match market.place_bid(bidder, auction, amount) {
                        Ok(_) | Err(MarketError::BidTooLow { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                    market.verify_invariants().unwrap();
                }
            });
        }
    });

    // Accepted bids, in event order, strictly increase.
    let bids: Vec<Decimal> = market
        .drain_events()
        .into_iter()
        .filter_map(|r| match r.event {
            MarketEvent::BidPlaced { amount, .. } => Some(amount),
            _ => None,
        })
        .collect();
    assert!(!bids.is_empty());
    assert!(bids.windows(2).all(|w| w[0] < w[1]));

    let listing = market.listing(auction).unwrap();
    let state = listing.auction().unwrap();
    assert_eq!(Some(&state.highest_bid), bids.last());

    clock.advance(Duration::hours(1));
    let settlement = market.finalize_auction(auction).unwrap();
    assert_eq!(settlement.counterparty, state.highest_bidder);
    market.verify_invariants().unwrap();
}

#[test]
fn readers_see_consistent_state_during_writes() {
    let (market, _) = shared();
    let fixed = market
        .create_listing(SELLER, TokenId(2), Decimal::ONE)
        .unwrap();

    thread::scope(|s| {
        let writer = market.clone();
        s.spawn(move || {
            let buyers: Vec<Address> = (0x30..0x34).map(Address::repeat_byte).collect();
            let mut sold = 0;
            for buyer in buyers {
                match writer.buy_listing(buyer, fixed, Decimal::ONE) {
                    Ok(_) => sold += 1,
                    Err(MarketError::ListingNotActive { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            assert_eq!(sold, 1);
        });
        for _ in 0..4 {
            let reader = market.clone();
            s.spawn(move || {
                for _ in 0..200 {
                    // Seller proceeds and fees appear together or not at all.
                    let (proceeds, fees) =
                        reader.read(|m| (m.balance_of(SELLER), m.protocol_fees()));
                    let expected = if fees.is_zero() {
                        Decimal::ZERO
                    } else {
                        Decimal::ONE
                    };
                    assert_eq!(proceeds + fees, expected);
                    reader.verify_invariants().unwrap();
                }
            });
        }
    });

    assert_eq!(market.active_listing_count(), 0);
    assert_eq!(market.balance_of(SELLER), Decimal::new(975, 3));
}

#[test]
fn pause_from_another_thread_stops_bidding() {
    let (market, _) = shared();
    let auction = market
        .create_auction(SELLER, TokenId(1), Decimal::ONE, Duration::hours(1))
        .unwrap();

    let admin = market.clone();
    thread::spawn(move || admin.set_emergency_stop(OWNER, true).unwrap())
        .join()
        .unwrap();

    assert!(market.emergency_stop());
    assert!(matches!(
        market.place_bid(Address::repeat_byte(0x40), auction, Decimal::TWO),
        Err(MarketError::SystemPaused)
    ));
}

#[test]
fn admin_and_expiry_calls_through_shared_handle() {
    let (market, clock) = shared();
    let new_owner = Address::repeat_byte(0xab);

    let handle = market.clone();
    thread::spawn(move || {
        assert!(handle.toggle_emergency_stop(OWNER).unwrap());
        handle.set_fee_rate(OWNER, 500).unwrap();
    })
    .join()
    .unwrap();
    assert!(market.emergency_stop());
    assert_eq!(market.fee_bps(), 500);
    assert!(!market.toggle_emergency_stop(OWNER).unwrap());
    assert!(matches!(
        market.set_fee_rate(OWNER, 1_001),
        Err(MarketError::InvalidFeeRate { .. })
    ));

    market.transfer_ownership(OWNER, new_owner).unwrap();
    assert_eq!(market.owner(), new_owner);
    assert!(matches!(
        market.toggle_emergency_stop(OWNER),
        Err(MarketError::NotOwner(_))
    ));

    market.commit(SELLER, CommitmentHash([7u8; 32])).unwrap();
    assert!(matches!(
        market.invalidate_expired(SELLER),
        Err(MarketError::CommitmentNotExpired { .. })
    ));
    clock.advance(Duration::minutes(5) + Duration::days(1) + Duration::seconds(1));
    market.invalidate_expired(SELLER).unwrap();

    let names: Vec<_> = market
        .drain_events()
        .iter()
        .map(|r| r.event.name())
        .collect();
    assert_eq!(
        names,
        vec![
            "EMERGENCY_STOP_CHANGED",
            "FEE_RATE_CHANGED",
            "EMERGENCY_STOP_CHANGED",
            "OWNERSHIP_TRANSFERRED",
            "COMMITMENT_SUBMITTED",
            "COMMITMENT_INVALIDATED",
        ]
    );
}
