//! Randomized bid sequences against the marketplace.
//!
//! Properties checked after every call:
//! - `highest_bid` never decreases and no accepted bid is `<= highest_bid`
//! - every outbid amount becomes withdrawable exactly once
//! - funds conservation and lock/ledger agreement

use std::collections::HashMap;

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tradepost_engine::{InMemoryTokenRegistry, ManualClock, Marketplace};
use tradepost_types::{Address, ListingId, MarketConfig, MarketError, TokenId};

const OWNER: Address = Address([0xaa; 20]);
const OPERATOR: Address = Address([0xee; 20]);
const SELLER: Address = Address([0x01; 20]);

fn highest(m: &Marketplace<InMemoryTokenRegistry, ManualClock>, id: ListingId) -> Decimal {
    m.listing(id)
        .unwrap()
        .auction()
        .map(|a| a.highest_bid)
        .unwrap()
}

#[test]
fn random_bids_preserve_auction_invariants() {
    for seed in [1_u64, 7, 42, 1_337] {
        run_sequence(seed);
    }
}

fn run_sequence(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let clock = ManualClock::new(Utc::now());
    let mut registry = InMemoryTokenRegistry::new();
    registry.set_approval_for_all(SELLER, OPERATOR, true);
    for token in 1..=3 {
        registry.mint(TokenId(token), SELLER).unwrap();
    }
    let mut m = Marketplace::new(
        OWNER,
        OPERATOR,
        MarketConfig::default(),
        registry,
        clock.clone(),
    )
    .unwrap();

    let auctions: Vec<ListingId> = (1..=3)
        .map(|t| {
            m.create_auction(SELLER, TokenId(t), Decimal::new(1, 2), Duration::hours(1))
                .unwrap()
        })
        .collect();
    let bidders: Vec<Address> = (0x10..0x16).map(Address::repeat_byte).collect();

    // Refunds owed per address, tracked independently of the engine.
    let mut owed: HashMap<Address, Decimal> = HashMap::new();

    for _ in 0..400 {
        let id = auctions[rng.gen_range(0..auctions.len())];
        let bidder = bidders[rng.gen_range(0..bidders.len())];
        let before = highest(&m, id);
        // Sometimes below, sometimes above the current highest bid.
        let offset = Decimal::new(rng.gen_range(-20..60), 3);
        let amount = (before + offset).max(Decimal::new(1, 3));

        match m.place_bid(bidder, id, amount) {
            Ok(receipt) => {
                assert!(amount > before, "accepted {amount} <= {before}");
                assert_eq!(highest(&m, id), amount);
                if let Some((previous, refund)) = receipt.outbid {
                    *owed.entry(previous).or_default() += refund;
                }
            }
            Err(MarketError::BidTooLow { bid, highest: h }) => {
                assert!(bid <= h);
                assert_eq!(highest(&m, id), before);
            }
            Err(e) => panic!("unexpected rejection: {e}"),
        }
        assert!(highest(&m, id) >= before);
        m.verify_invariants().unwrap();

        // Occasionally a bidder pulls their refunds.
        if rng.gen_range(0..10) == 0 {
            let who = bidders[rng.gen_range(0..bidders.len())];
            let expected = owed.remove(&who).unwrap_or_default();
            match m.withdraw(who) {
                Ok(payout) => assert_eq!(payout.amount, expected),
                Err(MarketError::NothingToWithdraw(_)) => assert!(expected.is_zero()),
                Err(e) => panic!("unexpected withdraw error: {e}"),
            }
        }
    }

    for (who, amount) in &owed {
        assert_eq!(m.balance_of(*who), *amount, "refund mismatch for {who}");
    }

    // Settle everything and drain escrow completely.
    clock.advance(Duration::hours(1));
    for id in &auctions {
        m.finalize_auction(*id).unwrap();
    }
    m.verify_invariants().unwrap();
    for who in bidders.iter().chain([&SELLER]) {
        let _ = m.withdraw(*who);
    }
    if !m.protocol_fees().is_zero() {
        m.withdraw_fees(OWNER).unwrap();
    }
    assert_eq!(m.escrow().total_held(), Decimal::ZERO);
    assert_eq!(
        m.escrow().conservation().total_deposited(),
        m.escrow().conservation().total_withdrawn()
    );
}
