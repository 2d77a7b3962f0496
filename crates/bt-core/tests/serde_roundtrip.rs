#![cfg(feature = "serde")]

use bt_core::{DeterministicRng, TickContext};

#[test]
fn tick_context_json_roundtrip() {
    let ctx = TickContext::new(42, 0.25).with_seed(0xDEAD_BEEF);

    let json = serde_json::to_string(&ctx).expect("serialize");
    let roundtrip: TickContext = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(roundtrip, ctx);
    assert_eq!(
        roundtrip.rng_for_agent(7u64, 0).next_u64(),
        ctx.rng_for_agent(7u64, 0).next_u64()
    );
}
