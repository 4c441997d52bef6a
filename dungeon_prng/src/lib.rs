// Deterministic, portable pseudo-random number generator for the dungeon sim.
//
// xoshiro256++ (Blackman & Vigna, 2019) seeded through SplitMix64. Every game
// instance owns exactly one `DungeonRng`; two instances built from the same
// seed and fed the same inputs draw identical streams, which is what keeps
// networked replicas in lock-step.
//
// The helpers here are integer-only. Spawn rolls, random squares and weighted
// action picks all go through `below`, `range_i32`, `chance` or `percent`, so
// no floating-point rounding can leak into simulation state.
//
// See also: `dungeon_sim::sim` (owner of the game's generator),
// `dungeon_sim::spawner` and `dungeon_sim::respawn` (main consumers).
//
// **Critical constraint: determinism.** Every method must produce identical
// output given the same prior state on every platform. No stdlib PRNG, no OS
// entropy, no floats.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ generator. The simulation's sole source of randomness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DungeonRng {
    s: [u64; 4],
}

impl DungeonRng {
    /// Create a generator from a `u64` seed, expanded to 256 bits with
    /// SplitMix64.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Upper 32 bits of the next `u64`.
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform integer in `[low, high)`, unbiased via rejection sampling.
    ///
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Uniform integer in `[0, n)`. Panics if `n == 0`.
    pub fn below(&mut self, n: u32) -> u32 {
        self.range_u64(0, n as u64) as u32
    }

    /// Uniform signed integer in `[low, high)`, used for picking map squares
    /// inside a rectangle. Panics if `low >= high`.
    pub fn range_i32(&mut self, low: i32, high: i32) -> i32 {
        assert!(low < high, "range_i32: low must be less than high");
        let span = (high as i64 - low as i64) as u64;
        (low as i64 + self.range_u64(0, span) as i64) as i32
    }

    /// `true` with probability `numerator / denominator`.
    ///
    /// A zero denominator or zero numerator never fires; a numerator at or
    /// above the denominator always fires. Neither extreme consumes state.
    pub fn chance(&mut self, numerator: u32, denominator: u32) -> bool {
        if numerator == 0 || denominator == 0 {
            return false;
        }
        if numerator >= denominator {
            return true;
        }
        self.below(denominator) < numerator
    }

    /// `true` with probability `pct` percent. Out-of-range values clamp.
    pub fn percent(&mut self, pct: i32) -> bool {
        self.chance(pct.clamp(0, 100) as u32, 100)
    }

    /// Pick an index with probability proportional to its weight.
    /// Returns `None` when every weight is zero.
    pub fn pick_weighted(&mut self, weights: &[u32]) -> Option<usize> {
        let total: u64 = weights.iter().map(|&w| w as u64).sum();
        if total == 0 {
            return None;
        }
        let mut roll = self.range_u64(0, total);
        for (i, &w) in weights.iter().enumerate() {
            if roll < w as u64 {
                return Some(i);
            }
            roll -= w as u64;
        }
        unreachable!("weighted roll exceeded total weight")
    }
}

/// SplitMix64, used only to expand a `u64` seed into xoshiro state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = DungeonRng::new(7);
        let mut b = DungeonRng::new(7);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = DungeonRng::new(7);
        let mut b = DungeonRng::new(8);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn below_stays_in_range() {
        let mut rng = DungeonRng::new(1234);
        for _ in 0..10_000 {
            assert!(rng.below(7) < 7);
        }
    }

    #[test]
    fn range_i32_handles_negative_bounds() {
        let mut rng = DungeonRng::new(99);
        let mut saw_low = false;
        for _ in 0..10_000 {
            let v = rng.range_i32(-3, 2);
            assert!((-3..2).contains(&v), "range_i32 out of range: {v}");
            saw_low |= v == -3;
        }
        assert!(saw_low, "lower bound should be reachable");
    }

    #[test]
    fn chance_extremes_do_not_consume_state() {
        let mut rng = DungeonRng::new(5);
        let reference = rng.clone();
        assert!(!rng.chance(0, 10));
        assert!(!rng.chance(3, 0));
        assert!(rng.chance(10, 10));
        assert!(rng.chance(11, 10));
        assert_eq!(rng, reference);
    }

    #[test]
    fn percent_is_roughly_fair() {
        let mut rng = DungeonRng::new(42);
        let hits = (0..10_000).filter(|_| rng.percent(30)).count();
        // 30% ± 3%
        assert!((2700..3300).contains(&hits), "got {hits} hits");
    }

    #[test]
    fn pick_weighted_skips_zero_weights() {
        let mut rng = DungeonRng::new(3);
        for _ in 0..1000 {
            let i = rng.pick_weighted(&[0, 5, 0, 1]).unwrap();
            assert!(i == 1 || i == 3);
        }
        assert_eq!(rng.pick_weighted(&[0, 0]), None);
        assert_eq!(rng.pick_weighted(&[]), None);
    }

    #[test]
    fn serialization_preserves_stream() {
        let mut rng = DungeonRng::new(42);
        for _ in 0..100 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: DungeonRng = serde_json::from_str(&json).unwrap();
        for _ in 0..100 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
