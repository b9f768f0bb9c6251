//! Sample-rate divider.
//!
//! The hardware timer ticks much faster than the wanted sample rate (it
//! also paces other parts of the board). The divider skips ticks until
//! the count exceeds the divisor, so one tick in every `divisor + 1` is
//! accepted and the effective rate is `tick_rate / (divisor + 1)`.

pub struct RateDivider {
    divisor: u8,
    count: u8,
}

impl RateDivider {
    pub const fn new(divisor: u8) -> Self {
        RateDivider { divisor, count: 0 }
    }

    /// Advance one hardware tick. True when this tick should sample.
    pub fn tick(&mut self) -> bool {
        self.count = self.count.wrapping_add(1);
        if self.count > self.divisor {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SamplePool;

    #[test]
    fn accepts_one_tick_in_divisor_plus_one() {
        let mut divider = RateDivider::new(3);
        let mut hits = Vec::new();
        for tick in 0..12u32 {
            if divider.tick() {
                hits.push(tick);
            }
        }
        assert_eq!(hits, [3, 7, 11]);
    }

    #[test]
    fn divisor_zero_accepts_every_tick() {
        let mut divider = RateDivider::new(0);
        assert!((0..5).all(|_| divider.tick()));
    }

    /// Scenario: divisor 9 and 32-byte frames. The first publication
    /// lands on the 320th tick and carries the samples accepted at ticks
    /// 9, 19, 29, ...
    #[test]
    fn first_frame_publishes_on_the_320th_tick() {
        let mut divider = RateDivider::new(9);
        let mut pool: SamplePool<32> = SamplePool::new();
        let mut published_at = None;

        for tick in 0u32..320 {
            if divider.tick() {
                if let Some(publication) = pool.push(tick as u8) {
                    assert!(published_at.is_none());
                    published_at = Some((tick, publication.slot));
                }
            }
        }
        assert_eq!(published_at, Some((319, 0)));

        let mut frame = [0u8; 32];
        assert_eq!(pool.take(&mut frame), Some(0));
        let expected: Vec<u8> = (0..32u32).map(|k| (9 + 10 * k) as u8).collect();
        assert_eq!(&frame[..], &expected[..]);
    }
}
