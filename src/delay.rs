//! Artificial storage-access latency.
//!
//! The original engine inserts a busy loop, guarded by an inline-asm memory
//! clobber, on every access to an allocation bitmap or block buffer so that
//! the system behaves, for teaching and testing purposes, as if such state
//! lived in storage with real access latency. [`std::hint::black_box`] is the
//! safe-Rust equivalent of the GCC/Clang `asm volatile("" ::: "memory")`
//! trick: it tells the optimizer the value may have been observed or
//! modified through channels it cannot see, so the loop cannot be elided.
pub(crate) fn insert_delay(steps: u32) {
    let mut counter = 0u64;
    for _ in 0..steps {
        counter = std::hint::black_box(counter.wrapping_add(1));
    }
    std::hint::black_box(counter);
}

#[cfg(test)]
mod tests {
    use super::insert_delay;

    #[test]
    fn zero_steps_returns_immediately() {
        insert_delay(0);
    }

    #[test]
    fn nonzero_steps_completes() {
        insert_delay(64);
    }
}
