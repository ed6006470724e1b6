//! Request generations.
//!
//! Every view that refetches on identifier changes stamps its requests with a
//! [`Generation`]. A response is applied only if its stamp is still the current one, so a
//! slow response for an old episode or page can never overwrite newer state.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: Generation,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new request, invalidating every earlier one.
    pub fn bump(&mut self) -> Generation {
        self.current = Generation(self.current.0 + 1);
        self.current
    }

    pub fn current(&self) -> Generation {
        self.current
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current == generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_latest_generation_is_current() {
        let mut counter = GenerationCounter::new();
        let first = counter.bump();
        let second = counter.bump();
        assert!(!counter.is_current(first));
        assert!(counter.is_current(second));
        assert_eq!(second.value(), 2);
    }
}
