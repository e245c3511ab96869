use model::pagination::page::FetchOutcome;
use std::time::Duration;

/// What the coordinator should do after an observed outcome.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Wait this long before dispatching the next chunk.
    CoolDown(Duration),
    /// Stop dispatching.
    Tripped,
}

/// Watches fetch outcomes for unexpected errors.
///
/// Each unexpected error in a row doubles the cool-down before the next
/// chunk, up to `max_cool_down`. The `threshold`-th one trips the breaker.
/// A successful page resets the streak; ordinary failures such as timeouts
/// or client errors neither extend nor reset it.
#[derive(Debug, Clone)]
pub struct UnexpectedErrorBreaker {
    threshold: u32,
    streak: u32,
    cool_down: Duration,
    max_cool_down: Duration,
}

impl UnexpectedErrorBreaker {
    pub fn new(threshold: u32, cool_down: Duration, max_cool_down: Duration) -> Self {
        UnexpectedErrorBreaker {
            threshold: threshold.max(1),
            streak: 0,
            cool_down,
            max_cool_down: max_cool_down.max(cool_down),
        }
    }

    pub fn observe(&mut self, outcome: &FetchOutcome) -> Verdict {
        match outcome {
            FetchOutcome::Success(_) => {
                self.streak = 0;
                Verdict::Continue
            }
            FetchOutcome::Failure(err) if err.is_unexpected() => {
                self.streak = self.streak.saturating_add(1);
                if self.is_tripped() {
                    Verdict::Tripped
                } else {
                    Verdict::CoolDown(self.cool_down_for(self.streak))
                }
            }
            FetchOutcome::Failure(_) => Verdict::Continue,
        }
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn is_tripped(&self) -> bool {
        self.streak >= self.threshold
    }

    fn cool_down_for(&self, streak: u32) -> Duration {
        let doublings = streak.saturating_sub(1).min(16);
        self.cool_down
            .saturating_mul(1 << doublings)
            .min(self.max_cool_down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::pagination::page::{FetchError, Payload};

    fn unexpected() -> FetchOutcome {
        FetchOutcome::Failure(FetchError::Unexpected("worker panicked".into()))
    }

    fn ok() -> FetchOutcome {
        FetchOutcome::Success(Payload::Markup(String::new()))
    }

    #[test]
    fn trips_after_threshold_with_growing_cool_down() {
        let mut breaker =
            UnexpectedErrorBreaker::new(3, Duration::from_millis(100), Duration::from_millis(150));

        assert_eq!(
            breaker.observe(&unexpected()),
            Verdict::CoolDown(Duration::from_millis(100))
        );
        assert_eq!(
            breaker.observe(&unexpected()),
            Verdict::CoolDown(Duration::from_millis(150))
        );
        assert_eq!(breaker.observe(&unexpected()), Verdict::Tripped);
        assert!(breaker.is_tripped());
    }

    #[test]
    fn ordinary_failures_do_not_count() {
        let mut breaker = UnexpectedErrorBreaker::new(2, Duration::ZERO, Duration::ZERO);
        let timeout = FetchOutcome::Failure(FetchError::Timeout(Duration::from_secs(20)));

        breaker.observe(&unexpected());
        assert_eq!(breaker.observe(&timeout), Verdict::Continue);
        assert_eq!(breaker.streak(), 1);

        breaker.observe(&ok());
        assert_eq!(breaker.streak(), 0);
    }
}
