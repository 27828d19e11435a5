//! IdGenerator port - execution-token minting.
//!
//! Task and group ids come from the store's sequence. Execution tokens are
//! minted by whichever process locks a task, so they have to be unique
//! without coordination: ULIDs, timestamped by the injected [`Clock`].
//!
//! # Implementations
//! - **UlidGenerator**: ULID tokens over any [`Clock`]

use crate::domain::ExecutionToken;
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn execution_token(&self) -> ExecutionToken;
}

/// ULID-based generator.
///
/// The timestamp part comes from the clock, so tokens minted under a
/// `FixedClock` share a timestamp and differ only in their random part.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn execution_token(&self) -> ExecutionToken {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        ExecutionToken::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_tokens() {
        let id_gen = UlidGenerator::new(SystemClock);

        let a = id_gen.execution_token();
        let b = id_gen.execution_token();
        let c = id_gen.execution_token();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn ulid_generator_uses_the_clock_for_timestamps() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let a = id_gen.execution_token();
        let b = id_gen.execution_token();

        // Same timestamp, different random part.
        assert_ne!(a, b);
        assert_eq!(a.as_ulid().timestamp_ms(), b.as_ulid().timestamp_ms());
        assert_eq!(
            a.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }
}
