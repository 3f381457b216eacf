//! Coordinator-free, time-ordered 64-bit request ids.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! 0 | 41 bits: ms since epoch | 10 bits: machine id | 12 bits: sequence
//! ```

use crate::{config::RequestIdConfig, errors::ServiceError};
use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::warn;

pub const TIMESTAMP_BITS: u32 = 41;
pub const MACHINE_ID_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;

pub const MAX_MACHINE_ID: u64 = (1 << MACHINE_ID_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;
const MACHINE_ID_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + MACHINE_ID_BITS;

/// Millisecond wall clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: Option<u64>,
    sequence: u64,
}

/// Generates strictly increasing ids for one process.
///
/// Two generators with different machine ids never produce the same id.
pub struct RequestIdGenerator {
    clock: Arc<dyn Clock>,
    machine_id: u64,
    epoch_ms: u64,
    max_clock_rewind_ms: u64,
    state: Mutex<GeneratorState>,
}

impl std::fmt::Debug for RequestIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestIdGenerator")
            .field("machine_id", &self.machine_id)
            .field("epoch_ms", &self.epoch_ms)
            .field("max_clock_rewind_ms", &self.max_clock_rewind_ms)
            .finish()
    }
}

impl RequestIdGenerator {
    pub fn new(config: &RequestIdConfig) -> Result<Self, ServiceError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &RequestIdConfig, clock: Arc<dyn Clock>) -> Result<Self, ServiceError> {
        let machine_id = u64::from(config.machine_id);
        if machine_id > MAX_MACHINE_ID {
            return Err(ServiceError::InvalidInput(format!(
                "machine id {} exceeds {}",
                machine_id, MAX_MACHINE_ID
            )));
        }

        Ok(Self {
            clock,
            machine_id,
            epoch_ms: config.epoch_ms,
            max_clock_rewind_ms: config.max_clock_rewind_ms,
            state: Mutex::new(GeneratorState::default()),
        })
    }

    /// Milliseconds since the configured epoch, bounded to 41 bits.
    fn timestamp(&self) -> Result<u64, ServiceError> {
        let now = self.clock.now_millis();
        let elapsed = now
            .checked_sub(self.epoch_ms)
            .ok_or_else(|| ServiceError::ClockSkew(self.epoch_ms - now))?;
        if elapsed > MAX_TIMESTAMP {
            return Err(ServiceError::ClockSkew(elapsed - MAX_TIMESTAMP));
        }
        Ok(elapsed)
    }

    /// Returns the next id.
    ///
    /// Blocks the calling thread for at most `max_clock_rewind_ms` when the
    /// clock has stepped back, and busy-waits for the next millisecond when
    /// the per-millisecond sequence is exhausted. Async callers run it on
    /// the blocking pool (`tokio::task::spawn_blocking`).
    ///
    /// # Errors
    /// `ClockSkew` when the clock stepped back further than tolerated, stays
    /// behind after waiting, or lies outside the 41-bit window.
    pub fn next_id(&self) -> Result<u64, ServiceError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ServiceError::InternalError("request id state poisoned".to_string()))?;

        let mut timestamp = self.timestamp()?;

        if let Some(last) = state.last_timestamp {
            if timestamp < last {
                let behind = last - timestamp;
                if behind > self.max_clock_rewind_ms {
                    warn!(behind_ms = behind, "Clock moved backwards beyond tolerance");
                    return Err(ServiceError::ClockSkew(behind));
                }
                std::thread::sleep(Duration::from_millis(behind));
                timestamp = self.timestamp()?;
                if timestamp < last {
                    return Err(ServiceError::ClockSkew(last - timestamp));
                }
            }

            if timestamp == last {
                if state.sequence == MAX_SEQUENCE {
                    while timestamp <= last {
                        std::hint::spin_loop();
                        timestamp = self.timestamp()?;
                    }
                    state.sequence = 0;
                } else {
                    state.sequence += 1;
                }
            } else {
                state.sequence = 0;
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp = Some(timestamp);

        Ok((timestamp << TIMESTAMP_SHIFT) | (self.machine_id << MACHINE_ID_SHIFT) | state.sequence)
    }
}

/// Wire form of a request id: lowercase hex.
pub fn format_request_id(id: u64) -> String {
    format!("{:x}", id)
}

/// Splits an id into (milliseconds since epoch, machine id, sequence).
pub fn decompose(id: u64) -> (u64, u64, u64) {
    (
        id >> TIMESTAMP_SHIFT,
        (id >> MACHINE_ID_SHIFT) & MAX_MACHINE_ID,
        id & MAX_SEQUENCE,
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Clock;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted readings, then repeats the last one.
    #[derive(Debug, Default)]
    pub struct ScriptedClock {
        readings: Mutex<VecDeque<u64>>,
        last: Mutex<u64>,
    }

    impl ScriptedClock {
        pub fn new(readings: impl IntoIterator<Item = u64>) -> Self {
            let readings: VecDeque<u64> = readings.into_iter().collect();
            let first = readings.front().copied().unwrap_or_default();
            Self {
                readings: Mutex::new(readings),
                last: Mutex::new(first),
            }
        }

        pub fn push(&self, reading: u64) {
            self.readings.lock().unwrap().push_back(reading);
        }
    }

    impl Clock for ScriptedClock {
        fn now_millis(&self) -> u64 {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.readings.lock().unwrap().pop_front() {
                *last = next;
            }
            *last
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedClock;
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashSet;

    const EPOCH: u64 = 1_704_067_200_000;

    fn config(machine_id: u16) -> RequestIdConfig {
        RequestIdConfig {
            machine_id,
            epoch_ms: EPOCH,
            max_clock_rewind_ms: 5,
        }
    }

    fn scripted(machine_id: u16, readings: Vec<u64>) -> RequestIdGenerator {
        RequestIdGenerator::with_clock(&config(machine_id), Arc::new(ScriptedClock::new(readings)))
            .unwrap()
    }

    #[test]
    fn ten_thousand_ids_are_distinct_and_increasing() {
        let generator = RequestIdGenerator::new(&config(1)).unwrap();
        let ids: Vec<u64> = (0..10_000).map(|_| generator.next_id().unwrap()).collect();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn id_layout_carries_time_machine_and_sequence() {
        let generator = scripted(7, vec![EPOCH + 42]);
        let first = generator.next_id().unwrap();
        let second = generator.next_id().unwrap();

        assert_eq!(decompose(first), (42, 7, 0));
        assert_eq!(decompose(second), (42, 7, 1));
    }

    #[test]
    fn sequence_resets_on_new_millisecond() {
        let generator = scripted(0, vec![EPOCH + 1, EPOCH + 1, EPOCH + 2]);
        generator.next_id().unwrap();
        generator.next_id().unwrap();
        assert_eq!(decompose(generator.next_id().unwrap()), (2, 0, 0));
    }

    #[test]
    fn exhausted_sequence_waits_for_next_millisecond() {
        let clock = Arc::new(ScriptedClock::new(
            std::iter::repeat(EPOCH + 10).take(MAX_SEQUENCE as usize + 3),
        ));
        clock.push(EPOCH + 11);
        let generator = RequestIdGenerator::with_clock(&config(0), clock).unwrap();

        let ids: Vec<u64> = (0..=MAX_SEQUENCE)
            .map(|_| generator.next_id().unwrap())
            .collect();
        assert_eq!(decompose(*ids.last().unwrap()), (10, 0, MAX_SEQUENCE));

        let rolled = generator.next_id().unwrap();
        assert_eq!(decompose(rolled), (11, 0, 0));
        assert!(rolled > *ids.last().unwrap());
    }

    #[test]
    fn small_clock_regression_is_waited_out() {
        let generator = scripted(0, vec![EPOCH + 100, EPOCH + 98, EPOCH + 101]);
        let first = generator.next_id().unwrap();
        let second = generator.next_id().unwrap();
        assert!(second > first);
        assert_eq!(decompose(second).0, 101);
    }

    #[test]
    fn regression_to_same_millisecond_continues_sequence() {
        let generator = scripted(0, vec![EPOCH + 100, EPOCH + 99, EPOCH + 100]);
        let first = generator.next_id().unwrap();
        let second = generator.next_id().unwrap();
        assert_eq!(decompose(first), (100, 0, 0));
        assert_eq!(decompose(second), (100, 0, 1));
    }

    #[test]
    fn large_clock_regression_fails() {
        let generator = scripted(0, vec![EPOCH + 100, EPOCH + 50]);
        generator.next_id().unwrap();
        assert_matches!(generator.next_id(), Err(ServiceError::ClockSkew(50)));
    }

    #[test]
    fn clock_that_stays_behind_fails() {
        let generator = scripted(0, vec![EPOCH + 100, EPOCH + 97, EPOCH + 97]);
        generator.next_id().unwrap();
        assert_matches!(generator.next_id(), Err(ServiceError::ClockSkew(3)));
    }

    #[test]
    fn time_before_epoch_is_clock_skew() {
        let generator = scripted(0, vec![EPOCH - 1]);
        assert_matches!(generator.next_id(), Err(ServiceError::ClockSkew(1)));
    }

    #[test]
    fn different_machines_never_collide() {
        let a = scripted(1, vec![EPOCH + 5]);
        let b = scripted(2, vec![EPOCH + 5]);
        let ids_a: HashSet<u64> = (0..100).map(|_| a.next_id().unwrap()).collect();
        let ids_b: HashSet<u64> = (0..100).map(|_| b.next_id().unwrap()).collect();
        assert!(ids_a.is_disjoint(&ids_b));
    }

    #[test]
    fn out_of_range_machine_id_is_rejected() {
        assert!(RequestIdGenerator::new(&config(1024)).is_err());
    }

    #[test]
    fn request_ids_render_as_lowercase_hex() {
        assert_eq!(format_request_id(0xAB_CDEF), "abcdef");
        assert_eq!(format_request_id(0), "0");
    }
}
