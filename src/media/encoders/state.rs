// SPDX-License-Identifier: MPL-2.0

//! Encoder lifecycle state machine

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one encoder
///
/// ```text
/// Uninitialized --init--> Configured --start--> Running --stop--> Draining --grace--> Stopped
///                                                   \                                    |
///                                                    codec error --> Failed --stop------+
/// Stopped --init--> Configured
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncoderState {
    Uninitialized = 0,
    Configured = 1,
    Running = 2,
    /// `stop()` was called; input is refused, backend release pending
    Draining = 3,
    Stopped = 4,
    /// Codec reported a runtime error; `stop()` then `init` to recover
    Failed = 5,
}

impl EncoderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EncoderState::Uninitialized,
            1 => EncoderState::Configured,
            2 => EncoderState::Running,
            3 => EncoderState::Draining,
            4 => EncoderState::Stopped,
            _ => EncoderState::Failed,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EncoderState::Uninitialized => "Uninitialized",
            EncoderState::Configured => "Configured",
            EncoderState::Running => "Running",
            EncoderState::Draining => "Draining",
            EncoderState::Stopped => "Stopped",
            EncoderState::Failed => "Failed",
        }
    }

    /// `init` is permitted from here
    pub fn can_configure(&self) -> bool {
        matches!(self, EncoderState::Uninitialized | EncoderState::Stopped)
    }

    /// Output callbacks are still forwarded downstream
    pub fn forwards_output(&self) -> bool {
        matches!(
            self,
            EncoderState::Configured | EncoderState::Running | EncoderState::Draining
        )
    }
}

impl fmt::Display for EncoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Atomically updated [`EncoderState`] shared with callback threads
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: EncoderState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> EncoderState {
        EncoderState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: EncoderState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move to `to` if the current state is one of `from`
    ///
    /// Returns the previous state on success, the current state otherwise.
    pub fn transition(
        &self,
        from: &[EncoderState],
        to: EncoderState,
    ) -> Result<EncoderState, EncoderState> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                from.contains(&EncoderState::from_u8(current))
                    .then_some(to as u8)
            })
            .map(EncoderState::from_u8)
            .map_err(EncoderState::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_from_allowed_state() {
        let cell = StateCell::new(EncoderState::Configured);
        let prev = cell.transition(&[EncoderState::Configured], EncoderState::Running);
        assert_eq!(prev, Ok(EncoderState::Configured));
        assert_eq!(cell.get(), EncoderState::Running);
    }

    #[test]
    fn test_transition_refused() {
        let cell = StateCell::new(EncoderState::Draining);
        let result = cell.transition(
            &[EncoderState::Uninitialized, EncoderState::Stopped],
            EncoderState::Configured,
        );
        assert_eq!(result, Err(EncoderState::Draining));
        assert_eq!(cell.get(), EncoderState::Draining);
    }

    #[test]
    fn test_configure_permissions() {
        assert!(EncoderState::Uninitialized.can_configure());
        assert!(EncoderState::Stopped.can_configure());
        assert!(!EncoderState::Running.can_configure());
        assert!(!EncoderState::Draining.can_configure());
        assert!(!EncoderState::Failed.can_configure());
    }
}
