//! Vehicle state
//!
//! The ECU reports its state machine through the "Current State" message.
//! The value of that message is the tag ID of the state's own tag, e.g. the ID
//! of `[Idle State]`, so states can only be recognised once the key map is
//! loaded.
//!
//! [`StateTracker`] is written by the dispatch task alone. Any thread may read
//! the current state or (un)subscribe.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::observer::{ObserverList, SubscriptionId};

/// State of the vehicle's main state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VehicleState {
    Initializing = 0,
    PreCharge,
    Idle,
    Charging,
    Button,
    Driving,
    Fault,
}

impl VehicleState {
    /// Every state, in declaration order
    pub const ALL: [VehicleState; 7] = [
        VehicleState::Initializing,
        VehicleState::PreCharge,
        VehicleState::Idle,
        VehicleState::Charging,
        VehicleState::Button,
        VehicleState::Driving,
        VehicleState::Fault,
    ];

    /// Human readable name, as the ECU spells it
    pub fn title(self) -> &'static str {
        match self {
            VehicleState::Initializing => "Teensy Initialize",
            VehicleState::PreCharge => "PreCharge State",
            VehicleState::Idle => "Idle State",
            VehicleState::Charging => "Charging State",
            VehicleState::Button => "Button State",
            VehicleState::Driving => "Driving Mode State",
            VehicleState::Fault => "Fault State",
        }
    }

    /// Tag string bound to this state in the key map
    pub fn tag(self) -> String {
        format!("[{}]", self.title())
    }

    /// Look up a state by its title, ignoring case
    pub fn from_title(title: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.title().eq_ignore_ascii_case(title))
    }

    fn from_repr(repr: u8) -> Self {
        Self::ALL
            .get(repr as usize)
            .copied()
            .unwrap_or(VehicleState::Initializing)
    }
}

impl std::fmt::Display for VehicleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

/// A frame whose message is one of the known fault texts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultEvent {
    /// Arrival time of the chunk carrying the frame (epoch ms)
    pub timestamp: i64,
    /// Tag of the sender
    pub tag_id: u16,
    /// String ID of the fault message
    pub string_id: u16,
    /// Fault message text
    pub message: String,
    /// Raw frame value
    pub value: i32,
}

/// Last known vehicle state plus state and fault subscribers
#[derive(Debug)]
pub struct StateTracker {
    state: AtomicU8,
    state_listeners: ObserverList<VehicleState>,
    fault_listeners: ObserverList<FaultEvent>,
}

impl StateTracker {
    /// Tracker starting in [`VehicleState::Initializing`]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(VehicleState::Initializing as u8),
            state_listeners: ObserverList::new(),
            fault_listeners: ObserverList::new(),
        }
    }

    /// Current vehicle state
    pub fn state(&self) -> VehicleState {
        VehicleState::from_repr(self.state.load(Ordering::Acquire))
    }

    /// Subscribe to state changes
    pub fn on_state_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&VehicleState) + Send + Sync + 'static,
    {
        self.state_listeners.subscribe(listener)
    }

    /// Subscribe to fault reports
    pub fn on_fault<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&FaultEvent) + Send + Sync + 'static,
    {
        self.fault_listeners.subscribe(listener)
    }

    /// Remove a state or fault subscriber
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state_listeners.unsubscribe(id) || self.fault_listeners.unsubscribe(id)
    }

    /// Record a new state. Listeners fire only if the state changed.
    pub(crate) fn set(&self, state: VehicleState) -> bool {
        let prior = self.state.swap(state as u8, Ordering::AcqRel);
        if prior == state as u8 {
            return false;
        }
        self.state_listeners.notify(&state);
        true
    }

    pub(crate) fn report_fault(&self, event: FaultEvent) {
        self.fault_listeners.notify(&event);
    }

    /// Back to [`VehicleState::Initializing`] without notifying, e.g. on disconnect
    pub fn reset(&self) {
        self.state
            .store(VehicleState::Initializing as u8, Ordering::Release);
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_state_titles() {
        assert_eq!(VehicleState::Idle.tag(), "[Idle State]");
        assert_eq!(
            VehicleState::from_title("driving mode state"),
            Some(VehicleState::Driving)
        );
        assert_eq!(VehicleState::from_title("Parked"), None);
    }

    #[test]
    fn test_set_notifies_on_change_only() {
        let tracker = StateTracker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        tracker.on_state_change(move |state| s.lock().unwrap().push(*state));

        assert!(tracker.set(VehicleState::Idle));
        assert!(!tracker.set(VehicleState::Idle));
        assert!(tracker.set(VehicleState::Driving));

        assert_eq!(tracker.state(), VehicleState::Driving);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![VehicleState::Idle, VehicleState::Driving]
        );

        tracker.reset();
        assert_eq!(tracker.state(), VehicleState::Initializing);
    }
}
