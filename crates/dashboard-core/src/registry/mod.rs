//! Message Registry
//!
//! Maps combined (tag, string) keys to catalog entries and keeps the last
//! decoded value of every entry.
//!
//! The registry itself is owned by the dispatch task, which is the only
//! writer. Values and value listeners live in a shared [`MetricTable`] so UI
//! code on other threads can read values and subscribe without touching the
//! key resolution used on the hot path.

mod metric;

pub use metric::{DecodeKind, MessageDefinition, Metric};

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::keymap::{combined_key, KeyMap, KeyTables};
use crate::observer::{ObserverList, SubscriptionId};
use crate::state::VehicleState;

/// Fault messages recognised when no list is configured
pub const DEFAULT_FAULT_MESSAGES: &[&str] = &[
    "[FATAL] Fault State Entered",
    "[ERROR] BMS Fault",
    "[ERROR] MC0 Fault",
    "[ERROR] MC1 Fault",
    "[ERROR] CAN Bus Timeout",
    "[ERROR] Pedal Implausibility",
];

// Stored before the first update so that first update always counts as a change
const UNSET: i64 = i64::MIN;

/// When a value listener fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// On every received frame
    EveryUpdate,
    /// Only when the decoded value differs from the previous one
    OnValueChange,
}

struct MetricSlot {
    value: AtomicI64,
    on_update: ObserverList<i64>,
    on_change: ObserverList<i64>,
}

impl MetricSlot {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(UNSET),
            on_update: ObserverList::new(),
            on_change: ObserverList::new(),
        }
    }
}

/// Shared, thread-safe view of the catalog values
pub struct MetricTable {
    slots: Vec<MetricSlot>,
}

impl MetricTable {
    fn new() -> Self {
        Self {
            slots: (0..Metric::COUNT).map(|_| MetricSlot::new()).collect(),
        }
    }

    fn slot(&self, metric: Metric) -> &MetricSlot {
        &self.slots[metric.index()]
    }

    /// Last decoded value, 0 if nothing was received yet
    pub fn value_of(&self, metric: Metric) -> i64 {
        self.try_value_of(metric).unwrap_or(0)
    }

    /// Last decoded value, `None` if nothing was received yet
    pub fn try_value_of(&self, metric: Metric) -> Option<i64> {
        match self.slot(metric).value.load(Ordering::Acquire) {
            UNSET => None,
            v => Some(v),
        }
    }

    /// Subscribe to the values of one entry
    pub fn subscribe<F>(&self, metric: Metric, mode: UpdateMode, listener: F) -> SubscriptionId
    where
        F: Fn(&i64) + Send + Sync + 'static,
    {
        let slot = self.slot(metric);
        match mode {
            UpdateMode::EveryUpdate => slot.on_update.subscribe(listener),
            UpdateMode::OnValueChange => slot.on_change.subscribe(listener),
        }
    }

    /// Remove a value subscriber
    pub fn unsubscribe(&self, metric: Metric, id: SubscriptionId) -> bool {
        let slot = self.slot(metric);
        slot.on_update.unsubscribe(id) || slot.on_change.unsubscribe(id)
    }

    /// All entries that received a value, in catalog order
    pub fn snapshot(&self) -> Vec<(Metric, i64)> {
        Metric::ALL
            .iter()
            .filter_map(|m| self.try_value_of(*m).map(|v| (*m, v)))
            .collect()
    }

    /// Store a value and notify listeners
    fn store(&self, metric: Metric, value: i64) {
        let slot = self.slot(metric);
        let prior = slot.value.swap(value, Ordering::AcqRel);
        slot.on_update.notify(&value);
        if prior != value {
            slot.on_change.notify(&value);
        }
    }

    /// Forget every value without notifying
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.value.store(UNSET, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for MetricTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

/// Key resolution plus the shared value table
#[derive(Debug)]
pub struct MessageRegistry {
    table: Arc<MetricTable>,
    by_key: HashMap<u32, Metric>,
    keys: [Option<u32>; Metric::COUNT],
    faults: HashMap<u16, String>,
    states: HashMap<u16, VehicleState>,
    fault_messages: Vec<String>,
}

impl MessageRegistry {
    /// Registry recognising [`DEFAULT_FAULT_MESSAGES`]
    pub fn new() -> Self {
        Self::with_fault_messages(DEFAULT_FAULT_MESSAGES.iter().map(|s| s.to_string()).collect())
    }

    /// Registry recognising a custom list of fault messages
    pub fn with_fault_messages(fault_messages: Vec<String>) -> Self {
        Self {
            table: Arc::new(MetricTable::new()),
            by_key: HashMap::new(),
            keys: [None; Metric::COUNT],
            faults: HashMap::new(),
            states: HashMap::new(),
            fault_messages,
        }
    }

    /// Shared handle to the values
    pub fn handle(&self) -> Arc<MetricTable> {
        Arc::clone(&self.table)
    }

    /// Resolve every entry against the current key map
    pub fn resolve_all(&mut self, key_map: &KeyMap) {
        let tables = key_map.snapshot();
        self.resolve_with(tables.as_deref());
    }

    /// Resolve every entry against explicit tables, or drop all resolutions if `None`.
    ///
    /// Entries whose tag or message is missing from the tables cannot be
    /// dispatched to until the next resolution, but keep their last value.
    pub fn resolve_with(&mut self, tables: Option<&KeyTables>) {
        self.by_key.clear();
        self.keys = [None; Metric::COUNT];
        self.faults.clear();
        self.states.clear();

        let Some(tables) = tables else {
            debug!("key map unloaded, all message keys dropped");
            return;
        };

        for metric in Metric::ALL {
            let def = metric.definition();
            if let Some(key) = tables.message_key(def.tag, def.message) {
                self.by_key.insert(key, metric);
                self.keys[metric.index()] = Some(key);
            }
        }

        for state in VehicleState::ALL {
            match tables.tag_id(&state.tag()) {
                Some(tag_id) => {
                    self.states.insert(tag_id, state);
                }
                None => warn!(state = %state, "failed to set state for tag"),
            }
        }

        for message in &self.fault_messages {
            if let Some(id) = tables.string_id(message) {
                self.faults.insert(id, message.clone());
            }
        }

        debug!(
            resolved = self.by_key.len(),
            states = self.states.len(),
            faults = self.faults.len(),
            "message keys resolved"
        );
    }

    /// Store a raw value for the entry bound to `key`.
    ///
    /// Returns the matched entry, `None` if the key is not resolved.
    pub fn update(&self, key: u32, raw: i32) -> Option<Metric> {
        let metric = *self.by_key.get(&key)?;
        self.table.store(metric, metric.kind().decode(raw));
        Some(metric)
    }

    /// Last value of an entry
    pub fn value_of(&self, metric: Metric) -> i64 {
        self.table.value_of(metric)
    }

    /// Resolved combined key of an entry
    pub fn key_of(&self, metric: Metric) -> Option<u32> {
        self.keys[metric.index()]
    }

    /// Whether frames can currently be dispatched to `metric`
    pub fn is_resolved(&self, metric: Metric) -> bool {
        self.key_of(metric).is_some()
    }

    /// Entry bound to a combined key
    pub fn message(&self, key: u32) -> Option<Metric> {
        self.by_key.get(&key).copied()
    }

    /// Current key → entry resolution
    pub fn resolved_keys(&self) -> &HashMap<u32, Metric> {
        &self.by_key
    }

    /// Fault text if `string_id` is a known fault message
    pub fn check_fault(&self, string_id: u16) -> Option<&str> {
        self.faults.get(&string_id).map(String::as_str)
    }

    /// State bound to a tag ID
    pub fn state_for_tag(&self, tag_id: u16) -> Option<VehicleState> {
        self.states.get(&tag_id).copied()
    }

    /// Combined key helper for callers holding raw IDs
    pub fn key(tag_id: u16, string_id: u16) -> u32 {
        combined_key(tag_id, string_id)
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const MAP: &str = r#"[
        {"[Front Teensy]": 1, "[HeartBeat]": 2, "[Idle State]": 10, "[Driving Mode State]": 11},
        {"[ LOG ] Beat": 5, "[ LOG ] Current State": 6, "[ LOG ] BMS State Of Charge:": 7,
         "[WARN]  Heartbeat is taking too long": 8, "[ERROR] BMS Fault": 9}
    ]"#;

    fn resolved() -> MessageRegistry {
        let map = KeyMap::unpersisted();
        map.load(MAP).unwrap();
        let mut registry = MessageRegistry::new();
        registry.resolve_all(&map);
        registry
    }

    #[test]
    fn test_resolve_all() {
        let registry = resolved();

        assert_eq!(registry.message(combined_key(1, 5)), Some(Metric::Beat));
        assert_eq!(registry.key_of(Metric::Lag), Some(combined_key(2, 8)));
        assert!(!registry.is_resolved(Metric::Speedometer));
        assert_eq!(registry.resolved_keys().len(), 4);
        assert_eq!(registry.state_for_tag(10), Some(VehicleState::Idle));
        assert_eq!(registry.state_for_tag(1), None);
        assert_eq!(registry.check_fault(9), Some("[ERROR] BMS Fault"));
        assert_eq!(registry.check_fault(5), None);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let map = KeyMap::unpersisted();
        map.load(MAP).unwrap();
        let mut registry = MessageRegistry::new();

        registry.resolve_all(&map);
        let first = registry.resolved_keys().clone();
        registry.resolve_all(&map);
        assert_eq!(registry.resolved_keys(), &first);
    }

    #[test]
    fn test_update_decodes_and_notifies() {
        let registry = resolved();
        let table = registry.handle();

        let every = Arc::new(Mutex::new(Vec::new()));
        let changes = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&every);
        table.subscribe(Metric::BatteryLife, UpdateMode::EveryUpdate, move |v| {
            e.lock().unwrap().push(*v)
        });
        let c = Arc::clone(&changes);
        table.subscribe(Metric::BatteryLife, UpdateMode::OnValueChange, move |v| {
            c.lock().unwrap().push(*v)
        });

        let key = combined_key(1, 7);
        assert_eq!(registry.update(key, 0xFF), Some(Metric::BatteryLife));
        assert_eq!(registry.update(key, 0xFF), Some(Metric::BatteryLife));
        assert_eq!(registry.update(key, 90), Some(Metric::BatteryLife));

        assert_eq!(*every.lock().unwrap(), vec![-1, -1, 90]);
        assert_eq!(*changes.lock().unwrap(), vec![-1, 90]);
        assert_eq!(registry.value_of(Metric::BatteryLife), 90);
    }

    #[test]
    fn test_unresolved_key_is_ignored() {
        let registry = resolved();
        assert_eq!(registry.update(combined_key(9, 9), 1), None);
        assert_eq!(registry.handle().try_value_of(Metric::Beat), None);
        assert!(registry.handle().snapshot().is_empty());
    }

    #[test]
    fn test_unload_drops_resolution_but_keeps_values() {
        let mut registry = resolved();
        registry.update(combined_key(1, 5), 3);

        registry.resolve_with(None);
        assert!(registry.resolved_keys().is_empty());
        assert_eq!(registry.update(combined_key(1, 5), 4), None);
        assert_eq!(registry.value_of(Metric::Beat), 3);
    }
}
