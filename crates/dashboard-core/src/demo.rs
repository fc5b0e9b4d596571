//! Demo Mode - Simulated ECU frame generator for testing
//!
//! Produces chunks of wire frames for every catalog entry the key map can
//! resolve, so the whole pipeline can run without a vehicle: speed ramps,
//! bus voltage wobble, a slowly draining battery, a heartbeat and periodic
//! state transitions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};

use crate::keymap::KeyTables;
use crate::protocol::Frame;
use crate::registry::Metric;
use crate::state::VehicleState;

/// Time spent in each state before the next transition (ms)
const STATE_PERIOD_MS: u64 = 10_000;

// Visited in order, then repeated
const STATE_CYCLE: [VehicleState; 4] = [
    VehicleState::Idle,
    VehicleState::Driving,
    VehicleState::Idle,
    VehicleState::Charging,
];

/// Key map JSON covering every catalog entry and state tag.
///
/// IDs are assigned in catalog order starting at 1.
pub fn demo_key_map_json() -> String {
    let mut tags = Map::new();
    let mut strings = Map::new();

    let tag_names = Metric::ALL
        .iter()
        .map(|m| m.tag().to_string())
        .chain(VehicleState::ALL.iter().map(|s| s.tag()));
    for tag in tag_names {
        let next = tags.len() as u64 + 1;
        tags.entry(tag).or_insert(Value::from(next));
    }
    for metric in Metric::ALL {
        let next = strings.len() as u64 + 1;
        strings
            .entry(metric.message().to_string())
            .or_insert(Value::from(next));
    }

    Value::Array(vec![Value::Object(tags), Value::Object(strings)]).to_string()
}

/// Demo ECU simulator
pub struct DemoSimulator {
    /// Resolved (metric, tag id, string id)
    keys: Vec<(Metric, u16, u16)>,
    /// Resolved state tags, in [`STATE_CYCLE`] order
    state_tags: Vec<Option<u16>>,
    rng: StdRng,
    start_ms: Option<u64>,
    last_ms: u64,
    speed: f64,
    target_speed: f64,
    battery: f64,
    beat: i32,
}

impl DemoSimulator {
    /// Simulator emitting the entries `tables` resolves, seeded for repeatable runs
    pub fn new(tables: &KeyTables, seed: u64) -> Self {
        let keys = Metric::ALL
            .iter()
            .filter_map(|&m| {
                Some((m, tables.tag_id(m.tag())?, tables.string_id(m.message())?))
            })
            .collect();
        let state_tags = STATE_CYCLE
            .iter()
            .map(|s| tables.tag_id(&s.tag()))
            .collect();

        Self {
            keys,
            state_tags,
            rng: StdRng::seed_from_u64(seed),
            start_ms: None,
            last_ms: 0,
            speed: 0.0,
            target_speed: 0.0,
            battery: 100.0,
            beat: 0,
        }
    }

    /// Number of catalog entries this simulator can emit
    pub fn resolved(&self) -> usize {
        self.keys.len()
    }

    /// Vehicle state the simulation is in at `elapsed_ms`
    pub fn state_at(&self, elapsed_ms: u64) -> VehicleState {
        let since_start = elapsed_ms.saturating_sub(self.start_ms.unwrap_or(elapsed_ms));
        STATE_CYCLE[(since_start / STATE_PERIOD_MS) as usize % STATE_CYCLE.len()]
    }

    /// Advance to `elapsed_ms` and return one chunk with a frame per resolved entry
    pub fn tick(&mut self, elapsed_ms: u64) -> Vec<u8> {
        let start = *self.start_ms.get_or_insert(elapsed_ms);
        let delta_s = elapsed_ms.saturating_sub(self.last_ms.max(start)) as f64 / 1000.0;
        self.last_ms = elapsed_ms;
        let t = (elapsed_ms - start) as f64 / 1000.0;

        let state = self.state_at(elapsed_ms);
        self.advance(state, delta_s);
        self.beat = self.beat.wrapping_add(1);

        let mut chunk = Vec::with_capacity(self.keys.len() * 8);
        for i in 0..self.keys.len() {
            let (metric, tag_id, string_id) = self.keys[i];
            let Some(value) = self.value_for(metric, state, t) else {
                continue;
            };
            chunk.extend_from_slice(&Frame::new(tag_id, string_id, value).to_bytes());
        }
        chunk
    }

    fn advance(&mut self, state: VehicleState, delta_s: f64) {
        if state == VehicleState::Driving {
            if (self.speed - self.target_speed).abs() < 1.0 {
                self.target_speed = self.rng.gen_range(15.0..65.0);
            }
        } else {
            self.target_speed = 0.0;
        }
        let step = 12.0 * delta_s;
        self.speed += (self.target_speed - self.speed).clamp(-step, step);

        match state {
            VehicleState::Charging => self.battery = (self.battery + 0.5 * delta_s).min(100.0),
            _ => self.battery = (self.battery - 0.01 * (1.0 + self.speed) * delta_s).max(0.0),
        }
    }

    fn value_for(&mut self, metric: Metric, state: VehicleState, t: f64) -> Option<i32> {
        let wobble = self.rng.gen_range(-1.5..1.5);
        let current = self.speed * 4.0;
        let value = match metric {
            Metric::Mc0Voltage | Metric::Mc1Voltage | Metric::BmsVolt => {
                (300.0 + 4.0 * (t * 0.7).sin() + wobble - current * 0.05) as i32
            }
            Metric::Mc0Current | Metric::Mc1Current | Metric::BmsAmp => (current + wobble) as i32,
            Metric::Mc0BoardTemp | Metric::Mc1BoardTemp => (35.0 + self.speed * 0.2 + wobble) as i32,
            Metric::Mc0MotorTemp | Metric::Mc1MotorTemp => (40.0 + self.speed * 0.4 + wobble) as i32,
            Metric::Speedometer => self.speed.round() as i32,
            Metric::PowerGauge => (current * 300.0 / 1000.0).round() as i32,
            Metric::BatteryLife => self.battery.round() as i32,
            Metric::BmsHighTemp => (30.0 + self.speed * 0.1) as i32,
            Metric::BmsLowTemp => 24,
            Metric::BmsDischargeLim => 250,
            Metric::BmsChargeLim => 40,
            Metric::Fault => 0,
            Metric::Lag => return None,
            Metric::Beat => self.beat,
            Metric::StartLight => i32::from(state == VehicleState::Idle),
            Metric::State => {
                let index = STATE_CYCLE.iter().position(|s| *s == state).unwrap_or(0);
                i32::from(self.state_tags[index]?)
            }
            Metric::SerialVarResponse => return None,
        };
        Some(value)
    }
}

impl std::fmt::Debug for DemoSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoSimulator")
            .field("resolved", &self.keys.len())
            .field("speed", &self.speed)
            .field("battery", &self.battery)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChunkFrames;

    fn tables() -> KeyTables {
        KeyTables::parse(&demo_key_map_json()).unwrap()
    }

    #[test]
    fn test_demo_map_resolves_everything() {
        let tables = tables();
        let sim = DemoSimulator::new(&tables, 1);
        assert_eq!(sim.resolved(), Metric::COUNT);
        for state in VehicleState::ALL {
            assert!(tables.tag_id(&state.tag()).is_some(), "{state}");
        }
    }

    #[test]
    fn test_tick_emits_whole_frames() {
        let mut sim = DemoSimulator::new(&tables(), 7);
        let chunk = sim.tick(0);
        assert_eq!(chunk.len() % 8, 0);
        // Lag and SerialVarResponse are never simulated
        assert_eq!(chunk.len() / 8, Metric::COUNT - 2);
    }

    #[test]
    fn test_state_cycles() {
        let tables = tables();
        let mut sim = DemoSimulator::new(&tables, 3);
        sim.tick(1_000);
        assert_eq!(sim.state_at(1_000), VehicleState::Idle);
        assert_eq!(sim.state_at(11_000), VehicleState::Driving);
        assert_eq!(sim.state_at(31_000), VehicleState::Charging);

        let chunk = sim.tick(11_000);
        let state_key = (
            tables.tag_id(Metric::State.tag()).unwrap(),
            tables.string_id(Metric::State.message()).unwrap(),
        );
        let driving_tag = tables.tag_id(&VehicleState::Driving.tag()).unwrap();
        let state_frame = ChunkFrames::new(&chunk)
            .map(Frame::decode)
            .find(|f| (f.tag_id, f.string_id) == state_key)
            .unwrap();
        assert_eq!(state_frame.value, i32::from(driving_tag));
    }

    #[test]
    fn test_same_seed_same_output() {
        let tables = tables();
        let mut a = DemoSimulator::new(&tables, 42);
        let mut b = DemoSimulator::new(&tables, 42);
        for ms in [0, 100, 12_000, 12_100] {
            assert_eq!(a.tick(ms), b.tick(ms));
        }
    }
}
