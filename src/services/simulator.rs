//! Demo fleet and station simulation
//!
//! Used when no nodes are configured and by the `sensor-sim` binary.

use crate::domain::node::{NodeStatus, SensorNode};
use crate::domain::types::Measurements;
use rand::Rng;

/// One `ESP-NN` node per grid cell, roughly three quarters of them online
pub fn simulate_fleet<R: Rng + ?Sized>(cols: usize, rows: usize, rng: &mut R) -> Vec<SensorNode> {
    (0..cols * rows)
        .map(|i| {
            let status =
                if rng.gen::<f64>() > 0.25 { NodeStatus::Active } else { NodeStatus::Inactive };
            let distance = ((rng.gen::<f64>() * 20.0 + 5.0) * 10.0).round() / 10.0;
            SensorNode::new(format!("ESP-{:02}", i + 1), status, distance)
        })
        .collect()
}

/// Random walk around typical indoor values
pub struct StationWalk {
    current: Measurements,
}

impl Default for StationWalk {
    fn default() -> Self {
        Self { current: Measurements::new(22.0, 600.0, 45.0) }
    }
}

impl StationWalk {
    pub fn new(start: Measurements) -> Self {
        Self { current: start }
    }

    pub fn next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Measurements {
        let m = &mut self.current;
        m.temperature = round1((m.temperature + rng.gen_range(-0.3..0.3)).clamp(15.0, 35.0));
        m.co2 = (m.co2 + rng.gen_range(-40.0..40.0)).clamp(400.0, 2000.0).round();
        m.humidity = round1((m.humidity + rng.gen_range(-1.0..1.0)).clamp(20.0, 80.0));
        *m
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
