//! Sensor node model used by the fleet map

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
}

impl NodeStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Active)
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeStatus::Active => "Online",
            NodeStatus::Inactive => "Offline",
        }
    }
}

/// A station on the fleet map with its measured range (metres)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorNode {
    pub name: String,
    pub status: NodeStatus,
    pub distance: f64,
}

impl SensorNode {
    pub fn new(name: impl Into<String>, status: NodeStatus, distance: f64) -> Self {
        Self { name: name.into(), status, distance }
    }
}

/// Display position in percent of the viewport, y growing downwards
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Format a distance in metres the way the dashboard shows it
pub fn format_meters(value: f64) -> String {
    format!("{value:.1} m")
}
