//! Spatial layout of the sensor fleet
//!
//! Nodes are placed on a row-major grid inside `[margin, 100 - margin]` (percent
//! of the viewport), then perturbed by random jitter plus an offset that grows
//! with the node's normalized range, pushing far-reaching nodes away from the
//! grid centre. The perturbed set is re-normalized so it spans the full area.
//!
//! "Relative distance" between two nodes is the mean of their range
//! measurements, not the distance between plotted points.

use crate::domain::node::{NodeStatus, Position, SensorNode};
use crate::infra::config::Config;
use crate::services::simulator::simulate_fleet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum LayoutError {
    #[error("layout grid needs at least one column and one row")]
    EmptyGrid,
    #[error("node {name} has invalid distance {distance}")]
    InvalidDistance { name: String, distance: f64 },
    #[error("duplicate node name {0}")]
    DuplicateName(String),
    #[error("unknown node {0}")]
    UnknownNode(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    pub cols: usize,
    pub rows: usize,
    pub margin: f64,
    /// Full width of the uniform jitter on each axis
    pub jitter_x: f64,
    pub jitter_y: f64,
    /// Offset at normalized distance 1.0 (half of it on each side of 0.5)
    pub bias_x: f64,
    pub bias_y: f64,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self { cols: 5, rows: 10, margin: 1.0, jitter_x: 8.0, jitter_y: 6.0, bias_x: 4.0, bias_y: 3.0 }
    }
}

impl LayoutParams {
    pub fn grid(cols: usize, rows: usize, margin: f64) -> Self {
        Self { cols, rows, margin, ..Self::default() }
    }

    fn span(&self) -> f64 {
        100.0 - 2.0 * self.margin
    }
}

fn grid_fraction(index: usize, count: usize) -> f64 {
    if count <= 1 {
        0.5
    } else {
        index as f64 / (count - 1) as f64
    }
}

/// -1, 0 or 1 depending on which side of the centre line `base` sits
fn away_from_centre(base: f64) -> f64 {
    if (base - 50.0).abs() < f64::EPSILON {
        0.0
    } else {
        (base - 50.0).signum()
    }
}

fn validate(nodes: &[SensorNode]) -> Result<(), LayoutError> {
    let mut seen = FxHashSet::default();
    for node in nodes {
        if !node.distance.is_finite() || node.distance < 0.0 {
            return Err(LayoutError::InvalidDistance {
                name: node.name.clone(),
                distance: node.distance,
            });
        }
        if !seen.insert(node.name.as_str()) {
            return Err(LayoutError::DuplicateName(node.name.clone()));
        }
    }
    Ok(())
}

fn renormalize(values: &mut [f64], margin: f64, span: f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    for v in values.iter_mut() {
        *v = if range > 0.0 { margin + (*v - min) / range * span } else { margin + span / 2.0 };
    }
}

/// Compute one display position per node, in input order
pub fn layout<R: Rng + ?Sized>(
    nodes: &[SensorNode],
    params: &LayoutParams,
    rng: &mut R,
) -> Result<Vec<Position>, LayoutError> {
    if params.cols == 0 || params.rows == 0 {
        return Err(LayoutError::EmptyGrid);
    }
    validate(nodes)?;
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let span = params.span();
    let min_d = nodes.iter().map(|n| n.distance).fold(f64::INFINITY, f64::min);
    let max_d = nodes.iter().map(|n| n.distance).fold(f64::NEG_INFINITY, f64::max);
    let range_d = max_d - min_d;

    let mut xs = Vec::with_capacity(nodes.len());
    let mut ys = Vec::with_capacity(nodes.len());

    for (i, node) in nodes.iter().enumerate() {
        let base_x = params.margin + grid_fraction(i % params.cols, params.cols) * span;
        let base_y = params.margin + grid_fraction(i / params.cols, params.rows) * span;

        let norm = if range_d > 0.0 { (node.distance - min_d) / range_d } else { 0.5 };
        let offset_x = (norm - 0.5) * params.bias_x * away_from_centre(base_x);
        let offset_y = (norm - 0.5) * params.bias_y * away_from_centre(base_y);

        let jitter_x = (rng.gen::<f64>() - 0.5) * params.jitter_x;
        let jitter_y = (rng.gen::<f64>() - 0.5) * params.jitter_y;

        xs.push(base_x + jitter_x + offset_x);
        ys.push(base_y + jitter_y + offset_y);
    }

    renormalize(&mut xs, params.margin, span);
    renormalize(&mut ys, params.margin, span);

    Ok(xs.into_iter().zip(ys).map(|(x, y)| Position { x, y }).collect())
}

pub fn relative_distance(a: &SensorNode, b: &SensorNode) -> f64 {
    (a.distance + b.distance) / 2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativeDistance {
    pub name: String,
    pub distance: f64,
}

/// Distances from `selected` to every node, nearest first; the selected node is 0.0
pub fn relative_distances(
    nodes: &[SensorNode],
    selected: &str,
) -> Result<Vec<RelativeDistance>, LayoutError> {
    let anchor = nodes
        .iter()
        .find(|n| n.name == selected)
        .ok_or_else(|| LayoutError::UnknownNode(selected.to_string()))?;

    let mut out: Vec<RelativeDistance> = nodes
        .iter()
        .map(|n| RelativeDistance {
            name: n.name.clone(),
            distance: if n.name == selected { 0.0 } else { relative_distance(anchor, n) },
        })
        .collect();
    out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub active: usize,
    pub inactive: usize,
    pub total_distance: f64,
}

pub fn summarize(nodes: &[SensorNode]) -> FleetSummary {
    nodes.iter().fold(FleetSummary::default(), |mut s, n| {
        match n.status {
            NodeStatus::Active => s.active += 1,
            NodeStatus::Inactive => s.inactive += 1,
        }
        s.total_distance += n.distance;
        s
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedNode {
    #[serde(flatten)]
    pub node: SensorNode,
    pub position: Position,
}

/// A computed layout, kept for the process lifetime so positions stay stable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetLayout {
    pub nodes: Vec<PlacedNode>,
    pub summary: FleetSummary,
}

impl FleetLayout {
    pub fn sensor_nodes(&self) -> Vec<SensorNode> {
        self.nodes.iter().map(|p| p.node.clone()).collect()
    }

    pub fn relative_to(&self, selected: &str) -> Result<Vec<RelativeDistance>, LayoutError> {
        relative_distances(&self.sensor_nodes(), selected)
    }
}

/// Layout with an optional fixed seed
pub struct LayoutEngine {
    params: LayoutParams,
    seed: Option<u64>,
}

impl LayoutEngine {
    pub fn new(params: LayoutParams, seed: Option<u64>) -> Self {
        Self { params, seed }
    }

    pub fn params(&self) -> &LayoutParams {
        &self.params
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            LayoutParams::grid(config.layout_cols(), config.layout_rows(), config.layout_margin()),
            config.layout_seed(),
        )
    }

    pub fn compute(&self, nodes: Vec<SensorNode>) -> Result<FleetLayout, LayoutError> {
        let positions = layout(&nodes, &self.params, &mut self.rng())?;
        let summary = summarize(&nodes);
        let nodes = nodes
            .into_iter()
            .zip(positions)
            .map(|(node, position)| PlacedNode { node, position })
            .collect();
        Ok(FleetLayout { nodes, summary })
    }

    /// Layout for the configured nodes, or a simulated fleet filling the grid
    pub fn compute_for(&self, configured: &[SensorNode]) -> Result<FleetLayout, LayoutError> {
        if !configured.is_empty() {
            return self.compute(configured.to_vec());
        }
        let fleet = simulate_fleet(self.params.cols, self.params.rows, &mut self.rng());
        self.compute(fleet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, distance: f64) -> SensorNode {
        SensorNode::new(name, NodeStatus::Active, distance)
    }

    fn fleet(n: usize) -> Vec<SensorNode> {
        (0..n).map(|i| node(&format!("ESP-{:02}", i + 1), 5.0 + i as f64)).collect()
    }

    fn in_bounds(p: &Position, margin: f64) -> bool {
        let lo = margin - 1e-9;
        let hi = 100.0 - margin + 1e-9;
        (lo..=hi).contains(&p.x) && (lo..=hi).contains(&p.y)
    }

    #[test]
    fn test_positions_within_margins() {
        let params = LayoutParams::default();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let positions = layout(&fleet(50), &params, &mut rng).unwrap();
            assert_eq!(positions.len(), 50);
            assert!(positions.iter().all(|p| in_bounds(p, params.margin)));
        }
    }

    #[test]
    fn test_renormalized_set_spans_area() {
        let params = LayoutParams::default();
        let positions =
            layout(&fleet(50), &params, &mut StdRng::seed_from_u64(7)).unwrap();
        let min_x = positions.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let max_x = positions.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        assert!((min_x - 1.0).abs() < 1e-9);
        assert!((max_x - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_node_is_centred() {
        let positions = layout(
            &[node("solo", 12.0)],
            &LayoutParams::grid(1, 1, 1.0),
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
        assert_eq!(positions, vec![Position { x: 50.0, y: 50.0 }]);
    }

    fn without_jitter(cols: usize, rows: usize) -> LayoutParams {
        LayoutParams { jitter_x: 0.0, jitter_y: 0.0, ..LayoutParams::grid(cols, rows, 1.0) }
    }

    #[test]
    fn test_identical_distances_apply_no_bias() {
        let nodes: Vec<_> = (0..6).map(|i| node(&format!("n{i}"), 10.0)).collect();
        let positions =
            layout(&nodes, &without_jitter(3, 2), &mut StdRng::seed_from_u64(3)).unwrap();

        // Bare grid: columns at 1, 50, 99 and rows at 1, 99
        let expected =
            [(1.0, 1.0), (50.0, 1.0), (99.0, 1.0), (1.0, 99.0), (50.0, 99.0), (99.0, 99.0)];
        for (p, (x, y)) in positions.iter().zip(expected) {
            assert!((p.x - x).abs() < 1e-9 && (p.y - y).abs() < 1e-9, "{p:?} != ({x}, {y})");
        }
    }

    #[test]
    fn test_spread_distances_move_nodes_off_grid() {
        let positions =
            layout(&fleet(6), &without_jitter(3, 2), &mut StdRng::seed_from_u64(3)).unwrap();
        // Centre column has no bias of its own but is shifted by renormalization
        assert!((positions[1].x - 50.0).abs() > 0.1, "{:?}", positions[1]);
    }

    #[test]
    fn test_identical_distances_with_jitter_stay_finite() {
        let nodes: Vec<_> = (0..6).map(|i| node(&format!("n{i}"), 10.0)).collect();
        let positions =
            layout(&nodes, &LayoutParams::default(), &mut StdRng::seed_from_u64(3)).unwrap();
        assert!(positions.iter().all(|p| p.x.is_finite() && p.y.is_finite()));
    }

    #[test]
    fn test_same_seed_same_layout() {
        let params = LayoutParams::default();
        let a = layout(&fleet(12), &params, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = layout(&fleet(12), &params, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_inputs() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            layout(&fleet(2), &LayoutParams::grid(0, 3, 1.0), &mut rng),
            Err(LayoutError::EmptyGrid)
        );
        assert!(matches!(
            layout(&[node("a", -1.0)], &LayoutParams::default(), &mut rng),
            Err(LayoutError::InvalidDistance { .. })
        ));
        assert!(matches!(
            layout(&[node("a", f64::NAN)], &LayoutParams::default(), &mut rng),
            Err(LayoutError::InvalidDistance { .. })
        ));
        assert_eq!(
            layout(&[node("a", 1.0), node("a", 2.0)], &LayoutParams::default(), &mut rng),
            Err(LayoutError::DuplicateName("a".to_string()))
        );
        assert_eq!(layout(&[], &LayoutParams::default(), &mut rng), Ok(Vec::new()));
    }

    #[test]
    fn test_relative_distance_is_mean_of_ranges() {
        assert_eq!(relative_distance(&node("a", 10.0), &node("b", 20.0)), 15.0);
    }

    #[test]
    fn test_relative_distances_sorted_with_selected_first() {
        let nodes = vec![node("a", 10.0), node("b", 30.0), node("c", 6.0)];
        let out = relative_distances(&nodes, "a").unwrap();
        let names: Vec<_> = out.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
        assert_eq!(out[0].distance, 0.0);
        assert_eq!(out[1].distance, 8.0);
        assert_eq!(out[2].distance, 20.0);

        assert_eq!(
            relative_distances(&nodes, "zz"),
            Err(LayoutError::UnknownNode("zz".to_string()))
        );
    }

    #[test]
    fn test_summary_counts() {
        let nodes = vec![
            node("a", 10.0),
            SensorNode::new("b", NodeStatus::Inactive, 5.5),
            node("c", 4.5),
        ];
        assert_eq!(
            summarize(&nodes),
            FleetSummary { active: 2, inactive: 1, total_distance: 20.0 }
        );
    }

    #[test]
    fn test_engine_with_seed_is_stable() {
        let engine = LayoutEngine::new(LayoutParams::default(), Some(9));
        let a = engine.compute(fleet(8)).unwrap();
        let b = engine.compute(fleet(8)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.summary.active, 8);
        assert_eq!(a.relative_to("ESP-01").unwrap()[0].name, "ESP-01");
    }

    #[test]
    fn test_engine_from_config_uses_seed() {
        let config = Config::default().with_layout_seed(5);
        let engine = LayoutEngine::from_config(&config);
        assert_eq!(engine.params().cols, config.layout_cols());

        let a = engine.compute_for(&[]).unwrap();
        let b = LayoutEngine::from_config(&config).compute_for(&[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_configuration_uses_simulated_fleet() {
        let engine = LayoutEngine::new(LayoutParams::grid(5, 2, 1.0), Some(3));
        let fleet = engine.compute_for(&[]).unwrap();
        assert_eq!(fleet.nodes.len(), 10);
        assert_eq!(fleet.summary.active + fleet.summary.inactive, 10);

        let configured = engine.compute_for(&[node("only", 4.0)]).unwrap();
        assert_eq!(configured.nodes.len(), 1);
    }
}
