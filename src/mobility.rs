//! Mobility assignment
//!
//! Fixed, grid-allocated and constant-velocity positions. A node's model
//! kind is fixed once installed; only a velocity model's numeric state moves,
//! and only through course changes applied by the engine during the run.

use crate::node::{NodeId, NodeRegistry, NodeSet};
use crate::time::SimTime;
use scenarios::{GridLayout, GridSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MobilityError {
    #[error("Invalid mobility configuration: {0}")]
    InvalidConfig(String),

    #[error("Node {node} already uses {existing:?} mobility, cannot switch to {requested:?}")]
    KindLocked {
        node: NodeId,
        existing: MobilityKind,
        requested: MobilityKind,
    },

    #[error("Node {0} has no constant-velocity model")]
    NotMoving(NodeId),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),
}

/// Point or vector in metres (or metres per second)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    fn advanced(self, velocity: Vector, secs: f64) -> Vector {
        Vector {
            x: self.x + velocity.x * secs,
            y: self.y + velocity.y * secs,
            z: self.z + velocity.z * secs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MobilityKind {
    ConstantPosition,
    ConstantVelocity,
}

/// Spatial state of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MobilityState {
    pub kind: MobilityKind,
    /// Position at `anchor`
    pub position: Vector,
    pub velocity: Vector,
    pub anchor: SimTime,
}

impl MobilityState {
    pub fn position_at(&self, at: SimTime) -> Vector {
        match self.kind {
            MobilityKind::ConstantPosition => self.position,
            MobilityKind::ConstantVelocity => {
                let elapsed = at.since(self.anchor).unwrap_or(0);
                self.position
                    .advanced(self.velocity, elapsed as f64 / 1_000_000_000.0)
            }
        }
    }

    /// Re-anchor at `at` with a new velocity
    pub fn change_velocity(&mut self, at: SimTime, velocity: Vector) {
        self.position = self.position_at(at);
        self.anchor = at;
        self.velocity = velocity;
    }
}

/// Velocity change applied at a scheduled time during the run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseChange {
    pub node: NodeId,
    pub at: SimTime,
    pub velocity: Vector,
}

/// Grid allocator position of the `i`th node
pub fn grid_position(spec: &GridSpec, i: usize) -> Vector {
    let w = spec.width.max(1) as usize;
    let (col, row) = (i % w, i / w);
    match spec.layout {
        GridLayout::RowFirst => Vector::new(
            spec.min_x + col as f64 * spec.delta_x,
            spec.min_y + row as f64 * spec.delta_y,
            0.0,
        ),
        GridLayout::ColumnFirst => Vector::new(
            spec.min_x + row as f64 * spec.delta_x,
            spec.min_y + col as f64 * spec.delta_y,
            0.0,
        ),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MobilityAssigner {
    states: BTreeMap<NodeId, MobilityState>,
    course_changes: Vec<CourseChange>,
}

impl MobilityAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position(
        &mut self,
        registry: &NodeRegistry,
        node: NodeId,
        position: Vector,
    ) -> Result<(), MobilityError> {
        if !position.is_finite() {
            return Err(MobilityError::InvalidConfig(format!(
                "position of {} is not finite",
                node
            )));
        }
        self.install(registry, node, MobilityKind::ConstantPosition, position, Vector::default())
    }

    /// Fixed positions from a grid allocator, in set order
    pub fn set_grid_positions(
        &mut self,
        registry: &NodeRegistry,
        nodes: &NodeSet,
        spec: &GridSpec,
    ) -> Result<Vec<Vector>, MobilityError> {
        if spec.width == 0 {
            return Err(MobilityError::InvalidConfig(
                "grid width must be positive".to_string(),
            ));
        }
        if spec.delta_x < 0.0 || spec.delta_y < 0.0 {
            return Err(MobilityError::InvalidConfig(format!(
                "grid deltas must be non-negative, got ({}, {})",
                spec.delta_x, spec.delta_y
            )));
        }
        if !(spec.min_x.is_finite()
            && spec.min_y.is_finite()
            && spec.delta_x.is_finite()
            && spec.delta_y.is_finite())
        {
            return Err(MobilityError::InvalidConfig(
                "grid parameters must be finite".to_string(),
            ));
        }
        for node in nodes.iter() {
            self.check_kind(registry, node, MobilityKind::ConstantPosition)?;
        }

        let positions: Vec<Vector> = (0..nodes.len()).map(|i| grid_position(spec, i)).collect();
        for (node, position) in nodes.iter().zip(&positions) {
            self.install(
                registry,
                node,
                MobilityKind::ConstantPosition,
                *position,
                Vector::default(),
            )?;
        }
        Ok(positions)
    }

    pub fn set_velocity(
        &mut self,
        registry: &NodeRegistry,
        node: NodeId,
        initial: Vector,
        velocity: Vector,
    ) -> Result<(), MobilityError> {
        if !initial.is_finite() || !velocity.is_finite() {
            return Err(MobilityError::InvalidConfig(format!(
                "velocity model of {} is not finite",
                node
            )));
        }
        self.install(registry, node, MobilityKind::ConstantVelocity, initial, velocity)
    }

    /// Register a velocity change the engine applies at `at`
    pub fn schedule_course_change(
        &mut self,
        node: NodeId,
        at: SimTime,
        velocity: Vector,
    ) -> Result<(), MobilityError> {
        match self.states.get(&node) {
            Some(state) if state.kind == MobilityKind::ConstantVelocity => {}
            _ => return Err(MobilityError::NotMoving(node)),
        }
        if !velocity.is_finite() {
            return Err(MobilityError::InvalidConfig(format!(
                "course change of {} is not finite",
                node
            )));
        }
        self.course_changes.push(CourseChange { node, at, velocity });
        Ok(())
    }

    /// Re-anchor the node's velocity model; called by the run phase only
    pub(crate) fn apply_course_change(&mut self, change: &CourseChange) -> Result<(), MobilityError> {
        match self.states.get_mut(&change.node) {
            Some(state) if state.kind == MobilityKind::ConstantVelocity => {
                state.change_velocity(change.at, change.velocity);
                Ok(())
            }
            _ => Err(MobilityError::NotMoving(change.node)),
        }
    }

    fn check_kind(
        &self,
        registry: &NodeRegistry,
        node: NodeId,
        requested: MobilityKind,
    ) -> Result<(), MobilityError> {
        if !registry.contains(node) {
            return Err(MobilityError::UnknownNode(node));
        }
        match self.states.get(&node) {
            Some(state) if state.kind != requested => Err(MobilityError::KindLocked {
                node,
                existing: state.kind,
                requested,
            }),
            _ => Ok(()),
        }
    }

    fn install(
        &mut self,
        registry: &NodeRegistry,
        node: NodeId,
        kind: MobilityKind,
        position: Vector,
        velocity: Vector,
    ) -> Result<(), MobilityError> {
        self.check_kind(registry, node, kind)?;
        debug!(
            "Mobility {:?} on {} at ({}, {}, {})",
            kind, node, position.x, position.y, position.z
        );
        self.states.insert(
            node,
            MobilityState {
                kind,
                position,
                velocity,
                anchor: SimTime::ZERO,
            },
        );
        Ok(())
    }

    pub fn state(&self, node: NodeId) -> Option<&MobilityState> {
        self.states.get(&node)
    }

    pub fn kind(&self, node: NodeId) -> Option<MobilityKind> {
        self.states.get(&node).map(|s| s.kind)
    }

    pub fn position_at(&self, node: NodeId, at: SimTime) -> Option<Vector> {
        self.states.get(&node).map(|s| s.position_at(at))
    }

    pub fn states(&self) -> &BTreeMap<NodeId, MobilityState> {
        &self.states
    }

    pub fn course_changes(&self) -> &[CourseChange] {
        &self.course_changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRole;

    fn nodes(count: usize) -> (NodeRegistry, NodeSet) {
        let mut registry = NodeRegistry::new();
        let set = registry.create(NodeRole::Peer, count);
        (registry, set)
    }

    #[test]
    fn test_row_first_grid() {
        let (registry, set) = nodes(5);
        let mut mobility = MobilityAssigner::new();
        let spec = GridSpec::default(); // dx 5, dy 10, width 3
        let positions = mobility.set_grid_positions(&registry, &set, &spec).unwrap();

        assert_eq!(positions[0], Vector::new(0.0, 0.0, 0.0));
        assert_eq!(positions[2], Vector::new(10.0, 0.0, 0.0));
        assert_eq!(positions[3], Vector::new(0.0, 10.0, 0.0));
        assert_eq!(positions[4], Vector::new(5.0, 10.0, 0.0));
        assert_eq!(
            mobility.kind(set.get(4).unwrap()),
            Some(MobilityKind::ConstantPosition)
        );
    }

    #[test]
    fn test_column_first_grid() {
        let spec = GridSpec {
            layout: GridLayout::ColumnFirst,
            width: 2,
            ..GridSpec::default()
        };
        assert_eq!(grid_position(&spec, 1), Vector::new(0.0, 10.0, 0.0));
        assert_eq!(grid_position(&spec, 2), Vector::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_grid_is_restartable() {
        let (registry, set) = nodes(7);
        let spec = GridSpec {
            min_x: 3.0,
            min_y: -2.0,
            ..GridSpec::default()
        };
        let first = MobilityAssigner::new()
            .set_grid_positions(&registry, &set, &spec)
            .unwrap();
        let second = MobilityAssigner::new()
            .set_grid_positions(&registry, &set, &spec)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_grid_rejected() {
        let (registry, set) = nodes(2);
        let mut mobility = MobilityAssigner::new();
        let zero_width = GridSpec {
            width: 0,
            ..GridSpec::default()
        };
        assert!(matches!(
            mobility.set_grid_positions(&registry, &set, &zero_width),
            Err(MobilityError::InvalidConfig(_))
        ));
        let negative = GridSpec {
            delta_y: -1.0,
            ..GridSpec::default()
        };
        assert!(mobility.set_grid_positions(&registry, &set, &negative).is_err());
        assert!(mobility.states().is_empty());
    }

    #[test]
    fn test_kind_is_immutable() {
        let (registry, set) = nodes(1);
        let node = set.get(0).unwrap();
        let mut mobility = MobilityAssigner::new();
        mobility
            .set_velocity(&registry, node, Vector::new(0.0, 500.0, 0.0), Vector::new(5.0, 0.0, 0.0))
            .unwrap();
        let err = mobility
            .set_position(&registry, node, Vector::new(1.0, 1.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, MobilityError::KindLocked { .. }));

        // Same kind may be re-parameterised
        mobility
            .set_velocity(&registry, node, Vector::new(0.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0))
            .unwrap();
    }

    #[test]
    fn test_constant_velocity_advances() {
        let (registry, set) = nodes(1);
        let node = set.get(0).unwrap();
        let mut mobility = MobilityAssigner::new();
        mobility
            .set_velocity(&registry, node, Vector::new(0.0, 500.0, 0.0), Vector::new(5.0, 0.0, 0.0))
            .unwrap();
        let pos = mobility.position_at(node, SimTime::from_secs(2)).unwrap();
        assert_eq!(pos, Vector::new(10.0, 500.0, 0.0));

        let mut state = mobility.state(node).unwrap().clone();
        state.change_velocity(SimTime::from_secs(2), Vector::new(0.0, 1.0, 0.0));
        assert_eq!(
            state.position_at(SimTime::from_secs(4)),
            Vector::new(10.0, 502.0, 0.0)
        );
    }

    #[test]
    fn test_course_change_needs_velocity_model() {
        let (registry, set) = nodes(1);
        let node = set.get(0).unwrap();
        let mut mobility = MobilityAssigner::new();
        mobility.set_position(&registry, node, Vector::default()).unwrap();
        assert_eq!(
            mobility.schedule_course_change(node, SimTime::from_secs(1), Vector::default()),
            Err(MobilityError::NotMoving(node))
        );
    }
}
