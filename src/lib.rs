//! Heterogeneous multi-access network scenario composer
//!
//! This crate stitches point-to-point, shared-media, wireless-LAN, vehicular
//! and cellular segments into one addressed internetwork, assigns mobility
//! and cellular attachment state, installs traffic applications, and drives
//! them over a virtual-time discrete-event engine.
//!
//! Building happens in one sequential phase through `ScenarioBuilder`; the
//! frozen `Scenario` is then handed to a `SimulationEngine` to run.

pub mod addr;
pub mod cellular;
pub mod engine;
pub mod link;
pub mod mobility;
pub mod network;
pub mod node;
pub mod pcap;
pub mod presets;
pub mod routing;
pub mod scenario;
pub mod time;
pub mod trace;
pub mod traffic;

// Re-export commonly used types
pub use engine::{SimulationEngine, Simulator};
pub use network::{DropReason, NetEvent, Topology};
pub use node::{NodeId, NodeRole, NodeSet};
pub use scenario::{ReachabilityPolicy, Scenario, ScenarioBuilder, ScenarioReport, StrandedNode};
pub use scenarios::{LinkProfile, LinkProfiles, QosClass, ScenarioConfig};
pub use time::SimTime;

use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;
use traffic::AppId;

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Node error: {0}")]
    Node(#[from] node::NodeError),

    #[error("Link fabric error: {0}")]
    Fabric(#[from] link::FabricError),

    #[error("Addressing error: {0}")]
    Addr(#[from] addr::AddrError),

    #[error("Mobility error: {0}")]
    Mobility(#[from] mobility::MobilityError),

    #[error("Cellular error: {0}")]
    Cellular(#[from] cellular::CellularError),

    #[error("Traffic error: {0}")]
    Traffic(#[from] traffic::TrafficError),

    #[error("Output error: {0}")]
    Trace(#[from] trace::TraceError),

    #[error("Engine error: {0}")]
    Engine(#[from] engine::EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] scenarios::ConfigError),

    #[error("{app} cannot reach {destination}: {reason}")]
    Unreachable {
        app: AppId,
        destination: SocketAddrV4,
        reason: DropReason,
    },

    #[error("{node} cannot reach the packet core at {destination}: {reason}")]
    NodeUnreachable {
        node: NodeId,
        destination: Ipv4Addr,
        reason: DropReason,
    },

    #[error("No stop time set")]
    MissingStopTime,

    #[error("Unknown preset '{0}'")]
    UnknownPreset(String),
}

/// Coarse classification of a `ScenarioError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Attachment,
    BearerActivation,
    UnsupportedLinkKind,
    Io,
}

impl ScenarioError {
    pub fn kind(&self) -> ErrorKind {
        use cellular::CellularError as C;
        match self {
            ScenarioError::Fabric(link::FabricError::UnsupportedLinkKind(_))
            | ScenarioError::Cellular(C::Fabric(link::FabricError::UnsupportedLinkKind(_))) => {
                ErrorKind::UnsupportedLinkKind
            }
            ScenarioError::Cellular(e) if e.is_bearer_failure() => ErrorKind::BearerActivation,
            ScenarioError::Cellular(
                C::NotMobileDevice(_)
                | C::UnknownBaseStation(_)
                | C::NotBaseStation(_)
                | C::SegmentMismatch { .. }
                | C::AlreadyAttached { .. }
                | C::NoBackhaul(_)
                | C::AddressBeforeAttach(_),
            ) => ErrorKind::Attachment,
            ScenarioError::Trace(_) | ScenarioError::Config(scenarios::ConfigError::Io { .. }) => {
                ErrorKind::Io
            }
            _ => ErrorKind::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::FabricError;

    #[test]
    fn test_error_kinds() {
        let unsupported: ScenarioError = FabricError::UnsupportedLinkKind("dsl".into()).into();
        assert_eq!(unsupported.kind(), ErrorKind::UnsupportedLinkKind);

        let empty: ScenarioError = FabricError::EmptySegment(link::LinkKind::SharedMedia).into();
        assert_eq!(empty.kind(), ErrorKind::Configuration);

        let bearer: ScenarioError = cellular::CellularError::EmptyBearerSet.into();
        assert_eq!(bearer.kind(), ErrorKind::BearerActivation);

        let core_twice: ScenarioError = cellular::CellularError::PacketCoreExists.into();
        assert_eq!(core_twice.kind(), ErrorKind::Configuration);

        let io: ScenarioError = trace::TraceError::Io {
            path: "/x".into(),
            source: std::io::Error::other("denied"),
        }
        .into();
        assert_eq!(io.kind(), ErrorKind::Io);
    }
}
