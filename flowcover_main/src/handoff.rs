// FlowCover: Flow-Level Traffic Accounting with Minimal Switch Polling
// Copyright (C) 2022  FlowCover Developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! The topology handoff file written by the simulator before the controller starts: switch ids
//! with their host-facing ports, links with the egress port of each direction, and the
//! simulator's process id for the start/stop signals.

use flowcover::net::{NetError, PortId, SwitchId, Topology};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// The parsed handoff file
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyHandoff {
    /// Process id of the simulator, target of the start/stop signals
    pub simulator_pid: i32,
    /// All switches with their host-facing ports
    pub switches: Vec<SwitchEntry>,
    /// All links with the egress port of each direction
    pub links: Vec<LinkEntry>,
}

/// One switch of the handoff
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SwitchEntry {
    /// Switch id
    pub id: SwitchId,
    /// Port facing the attached host
    pub host_port: PortId,
}

/// One link of the handoff
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LinkEntry {
    /// First endpoint
    pub a: SwitchId,
    /// Second endpoint
    pub b: SwitchId,
    /// Egress port of `a` toward `b`
    pub port_a: PortId,
    /// Egress port of `b` toward `a`
    pub port_b: PortId,
}

/// Load and parse the handoff file.
pub fn load(path: &Path) -> Result<TopologyHandoff, flowcover::Error> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

impl TopologyHandoff {
    /// Materialize the topology, enforcing the model's construction invariants.
    pub fn build_topology(&self) -> Result<Topology, NetError> {
        let mut topo = Topology::new();
        for switch in &self.switches {
            topo.add_switch(switch.id, switch.host_port)?;
        }
        for link in &self.links {
            topo.add_link(link.a, link.b, link.port_a, link.port_b)?;
        }
        Ok(topo)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use flowcover::net::{PortId, SwitchId};

    #[test]
    fn test_parse_and_build() {
        let raw = r#"{
            "simulator_pid": 4321,
            "switches": [
                {"id": 1, "host_port": 1},
                {"id": 2, "host_port": 1}
            ],
            "links": [
                {"a": 1, "b": 2, "port_a": 2, "port_b": 2}
            ]
        }"#;
        let handoff: TopologyHandoff = serde_json::from_str(raw).unwrap();
        assert_eq!(handoff.simulator_pid, 4321);

        let topo = handoff.build_topology().unwrap();
        assert_eq!(topo.num_switches(), 2);
        assert!(topo.adjacent(SwitchId(1), SwitchId(2)));
        assert_eq!(topo.link_port(SwitchId(2), SwitchId(1)), Ok(PortId(2)));
        assert_eq!(topo.host_port(SwitchId(1)), Ok(PortId(1)));
    }

    #[test]
    fn test_invalid_handoff_is_rejected() {
        let raw = r#"{
            "simulator_pid": 1,
            "switches": [{"id": 1, "host_port": 1}],
            "links": [{"a": 1, "b": 1, "port_a": 2, "port_b": 3}]
        }"#;
        let handoff: TopologyHandoff = serde_json::from_str(raw).unwrap();
        assert!(handoff.build_topology().is_err());
    }
}
