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

//! The immutable switch topology

use crate::net::types::{NetError, PortId, SwitchId};
use petgraph::graphmap::UnGraphMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// # Switch topology
///
/// Undirected graph of switches and bidirectional switch-to-switch links, annotated with the
/// egress port of each link direction and the host-facing port of each switch. The topology is
/// supplied by the external simulator, built once at setup, and read-only afterwards.
///
/// Invariants enforced at construction time:
///
/// - every switch has exactly one host-facing port,
/// - every link direction has exactly one egress port,
/// - no two ports on the same switch carry the same number.
#[derive(Debug, Clone)]
pub struct Topology {
    graph: UnGraphMap<SwitchId, ()>,
    link_ports: HashMap<(SwitchId, SwitchId), PortId>,
    host_ports: HashMap<SwitchId, PortId>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    /// Create an empty topology
    pub fn new() -> Self {
        Self {
            graph: UnGraphMap::new(),
            link_ports: HashMap::new(),
            host_ports: HashMap::new(),
        }
    }

    /// Add a switch together with its host-facing port.
    pub fn add_switch(&mut self, switch: SwitchId, host_port: PortId) -> Result<(), NetError> {
        if self.graph.contains_node(switch) {
            return Err(NetError::DuplicateSwitch(switch));
        }
        self.graph.add_node(switch);
        self.host_ports.insert(switch, host_port);
        Ok(())
    }

    /// Add a bidirectional link between two switches, with the egress port of each direction.
    pub fn add_link(
        &mut self,
        a: SwitchId,
        b: SwitchId,
        port_a: PortId,
        port_b: PortId,
    ) -> Result<(), NetError> {
        if a == b {
            return Err(NetError::SelfLink(a));
        }
        for s in &[a, b] {
            if !self.graph.contains_node(*s) {
                return Err(NetError::UnknownSwitch(*s));
            }
        }
        if self.graph.contains_edge(a, b) {
            return Err(NetError::DuplicateLink(a, b));
        }
        self.check_port_free(a, port_a)?;
        self.check_port_free(b, port_b)?;
        self.graph.add_edge(a, b, ());
        self.link_ports.insert((a, b), port_a);
        self.link_ports.insert((b, a), port_b);
        Ok(())
    }

    fn check_port_free(&self, switch: SwitchId, port: PortId) -> Result<(), NetError> {
        if self.host_ports.get(&switch) == Some(&port) {
            return Err(NetError::PortInUse(switch, port));
        }
        for neighbor in self.graph.neighbors(switch) {
            if self.link_ports.get(&(switch, neighbor)) == Some(&port) {
                return Err(NetError::PortInUse(switch, port));
            }
        }
        Ok(())
    }

    /// Number of switches in the topology
    pub fn num_switches(&self) -> usize {
        self.graph.node_count()
    }

    /// Iterator over all switch ids
    pub fn switches(&self) -> impl Iterator<Item = SwitchId> + '_ {
        self.graph.nodes()
    }

    /// Returns true if the switch is part of the topology
    pub fn contains(&self, switch: SwitchId) -> bool {
        self.graph.contains_node(switch)
    }

    /// Returns true if the two switches are directly linked
    pub fn adjacent(&self, a: SwitchId, b: SwitchId) -> bool {
        self.graph.contains_edge(a, b)
    }

    /// Iterator over the direct neighbors of a switch
    pub fn neighbors(&self, switch: SwitchId) -> impl Iterator<Item = SwitchId> + '_ {
        self.graph.neighbors(switch)
    }

    /// The host-facing port of a switch
    pub fn host_port(&self, switch: SwitchId) -> Result<PortId, NetError> {
        self.host_ports.get(&switch).copied().ok_or(NetError::MissingHostPort(switch))
    }

    /// The egress port of `from` on the link toward the adjacent switch `to`
    pub fn link_port(&self, from: SwitchId, to: SwitchId) -> Result<PortId, NetError> {
        self.link_ports.get(&(from, to)).copied().ok_or(NetError::MissingLinkPort(from, to))
    }

    /// Sizes of the connected components of the topology
    pub fn component_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut seen: HashSet<SwitchId> = HashSet::new();
        for start in self.graph.nodes() {
            if seen.contains(&start) {
                continue;
            }
            // BFS over one component
            let mut size = 0;
            let mut queue = VecDeque::new();
            queue.push_back(start);
            seen.insert(start);
            while let Some(node) = queue.pop_front() {
                size += 1;
                for next in self.graph.neighbors(node) {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            sizes.push(size);
        }
        sizes
    }

    /// Number of distinct ordered simple paths of length >= 2 the topology can support, clamped
    /// to `cap`. Per connected component of size `n`, this counts all ordered permutations of
    /// length 2 to `n`, i.e. the sum over `k` of `n! / (n - k)!`. The computation short-circuits
    /// as soon as the total reaches `cap`, so the caller only learns whether the requested flow
    /// count is feasible, never the (potentially astronomical) exact value.
    pub fn distinct_path_bound(&self, cap: u64) -> u64 {
        let mut total: u128 = 0;
        for n in self.component_sizes() {
            let mut perms: u128 = 1;
            for k in 1..=n {
                perms = perms.saturating_mul((n - k + 1) as u128);
                if k >= 2 {
                    total = total.saturating_add(perms);
                }
                if total >= cap as u128 {
                    return cap;
                }
            }
        }
        total as u64
    }
}
