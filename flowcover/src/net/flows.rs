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

//! Flow paths and the derived switch-flow index

use crate::net::topology::Topology;
use crate::net::types::{FlowId, NetError, SwitchId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Ordered switch path of a flow, from the ingress switch to the egress switch
pub type FlowPath = Vec<SwitchId>;

/// The full flow set of a run: flow id to switch path. Generated once, immutable afterwards.
pub type FlowTable = BTreeMap<FlowId, FlowPath>;

/// Check that a path is a valid flow path in the topology: at least two switches, no switch
/// visited twice, and every step along an existing link.
pub fn validate_path(topo: &Topology, path: &[SwitchId]) -> Result<(), NetError> {
    if path.len() < 2 {
        return Err(NetError::PathTooShort);
    }
    let mut seen: HashSet<SwitchId> = HashSet::new();
    for switch in path {
        if !topo.contains(*switch) {
            return Err(NetError::UnknownSwitch(*switch));
        }
        if !seen.insert(*switch) {
            return Err(NetError::RepeatedSwitch(*switch));
        }
    }
    for step in path.windows(2) {
        if !topo.adjacent(step[0], step[1]) {
            return Err(NetError::NotAdjacent(step[0], step[1]));
        }
    }
    Ok(())
}

/// # Switch-flow index
///
/// Reverse map from a switch to the set of flows whose path traverses it, built once by
/// inverting the [`FlowTable`] and never mutated afterwards. A switch without any traversing
/// flow simply has no entry; [`flows_at`](SwitchFlowIndex::flows_at) treats a missing key as an
/// empty set, not as an error.
#[derive(Debug, Clone, Default)]
pub struct SwitchFlowIndex {
    map: HashMap<SwitchId, BTreeSet<FlowId>>,
    empty: BTreeSet<FlowId>,
}

impl SwitchFlowIndex {
    /// Build the index from a flow table.
    pub fn build(flows: &FlowTable) -> Self {
        let mut map: HashMap<SwitchId, BTreeSet<FlowId>> = HashMap::new();
        for (flow, path) in flows {
            for switch in path {
                map.entry(*switch).or_default().insert(*flow);
            }
        }
        Self { map, empty: BTreeSet::new() }
    }

    /// Assemble an index from an externally supplied incidence. Useful when the incidence comes
    /// from somewhere other than a [`FlowTable`], e.g. a recorded run.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (SwitchId, BTreeSet<FlowId>)>,
    {
        Self { map: entries.into_iter().collect(), empty: BTreeSet::new() }
    }

    /// The flows traversing the given switch. Missing switches map to the empty set.
    pub fn flows_at(&self, switch: SwitchId) -> &BTreeSet<FlowId> {
        self.map.get(&switch).unwrap_or(&self.empty)
    }

    /// Iterator over all switches with at least one traversing flow, and their flow sets.
    pub fn iter(&self) -> impl Iterator<Item = (SwitchId, &BTreeSet<FlowId>)> {
        self.map.iter().map(|(s, f)| (*s, f))
    }

    /// Number of switches with at least one traversing flow
    pub fn num_switches(&self) -> usize {
        self.map.len()
    }
}
