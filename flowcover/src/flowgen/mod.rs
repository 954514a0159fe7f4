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

//! # Flow path generator
//!
//! Produces a requested number of distinct, non-trivial flow paths over a topology by repeated
//! randomized walks. Before any randomized work, the requested count is checked against the
//! number of distinct ordered simple paths the topology supports, so an impossible request fails
//! fast instead of looping forever. The walk itself picks a uniformly random start switch,
//! draws a target length, and extends the path one uniformly random unvisited neighbor at a
//! time, stopping early when none remains. A walk is accepted if it is at least two switches
//! long and its exact node sequence has not been produced before.
//!
//! The output carries no ordering guarantee beyond "distinct and non-trivial": callers (and
//! tests) must treat it as a set.

use crate::net::{validate_path, FlowId, FlowPath, FlowTable, SwitchId, Topology};
use crate::Error;

use itertools::Itertools;
use log::*;
use rand::prelude::*;
use std::collections::HashSet;

/// Attempt budget for generating `m` flows. Each attempt is one randomized walk; rejected walks
/// (too short, or a duplicate of an earlier path) consume an attempt. The budget is generous
/// enough that a feasible request exhausting it indicates a severely constrained topology, which
/// is surfaced as [`Error::GenerationStalled`] instead of spinning.
fn attempt_budget(m: usize) -> usize {
    64 * m + 4096
}

/// Generate `m` distinct flow paths over the topology, each of length at least 2.
///
/// Flow ids are assigned 1, 2, ... in acceptance order. Passing `m = 0` returns an empty table
/// without consulting the topology.
pub fn generate_flows<R: Rng>(
    topo: &Topology,
    m: usize,
    rng: &mut R,
) -> Result<FlowTable, Error> {
    let mut flows = FlowTable::new();
    if m == 0 {
        return Ok(flows);
    }

    // feasibility pre-check, before any randomized work
    let bound = topo.distinct_path_bound(m as u64);
    if (m as u64) > bound {
        return Err(Error::Infeasible { requested: m, bound });
    }

    let nodes: Vec<SwitchId> = topo.switches().collect();
    let mut seen: HashSet<FlowPath> = HashSet::new();
    let mut next_id: u32 = 1;

    for _ in 0..attempt_budget(m) {
        if flows.len() == m {
            break;
        }
        let start = nodes[rng.gen_range(0, nodes.len())];
        let path = random_walk(topo, &nodes, start, rng);
        if path.len() < 2 || seen.contains(&path) {
            continue;
        }
        debug_assert!(validate_path(topo, &path).is_ok());
        let flow = FlowId(next_id);
        next_id += 1;
        debug!("flow {} generated: {}", flow, path.iter().join(" -> "));
        seen.insert(path.clone());
        flows.insert(flow, path);
    }

    if flows.len() < m {
        return Err(Error::GenerationStalled { requested: m, generated: flows.len() });
    }
    Ok(flows)
}

/// One randomized walk from `start`: draw a target length uniformly from `1..=|switches|`, then
/// extend the path by a uniformly random unvisited neighbor until the target length is reached
/// or no unvisited neighbor remains.
fn random_walk<R: Rng>(
    topo: &Topology,
    nodes: &[SwitchId],
    start: SwitchId,
    rng: &mut R,
) -> FlowPath {
    let target_len = rng.gen_range(1, nodes.len() + 1);
    let mut path = vec![start];
    let mut visited: HashSet<SwitchId> = HashSet::new();
    visited.insert(start);
    let mut current = start;

    for _ in 1..target_len {
        let candidates: Vec<SwitchId> =
            topo.neighbors(current).filter(|n| !visited.contains(n)).collect();
        if candidates.is_empty() {
            break;
        }
        let next = candidates[rng.gen_range(0, candidates.len())];
        path.push(next);
        visited.insert(next);
        current = next;
    }
    path
}
