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

//! # Monitor-placement solver
//!
//! Selects the subset of switches to poll, and the flows each selected switch is responsible
//! for, such that every flow is covered at minimal total estimated query cost. This is a greedy
//! weighted set cover: at every step the solver considers the switch with the best **ratio** of
//! query cost to newly covered flows. Entries live in a priority structure with lazy deletion:
//! whenever a pick covers flows that another switch shares, that switch's entry becomes stale
//! and is recomputed on demand (remove-and-reinsert) instead of rebuilding the whole structure
//! on every iteration.
//!
//! Two details keep the greedy pass honest:
//!
//! - a ratio that was true when an entry was pushed may be stale when the entry is popped, so
//!   the actual newly-covered intersection with the live uncovered set is recomputed at
//!   selection time, never trusted from the entry;
//! - when no switch is worth its cost compared to covering a single flow by itself (the
//!   baseline one-flow ratio), the solver assigns one uniformly random uncovered flow to one
//!   uniformly random switch among *all* of its covering switches. This loose, unweighted
//!   fallback is a deliberate property of the cost-approximation behavior and guarantees
//!   termination.

use crate::net::{FlowId, SwitchFlowIndex, SwitchId};
use crate::Error;

use log::*;
use rand::prelude::*;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

/// Estimated cost of one counter query against a switch: a fixed base cost plus a marginal cost
/// per assigned flow. The concrete constants are a tunable policy, not part of the algorithm's
/// correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostModel {
    /// Fixed cost of querying a switch at all
    pub base: u64,
    /// Marginal cost per flow queried at the switch
    pub per_flow: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self { base: 122, per_flow: 78 }
    }
}

impl CostModel {
    /// Cost of querying a switch that carries `num_flows` assigned flows
    pub fn switch_cost(&self, num_flows: usize) -> u64 {
        self.base + self.per_flow * num_flows as u64
    }
}

/// # Polling plan
///
/// Assignment of flows to the switches responsible for reporting their counters. By
/// construction, the value-sets are pairwise disjoint across switches and their union equals the
/// input flow set: every flow is polled at exactly one switch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollingPlan {
    assignments: BTreeMap<SwitchId, BTreeSet<FlowId>>,
}

impl PollingPlan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn assign(&mut self, switch: SwitchId, flow: FlowId) {
        self.assignments.entry(switch).or_default().insert(flow);
    }

    pub(crate) fn assign_all<I>(&mut self, switch: SwitchId, flows: I)
    where
        I: IntoIterator<Item = FlowId>,
    {
        self.assignments.entry(switch).or_default().extend(flows);
    }

    /// The flows the given switch is responsible for, if it is a monitor switch at all
    pub fn flows_at(&self, switch: SwitchId) -> Option<&BTreeSet<FlowId>> {
        self.assignments.get(&switch)
    }

    /// Returns true if the given switch is responsible for reporting the given flow
    pub fn monitors_flow(&self, switch: SwitchId, flow: FlowId) -> bool {
        self.assignments.get(&switch).map(|f| f.contains(&flow)).unwrap_or(false)
    }

    /// The switch responsible for the given flow, if any
    pub fn assignment(&self, flow: FlowId) -> Option<SwitchId> {
        self.assignments.iter().find(|(_, flows)| flows.contains(&flow)).map(|(s, _)| *s)
    }

    /// Iterator over all monitor switches and their assigned flows
    pub fn iter(&self) -> impl Iterator<Item = (SwitchId, &BTreeSet<FlowId>)> {
        self.assignments.iter().map(|(s, f)| (*s, f))
    }

    /// Number of switches that will be polled
    pub fn num_switches(&self) -> usize {
        self.assignments.len()
    }

    /// Total number of assigned flows
    pub fn num_flows(&self) -> usize {
        self.assignments.values().map(|f| f.len()).sum()
    }

    /// Returns true if no switch is polled at all
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Total estimated query cost of one polling cycle under the given cost model
    pub fn total_cost(&self, cost: &CostModel) -> u64 {
        self.assignments.values().map(|f| cost.switch_cost(f.len())).sum()
    }
}

/// Candidate entry of the priority structure: querying `switch` costs `cost` and would cover
/// `coverable` currently uncovered flows. `stamp` is the switch's generation at push time;
/// entries whose stamp no longer matches are stale and discarded on pop (lazy deletion).
///
/// Ordering is ascending by ratio `cost / coverable`, compared exactly by cross-multiplication
/// so the heap never holds floats. Ties break on the switch id to keep the order total.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: u64,
    coverable: usize,
    switch: SwitchId,
    stamp: u64,
}

impl Candidate {
    /// True if this candidate's ratio is better than or equal to covering `baseline` cost worth
    /// of a single flow.
    fn beats_baseline(&self, baseline: u64) -> bool {
        self.cost as u128 <= baseline as u128 * self.coverable as u128
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.cost as u128 * other.coverable as u128;
        let rhs = other.cost as u128 * self.coverable as u128;
        lhs.cmp(&rhs).then_with(|| self.switch.cmp(&other.switch))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Solve the monitor placement for the given flow set.
///
/// `flows` is the set of flow ids to cover, and `index` the switch-flow incidence restricted to
/// (at least) those flows. Fails with [`Error::UncoverableFlow`] before any work if some flow
/// has no covering switch at all. An empty flow set yields an empty plan immediately.
pub fn solve<R: Rng>(
    flows: &[FlowId],
    index: &SwitchFlowIndex,
    cost: &CostModel,
    rng: &mut R,
) -> Result<PollingPlan, Error> {
    let mut plan = PollingPlan::new();
    let mut uncovered: BTreeSet<FlowId> = flows.iter().copied().collect();
    if uncovered.is_empty() {
        return Ok(plan);
    }

    // restrict the index to the requested flows; switches with no relevant flow drop out
    let mut switch_flows: HashMap<SwitchId, BTreeSet<FlowId>> = HashMap::new();
    let mut covering: HashMap<FlowId, Vec<SwitchId>> = HashMap::new();
    for (switch, flow_set) in index.iter() {
        let relevant: BTreeSet<FlowId> =
            flow_set.iter().filter(|f| uncovered.contains(f)).copied().collect();
        if relevant.is_empty() {
            continue;
        }
        for flow in &relevant {
            covering.entry(*flow).or_default().push(switch);
        }
        switch_flows.insert(switch, relevant);
    }
    for switches in covering.values_mut() {
        switches.sort_unstable();
    }

    // every flow must be coverable at all, otherwise the cover can never complete
    for flow in &uncovered {
        if !covering.contains_key(flow) {
            return Err(Error::UncoverableFlow(*flow));
        }
    }

    // the switch cost is fixed at its full relevant flow set and never shrinks during the run
    let switch_cost: HashMap<SwitchId, u64> =
        switch_flows.iter().map(|(s, f)| (*s, cost.switch_cost(f.len()))).collect();

    // cost of covering a single flow by itself, without any sharing
    let baseline = cost.switch_cost(1);

    let mut stamps: HashMap<SwitchId, u64> = HashMap::new();
    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
    for (switch, flow_set) in &switch_flows {
        heap.push(Reverse(Candidate {
            cost: switch_cost[switch],
            coverable: flow_set.len(),
            switch: *switch,
            stamp: 0,
        }));
        stamps.insert(*switch, 0);
    }

    while !uncovered.is_empty() {
        // drop stale heads left behind by lazy deletion
        while let Some(Reverse(head)) = heap.peek() {
            if stamps.get(&head.switch) == Some(&head.stamp) {
                break;
            }
            heap.pop();
        }

        let best_is_efficient =
            heap.peek().map(|Reverse(c)| c.beats_baseline(baseline)).unwrap_or(false);

        let touched: Vec<FlowId> = if best_is_efficient {
            let Reverse(picked) = heap.pop().unwrap();
            // the ratio may have been computed against an older uncovered set; what counts is
            // the intersection with the live one
            let newly: Vec<FlowId> = switch_flows[&picked.switch]
                .iter()
                .filter(|f| uncovered.contains(f))
                .copied()
                .collect();
            if newly.is_empty() {
                continue;
            }
            debug!(
                "picked switch {} covering {} flows (cost {})",
                picked.switch,
                newly.len(),
                picked.cost
            );
            for flow in &newly {
                uncovered.remove(flow);
            }
            plan.assign_all(picked.switch, newly.iter().copied());
            newly
        } else {
            // no switch is currently worth its cost; cover one random flow at one random
            // switch among all of its covering switches
            let pos = rng.gen_range(0, uncovered.len());
            let flow = match uncovered.iter().nth(pos) {
                Some(f) => *f,
                None => unreachable!(),
            };
            let candidates = match covering.get(&flow) {
                Some(c) if !c.is_empty() => c,
                _ => return Err(Error::UncoverableFlow(flow)),
            };
            let switch = candidates[rng.gen_range(0, candidates.len())];
            debug!("no efficient switch left, assigning flow {} to switch {}", flow, switch);
            plan.assign(switch, flow);
            uncovered.remove(&flow);
            vec![flow]
        };

        // refresh every switch that shares a just-covered flow: bump its generation (making
        // old entries stale) and reinsert it with its live coverage
        let mut dirty: BTreeSet<SwitchId> = BTreeSet::new();
        for flow in &touched {
            dirty.extend(covering[flow].iter().copied());
        }
        for switch in dirty {
            let stamp = stamps.entry(switch).or_insert(0);
            *stamp += 1;
            let coverable =
                switch_flows[&switch].iter().filter(|f| uncovered.contains(f)).count();
            if coverable > 0 {
                heap.push(Reverse(Candidate {
                    cost: switch_cost[&switch],
                    coverable,
                    switch,
                    stamp: *stamp,
                }));
            }
        }
    }

    info!(
        "monitor placement complete: {} flows at {} switches",
        plan.num_flows(),
        plan.num_switches()
    );
    Ok(plan)
}
