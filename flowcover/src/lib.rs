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

#![deny(missing_docs)]

//! # FlowCover: Flow-Level Traffic Accounting with Minimal Switch Polling
//!
//! This is a library for installing forwarding state for a set of end-to-end flows across a
//! switch topology, and for recovering every flow's traffic volume without polling every switch.
//! Instead of querying per-flow counters on each switch a flow traverses, the library computes a
//! minimal-cost subset of switches whose counters suffice to account for all flows, programs a
//! distinguishable counting rule for each monitored flow at exactly one switch, and drives a
//! periodic polling loop until the observed counters converge.
//!
//! ## Structure
//!
//! This library is structured in the following way:
//!
//! - **[`net`]**: The topology and flow model. The main structure is [`Topology`](net::Topology),
//!   an immutable, undirected switch graph annotated with link egress ports and host-facing
//!   ports. Flows are ordered switch paths stored in a [`FlowTable`](net::FlowTable), and the
//!   [`SwitchFlowIndex`](net::SwitchFlowIndex) is the derived reverse map from a switch to the
//!   flows traversing it.
//!
//! - **[`flowgen`]**: Randomized generation of distinct, non-trivial flow paths over a topology,
//!   with an explicit feasibility pre-check against the number of simple paths the topology can
//!   support.
//!
//! - **[`cover`]**: The monitor-placement solver. Given the switch-flow index, it selects the
//!   switches to poll and the flows each selected switch is responsible for, minimizing the
//!   estimated query cost with a greedy, ratio-driven weighted set cover and a randomized
//!   single-flow fallback. The result is a [`PollingPlan`](cover::PollingPlan).
//!
//! - **[`controller`]**: The protocol-driven controller state machine. It consumes the flow set
//!   and the polling plan, installs forwarding and counting rules on every switch-session event,
//!   runs the polling loop against the monitor switches, aggregates counter replies, detects
//!   convergence, and triggers orderly shutdown. The switch control protocol itself is abstract:
//!   the controller talks to a [`SwitchControl`](controller::SwitchControl) transport and a
//!   [`TrafficHarness`](controller::TrafficHarness) collaborator supplied by the caller.
//!
//! ## Usage
//!
//! Setup flows one direction: topology, then flows, then the index, then the cover. Afterwards,
//! the controller runs cyclically until the counters stop changing.
//!
//! ```
//! use flowcover::cover::{self, CostModel};
//! use flowcover::flowgen;
//! use flowcover::net::{PortId, SwitchFlowIndex, SwitchId, Topology};
//! use flowcover::Error;
//! use rand::thread_rng;
//!
//! fn main() -> Result<(), Error> {
//!     let mut topo = Topology::new();
//!     topo.add_switch(SwitchId(1), PortId(1))?;
//!     topo.add_switch(SwitchId(2), PortId(1))?;
//!     topo.add_switch(SwitchId(3), PortId(1))?;
//!     topo.add_link(SwitchId(1), SwitchId(2), PortId(2), PortId(2))?;
//!     topo.add_link(SwitchId(2), SwitchId(3), PortId(3), PortId(2))?;
//!
//!     let mut rng = thread_rng();
//!     let flows = flowgen::generate_flows(&topo, 4, &mut rng)?;
//!     let index = SwitchFlowIndex::build(&flows);
//!     let flow_ids: Vec<_> = flows.keys().copied().collect();
//!     let plan = cover::solve(&flow_ids, &index, &CostModel::default(), &mut rng)?;
//!
//!     // every flow is accounted for by exactly one switch
//!     assert_eq!(plan.num_flows(), flows.len());
//!     Ok(())
//! }
//! ```

// test modules
mod test;

pub mod controller;
pub mod cover;
mod error;
pub mod flowgen;
pub mod net;

pub use error::Error;

use std::sync::{Arc, RwLock};

/// Stopper, to check when to stop, or to send the stop command
#[derive(Clone, Debug)]
pub struct Stopper {
    b: Arc<RwLock<bool>>,
}

impl Default for Stopper {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopper {
    /// Create a new stopper
    pub fn new() -> Self {
        Self { b: Arc::new(RwLock::new(false)) }
    }

    /// Send the stop command. This function will block until the write lock can be acquired.
    pub fn send_stop(&self) {
        *self.b.write().unwrap() = true;
    }

    /// Checks if the stop flag is set. This function will block until the read lock can be
    /// acquired.
    pub fn is_stop(&self) -> bool {
        *self.b.read().unwrap()
    }
}
