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

//! Abstract switch-control protocol
//!
//! The controller does not speak any concrete wire protocol. It programs switches through the
//! [`SwitchControl`] trait ("install rule", "query counters", "send packet") and receives
//! session lifecycle events, packet-ins and counter replies as [`SessionEvent`] values from
//! whatever transport the caller wires up. All types here are plain data and serializable, so a
//! transport can ship them verbatim.

use crate::net::{Cookie, FlowId, HostAddr, PortId, SwitchId};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Priority of the bootstrap rules that make link-layer address resolution work at all
pub const PRIO_BOOTSTRAP: u16 = 1;
/// Priority of the plain forwarding rules installed for every flow along its path
pub const PRIO_FORWARD: u16 = 2;
/// Priority of the counting rule installed at a flow's monitor switch. Higher than
/// [`PRIO_FORWARD`] so monitored traffic hits the distinguishable rule first.
pub const PRIO_COUNT: u16 = 3;

/// Cookie carried by every rule that is not a counting rule. Flow ids are far below this value,
/// so replies for this cookie can never be attributed to a flow.
pub const NOCOUNT_COOKIE: Cookie = Cookie(1_000_000_000);

/// What a rule matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleMatch {
    /// Neighbor-discovery solicitations, which the data plane cannot answer by itself
    NeighborSolicit,
    /// Neighbor-discovery advertisements synthesized by the controller
    NeighborAdvert,
    /// Traffic of one flow, described by its ingress and egress host addresses. The label is
    /// only set on counting rules and makes the flow distinguishable from other flows with the
    /// same address pair.
    FlowTraffic {
        /// Address of the host behind the flow's ingress switch
        src: HostAddr,
        /// Address of the host behind the flow's egress switch
        dst: HostAddr,
        /// Flow label, set only on counting rules
        label: Option<FlowId>,
    },
}

/// What the switch does with a matching packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    /// Punt the packet to the controller
    ToController,
    /// Emit the packet on the given port
    Output(PortId),
}

/// One flow-table rule, as programmed into a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRule {
    /// Match condition
    pub match_on: RuleMatch,
    /// Action applied to matching packets
    pub action: RuleAction,
    /// Rule priority; higher wins
    pub priority: u16,
    /// Tag echoed in counter replies for this rule
    pub cookie: Cookie,
}

/// Payload of a packet punted to, or synthesized by, the controller. Only the narrow
/// neighbor-discovery shim is modelled; everything else stays in the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketPayload {
    /// A host asks for the link-layer address of `target`
    NeighborSolicit {
        /// Address being resolved
        target: HostAddr,
    },
    /// The controller's synthesized answer for `target`
    NeighborAdvert {
        /// Address that was resolved
        target: HostAddr,
    },
}

/// One entry of a counter reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterEntry {
    /// Cookie of the rule the counters belong to
    pub cookie: Cookie,
    /// Cumulative bytes matched by the rule
    pub byte_count: u64,
    /// Cumulative packets matched by the rule
    pub packet_count: u64,
}

/// A switch-session event delivered by the transport. The controller dispatches these through a
/// single `match`, which keeps the state machine's transition table auditable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A switch opened its control session
    Connected(SwitchId),
    /// A switch completed the feature/config exchange and can take rules
    FeaturesReady(SwitchId),
    /// A switch lost its control session
    Disconnected(SwitchId),
    /// A packet was punted to the controller
    PacketIn {
        /// Switch that punted the packet
        switch: SwitchId,
        /// Port the packet arrived on
        port: PortId,
        /// Decoded payload
        payload: PacketPayload,
    },
    /// A counter query was answered
    CounterReply {
        /// Switch that answered
        switch: SwitchId,
        /// Counter entries, one per queried rule
        entries: Vec<CounterEntry>,
    },
}

/// Switch-control transport error
#[derive(Debug, Error)]
pub enum TransportError {
    /// The switch has no open control session
    #[error("switch {0} has no open session")]
    NotConnected(SwitchId),
    /// The message could not be delivered
    #[error("failed to send to switch {0}: {1}")]
    SendFailed(SwitchId, String),
}

/// The "install-rule" / "query-counters" primitives of the switch control protocol. Replies and
/// session events arrive asynchronously as [`SessionEvent`]s; none of these calls block on the
/// switch answering.
pub trait SwitchControl: Send + Sync {
    /// Program a rule into the switch's flow table.
    fn install_rule(&self, switch: SwitchId, rule: FlowRule) -> Result<(), TransportError>;

    /// Request the counters of the rule carrying the given cookie. The reply arrives later as a
    /// [`SessionEvent::CounterReply`].
    fn query_counters(&self, switch: SwitchId, cookie: Cookie) -> Result<(), TransportError>;

    /// Emit a controller-synthesized packet on the given port of the switch.
    fn send_packet(
        &self,
        switch: SwitchId,
        port: PortId,
        payload: PacketPayload,
    ) -> Result<(), TransportError>;
}

/// Interface to the external traffic-generation collaborator: start it once all switches are
/// programmed, observe per-flow completion markers while draining, and stop the whole simulation
/// when the run is over.
pub trait TrafficHarness: Send + Sync {
    /// Signal the collaborator to begin sending test traffic.
    fn start_traffic(&self) -> io::Result<()>;

    /// Returns true once the traffic process of the given flow has signalled completion.
    fn flow_finished(&self, flow: FlowId) -> bool;

    /// Signal the collaborator to tear down the simulation.
    fn stop_simulation(&self) -> io::Result<()>;
}
