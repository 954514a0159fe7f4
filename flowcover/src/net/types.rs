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

//! Module containing all type definitions of the network model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use thiserror::Error;

/// Switch identification (positive integer, assigned by the topology collaborator)
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SwitchId(pub u32);

/// Flow identification. The flow id doubles as the cookie value of the flow's counting rule.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowId(pub u32);

/// Egress port number on a switch
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortId(pub u32);

/// Tag embedded in an installed rule and echoed in counter replies, used to attribute a reply to
/// the flow it counts.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cookie(pub u64);

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<FlowId> for Cookie {
    fn from(flow: FlowId) -> Self {
        Cookie(flow.0 as u64)
    }
}

/// Prefix of the address block from which host addresses are allocated.
const HOST_ADDR_PREFIX: [u16; 6] = [0xfd00, 0x0b16, 0, 0, 0, 0];

/// Address of the host attached to a switch. The address encodes the host id in the last segment
/// of a fixed `/112` block, so the controller can derive the traffic descriptor of a flow from
/// its ingress and egress switch without any address discovery.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HostAddr(pub Ipv6Addr);

impl HostAddr {
    /// Derive the address of the host attached to the given switch. Host ids above 65535 are not
    /// addressable.
    pub fn from_switch(switch: SwitchId) -> Result<Self, NetError> {
        if switch.0 > u16::MAX as u32 {
            return Err(NetError::HostAddrRange(switch.0));
        }
        let p = HOST_ADDR_PREFIX;
        Ok(HostAddr(Ipv6Addr::new(p[0], p[1], p[2], p[3], p[4], p[5], 0, switch.0 as u16)))
    }

    /// Recover the switch id encoded in a host address.
    pub fn switch(&self) -> Result<SwitchId, NetError> {
        let seg = self.0.segments();
        if seg[..6] != HOST_ADDR_PREFIX || seg[6] != 0 {
            return Err(NetError::NotAHostAddr(self.0));
        }
        Ok(SwitchId(seg[7] as u32))
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Topology and flow model error
#[derive(Error, Debug, PartialEq)]
pub enum NetError {
    /// The switch is not part of the topology
    #[error("switch {0} is not part of the topology")]
    UnknownSwitch(SwitchId),
    /// The switch was already added to the topology
    #[error("switch {0} was already added")]
    DuplicateSwitch(SwitchId),
    /// The link was already added to the topology (in either direction)
    #[error("link {0} -- {1} was already added")]
    DuplicateLink(SwitchId, SwitchId),
    /// A link must connect two distinct switches
    #[error("switch {0} cannot be linked to itself")]
    SelfLink(SwitchId),
    /// The port is already assigned to another link or to the host on this switch
    #[error("port {1} on switch {0} is already assigned")]
    PortInUse(SwitchId, PortId),
    /// No host-facing port is known for the switch
    #[error("switch {0} has no host-facing port")]
    MissingHostPort(SwitchId),
    /// No egress port is known for the link
    #[error("no egress port from switch {0} toward switch {1}")]
    MissingLinkPort(SwitchId, SwitchId),
    /// Two consecutive switches of a flow path are not adjacent
    #[error("path step {0} -> {1} is not a link in the topology")]
    NotAdjacent(SwitchId, SwitchId),
    /// A flow path must contain at least two switches
    #[error("a flow path needs at least two switches")]
    PathTooShort,
    /// A flow path must not visit the same switch twice
    #[error("path visits switch {0} twice")]
    RepeatedSwitch(SwitchId),
    /// The host id is too large to be encoded in a host address
    #[error("host id {0} exceeds the addressable range (max 65535)")]
    HostAddrRange(u32),
    /// The address does not belong to the host address block
    #[error("address {0} does not encode a host id")]
    NotAHostAddr(Ipv6Addr),
}
