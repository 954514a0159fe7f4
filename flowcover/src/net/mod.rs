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

//! # Topology and flow model
//!
//! This module holds the immutable description of the network under control: the switch graph
//! with its port assignments ([`Topology`]), the flow paths ([`FlowTable`]), and the derived
//! switch-to-flows reverse map ([`SwitchFlowIndex`]). Everything here is created once at setup
//! and read-only afterwards.

mod flows;
mod topology;
mod types;

pub use flows::{validate_path, FlowPath, FlowTable, SwitchFlowIndex};
pub use topology::Topology;
pub use types::{Cookie, FlowId, HostAddr, NetError, PortId, SwitchId};
