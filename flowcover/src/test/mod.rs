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

#[cfg(test)]
mod test_controller;
#[cfg(test)]
mod test_flowgen;

#[cfg(test)]
mod fixtures {
    use crate::net::{PortId, SwitchId, Topology};

    /// Linear topology of `n` switches:
    ///
    /// ```text
    /// 1 -- 2 -- 3 -- ... -- n
    /// ```
    ///
    /// Every switch has host port 1, port 2 toward its lower neighbor and port 3 toward its
    /// higher neighbor.
    pub fn linear_topo(n: u32) -> Topology {
        let mut topo = Topology::new();
        for i in 1..=n {
            topo.add_switch(SwitchId(i), PortId(1)).unwrap();
        }
        for i in 1..n {
            topo.add_link(SwitchId(i), SwitchId(i + 1), PortId(3), PortId(2)).unwrap();
        }
        topo
    }
}
