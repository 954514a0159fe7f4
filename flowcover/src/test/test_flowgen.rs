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

//! Test the randomized flow path generator. The output is a set: tests never rely on the order
//! in which paths were produced.

use super::fixtures::linear_topo;
use crate::flowgen::generate_flows;
use crate::net::{validate_path, FlowPath, PortId, SwitchId, Topology};
use crate::Error;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

#[test]
fn test_generates_exactly_m_distinct_valid_paths() {
    let topo = linear_topo(5);
    for seed in 0..5 {
        let mut rng = StdRng::seed_from_u64(seed);
        let flows = generate_flows(&topo, 10, &mut rng).unwrap();
        assert_eq!(flows.len(), 10);
        let mut seen: HashSet<FlowPath> = HashSet::new();
        for path in flows.values() {
            assert_eq!(validate_path(&topo, path), Ok(()));
            assert!(seen.insert(path.clone()), "duplicate path generated: {:?}", path);
        }
    }
}

#[test]
fn test_zero_flows() {
    let topo = linear_topo(3);
    let mut rng = StdRng::seed_from_u64(0);
    let flows = generate_flows(&topo, 0, &mut rng).unwrap();
    assert!(flows.is_empty());
}

#[test]
fn test_exhausts_the_full_bound() {
    // linear 2 supports exactly two paths: 1 -> 2 and 2 -> 1
    let topo = linear_topo(2);
    let mut rng = StdRng::seed_from_u64(1);
    let flows = generate_flows(&topo, 2, &mut rng).unwrap();
    let paths: HashSet<FlowPath> = flows.values().cloned().collect();
    assert_eq!(paths.len(), 2);
    assert!(paths.contains(&vec![SwitchId(1), SwitchId(2)]));
    assert!(paths.contains(&vec![SwitchId(2), SwitchId(1)]));
}

#[test]
fn test_infeasible_fails_fast() {
    let topo = linear_topo(2);
    let mut rng = StdRng::seed_from_u64(0);
    match generate_flows(&topo, 3, &mut rng) {
        Err(Error::Infeasible { requested: 3, bound }) => assert_eq!(bound, 2),
        r => panic!("expected Infeasible, got {:?}", r.map(|f| f.len())),
    }
}

#[test]
fn test_linkless_topology_is_infeasible() {
    let mut topo = Topology::new();
    topo.add_switch(SwitchId(1), PortId(1)).unwrap();
    topo.add_switch(SwitchId(2), PortId(1)).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    assert!(matches!(
        generate_flows(&topo, 1, &mut rng),
        Err(Error::Infeasible { requested: 1, bound: 0 })
    ));
}
