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

//! Test the controller state machine against a recording transport and harness.
//!
//! The fixture network:
//!
//! ```text
//! 1 -- 2 -- 3      flow 1: 1 -> 2 -> 3, monitored at switch 2
//! ```

use super::fixtures::linear_topo;
use crate::controller::{
    Controller, ControllerConfig, CounterEntry, FlowRule, PacketPayload, RuleAction, RuleMatch,
    SessionEvent, SessionState, SwitchControl, TrafficHarness, TransportError, NOCOUNT_COOKIE,
    PRIO_BOOTSTRAP, PRIO_COUNT, PRIO_FORWARD,
};
use crate::cover::PollingPlan;
use crate::net::{Cookie, FlowId, FlowTable, HostAddr, PortId, SwitchId};

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct MockTransport {
    rules: Arc<Mutex<Vec<(SwitchId, FlowRule)>>>,
    queries: Arc<Mutex<Vec<(SwitchId, Cookie)>>>,
    packets: Arc<Mutex<Vec<(SwitchId, PortId, PacketPayload)>>>,
}

impl MockTransport {
    fn rules_at(&self, switch: SwitchId) -> Vec<FlowRule> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == switch)
            .map(|(_, r)| *r)
            .collect()
    }
}

impl SwitchControl for MockTransport {
    fn install_rule(&self, switch: SwitchId, rule: FlowRule) -> Result<(), TransportError> {
        self.rules.lock().unwrap().push((switch, rule));
        Ok(())
    }

    fn query_counters(&self, switch: SwitchId, cookie: Cookie) -> Result<(), TransportError> {
        self.queries.lock().unwrap().push((switch, cookie));
        Ok(())
    }

    fn send_packet(
        &self,
        switch: SwitchId,
        port: PortId,
        payload: PacketPayload,
    ) -> Result<(), TransportError> {
        self.packets.lock().unwrap().push((switch, port, payload));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct MockHarness {
    started: Arc<Mutex<usize>>,
    stopped: Arc<Mutex<usize>>,
    finished: Arc<Mutex<HashSet<FlowId>>>,
}

impl TrafficHarness for MockHarness {
    fn start_traffic(&self) -> io::Result<()> {
        *self.started.lock().unwrap() += 1;
        Ok(())
    }

    fn flow_finished(&self, flow: FlowId) -> bool {
        self.finished.lock().unwrap().contains(&flow)
    }

    fn stop_simulation(&self) -> io::Result<()> {
        *self.stopped.lock().unwrap() += 1;
        Ok(())
    }
}

fn test_config(name: &str) -> ControllerConfig {
    ControllerConfig {
        poll_interval: Duration::from_millis(1),
        stability_threshold: 10,
        drain_timeout: Duration::from_secs(0),
        drain_check_interval: Duration::from_millis(1),
        stats_path: test_stats_path(name),
    }
}

fn test_stats_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("flowcover_test_{}_{}.json", std::process::id(), name))
}

/// Controller over the fixture network, together with handles on the recording collaborators.
fn fixture(name: &str) -> (Controller<MockTransport, MockHarness>, MockTransport, MockHarness) {
    let topo = linear_topo(3);
    let mut flows = FlowTable::new();
    flows.insert(FlowId(1), vec![SwitchId(1), SwitchId(2), SwitchId(3)]);
    let mut plan = PollingPlan::new();
    plan.assign(SwitchId(2), FlowId(1));
    let transport = MockTransport::default();
    let harness = MockHarness::default();
    let ctl = Controller::new(
        test_config(name),
        topo,
        flows,
        plan,
        transport.clone(),
        harness.clone(),
    );
    (ctl, transport, harness)
}

fn connect_all(ctl: &Controller<MockTransport, MockHarness>) {
    for s in 1..=3 {
        ctl.handle_event(SessionEvent::Connected(SwitchId(s))).unwrap();
        ctl.handle_event(SessionEvent::FeaturesReady(SwitchId(s))).unwrap();
    }
}

#[test]
fn test_rules_installed_on_feature_event() {
    let (ctl, transport, _) = fixture("rules");
    ctl.handle_event(SessionEvent::Connected(SwitchId(1))).unwrap();
    assert_eq!(
        ctl.session(SwitchId(1)).map(|s| s.state),
        Some(SessionState::Connected)
    );
    ctl.handle_event(SessionEvent::FeaturesReady(SwitchId(1))).unwrap();

    let src = HostAddr::from_switch(SwitchId(1)).unwrap();
    let dst = HostAddr::from_switch(SwitchId(3)).unwrap();
    let rules = transport.rules_at(SwitchId(1));
    // bootstrap pair, forward rule, reverse rule -- and no counting rule, since switch 1 is
    // not the flow's monitor
    assert_eq!(rules.len(), 4);
    assert!(rules.contains(&FlowRule {
        match_on: RuleMatch::NeighborSolicit,
        action: RuleAction::ToController,
        priority: PRIO_BOOTSTRAP,
        cookie: NOCOUNT_COOKIE,
    }));
    assert!(rules.contains(&FlowRule {
        match_on: RuleMatch::NeighborAdvert,
        action: RuleAction::Output(PortId(1)),
        priority: PRIO_BOOTSTRAP,
        cookie: NOCOUNT_COOKIE,
    }));
    // forward toward switch 2, reverse toward the local host
    assert!(rules.contains(&FlowRule {
        match_on: RuleMatch::FlowTraffic { src, dst, label: None },
        action: RuleAction::Output(PortId(3)),
        priority: PRIO_FORWARD,
        cookie: NOCOUNT_COOKIE,
    }));
    assert!(rules.contains(&FlowRule {
        match_on: RuleMatch::FlowTraffic { src: dst, dst: src, label: None },
        action: RuleAction::Output(PortId(1)),
        priority: PRIO_FORWARD,
        cookie: NOCOUNT_COOKIE,
    }));
    assert_eq!(
        ctl.session(SwitchId(1)).map(|s| s.state),
        Some(SessionState::RulesInstalled)
    );
}

#[test]
fn test_counting_rule_only_at_monitor() {
    let (ctl, transport, _) = fixture("monitor");
    connect_all(&ctl);

    let src = HostAddr::from_switch(SwitchId(1)).unwrap();
    let dst = HostAddr::from_switch(SwitchId(3)).unwrap();

    // switch 2 carries the counting rule on top of the four base rules
    let rules = transport.rules_at(SwitchId(2));
    assert_eq!(rules.len(), 5);
    assert!(rules.contains(&FlowRule {
        match_on: RuleMatch::FlowTraffic { src, dst, label: Some(FlowId(1)) },
        action: RuleAction::Output(PortId(3)),
        priority: PRIO_COUNT,
        cookie: Cookie(1),
    }));

    // the egress switch forwards to its host and carries no counting rule
    let rules = transport.rules_at(SwitchId(3));
    assert_eq!(rules.len(), 4);
    assert!(rules.contains(&FlowRule {
        match_on: RuleMatch::FlowTraffic { src, dst, label: None },
        action: RuleAction::Output(PortId(1)),
        priority: PRIO_FORWARD,
        cookie: NOCOUNT_COOKIE,
    }));
    assert!(rules.iter().all(|r| r.priority != PRIO_COUNT));
}

#[test]
fn test_traffic_started_once_all_switches_configured() {
    let (ctl, _, harness) = fixture("start");
    ctl.handle_event(SessionEvent::Connected(SwitchId(1))).unwrap();
    ctl.handle_event(SessionEvent::FeaturesReady(SwitchId(1))).unwrap();
    assert_eq!(*harness.started.lock().unwrap(), 0);
    assert!(!ctl.all_configured());

    connect_all(&ctl);
    assert!(ctl.all_configured());
    assert_eq!(*harness.started.lock().unwrap(), 1);

    // a repeated feature event must not re-trigger the start signal
    ctl.handle_event(SessionEvent::FeaturesReady(SwitchId(2))).unwrap();
    assert_eq!(*harness.started.lock().unwrap(), 1);
}

#[test]
fn test_counter_replies() {
    let (ctl, _, _) = fixture("replies");
    connect_all(&ctl);

    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: Cookie(1), byte_count: 100, packet_count: 2 }],
    })
    .unwrap();
    assert_eq!(ctl.counters().get(&FlowId(1)), Some(&100));

    // a reply for an untracked cookie is discarded, not recorded
    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: Cookie(77), byte_count: 5, packet_count: 1 }],
    })
    .unwrap();
    assert_eq!(ctl.counters().len(), 1);

    // the shared no-count cookie can never be attributed to a flow
    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: NOCOUNT_COOKIE, byte_count: 9, packet_count: 1 }],
    })
    .unwrap();
    assert_eq!(ctl.counters().len(), 1);

    // a decreasing counter is a data-quality signal, recorded as reported
    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: Cookie(1), byte_count: 50, packet_count: 1 }],
    })
    .unwrap();
    assert_eq!(ctl.counters().get(&FlowId(1)), Some(&50));
}

#[test]
fn test_convergence_reaches_threshold() {
    let (ctl, _, _) = fixture("converge");
    connect_all(&ctl);
    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: Cookie(1), byte_count: 4096, packet_count: 8 }],
    })
    .unwrap();

    // first cycle sees the change and resets; ten identical nonzero cycles reach the threshold
    assert_eq!(ctl.convergence_step(), 0);
    for expected in 1..=10 {
        assert_eq!(ctl.convergence_step(), expected);
    }
    assert_eq!(ctl.stable_cycles(), 10);

    // one differing reply resets the stability counter on that cycle
    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: Cookie(1), byte_count: 8192, packet_count: 16 }],
    })
    .unwrap();
    assert_eq!(ctl.convergence_step(), 0);
    assert_eq!(ctl.convergence_step(), 1);

    let _ = fs::remove_file(test_stats_path("converge"));
}

#[test]
fn test_all_zero_counters_never_converge() {
    let (ctl, _, _) = fixture("zero");
    connect_all(&ctl);
    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: Cookie(1), byte_count: 0, packet_count: 0 }],
    })
    .unwrap();
    for _ in 0..20 {
        assert_eq!(ctl.convergence_step(), 0);
    }
    let _ = fs::remove_file(test_stats_path("zero"));
}

#[test]
fn test_snapshot_persisted() {
    let (ctl, _, _) = fixture("snapshot");
    connect_all(&ctl);
    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: Cookie(1), byte_count: 1234, packet_count: 3 }],
    })
    .unwrap();
    ctl.convergence_step();

    let path = test_stats_path("snapshot");
    let raw = fs::read_to_string(&path).unwrap();
    let parsed: BTreeMap<FlowId, u64> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.get(&FlowId(1)), Some(&1234));
    let _ = fs::remove_file(path);
}

#[test]
fn test_queries_scoped_to_plan() {
    let (ctl, transport, _) = fixture("queries");
    connect_all(&ctl);
    ctl.issue_queries();
    let queries = transport.queries.lock().unwrap().clone();
    assert_eq!(queries, vec![(SwitchId(2), Cookie(1))]);
}

#[test]
fn test_session_loss_and_reconnect() {
    let (ctl, transport, _) = fixture("reconnect");
    connect_all(&ctl);
    let rules_before = transport.rules.lock().unwrap().len();

    ctl.handle_event(SessionEvent::Disconnected(SwitchId(2))).unwrap();
    let session = ctl.session(SwitchId(2)).unwrap();
    assert_eq!(session.state, SessionState::Disconnected);
    assert!(!session.configured);
    assert!(!ctl.all_configured());

    // rules are presumed lost and reinstalled on the next feature exchange
    ctl.handle_event(SessionEvent::Connected(SwitchId(2))).unwrap();
    ctl.handle_event(SessionEvent::FeaturesReady(SwitchId(2))).unwrap();
    assert!(ctl.all_configured());
    assert_eq!(transport.rules.lock().unwrap().len(), rules_before + 5);
}

#[test]
fn test_ndp_shim() {
    let (ctl, transport, _) = fixture("ndp");
    connect_all(&ctl);
    let target = HostAddr::from_switch(SwitchId(3)).unwrap();
    ctl.handle_event(SessionEvent::PacketIn {
        switch: SwitchId(1),
        port: PortId(1),
        payload: PacketPayload::NeighborSolicit { target },
    })
    .unwrap();

    let packets = transport.packets.lock().unwrap().clone();
    assert_eq!(
        packets,
        vec![(SwitchId(1), PortId(1), PacketPayload::NeighborAdvert { target })]
    );
    // the shim never touches the flow counters
    assert!(ctl.counters().is_empty());
}

#[test]
fn test_drain_completes_and_stops() {
    let (ctl, _, harness) = fixture("drain_ok");
    connect_all(&ctl);
    harness.finished.lock().unwrap().insert(FlowId(1));
    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: Cookie(1), byte_count: 777, packet_count: 7 }],
    })
    .unwrap();

    ctl.drain_and_stop();
    assert_eq!(*harness.stopped.lock().unwrap(), 1);
    assert!(ctl.stopper().is_stop());
    // the observed counter survives a clean drain
    assert_eq!(ctl.counters().get(&FlowId(1)), Some(&777));
    let _ = fs::remove_file(test_stats_path("drain_ok"));
}

#[test]
fn test_drain_timeout_records_zero_traffic() {
    let (ctl, _, harness) = fixture("drain_timeout");
    connect_all(&ctl);
    ctl.handle_event(SessionEvent::CounterReply {
        switch: SwitchId(2),
        entries: vec![CounterEntry { cookie: Cookie(1), byte_count: 777, packet_count: 7 }],
    })
    .unwrap();

    // no flow ever signals completion and the timeout is zero: the flow is recorded as
    // zero traffic and the simulation is still stopped
    ctl.drain_and_stop();
    assert_eq!(*harness.stopped.lock().unwrap(), 1);
    assert!(ctl.stopper().is_stop());
    assert_eq!(ctl.counters().get(&FlowId(1)), Some(&0));
    let _ = fs::remove_file(test_stats_path("drain_timeout"));
}

#[test]
fn test_run_loop_stops_on_stopper() {
    let (ctl, _, _) = fixture("run_loop");
    let (tx, rx) = std::sync::mpsc::channel();
    tx.send(SessionEvent::Connected(SwitchId(1))).unwrap();
    ctl.stopper().send_stop();
    ctl.run(&rx).unwrap();
}
