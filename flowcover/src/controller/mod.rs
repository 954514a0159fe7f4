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

//! # Controller state machine
//!
//! The controller consumes the flow set and the polling plan produced at setup, and drives the
//! run: on every switch-session event it installs the forwarding rules of all flows traversing
//! that switch (and, only at a flow's designated monitor switch, the distinguishable counting
//! rule), then polls the monitor switches periodically, aggregates counter replies into per-flow
//! counters, detects convergence, and triggers orderly shutdown.
//!
//! ## Per-switch session lifecycle
//!
//! ```text
//! Disconnected -> Connected -> RulesInstalled -> Disconnected
//! ```
//!
//! A session loss reverts the switch to `Disconnected`: its rules are presumed lost and are
//! reinstalled on the next feature exchange. The flow's membership in the polling plan is
//! unaffected by session churn.
//!
//! ## Concurrency
//!
//! Session events are handled on the caller's event loop ([`Controller::run`]); the polling and
//! convergence loop runs on its own thread ([`Controller::spawn_poller`]). Both sides share one
//! mutex-protected state record (sessions, counters, stability bookkeeping). No lock is held
//! across a transport call or a sleep.

mod poller;
mod proto;
pub mod stats;

pub use proto::{
    CounterEntry, FlowRule, PacketPayload, RuleAction, RuleMatch, SessionEvent, SwitchControl,
    TrafficHarness, TransportError, NOCOUNT_COOKIE, PRIO_BOOTSTRAP, PRIO_COUNT, PRIO_FORWARD,
};

use crate::cover::PollingPlan;
use crate::net::{Cookie, FlowId, FlowTable, HostAddr, NetError, PortId, SwitchId, Topology};
use crate::{Error, Stopper};

use log::*;
use std::collections::{BTreeMap, HashMap};
use std::convert::TryFrom;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long the event loop waits on the channel before re-checking the stop flag
const EVENT_POLL_GRACE: Duration = Duration::from_millis(100);

/// Protocol state of one switch session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No control session is open
    Disconnected,
    /// The control session is open, feature/config exchange in progress
    Connected,
    /// Forwarding (and, where applicable, counting) rules are programmed
    RulesInstalled,
}

/// Per-switch runtime session record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchSession {
    /// Protocol state of the session
    pub state: SessionState,
    /// True once the switch has all its rules installed
    pub configured: bool,
}

impl SwitchSession {
    fn new() -> Self {
        Self { state: SessionState::Connected, configured: false }
    }
}

/// Tunable parameters of the controller run
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Sleep between two polling cycles
    pub poll_interval: Duration,
    /// Number of consecutive unchanged cycles after which the counters are considered converged
    pub stability_threshold: usize,
    /// Upper bound on the wait for traffic processes to signal completion after convergence
    pub drain_timeout: Duration,
    /// Sleep between two completion-marker checks while draining
    pub drain_check_interval: Duration,
    /// Path of the periodically rewritten counter snapshot
    pub stats_path: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            stability_threshold: 10,
            drain_timeout: Duration::from_secs(900),
            drain_check_interval: Duration::from_secs(1),
            stats_path: PathBuf::from("stats/flow_stats.json"),
        }
    }
}

/// Shared mutable state of a run, behind the controller's single mutex
#[derive(Debug, Default)]
struct ControllerState {
    sessions: HashMap<SwitchId, SwitchSession>,
    counters: BTreeMap<FlowId, u64>,
    prev_counters: BTreeMap<FlowId, u64>,
    stable_cycles: usize,
    traffic_started: bool,
}

/// # The controller
///
/// Holds the immutable setup products (topology, flows, polling plan), the transport and
/// traffic-harness collaborators, and the mutex-protected runtime state. Cloning a controller is
/// cheap and yields a handle to the same run; the polling thread works on such a clone.
#[derive(Debug)]
pub struct Controller<T, H> {
    config: ControllerConfig,
    topology: Arc<Topology>,
    flows: Arc<FlowTable>,
    plan: Arc<PollingPlan>,
    transport: Arc<T>,
    harness: Arc<H>,
    state: Arc<Mutex<ControllerState>>,
    stopper: Stopper,
}

impl<T, H> Clone for Controller<T, H> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            topology: self.topology.clone(),
            flows: self.flows.clone(),
            plan: self.plan.clone(),
            transport: self.transport.clone(),
            harness: self.harness.clone(),
            state: self.state.clone(),
            stopper: self.stopper.clone(),
        }
    }
}

impl<T, H> Controller<T, H>
where
    T: SwitchControl,
    H: TrafficHarness,
{
    /// Create a controller for one run.
    pub fn new(
        config: ControllerConfig,
        topology: Topology,
        flows: FlowTable,
        plan: PollingPlan,
        transport: T,
        harness: H,
    ) -> Self {
        Self {
            config,
            topology: Arc::new(topology),
            flows: Arc::new(flows),
            plan: Arc::new(plan),
            transport: Arc::new(transport),
            harness: Arc::new(harness),
            state: Arc::new(Mutex::new(ControllerState::default())),
            stopper: Stopper::new(),
        }
    }

    /// A handle to stop this run from the outside
    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    /// Dispatch one switch-session event.
    pub fn handle_event(&self, event: SessionEvent) -> Result<(), Error> {
        match event {
            SessionEvent::Connected(switch) => {
                self.on_connected(switch);
                Ok(())
            }
            SessionEvent::FeaturesReady(switch) => self.on_features_ready(switch),
            SessionEvent::Disconnected(switch) => {
                self.on_disconnected(switch);
                Ok(())
            }
            SessionEvent::PacketIn { switch, port, payload } => {
                self.on_packet_in(switch, port, payload)
            }
            SessionEvent::CounterReply { switch, entries } => {
                self.on_counter_reply(switch, entries);
                Ok(())
            }
        }
    }

    /// Drain the event channel until the run is stopped. Handler failures are logged, not
    /// propagated: a rule install racing a session loss is a recoverable condition, the rules
    /// are reinstalled on reconnect.
    pub fn run(&self, events: &Receiver<SessionEvent>) -> Result<(), Error> {
        info!("controller event loop started");
        while !self.stopper.is_stop() {
            match events.recv_timeout(EVENT_POLL_GRACE) {
                Ok(event) => {
                    if let Err(e) = self.handle_event(event) {
                        warn!("event handler failed: {}", e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("controller event loop finished");
        Ok(())
    }

    fn on_connected(&self, switch: SwitchId) {
        debug!("register switch {}", switch);
        let mut st = self.state.lock().unwrap();
        st.sessions.insert(switch, SwitchSession::new());
    }

    fn on_disconnected(&self, switch: SwitchId) {
        warn!("switch {} lost its control session; rules presumed lost until reconnect", switch);
        let mut st = self.state.lock().unwrap();
        if let Some(session) = st.sessions.get_mut(&switch) {
            session.state = SessionState::Disconnected;
            session.configured = false;
        }
    }

    fn on_features_ready(&self, switch: SwitchId) -> Result<(), Error> {
        if !self.topology.contains(switch) {
            warn!("ignoring feature event of unknown switch {}", switch);
            return Ok(());
        }
        info!("switch {} ready, installing rules", switch);

        self.install_bootstrap_rules(switch)?;
        for (flow, path) in self.flows.iter() {
            if path.contains(&switch) {
                self.install_flow_rules(switch, *flow, path)?;
            }
        }

        let start_traffic = {
            let mut st = self.state.lock().unwrap();
            let session = st.sessions.entry(switch).or_insert_with(SwitchSession::new);
            session.state = SessionState::RulesInstalled;
            session.configured = true;
            let num_done = st.sessions.values().filter(|s| s.configured).count();
            info!("a total of {} switches are configured", num_done);
            let all_done = self
                .topology
                .switches()
                .all(|s| st.sessions.get(&s).map(|x| x.configured).unwrap_or(false));
            if all_done && !st.traffic_started {
                st.traffic_started = true;
                true
            } else {
                false
            }
        };
        if start_traffic {
            info!("all switches configured, signalling traffic start");
            self.harness.start_traffic()?;
        }
        Ok(())
    }

    /// The minimal bootstrap: punt neighbor-discovery solicitations to the controller, and
    /// forward the controller's synthesized advertisements out the host port. Without these the
    /// data plane cannot resolve link-layer addresses at all.
    fn install_bootstrap_rules(&self, switch: SwitchId) -> Result<(), Error> {
        self.transport.install_rule(
            switch,
            FlowRule {
                match_on: RuleMatch::NeighborSolicit,
                action: RuleAction::ToController,
                priority: PRIO_BOOTSTRAP,
                cookie: NOCOUNT_COOKIE,
            },
        )?;
        self.transport.install_rule(
            switch,
            FlowRule {
                match_on: RuleMatch::NeighborAdvert,
                action: RuleAction::Output(self.topology.host_port(switch)?),
                priority: PRIO_BOOTSTRAP,
                cookie: NOCOUNT_COOKIE,
            },
        )?;
        Ok(())
    }

    /// Install the rules of one flow on one switch of its path: a forward and a reverse
    /// forwarding rule, and the higher-priority counting rule if (and only if) the polling plan
    /// makes this switch the flow's monitor.
    fn install_flow_rules(
        &self,
        switch: SwitchId,
        flow: FlowId,
        path: &[SwitchId],
    ) -> Result<(), Error> {
        let first = *path.first().ok_or(NetError::PathTooShort)?;
        let last = *path.last().ok_or(NetError::PathTooShort)?;
        let src = HostAddr::from_switch(first)?;
        let dst = HostAddr::from_switch(last)?;

        let forward_port = self.egress_on_path(switch, path)?;
        self.transport.install_rule(
            switch,
            FlowRule {
                match_on: RuleMatch::FlowTraffic { src, dst, label: None },
                action: RuleAction::Output(forward_port),
                priority: PRIO_FORWARD,
                cookie: NOCOUNT_COOKIE,
            },
        )?;

        // reverse direction, for the bidirectional probes
        let reversed: Vec<SwitchId> = path.iter().rev().copied().collect();
        let reverse_port = self.egress_on_path(switch, &reversed)?;
        self.transport.install_rule(
            switch,
            FlowRule {
                match_on: RuleMatch::FlowTraffic { src: dst, dst: src, label: None },
                action: RuleAction::Output(reverse_port),
                priority: PRIO_FORWARD,
                cookie: NOCOUNT_COOKIE,
            },
        )?;

        if self.plan.monitors_flow(switch, flow) {
            debug!("installing counting rule for flow {} at monitor switch {}", flow, switch);
            self.transport.install_rule(
                switch,
                FlowRule {
                    match_on: RuleMatch::FlowTraffic { src, dst, label: Some(flow) },
                    action: RuleAction::Output(forward_port),
                    priority: PRIO_COUNT,
                    cookie: Cookie::from(flow),
                },
            )?;
        }
        Ok(())
    }

    /// Next-hop egress port of `switch` along `path`: the host port if the switch is the path's
    /// last hop, the link port toward the next path switch otherwise.
    fn egress_on_path(&self, switch: SwitchId, path: &[SwitchId]) -> Result<PortId, Error> {
        let pos = match path.iter().position(|s| *s == switch) {
            Some(pos) => pos,
            None => return Err(NetError::UnknownSwitch(switch).into()),
        };
        if pos + 1 == path.len() {
            Ok(self.topology.host_port(switch)?)
        } else {
            Ok(self.topology.link_port(switch, path[pos + 1])?)
        }
    }

    /// The neighbor-discovery shim: answer solicitations with a synthesized advertisement out
    /// the originating port. This never touches the flow counters.
    fn on_packet_in(
        &self,
        switch: SwitchId,
        port: PortId,
        payload: PacketPayload,
    ) -> Result<(), Error> {
        match payload {
            PacketPayload::NeighborSolicit { target } => {
                debug!("answering neighbor solicitation for {} on switch {}", target, switch);
                self.transport.send_packet(
                    switch,
                    port,
                    PacketPayload::NeighborAdvert { target },
                )?;
            }
            PacketPayload::NeighborAdvert { .. } => {}
        }
        Ok(())
    }

    fn on_counter_reply(&self, switch: SwitchId, entries: Vec<CounterEntry>) {
        let mut st = self.state.lock().unwrap();
        for entry in entries {
            match self.flow_of_cookie(entry.cookie) {
                Some(flow) => {
                    // last write wins; each flow has exactly one monitor, so there is nothing
                    // to merge across switches
                    if let Some(prev) = st.counters.insert(flow, entry.byte_count) {
                        if entry.byte_count < prev {
                            warn!(
                                "counter for flow {} went backwards ({} -> {}); switch {} may \
                                 have restarted unnoticed",
                                flow, prev, entry.byte_count, switch
                            );
                        }
                    }
                }
                None => {
                    debug!(
                        "discarding stale counter reply from switch {} for cookie {}",
                        switch, entry.cookie
                    );
                }
            }
        }
    }

    /// Map a reply cookie back to the flow it counts. Counting rules carry the flow id as their
    /// cookie; anything else (the shared no-count cookie, or a cookie of a flow this run does
    /// not know) is stale.
    fn flow_of_cookie(&self, cookie: Cookie) -> Option<FlowId> {
        if cookie == NOCOUNT_COOKIE {
            return None;
        }
        let id = u32::try_from(cookie.0).ok()?;
        let flow = FlowId(id);
        if self.flows.contains_key(&flow) {
            Some(flow)
        } else {
            None
        }
    }

    /// Session record of the given switch, if a session was ever opened
    pub fn session(&self, switch: SwitchId) -> Option<SwitchSession> {
        self.state.lock().unwrap().sessions.get(&switch).copied()
    }

    /// True once every switch of the topology has its rules installed
    pub fn all_configured(&self) -> bool {
        let st = self.state.lock().unwrap();
        self.topology
            .switches()
            .all(|s| st.sessions.get(&s).map(|x| x.configured).unwrap_or(false))
    }

    /// Snapshot of the per-flow counters
    pub fn counters(&self) -> BTreeMap<FlowId, u64> {
        self.state.lock().unwrap().counters.clone()
    }

    /// Number of consecutive polling cycles without a counter change
    pub fn stable_cycles(&self) -> usize {
        self.state.lock().unwrap().stable_cycles
    }
}
