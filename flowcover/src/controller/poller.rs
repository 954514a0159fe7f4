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

//! The polling and convergence loop
//!
//! One dedicated thread waits until every switch reaches `RulesInstalled`, then cycles: query
//! the counters of every plan-assigned flow at its monitor switch, sleep, persist the snapshot,
//! and check whether the counters stopped changing. After enough consecutive unchanged cycles it
//! waits (bounded) for the traffic processes to drain, signals the simulation to stop, and fires
//! the run's stopper.

use super::stats;
use super::{Controller, SwitchControl, TrafficHarness};
use crate::net::{Cookie, FlowId};

use log::*;
use std::collections::BTreeSet;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep between checks while waiting for all switches to come up
const CONFIG_CHECK_INTERVAL: Duration = Duration::from_millis(500);

impl<T, H> Controller<T, H>
where
    T: SwitchControl + 'static,
    H: TrafficHarness + 'static,
{
    /// Spawn the polling thread. It idles until every switch has its rules installed, then
    /// polls until convergence, drains, and stops the run.
    pub fn spawn_poller(&self) -> JoinHandle<()> {
        let ctl = self.clone();
        thread::spawn(move || ctl.poll_loop())
    }

    fn poll_loop(&self) {
        while !self.all_configured() {
            if self.stopper.is_stop() {
                return;
            }
            thread::sleep(CONFIG_CHECK_INTERVAL);
        }
        info!("all switches report RulesInstalled, polling started");

        loop {
            if self.stopper.is_stop() {
                return;
            }
            self.issue_queries();
            thread::sleep(self.config.poll_interval);
            let stable = self.convergence_step();
            debug!("flow counters unchanged for {} consecutive cycles", stable);
            if stable >= self.config.stability_threshold {
                info!(
                    "counters stable for {} cycles, waiting for traffic processes to finish",
                    stable
                );
                self.drain_and_stop();
                return;
            }
        }
    }

    /// Issue one round of counter queries, scoped to each monitor switch's assigned flows.
    pub(crate) fn issue_queries(&self) {
        for (switch, flows) in self.plan.iter() {
            for flow in flows {
                if let Err(e) = self.transport.query_counters(switch, Cookie::from(*flow)) {
                    warn!("counter query to switch {} failed: {}", switch, e);
                }
            }
        }
    }

    /// One convergence check: compare the counters against the previous cycle's snapshot,
    /// update the stability counter, and persist the snapshot. Returns the new number of
    /// consecutive stable cycles.
    pub(crate) fn convergence_step(&self) -> usize {
        let (snapshot, stable) = {
            let mut st = self.state.lock().unwrap();
            let unchanged = st.counters == st.prev_counters;
            let any_traffic = st.counters.values().any(|c| *c > 0);
            if unchanged && any_traffic {
                st.stable_cycles += 1;
            } else {
                st.stable_cycles = 0;
            }
            st.prev_counters = st.counters.clone();
            (st.counters.clone(), st.stable_cycles)
        };
        // the snapshot is for external inspection, not a correctness dependency
        if let Err(e) = stats::write_snapshot(&self.config.stats_path, &snapshot) {
            warn!("failed to persist counter snapshot: {}", e);
        }
        stable
    }

    /// Bounded wait for the traffic processes to signal completion, then stop the simulation
    /// and the run. Flows that never signal within the timeout are recorded as zero traffic;
    /// each one is named in the log to keep them apart from genuinely idle flows.
    pub(crate) fn drain_and_stop(&self) {
        let deadline = Instant::now() + self.config.drain_timeout;
        let mut pending: BTreeSet<FlowId> = self.flows.keys().copied().collect();
        loop {
            pending.retain(|f| !self.harness.flow_finished(*f));
            if pending.is_empty() {
                info!("all traffic processes finished");
                break;
            }
            if Instant::now() >= deadline {
                for flow in &pending {
                    warn!(
                        "flow {} never signalled completion within the drain timeout; \
                         recording zero traffic",
                        flow
                    );
                }
                let mut st = self.state.lock().unwrap();
                for flow in &pending {
                    st.counters.insert(*flow, 0);
                }
                break;
            }
            if self.stopper.is_stop() {
                return;
            }
            thread::sleep(self.config.drain_check_interval);
        }

        let snapshot = self.counters();
        if let Err(e) = stats::write_snapshot(&self.config.stats_path, &snapshot) {
            warn!("failed to persist the final counter snapshot: {}", e);
        }
        if let Err(e) = self.harness.stop_simulation() {
            error!("failed to signal simulation shutdown: {}", e);
        }
        self.stopper.send_stop();
    }
}
