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

//! Command line front end: load the topology handoff, generate the flows, solve the monitor
//! placement, and run the controller against the simulated network.

use flowcover::controller::{stats, Controller, ControllerConfig};
use flowcover::cover::{self, CostModel};
use flowcover::flowgen;
use flowcover::net::{FlowId, SwitchFlowIndex};

use clap::Parser;
use log::*;
use rand::thread_rng;
use std::error::Error;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

mod handoff;
mod harness;
mod transport;

#[derive(Parser, Debug)]
#[clap(
    name = "flowcover_main",
    about = "Installs per-flow forwarding state and recovers all flow volumes by polling a \
             minimal-cost subset of switches"
)]
struct Opts {
    /// Topology handoff file written by the simulator
    #[clap(long, default_value = "topology.json")]
    topology: PathBuf,
    /// Number of random flows to generate
    #[clap(long, default_value_t = 10)]
    num_flows: usize,
    /// Upper bound (seconds) on the wait for traffic processes after convergence
    #[clap(long, default_value_t = 900)]
    timeout: u64,
    /// Seconds between two polling cycles
    #[clap(long, default_value_t = 3)]
    poll_interval: u64,
    /// Address to listen on for switch control sessions
    #[clap(long, default_value = "127.0.0.1:6633")]
    listen: String,
    /// Path of the periodically rewritten counter snapshot
    #[clap(long, default_value = "stats/flow_stats.json")]
    stats: PathBuf,
    /// Path of the flow handoff written for the traffic collaborator
    #[clap(long, default_value = "random_flows.json")]
    flows_out: PathBuf,
    /// Directory where the traffic processes leave their completion markers
    #[clap(long, default_value = "/tmp")]
    marker_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    let opts = Opts::parse();

    let handoff = handoff::load(&opts.topology)?;
    let topology = handoff.build_topology()?;
    info!("topology loaded: {} switches", topology.num_switches());

    let mut rng = thread_rng();
    let flows = flowgen::generate_flows(&topology, opts.num_flows, &mut rng)?;
    info!("{} random flows generated", flows.len());
    stats::write_flow_handoff(&opts.flows_out, &flows)?;
    info!("flows written to {} to notify the simulator", opts.flows_out.display());

    let index = SwitchFlowIndex::build(&flows);
    let flow_ids: Vec<FlowId> = flows.keys().copied().collect();
    let plan = cover::solve(&flow_ids, &index, &CostModel::default(), &mut rng)?;
    info!("polling {} of {} switches", plan.num_switches(), topology.num_switches());

    // only now open the control channel: an infeasible setup aborts before any session exists
    let (events_tx, events_rx) = mpsc::channel();
    let transport = transport::SessionServer::bind(&opts.listen, events_tx)?;
    let harness = harness::SignalHarness::new(handoff.simulator_pid, opts.marker_dir.clone());

    let config = ControllerConfig {
        poll_interval: Duration::from_secs(opts.poll_interval),
        drain_timeout: Duration::from_secs(opts.timeout),
        stats_path: opts.stats.clone(),
        ..ControllerConfig::default()
    };
    let controller = Controller::new(config, topology, flows, plan, transport, harness);

    let poller = controller.spawn_poller();
    controller.run(&events_rx)?;
    if poller.join().is_err() {
        error!("the polling thread panicked");
    }
    info!("run complete, artifacts flushed");
    Ok(())
}
