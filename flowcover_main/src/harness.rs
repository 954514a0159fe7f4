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

//! Traffic harness over the simulator process: `SIGUSR1` starts the traffic generators,
//! `SIGUSR2` tears the simulation down, and each traffic process leaves a per-flow marker file
//! when it is done.

use flowcover::controller::TrafficHarness;
use flowcover::net::FlowId;

use log::*;
use std::io;
use std::path::PathBuf;

/// Harness speaking to the simulator via process signals and completion-marker files
#[derive(Debug, Clone)]
pub struct SignalHarness {
    pid: i32,
    marker_dir: PathBuf,
}

impl SignalHarness {
    /// Create a harness for the simulator with the given pid, looking for completion markers in
    /// `marker_dir`.
    pub fn new(pid: i32, marker_dir: PathBuf) -> Self {
        Self { pid, marker_dir }
    }

    fn marker_path(&self, flow: FlowId) -> PathBuf {
        self.marker_dir.join(format!("trafgen_{}.log", flow))
    }

    fn signal(&self, signum: libc::c_int) -> io::Result<()> {
        let ret = unsafe { libc::kill(self.pid as libc::pid_t, signum) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

impl TrafficHarness for SignalHarness {
    fn start_traffic(&self) -> io::Result<()> {
        info!("signalling traffic start to simulator pid {}", self.pid);
        self.signal(libc::SIGUSR1)
    }

    fn flow_finished(&self, flow: FlowId) -> bool {
        self.marker_path(flow).exists()
    }

    fn stop_simulation(&self) -> io::Result<()> {
        info!("signalling simulation shutdown to simulator pid {}", self.pid);
        self.signal(libc::SIGUSR2)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn test_completion_markers() {
        let dir = std::env::temp_dir().join(format!("flowcover_markers_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let harness = SignalHarness::new(std::process::id() as i32, dir.clone());

        assert!(!harness.flow_finished(FlowId(3)));
        fs::write(dir.join("trafgen_3.log"), b"done").unwrap();
        assert!(harness.flow_finished(FlowId(3)));
        assert!(!harness.flow_finished(FlowId(4)));

        fs::remove_dir_all(&dir).unwrap();
    }
}
