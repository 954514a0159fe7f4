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

//! TCP transport for switch control sessions
//!
//! Switches connect to the controller and exchange newline-delimited JSON frames. Each session
//! gets a reader thread that translates incoming frames into [`SessionEvent`]s; the shared
//! writer map implements [`SwitchControl`] for the controller side. A closed or broken session
//! surfaces as a `Disconnected` event.

use flowcover::controller::{
    CounterEntry, FlowRule, PacketPayload, SessionEvent, SwitchControl, TransportError,
};
use flowcover::net::{Cookie, PortId, SwitchId};

use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;

/// Frames sent by a switch over its control session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SwitchMessage {
    /// First frame of every session, announcing the switch id
    Hello {
        /// Id of the connecting switch
        switch: SwitchId,
    },
    /// The switch finished its feature/config exchange and can take rules
    FeaturesReady {
        /// Id of the switch
        switch: SwitchId,
    },
    /// A packet was punted to the controller
    PacketIn {
        /// Id of the switch
        switch: SwitchId,
        /// Port the packet arrived on
        port: PortId,
        /// Decoded payload
        payload: PacketPayload,
    },
    /// Answer to a counter query
    CounterReply {
        /// Id of the switch
        switch: SwitchId,
        /// Counter entries of the queried rules
        entries: Vec<CounterEntry>,
    },
}

/// Frames sent to a switch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControllerMessage {
    /// Program a rule into the flow table
    InstallRule {
        /// The rule to install
        rule: FlowRule,
    },
    /// Request the counters of the rule carrying the given cookie
    QueryCounters {
        /// Cookie to query
        cookie: Cookie,
    },
    /// Emit a controller-synthesized packet
    PacketOut {
        /// Port to emit on
        port: PortId,
        /// Packet payload
        payload: PacketPayload,
    },
}

/// Listening side of the switch control protocol. Cloning yields another handle on the same
/// session table.
#[derive(Debug, Clone)]
pub struct SessionServer {
    peers: Arc<Mutex<HashMap<SwitchId, TcpStream>>>,
}

impl SessionServer {
    /// Bind the listener and start accepting switch sessions. Session events are delivered on
    /// the given channel.
    pub fn bind(addr: &str, events: Sender<SessionEvent>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!("listening for switch sessions on {}", addr);
        let peers: Arc<Mutex<HashMap<SwitchId, TcpStream>>> = Arc::new(Mutex::new(HashMap::new()));
        let accept_peers = peers.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let peers = accept_peers.clone();
                        let events = events.clone();
                        thread::spawn(move || session_loop(stream, peers, events));
                    }
                    Err(e) => warn!("failed to accept a switch session: {}", e),
                }
            }
        });
        Ok(Self { peers })
    }

    fn send(&self, switch: SwitchId, message: &ControllerMessage) -> Result<(), TransportError> {
        let mut frame = serde_json::to_string(message)
            .map_err(|e| TransportError::SendFailed(switch, e.to_string()))?;
        frame.push('\n');
        let mut peers = self.peers.lock().unwrap();
        match peers.get_mut(&switch) {
            Some(stream) => stream
                .write_all(frame.as_bytes())
                .map_err(|e| TransportError::SendFailed(switch, e.to_string())),
            None => Err(TransportError::NotConnected(switch)),
        }
    }
}

impl SwitchControl for SessionServer {
    fn install_rule(&self, switch: SwitchId, rule: FlowRule) -> Result<(), TransportError> {
        self.send(switch, &ControllerMessage::InstallRule { rule })
    }

    fn query_counters(&self, switch: SwitchId, cookie: Cookie) -> Result<(), TransportError> {
        self.send(switch, &ControllerMessage::QueryCounters { cookie })
    }

    fn send_packet(
        &self,
        switch: SwitchId,
        port: PortId,
        payload: PacketPayload,
    ) -> Result<(), TransportError> {
        self.send(switch, &ControllerMessage::PacketOut { port, payload })
    }
}

/// One session: read frames until the peer goes away, then report the disconnect.
fn session_loop(
    stream: TcpStream,
    peers: Arc<Mutex<HashMap<SwitchId, TcpStream>>>,
    events: Sender<SessionEvent>,
) {
    let reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(e) => {
            warn!("cannot clone a session stream: {}", e);
            return;
        }
    };

    let mut registered: Option<SwitchId> = None;
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<SwitchMessage>(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("discarding undecodable frame: {}", e);
                continue;
            }
        };
        let event = match message {
            SwitchMessage::Hello { switch } => {
                if registered.is_none() {
                    match stream.try_clone() {
                        Ok(writer) => {
                            peers.lock().unwrap().insert(switch, writer);
                            registered = Some(switch);
                        }
                        Err(e) => {
                            warn!("cannot register switch {}: {}", switch, e);
                            break;
                        }
                    }
                }
                SessionEvent::Connected(switch)
            }
            SwitchMessage::FeaturesReady { switch } => SessionEvent::FeaturesReady(switch),
            SwitchMessage::PacketIn { switch, port, payload } => {
                SessionEvent::PacketIn { switch, port, payload }
            }
            SwitchMessage::CounterReply { switch, entries } => {
                SessionEvent::CounterReply { switch, entries }
            }
        };
        if events.send(event).is_err() {
            break;
        }
    }

    if let Some(switch) = registered {
        peers.lock().unwrap().remove(&switch);
        events.send(SessionEvent::Disconnected(switch)).ok();
    }
}
