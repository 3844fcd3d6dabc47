//! OSC (Open Sound Control) support
//!
//! Outbound: every retrieval cycle publishes the engine state to an optional
//! listener such as a visualiser. Inbound: a UDP server accepts the same named
//! control commands as the keyboard.

use crate::control::{ControlCommand, ControlState, Mode, Rate};
use crate::corpus::FragmentId;
use crate::error::{MosaicError, Result};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

/// What the engine just did, as seen by outside listeners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateUpdate {
    pub corpus: usize,
    pub mode: Mode,
    pub rate: Rate,
    pub fragment: FragmentId,
}

impl StateUpdate {
    pub fn new(state: &ControlState, fragment: FragmentId) -> Self {
        Self {
            corpus: state.corpus,
            mode: state.mode,
            rate: state.rate,
            fragment,
        }
    }

    pub fn to_message(&self, address: &str) -> OscMessage {
        OscMessage {
            addr: address.to_string(),
            args: vec![
                OscType::Int(self.corpus as i32),
                OscType::String(self.mode.as_str().to_string()),
                OscType::Float(self.rate.factor()),
                OscType::Int(self.fragment as i32),
            ],
        }
    }
}

/// Receives state updates; fire-and-forget, must not block
pub trait StateListener: Send + Sync {
    fn publish(&self, update: &StateUpdate);
}

/// Sends state updates as OSC messages over UDP
pub struct OscNotifier {
    socket: UdpSocket,
    target: SocketAddr,
    address: String,
}

impl OscNotifier {
    pub fn new(target: &str, address: &str) -> Result<Self> {
        let target: SocketAddr = target
            .parse()
            .map_err(|e| MosaicError::Config(format!("invalid OSC target '{}': {}", target, e)))?;
        let bind = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind)?;
        info!("Publishing state to {} as {}", target, address);
        Ok(Self {
            socket,
            target,
            address: address.to_string(),
        })
    }

    fn send(&self, update: &StateUpdate) -> Result<()> {
        let packet = OscPacket::Message(update.to_message(&self.address));
        let buf = rosc::encoder::encode(&packet).map_err(|e| MosaicError::Osc(format!("{:?}", e)))?;
        self.socket.send_to(&buf, self.target)?;
        Ok(())
    }
}

impl StateListener for OscNotifier {
    fn publish(&self, update: &StateUpdate) {
        if let Err(e) = self.send(update) {
            debug!("State notification dropped: {}", e);
        }
    }
}

/// OSC server for receiving control messages
pub struct OscControlServer {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl OscControlServer {
    /// Bind `port` on all interfaces and forward decoded commands to `sender`
    pub fn spawn(port: u16, sender: UnboundedSender<ControlCommand>) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        thread::spawn(move || {
            let mut buf = [0u8; rosc::decoder::MTU];

            while flag.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((size, from)) => match rosc::decoder::decode_udp(&buf[..size]) {
                        Ok((_, packet)) => {
                            for command in parse_packet(packet) {
                                if sender.send(command).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => debug!("Undecodable OSC packet from {}: {:?}", from, e),
                    },
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => {
                        error!("OSC control server error: {}", e);
                        break;
                    }
                }
            }
        });

        info!("OSC control listening on {}", local_addr);
        Ok(Self { local_addr, running })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for OscControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Flatten bundles and decode every message they carry
pub fn parse_packet(packet: OscPacket) -> Vec<ControlCommand> {
    match packet {
        OscPacket::Message(msg) => parse_message(&msg).into_iter().collect(),
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(parse_packet).collect(),
    }
}

/// Map one OSC message to a control command
pub fn parse_message(msg: &OscMessage) -> Option<ControlCommand> {
    let command = match (msg.addr.as_str(), msg.args.first()) {
        ("/mosaic/corpus", Some(OscType::Int(n))) if *n >= 0 => ControlCommand::SelectCorpus(*n as usize),
        ("/mosaic/corpus", Some(OscType::Float(n))) if *n >= 0.0 => {
            ControlCommand::SelectCorpus(*n as usize)
        }
        ("/mosaic/mode", Some(OscType::String(name))) => ControlCommand::SetMode(Mode::from_name(name)?),
        ("/mosaic/rate", Some(OscType::String(name))) => ControlCommand::SetRate(Rate::from_name(name)?),
        ("/mosaic/reset", _) => ControlCommand::Reset,
        ("/mosaic/quit", _) => ControlCommand::Quit,
        _ => {
            debug!("Ignoring OSC message {} {:?}", msg.addr, msg.args);
            return None;
        }
    };
    Some(command)
}
