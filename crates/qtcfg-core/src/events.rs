//! Event system for UI decoupling.
//!
//! Lets front ends follow the handshake without tight coupling to the
//! orchestrator.

use std::fmt;
use std::sync::Mutex;

use crate::device::DeviceIdentity;

/// Handshake stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Opening the device in its default configuration.
    Discover,
    /// Sending the vendor mode switch request.
    ModeSwitch,
    /// Closing the stale handle and waiting for re-enumeration.
    Reconnect,
    /// Opening the re-enumerated device.
    Rediscover,
    /// Selecting the extended configuration.
    Configure,
    ClaimInterface,
    SendPing,
    ReceivePing,
    VerifyEcho,
    /// Releasing the interface and closing the device.
    Teardown,
    Complete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Discover => write!(f, "Discover"),
            Stage::ModeSwitch => write!(f, "Mode Switch"),
            Stage::Reconnect => write!(f, "Reconnect"),
            Stage::Rediscover => write!(f, "Rediscover"),
            Stage::Configure => write!(f, "Configure"),
            Stage::ClaimInterface => write!(f, "Claim Interface"),
            Stage::SendPing => write!(f, "Send PING"),
            Stage::ReceivePing => write!(f, "Receive PING"),
            Stage::VerifyEcho => write!(f, "Verify Echo"),
            Stage::Teardown => write!(f, "Teardown"),
            Stage::Complete => write!(f, "Complete"),
        }
    }
}

/// Which enumeration a device was opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationPhase {
    PreSwitch,
    PostSwitch,
}

impl fmt::Display for EnumerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumerationPhase::PreSwitch => write!(f, "pre-switch"),
            EnumerationPhase::PostSwitch => write!(f, "post-switch"),
        }
    }
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the handshake session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    StageChanged { from: Stage, to: Stage },
    DeviceOpened {
        identity: DeviceIdentity,
        phase: EnumerationPhase,
    },
    /// One open attempt while waiting for re-enumeration.
    ReconnectPoll { attempt: u32 },
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Vec<u8>,
    },
    Failed { stage: Stage, message: String },
    Complete,
}

/// Observer trait for receiving handshake events.
pub trait HandshakeObserver: Send + Sync {
    fn on_event(&self, event: &HandshakeEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl HandshakeObserver for NullObserver {
    fn on_event(&self, _event: &HandshakeEvent) {}
}

/// Observer that keeps every event, for tests and post-mortem dumps.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<HandshakeEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HandshakeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Stages entered, in order.
    pub fn stages(&self) -> Vec<Stage> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                HandshakeEvent::StageChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }
}

impl HandshakeObserver for RecordingObserver {
    fn on_event(&self, event: &HandshakeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl HandshakeObserver for TracingObserver {
    fn on_event(&self, event: &HandshakeEvent) {
        match event {
            HandshakeEvent::StageChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Stage changed");
            }
            HandshakeEvent::DeviceOpened { identity, phase } => {
                tracing::info!(device = %identity, phase = %phase, "Device opened");
            }
            HandshakeEvent::ReconnectPoll { attempt } => {
                tracing::debug!(attempt, "Waiting for device to re-enumerate");
            }
            HandshakeEvent::Packet {
                direction,
                length,
                data,
            } => {
                tracing::debug!(dir = %direction, len = length, data = ?data, "USB Packet");
            }
            HandshakeEvent::Failed { stage, message } => {
                tracing::warn!(stage = %stage, "Handshake failed: {}", message);
            }
            HandshakeEvent::Complete => {
                tracing::info!("Handshake complete");
            }
        }
    }
}
