//! qtcfg-core: USB mode switch and PING handshake in Rust.
//!
//! Some USB devices hide an extended configuration behind a vendor control
//! request. Sending that request makes the device drop off the bus and
//! re-enumerate; this crate drives that switch, finds the device again,
//! claims its data interface and checks that it echoes a 16 byte PING probe.
//!
//! # Architecture
//!
//! - **Protocol**: constants, `PingPacket` layout, `ModeSwitchRequest`
//! - **Transport**: USB abstraction (nusb, mock) and scoped resource guards
//! - **Clock**: time source for the settle delay and reconnect polling
//! - **Events**: observer pattern for UI decoupling
//! - **Config**: TOML-backed handshake parameters
//! - **Session**: the handshake orchestrator
//!
//! # Example
//!
//! ```no_run
//! use qtcfg_core::{HandshakeConfig, HandshakeSession, NusbTransport};
//!
//! let session = HandshakeSession::new(NusbTransport::new(), HandshakeConfig::default());
//! session.run().expect("handshake failed");
//! ```

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{ConfigError, HandshakeConfig, Timeouts};
pub use device::DeviceIdentity;
pub use error::HandshakeError;
pub use events::{HandshakeEvent, HandshakeObserver, NullObserver, Stage, TracingObserver};
pub use protocol::{ModeSwitchRequest, PingPacket};
pub use session::{HandshakeOutcome, HandshakeSession};
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};
