//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod scoped;
pub mod traits;

pub use mock::{MockCall, MockTransport};
pub use nusb::NusbTransport;
pub use scoped::{ClaimedInterface, OpenDevice};
pub use traits::{TransportError, UsbTransport};
