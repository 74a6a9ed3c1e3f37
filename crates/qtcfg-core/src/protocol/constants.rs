// Device family defaults
pub const APPLE_VENDOR_ID: u16 = 0x05AC;
pub const DEFAULT_PRODUCT_ID: u16 = 0x12A8;

// Configuration value exposed once the QT config is enabled
pub const QT_CONFIGURATION: u8 = 2;
pub const QT_DATA_INTERFACE: u8 = 0;

// Bulk endpoints on the QT data interface
pub const QT_BULK_OUT_EP: u8 = 0x02;
pub const QT_BULK_IN_EP: u8 = 0x81;

// Vendor control request enabling the QT config
pub const MODE_SWITCH_REQUEST_TYPE: u8 = 0x40; // host-to-device | vendor | device
pub const MODE_SWITCH_REQUEST: u8 = 0x52;
pub const MODE_SWITCH_VALUE: u16 = 0x0000;
pub const MODE_SWITCH_INDEX: u16 = 0x0002;

// bmRequestType bit fields (USB 2.0 9.3)
pub const REQUEST_TYPE_DIR_IN: u8 = 0x80;
pub const REQUEST_TYPE_TYPE_MASK: u8 = 0x60;
pub const REQUEST_TYPE_RECIPIENT_MASK: u8 = 0x1F;
pub const ENDPOINT_DIR_IN: u8 = 0x80;

// PING packet
pub const PING_PACKET_SIZE: usize = 16;
pub const PING_MAGIC: [u8; 4] = *b"gnip";
pub const PING_SEQUENCE: u32 = 1;

// Timing defaults (ms)
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
pub const DEFAULT_RECONNECT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

// nusb reader/writer buffer size
pub const BULK_BUFFER_SIZE: usize = 4096;
