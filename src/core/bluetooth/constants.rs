//! Constants used throughout the Bluetooth module
//! GATT status codes, characteristic property bits and default timings.

/// GATT operation completed successfully
pub const GATT_SUCCESS: i32 = 0;

/// Generic GATT failure reported by most stacks when nothing more specific applies
pub const GATT_FAILURE: i32 = 0x101;

/// Characteristic property bits (Bluetooth Core, Vol 3, Part G, 3.3.1.1)
pub const PROPERTY_BROADCAST: u32 = 0x01;
pub const PROPERTY_READ: u32 = 0x02;
pub const PROPERTY_WRITE_NO_RESPONSE: u32 = 0x04;
pub const PROPERTY_WRITE: u32 = 0x08;
pub const PROPERTY_NOTIFY: u32 = 0x10;
pub const PROPERTY_INDICATE: u32 = 0x20;

/// Default scan duration in seconds
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 10;

/// Scan failure code used when the radio refuses to open a scan without giving a reason
pub const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

/// Label shown for devices that do not advertise a name
pub const UNKNOWN_DEVICE_NAME: &str = "UNKNOWN";
