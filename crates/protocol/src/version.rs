//! USB/IP protocol version and well-known port

/// Protocol version carried in every operation header (1.1.1)
pub const USBIP_VERSION: u16 = 0x0111;

/// Well-known TCP port for USB/IP servers
pub const USBIP_PORT: u16 = 3240;

/// Check whether a header version field is the one this server speaks
///
/// A mismatch is not an error: the same four bytes start every URB command,
/// whose first word is a raw command code instead of version + opcode.
pub fn is_supported(version: u16) -> bool {
    version == USBIP_VERSION
}
