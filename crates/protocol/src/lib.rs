//! USB/IP wire protocol for the emulated calculator device
//!
//! This crate encodes and decodes the USB/IP messages exchanged with a host's
//! `usbip`/`vhci_hcd` client: the device-list and import handshake, and URB
//! submission, completion and unlink. It performs no I/O of its own beyond the
//! optional async request reader.
//!
//! # Example
//!
//! ```
//! use protocol::{CmdSubmit, RetSubmit, decode_submit_command, encode_ret_submit};
//!
//! let mut raw = [0u8; CmdSubmit::SIZE];
//! raw[3] = 1; // CMD_SUBMIT
//! raw[7] = 42; // seqnum
//! let cmd = decode_submit_command(&raw).unwrap();
//! assert_eq!(cmd.header.seqnum, 42);
//!
//! let reply = encode_ret_submit(cmd.header.seqnum, 0, 1, 1, 0, 2, &[0xAA, 0xBB]);
//! assert_eq!(reply.len(), RetSubmit::SIZE + 2);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{
    DEVLIST_REPLY_SIZE, IMPORT_STATUS_NO_DEVICE, MAX_TRANSFER_LENGTH, Request,
    decode_common_header, decode_submit_command, decode_unlink_command, encode_devlist_reply,
    encode_import_reply, encode_ret_submit, encode_ret_unlink,
};

#[cfg(feature = "async")]
pub use codec::{read_out_payload, read_request};
pub use error::{ProtocolError, Result};
pub use messages::{CmdSubmit, CmdUnlink, OpHeader, RetSubmit, RetUnlink, UrbHeader};
pub use types::{
    BUS_ID_FIELD_LEN, CMD_SUBMIT, CMD_UNLINK, CONFIGURATION_DESCRIPTOR,
    DESCRIPTOR_TYPE_CONFIGURATION, DESCRIPTOR_TYPE_DEVICE, DEVICE_BUS_ID, DEVICE_DESCRIPTOR,
    DEVICE_PATH, DEVICE_PRODUCT_ID, DEVICE_VENDOR_ID, DeviceRecord, Direction, InterfaceRecord,
    OP_REP_DEVLIST, OP_REP_IMPORT, OP_REQ_DEVLIST, OP_REQ_IMPORT, REQUEST_GET_DESCRIPTOR,
    RET_SUBMIT, RET_UNLINK, SetupPacket, VENDOR_SPECIFIC_CLASS, bus_id_field, bus_id_matches,
};
pub use version::{USBIP_PORT, USBIP_VERSION};
