//! Encoding and decoding of complete USB/IP messages
//!
//! The `decode_*` functions expect complete buffers; partial input fails with
//! [`ProtocolError::BufferTooSmall`]. The `encode_*` functions build each reply
//! as a single buffer so it can be written to the socket in one call.
//!
//! # Request framing
//!
//! Every request starts with 8 bytes. When they carry [`USBIP_VERSION`] they
//! are an operation header (device list, import); otherwise the first word is
//! a URB command code and the request is a 48-byte command record:
//! ```text
//! [version: u16][opcode: u16][status: u32]          OP_REQ_*
//! [command: u32][seqnum: u32][.. 40 more bytes ..]  CMD_SUBMIT / CMD_UNLINK
//! ```

use crate::error::{ProtocolError, Result};
use crate::messages::{CmdSubmit, CmdUnlink, OpHeader, RetSubmit, RetUnlink, UrbHeader};
use crate::types::{
    BUS_ID_FIELD_LEN, CMD_SUBMIT, CMD_UNLINK, DeviceRecord, InterfaceRecord, OP_REP_DEVLIST,
    OP_REP_IMPORT, RET_SUBMIT, RET_UNLINK,
};
use crate::version::USBIP_VERSION;
use byteorder::{BigEndian, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut, buf::Writer};

#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest OUT payload the server will buffer for a single URB (16 MiB)
pub const MAX_TRANSFER_LENGTH: usize = 16 * 1024 * 1024;

/// Status reported in OP_REP_IMPORT when the bus id is unknown
pub const IMPORT_STATUS_NO_DEVICE: u32 = 1;

/// Size of an OP_REP_DEVLIST with one device and one interface
pub const DEVLIST_REPLY_SIZE: usize = OpHeader::SIZE + 4 + DeviceRecord::SIZE + InterfaceRecord::SIZE;

/// A complete request read from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// OP_REQ_DEVLIST
    DevList,
    /// OP_REQ_IMPORT with its raw bus id field
    Import { bus_id: [u8; BUS_ID_FIELD_LEN] },
    /// Operation header with the right version but an opcode we do not serve
    UnknownOp(u16),
    /// USBIP_CMD_SUBMIT (any OUT payload still follows on the stream)
    Submit(CmdSubmit),
    /// USBIP_CMD_UNLINK
    Unlink(CmdUnlink),
}

/// Decode the 8-byte operation header
pub fn decode_common_header(bytes: &[u8]) -> Result<OpHeader> {
    OpHeader::decode(bytes)
}

/// Decode a 48-byte CMD_SUBMIT record
pub fn decode_submit_command(bytes: &[u8]) -> Result<CmdSubmit> {
    CmdSubmit::decode(bytes)
}

/// Decode a 48-byte CMD_UNLINK record
pub fn decode_unlink_command(bytes: &[u8]) -> Result<CmdUnlink> {
    CmdUnlink::decode(bytes)
}

/// OP_REP_DEVLIST: header, device count (1), the device record and its interface
pub fn encode_devlist_reply() -> Bytes {
    encode_with(DEVLIST_REPLY_SIZE, |w| {
        op_reply(OP_REP_DEVLIST, 0).write_to(w)?;
        w.write_u32::<BigEndian>(1)?;
        DeviceRecord::exported().write_to(w)?;
        InterfaceRecord::exported().write_to(w)
    })
}

/// OP_REP_IMPORT: zero status plus the device record, or a nonzero status alone
pub fn encode_import_reply(success: bool) -> Bytes {
    if !success {
        return encode_with(OpHeader::SIZE, |w| {
            op_reply(OP_REP_IMPORT, IMPORT_STATUS_NO_DEVICE).write_to(w)
        });
    }
    encode_with(OpHeader::SIZE + DeviceRecord::SIZE, |w| {
        op_reply(OP_REP_IMPORT, 0).write_to(w)?;
        DeviceRecord::exported().write_to(w)
    })
}

/// RET_SUBMIT followed by `payload`
///
/// The payload is only appended for IN completions; `actual_length` is
/// reported as given (for OUT it is the number of bytes the host sent).
pub fn encode_ret_submit(
    seqnum: u32,
    devid: u32,
    direction: u32,
    ep: u32,
    status: i32,
    actual_length: u32,
    payload: &[u8],
) -> Bytes {
    let ret = RetSubmit {
        header: UrbHeader {
            command: RET_SUBMIT,
            seqnum,
            devid,
            direction,
            ep,
        },
        status,
        actual_length,
        start_frame: 0,
        number_of_packets: 0,
        error_count: 0,
    };
    encode_with(RetSubmit::SIZE + payload.len(), |w| {
        ret.write_to(w)?;
        std::io::Write::write_all(w, payload)
    })
}

/// RET_UNLINK echoing the request's sequence number, device id and direction
pub fn encode_ret_unlink(seqnum: u32, devid: u32, direction: u32, status: i32) -> Bytes {
    let ret = RetUnlink {
        header: UrbHeader {
            command: RET_UNLINK,
            seqnum,
            devid,
            direction,
            ep: 0,
        },
        status,
    };
    encode_with(RetUnlink::SIZE, |w| ret.write_to(w))
}

fn op_reply(code: u16, status: u32) -> OpHeader {
    OpHeader {
        version: USBIP_VERSION,
        code,
        status,
    }
}

fn encode_with<F>(capacity: usize, encode: F) -> Bytes
where
    F: FnOnce(&mut Writer<BytesMut>) -> std::io::Result<()>,
{
    let mut writer = BytesMut::with_capacity(capacity).writer();
    // Writes into a BytesMut only grow the buffer and cannot fail.
    let _ = encode(&mut writer);
    writer.into_inner().freeze()
}

/// Async: read one complete request from a client stream
///
/// Fails with [`ProtocolError::UnknownCommand`] when the stream is out of
/// sync, and with an I/O error on a short read.
#[cfg(feature = "async")]
pub async fn read_request<R>(reader: &mut R) -> Result<Request>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; OpHeader::SIZE];
    reader.read_exact(&mut head).await?;
    let header = decode_common_header(&head)?;

    if crate::version::is_supported(header.version) {
        return match header.code {
            crate::types::OP_REQ_DEVLIST => Ok(Request::DevList),
            crate::types::OP_REQ_IMPORT => {
                let mut bus_id = [0u8; BUS_ID_FIELD_LEN];
                reader.read_exact(&mut bus_id).await?;
                Ok(Request::Import { bus_id })
            }
            code => Ok(Request::UnknownOp(code)),
        };
    }

    let command = header.command();
    if command != CMD_SUBMIT && command != CMD_UNLINK {
        return Err(ProtocolError::UnknownCommand(command));
    }

    let mut record = [0u8; CmdSubmit::SIZE];
    record[..OpHeader::SIZE].copy_from_slice(&head);
    reader.read_exact(&mut record[OpHeader::SIZE..]).await?;

    if command == CMD_SUBMIT {
        Ok(Request::Submit(decode_submit_command(&record)?))
    } else {
        Ok(Request::Unlink(decode_unlink_command(&record)?))
    }
}

/// Async: read the OUT payload that follows a CMD_SUBMIT
#[cfg(feature = "async")]
pub async fn read_out_payload<R>(reader: &mut R, length: u32) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let length = length as usize;
    if length > MAX_TRANSFER_LENGTH {
        return Err(ProtocolError::TransferTooLarge {
            size: length,
            max: MAX_TRANSFER_LENGTH,
        });
    }

    let mut data = vec![0u8; length];
    reader.read_exact(&mut data).await?;
    Ok(data)
}
