//! Fixed-layout USB/IP message records
//!
//! All integers are big-endian. Operation messages (device list, import)
//! start with an 8-byte [`OpHeader`]; URB messages are 48-byte records that
//! start with a 20-byte [`UrbHeader`].

use crate::error::{Result, ensure_len};
use crate::types::SetupPacket;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// Operation header: version, opcode, status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    pub version: u16,
    pub code: u16,
    pub status: u32,
}

impl OpHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 8;

    /// Decode a header from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, Self::SIZE)?;
        let mut cursor = Cursor::new(bytes);
        Ok(Self {
            version: cursor.read_u16::<BigEndian>()?,
            code: cursor.read_u16::<BigEndian>()?,
            status: cursor.read_u32::<BigEndian>()?,
        })
    }

    /// Write the header to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u16::<BigEndian>(self.version)?;
        writer.write_u16::<BigEndian>(self.code)?;
        writer.write_u32::<BigEndian>(self.status)
    }

    /// The same four leading bytes read as a URB command code
    pub fn command(&self) -> u32 {
        (u32::from(self.version) << 16) | u32::from(self.code)
    }
}

/// Basic header shared by every URB command and return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrbHeader {
    pub command: u32,
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub ep: u32,
}

impl UrbHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 20;

    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            command: reader.read_u32::<BigEndian>()?,
            seqnum: reader.read_u32::<BigEndian>()?,
            devid: reader.read_u32::<BigEndian>()?,
            direction: reader.read_u32::<BigEndian>()?,
            ep: reader.read_u32::<BigEndian>()?,
        })
    }

    /// Write the header to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<BigEndian>(self.command)?;
        writer.write_u32::<BigEndian>(self.seqnum)?;
        writer.write_u32::<BigEndian>(self.devid)?;
        writer.write_u32::<BigEndian>(self.direction)?;
        writer.write_u32::<BigEndian>(self.ep)
    }
}

/// USBIP_CMD_SUBMIT (48 bytes, followed by OUT data when direction is OUT)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSubmit {
    pub header: UrbHeader,
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub interval: u32,
    pub setup: [u8; 8],
}

impl CmdSubmit {
    /// Size of the command in bytes
    pub const SIZE: usize = 48;

    /// Decode a command from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, Self::SIZE)?;
        let mut cursor = Cursor::new(bytes);
        let header = UrbHeader::read_from(&mut cursor)?;
        let transfer_flags = cursor.read_u32::<BigEndian>()?;
        let transfer_buffer_length = cursor.read_u32::<BigEndian>()?;
        let start_frame = cursor.read_u32::<BigEndian>()?;
        let number_of_packets = cursor.read_u32::<BigEndian>()?;
        let interval = cursor.read_u32::<BigEndian>()?;
        let mut setup = [0u8; 8];
        cursor.read_exact(&mut setup)?;

        Ok(Self {
            header,
            transfer_flags,
            transfer_buffer_length,
            start_frame,
            number_of_packets,
            interval,
            setup,
        })
    }

    /// Write the command to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.header.write_to(writer)?;
        writer.write_u32::<BigEndian>(self.transfer_flags)?;
        writer.write_u32::<BigEndian>(self.transfer_buffer_length)?;
        writer.write_u32::<BigEndian>(self.start_frame)?;
        writer.write_u32::<BigEndian>(self.number_of_packets)?;
        writer.write_u32::<BigEndian>(self.interval)?;
        writer.write_all(&self.setup)
    }

    /// Typed view of the setup field
    pub fn setup_packet(&self) -> SetupPacket {
        SetupPacket::from_bytes(self.setup)
    }
}

/// USBIP_CMD_UNLINK (48 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdUnlink {
    pub header: UrbHeader,
    /// Sequence number of the URB to cancel
    pub unlink_seqnum: u32,
}

impl CmdUnlink {
    /// Size of the command in bytes
    pub const SIZE: usize = 48;

    /// Decode a command from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, Self::SIZE)?;
        let mut cursor = Cursor::new(bytes);
        let header = UrbHeader::read_from(&mut cursor)?;
        let unlink_seqnum = cursor.read_u32::<BigEndian>()?;
        Ok(Self {
            header,
            unlink_seqnum,
        })
    }

    /// Write the command to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.header.write_to(writer)?;
        writer.write_u32::<BigEndian>(self.unlink_seqnum)?;
        writer.write_all(&[0u8; 24])
    }
}

/// USBIP_RET_SUBMIT (48 bytes, followed by IN data)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetSubmit {
    pub header: UrbHeader,
    /// 0 on success, negative errno otherwise
    pub status: i32,
    pub actual_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub error_count: u32,
}

impl RetSubmit {
    /// Size of the return in bytes, excluding payload
    pub const SIZE: usize = 48;

    /// Decode a return from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, Self::SIZE)?;
        let mut cursor = Cursor::new(bytes);
        Ok(Self {
            header: UrbHeader::read_from(&mut cursor)?,
            status: cursor.read_i32::<BigEndian>()?,
            actual_length: cursor.read_u32::<BigEndian>()?,
            start_frame: cursor.read_u32::<BigEndian>()?,
            number_of_packets: cursor.read_u32::<BigEndian>()?,
            error_count: cursor.read_u32::<BigEndian>()?,
        })
    }

    /// Write the return to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.header.write_to(writer)?;
        writer.write_i32::<BigEndian>(self.status)?;
        writer.write_u32::<BigEndian>(self.actual_length)?;
        writer.write_u32::<BigEndian>(self.start_frame)?;
        writer.write_u32::<BigEndian>(self.number_of_packets)?;
        writer.write_u32::<BigEndian>(self.error_count)?;
        writer.write_all(&[0u8; 8])
    }
}

/// USBIP_RET_UNLINK (48 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetUnlink {
    pub header: UrbHeader,
    pub status: i32,
}

impl RetUnlink {
    /// Size of the return in bytes
    pub const SIZE: usize = 48;

    /// Decode a return from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, Self::SIZE)?;
        let mut cursor = Cursor::new(bytes);
        Ok(Self {
            header: UrbHeader::read_from(&mut cursor)?,
            status: cursor.read_i32::<BigEndian>()?,
        })
    }

    /// Write the return to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.header.write_to(writer)?;
        writer.write_i32::<BigEndian>(self.status)?;
        writer.write_all(&[0u8; 24])
    }
}
