//! USB/IP operation codes, the exported device identity, and the records
//! describing it on the wire

use crate::error::{Result, ensure_len};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Cursor, Read, Write};

/// Request the list of exported devices
pub const OP_REQ_DEVLIST: u16 = 0x8005;
/// Reply to [`OP_REQ_DEVLIST`]
pub const OP_REP_DEVLIST: u16 = 0x0005;
/// Request to import (attach) a device by bus id
pub const OP_REQ_IMPORT: u16 = 0x8003;
/// Reply to [`OP_REQ_IMPORT`]
pub const OP_REP_IMPORT: u16 = 0x0003;

/// Submit an URB
pub const CMD_SUBMIT: u32 = 0x0000_0001;
/// Unlink (cancel) a previously submitted URB
pub const CMD_UNLINK: u32 = 0x0000_0002;
/// Completion of a submitted URB
pub const RET_SUBMIT: u32 = 0x0000_0003;
/// Completion of an unlink
pub const RET_UNLINK: u32 = 0x0000_0004;

/// Sysfs path reported for the exported device
pub const DEVICE_PATH: &str = "/sys/devices/pci0000:00/0000:00:01.2/usb1/1-1";
/// Bus id clients must name when importing the device
pub const DEVICE_BUS_ID: &str = "1-1";
/// TI-Nspire CX II vendor id
pub const DEVICE_VENDOR_ID: u16 = 0x0451;
/// TI-Nspire CX II product id
pub const DEVICE_PRODUCT_ID: u16 = 0xE022;
/// Vendor-specific interface class
pub const VENDOR_SPECIFIC_CLASS: u8 = 0xFF;

/// Standard device descriptor the emulated calculator reports
pub const DEVICE_DESCRIPTOR: [u8; 18] = [
    0x12, // bLength
    0x01, // bDescriptorType (Device)
    0x00, 0x02, // bcdUSB (2.00)
    0x00, // bDeviceClass
    0x00, // bDeviceSubClass
    0x00, // bDeviceProtocol
    0x40, // bMaxPacketSize0 (64 bytes)
    0x51, 0x04, // idVendor (0x0451)
    0x22, 0xE0, // idProduct (0xE022)
    0x00, 0x01, // bcdDevice (1.00)
    0x01, // iManufacturer
    0x02, // iProduct
    0x03, // iSerialNumber
    0x01, // bNumConfigurations
];

/// Configuration descriptor: one vendor-specific interface with a bulk pair
pub const CONFIGURATION_DESCRIPTOR: [u8; 32] = [
    // Configuration
    0x09, 0x02, 0x20, 0x00, // bLength, type, wTotalLength (32)
    0x01, 0x01, 0x00, // bNumInterfaces, bConfigurationValue, iConfiguration
    0x80, 0xFA, // bmAttributes (bus powered), bMaxPower (500 mA)
    // Interface 0
    0x09, 0x04, 0x00, 0x00, 0x02, // bLength, type, number, alternate, bNumEndpoints
    VENDOR_SPECIFIC_CLASS, 0x00, 0x00, 0x00, // class, subclass, protocol, iInterface
    // EP1 OUT, bulk, 512 bytes
    0x07, 0x05, 0x01, 0x02, 0x00, 0x02, 0x00,
    // EP1 IN, bulk, 512 bytes
    0x07, 0x05, 0x81, 0x02, 0x00, 0x02, 0x00,
];

/// `bRequest` of a standard GET_DESCRIPTOR request
pub const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
/// Descriptor type codes carried in the high byte of `wValue`
pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;

/// `enum usb_device_speed` value for high speed
pub const SPEED_HIGH: u32 = 3;

/// Width of the path field in a device record
pub const PATH_FIELD_LEN: usize = 256;
/// Width of the bus id field in device records and import requests
pub const BUS_ID_FIELD_LEN: usize = 32;

/// Transfer direction as carried in the URB header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

impl Direction {
    /// Interpret the raw header field: 0 is OUT, anything else is IN
    pub fn from_raw(raw: u32) -> Self {
        if raw == 0 { Direction::Out } else { Direction::In }
    }

    /// Wire value (`USBIP_DIR_OUT` = 0, `USBIP_DIR_IN` = 1)
    pub fn raw(self) -> u32 {
        match self {
            Direction::Out => 0,
            Direction::In => 1,
        }
    }
}

/// Device record as sent in OP_REP_DEVLIST and OP_REP_IMPORT (312 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub path: String,
    pub bus_id: String,
    pub busnum: u32,
    pub devnum: u32,
    pub speed: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub num_interfaces: u8,
}

impl DeviceRecord {
    /// Size of the record in bytes
    pub const SIZE: usize = PATH_FIELD_LEN + BUS_ID_FIELD_LEN + 12 + 6 + 6;

    /// The single device this server exports
    pub fn exported() -> Self {
        Self {
            path: DEVICE_PATH.to_string(),
            bus_id: DEVICE_BUS_ID.to_string(),
            busnum: 1,
            devnum: 2,
            speed: SPEED_HIGH,
            vendor_id: DEVICE_VENDOR_ID,
            product_id: DEVICE_PRODUCT_ID,
            bcd_device: 0x0100,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            configuration_value: 1,
            num_configurations: 1,
            num_interfaces: 1,
        }
    }

    /// Write the record to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        write_fixed_str(writer, &self.path, PATH_FIELD_LEN)?;
        write_fixed_str(writer, &self.bus_id, BUS_ID_FIELD_LEN)?;
        writer.write_u32::<BigEndian>(self.busnum)?;
        writer.write_u32::<BigEndian>(self.devnum)?;
        writer.write_u32::<BigEndian>(self.speed)?;
        writer.write_u16::<BigEndian>(self.vendor_id)?;
        writer.write_u16::<BigEndian>(self.product_id)?;
        writer.write_u16::<BigEndian>(self.bcd_device)?;
        writer.write_all(&[
            self.device_class,
            self.device_subclass,
            self.device_protocol,
            self.configuration_value,
            self.num_configurations,
            self.num_interfaces,
        ])
    }

    /// Decode a record from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, Self::SIZE)?;
        let mut cursor = Cursor::new(bytes);

        let mut path = [0u8; PATH_FIELD_LEN];
        cursor.read_exact(&mut path)?;
        let mut bus_id = [0u8; BUS_ID_FIELD_LEN];
        cursor.read_exact(&mut bus_id)?;

        let busnum = cursor.read_u32::<BigEndian>()?;
        let devnum = cursor.read_u32::<BigEndian>()?;
        let speed = cursor.read_u32::<BigEndian>()?;
        let vendor_id = cursor.read_u16::<BigEndian>()?;
        let product_id = cursor.read_u16::<BigEndian>()?;
        let bcd_device = cursor.read_u16::<BigEndian>()?;

        let mut tail = [0u8; 6];
        cursor.read_exact(&mut tail)?;

        Ok(Self {
            path: fixed_str(&path),
            bus_id: fixed_str(&bus_id),
            busnum,
            devnum,
            speed,
            vendor_id,
            product_id,
            bcd_device,
            device_class: tail[0],
            device_subclass: tail[1],
            device_protocol: tail[2],
            configuration_value: tail[3],
            num_configurations: tail[4],
            num_interfaces: tail[5],
        })
    }
}

/// Interface record following a device record in OP_REP_DEVLIST (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl InterfaceRecord {
    /// Size of the record in bytes, including the trailing pad byte
    pub const SIZE: usize = 4;

    /// The exported device's only interface
    pub fn exported() -> Self {
        Self {
            class: VENDOR_SPECIFIC_CLASS,
            subclass: 0,
            protocol: 0,
        }
    }

    /// Write the record to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&[self.class, self.subclass, self.protocol, 0])
    }

    /// Decode a record from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, Self::SIZE)?;
        Ok(Self {
            class: bytes[0],
            subclass: bytes[1],
            protocol: bytes[2],
        })
    }
}

/// The 8-byte setup stage of a control transfer
///
/// Multi-byte fields are little-endian, as they travel on the USB bus; the
/// USB/IP header carries the packet verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Size of a setup packet in bytes
    pub const SIZE: usize = 8;

    /// Parse the raw setup field
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Raw setup field
    pub fn to_bytes(self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    /// True when the data stage (if any) flows device-to-host
    pub fn is_device_to_host(self) -> bool {
        self.request_type & 0x80 != 0
    }
}

impl fmt::Display for SetupPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_bytes();
        write!(
            f,
            "{:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Compare a raw, NUL-padded bus id field against the exported device's bus id
///
/// The comparison stops at the first NUL and is case-sensitive.
pub fn bus_id_matches(raw: &[u8; BUS_ID_FIELD_LEN]) -> bool {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    &raw[..end] == DEVICE_BUS_ID.as_bytes()
}

/// Build a NUL-padded bus id field, as a client would send it
pub fn bus_id_field(bus_id: &str) -> [u8; BUS_ID_FIELD_LEN] {
    let mut field = [0u8; BUS_ID_FIELD_LEN];
    let len = bus_id.len().min(BUS_ID_FIELD_LEN - 1);
    field[..len].copy_from_slice(&bus_id.as_bytes()[..len]);
    field
}

fn write_fixed_str<W: Write>(writer: &mut W, s: &str, width: usize) -> std::io::Result<()> {
    // Always leave room for the terminating NUL.
    let len = s.len().min(width - 1);
    writer.write_all(&s.as_bytes()[..len])?;
    writer.write_all(&vec![0u8; width - len])
}

fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
