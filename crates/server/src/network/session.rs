//! Per-client session
//!
//! Reads one request at a time from the client, dispatches it, and writes any
//! synchronous reply before reading the next. IN transfers are parked in the
//! session's [`PendingUrbTable`] and completed later by the completion pump.

use super::completion::ReplyWriter;
use super::pending::{PendingRequest, PendingUrbTable};
use crate::usb::EmulatedDevice;
use anyhow::{Context, Result, anyhow};
use common::{VerboseFlag, verbose};
use protocol::{
    CmdSubmit, CmdUnlink, DEVICE_BUS_ID, Direction, ProtocolError, Request, bus_id_matches,
    encode_devlist_reply, encode_import_reply, encode_ret_submit, encode_ret_unlink,
    read_out_payload, read_request,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

/// One client connection's read-dispatch-reply loop
pub struct Session<R> {
    id: u64,
    peer: SocketAddr,
    reader: R,
    writer: ReplyWriter,
    pending: Arc<PendingUrbTable>,
    device: EmulatedDevice,
    verbose: VerboseFlag,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        id: u64,
        peer: SocketAddr,
        reader: R,
        writer: ReplyWriter,
        pending: Arc<PendingUrbTable>,
        device: EmulatedDevice,
        verbose: VerboseFlag,
    ) -> Self {
        Self {
            id,
            peer,
            reader,
            writer,
            pending,
            device,
            verbose,
        }
    }

    /// Serve requests until the client disconnects
    ///
    /// A clean disconnect (including a short read) returns `Ok`. A protocol
    /// desync or a failed write returns an error; either way the session is
    /// over and the caller closes the connection.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let request = match read_request(&mut self.reader).await {
                Ok(request) => request,
                Err(e) if e.is_disconnect() => {
                    debug!("Session {} ({}) ended: {}", self.id, self.peer, e);
                    return Ok(());
                }
                Err(ProtocolError::UnknownCommand(command)) => {
                    warn!(
                        "Protocol desync from {}: unknown command 0x{:08x}, closing session",
                        self.peer, command
                    );
                    return Err(anyhow!("unknown command 0x{:08x}", command));
                }
                Err(e) => {
                    return Err(e).context(format!("Failed to read request from {}", self.peer));
                }
            };

            self.dispatch(request).await?;
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<()> {
        match request {
            Request::DevList => {
                verbose!(self.verbose, "OP_REQ_DEVLIST from {}", self.peer);
                self.reply(&encode_devlist_reply()).await
            }
            Request::Import { bus_id } => {
                let matched = bus_id_matches(&bus_id);
                if matched {
                    info!("Client {} imported device {}", self.peer, DEVICE_BUS_ID);
                } else {
                    info!(
                        "Client {} requested unknown bus id {:?}",
                        self.peer,
                        String::from_utf8_lossy(&bus_id).trim_end_matches('\0')
                    );
                }
                self.reply(&encode_import_reply(matched)).await
            }
            Request::UnknownOp(code) => {
                verbose!(self.verbose, "Ignoring unsupported operation 0x{:04x}", code);
                Ok(())
            }
            Request::Submit(cmd) => self.handle_submit(cmd).await,
            Request::Unlink(cmd) => self.handle_unlink(cmd).await,
        }
    }

    async fn handle_submit(&mut self, cmd: CmdSubmit) -> Result<()> {
        let header = cmd.header;
        let direction = Direction::from_raw(header.direction);
        let length = cmd.transfer_buffer_length;

        verbose!(
            self.verbose,
            "CMD_SUBMIT seq {} EP{} {:?} len {}",
            header.seqnum,
            header.ep,
            direction,
            length
        );

        match direction {
            Direction::Out => {
                if header.ep == 0 {
                    self.deliver_setup(&cmd).await;
                }
                if header.ep != 0 || length > 0 {
                    let data = read_out_payload(&mut self.reader, length)
                        .await
                        .with_context(|| format!("Failed to read OUT data seq {}", header.seqnum))?;
                    self.device.deliver_out(header.ep, data).await;
                }

                let reply = encode_ret_submit(
                    header.seqnum,
                    header.devid,
                    Direction::Out.raw(),
                    header.ep,
                    0,
                    length,
                    &[],
                );
                self.reply(&reply).await
            }
            Direction::In => {
                let outstanding = self.pending.insert(PendingRequest {
                    seqnum: header.seqnum,
                    devid: header.devid,
                    ep: header.ep,
                    length,
                });
                if outstanding > 1 {
                    debug!(
                        "{} IN requests queued on EP{}, completing oldest first",
                        outstanding, header.ep
                    );
                }
                // Registered first so an immediate answer to the setup finds it
                if header.ep == 0 {
                    self.deliver_setup(&cmd).await;
                }
                Ok(())
            }
        }
    }

    async fn deliver_setup(&self, cmd: &CmdSubmit) {
        let setup = cmd.setup_packet();
        verbose!(self.verbose, "Setup packet: {}", setup);
        self.device.deliver_setup(setup).await;
    }

    async fn handle_unlink(&mut self, cmd: CmdUnlink) -> Result<()> {
        let header = cmd.header;
        let removed = self.pending.remove_seqnum(cmd.unlink_seqnum);

        verbose!(
            self.verbose,
            "CMD_UNLINK seq {} target {} ({})",
            header.seqnum,
            cmd.unlink_seqnum,
            if removed.is_some() { "dequeued" } else { "not pending" }
        );

        let reply = encode_ret_unlink(header.seqnum, header.devid, header.direction, 0);
        self.reply(&reply).await
    }

    async fn reply(&self, bytes: &[u8]) -> Result<()> {
        self.writer
            .send(bytes)
            .await
            .with_context(|| format!("Failed to write reply to {}", self.peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::{DEFAULT_PRESENT_PULSE, DEFAULT_RESET_PULSE};
    use common::DeviceCommand;
    use common::create_device_bridge;
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, RecordingDevice};
    use protocol::{
        CMD_SUBMIT, CMD_UNLINK, OP_REP_IMPORT, OP_REQ_IMPORT, OpHeader, RetSubmit, RetUnlink,
        SetupPacket, USBIP_VERSION, UrbHeader, bus_id_field,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    struct Harness {
        client: DuplexStream,
        pending: Arc<PendingUrbTable>,
        recorder: RecordingDevice,
        task: JoinHandle<Result<()>>,
    }

    fn start_session() -> Harness {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let (bridge, link) = create_device_bridge();
        let recorder = RecordingDevice::spawn(link);
        let device = EmulatedDevice::new(bridge, DEFAULT_PRESENT_PULSE, DEFAULT_RESET_PULSE);
        let pending = Arc::new(PendingUrbTable::new());

        let mut session = Session::new(
            1,
            "127.0.0.1:4000".parse().unwrap(),
            reader,
            ReplyWriter::new(writer),
            pending.clone(),
            device,
            VerboseFlag::new(true),
        );
        let task = tokio::spawn(async move { session.run().await });

        Harness {
            client,
            pending,
            recorder,
            task,
        }
    }

    fn submit(seqnum: u32, direction: Direction, ep: u32, length: u32, setup: [u8; 8]) -> Vec<u8> {
        let cmd = CmdSubmit {
            header: UrbHeader {
                command: CMD_SUBMIT,
                seqnum,
                devid: 0x0001_0002,
                direction: direction.raw(),
                ep,
            },
            transfer_flags: 0,
            transfer_buffer_length: length,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup,
        };
        let mut buf = Vec::new();
        cmd.write_to(&mut buf).unwrap();
        buf
    }

    async fn read_ret_submit(client: &mut DuplexStream) -> RetSubmit {
        let mut buf = [0u8; RetSubmit::SIZE];
        client.read_exact(&mut buf).await.unwrap();
        RetSubmit::decode(&buf).unwrap()
    }

    #[tokio::test]
    async fn test_import_rejects_unknown_bus_id() {
        let mut h = start_session();

        let mut request = Vec::new();
        OpHeader {
            version: USBIP_VERSION,
            code: OP_REQ_IMPORT,
            status: 0,
        }
        .write_to(&mut request)
        .unwrap();
        request.extend_from_slice(&bus_id_field("1-2"));
        h.client.write_all(&request).await.unwrap();

        let mut buf = [0u8; OpHeader::SIZE];
        h.client.read_exact(&mut buf).await.unwrap();
        let header = OpHeader::decode(&buf).unwrap();
        assert_eq!(header.code, OP_REP_IMPORT);
        assert_ne!(header.status, 0);

        // Connection stays usable after a rejection
        h.client
            .write_all(&submit(1, Direction::Out, 2, 0, [0; 8]))
            .await
            .unwrap();
        assert_eq!(read_ret_submit(&mut h.client).await.header.seqnum, 1);
    }

    #[tokio::test]
    async fn test_control_out_with_data() {
        let mut h = start_session();
        let setup = SetupPacket {
            request_type: 0x40,
            request: 0x01,
            value: 0,
            index: 0,
            length: 3,
        };

        let mut request = submit(7, Direction::Out, 0, 3, setup.to_bytes());
        request.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        h.client.write_all(&request).await.unwrap();

        let ret = read_ret_submit(&mut h.client).await;
        assert_eq!(ret.header.seqnum, 7);
        assert_eq!(ret.status, 0);
        assert_eq!(ret.actual_length, 3);

        assert!(
            h.recorder
                .wait_for(DEFAULT_TEST_TIMEOUT, |c| matches!(c, DeviceCommand::OutData { .. }))
                .await
        );
        assert_eq!(
            h.recorder.commands(),
            vec![
                DeviceCommand::Setup(setup),
                DeviceCommand::OutData {
                    ep: 0,
                    data: vec![0xAA, 0xBB, 0xCC]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_in_submit_is_parked_without_reply() {
        let mut h = start_session();

        h.client
            .write_all(&submit(42, Direction::In, 1, 64, [0; 8]))
            .await
            .unwrap();
        // A synchronous request behind it proves the IN submit was processed
        h.client
            .write_all(&submit(43, Direction::Out, 2, 0, [0; 8]))
            .await
            .unwrap();

        let ret = read_ret_submit(&mut h.client).await;
        assert_eq!(ret.header.seqnum, 43);
        assert_eq!(h.pending.outstanding_on(1), 1);
        assert_eq!(
            h.pending.take(1),
            Some(PendingRequest {
                seqnum: 42,
                devid: 0x0001_0002,
                ep: 1,
                length: 64
            })
        );
    }

    #[tokio::test]
    async fn test_unlink_acknowledges_and_dequeues() {
        let mut h = start_session();

        h.client
            .write_all(&submit(10, Direction::In, 1, 64, [0; 8]))
            .await
            .unwrap();

        let unlink = CmdUnlink {
            header: UrbHeader {
                command: CMD_UNLINK,
                seqnum: 11,
                devid: 0x0001_0002,
                direction: 0,
                ep: 1,
            },
            unlink_seqnum: 10,
        };
        let mut request = Vec::new();
        unlink.write_to(&mut request).unwrap();
        h.client.write_all(&request).await.unwrap();

        let mut buf = [0u8; RetUnlink::SIZE];
        h.client.read_exact(&mut buf).await.unwrap();
        let ret = RetUnlink::decode(&buf).unwrap();
        assert_eq!(ret.header.seqnum, 11);
        assert_eq!(ret.header.devid, 0x0001_0002);
        assert_eq!(ret.status, 0);
        assert!(h.pending.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_ends_session() {
        let h = start_session();
        let mut client = h.client;

        client.write_all(&[0, 0, 0, 9, 0, 0, 0, 0]).await.unwrap();
        let result = h.task.await.unwrap();
        assert!(result.is_err());

        // The session dropped its half; the client sees EOF
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_ends_session_cleanly() {
        let h = start_session();
        drop(h.client);
        assert!(h.task.await.unwrap().is_ok());
    }
}
