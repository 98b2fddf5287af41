use crossbeam_channel::Sender;
use log::info;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Transport end of the publish path: takes one encoded NetworkMessage per
/// call.
pub trait FrameSink: Send {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// In-process sink, each frame becomes one message on the channel.
impl FrameSink for Sender<Vec<u8>> {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "frame receiver dropped"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastOptions {
    pub ttl: u32,
    pub loopback: bool,
    /// Outgoing interface address; unspecified lets the kernel route.
    pub interface: Ipv4Addr,
}

impl Default for MulticastOptions {
    fn default() -> Self {
        MulticastOptions {
            ttl: 1,
            loopback: false,
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// UDP sink sending every frame to one (multicast) destination.
#[derive(Debug)]
pub struct MulticastSink {
    socket: UdpSocket,
    destination: SocketAddrV4,
}

impl MulticastSink {
    pub fn open(destination: SocketAddrV4, options: &MulticastOptions) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if destination.ip().is_multicast() {
            socket.set_multicast_ttl_v4(options.ttl)?;
            socket.set_multicast_loop_v4(options.loopback)?;
            if !options.interface.is_unspecified() {
                socket.set_multicast_if_v4(&options.interface)?;
            }
        }
        let bind: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into();
        socket.bind(&bind.into())?;
        info!(
            "Multicast sink ready: dst={} ttl={} loop={} if={}",
            destination, options.ttl, options.loopback, options.interface
        );
        Ok(MulticastSink {
            socket: socket.into(),
            destination,
        })
    }
}

impl FrameSink for MulticastSink {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(frame, self.destination)?;
        if sent != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, frame.len()),
            ));
        }
        Ok(())
    }
}
