//! Build one test packet, send it on a raw socket and wait for the answer.
//!
//! A [`Probe`] is a complete IPv4 packet carrying an ICMP echo request, a TCP
//! SYN or an empty UDP datagram. It is written with the crate's own builders
//! and sent with `IP_HDRINCL` semantics, so the bytes on the wire are exactly
//! the bytes built here. Replies are read from raw sockets and recognised with
//! the crate's own readers, see [`Probe::match_reply`].
//!
//! Raw sockets need `CAP_NET_RAW`; without it [`send_probe`] fails with
//! [`Error::IoError`].
use crate::config::{CraftConfig, Protocol};
use crate::ipv4::{self, Dscp, Ecn, Flags};
use crate::{icmp, tcp, udp, Error, Result};
use chrono::{DateTime, Local, TimeZone};
use log::{debug, info, warn};
use rand::Rng;
use std::fmt;
use std::fs;
use std::io;
use std::mem::{self, size_of};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How long to wait for a reply after sending.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Directory the capture trace is written to.
pub const LOG_DIR: &str = "logs";

const TTL: u8 = 64;
const TCP_WINDOW: u16 = 8192;
const CAPTURE_WARMUP: Duration = Duration::from_millis(500);
const MAX_PACKET: usize = 65536;

/// A crafted IPv4 packet and the identifiers needed to recognise its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    packet: ipv4::Packet<Vec<u8>>,
    protocol: Protocol,
    source_port: u16,
    dest_port: u16,
    sequence: u32,
    ident: u16,
}

impl Probe {
    /// Build the probe described by `config`, sent from `source`. Random
    /// values (IP identification, TCP sequence number, ICMP identifier) come
    /// from `rng`.
    ///
    /// # Errors
    ///
    /// Only fails if a builder rejects its buffer, which the sizes used here
    /// rule out.
    pub fn build<R: Rng + ?Sized>(
        config: &CraftConfig,
        source: Ipv4Addr,
        rng: &mut R,
    ) -> Result<Self> {
        let dest = config.dest;
        let sequence: u32 = rng.gen();
        let ident: u16 = rng.gen();

        let transport = match config.protocol {
            Protocol::Icmp => icmp::Packet::<&[u8]>::builder(vec![0; icmp::HEADER_LEN])?
                .typ(icmp::ECHO_REQUEST)
                .code(0)
                .ident(ident)
                .sequence(1)
                .gen_checksum()
                .build()
                .as_bytes()
                .to_vec(),
            Protocol::Tcp => tcp::Segment::<&[u8]>::builder(vec![0; tcp::HEADER_LEN])?
                .source(config.source_port)
                .dest(config.dest_port)
                .sequence(sequence)
                .acked(0)
                .data_offset(5)
                .flags(tcp::Flags::syn())
                .window(TCP_WINDOW)
                .urgent(0)
                .gen_checksum(source, dest)
                .build()
                .as_bytes()
                .to_vec(),
            Protocol::Udp => {
                #[allow(clippy::cast_possible_truncation)]
                let len = udp::HEADER_LEN as u16;
                udp::Datagram::<&[u8]>::builder(vec![0; udp::HEADER_LEN])?
                    .source(config.source_port)
                    .dest(config.dest_port)
                    .len(len)
                    .gen_checksum(source, dest)
                    .build()
                    .as_bytes()
                    .to_vec()
            }
        };

        let total = ipv4::HEADER_LEN + transport.len();
        #[allow(clippy::cast_possible_truncation)]
        let packet = ipv4::Packet::<&[u8]>::builder(vec![0; total])?
            .version(4)
            .header_len(ipv4::HEADER_LEN as u8)
            .dscp(Dscp::new(0, 0)?)
            .ecn(Ecn::new(false, false))
            .len(total as u16)
            .id(rng.gen_range(1..=u16::MAX))
            .flags(Flags::new(false, false))
            .fragment_offset(0)
            .ttl(TTL)
            .protocol(config.protocol.into())
            .source(source)
            .dest(dest)
            .payload(transport.as_slice())?
            .gen_checksum()
            .build();

        Ok(Self {
            packet,
            protocol: config.protocol,
            source_port: config.source_port,
            dest_port: config.dest_port,
            sequence,
            ident,
        })
    }

    /// The IPv4 packet to put on the wire.
    #[must_use]
    pub fn packet(&self) -> &ipv4::Packet<Vec<u8>> {
        &self.packet
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.packet.as_bytes()
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Recognise a received IPv4 packet as the answer to this probe.
    ///
    /// TCP answers must come back from the probed port and acknowledge the
    /// SYN. Echo replies must carry the probe's identifier. ICMP errors are
    /// accepted from any router as long as the IP header they quote is the
    /// probe's. Anything else, including the probe itself seen on loopback,
    /// yields [`None`].
    #[must_use]
    pub fn match_reply(&self, bytes: &[u8]) -> Option<Reply> {
        let packet = ipv4::Packet::new(bytes).ok()?;
        match packet.protocol() {
            ipv4::Protocol::Tcp => self.match_tcp(&packet),
            ipv4::Protocol::Udp => self.match_udp(&packet),
            ipv4::Protocol::Icmp => self.match_icmp(&packet),
            ipv4::Protocol::Unknown(_) => None,
        }
    }

    fn is_answer<B: AsRef<[u8]>>(&self, packet: &ipv4::Packet<B>) -> bool {
        packet.source() == self.packet.dest() && packet.dest() == self.packet.source()
    }

    fn match_tcp<B: AsRef<[u8]>>(&self, packet: &ipv4::Packet<B>) -> Option<Reply> {
        if self.protocol != Protocol::Tcp || !self.is_answer(packet) {
            return None;
        }
        let segment = tcp::Segment::new(packet.payload()).ok()?;
        if segment.source() != self.dest_port || segment.dest() != self.source_port {
            return None;
        }

        let from = packet.source();
        let port = segment.source();
        let flags = segment.flags();
        if flags.reset_conn() {
            Some(Reply::Reset { from, port })
        } else if flags.synchronize()
            && flags.ack_significant()
            && segment.acked() == self.sequence.wrapping_add(1)
        {
            Some(Reply::SynAck { from, port })
        } else {
            None
        }
    }

    fn match_udp<B: AsRef<[u8]>>(&self, packet: &ipv4::Packet<B>) -> Option<Reply> {
        if self.protocol != Protocol::Udp || !self.is_answer(packet) {
            return None;
        }
        let datagram = udp::Datagram::new(packet.payload()).ok()?;
        if datagram.source() != self.dest_port || datagram.dest() != self.source_port {
            return None;
        }
        Some(Reply::Datagram {
            from: packet.source(),
            port: datagram.source(),
        })
    }

    fn match_icmp<B: AsRef<[u8]>>(&self, packet: &ipv4::Packet<B>) -> Option<Reply> {
        let message = icmp::Packet::new(packet.payload()).ok()?;
        let from = packet.source();

        match message.typ() {
            icmp::ECHO_REPLY => (self.protocol == Protocol::Icmp
                && self.is_answer(packet)
                && message.ident() == self.ident)
                .then_some(Reply::EchoReply {
                    from,
                    sequence: message.sequence(),
                }),
            icmp::DEST_UNREACHABLE => self.quotes_probe(message.payload()).then_some(
                Reply::Unreachable {
                    from,
                    code: message.code(),
                },
            ),
            icmp::TIME_EXCEEDED => self
                .quotes_probe(message.payload())
                .then_some(Reply::TimeExceeded { from }),
            _ => None,
        }
    }

    // ICMP errors quote the offending IP header, which routers leave intact
    // apart from the TTL and checksum.
    fn quotes_probe(&self, quoted: &[u8]) -> bool {
        let Ok(quoted) = ipv4::Packet::new(quoted) else {
            return false;
        };
        quoted.source() == self.packet.source()
            && quoted.dest() == self.packet.dest()
            && quoted.id() == self.packet.id()
            && quoted.protocol() == self.packet.protocol()
    }
}

/// An answer to a [`Probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// The TCP port is open.
    SynAck { from: Ipv4Addr, port: u16 },
    /// The TCP port is closed.
    Reset { from: Ipv4Addr, port: u16 },
    EchoReply { from: Ipv4Addr, sequence: u16 },
    /// A UDP datagram sent back from the probed port.
    Datagram { from: Ipv4Addr, port: u16 },
    /// An ICMP destination unreachable message quoting the probe.
    Unreachable { from: Ipv4Addr, code: u8 },
    TimeExceeded { from: Ipv4Addr },
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::SynAck { from, port } => write!(f, "SYN-ACK from {from}:{port}"),
            Reply::Reset { from, port } => write!(f, "RST from {from}:{port}"),
            Reply::EchoReply { from, sequence } => {
                write!(f, "echo reply from {from} (seq {sequence})")
            }
            Reply::Datagram { from, port } => write!(f, "UDP datagram from {from}:{port}"),
            Reply::Unreachable { from, code } => {
                write!(f, "destination unreachable (code {code}) from {from}")
            }
            Reply::TimeExceeded { from } => write!(f, "time exceeded from {from}"),
        }
    }
}

/// What happened to a probe sent with [`send_probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub probe: Probe,
    pub sent: usize,
    pub reply: Option<Reply>,
    pub trace: Option<PathBuf>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let packet = self.probe.packet();
        writeln!(
            f,
            "Sent {} bytes of {} from {} to {}",
            self.sent,
            self.probe.protocol(),
            packet.source(),
            packet.dest()
        )?;
        match &self.reply {
            Some(reply) => write!(f, "Received {reply}")?,
            None => write!(f, "No reply within {}s", REPLY_TIMEOUT.as_secs())?,
        }
        if let Some(trace) = &self.trace {
            write!(f, "\nTrace written to {}", trace.display())?;
        }
        Ok(())
    }
}

/// Build the probe described by `config`, send it and wait up to
/// [`REPLY_TIMEOUT`] for a reply. With `config.trace` set, a `tcpdump`
/// capture of the exchange is written under [`LOG_DIR`].
///
/// # Errors
///
/// Fails with [`Error::IoError`] when a raw socket cannot be opened or the
/// probe cannot be sent, or when the capture process cannot be started.
pub fn send_probe(config: &CraftConfig) -> Result<Report> {
    let source = match config.source {
        Some(source) => source,
        None => resolve_source(config.dest)?,
    };
    let probe = Probe::build(config, source, &mut rand::thread_rng())?;
    debug!(
        "built {} probe of {} bytes: {:02x?}",
        probe.protocol(),
        probe.as_bytes().len(),
        probe.as_bytes()
    );

    let capture = if config.trace {
        Some(Capture::start(config.dest, &Local::now())?)
    } else {
        None
    };

    // Listen before sending so a fast reply is not missed.
    let listeners = reply_protocols(config.protocol)
        .iter()
        .map(|&protocol| RawSocket::open(protocol))
        .collect::<Result<Vec<_>>>()?;
    let sender = RawSocket::open(libc::IPPROTO_RAW)?;

    let sent = sender.send_to(probe.as_bytes(), config.dest)?;
    info!("sent {sent} of {} bytes to {}", probe.as_bytes().len(), config.dest);

    let reply = wait_for_reply(&listeners, &probe, REPLY_TIMEOUT)?;
    match &reply {
        Some(reply) => info!("received {reply}"),
        None => info!("no reply within {REPLY_TIMEOUT:?}"),
    }

    let trace = capture.map(Capture::stop).transpose()?;
    Ok(Report {
        probe,
        sent,
        reply,
        trace,
    })
}

/// The local address the kernel would send from to reach `dest`.
///
/// # Errors
///
/// Fails with [`Error::IoError`] when there is no route to `dest`.
pub fn resolve_source(dest: Ipv4Addr) -> Result<Ipv4Addr> {
    // Connecting a UDP socket only selects a route, nothing is sent.
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(Error::IoError)?;
    socket.connect((dest, 9)).map_err(Error::IoError)?;
    match socket.local_addr().map_err(Error::IoError)?.ip() {
        IpAddr::V4(source) => Ok(source),
        IpAddr::V6(source) => Err(Error::InvalidAddress(source.to_string())),
    }
}

/// Path of the capture file for a trace started at `at`.
pub fn trace_path<Tz: TimeZone>(at: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: fmt::Display,
{
    Path::new(LOG_DIR).join(at.format("%Y%m%d%H%M").to_string())
}

// Raw socket protocols a reply to a probe can arrive on.
fn reply_protocols(protocol: Protocol) -> &'static [libc::c_int] {
    match protocol {
        Protocol::Icmp => &[libc::IPPROTO_ICMP],
        Protocol::Tcp => &[libc::IPPROTO_TCP, libc::IPPROTO_ICMP],
        Protocol::Udp => &[libc::IPPROTO_UDP, libc::IPPROTO_ICMP],
    }
}

fn wait_for_reply(
    listeners: &[RawSocket],
    probe: &Probe,
    timeout: Duration,
) -> Result<Option<Reply>> {
    let deadline = Instant::now() + timeout;
    let mut buf = vec![0; MAX_PACKET];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        for listener in poll(listeners, remaining)? {
            let read = match listener.recv(&mut buf) {
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::IoError(err)),
            };
            match probe.match_reply(&buf[..read]) {
                Some(reply) => return Ok(Some(reply)),
                None => debug!("ignoring unrelated packet of {read} bytes"),
            }
        }
    }
}

// Sockets with data to read, waiting at most `timeout`.
fn poll(sockets: &[RawSocket], timeout: Duration) -> Result<Vec<&RawSocket>> {
    let mut fds: Vec<libc::pollfd> = sockets
        .iter()
        .map(|socket| libc::pollfd {
            fd: socket.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let millis = libc::c_int::try_from(timeout.as_millis().max(1)).unwrap_or(libc::c_int::MAX);

    // SAFETY: `fds` is a valid array of `fds.len()` pollfd structs.
    #[allow(clippy::cast_possible_truncation)]
    let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Vec::new());
        }
        return Err(Error::IoError(err));
    }

    Ok(sockets
        .iter()
        .zip(&fds)
        .filter(|(_, fd)| fd.revents & libc::POLLIN != 0)
        .map(|(socket, _)| socket)
        .collect())
}

/// An `AF_INET` raw socket, closed on drop.
struct RawSocket {
    fd: OwnedFd,
}

impl RawSocket {
    fn open(protocol: libc::c_int) -> Result<Self> {
        // SAFETY: socket(2) takes no pointers; the descriptor is owned only
        // once it is known to be valid.
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, protocol) };
        if fd < 0 {
            return Err(Error::IoError(io::Error::last_os_error()));
        }
        debug!("opened raw socket for protocol {protocol}");
        // SAFETY: `fd` was just returned by socket(2), is valid and is not
        // owned by anything else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd })
    }

    // With IPPROTO_RAW the buffer must start with the IPv4 header.
    #[allow(clippy::cast_possible_truncation)]
    fn send_to(&self, buf: &[u8], dest: Ipv4Addr) -> Result<usize> {
        // SAFETY: sockaddr_in is plain data, all zeroes is a valid value.
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr = libc::in_addr {
            s_addr: u32::from_ne_bytes(dest.octets()),
        };

        // SAFETY: `buf` and `addr` outlive the call and their lengths are
        // passed alongside them.
        let sent = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                0,
                std::ptr::addr_of!(addr).cast(),
                size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        usize::try_from(sent).map_err(|_| Error::IoError(io::Error::last_os_error()))
    }

    // Raw IPv4 sockets deliver whole packets, header included.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let read = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };
        usize::try_from(read).map_err(|_| io::Error::last_os_error())
    }
}

/// A running `tcpdump` writing the exchange with one host to a file.
struct Capture {
    child: Child,
    path: PathBuf,
}

impl Capture {
    fn start<Tz: TimeZone>(dest: Ipv4Addr, at: &DateTime<Tz>) -> Result<Self>
    where
        Tz::Offset: fmt::Display,
    {
        fs::create_dir_all(LOG_DIR).map_err(Error::IoError)?;
        let path = trace_path(at);
        let child = Command::new("tcpdump")
            .args(["-i", "any", "-U", "-w"])
            .arg(&path)
            .args(["host", &dest.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(Error::IoError)?;
        info!("capturing to {} (pid {})", path.display(), child.id());

        // tcpdump needs a moment to open the interface.
        thread::sleep(CAPTURE_WARMUP);
        Ok(Self { child, path })
    }

    fn stop(mut self) -> Result<PathBuf> {
        if let Err(err) = self.child.kill() {
            warn!("capture process already exited: {err}");
        }
        let status = self.child.wait().map_err(Error::IoError)?;
        debug!("capture process stopped with {status}");
        Ok(mem::take(&mut self.path))
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
