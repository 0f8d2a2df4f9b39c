use std::{fmt, net::Ipv4Addr, time::Duration};

use afpacket::tokio::{FilterProgram, RawPacketStream};
use pnet::{
    packet::ethernet::{EtherTypes, EthernetPacket},
    util::MacAddr,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::constants::RECV_BUF_LEN;
use crate::error::{Error, Result};

const BPF_LD_H_ABS: u16 = 0x28;
const BPF_LD_W_ABS: u16 = 0x20;
const BPF_JEQ_K: u16 = 0x15;
const BPF_RET_K: u16 = 0x06;
const BPF_SNAPLEN: u32 = 0x40000;

/// Addresses the scan sends from.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct LocalAddrs {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// Admits ARP frames whose Ethernet destination is the local MAC address.
///
/// The filter is installed once per scan and is not narrowed to the address
/// currently being queried.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CaptureFilter {
    mac: MacAddr,
}

impl CaptureFilter {
    pub fn for_mac(mac: MacAddr) -> Self {
        Self { mac }
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// Classic BPF program equivalent to [`CaptureFilter::matches`], as emitted by
    /// `tcpdump -dd 'arp and ether dst <mac>'`.
    pub fn bpf_program(&self) -> FilterProgram {
        let MacAddr(m0, m1, m2, m3, m4, m5) = self.mac();
        let mac_low = u32::from_be_bytes([m2, m3, m4, m5]);
        let mac_high = u32::from(u16::from_be_bytes([m0, m1]));
        vec![
            (BPF_LD_H_ABS, 0, 0, 12),
            (BPF_JEQ_K, 0, 5, u32::from(EtherTypes::Arp.0)),
            (BPF_LD_W_ABS, 0, 0, 2),
            (BPF_JEQ_K, 0, 3, mac_low),
            (BPF_LD_H_ABS, 0, 0, 0),
            (BPF_JEQ_K, 0, 1, mac_high),
            (BPF_RET_K, 0, 0, BPF_SNAPLEN),
            (BPF_RET_K, 0, 0, 0),
        ]
    }

    pub fn matches(&self, frame: &[u8]) -> bool {
        EthernetPacket::new(frame).is_some_and(|eth| {
            eth.get_ethertype() == EtherTypes::Arp && eth.get_destination() == self.mac
        })
    }
}

/// The tcpdump form of the filter, e.g. `arp and ether dst 02:00:00:00:00:01`.
impl fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arp and ether dst {}", self.mac)
    }
}

/// A link-layer session the resolver transmits on and polls for replies.
///
/// `open` is called once before the first `send`, `close` once after the last
/// `try_receive`.
#[allow(async_fn_in_trait)]
pub trait Session {
    async fn open(&mut self, filter: CaptureFilter) -> Result<()>;

    async fn send(&mut self, frame: &[u8]) -> std::io::Result<()>;

    /// Waits at most `timeout` for a frame admitted by the filter.
    ///
    /// `Ok(None)` means nothing arrived in time.
    async fn try_receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    async fn close(&mut self) -> Result<()>;
}

/// [`Session`] over an `AF_PACKET` socket bound to one interface.
///
/// The capture filter is attached to the socket as a BPF program, so the kernel
/// only queues matching frames. Frames read are checked against it once more.
#[derive(Debug)]
pub struct AfPacketSession {
    interface_name: String,
    stream: Option<RawPacketStream>,
    filter: Option<CaptureFilter>,
}

impl AfPacketSession {
    pub fn new(interface_name: &str) -> Self {
        Self {
            interface_name: interface_name.into(),
            stream: None,
            filter: None,
        }
    }
}

impl Session for AfPacketSession {
    async fn open(&mut self, filter: CaptureFilter) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::Resource("session is already open".into()));
        }
        let mut stream = RawPacketStream::new().map_err(|err| {
            Error::Resource(format!("failed to create packet stream, reason: {}", err))
        })?;
        stream.set_bpf_filter(filter.bpf_program()).map_err(|err| {
            Error::Resource(format!("failed to attach filter `{}`, reason: {}", filter, err))
        })?;
        stream.bind(&self.interface_name).map_err(|err| {
            Error::Resource(format!(
                "failed to bind interface {} to stream, reason: {}",
                self.interface_name, err
            ))
        })?;
        // frames queued before the filter was attached
        stream.drain();
        log::debug!("opened {} with filter `{}`", self.interface_name, filter);
        self.stream = Some(stream);
        self.filter = Some(filter);
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> std::io::Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "session is not open")
        })?;
        stream.write_all(frame).await
    }

    async fn try_receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let (Some(stream), Some(filter)) = (self.stream.as_mut(), self.filter) else {
            return Err(Error::Resource("session is not open".into()));
        };
        let mut buf = [0; RECV_BUF_LEN];
        loop {
            match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(0)) => return Err(Error::Resource("packet stream closed".into())),
                Ok(Ok(read_bytes)) if filter.matches(&buf[..read_bytes]) => {
                    return Ok(Some(buf[..read_bytes].to_vec()))
                }
                Ok(Ok(_)) => continue,
                Ok(Err(err)) => {
                    return Err(Error::Resource(format!(
                        "error while reading the interface traffic, reason: {}",
                        err
                    )))
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| Error::Resource("session is not open".into()))?;
        self.filter = None;
        stream.shutdown().await.map_err(|err| {
            Error::Resource(format!("failed to close packet stream, reason: {}", err))
        })?;
        log::debug!("closed {}", self.interface_name);
        Ok(())
    }
}
