//! Per-device packet capture
//!
//! Classic libpcap files with raw IPv4 link type. Headers are synthesised
//! from the simulated datagram; the payload starts with the sequence number
//! and send timestamp, the rest is zero and cut at the snap length.

use crate::link::{DeviceId, LinkFabric};
use crate::network::Datagram;
use crate::node::NodeRegistry;
use crate::time::SimTime;
use crate::trace::TraceError;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
pub const LINKTYPE_RAW: u32 = 101;
pub const SNAPLEN: u32 = 96;

const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const IPPROTO_UDP: u8 = 17;

/// Internet checksum over an IPv4 header
fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|pair| {
            let hi = pair[0] as u32;
            let lo = pair.get(1).copied().unwrap_or(0) as u32;
            (hi << 8) | lo
        })
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Wire image of a datagram, truncated to `snaplen`
pub fn encode_datagram(dgram: &Datagram, snaplen: usize) -> std::io::Result<(Vec<u8>, u32)> {
    let payload_len = dgram.payload as usize;
    let total_len = IPV4_HEADER_LEN + UDP_HEADER_LEN + payload_len;

    let mut header = Vec::with_capacity(IPV4_HEADER_LEN);
    header.write_u8(0x45)?;
    header.write_u8(0)?;
    header.write_u16::<BigEndian>(total_len.min(u16::MAX as usize) as u16)?;
    header.write_u16::<BigEndian>(dgram.id as u16)?;
    header.write_u16::<BigEndian>(0)?;
    header.write_u8(dgram.ttl)?;
    header.write_u8(IPPROTO_UDP)?;
    header.write_u16::<BigEndian>(0)?;
    header.write_u32::<BigEndian>(u32::from(*dgram.src.ip()))?;
    header.write_u32::<BigEndian>(u32::from(*dgram.dst.ip()))?;
    let checksum = ipv4_checksum(&header);
    header[10..12].copy_from_slice(&checksum.to_be_bytes());

    let mut packet = header;
    packet.write_u16::<BigEndian>(dgram.src.port())?;
    packet.write_u16::<BigEndian>(dgram.dst.port())?;
    packet.write_u16::<BigEndian>((UDP_HEADER_LEN + payload_len).min(u16::MAX as usize) as u16)?;
    packet.write_u16::<BigEndian>(0)?;

    // Sequence and timestamp, like a sequence/timestamp header
    let mut payload = Vec::with_capacity(12);
    payload.write_u32::<BigEndian>(dgram.seq)?;
    payload.write_u64::<BigEndian>(dgram.sent_at.as_nanos())?;
    payload.resize(payload_len, 0);
    packet.extend_from_slice(&payload[..payload_len.min(payload.len())]);

    packet.truncate(snaplen);
    Ok((packet, total_len as u32))
}

/// One capture file
pub struct PcapWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    packets: u64,
}

impl PcapWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| TraceError::Io {
            path: path.clone(),
            source,
        };
        let file = File::create(&path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        write_global_header(&mut writer).map_err(io_err)?;
        Ok(Self {
            path,
            writer,
            packets: 0,
        })
    }

    pub fn write(&mut self, at: SimTime, dgram: &Datagram) -> Result<(), TraceError> {
        self.write_record(at, dgram).map_err(|source| TraceError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.packets += 1;
        Ok(())
    }

    fn write_record(&mut self, at: SimTime, dgram: &Datagram) -> std::io::Result<()> {
        let (data, orig_len) = encode_datagram(dgram, SNAPLEN as usize)?;
        let nanos = at.as_nanos();
        self.writer
            .write_u32::<LittleEndian>((nanos / 1_000_000_000) as u32)?;
        self.writer
            .write_u32::<LittleEndian>(((nanos % 1_000_000_000) / 1_000) as u32)?;
        self.writer.write_u32::<LittleEndian>(data.len() as u32)?;
        self.writer.write_u32::<LittleEndian>(orig_len)?;
        self.writer.write_all(&data)
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> Result<(), TraceError> {
        self.writer.flush().map_err(|source| TraceError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn write_global_header(w: &mut impl Write) -> std::io::Result<()> {
    w.write_u32::<LittleEndian>(PCAP_MAGIC)?;
    w.write_u16::<LittleEndian>(2)?;
    w.write_u16::<LittleEndian>(4)?;
    w.write_i32::<LittleEndian>(0)?;
    w.write_u32::<LittleEndian>(0)?;
    w.write_u32::<LittleEndian>(SNAPLEN)?;
    w.write_u32::<LittleEndian>(LINKTYPE_RAW)
}

/// One capture file per device, named `<prefix>-<node>-<device>.pcap`
pub struct PcapSet {
    writers: BTreeMap<DeviceId, PcapWriter>,
}

impl PcapSet {
    pub fn create(
        dir: impl AsRef<Path>,
        prefix: &str,
        registry: &NodeRegistry,
        fabric: &LinkFabric,
    ) -> Result<Self, TraceError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| TraceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut writers = BTreeMap::new();
        for device in fabric.devices() {
            let node = registry.name(device.node).unwrap_or("node");
            let path = dir.join(format!("{}-{}-{}.pcap", prefix, node, device.id));
            writers.insert(device.id, PcapWriter::create(path)?);
        }
        debug!("Opened {} capture files in {}", writers.len(), dir.display());
        Ok(Self { writers })
    }

    pub fn write(&mut self, device: DeviceId, at: SimTime, dgram: &Datagram) -> Result<(), TraceError> {
        match self.writers.get_mut(&device) {
            Some(writer) => writer.write(at, dgram),
            None => Ok(()),
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.writers.values().map(|w| w.path().to_path_buf()).collect()
    }

    pub fn packets(&self, device: DeviceId) -> u64 {
        self.writers.get(&device).map_or(0, PcapWriter::packets)
    }

    pub fn finish(mut self) -> Result<Vec<PathBuf>, TraceError> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(self.paths())
    }
}

/// Source address of an encoded packet
pub fn source_of(packet: &[u8]) -> Option<Ipv4Addr> {
    let bytes: [u8; 4] = packet.get(12..16)?.try_into().ok()?;
    Some(Ipv4Addr::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::DatagramKind;
    use crate::traffic::AppId;
    use std::net::SocketAddrV4;

    fn datagram(payload: u32) -> Datagram {
        Datagram {
            id: 7,
            app: AppId::from_index(0),
            kind: DatagramKind::Data,
            src: SocketAddrV4::new(Ipv4Addr::new(7, 0, 0, 2), 49153),
            dst: SocketAddrV4::new(Ipv4Addr::new(1, 0, 0, 2), 2001),
            payload,
            seq: 3,
            sent_at: SimTime::from_millis(500),
            ttl: 64,
        }
    }

    #[test]
    fn test_encode_headers() {
        let (data, orig) = encode_datagram(&datagram(1024), 96).unwrap();
        assert_eq!(orig, 1052);
        assert_eq!(data.len(), 96);
        assert_eq!(data[0], 0x45);
        assert_eq!(u16::from_be_bytes([data[2], data[3]]), 1052);
        assert_eq!(data[9], IPPROTO_UDP);
        assert_eq!(source_of(&data), Some(Ipv4Addr::new(7, 0, 0, 2)));
        assert_eq!(u16::from_be_bytes([data[22], data[23]]), 2001);
        // Header checksum verifies to zero
        assert_eq!(ipv4_checksum(&data[..20]), 0);
        // Sequence number at the start of the payload
        assert_eq!(u32::from_be_bytes([data[28], data[29], data[30], data[31]]), 3);
    }

    #[test]
    fn test_small_payload_not_padded() {
        let (data, orig) = encode_datagram(&datagram(4), 96).unwrap();
        assert_eq!(orig, 32);
        assert_eq!(data.len(), 32);
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev0.pcap");
        let mut writer = PcapWriter::create(&path).unwrap();
        writer.write(SimTime::from_millis(1500), &datagram(1024)).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.packets(), 1);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 24 + 16 + 96);
        assert_eq!(&bytes[0..4], &PCAP_MAGIC.to_le_bytes());
        assert_eq!(&bytes[20..24], &LINKTYPE_RAW.to_le_bytes());
        // ts_sec = 1, ts_usec = 500000
        assert_eq!(&bytes[24..28], &1u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &500_000u32.to_le_bytes());
    }
}
