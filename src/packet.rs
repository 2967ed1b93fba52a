// SKDP Network Packet
// Wire layout: 21-byte little-endian header followed by the payload.
//
//   offset 0   flag       u8
//   offset 1   msg_len    u32
//   offset 5   sequence   u64
//   offset 13  utc_time   u64

use crate::error::{SkdpError, SkdpResult};
use crate::{time, HEADER_SIZE, MESSAGE_MAX, PACKET_TIME_THRESHOLD};
use zeroize::Zeroize;

/// Packet flag values indicating the type and purpose of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketFlag {
    /// No flag was selected.
    None = 0x00,
    /// The packet contains a connection request.
    ConnectRequest = 0x01,
    /// The packet contains a connection response.
    ConnectResponse = 0x02,
    /// The connection is to be terminated.
    ConnectionTerminate = 0x03,
    /// The packet contains an encrypted message.
    EncryptedMessage = 0x04,
    /// The packet contains an exchange request.
    ExchangeRequest = 0x05,
    /// The packet contains an exchange response.
    ExchangeResponse = 0x06,
    /// The packet contains an establish request.
    EstablishRequest = 0x07,
    /// The packet contains an establish response.
    EstablishResponse = 0x08,
    /// The packet contains an establish verify message.
    EstablishVerify = 0x09,
    /// The packet is a keep alive request.
    KeepAliveRequest = 0x0A,
    /// The session has been established.
    SessionEstablished = 0x0B,
    /// The connection experienced an error.
    ErrorCondition = 0xFF,
}

impl PacketFlag {
    /// Decodes a wire flag byte.
    pub fn from_u8(value: u8) -> SkdpResult<Self> {
        match value {
            0x00 => Ok(PacketFlag::None),
            0x01 => Ok(PacketFlag::ConnectRequest),
            0x02 => Ok(PacketFlag::ConnectResponse),
            0x03 => Ok(PacketFlag::ConnectionTerminate),
            0x04 => Ok(PacketFlag::EncryptedMessage),
            0x05 => Ok(PacketFlag::ExchangeRequest),
            0x06 => Ok(PacketFlag::ExchangeResponse),
            0x07 => Ok(PacketFlag::EstablishRequest),
            0x08 => Ok(PacketFlag::EstablishResponse),
            0x09 => Ok(PacketFlag::EstablishVerify),
            0x0A => Ok(PacketFlag::KeepAliveRequest),
            0x0B => Ok(PacketFlag::SessionEstablished),
            0xFF => Ok(PacketFlag::ErrorCondition),
            _ => Err(SkdpError::InvalidInput),
        }
    }

    /// Encodes the flag as its wire byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// An SKDP network packet with an owned payload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPacket {
    /// The packet flag.
    pub flag: PacketFlag,
    /// The payload length in bytes.
    pub msg_len: u32,
    /// The packet sequence number.
    pub sequence: u64,
    /// The packet creation time in UTC seconds from epoch.
    pub utc_time: u64,
    /// The payload.
    pub payload: Vec<u8>,
}

impl NetworkPacket {
    /// Creates a packet with the current UTC time stamped in the header.
    pub fn new(flag: PacketFlag, sequence: u64, payload: Vec<u8>) -> Self {
        NetworkPacket {
            flag,
            msg_len: payload.len() as u32,
            sequence,
            utc_time: time::epoch_seconds(),
            payload,
        }
    }

    /// Serializes the packet header.
    pub fn header_serialize(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = self.flag.to_u8();
        header[1..5].copy_from_slice(&self.msg_len.to_le_bytes());
        header[5..13].copy_from_slice(&self.sequence.to_le_bytes());
        header[13..21].copy_from_slice(&self.utc_time.to_le_bytes());
        header
    }

    /// Deserializes a packet header; the payload starts empty.
    pub fn header_deserialize(header: &[u8]) -> SkdpResult<Self> {
        if header.len() < HEADER_SIZE {
            return Err(SkdpError::InvalidInput);
        }
        let flag = PacketFlag::from_u8(header[0])?;
        let mut len4 = [0u8; 4];
        len4.copy_from_slice(&header[1..5]);
        let mut seq8 = [0u8; 8];
        seq8.copy_from_slice(&header[5..13]);
        let mut utc8 = [0u8; 8];
        utc8.copy_from_slice(&header[13..21]);
        Ok(NetworkPacket {
            flag,
            msg_len: u32::from_le_bytes(len4),
            sequence: u64::from_le_bytes(seq8),
            utc_time: u64::from_le_bytes(utc8),
            payload: Vec::new(),
        })
    }

    /// Serializes the packet into a contiguous byte stream.
    pub fn to_stream(&self) -> SkdpResult<Vec<u8>> {
        if self.msg_len as usize > MESSAGE_MAX || self.msg_len as usize != self.payload.len() {
            return Err(SkdpError::InvalidInput);
        }
        let mut stream = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        stream.extend_from_slice(&self.header_serialize());
        stream.extend_from_slice(&self.payload);
        Ok(stream)
    }

    /// Deserializes a byte stream into a packet, rejecting oversize or
    /// truncated payloads.
    pub fn from_stream(stream: &[u8]) -> SkdpResult<Self> {
        let mut packet = Self::header_deserialize(stream)?;
        let msg_len = packet.msg_len as usize;
        if msg_len > MESSAGE_MAX {
            return Err(SkdpError::InvalidInput);
        }
        if stream.len() < HEADER_SIZE + msg_len {
            return Err(SkdpError::ReceiveFailure);
        }
        packet.payload = stream[HEADER_SIZE..HEADER_SIZE + msg_len].to_vec();
        Ok(packet)
    }

    /// Stamps the header with the current UTC time in seconds.
    pub fn set_utc_time(&mut self) {
        self.utc_time = time::epoch_seconds();
    }

    /// Checks that the packet was created within the valid time threshold.
    pub fn time_valid(&self) -> bool {
        let now = time::epoch_seconds();
        now >= self.utc_time.saturating_sub(PACKET_TIME_THRESHOLD)
            && now <= self.utc_time.saturating_add(PACKET_TIME_THRESHOLD)
    }

    /// Zeroizes the payload and resets the packet state.
    pub fn clear(&mut self) {
        self.payload.zeroize();
        self.payload.clear();
        self.flag = PacketFlag::None;
        self.msg_len = 0;
        self.sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> NetworkPacket {
        NetworkPacket {
            flag: PacketFlag::EncryptedMessage,
            msg_len: 5,
            sequence: 42,
            utc_time: 1_700_000_000,
            payload: vec![1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let packet = sample_packet();
        let header = packet.header_serialize();
        let parsed = NetworkPacket::header_deserialize(&header).unwrap();
        assert_eq!(parsed.flag, packet.flag);
        assert_eq!(parsed.msg_len, packet.msg_len);
        assert_eq!(parsed.sequence, packet.sequence);
        assert_eq!(parsed.utc_time, packet.utc_time);
    }

    #[test]
    fn test_header_is_little_endian() {
        let packet = NetworkPacket {
            flag: PacketFlag::ConnectRequest,
            msg_len: 0x0102_0304,
            sequence: 0x1122_3344_5566_7788,
            utc_time: 0,
            payload: Vec::new(),
        };
        let header = packet.header_serialize();
        assert_eq!(header[0], 0x01);
        assert_eq!(&header[1..5], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(header[5], 0x88);
        assert_eq!(header[12], 0x11);
    }

    #[test]
    fn test_stream_roundtrip() {
        let packet = sample_packet();
        let stream = packet.to_stream().unwrap();
        assert_eq!(stream.len(), HEADER_SIZE + 5);
        let parsed = NetworkPacket::from_stream(&stream).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_oversize_stream_rejected() {
        let mut stream = vec![0u8; HEADER_SIZE + MESSAGE_MAX + 1];
        stream[0] = PacketFlag::EncryptedMessage.to_u8();
        stream[1..5].copy_from_slice(&((MESSAGE_MAX as u32) + 1).to_le_bytes());
        assert_eq!(
            NetworkPacket::from_stream(&stream).err(),
            Some(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let packet = sample_packet();
        let stream = packet.to_stream().unwrap();
        assert_eq!(
            NetworkPacket::from_stream(&stream[..stream.len() - 2]).err(),
            Some(SkdpError::ReceiveFailure)
        );
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let mut stream = sample_packet().to_stream().unwrap();
        stream[0] = 0x7E;
        assert_eq!(
            NetworkPacket::from_stream(&stream).err(),
            Some(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn test_time_window() {
        let mut packet = sample_packet();
        packet.set_utc_time();
        assert!(packet.time_valid());

        packet.utc_time -= PACKET_TIME_THRESHOLD * 2;
        assert!(!packet.time_valid());

        packet.set_utc_time();
        packet.utc_time += PACKET_TIME_THRESHOLD * 2;
        assert!(!packet.time_valid());
    }

    #[test]
    fn test_clear_resets_state() {
        let mut packet = sample_packet();
        packet.clear();
        assert_eq!(packet.flag, PacketFlag::None);
        assert_eq!(packet.msg_len, 0);
        assert_eq!(packet.sequence, 0);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_flag_codes_match_wire_values() {
        assert_eq!(PacketFlag::ConnectRequest.to_u8(), 0x01);
        assert_eq!(PacketFlag::ConnectionTerminate.to_u8(), 0x03);
        assert_eq!(PacketFlag::EncryptedMessage.to_u8(), 0x04);
        assert_eq!(PacketFlag::KeepAliveRequest.to_u8(), 0x0A);
        assert_eq!(PacketFlag::ErrorCondition.to_u8(), 0xFF);
        assert_eq!(
            PacketFlag::from_u8(0x09).unwrap(),
            PacketFlag::EstablishVerify
        );
    }
}
