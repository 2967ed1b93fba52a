// SKDP Error Types

use thiserror::Error;

/// SKDP error taxonomy.
///
/// Every variant maps to a fixed u8 code so errors can be transmitted in a
/// terminate or error-condition packet and surfaced verbatim by the peer.
/// All errors are non-recoverable at the session level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkdpError {
    /// The cipher authentication has failed.
    #[error("the cipher authentication has failed")]
    CipherAuthFailure,

    /// The key exchange authentication has failed.
    #[error("the key exchange authentication has failed")]
    KexAuthFailure,

    /// The keep alive check failed.
    #[error("the keep alive check failed")]
    BadKeepAlive,

    /// The communications channel has failed.
    #[error("the communications channel has failed")]
    ChannelDown,

    /// The device could not make a connection to the remote host.
    #[error("the device could not make a connection to the remote host")]
    ConnectionFailure,

    /// The transmission failed at the key exchange establish phase.
    #[error("the transmission failed at the kex establish phase")]
    EstablishFailure,

    /// The input provided is invalid.
    #[error("the input is invalid")]
    InvalidInput,

    /// The keep alive has expired with no response.
    #[error("the keep alive has expired with no response")]
    KeepAliveExpired,

    /// The key identity is not recognized.
    #[error("the key-id is not recognized")]
    KeyNotRecognized,

    /// The random generator experienced a failure.
    #[error("the random generator experienced a failure")]
    RandomFailure,

    /// The receiver failed at the network layer.
    #[error("the receiver failed at the network layer")]
    ReceiveFailure,

    /// The transmitter failed at the network layer.
    #[error("the transmitter failed at the network layer")]
    TransmitFailure,

    /// The protocol version is unknown.
    #[error("the protocol version is unknown")]
    UnknownProtocol,

    /// The packet was received out of sequence.
    #[error("the packet was received out of sequence")]
    Unsequenced,

    /// The packet valid-time was exceeded.
    #[error("the packet valid-time was exceeded")]
    PacketExpired,

    /// A general failure occurred.
    #[error("the connection experienced an error")]
    GeneralFailure,
}

impl SkdpError {
    /// Returns the wire code for this error.
    pub fn to_code(self) -> u8 {
        match self {
            SkdpError::CipherAuthFailure => 0x01,
            SkdpError::KexAuthFailure => 0x02,
            SkdpError::BadKeepAlive => 0x03,
            SkdpError::ChannelDown => 0x04,
            SkdpError::ConnectionFailure => 0x05,
            SkdpError::EstablishFailure => 0x06,
            SkdpError::InvalidInput => 0x07,
            SkdpError::KeepAliveExpired => 0x08,
            SkdpError::KeyNotRecognized => 0x09,
            SkdpError::RandomFailure => 0x0A,
            SkdpError::ReceiveFailure => 0x0B,
            SkdpError::TransmitFailure => 0x0C,
            SkdpError::UnknownProtocol => 0x0D,
            SkdpError::Unsequenced => 0x0E,
            SkdpError::PacketExpired => 0x0F,
            SkdpError::GeneralFailure => 0xFF,
        }
    }

    /// Decodes a wire error code. `0x00` means no error; any unassigned
    /// code collapses to [`SkdpError::GeneralFailure`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => None,
            0x01 => Some(SkdpError::CipherAuthFailure),
            0x02 => Some(SkdpError::KexAuthFailure),
            0x03 => Some(SkdpError::BadKeepAlive),
            0x04 => Some(SkdpError::ChannelDown),
            0x05 => Some(SkdpError::ConnectionFailure),
            0x06 => Some(SkdpError::EstablishFailure),
            0x07 => Some(SkdpError::InvalidInput),
            0x08 => Some(SkdpError::KeepAliveExpired),
            0x09 => Some(SkdpError::KeyNotRecognized),
            0x0A => Some(SkdpError::RandomFailure),
            0x0B => Some(SkdpError::ReceiveFailure),
            0x0C => Some(SkdpError::TransmitFailure),
            0x0D => Some(SkdpError::UnknownProtocol),
            0x0E => Some(SkdpError::Unsequenced),
            0x0F => Some(SkdpError::PacketExpired),
            _ => Some(SkdpError::GeneralFailure),
        }
    }
}

impl From<std::io::Error> for SkdpError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::UnexpectedEof => SkdpError::ReceiveFailure,
            ErrorKind::WriteZero | ErrorKind::BrokenPipe => SkdpError::TransmitFailure,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::TimedOut => SkdpError::ConnectionFailure,
            _ => SkdpError::GeneralFailure,
        }
    }
}

/// SKDP result type.
pub type SkdpResult<T> = Result<T, SkdpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SkdpError::CipherAuthFailure;
        assert_eq!(err.to_string(), "the cipher authentication has failed");
    }

    #[test]
    fn test_code_roundtrip() {
        let all = [
            SkdpError::CipherAuthFailure,
            SkdpError::KexAuthFailure,
            SkdpError::BadKeepAlive,
            SkdpError::ChannelDown,
            SkdpError::ConnectionFailure,
            SkdpError::EstablishFailure,
            SkdpError::InvalidInput,
            SkdpError::KeepAliveExpired,
            SkdpError::KeyNotRecognized,
            SkdpError::RandomFailure,
            SkdpError::ReceiveFailure,
            SkdpError::TransmitFailure,
            SkdpError::UnknownProtocol,
            SkdpError::Unsequenced,
            SkdpError::PacketExpired,
            SkdpError::GeneralFailure,
        ];
        for err in all {
            assert_eq!(SkdpError::from_code(err.to_code()), Some(err));
        }
    }

    #[test]
    fn test_code_zero_is_success() {
        assert_eq!(SkdpError::from_code(0x00), None);
    }

    #[test]
    fn test_unknown_code_is_general_failure() {
        assert_eq!(SkdpError::from_code(0x42), Some(SkdpError::GeneralFailure));
    }

    #[test]
    fn test_io_error_mapping() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        assert_eq!(SkdpError::from(eof), SkdpError::ReceiveFailure);
    }
}
