// SKDP Protocol Configuration
// One configuration is selected at construction time and encoded on the wire.

use crate::error::{SkdpError, SkdpResult};
use crate::{CONFIG_SIZE, EXP_SIZE, HEADER_SIZE, KID_SIZE};

/// The protocol configuration: security profile plus cipher suite.
///
/// Exactly one configuration governs a session. It fixes every derived size
/// in the protocol and is encoded as a 26-byte ASCII tag in the connect
/// messages; a mismatch is rejected as [`SkdpError::UnknownProtocol`].
///
/// The 512-bit profile is only defined for the RCS cipher; there is no
/// AES-GCM/512 combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolConfig {
    /// 256-bit profile with AES-256-GCM and Keccak-256 (`r01`).
    Aes256Keccak256,
    /// 256-bit profile with the RCS-256 stream AEAD and Keccak-256 (`r02`).
    Rcs256Keccak256,
    /// 512-bit profile with the RCS-512 stream AEAD and Keccak-512 (`r03`).
    Rcs512Keccak512,
}

impl ProtocolConfig {
    /// The 26-byte configuration string transmitted in connect messages.
    pub fn config_string(&self) -> &'static [u8; CONFIG_SIZE] {
        match self {
            ProtocolConfig::Aes256Keccak256 => b"r01-skdp-aes256-keccak256\0",
            ProtocolConfig::Rcs256Keccak256 => b"r02-skdp-rcs256-keccak256\0",
            ProtocolConfig::Rcs512Keccak512 => b"r03-skdp-rcs512-keccak512\0",
        }
    }

    /// Parses a received 26-byte configuration tag.
    pub fn from_config_string(tag: &[u8]) -> SkdpResult<Self> {
        if tag.len() != CONFIG_SIZE {
            return Err(SkdpError::InvalidInput);
        }
        if tag == ProtocolConfig::Aes256Keccak256.config_string() {
            Ok(ProtocolConfig::Aes256Keccak256)
        } else if tag == ProtocolConfig::Rcs256Keccak256.config_string() {
            Ok(ProtocolConfig::Rcs256Keccak256)
        } else if tag == ProtocolConfig::Rcs512Keccak512.config_string() {
            Ok(ProtocolConfig::Rcs512Keccak512)
        } else {
            Err(SkdpError::UnknownProtocol)
        }
    }

    /// True for the 512-bit security profile.
    pub fn is_sec512(&self) -> bool {
        matches!(self, ProtocolConfig::Rcs512Keccak512)
    }

    /// The hash output size in bytes.
    pub fn hash_size(&self) -> usize {
        if self.is_sec512() {
            64
        } else {
            32
        }
    }

    /// The derivation key size in bytes (MDK, SDK and DDK).
    pub fn key_size(&self) -> usize {
        if self.is_sec512() {
            64
        } else {
            32
        }
    }

    /// The symmetric cipher key size in bytes.
    pub fn cprkey_size(&self) -> usize {
        self.key_size()
    }

    /// The cipher nonce size in bytes.
    pub fn nonce_size(&self) -> usize {
        match self {
            ProtocolConfig::Aes256Keccak256 => 16,
            ProtocolConfig::Rcs256Keccak256 | ProtocolConfig::Rcs512Keccak512 => 32,
        }
    }

    /// The key exchange MAC key size in bytes.
    pub fn mackey_size(&self) -> usize {
        self.key_size()
    }

    /// The AEAD authentication tag size in bytes.
    pub fn mactag_size(&self) -> usize {
        match self {
            ProtocolConfig::Aes256Keccak256 => 16,
            ProtocolConfig::Rcs256Keccak256 => 32,
            ProtocolConfig::Rcs512Keccak512 => 64,
        }
    }

    /// The device token key size in bytes.
    pub fn dtk_size(&self) -> usize {
        self.key_size()
    }

    /// The server token key size in bytes.
    pub fn stk_size(&self) -> usize {
        self.key_size()
    }

    /// The session token size in bytes.
    pub fn stok_size(&self) -> usize {
        self.key_size()
    }

    /// The session token hash size in bytes.
    pub fn sth_size(&self) -> usize {
        self.hash_size()
    }

    /// The encoded master key size in bytes.
    pub fn mstkey_encoded_size(&self) -> usize {
        KID_SIZE + self.key_size() + EXP_SIZE
    }

    /// The encoded server key size in bytes.
    pub fn srvkey_encoded_size(&self) -> usize {
        KID_SIZE + self.key_size() + EXP_SIZE
    }

    /// The encoded device key size in bytes.
    pub fn devkey_encoded_size(&self) -> usize {
        KID_SIZE + self.key_size() + EXP_SIZE
    }

    /// The connect request and response message size in bytes.
    pub fn connect_message_size(&self) -> usize {
        KID_SIZE + CONFIG_SIZE + self.stok_size()
    }

    /// The exchange request and response message size in bytes.
    pub fn exchange_message_size(&self) -> usize {
        self.dtk_size() + self.mackey_size()
    }

    /// The establish request message size in bytes.
    pub fn establish_request_message_size(&self) -> usize {
        self.sth_size() + self.mactag_size()
    }

    /// The establish response message size in bytes.
    pub fn establish_response_message_size(&self) -> usize {
        self.hash_size() + self.mactag_size()
    }

    /// The largest key exchange packet size in bytes, header included.
    pub fn exchange_max_packet_size(&self) -> usize {
        self.connect_message_size().max(self.exchange_message_size()) + HEADER_SIZE
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig::Aes256Keccak256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_string_length() {
        for cfg in [
            ProtocolConfig::Aes256Keccak256,
            ProtocolConfig::Rcs256Keccak256,
            ProtocolConfig::Rcs512Keccak512,
        ] {
            assert_eq!(cfg.config_string().len(), CONFIG_SIZE);
            assert_eq!(ProtocolConfig::from_config_string(cfg.config_string()), Ok(cfg));
        }
    }

    #[test]
    fn test_unknown_config_rejected() {
        let tag = *b"r99-skdp-xxx256-keccak256\0";
        assert_eq!(
            ProtocolConfig::from_config_string(&tag),
            Err(SkdpError::UnknownProtocol)
        );
    }

    #[test]
    fn test_short_config_rejected() {
        assert_eq!(
            ProtocolConfig::from_config_string(b"r01"),
            Err(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn test_profile_sizes() {
        let aes = ProtocolConfig::Aes256Keccak256;
        assert_eq!(aes.hash_size(), 32);
        assert_eq!(aes.mactag_size(), 16);
        assert_eq!(aes.nonce_size(), 16);
        assert_eq!(aes.connect_message_size(), 16 + 26 + 32);
        assert_eq!(aes.exchange_message_size(), 64);
        assert_eq!(aes.establish_request_message_size(), 48);

        let rcs512 = ProtocolConfig::Rcs512Keccak512;
        assert_eq!(rcs512.hash_size(), 64);
        assert_eq!(rcs512.mactag_size(), 64);
        assert_eq!(rcs512.nonce_size(), 32);
        assert_eq!(rcs512.devkey_encoded_size(), 16 + 64 + 8);
    }
}
