// SKDP Key Hierarchy
// Master -> Server -> Device derivation chain.
//
// The master derivation key is the root secret; each branch key is one
// cSHAKE call keyed by the parent secret, named by the child KID prefix and
// customized with the configuration string. Derivations are deterministic,
// so a lost branch key can be regenerated from the parent at any time.

use crate::config::ProtocolConfig;
use crate::crypto::{keccak, random};
use crate::error::{SkdpError, SkdpResult};
use crate::{time, EXP_SIZE, KEY_DURATION_SECONDS, KID_SIZE, MID_SIZE, SID_SIZE};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

/// The SKDP master key-set. Created by the administrator, persisted, never
/// transmitted. Root of the derivation hierarchy.
#[derive(Clone)]
pub struct MasterKey {
    /// The key identity: master ID followed by twelve zero bytes.
    pub kid: [u8; KID_SIZE],
    mdk: Vec<u8>,
    /// The expiration time in seconds from epoch.
    pub expiration: u64,
    cfg: ProtocolConfig,
}

/// The SKDP server key-set, derived from a master key and given to one
/// server.
#[derive(Clone)]
pub struct ServerKey {
    /// The key identity: master ID, server ID, eight zero bytes.
    pub kid: [u8; KID_SIZE],
    sdk: Vec<u8>,
    /// The expiration time in seconds from epoch.
    pub expiration: u64,
    cfg: ProtocolConfig,
}

/// The SKDP device key-set, derived from a server key and given to one
/// device.
#[derive(Clone)]
pub struct DeviceKey {
    /// The full key identity: master ID, server ID, device ID.
    pub kid: [u8; KID_SIZE],
    ddk: Vec<u8>,
    /// The expiration time in seconds from epoch.
    pub expiration: u64,
    cfg: ProtocolConfig,
}

/// Generates a new master key-set with a random derivation key.
///
/// The key identity takes the 4-byte master ID; the remaining twelve bytes
/// stay zero. Expiration is one key duration from now.
pub fn generate_master_key<R: RngCore + CryptoRng>(
    cfg: ProtocolConfig,
    mid: &[u8; MID_SIZE],
    rng: &mut R,
) -> SkdpResult<MasterKey> {
    let mut mdk = vec![0u8; cfg.key_size()];
    random::fill_from(rng, &mut mdk)?;
    let mut kid = [0u8; KID_SIZE];
    kid[..MID_SIZE].copy_from_slice(mid);
    Ok(MasterKey {
        kid,
        mdk,
        expiration: time::epoch_seconds() + KEY_DURATION_SECONDS,
        cfg,
    })
}

/// Derives the server key-set identified by `kid` from a master key.
///
/// The KID must carry the master's ID in its first four bytes and zeros in
/// its final four; the derived identity keeps only the master and server
/// IDs.
pub fn derive_server_key(mkey: &MasterKey, kid: &[u8; KID_SIZE]) -> SkdpResult<ServerKey> {
    if kid[..MID_SIZE] != mkey.kid[..MID_SIZE] || kid[12..].iter().any(|&b| b != 0) {
        return Err(SkdpError::InvalidInput);
    }
    let cfg = mkey.cfg;
    let mut sdk = vec![0u8; cfg.key_size()];
    keccak::cshake_derive(
        &mkey.mdk,
        &kid[..MID_SIZE + SID_SIZE],
        cfg.config_string(),
        &mut sdk,
    );
    let mut skid = [0u8; KID_SIZE];
    skid[..MID_SIZE + SID_SIZE].copy_from_slice(&kid[..MID_SIZE + SID_SIZE]);
    Ok(ServerKey {
        kid: skid,
        sdk,
        expiration: mkey.expiration,
        cfg,
    })
}

/// Derives the device key-set identified by `kid` from a server key.
///
/// The KID must carry the server key's 8-byte identity prefix. The server
/// performs this same derivation on the fly when a known device connects.
pub fn derive_device_key(skey: &ServerKey, kid: &[u8; KID_SIZE]) -> SkdpResult<DeviceKey> {
    if kid[..MID_SIZE + SID_SIZE] != skey.kid[..MID_SIZE + SID_SIZE] {
        return Err(SkdpError::InvalidInput);
    }
    let cfg = skey.cfg;
    let mut ddk = vec![0u8; cfg.key_size()];
    keccak::cshake_derive(&skey.sdk, kid, cfg.config_string(), &mut ddk);
    Ok(DeviceKey {
        kid: *kid,
        ddk,
        expiration: skey.expiration,
        cfg,
    })
}

fn encode(kid: &[u8; KID_SIZE], secret: &[u8], expiration: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(KID_SIZE + secret.len() + EXP_SIZE);
    out.extend_from_slice(kid);
    out.extend_from_slice(secret);
    out.extend_from_slice(&expiration.to_le_bytes());
    out
}

fn decode(cfg: ProtocolConfig, input: &[u8]) -> SkdpResult<([u8; KID_SIZE], Vec<u8>, u64)> {
    if input.len() != KID_SIZE + cfg.key_size() + EXP_SIZE {
        return Err(SkdpError::InvalidInput);
    }
    let mut kid = [0u8; KID_SIZE];
    kid.copy_from_slice(&input[..KID_SIZE]);
    let secret = input[KID_SIZE..KID_SIZE + cfg.key_size()].to_vec();
    let mut exp = [0u8; EXP_SIZE];
    exp.copy_from_slice(&input[KID_SIZE + cfg.key_size()..]);
    Ok((kid, secret, u64::from_le_bytes(exp)))
}

impl MasterKey {
    /// Serializes the key-set into its persisted little-endian layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.kid, &self.mdk, self.expiration)
    }

    /// Deserializes a key-set from the persisted layout.
    pub fn from_bytes(cfg: ProtocolConfig, input: &[u8]) -> SkdpResult<Self> {
        let (kid, mdk, expiration) = decode(cfg, input)?;
        Ok(MasterKey {
            kid,
            mdk,
            expiration,
            cfg,
        })
    }

    /// The protocol configuration this key-set belongs to.
    pub fn config(&self) -> ProtocolConfig {
        self.cfg
    }
}

impl ServerKey {
    /// Serializes the key-set into its persisted little-endian layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.kid, &self.sdk, self.expiration)
    }

    /// Deserializes a key-set from the persisted layout.
    pub fn from_bytes(cfg: ProtocolConfig, input: &[u8]) -> SkdpResult<Self> {
        let (kid, sdk, expiration) = decode(cfg, input)?;
        Ok(ServerKey {
            kid,
            sdk,
            expiration,
            cfg,
        })
    }

    /// The protocol configuration this key-set belongs to.
    pub fn config(&self) -> ProtocolConfig {
        self.cfg
    }

    pub(crate) fn sdk(&self) -> &[u8] {
        &self.sdk
    }
}

impl DeviceKey {
    /// Serializes the key-set into its persisted little-endian layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.kid, &self.ddk, self.expiration)
    }

    /// Deserializes a key-set from the persisted layout.
    pub fn from_bytes(cfg: ProtocolConfig, input: &[u8]) -> SkdpResult<Self> {
        let (kid, ddk, expiration) = decode(cfg, input)?;
        Ok(DeviceKey {
            kid,
            ddk,
            expiration,
            cfg,
        })
    }

    /// The protocol configuration this key-set belongs to.
    pub fn config(&self) -> ProtocolConfig {
        self.cfg
    }

    pub(crate) fn ddk(&self) -> &[u8] {
        &self.ddk
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.mdk.zeroize();
    }
}

impl Drop for ServerKey {
    fn drop(&mut self) {
        self.sdk.zeroize();
    }
}

impl Drop for DeviceKey {
    fn drop(&mut self) {
        self.ddk.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey(kid: {}, [REDACTED])", hex::encode(self.kid))
    }
}

impl std::fmt::Debug for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServerKey(kid: {}, [REDACTED])", hex::encode(self.kid))
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceKey(kid: {}, [REDACTED])", hex::encode(self.kid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    const CFG: ProtocolConfig = ProtocolConfig::Aes256Keccak256;

    fn test_kid() -> [u8; KID_SIZE] {
        [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x10,
        ]
    }

    fn server_kid() -> [u8; KID_SIZE] {
        let mut kid = test_kid();
        kid[8..].fill(0);
        kid
    }

    #[test]
    fn test_master_key_generation() {
        let mkey = generate_master_key(CFG, &[1, 2, 3, 4], &mut OsRng).unwrap();
        assert_eq!(&mkey.kid[..4], &[1, 2, 3, 4]);
        assert!(mkey.kid[4..].iter().all(|&b| b == 0));
        assert!(mkey.expiration > time::epoch_seconds());
    }

    #[test]
    fn test_server_derivation_deterministic() {
        let mkey = generate_master_key(CFG, &[1, 2, 3, 4], &mut OsRng).unwrap();
        let a = derive_server_key(&mkey, &server_kid()).unwrap();
        let b = derive_server_key(&mkey, &server_kid()).unwrap();
        assert_eq!(a.sdk, b.sdk);
        assert_eq!(a.kid, b.kid);
        assert_eq!(a.expiration, mkey.expiration);
    }

    #[test]
    fn test_device_derivation_deterministic() {
        let mkey = generate_master_key(CFG, &[1, 2, 3, 4], &mut OsRng).unwrap();
        let skey = derive_server_key(&mkey, &server_kid()).unwrap();
        let a = derive_device_key(&skey, &test_kid()).unwrap();
        let b = derive_device_key(&skey, &test_kid()).unwrap();
        assert_eq!(a.ddk, b.ddk);
        assert_eq!(a.kid, test_kid());
    }

    #[test]
    fn test_distinct_ids_yield_distinct_keys() {
        let mkey = generate_master_key(CFG, &[1, 2, 3, 4], &mut OsRng).unwrap();
        let skey = derive_server_key(&mkey, &server_kid()).unwrap();
        let mut other = test_kid();
        other[15] ^= 1;
        let a = derive_device_key(&skey, &test_kid()).unwrap();
        let b = derive_device_key(&skey, &other).unwrap();
        assert_ne!(a.ddk, b.ddk);
    }

    #[test]
    fn test_server_derivation_rejects_foreign_master_id() {
        let mkey = generate_master_key(CFG, &[9, 9, 9, 9], &mut OsRng).unwrap();
        assert_eq!(
            derive_server_key(&mkey, &server_kid()).err(),
            Some(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn test_device_derivation_rejects_foreign_server_id() {
        let mkey = generate_master_key(CFG, &[1, 2, 3, 4], &mut OsRng).unwrap();
        let skey = derive_server_key(&mkey, &server_kid()).unwrap();
        let mut foreign = test_kid();
        foreign[4..8].copy_from_slice(&[0x99; 4]);
        assert_eq!(
            derive_device_key(&skey, &foreign).err(),
            Some(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mkey = generate_master_key(CFG, &[1, 2, 3, 4], &mut OsRng).unwrap();
        let skey = derive_server_key(&mkey, &server_kid()).unwrap();
        let dkey = derive_device_key(&skey, &test_kid()).unwrap();

        let mkey2 = MasterKey::from_bytes(CFG, &mkey.to_bytes()).unwrap();
        assert_eq!(mkey.kid, mkey2.kid);
        assert_eq!(mkey.mdk, mkey2.mdk);
        assert_eq!(mkey.expiration, mkey2.expiration);

        let skey2 = ServerKey::from_bytes(CFG, &skey.to_bytes()).unwrap();
        assert_eq!(skey.sdk, skey2.sdk);

        let dkey2 = DeviceKey::from_bytes(CFG, &dkey.to_bytes()).unwrap();
        assert_eq!(dkey.ddk, dkey2.ddk);
        assert_eq!(dkey.to_bytes().len(), CFG.devkey_encoded_size());
    }

    #[test]
    fn test_restored_master_reproduces_derivations() {
        let mkey = generate_master_key(CFG, &[1, 2, 3, 4], &mut OsRng).unwrap();
        let restored = MasterKey::from_bytes(CFG, &mkey.to_bytes()).unwrap();
        let a = derive_server_key(&mkey, &server_kid()).unwrap();
        let b = derive_server_key(&restored, &server_kid()).unwrap();
        assert_eq!(a.sdk, b.sdk);
    }

    #[test]
    fn test_truncated_encoding_rejected() {
        let mkey = generate_master_key(CFG, &[1, 2, 3, 4], &mut OsRng).unwrap();
        let bytes = mkey.to_bytes();
        assert_eq!(
            MasterKey::from_bytes(CFG, &bytes[..bytes.len() - 1]).err(),
            Some(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let mkey = generate_master_key(CFG, &[1, 2, 3, 4], &mut OsRng).unwrap();
        let rendered = format!("{:?}", mkey);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&hex::encode(&mkey.mdk)));
    }
}
