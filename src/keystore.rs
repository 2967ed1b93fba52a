// SKDP Key Store
// Persisted key-sets and first-run provisioning.
//
// Three file kinds, distinguished by extension alone: `.mkey` (master),
// `.skey` (server), `.dkey` (device). Bodies are the byte-exact encodings
// from the key hierarchy, no header or magic.

use crate::config::ProtocolConfig;
use crate::error::{SkdpError, SkdpResult};
use crate::keys::{self, DeviceKey, MasterKey, ServerKey};
use crate::{crypto::random, KID_SIZE, MID_SIZE, SID_SIZE};
use rand::rngs::OsRng;
use std::fs;
use std::path::{Path, PathBuf};

/// Master key file extension.
pub const MASTER_KEY_EXT: &str = "mkey";
/// Server key file extension.
pub const SERVER_KEY_EXT: &str = "skey";
/// Device key file extension.
pub const DEVICE_KEY_EXT: &str = "dkey";

/// Default master key file name.
pub const MASTER_KEY_NAME: &str = "skdp_master.mkey";
/// Default server key file name.
pub const SERVER_KEY_NAME: &str = "skdp_server.skey";
/// Default device key file name.
pub const DEVICE_KEY_NAME: &str = "skdp_device.dkey";

fn check_extension(path: &Path, expected: &str) -> SkdpResult<()> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext == expected => Ok(()),
        _ => Err(SkdpError::InvalidInput),
    }
}

/// Writes a master key file.
pub fn save_master_key(path: &Path, mkey: &MasterKey) -> SkdpResult<()> {
    check_extension(path, MASTER_KEY_EXT)?;
    fs::write(path, mkey.to_bytes())?;
    Ok(())
}

/// Reads a master key file.
pub fn load_master_key(cfg: ProtocolConfig, path: &Path) -> SkdpResult<MasterKey> {
    check_extension(path, MASTER_KEY_EXT)?;
    let bytes = fs::read(path)?;
    MasterKey::from_bytes(cfg, &bytes)
}

/// Writes a server key file.
pub fn save_server_key(path: &Path, skey: &ServerKey) -> SkdpResult<()> {
    check_extension(path, SERVER_KEY_EXT)?;
    fs::write(path, skey.to_bytes())?;
    Ok(())
}

/// Reads a server key file.
pub fn load_server_key(cfg: ProtocolConfig, path: &Path) -> SkdpResult<ServerKey> {
    check_extension(path, SERVER_KEY_EXT)?;
    let bytes = fs::read(path)?;
    ServerKey::from_bytes(cfg, &bytes)
}

/// Writes a device key file.
pub fn save_device_key(path: &Path, dkey: &DeviceKey) -> SkdpResult<()> {
    check_extension(path, DEVICE_KEY_EXT)?;
    fs::write(path, dkey.to_bytes())?;
    Ok(())
}

/// Reads a device key file.
pub fn load_device_key(cfg: ProtocolConfig, path: &Path) -> SkdpResult<DeviceKey> {
    check_extension(path, DEVICE_KEY_EXT)?;
    let bytes = fs::read(path)?;
    DeviceKey::from_bytes(cfg, &bytes)
}

/// Parses the 16-hex-character master/server identity prefix entered during
/// provisioning into its 8-byte form.
pub fn parse_identity_prefix(input: &str) -> SkdpResult<[u8; MID_SIZE + SID_SIZE]> {
    let trimmed = input.trim();
    if trimmed.len() != 2 * (MID_SIZE + SID_SIZE) {
        return Err(SkdpError::InvalidInput);
    }
    let decoded = hex::decode(trimmed).map_err(|_| SkdpError::InvalidInput)?;
    let mut prefix = [0u8; MID_SIZE + SID_SIZE];
    prefix.copy_from_slice(&decoded);
    Ok(prefix)
}

/// A freshly provisioned master/server/device key triplet.
#[derive(Debug)]
pub struct KeyTriplet {
    /// The root master key-set.
    pub master: MasterKey,
    /// The derived server key-set.
    pub server: ServerKey,
    /// The derived device key-set for the first client.
    pub device: DeviceKey,
}

/// Generates a master/server/device triplet from an 8-byte master‖server
/// identity prefix, assigning the device a random 8-byte identity.
pub fn provision(
    cfg: ProtocolConfig,
    prefix: &[u8; MID_SIZE + SID_SIZE],
) -> SkdpResult<KeyTriplet> {
    let mut kid = [0u8; KID_SIZE];
    kid[..MID_SIZE + SID_SIZE].copy_from_slice(prefix);

    let mut mid = [0u8; MID_SIZE];
    mid.copy_from_slice(&prefix[..MID_SIZE]);
    let master = keys::generate_master_key(cfg, &mid, &mut OsRng)?;

    let server = keys::derive_server_key(&master, &kid)?;

    random::fill_random(&mut kid[MID_SIZE + SID_SIZE..])?;
    let device = keys::derive_device_key(&server, &kid)?;

    Ok(KeyTriplet {
        master,
        server,
        device,
    })
}

/// Provisions a triplet and persists all three files under `dir` with the
/// default names. Returns the triplet and the device key path, which the
/// administrator distributes to the intended client.
pub fn provision_to_dir(
    cfg: ProtocolConfig,
    prefix: &[u8; MID_SIZE + SID_SIZE],
    dir: &Path,
) -> SkdpResult<(KeyTriplet, PathBuf)> {
    let triplet = provision(cfg, prefix)?;
    fs::create_dir_all(dir)?;
    save_master_key(&dir.join(MASTER_KEY_NAME), &triplet.master)?;
    save_server_key(&dir.join(SERVER_KEY_NAME), &triplet.server)?;
    let dkey_path = dir.join(DEVICE_KEY_NAME);
    save_device_key(&dkey_path, &triplet.device)?;
    Ok((triplet, dkey_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: ProtocolConfig = ProtocolConfig::Aes256Keccak256;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("skdp-keystore-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_parse_identity_prefix() {
        let prefix = parse_identity_prefix("0102030405060708").unwrap();
        assert_eq!(prefix, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(parse_identity_prefix("010203").is_err());
        assert!(parse_identity_prefix("010203040506070Z").is_err());
    }

    #[test]
    fn test_provision_links_hierarchy() {
        let prefix = [1, 2, 3, 4, 5, 6, 7, 8];
        let triplet = provision(CFG, &prefix).unwrap();
        assert_eq!(&triplet.master.kid[..4], &prefix[..4]);
        assert_eq!(&triplet.server.kid[..8], &prefix[..]);
        assert_eq!(&triplet.device.kid[..8], &prefix[..]);
        // The device key must match an on-the-fly derivation from the server key.
        let rederived = keys::derive_device_key(&triplet.server, &triplet.device.kid).unwrap();
        assert_eq!(rederived.to_bytes(), triplet.device.to_bytes());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = temp_dir("roundtrip");
        let prefix = [8, 7, 6, 5, 4, 3, 2, 1];
        let (triplet, dkey_path) = provision_to_dir(CFG, &prefix, &dir).unwrap();

        let master = load_master_key(CFG, &dir.join(MASTER_KEY_NAME)).unwrap();
        let server = load_server_key(CFG, &dir.join(SERVER_KEY_NAME)).unwrap();
        let device = load_device_key(CFG, &dkey_path).unwrap();
        assert_eq!(master.to_bytes(), triplet.master.to_bytes());
        assert_eq!(server.to_bytes(), triplet.server.to_bytes());
        assert_eq!(device.to_bytes(), triplet.device.to_bytes());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_extension_is_enforced() {
        let dir = temp_dir("ext");
        fs::create_dir_all(&dir).unwrap();
        let prefix = [1, 1, 2, 2, 3, 3, 4, 4];
        let triplet = provision(CFG, &prefix).unwrap();
        let wrong = dir.join("server.mkey");
        assert_eq!(
            save_server_key(&wrong, &triplet.server).err(),
            Some(SkdpError::InvalidInput)
        );
        fs::remove_dir_all(&dir).unwrap();
    }
}
