// SKDP Keccak Bindings
// SHA3 digests, cSHAKE derivation and KMAC authentication at the profile
// strength. All of the protocol's key schedule flows through these three
// functions.

use crate::config::ProtocolConfig;
use sha3::{Digest, Sha3_256, Sha3_512};
use tiny_keccak::{CShake, Hasher, Kmac, Xof};

/// Computes the profile hash (SHA3-256 or SHA3-512) over `data`.
///
/// Output length is [`ProtocolConfig::hash_size`].
pub fn sha3(cfg: ProtocolConfig, data: &[u8]) -> Vec<u8> {
    if cfg.is_sec512() {
        Sha3_512::digest(data).to_vec()
    } else {
        Sha3_256::digest(data).to_vec()
    }
}

/// Squeezes `out.len()` bytes of cSHAKE output keyed by `key`.
///
/// The key is the main input; `name` is the function-name string and
/// `custom` the customization string. The key hierarchy derives with
/// `name = child KID prefix, custom = CONFIG_STRING`; the session key
/// schedule derives with `name = session hash, custom = empty`.
pub fn cshake_derive(key: &[u8], name: &[u8], custom: &[u8], out: &mut [u8]) {
    let mut xof = CShake::v256(name, custom);
    xof.update(key);
    xof.squeeze(out);
}

/// Computes a KMAC tag of `tag.len()` bytes over the concatenation of
/// `parts`, keyed by `key` with customization `custom`.
pub fn kmac_tag(key: &[u8], custom: &[u8], parts: &[&[u8]], tag: &mut [u8]) {
    let mut kmac = Kmac::v256(key, custom);
    for part in parts {
        kmac.update(part);
    }
    kmac.finalize(tag);
}
