// SKDP Key Exchange Protocol
// Four messages establish a mutually authenticated ephemeral session:
//
//   client                                server
//     | ConnectRequest  (kid, cfg, stok_c)  |
//     |------------------------------------>| verify cfg + kid, derive ddk
//     | ConnectResponse (kid, cfg, stok_s)  |
//     |<------------------------------------|
//     | ExchangeRequest (E(dtk), mac)       |
//     |------------------------------------>| authenticate, recover dtk
//     | ExchangeResponse (E(stk), mac)      |
//     |<------------------------------------| authenticate, recover stk
//     | EstablishRequest (AEAD(vtok))       |
//     |------------------------------------>|
//     | EstablishResponse (AEAD(H(vtok)))   |
//     |<------------------------------------| both sides established
//
// Each side contributes one ephemeral token key; the device token keys the
// client-to-server channel and the server token keys the reverse channel,
// so the two directions never share a (key, nonce) pair. Both sides bind
// the exchange to the session hashes dsh/ssh, which commit to the key
// identity, the configuration string and the fresh session tokens.

pub mod client;
pub mod server;

use crate::config::ProtocolConfig;
use crate::crypto::cipher::{CipherDirection, SessionCipher};
use crate::crypto::keccak;
use crate::error::{SkdpError, SkdpResult};
use crate::packet::{NetworkPacket, PacketFlag};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Derives a channel cipher from an ephemeral token key and a session hash
/// and installs it for one direction.
pub(crate) fn install_cipher(
    cfg: ProtocolConfig,
    token_key: &[u8],
    session_hash: &[u8],
    direction: CipherDirection,
) -> SkdpResult<SessionCipher> {
    let mut prnd = vec![0u8; cfg.cprkey_size() + cfg.nonce_size()];
    keccak::cshake_derive(token_key, session_hash, &[], &mut prnd);
    let cipher = SessionCipher::initialize(
        cfg,
        &prnd[..cfg.cprkey_size()],
        &prnd[cfg.cprkey_size()..],
        direction,
    );
    prnd.zeroize();
    cipher
}

/// Computes the key exchange MAC over a token ciphertext followed by the
/// serialized packet header, bound to a session hash.
pub(crate) fn kex_mac(
    cfg: ProtocolConfig,
    mac_key: &[u8],
    session_hash: &[u8],
    ciphertext: &[u8],
    header: &[u8],
) -> Vec<u8> {
    let mut tag = vec![0u8; cfg.mackey_size()];
    keccak::kmac_tag(mac_key, session_hash, &[ciphertext, header], &mut tag);
    tag
}

/// Constant-time verification of a MAC or hash value.
pub(crate) fn verify_tag(expected: &[u8], received: &[u8]) -> bool {
    expected.ct_eq(received).unwrap_u8() == 1
}

/// Surfaces the error carried by a received packet: the embedded code for
/// an error condition, `ConnectionFailure` for any other unexpected flag.
pub(crate) fn remote_error(packet: &NetworkPacket) -> SkdpError {
    if packet.flag == PacketFlag::ErrorCondition || packet.flag == PacketFlag::ConnectionTerminate
    {
        packet
            .payload
            .first()
            .and_then(|&code| SkdpError::from_code(code))
            .unwrap_or(SkdpError::ConnectionFailure)
    } else {
        SkdpError::ConnectionFailure
    }
}

#[cfg(test)]
mod tests {
    use super::client::ClientSession;
    use super::server::ServerSession;
    use super::*;
    use crate::keys;
    use crate::{MESSAGE_SIZE, SEQUENCE_TERMINATOR};
    use rand::rngs::OsRng;

    fn session_pair(cfg: ProtocolConfig, ratchet: bool) -> (ClientSession, ServerSession) {
        let mut kid = [0u8; 16];
        kid.copy_from_slice(&[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x10,
        ]);
        let mut skid = kid;
        skid[8..].fill(0);

        let mkey = keys::generate_master_key(cfg, &[1, 2, 3, 4], &mut OsRng).unwrap();
        let skey = keys::derive_server_key(&mkey, &skid).unwrap();
        let dkey = keys::derive_device_key(&skey, &kid).unwrap();

        let client = ClientSession::new(&dkey, ratchet).unwrap();
        let server = ServerSession::new(&skey, ratchet).unwrap();
        (client, server)
    }

    fn run_kex(client: &mut ClientSession, server: &mut ServerSession) {
        let creq = client.connect_request(&mut OsRng).unwrap();
        let cresp = server.connect_response(&creq, &mut OsRng).unwrap();
        let xreq = client.exchange_request(&cresp, &mut OsRng).unwrap();
        let xresp = server.exchange_response(&xreq, &mut OsRng).unwrap();
        let ereq = client.establish_request(&xresp, &mut OsRng).unwrap();
        let eresp = server.establish_response(&ereq).unwrap();
        client.establish_verify(&eresp).unwrap();
    }

    #[test]
    fn test_kex_all_profiles() {
        for cfg in [
            ProtocolConfig::Aes256Keccak256,
            ProtocolConfig::Rcs256Keccak256,
            ProtocolConfig::Rcs512Keccak512,
        ] {
            let (mut client, mut server) = session_pair(cfg, false);
            run_kex(&mut client, &mut server);
            assert!(client.is_established());
            assert!(server.is_established());
            assert_eq!(client.tx_sequence(), 3);
            assert_eq!(client.rx_sequence(), 3);
            assert_eq!(server.tx_sequence(), 3);
            assert_eq!(server.rx_sequence(), 3);
        }
    }

    #[test]
    fn test_bidirectional_records_after_kex() {
        let (mut client, mut server) = session_pair(ProtocolConfig::Aes256Keccak256, false);
        run_kex(&mut client, &mut server);

        let up = client.encrypt_message(b"from the device").unwrap();
        assert_eq!(server.decrypt_message(&up).unwrap(), b"from the device");

        let down = server.encrypt_message(b"from the server").unwrap();
        assert_eq!(client.decrypt_message(&down).unwrap(), b"from the server");
    }

    #[test]
    fn test_record_before_establish_is_channel_down() {
        let (mut client, mut server) = session_pair(ProtocolConfig::Aes256Keccak256, false);
        let creq = client.connect_request(&mut OsRng).unwrap();
        let _ = server.connect_response(&creq, &mut OsRng).unwrap();
        assert_eq!(
            client.encrypt_message(b"early").err(),
            Some(SkdpError::ChannelDown)
        );
    }

    #[test]
    fn test_oversize_message_rejected() {
        let (mut client, mut server) = session_pair(ProtocolConfig::Aes256Keccak256, false);
        run_kex(&mut client, &mut server);
        let big = vec![0u8; MESSAGE_SIZE + 1];
        assert_eq!(
            client.encrypt_message(&big).err(),
            Some(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn test_terminator_sequence_rejected_on_records() {
        let (mut client, mut server) = session_pair(ProtocolConfig::Aes256Keccak256, false);
        run_kex(&mut client, &mut server);
        let mut packet = client.encrypt_message(b"msg").unwrap();
        packet.sequence = SEQUENCE_TERMINATOR;
        assert_eq!(
            server.decrypt_message(&packet).err(),
            Some(SkdpError::Unsequenced)
        );
    }

    #[test]
    fn test_tampered_exchange_mac_fails_kex() {
        let (mut client, mut server) = session_pair(ProtocolConfig::Aes256Keccak256, false);
        let creq = client.connect_request(&mut OsRng).unwrap();
        let cresp = server.connect_response(&creq, &mut OsRng).unwrap();
        let mut xreq = client.exchange_request(&cresp, &mut OsRng).unwrap();
        let last = xreq.payload.len() - 1;
        xreq.payload[last] ^= 1;
        assert_eq!(
            server.exchange_response(&xreq, &mut OsRng).err(),
            Some(SkdpError::KexAuthFailure)
        );
    }

    #[test]
    fn test_mismatched_config_rejected() {
        let (mut client, _) = session_pair(ProtocolConfig::Rcs256Keccak256, false);
        let (_, mut server) = session_pair(ProtocolConfig::Aes256Keccak256, false);
        let creq = client.connect_request(&mut OsRng).unwrap();
        assert_eq!(
            server.connect_response(&creq, &mut OsRng).err(),
            Some(SkdpError::UnknownProtocol)
        );
    }

    #[test]
    fn test_ratchet_rekeys_both_directions() {
        let (mut client, mut server) = session_pair(ProtocolConfig::Aes256Keccak256, true);
        run_kex(&mut client, &mut server);

        let before = client.encrypt_message(b"before").unwrap();
        assert_eq!(server.decrypt_message(&before).unwrap(), b"before");

        let rreq = client.ratchet_request(&mut OsRng).unwrap();
        let rresp = server.ratchet_response(&rreq, &mut OsRng).unwrap();
        client.ratchet_finalize(&rresp).unwrap();

        // Sequence counters continue monotonically across the ratchet.
        let after = client.encrypt_message(b"after").unwrap();
        assert!(after.sequence > before.sequence + 1);
        assert_eq!(server.decrypt_message(&after).unwrap(), b"after");

        let down = server.encrypt_message(b"downstream").unwrap();
        assert_eq!(client.decrypt_message(&down).unwrap(), b"downstream");
    }

    #[test]
    fn test_ratchet_requires_opt_in() {
        let (mut client, mut server) = session_pair(ProtocolConfig::Aes256Keccak256, false);
        run_kex(&mut client, &mut server);
        assert_eq!(
            client.ratchet_request(&mut OsRng).err(),
            Some(SkdpError::InvalidInput)
        );
    }

    #[test]
    fn test_remote_error_surfacing() {
        let packet = NetworkPacket {
            flag: PacketFlag::ErrorCondition,
            msg_len: 1,
            sequence: SEQUENCE_TERMINATOR,
            utc_time: 0,
            payload: vec![SkdpError::KeyNotRecognized.to_code()],
        };
        assert_eq!(remote_error(&packet), SkdpError::KeyNotRecognized);

        let other = NetworkPacket::new(PacketFlag::ConnectResponse, 0, Vec::new());
        assert_eq!(remote_error(&other), SkdpError::ConnectionFailure);
    }
}
