// SKDP Server Key Exchange
// The listening side: validates the device identity, derives the device
// key on the fly from the server derivation key, and contributes the
// server token key for the downstream channel.

use crate::config::ProtocolConfig;
use crate::crypto::cipher::{CipherDirection, SessionCipher};
use crate::crypto::{keccak, random};
use crate::error::{SkdpError, SkdpResult};
use crate::keys::ServerKey;
use crate::packet::{NetworkPacket, PacketFlag};
use crate::protocol::{install_cipher, kex_mac, remote_error, verify_tag};
use crate::{time, CONFIG_SIZE, KID_SIZE, MESSAGE_SIZE, MID_SIZE, SEQUENCE_TERMINATOR, SID_SIZE};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

/// The server session state for one connected device.
///
/// Mirrors [`crate::protocol::client::ClientSession`]: transport-agnostic,
/// one instance per connection, nothing shared between sessions.
pub struct ServerSession {
    cfg: ProtocolConfig,
    kid: [u8; KID_SIZE],
    sdk: Vec<u8>,
    ddk: Vec<u8>,
    did: [u8; KID_SIZE],
    dsh: Vec<u8>,
    ssh: Vec<u8>,
    expiration: u64,
    ratchet: bool,
    phase: PacketFlag,
    tx_cipher: Option<SessionCipher>,
    rx_cipher: Option<SessionCipher>,
    tx_seq: u64,
    rx_seq: u64,
}

impl ServerSession {
    /// Initializes a session from the server key-set.
    ///
    /// With `ratchet` enabled the session retains the derived device key
    /// after establishment so the client can request fresh channel keys.
    pub fn new(skey: &ServerKey, ratchet: bool) -> SkdpResult<Self> {
        if skey.expiration <= time::epoch_seconds() {
            return Err(SkdpError::InvalidInput);
        }
        Ok(ServerSession {
            cfg: skey.config(),
            kid: skey.kid,
            sdk: skey.sdk().to_vec(),
            ddk: Vec::new(),
            did: [0u8; KID_SIZE],
            dsh: Vec::new(),
            ssh: Vec::new(),
            expiration: skey.expiration,
            ratchet,
            phase: PacketFlag::None,
            tx_cipher: None,
            rx_cipher: None,
            tx_seq: 0,
            rx_seq: 0,
        })
    }

    /// The protocol configuration governing this session.
    pub fn config(&self) -> ProtocolConfig {
        self.cfg
    }

    /// True once the key exchange has completed.
    pub fn is_established(&self) -> bool {
        self.phase == PacketFlag::SessionEstablished
    }

    /// The current key exchange phase marker.
    pub fn phase(&self) -> PacketFlag {
        self.phase
    }

    /// The transmit channel sequence counter.
    pub fn tx_sequence(&self) -> u64 {
        self.tx_seq
    }

    /// The receive channel sequence counter.
    pub fn rx_sequence(&self) -> u64 {
        self.rx_seq
    }

    /// The key identity of the connected device, fixed after the
    /// connection request is accepted.
    pub fn device_id(&self) -> &[u8; KID_SIZE] {
        &self.did
    }

    fn check_incoming(&mut self, packet: &NetworkPacket, expected: PacketFlag) -> SkdpResult<()> {
        // An error or terminate packet rides the terminator sequence and
        // surfaces its embedded code verbatim.
        if packet.flag == PacketFlag::ErrorCondition
            || packet.flag == PacketFlag::ConnectionTerminate
        {
            return Err(remote_error(packet));
        }
        if packet.sequence != self.rx_seq {
            return Err(SkdpError::Unsequenced);
        }
        self.rx_seq += 1;
        if packet.flag != expected {
            return Err(SkdpError::ConnectionFailure);
        }
        if !packet.time_valid() {
            return Err(SkdpError::PacketExpired);
        }
        Ok(())
    }

    /// Phase 1: validates the connection request, derives the device key
    /// for this KID, and answers with the server identity and a fresh
    /// session token.
    ///
    /// The configuration string is checked before the key identity, and
    /// the key identity before any derivation, so an unknown device learns
    /// nothing and costs nothing.
    pub fn connect_response<R: RngCore + CryptoRng>(
        &mut self,
        request: &NetworkPacket,
        rng: &mut R,
    ) -> SkdpResult<NetworkPacket> {
        if self.phase != PacketFlag::None {
            return Err(SkdpError::InvalidInput);
        }
        self.check_incoming(request, PacketFlag::ConnectRequest)?;
        if request.payload.len() != self.cfg.connect_message_size() {
            return Err(SkdpError::InvalidInput);
        }

        let kid_c = &request.payload[..KID_SIZE];
        let cfg_tag = &request.payload[KID_SIZE..KID_SIZE + CONFIG_SIZE];

        if cfg_tag != self.cfg.config_string() {
            return Err(SkdpError::UnknownProtocol);
        }
        if kid_c[..MID_SIZE + SID_SIZE] != self.kid[..MID_SIZE + SID_SIZE] {
            return Err(SkdpError::KeyNotRecognized);
        }

        // Derive the device key for this identity; retained for the
        // exchange only unless the ratchet keeps it live.
        self.did.copy_from_slice(kid_c);
        self.ddk = vec![0u8; self.cfg.key_size()];
        keccak::cshake_derive(&self.sdk, &self.did, self.cfg.config_string(), &mut self.ddk);

        // dsh = H(kid || cfg || stok) over the whole request message.
        self.dsh = keccak::sha3(self.cfg, &request.payload);

        let mut stok = vec![0u8; self.cfg.stok_size()];
        random::fill_from(rng, &mut stok)?;

        let mut payload = Vec::with_capacity(self.cfg.connect_message_size());
        payload.extend_from_slice(&self.kid);
        payload.extend_from_slice(self.cfg.config_string());
        payload.extend_from_slice(&stok);

        // ssh = H(sid || cfg || stok) over the whole response message.
        self.ssh = keccak::sha3(self.cfg, &payload);

        let packet = NetworkPacket::new(PacketFlag::ConnectResponse, self.tx_seq, payload);
        self.tx_seq += 1;
        self.phase = PacketFlag::ConnectResponse;
        Ok(packet)
    }

    /// Phase 2: authenticates the exchange request, recovers the device
    /// token key and keys the receive cipher, then issues the encrypted
    /// server token key and keys the transmit cipher.
    pub fn exchange_response<R: RngCore + CryptoRng>(
        &mut self,
        request: &NetworkPacket,
        rng: &mut R,
    ) -> SkdpResult<NetworkPacket> {
        if self.phase != PacketFlag::ConnectResponse {
            return Err(SkdpError::InvalidInput);
        }
        self.check_incoming(request, PacketFlag::ExchangeRequest)?;
        self.exchange_issue(request, rng)
    }

    // Shared by the exchange phase and the ratchet: authenticate the
    // incoming token, re-key receive, issue a fresh server token, re-key
    // transmit.
    fn exchange_issue<R: RngCore + CryptoRng>(
        &mut self,
        request: &NetworkPacket,
        rng: &mut R,
    ) -> SkdpResult<NetworkPacket> {
        if request.payload.len() != self.cfg.exchange_message_size() {
            return Err(SkdpError::InvalidInput);
        }

        let dtk_size = self.cfg.dtk_size();
        let mut prnd = vec![0u8; 2 * dtk_size];
        keccak::cshake_derive(&self.ddk, &self.dsh, &[], &mut prnd);

        let (ciphertext, received_mac) = request.payload.split_at(dtk_size);
        let header = request.header_serialize();
        let expected = kex_mac(self.cfg, &prnd[dtk_size..], &self.dsh, ciphertext, &header);
        if !verify_tag(&expected, received_mac) {
            prnd.zeroize();
            return Err(SkdpError::KexAuthFailure);
        }

        let mut dtk = ciphertext.to_vec();
        for (tok, ks) in dtk.iter_mut().zip(prnd.iter()) {
            *tok ^= ks;
        }
        prnd.zeroize();

        // Raise the server receive channel from the device token.
        self.rx_cipher = Some(install_cipher(
            self.cfg,
            &dtk,
            &self.dsh,
            CipherDirection::Decrypt,
        )?);
        dtk.zeroize();

        // Fresh server token for the downstream channel.
        let stk_size = self.cfg.stk_size();
        let mut stk = vec![0u8; stk_size];
        random::fill_from(rng, &mut stk)?;

        let mut prnd2 = vec![0u8; 2 * stk_size];
        keccak::cshake_derive(&self.ddk, &self.ssh, &[], &mut prnd2);

        let mut ciphertext = stk.clone();
        for (ct, ks) in ciphertext.iter_mut().zip(prnd2.iter()) {
            *ct ^= ks;
        }

        // During the key exchange the sequence is stamped before the
        // counter advances; a ratchet response rides the record-layer
        // convention where the counter advances first.
        let sequence = if self.phase == PacketFlag::SessionEstablished {
            self.tx_seq += 1;
            self.tx_seq
        } else {
            let sequence = self.tx_seq;
            self.tx_seq += 1;
            sequence
        };
        let mut packet = NetworkPacket::new(PacketFlag::ExchangeResponse, sequence, Vec::new());
        packet.msg_len = self.cfg.exchange_message_size() as u32;
        let header = packet.header_serialize();

        let mac = kex_mac(self.cfg, &prnd2[stk_size..], &self.ssh, &ciphertext, &header);
        prnd2.zeroize();

        packet.payload = ciphertext;
        packet.payload.extend_from_slice(&mac);

        // Raise the server transmit channel from the server token.
        self.tx_cipher = Some(install_cipher(
            self.cfg,
            &stk,
            &self.ssh,
            CipherDirection::Encrypt,
        )?);
        stk.zeroize();

        if self.phase == PacketFlag::ConnectResponse {
            self.phase = PacketFlag::ExchangeResponse;
        }
        Ok(packet)
    }

    /// Phase 3: decrypts the establish request and echoes back the hash of
    /// the client's verification token, completing the exchange.
    pub fn establish_response(&mut self, request: &NetworkPacket) -> SkdpResult<NetworkPacket> {
        if self.phase != PacketFlag::ExchangeResponse {
            return Err(SkdpError::InvalidInput);
        }
        self.check_incoming(request, PacketFlag::EstablishRequest)?;
        if request.payload.len() != self.cfg.establish_request_message_size() {
            return Err(SkdpError::InvalidInput);
        }

        let header = request.header_serialize();
        let rx_cipher = self.rx_cipher.as_mut().ok_or(SkdpError::ChannelDown)?;
        rx_cipher.set_associated(&header);
        let vtok = rx_cipher.decrypt(&request.payload)?;

        let vhash = keccak::sha3(self.cfg, &vtok);

        let mut packet = NetworkPacket::new(PacketFlag::EstablishResponse, self.tx_seq, Vec::new());
        packet.msg_len = self.cfg.establish_response_message_size() as u32;
        let header = packet.header_serialize();

        let tx_cipher = self.tx_cipher.as_mut().ok_or(SkdpError::ChannelDown)?;
        tx_cipher.set_associated(&header);
        packet.payload = tx_cipher.encrypt(&vhash)?;

        self.tx_seq += 1;
        if !self.ratchet {
            // The derived device key is no longer required.
            self.ddk.zeroize();
            self.ddk.clear();
        }
        self.phase = PacketFlag::SessionEstablished;
        Ok(packet)
    }

    /// Encrypts an application message into a record packet.
    pub fn encrypt_message(&mut self, message: &[u8]) -> SkdpResult<NetworkPacket> {
        if self.phase != PacketFlag::SessionEstablished {
            return Err(SkdpError::ChannelDown);
        }
        if message.len() > MESSAGE_SIZE {
            return Err(SkdpError::InvalidInput);
        }
        self.tx_seq += 1;
        let mut packet = NetworkPacket::new(PacketFlag::EncryptedMessage, self.tx_seq, Vec::new());
        packet.msg_len = (message.len() + self.cfg.mactag_size()) as u32;
        let header = packet.header_serialize();

        let tx_cipher = self.tx_cipher.as_mut().ok_or(SkdpError::ChannelDown)?;
        tx_cipher.set_associated(&header);
        packet.payload = tx_cipher.encrypt(message)?;
        Ok(packet)
    }

    /// Authenticates and decrypts a record packet.
    pub fn decrypt_message(&mut self, packet: &NetworkPacket) -> SkdpResult<Vec<u8>> {
        self.rx_seq += 1;
        if packet.sequence != self.rx_seq || packet.sequence == SEQUENCE_TERMINATOR {
            return Err(SkdpError::Unsequenced);
        }
        if self.phase != PacketFlag::SessionEstablished {
            return Err(SkdpError::ChannelDown);
        }
        if !packet.time_valid() {
            return Err(SkdpError::PacketExpired);
        }
        if packet.payload.len() < self.cfg.mactag_size() {
            return Err(SkdpError::InvalidInput);
        }

        let header = packet.header_serialize();
        let rx_cipher = self.rx_cipher.as_mut().ok_or(SkdpError::ChannelDown)?;
        rx_cipher.set_associated(&header);
        rx_cipher.decrypt(&packet.payload)
    }

    /// Answers a client ratchet request after establishment, re-keying
    /// both channel ciphers. Only available when the session was created
    /// with the ratchet enabled.
    pub fn ratchet_response<R: RngCore + CryptoRng>(
        &mut self,
        request: &NetworkPacket,
        rng: &mut R,
    ) -> SkdpResult<NetworkPacket> {
        if self.phase != PacketFlag::SessionEstablished || !self.ratchet {
            return Err(SkdpError::InvalidInput);
        }
        if request.flag == PacketFlag::ErrorCondition
            || request.flag == PacketFlag::ConnectionTerminate
        {
            return Err(remote_error(request));
        }
        self.rx_seq += 1;
        if request.sequence != self.rx_seq {
            return Err(SkdpError::Unsequenced);
        }
        if request.flag != PacketFlag::ExchangeRequest {
            return Err(SkdpError::ConnectionFailure);
        }
        if !request.time_valid() {
            return Err(SkdpError::PacketExpired);
        }
        self.exchange_issue(request, rng)
    }

    /// Tears the session down, zeroizing all key material.
    pub fn dispose(&mut self) {
        self.sdk.zeroize();
        self.ddk.zeroize();
        self.dsh.zeroize();
        self.ssh.zeroize();
        self.tx_cipher = None;
        self.rx_cipher = None;
        self.tx_seq = 0;
        self.rx_seq = 0;
        self.phase = PacketFlag::None;
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ServerSession(phase: {:?}, tx_seq: {}, rx_seq: {}, [REDACTED])",
            self.phase, self.tx_seq, self.rx_seq
        )
    }
}
