// SKDP Client Key Exchange
// The device side of the protocol: initiates the exchange, contributes the
// device token key, and verifies the server echo before raising the
// session.

use crate::config::ProtocolConfig;
use crate::crypto::cipher::{CipherDirection, SessionCipher};
use crate::crypto::{keccak, random};
use crate::error::{SkdpError, SkdpResult};
use crate::keys::DeviceKey;
use crate::packet::{NetworkPacket, PacketFlag};
use crate::protocol::{install_cipher, kex_mac, remote_error, verify_tag};
use crate::{time, KID_SIZE, MESSAGE_SIZE, SEQUENCE_TERMINATOR};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

/// The client (device) session state.
///
/// Drives the four-message key exchange and carries the record-layer
/// cipher pair afterwards. All methods are transport-agnostic: they accept
/// and produce [`NetworkPacket`] values and never touch a socket.
pub struct ClientSession {
    cfg: ProtocolConfig,
    kid: [u8; KID_SIZE],
    ddk: Vec<u8>,
    dsh: Vec<u8>,
    ssh: Vec<u8>,
    vtok: Vec<u8>,
    expiration: u64,
    ratchet: bool,
    phase: PacketFlag,
    tx_cipher: Option<SessionCipher>,
    rx_cipher: Option<SessionCipher>,
    tx_seq: u64,
    rx_seq: u64,
}

impl ClientSession {
    /// Initializes a session from the device key-set.
    ///
    /// With `ratchet` enabled the session retains its derivation key after
    /// establishment so it can request fresh channel keys; otherwise the
    /// key material is zeroized the moment the session is established.
    pub fn new(dkey: &DeviceKey, ratchet: bool) -> SkdpResult<Self> {
        if dkey.expiration <= time::epoch_seconds() {
            return Err(SkdpError::InvalidInput);
        }
        Ok(ClientSession {
            cfg: dkey.config(),
            kid: dkey.kid,
            ddk: dkey.ddk().to_vec(),
            dsh: Vec::new(),
            ssh: Vec::new(),
            vtok: Vec::new(),
            expiration: dkey.expiration,
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

    /// The session expiration in seconds from epoch.
    pub fn expiration(&self) -> u64 {
        self.expiration
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

    /// Phase 1: builds the connection request carrying the key identity,
    /// the configuration string and a fresh session token, and commits to
    /// the device session hash.
    pub fn connect_request<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> SkdpResult<NetworkPacket> {
        if self.phase != PacketFlag::None {
            return Err(SkdpError::InvalidInput);
        }
        let mut stok = vec![0u8; self.cfg.stok_size()];
        random::fill_from(rng, &mut stok)?;

        let mut payload = Vec::with_capacity(self.cfg.connect_message_size());
        payload.extend_from_slice(&self.kid);
        payload.extend_from_slice(self.cfg.config_string());
        payload.extend_from_slice(&stok);

        // dsh = H(kid || cfg || stok)
        self.dsh = keccak::sha3(self.cfg, &payload);

        let packet = NetworkPacket::new(PacketFlag::ConnectRequest, self.tx_seq, payload);
        self.tx_seq += 1;
        self.phase = PacketFlag::ConnectRequest;
        Ok(packet)
    }

    /// Phase 2: consumes the connection response, commits to the server
    /// session hash, and builds the exchange request carrying the
    /// encrypted device token key. The transmit cipher is keyed as a side
    /// effect.
    pub fn exchange_request<R: RngCore + CryptoRng>(
        &mut self,
        response: &NetworkPacket,
        rng: &mut R,
    ) -> SkdpResult<NetworkPacket> {
        if self.phase != PacketFlag::ConnectRequest {
            return Err(SkdpError::InvalidInput);
        }
        self.check_incoming(response, PacketFlag::ConnectResponse)?;
        if response.payload.len() != self.cfg.connect_message_size() {
            return Err(SkdpError::InvalidInput);
        }

        // ssh = H(sid || cfg || stok)
        self.ssh = keccak::sha3(self.cfg, &response.payload);

        let dtk_size = self.cfg.dtk_size();
        let mut dtk = vec![0u8; dtk_size];
        random::fill_from(rng, &mut dtk)?;

        // Encryption and MAC keys from the embedded key and session hash.
        let mut prnd = vec![0u8; 2 * dtk_size];
        keccak::cshake_derive(&self.ddk, &self.dsh, &[], &mut prnd);

        let mut ciphertext = dtk.clone();
        for (ct, ks) in ciphertext.iter_mut().zip(prnd.iter()) {
            *ct ^= ks;
        }

        let mut packet = NetworkPacket::new(PacketFlag::ExchangeRequest, self.tx_seq, Vec::new());
        packet.msg_len = self.cfg.exchange_message_size() as u32;
        let header = packet.header_serialize();

        let mac = kex_mac(self.cfg, &prnd[dtk_size..], &self.dsh, &ciphertext, &header);
        prnd.zeroize();

        packet.payload = ciphertext;
        packet.payload.extend_from_slice(&mac);

        // Raise the client transmit channel.
        self.tx_cipher = Some(install_cipher(
            self.cfg,
            &dtk,
            &self.dsh,
            CipherDirection::Encrypt,
        )?);
        dtk.zeroize();

        self.tx_seq += 1;
        self.phase = PacketFlag::ExchangeRequest;
        Ok(packet)
    }

    /// Phase 3: authenticates the exchange response, recovers the server
    /// token key, keys the receive cipher, and builds the establish
    /// request carrying an encrypted random verification token.
    pub fn establish_request<R: RngCore + CryptoRng>(
        &mut self,
        response: &NetworkPacket,
        rng: &mut R,
    ) -> SkdpResult<NetworkPacket> {
        if self.phase != PacketFlag::ExchangeRequest {
            return Err(SkdpError::InvalidInput);
        }
        self.check_incoming(response, PacketFlag::ExchangeResponse)?;
        if response.payload.len() != self.cfg.exchange_message_size() {
            return Err(SkdpError::InvalidInput);
        }

        let stk_size = self.cfg.stk_size();
        let mut prnd = vec![0u8; 2 * stk_size];
        keccak::cshake_derive(&self.ddk, &self.ssh, &[], &mut prnd);

        let (ciphertext, received_mac) = response.payload.split_at(stk_size);
        let header = response.header_serialize();
        let expected = kex_mac(self.cfg, &prnd[stk_size..], &self.ssh, ciphertext, &header);
        if !verify_tag(&expected, received_mac) {
            prnd.zeroize();
            return Err(SkdpError::KexAuthFailure);
        }

        let mut stk = ciphertext.to_vec();
        for (tok, ks) in stk.iter_mut().zip(prnd.iter()) {
            *tok ^= ks;
        }
        prnd.zeroize();

        // Raise the client receive channel.
        self.rx_cipher = Some(install_cipher(
            self.cfg,
            &stk,
            &self.ssh,
            CipherDirection::Decrypt,
        )?);
        stk.zeroize();

        // Random verification token, echoed back as a hash by the server.
        self.vtok = vec![0u8; self.cfg.sth_size()];
        random::fill_from(rng, &mut self.vtok)?;

        let mut packet = NetworkPacket::new(PacketFlag::EstablishRequest, self.tx_seq, Vec::new());
        packet.msg_len = self.cfg.establish_request_message_size() as u32;
        let header = packet.header_serialize();

        let tx_cipher = self.tx_cipher.as_mut().ok_or(SkdpError::ChannelDown)?;
        tx_cipher.set_associated(&header);
        packet.payload = tx_cipher.encrypt(&self.vtok)?;

        self.tx_seq += 1;
        self.phase = PacketFlag::EstablishRequest;
        Ok(packet)
    }

    /// Phase 4: decrypts the establish response and verifies the hashed
    /// verification token, completing the exchange.
    pub fn establish_verify(&mut self, response: &NetworkPacket) -> SkdpResult<()> {
        if self.phase != PacketFlag::EstablishRequest {
            return Err(SkdpError::InvalidInput);
        }
        self.check_incoming(response, PacketFlag::EstablishResponse)?;
        if response.payload.len() != self.cfg.establish_response_message_size() {
            return Err(SkdpError::InvalidInput);
        }

        let header = response.header_serialize();
        let rx_cipher = self.rx_cipher.as_mut().ok_or(SkdpError::ChannelDown)?;
        rx_cipher.set_associated(&header);
        let vhash = rx_cipher.decrypt(&response.payload)?;

        let expected = keccak::sha3(self.cfg, &self.vtok);
        if !verify_tag(&expected, &vhash) {
            self.phase = PacketFlag::None;
            return Err(SkdpError::EstablishFailure);
        }

        self.vtok.zeroize();
        self.vtok.clear();
        if !self.ratchet {
            // The device key material is no longer required.
            self.ddk.zeroize();
            self.kid.zeroize();
        }
        self.phase = PacketFlag::SessionEstablished;
        Ok(())
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

    /// Requests fresh channel keys from the server. Only available when the
    /// session was created with the ratchet enabled. The transmit channel
    /// re-keys immediately; the receive channel re-keys in
    /// [`ClientSession::ratchet_finalize`].
    pub fn ratchet_request<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> SkdpResult<NetworkPacket> {
        if self.phase != PacketFlag::SessionEstablished || !self.ratchet {
            return Err(SkdpError::InvalidInput);
        }

        let dtk_size = self.cfg.dtk_size();
        let mut dtk = vec![0u8; dtk_size];
        random::fill_from(rng, &mut dtk)?;

        let mut prnd = vec![0u8; 2 * dtk_size];
        keccak::cshake_derive(&self.ddk, &self.dsh, &[], &mut prnd);

        let mut ciphertext = dtk.clone();
        for (ct, ks) in ciphertext.iter_mut().zip(prnd.iter()) {
            *ct ^= ks;
        }

        self.tx_seq += 1;
        let mut packet = NetworkPacket::new(PacketFlag::ExchangeRequest, self.tx_seq, Vec::new());
        packet.msg_len = self.cfg.exchange_message_size() as u32;
        let header = packet.header_serialize();

        let mac = kex_mac(self.cfg, &prnd[dtk_size..], &self.dsh, &ciphertext, &header);
        prnd.zeroize();

        packet.payload = ciphertext;
        packet.payload.extend_from_slice(&mac);

        self.tx_cipher = Some(install_cipher(
            self.cfg,
            &dtk,
            &self.dsh,
            CipherDirection::Encrypt,
        )?);
        dtk.zeroize();
        Ok(packet)
    }

    /// Completes a ratchet by authenticating the server's response and
    /// re-keying the receive channel.
    pub fn ratchet_finalize(&mut self, response: &NetworkPacket) -> SkdpResult<()> {
        if self.phase != PacketFlag::SessionEstablished || !self.ratchet {
            return Err(SkdpError::InvalidInput);
        }
        if response.flag == PacketFlag::ErrorCondition
            || response.flag == PacketFlag::ConnectionTerminate
        {
            return Err(remote_error(response));
        }
        self.rx_seq += 1;
        if response.sequence != self.rx_seq {
            return Err(SkdpError::Unsequenced);
        }
        if response.flag != PacketFlag::ExchangeResponse {
            return Err(SkdpError::ConnectionFailure);
        }
        if !response.time_valid() {
            return Err(SkdpError::PacketExpired);
        }
        if response.payload.len() != self.cfg.exchange_message_size() {
            return Err(SkdpError::InvalidInput);
        }

        let stk_size = self.cfg.stk_size();
        let mut prnd = vec![0u8; 2 * stk_size];
        keccak::cshake_derive(&self.ddk, &self.ssh, &[], &mut prnd);

        let (ciphertext, received_mac) = response.payload.split_at(stk_size);
        let header = response.header_serialize();
        let expected = kex_mac(self.cfg, &prnd[stk_size..], &self.ssh, ciphertext, &header);
        if !verify_tag(&expected, received_mac) {
            prnd.zeroize();
            return Err(SkdpError::KexAuthFailure);
        }

        let mut stk = ciphertext.to_vec();
        for (tok, ks) in stk.iter_mut().zip(prnd.iter()) {
            *tok ^= ks;
        }
        prnd.zeroize();

        self.rx_cipher = Some(install_cipher(
            self.cfg,
            &stk,
            &self.ssh,
            CipherDirection::Decrypt,
        )?);
        stk.zeroize();
        Ok(())
    }

    /// Tears the session down, zeroizing all key material.
    pub fn dispose(&mut self) {
        self.ddk.zeroize();
        self.dsh.zeroize();
        self.ssh.zeroize();
        self.vtok.zeroize();
        self.kid.zeroize();
        self.tx_cipher = None;
        self.rx_cipher = None;
        self.tx_seq = 0;
        self.rx_seq = 0;
        self.phase = PacketFlag::None;
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ClientSession(phase: {:?}, tx_seq: {}, rx_seq: {}, [REDACTED])",
            self.phase, self.tx_seq, self.rx_seq
        )
    }
}
