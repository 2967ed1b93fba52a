// SKDP Keep-Alive
// Periodic liveness probe running beside the application stream.
//
// The server stamps a probe with the current epoch time and its own
// sequence counter; the client echoes the packet unchanged. Keep-alive
// packets ride outside the record layer and never advance its sequence
// numbers.

use crate::error::{SkdpError, SkdpResult};
use crate::packet::{NetworkPacket, PacketFlag};
use crate::{time, KEEPALIVE_MESSAGE};

/// Keep-alive state for one session, owned by the probing side.
#[derive(Debug, Clone, Default)]
pub struct KeepAliveState {
    /// The epoch time stamped into the last probe.
    pub etime: u64,
    /// The keep-alive packet sequence counter.
    pub seq_ctr: u64,
    /// Whether the last probe has been echoed back.
    pub recd: bool,
}

impl KeepAliveState {
    /// Creates a fresh keep-alive state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the next probe packet and arms the state: the stored epoch
    /// time must come back unchanged before the timeout.
    pub fn build_probe(&mut self) -> NetworkPacket {
        let etime = time::epoch_seconds();
        self.etime = etime;
        self.recd = false;
        NetworkPacket::new(
            PacketFlag::KeepAliveRequest,
            self.seq_ctr,
            etime.to_le_bytes().to_vec(),
        )
    }

    /// Verifies a probe echo: the sequence must match the counter and the
    /// payload must carry back the stamped epoch time. On success the
    /// counter advances and the state disarms.
    pub fn verify_echo(&mut self, packet: &NetworkPacket) -> SkdpResult<()> {
        if packet.flag != PacketFlag::KeepAliveRequest
            || packet.payload.len() != KEEPALIVE_MESSAGE
        {
            return Err(SkdpError::BadKeepAlive);
        }
        if packet.sequence != self.seq_ctr {
            return Err(SkdpError::BadKeepAlive);
        }
        let mut etime = [0u8; KEEPALIVE_MESSAGE];
        etime.copy_from_slice(&packet.payload);
        if u64::from_le_bytes(etime) != self.etime {
            return Err(SkdpError::BadKeepAlive);
        }
        self.seq_ctr += 1;
        self.recd = true;
        Ok(())
    }
}

/// Builds the echo for a received probe: an identical packet with the same
/// sequence and payload.
pub fn echo_probe(probe: &NetworkPacket) -> SkdpResult<NetworkPacket> {
    if probe.flag != PacketFlag::KeepAliveRequest || probe.payload.len() != KEEPALIVE_MESSAGE {
        return Err(SkdpError::BadKeepAlive);
    }
    Ok(probe.clone())
}
