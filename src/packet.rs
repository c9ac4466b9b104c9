// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2019-2024 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! The protocol packet tagged union, inbound validators, and outbound
//! constructors. Field-level wire encoding belongs to the framing layer
//! this crate excludes; here a packet is just the typed payload the core
//! reasons about, queued per peer in send order.

use log::warn;

use crate::config::Config;
use crate::error::ProtocolError;
use crate::htlc::Owner;
use crate::peer::{Peer, Side};

/// A relative or absolute locktime as carried on the wire, tagged with the
/// unit it was expressed in. Counterparties may propose either a
/// blocks-relative delay or expiry, or a seconds-denominated one; this core
/// only ever accepts the blocks form, mirroring the counterpart's
/// `LOCKTIME__LOCKTIME_BLOCKS`/`abs_locktime_is_seconds` rejections of a
/// seconds-denominated value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locktime {
    Blocks(u32),
    Seconds(u32),
}

impl Locktime {
    /// The blocks value, or `None` if this locktime was expressed in
    /// seconds.
    pub fn as_blocks(self) -> Option<u32> {
        match self {
            Locktime::Blocks(n) => Some(n),
            Locktime::Seconds(_) => None,
        }
    }
}

/// One protocol message. Variant names mirror the wire tags; payloads carry
/// only the fields this core's logic needs, not full cryptographic
/// material (keys, scripts) which stays opaque bytes handed to the
/// external collaborators.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Open {
        delay: Locktime,
        min_depth: u32,
        commitment_fee_rate: u64,
        offers_anchor: bool,
    },
    OpenAnchor {
        txid: [u8; 32],
        output_index: u32,
        amount_satoshis: u64,
    },
    OpenCommitSig {
        sig: [u8; 64],
    },
    OpenComplete,
    UpdateAddHtlc {
        id: u64,
        msatoshis: u64,
        rhash: [u8; 32],
        expiry: Locktime,
        routing: Vec<u8>,
    },
    UpdateFulfillHtlc {
        id: u64,
        preimage: [u8; 32],
    },
    UpdateFailHtlc {
        id: u64,
    },
    UpdateCommit {
        sig: [u8; 64],
    },
    UpdateRevocation {
        preimage: [u8; 32],
        next_revocation_hash: [u8; 32],
    },
    CloseShutdown {
        script: Vec<u8>,
    },
    CloseSignature {
        fee_satoshis: u64,
        sig: [u8; 64],
    },
    Error {
        message: String,
    },
    Reconnect {
        ack: u64,
    },
}

/// An outbound packet stamped with its place in this peer's FIFO send
/// order.
#[derive(Clone, Debug, PartialEq)]
pub struct Queued {
    pub order: u64,
    pub packet: Packet,
}

/// Validate and apply an inbound `Open` against our configured bounds.
pub fn accept_open(
    cfg: &Config,
    our_fee_rate: u64,
    our_offers_anchor: bool,
    open: &Packet,
) -> Result<(), ProtocolError> {
    let (delay, min_depth, fee_rate, their_offers_anchor) = match open {
        Packet::Open { delay, min_depth, commitment_fee_rate, offers_anchor } => {
            (*delay, *min_depth, *commitment_fee_rate, *offers_anchor)
        }
        _ => return Err(ProtocolError::UnexpectedHtlcState(0)),
    };
    let delay = delay.as_blocks().ok_or(ProtocolError::DelayNotInBlocks)?;
    if delay > cfg.locktime_max {
        return Err(ProtocolError::DelayTooLarge(delay));
    }
    if min_depth > cfg.anchor_confirms_max {
        return Err(ProtocolError::MinDepthTooLarge { proposed: min_depth, max: cfg.anchor_confirms_max });
    }
    let min = our_fee_rate * cfg.commitment_fee_min_percent as u64 / 100;
    let max = our_fee_rate * cfg.commitment_fee_max_percent as u64 / 100;
    if fee_rate < min || fee_rate > max {
        return Err(ProtocolError::FeeRateOutOfBand { proposed: fee_rate, min, max });
    }
    if their_offers_anchor == our_offers_anchor {
        return Err(ProtocolError::AnchorOfferMismatch);
    }
    Ok(())
}

/// Validate and record an inbound `UpdateAddHtlc`.
pub fn accept_add_htlc(peer: &mut Peer, cfg: &Config, pkt: &Packet) -> Result<(), ProtocolError> {
    match pkt {
        Packet::UpdateAddHtlc { id, msatoshis, rhash, expiry, routing } => {
            let expiry = expiry.as_blocks().ok_or(ProtocolError::ExpiryInSeconds)?;
            peer.accept_remote_htlc(cfg, *id, *msatoshis, *rhash, expiry, routing.clone())
        }
        _ => Err(ProtocolError::UnexpectedHtlcState(0)),
    }
}

/// Validate and apply an inbound `UpdateFulfillHtlc` for an HTLC we offered.
pub fn accept_fulfill_htlc(peer: &mut Peer, pkt: &Packet) -> Result<(), ProtocolError> {
    match pkt {
        Packet::UpdateFulfillHtlc { id, preimage } => peer.fulfill_htlc(Owner::Local, *id, *preimage),
        _ => Err(ProtocolError::UnexpectedHtlcState(0)),
    }
}

/// Validate and apply an inbound `UpdateFailHtlc` for an HTLC we offered.
pub fn accept_fail_htlc(peer: &mut Peer, pkt: &Packet) -> Result<(), ProtocolError> {
    match pkt {
        Packet::UpdateFailHtlc { id } => peer.fail_htlc(Owner::Local, *id),
        _ => Err(ProtocolError::UnexpectedHtlcState(0)),
    }
}

/// Validate an inbound `UpdateCommit` covering `local`'s staging ledger: a
/// signature is required exactly when `local.staging_cstate` has changed
/// since the snapshot its last commitment covers (`local.last_committed`).
/// When nothing is outstanding there is nothing to sign, so an all-zero
/// placeholder is accepted rather than rejected.
pub fn accept_commit(local: &Side, pkt: &Packet) -> Result<[u8; 64], ProtocolError> {
    let dirty = local.staging_cstate != local.last_committed;
    match pkt {
        Packet::UpdateCommit { sig } => {
            if dirty && *sig == [0u8; 64] {
                warn!("rejecting all-zero commit signature for a dirty staging ledger");
                return Err(ProtocolError::MissingCommitSignature);
            }
            Ok(*sig)
        }
        _ => Err(ProtocolError::MissingCommitSignature),
    }
}

/// Validate an inbound `UpdateRevocation` against the expected monotone
/// shachain index, delegating the actual hash-chain bookkeeping to `Peer`.
pub fn accept_revocation(peer: &mut Peer, pkt: &Packet) -> Result<(), ProtocolError> {
    match pkt {
        Packet::UpdateRevocation { preimage, next_revocation_hash } => {
            peer.accept_revocation(*preimage, *next_revocation_hash)
        }
        _ => Err(ProtocolError::BadRevocationPreimage),
    }
}

/// Queue an outbound packet, stamping it with the peer's next FIFO order.
fn queue(peer_order: &mut u64, queue: &mut Vec<Queued>, packet: Packet) {
    let order = *peer_order;
    *peer_order += 1;
    queue.push(Queued { order, packet });
}

/// Outbound packet constructors. These mirror the accept-side validators:
/// each appends to `out` rather than writing to a socket, leaving wire
/// framing to the excluded transport layer.
pub struct OutboundQueue {
    next_order: u64,
    pub queue: Vec<Queued>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        OutboundQueue { next_order: 0, queue: Vec::new() }
    }

    pub fn queue_pkt_add_htlc(&mut self, id: u64, msatoshis: u64, rhash: [u8; 32], expiry: u32, routing: Vec<u8>) {
        let expiry = Locktime::Blocks(expiry);
        queue(&mut self.next_order, &mut self.queue, Packet::UpdateAddHtlc { id, msatoshis, rhash, expiry, routing });
    }

    pub fn queue_pkt_fulfill_htlc(&mut self, id: u64, preimage: [u8; 32]) {
        queue(&mut self.next_order, &mut self.queue, Packet::UpdateFulfillHtlc { id, preimage });
    }

    pub fn queue_pkt_fail_htlc(&mut self, id: u64) {
        queue(&mut self.next_order, &mut self.queue, Packet::UpdateFailHtlc { id });
    }

    pub fn queue_pkt_commit(&mut self, sig: [u8; 64]) {
        queue(&mut self.next_order, &mut self.queue, Packet::UpdateCommit { sig });
    }

    pub fn queue_pkt_revocation(&mut self, preimage: [u8; 32], next_revocation_hash: [u8; 32]) {
        queue(&mut self.next_order, &mut self.queue, Packet::UpdateRevocation { preimage, next_revocation_hash });
    }

    pub fn queue_pkt_error(&mut self, message: String) {
        queue(&mut self.next_order, &mut self.queue, Packet::Error { message });
    }

    /// Drop all queued packets, as happens on peer disconnect. In-flight
    /// persistence transactions are unaffected; they commit or roll back
    /// independently.
    pub fn cancel_all(&mut self) {
        self.queue.clear();
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
