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

//! `Peer` ties the balance ledger, the HTLC state machine, and the
//! commitment cycle together into one per-channel aggregate: local and
//! remote commitment "staging" views, the live HTLC table, the chain of
//! revocation preimages the counterparty has handed us, and whatever
//! closing negotiation is in flight.

use std::collections::BTreeMap;

use log::{debug, trace, warn};

use crate::adapter::{ChainAdapter, KeyVault, PeerId};
use crate::commitment::{derive_revocation_preimage, revocation_index, CommitInfo};
use crate::config::Config;
use crate::error::ProtocolError;
use crate::fee::is_dust;
use crate::htlc::{Htlc, HtlcEvent, HtlcState, Owner};
use crate::ledger::ChannelState;
use crate::shachain::{sha256, Shachain};

/// One side's commitment bookkeeping paired with the ledger it would commit
/// to next.
#[derive(Clone, Debug)]
pub struct Side {
    pub commit: CommitInfo,
    pub staging_cstate: ChannelState,
    /// Snapshot of `staging_cstate` as of the last commitment signature this
    /// side's commitment was actually covered by. Compared against the live
    /// `staging_cstate` to tell whether a new commitment has anything new
    /// to sign.
    pub last_committed: ChannelState,
}

/// Closing-negotiation state, optional on disk (see the durable store's
/// `closing` table); the core only stores and reloads it, it never conducts
/// the negotiation itself.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[derive(StrictEncode, StrictDecode)]
pub struct ClosingState {
    pub our_fee: Option<u64>,
    pub their_fee: Option<u64>,
    pub their_sig: Option<[u8; 64]>,
    pub our_script: Option<Vec<u8>>,
    pub their_script: Option<Vec<u8>>,
    pub shutdown_order: Option<u64>,
    pub closing_order: Option<u64>,
    pub sigs_in: u32,
}

/// The full state of one channel with one counterparty.
#[derive(Clone, Debug)]
pub struct Peer {
    pub local: Side,
    pub remote: Side,
    htlcs: BTreeMap<(Owner, u64), Htlc>,
    next_local_id: u64,
    pub their_preimages: Shachain,
    pub closing: ClosingState,
    order_counter: u64,
    /// Which side paid the initial commitment fee out of the anchor. Fixed
    /// for the channel's lifetime; kept here (rather than re-derived from
    /// ledger contents, which drift as HTLCs settle) so the store can
    /// re-seed `ChannelState::initial` on reload.
    pub funder: Owner,
}

impl Peer {
    /// Build a freshly opened channel. Both sides start from the same
    /// initial ledger; `funder` pays the initial commitment fee out of the
    /// anchor.
    pub fn new(anchor_satoshis: u64, fee_rate: u64, funder: Owner) -> Result<Peer, ProtocolError> {
        let initial = ChannelState::initial(anchor_satoshis, fee_rate, funder)?;
        let mut peer = Peer {
            local: Side { commit: CommitInfo::new(0), staging_cstate: initial.clone(), last_committed: initial.clone() },
            remote: Side { commit: CommitInfo::new(0), staging_cstate: initial.clone(), last_committed: initial },
            htlcs: BTreeMap::new(),
            next_local_id: 0,
            their_preimages: Shachain::new(),
            closing: ClosingState::default(),
            order_counter: 0,
            funder,
        };
        peer.local.commit.order = peer.next_order();
        peer.remote.commit.order = peer.next_order();
        Ok(peer)
    }

    /// Rebuild a `Peer` from already-reconstructed parts. Used only by the
    /// store's recovery path, which derives `local`/`remote` by replaying
    /// the HTLC table rather than by running the normal open sequence.
    pub(crate) fn from_parts(
        local: Side,
        remote: Side,
        their_preimages: Shachain,
        closing: ClosingState,
        order_counter: u64,
        funder: Owner,
    ) -> Peer {
        Peer { local, remote, htlcs: BTreeMap::new(), next_local_id: 0, their_preimages, closing, order_counter, funder }
    }

    fn next_order(&mut self) -> u64 {
        let order = self.order_counter;
        self.order_counter += 1;
        order
    }

    /// Every live (non-terminal) HTLC offered by `owner`.
    fn live_count(&self, owner: Owner) -> u32 {
        self.htlcs
            .values()
            .filter(|h| h.owner == owner && !h.state.is_terminal())
            .count() as u32
    }

    /// Look up an HTLC by its offerer and id.
    pub fn htlc(&self, owner: Owner, id: u64) -> Option<&Htlc> {
        self.htlcs.get(&(owner, id))
    }

    /// All HTLCs, offered and received, in `(owner, id)` order.
    pub fn htlcs(&self) -> impl Iterator<Item = &Htlc> {
        self.htlcs.values()
    }

    /// Insert a previously-constructed HTLC verbatim (used by the store's
    /// replay path, which reconstructs records whose state was already
    /// advanced before a crash rather than driving them through `apply`).
    pub fn insert_htlc(&mut self, htlc: Htlc) {
        if htlc.owner == Owner::Local && htlc.id >= self.next_local_id {
            self.next_local_id = htlc.id + 1;
        }
        self.htlcs.insert((htlc.owner, htlc.id), htlc);
    }

    /// We offer a new HTLC. Neither commitment reflects it yet — per the
    /// state machine both `local_committed` and `remote_committed` start
    /// false — but the offerer must already be able to afford it, so this
    /// checks affordability against a trial copy of our own staging ledger
    /// without committing the change; `apply_event` applies it for real to
    /// whichever side's commitment it actually lands in as the handshake
    /// progresses.
    pub fn offer_htlc(
        &mut self,
        adapter: &dyn ChainAdapter,
        msatoshis: u64,
        rhash: [u8; 32],
        expiry: u32,
        routing: Vec<u8>,
    ) -> Result<u64, ProtocolError> {
        if msatoshis == 0 {
            return Err(ProtocolError::ZeroAmountHtlc);
        }
        let dust = is_dust(msatoshis, adapter.dust_limit_sat());
        let mut trial = self.local.staging_cstate.clone();
        if !trial.add_htlc(msatoshis, Owner::Local, dust) {
            return Err(ProtocolError::Unaffordable(msatoshis));
        }
        let id = self.next_local_id;
        self.next_local_id += 1;
        self.htlcs.insert(
            (Owner::Local, id),
            Htlc {
                id,
                owner: Owner::Local,
                msatoshis,
                rhash,
                expiry,
                routing,
                preimage: None,
                state: HtlcState::initial_offered(),
                src: None,
            },
        );
        debug!("offered htlc {} for {} msat", id, msatoshis);
        Ok(id)
    }

    /// Validate and record an HTLC the counterparty is offering us.
    pub fn accept_remote_htlc(
        &mut self,
        cfg: &Config,
        id: u64,
        msatoshis: u64,
        rhash: [u8; 32],
        expiry: u32,
        routing: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        if msatoshis == 0 {
            return Err(ProtocolError::ZeroAmountHtlc);
        }
        if self.htlcs.contains_key(&(Owner::Remote, id)) {
            return Err(ProtocolError::DuplicateHtlcId(id));
        }
        let count = self.live_count(Owner::Remote);
        if count >= cfg.max_htlcs_per_side {
            warn!("remote htlc count {} exceeds per-side limit", count);
            return Err(ProtocolError::TooManyHtlcs(count));
        }
        self.htlcs.insert(
            (Owner::Remote, id),
            Htlc {
                id,
                owner: Owner::Remote,
                msatoshis,
                rhash,
                expiry,
                routing,
                preimage: None,
                state: HtlcState::initial_received(),
                src: None,
            },
        );
        Ok(())
    }

    /// Begin removing a fully-committed HTLC by revealing its preimage
    /// (fulfill). Works symmetrically for HTLCs we offered (the peer is
    /// the one telling us the preimage) and HTLCs the peer offered us (we
    /// are the one revealing it): in both cases the precondition is simply
    /// that the HTLC has reached its add-path terminal state.
    pub fn fulfill_htlc(&mut self, owner: Owner, id: u64, preimage: [u8; 32]) -> Result<(), ProtocolError> {
        let expected_terminal = match owner {
            Owner::Local => HtlcState::SentAddAckRevocation,
            Owner::Remote => HtlcState::RcvdAddAckRevocation,
        };
        let htlc = self.htlcs.get_mut(&(owner, id)).ok_or(ProtocolError::UnknownHtlc(id))?;
        if htlc.state == expected_terminal && htlc.preimage == Some(preimage) {
            return Ok(()); // idempotent replay of an already-accepted fulfill
        }
        if htlc.state != expected_terminal {
            return Err(ProtocolError::UnexpectedHtlcState(id));
        }
        if sha256(&preimage) != htlc.rhash {
            return Err(ProtocolError::PreimageMismatch(id));
        }
        htlc.preimage = Some(preimage);
        htlc.state = match owner {
            Owner::Local => HtlcState::initial_remote_remove(),
            Owner::Remote => HtlcState::initial_local_remove(),
        };
        Ok(())
    }

    /// Begin removing a fully-committed HTLC without a preimage (fail).
    pub fn fail_htlc(&mut self, owner: Owner, id: u64) -> Result<(), ProtocolError> {
        let expected_terminal = match owner {
            Owner::Local => HtlcState::SentAddAckRevocation,
            Owner::Remote => HtlcState::RcvdAddAckRevocation,
        };
        let htlc = self.htlcs.get_mut(&(owner, id)).ok_or(ProtocolError::UnknownHtlc(id))?;
        if htlc.state != expected_terminal {
            return Err(ProtocolError::UnexpectedHtlcState(id));
        }
        htlc.state = match owner {
            Owner::Local => HtlcState::initial_remote_remove(),
            Owner::Remote => HtlcState::initial_local_remove(),
        };
        Ok(())
    }

    /// Advance one HTLC's state by one protocol event, syncing both
    /// staging ledgers with whichever side's `*_committed` flag flips as a
    /// result. This is the single place the commitment cycle and the
    /// ledger meet.
    pub fn apply_event(
        &mut self,
        adapter: &dyn ChainAdapter,
        owner: Owner,
        id: u64,
        event: HtlcEvent,
    ) -> Result<(), ProtocolError> {
        let htlc = self.htlcs.get(&(owner, id)).ok_or(ProtocolError::UnknownHtlc(id))?;
        let old_state = htlc.state;
        let msatoshis = htlc.msatoshis;
        let fulfilled = htlc.preimage.is_some();
        let new_state = old_state.apply(event).ok_or(ProtocolError::UnexpectedHtlcState(id))?;

        let dust = is_dust(msatoshis, adapter.dust_limit_sat());
        sync_side(&mut self.local.staging_cstate, owner, msatoshis, dust, fulfilled, old_state.local_committed(), new_state.local_committed());
        sync_side(&mut self.remote.staging_cstate, owner, msatoshis, dust, fulfilled, old_state.remote_committed(), new_state.remote_committed());

        let htlc = self.htlcs.get_mut(&(owner, id)).expect("looked up above");
        htlc.state = new_state;
        trace!("htlc {} {:?} advanced {} -> {}", id, owner, old_state, new_state);
        Ok(())
    }

    /// Step 1 of the commitment cycle: we send a `commit_sig` covering the
    /// remote's staging ledger. Remembers the remote's current revocation
    /// hash as outstanding so a crash before their revocation arrives can
    /// resume correctly.
    pub fn produce_commit_sig(
        &mut self,
        adapter: &dyn ChainAdapter,
        vault: &dyn KeyVault,
        peer_id: &PeerId,
    ) -> [u8; 64] {
        let digest = adapter.build_commitment(&self.remote.staging_cstate);
        let sig = vault.sign(peer_id, &digest);
        self.remote.commit.prev_revocation_hash = Some(self.remote.commit.revocation_hash);
        self.remote.commit.sig = Some(sig);
        self.remote.commit.order = self.next_order();
        self.remote.last_committed = self.remote.staging_cstate.clone();
        sig
    }

    /// Step 2: we received a `commit_sig` covering our own staging ledger.
    /// Rotates our commitment forward and returns `(preimage, next_hash)`
    /// for the `UpdateRevocation` reply: the preimage revokes the
    /// commitment just replaced, `next_hash` is what the new one will be
    /// revoked with.
    pub fn accept_commit_sig(
        &mut self,
        vault: &dyn KeyVault,
        peer_id: &PeerId,
        sig: [u8; 64],
    ) -> Result<([u8; 32], [u8; 32]), ProtocolError> {
        if sig == [0u8; 64] {
            return Err(ProtocolError::BadCommitSignature);
        }
        let seed = vault.revocation_seed(peer_id);
        let preimage = derive_revocation_preimage(seed, self.local.commit.commit_num);
        self.local.commit.sig = Some(sig);
        self.local.commit.commit_num += 1;
        let next_preimage = derive_revocation_preimage(seed, self.local.commit.commit_num);
        let next_hash = sha256(&next_preimage);
        self.local.commit.revocation_hash = next_hash;
        self.local.last_committed = self.local.staging_cstate.clone();
        Ok((preimage, next_hash))
    }

    /// Step 3: the remote revoked the commitment we replaced with our last
    /// `commit_sig`. Verifies the preimage, files it in the shachain, and
    /// adopts their advertised next revocation hash.
    pub fn accept_revocation(&mut self, preimage: [u8; 32], next_hash: [u8; 32]) -> Result<(), ProtocolError> {
        let prev = self.remote.commit.prev_revocation_hash.ok_or(ProtocolError::BadRevocationPreimage)?;
        if sha256(&preimage) != prev {
            return Err(ProtocolError::BadRevocationPreimage);
        }
        let index = revocation_index(self.remote.commit.commit_num);
        if !self.their_preimages.add_hash(index, preimage) {
            return Err(ProtocolError::NonMonotoneRevocation { given: index, expected: index });
        }
        self.remote.commit.prev_revocation_hash = None;
        self.remote.commit.commit_num += 1;
        self.remote.commit.revocation_hash = next_hash;
        Ok(())
    }

    /// Full I-balance check for the local staging ledger: committed
    /// balances plus every HTLC currently present in our own commitment
    /// must account for the whole anchor. A caller that finds this false
    /// has found a bug, not a protocol error.
    pub fn local_balance_holds(&self) -> bool {
        let outstanding: u64 =
            self.htlcs.values().filter(|h| h.state.local_committed()).map(|h| h.msatoshis).sum();
        self.local.staging_cstate.total_committed_msat() + outstanding
            == self.local.staging_cstate.anchor_satoshis * 1000
    }

    /// The same check for the remote staging ledger.
    pub fn remote_balance_holds(&self) -> bool {
        let outstanding: u64 =
            self.htlcs.values().filter(|h| h.state.remote_committed()).map(|h| h.msatoshis).sum();
        self.remote.staging_cstate.total_committed_msat() + outstanding
            == self.remote.staging_cstate.anchor_satoshis * 1000
    }
}

/// Apply the ledger-side effect of a `*_committed` flag flip, if any.
/// `panic`s (via `debug_assert!`) on an unaffordable commit: by the time an
/// HTLC's committed flag flips true its affordability was already checked
/// at `offer_htlc`/`accept_remote_htlc` time, so a failure here means the
/// two staging ledgers have drifted out of sync, which is an invariant
/// violation, not a protocol error.
fn sync_side(cstate: &mut ChannelState, owner: Owner, msatoshis: u64, dust: bool, fulfilled: bool, was_committed: bool, is_committed: bool) {
    if !was_committed && is_committed {
        let ok = cstate.add_htlc(msatoshis, owner, dust);
        debug_assert!(ok, "staging ledgers drifted: committed htlc was unaffordable");
    } else if was_committed && !is_committed {
        if fulfilled {
            cstate.fulfill_htlc(msatoshis, owner, dust);
        } else {
            cstate.fail_htlc(msatoshis, owner, dust);
        }
    }
}
