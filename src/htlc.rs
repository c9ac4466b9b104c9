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

//! HTLC records and the state machine governing their passage through the
//! add/commit/revoke and fulfill-or-fail/commit/revoke cycles.

use crate::error::ProtocolError;

/// Which side offered an HTLC.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display(Debug)]
pub enum Owner {
    Local,
    Remote,
}

/// Protocol events that drive an HTLC forward through its state lattice.
/// Each corresponds to one leg of the commit/revoke handshake described in
/// the commitment cycle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum HtlcEvent {
    /// We sent a `commit_sig` covering this HTLC's current disposition.
    LocalCommitSent,
    /// We sent `revoke_and_ack` for our previous commitment.
    LocalRevocationSent,
    /// We received a `commit_sig` covering this HTLC's current disposition.
    RemoteCommitReceived,
    /// We received `revoke_and_ack` for the remote's previous commitment.
    RemoteRevocationReceived,
}

/// The closed set of states an HTLC passes through from proposal to
/// tombstone. Named to match the on-disk TEXT encoding exactly (unknown text
/// on load is a fatal error, never silently coerced).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[repr(u8)]
pub enum HtlcState {
    // --- add path, HTLC offered by us (owner = Local) ---
    /// We proposed; not yet in their commitment.
    #[display("SENT_ADD_HTLC")]
    SentAddHtlc,
    /// We sent commit-sig incorporating it.
    #[display("SENT_ADD_COMMIT")]
    SentAddCommit,
    /// They revoked their old commit: it is now in their commitment.
    #[display("RCVD_ADD_REVOCATION")]
    RcvdAddRevocation,
    /// They sent us commit-sig covering it.
    #[display("RCVD_ADD_ACK_COMMIT")]
    RcvdAddAckCommit,
    /// We revoked: fully committed on both sides.
    #[display("SENT_ADD_ACK_REVOCATION")]
    SentAddAckRevocation,

    // --- add path, HTLC offered by them (owner = Remote) ---
    /// They proposed; not yet in our commitment.
    #[display("RCVD_ADD_HTLC")]
    RcvdAddHtlc,
    /// They sent commit-sig incorporating it.
    #[display("RCVD_ADD_COMMIT")]
    RcvdAddCommit,
    /// We revoked our old commit: it is now in our commitment.
    #[display("SENT_ADD_REVOCATION")]
    SentAddRevocation,
    /// We sent commit-sig covering it.
    #[display("SENT_ADD_ACK_COMMIT")]
    SentAddAckCommit,
    /// They revoked: fully committed on both sides.
    #[display("RCVD_ADD_ACK_REVOCATION")]
    RcvdAddAckRevocation,

    // --- remove path (fulfill or fail), local owner, remote initiates removal ---
    /// They proposed removal.
    #[display("RCVD_REMOVE_HTLC")]
    RcvdRemoveHtlc,
    /// They sent commit-sig for the state without it.
    #[display("RCVD_REMOVE_COMMIT")]
    RcvdRemoveCommit,
    /// We revoked: no longer in our commitment.
    #[display("SENT_REMOVE_REVOCATION")]
    SentRemoveRevocation,
    /// We sent commit-sig for the state without it.
    #[display("SENT_REMOVE_ACK_COMMIT")]
    SentRemoveAckCommit,
    /// They revoked: removed from both sides; tombstoned.
    #[display("RCVD_REMOVE_ACK_REVOCATION")]
    RcvdRemoveAckRevocation,

    // --- remove path (fulfill or fail), remote owner, local initiates removal ---
    /// We proposed removal.
    #[display("SENT_REMOVE_HTLC")]
    SentRemoveHtlc,
    /// We sent commit-sig for the state without it.
    #[display("SENT_REMOVE_COMMIT")]
    SentRemoveCommit,
    /// They revoked: no longer in their commitment.
    #[display("RCVD_REMOVE_REVOCATION")]
    RcvdRemoveRevocation,
    /// They sent commit-sig for the state without it.
    #[display("RCVD_REMOVE_ACK_COMMIT")]
    RcvdRemoveAckCommit,
    /// We revoked: removed from both sides; tombstoned.
    #[display("SENT_REMOVE_ACK_REVOCATION")]
    SentRemoveAckRevocation,
}

impl HtlcState {
    /// Parse the on-disk TEXT encoding. Unknown text is a fatal replay error,
    /// not a silently-discarded value.
    pub fn from_db_name(name: &str) -> Result<Self, ProtocolError> {
        use HtlcState::*;
        Ok(match name {
            "SENT_ADD_HTLC" => SentAddHtlc,
            "SENT_ADD_COMMIT" => SentAddCommit,
            "RCVD_ADD_REVOCATION" => RcvdAddRevocation,
            "RCVD_ADD_ACK_COMMIT" => RcvdAddAckCommit,
            "SENT_ADD_ACK_REVOCATION" => SentAddAckRevocation,
            "RCVD_ADD_HTLC" => RcvdAddHtlc,
            "RCVD_ADD_COMMIT" => RcvdAddCommit,
            "SENT_ADD_REVOCATION" => SentAddRevocation,
            "SENT_ADD_ACK_COMMIT" => SentAddAckCommit,
            "RCVD_ADD_ACK_REVOCATION" => RcvdAddAckRevocation,
            "RCVD_REMOVE_HTLC" => RcvdRemoveHtlc,
            "RCVD_REMOVE_COMMIT" => RcvdRemoveCommit,
            "SENT_REMOVE_REVOCATION" => SentRemoveRevocation,
            "SENT_REMOVE_ACK_COMMIT" => SentRemoveAckCommit,
            "RCVD_REMOVE_ACK_REVOCATION" => RcvdRemoveAckRevocation,
            "SENT_REMOVE_HTLC" => SentRemoveHtlc,
            "SENT_REMOVE_COMMIT" => SentRemoveCommit,
            "RCVD_REMOVE_REVOCATION" => RcvdRemoveRevocation,
            "RCVD_REMOVE_ACK_COMMIT" => RcvdRemoveAckCommit,
            "SENT_REMOVE_ACK_REVOCATION" => SentRemoveAckRevocation,
            other => return Err(ProtocolError::UnknownHtlcStateText(other.to_owned())),
        })
    }

    /// The initial state for a newly offered HTLC, from the offerer's side.
    pub fn initial_offered() -> Self {
        HtlcState::SentAddHtlc
    }

    /// The initial state for an HTLC just received from the peer.
    pub fn initial_received() -> Self {
        HtlcState::RcvdAddHtlc
    }

    /// The initial state when we start removing (fulfill/fail) an HTLC we
    /// received, i.e. `owner == Remote`.
    pub fn initial_local_remove() -> Self {
        HtlcState::SentRemoveHtlc
    }

    /// The initial state when the peer starts removing an HTLC we offered,
    /// i.e. `owner == Local`.
    pub fn initial_remote_remove() -> Self {
        HtlcState::RcvdRemoveHtlc
    }

    /// Whether this state belongs to the removal (fulfill/fail) half of the
    /// lattice, as opposed to the initial add half.
    pub fn is_remove_path(self) -> bool {
        use HtlcState::*;
        matches!(
            self,
            RcvdRemoveHtlc
                | RcvdRemoveCommit
                | SentRemoveRevocation
                | SentRemoveAckCommit
                | RcvdRemoveAckRevocation
                | SentRemoveHtlc
                | SentRemoveCommit
                | RcvdRemoveRevocation
                | RcvdRemoveAckCommit
                | SentRemoveAckRevocation
        )
    }

    /// Whether the HTLC is present in our current local commitment.
    pub fn local_committed(self) -> bool {
        use HtlcState::*;
        match self {
            SentAddHtlc | SentAddCommit => false,
            RcvdAddRevocation | RcvdAddAckCommit | SentAddAckRevocation => true,
            RcvdAddHtlc | RcvdAddCommit => false,
            SentAddRevocation | SentAddAckCommit | RcvdAddAckRevocation => true,
            RcvdRemoveHtlc | RcvdRemoveCommit => true,
            SentRemoveRevocation | SentRemoveAckCommit | RcvdRemoveAckRevocation => false,
            SentRemoveHtlc | SentRemoveCommit => true,
            RcvdRemoveRevocation | RcvdRemoveAckCommit | SentRemoveAckRevocation => false,
        }
    }

    /// Whether the HTLC is present in the remote's current commitment.
    pub fn remote_committed(self) -> bool {
        use HtlcState::*;
        match self {
            SentAddHtlc | SentAddCommit => false,
            RcvdAddRevocation | RcvdAddAckCommit | SentAddAckRevocation => true,
            RcvdAddHtlc | RcvdAddCommit => false,
            SentAddRevocation | SentAddAckCommit | RcvdAddAckRevocation => true,
            RcvdRemoveHtlc | RcvdRemoveCommit => true,
            SentRemoveRevocation | SentRemoveAckCommit | RcvdRemoveAckRevocation => false,
            SentRemoveHtlc | SentRemoveCommit => true,
            RcvdRemoveRevocation | RcvdRemoveAckCommit | SentRemoveAckRevocation => false,
        }
    }

    /// Whether the HTLC was, at some prior point, committed on our side;
    /// used only during replay to decide whether its `add` must be applied
    /// before resolving it.
    pub fn local_was_committed(self) -> bool {
        self.is_remove_path() || self.local_committed()
    }

    /// Whether the HTLC was, at some prior point, committed on the remote's
    /// side; used only during replay.
    pub fn remote_was_committed(self) -> bool {
        self.is_remove_path() || self.remote_committed()
    }

    /// Whether this is a terminal (tombstone) state: the HTLC has been
    /// fully removed from both commitments and is retained only for replay.
    pub fn is_terminal(self) -> bool {
        use HtlcState::*;
        matches!(self, RcvdRemoveAckRevocation | SentRemoveAckRevocation)
    }

    /// Apply a protocol event, producing the next state, or `None` if the
    /// event is not valid from the current state (a protocol error at the
    /// caller).
    pub fn apply(self, event: HtlcEvent) -> Option<HtlcState> {
        use HtlcEvent::*;
        use HtlcState::*;
        Some(match (self, event) {
            (SentAddHtlc, LocalCommitSent) => SentAddCommit,
            (SentAddCommit, RemoteRevocationReceived) => RcvdAddRevocation,
            (RcvdAddRevocation, RemoteCommitReceived) => RcvdAddAckCommit,
            (RcvdAddAckCommit, LocalRevocationSent) => SentAddAckRevocation,

            (RcvdAddHtlc, RemoteCommitReceived) => RcvdAddCommit,
            (RcvdAddCommit, LocalRevocationSent) => SentAddRevocation,
            (SentAddRevocation, LocalCommitSent) => SentAddAckCommit,
            (SentAddAckCommit, RemoteRevocationReceived) => RcvdAddAckRevocation,

            (SentRemoveHtlc, LocalCommitSent) => SentRemoveCommit,
            (SentRemoveCommit, RemoteRevocationReceived) => RcvdRemoveRevocation,
            (RcvdRemoveRevocation, RemoteCommitReceived) => RcvdRemoveAckCommit,
            (RcvdRemoveAckCommit, LocalRevocationSent) => SentRemoveAckRevocation,

            (RcvdRemoveHtlc, RemoteCommitReceived) => RcvdRemoveCommit,
            (RcvdRemoveCommit, LocalRevocationSent) => SentRemoveRevocation,
            (SentRemoveRevocation, LocalCommitSent) => SentRemoveAckCommit,
            (SentRemoveAckCommit, RemoteRevocationReceived) => RcvdRemoveAckRevocation,

            _ => return None,
        })
    }
}

/// An in-flight or tombstoned Hash-Time-Locked Contract.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct Htlc {
    /// Unique within `owner`, monotonically assigned by the offering side.
    pub id: u64,
    /// Who offered this HTLC.
    pub owner: Owner,
    pub msatoshis: u64,
    pub rhash: [u8; 32],
    /// Absolute block height after which the HTLC may be timed out.
    pub expiry: u32,
    pub routing: Vec<u8>,
    /// Set on fulfill; its SHA-256 must equal `rhash`.
    pub preimage: Option<[u8; 32]>,
    pub state: HtlcState,
    /// The upstream HTLC this one forwards, identified by (peer, htlc id)
    /// rather than an owning pointer.
    pub src: Option<(Vec<u8>, u64)>,
}

impl Htlc {
    /// Whether `preimage`'s hash matches `rhash`; `false` if no preimage is
    /// set.
    pub fn preimage_matches(&self) -> bool {
        match self.preimage {
            Some(p) => crate::shachain::sha256(&p) == self.rhash,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_path_committed_flags_flip_at_revocation() {
        use HtlcState::*;
        assert_eq!((SentAddHtlc.local_committed(), SentAddHtlc.remote_committed()), (false, false));
        assert_eq!((SentAddCommit.local_committed(), SentAddCommit.remote_committed()), (false, false));
        assert_eq!((RcvdAddRevocation.local_committed(), RcvdAddRevocation.remote_committed()), (false, true));
        assert_eq!((RcvdAddAckCommit.local_committed(), RcvdAddAckCommit.remote_committed()), (false, true));
        assert_eq!((SentAddAckRevocation.local_committed(), SentAddAckRevocation.remote_committed()), (true, true));
    }

    #[test]
    fn remove_path_is_monotone_and_terminal() {
        let mut s = HtlcState::initial_local_remove();
        assert!(s.local_was_committed() && s.remote_was_committed());
        s = s.apply(HtlcEvent::LocalCommitSent).unwrap();
        s = s.apply(HtlcEvent::RemoteRevocationReceived).unwrap();
        s = s.apply(HtlcEvent::RemoteCommitReceived).unwrap();
        s = s.apply(HtlcEvent::LocalRevocationSent).unwrap();
        assert!(s.is_terminal());
        assert!(!s.local_committed() && !s.remote_committed());
    }

    #[test]
    fn mismatched_event_is_rejected() {
        assert!(HtlcState::SentAddHtlc.apply(HtlcEvent::LocalRevocationSent).is_none());
    }

    #[test]
    fn db_name_round_trips() {
        use HtlcState::*;
        for s in [
            SentAddHtlc, SentAddCommit, RcvdAddRevocation, RcvdAddAckCommit, SentAddAckRevocation,
            RcvdAddHtlc, RcvdAddCommit, SentAddRevocation, SentAddAckCommit, RcvdAddAckRevocation,
            RcvdRemoveHtlc, RcvdRemoveCommit, SentRemoveRevocation, SentRemoveAckCommit, RcvdRemoveAckRevocation,
            SentRemoveHtlc, SentRemoveCommit, RcvdRemoveRevocation, RcvdRemoveAckCommit, SentRemoveAckRevocation,
        ] {
            let name = format!("{}", s);
            assert_eq!(HtlcState::from_db_name(&name).unwrap(), s);
        }
    }

    #[test]
    fn unknown_db_name_is_rejected() {
        assert!(HtlcState::from_db_name("NOT_A_STATE").is_err());
    }
}
