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

//! Error taxonomy for the channel core.
//!
//! Invariant violations (ledger imbalance on an irrevocable removal, a
//! missing row expected during replay, a commit-info side mismatch) are not
//! represented here: they are bugs, not data-dependent failures, and are
//! raised with `panic!`/`debug_assert!` at the point of violation rather than
//! returned as a `Result`.

use std::io;

/// Peer-caused failures: malformed fields, state-machine violations,
/// unaffordable HTLCs, signature mismatches. The channel should be closed
/// gracefully and an `ERROR` packet sent to the peer after one of these.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ProtocolError {
    /// proposed delay of {0} blocks exceeds the configured maximum
    DelayTooLarge(u32),

    /// proposed delay is denominated in seconds, not blocks; only a
    /// blocks-relative delay is accepted
    DelayNotInBlocks,

    /// HTLC expiry is denominated in seconds, not blocks; only a
    /// blocks-absolute expiry is accepted
    ExpiryInSeconds,

    /// proposed minimum depth {proposed} exceeds the configured maximum {max}
    MinDepthTooLarge { proposed: u32, max: u32 },

    /// proposed commitment fee rate {proposed} is outside the accepted band [{min}, {max}]
    FeeRateOutOfBand { proposed: u64, min: u64, max: u64 },

    /// both peers offered the anchor, or neither did
    AnchorOfferMismatch,

    /// HTLC amount must be greater than zero
    ZeroAmountHtlc,

    /// offered HTLC id {0} is already in use by the remote party
    DuplicateHtlcId(u64),

    /// remote party's staged HTLC count ({0}) would exceed the per-side limit
    TooManyHtlcs(u32),

    /// no HTLC with id {0} is known
    UnknownHtlc(u64),

    /// HTLC {0} is not in a state that permits this operation
    UnexpectedHtlcState(u64),

    /// preimage does not hash to the expected value for HTLC {0}
    PreimageMismatch(u64),

    /// on-disk or wire HTLC state text "{0}" does not match any known state
    UnknownHtlcStateText(String),

    /// a commitment signature was required but not supplied
    MissingCommitSignature,

    /// commitment signature did not verify against the expected staging state
    BadCommitSignature,

    /// revocation preimage does not hash to the expected previous revocation hash
    BadRevocationPreimage,

    /// revocation index {given} is not the expected next index {expected}
    NonMonotoneRevocation { given: u64, expected: u64 },

    /// channel cannot afford the proposed HTLC of {0} msat
    Unaffordable(u64),
}

/// Transient failures surfaced by the durable store. The caller should treat
/// these as retryable at the next protocol event; on-disk state remains the
/// source of truth and is never left partially mutated.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum StoreError {
    /// underlying SQL engine reported an error: {0}
    #[from]
    Sql(rusqlite::Error),

    /// I/O error accessing the store file: {0}
    #[from]
    Io(io::Error),

    /// a transaction was requested while one was already open
    TransactionAlreadyOpen,

    /// a write was attempted outside of an open transaction
    NoTransactionOpen,

    /// on-disk record for peer {0} is missing a row required for replay: {1}
    MissingRow(String, &'static str),

    /// on-disk enum text {text} for column {column} does not match any known variant
    UnknownEnumText { column: &'static str, text: String },

    /// stored shachain blob has length {0}, expected 2612
    BadShachainLength(usize),

    /// replaying stored state produced an invalid channel: {0}
    #[from]
    Channel(ProtocolError),
}

/// Umbrella error type returned by the public API: every fallible operation
/// that is not an invariant violation returns `Result<T, ChannelError>`.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ChannelError {
    /// {0}
    #[from]
    Protocol(ProtocolError),

    /// {0}
    #[from]
    Store(StoreError),
}
