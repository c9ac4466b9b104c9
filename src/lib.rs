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

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    //missing_docs
)]

//! The off-chain core of a bidirectional payment channel: the two-sided
//! balance ledger, the HTLC add/commit/revoke state machine, the commitment
//! cycle that ties a revocation chain to it, the protocol packets that drive
//! all of it, and durable storage so a channel survives a restart.
//!
//! On-chain transaction construction, signing, transport framing, and
//! routing policy are all out of scope; this crate only defines the traits
//! (`adapter`) an embedding daemon implements to supply them.

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate strict_encoding;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_with;
#[cfg(feature = "serde")]
extern crate serde_crate as serde;

pub mod adapter;
pub mod commitment;
pub mod config;
pub mod error;
pub mod fee;
pub mod htlc;
pub mod ledger;
pub mod packet;
pub mod peer;
pub mod shachain;
pub mod store;

pub use adapter::{ChainAdapter, Clock, KeyVault, PeerId};
pub use commitment::CommitInfo;
pub use config::Config;
pub use error::{ChannelError, ProtocolError, StoreError};
pub use htlc::{Htlc, HtlcEvent, HtlcState, Owner};
pub use ledger::{ChannelState, OneSide};
pub use packet::{OutboundQueue, Packet, Queued};
pub use peer::{ClosingState, Peer, Side};
pub use shachain::Shachain;
pub use store::Store;
