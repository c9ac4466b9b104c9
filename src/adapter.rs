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

//! External collaborator traits. The core depends on these by reference,
//! never by concrete type, so the excluded subsystems (on-chain transaction
//! construction, key custody, block-height observation) can be swapped or
//! mocked without touching channel logic. Logging does not get a trait here:
//! it goes through the `log` facade's global macros like the rest of this
//! code base.

/// Opaque per-peer identity, as seen from this crate: a 33-byte compact
/// public key. The core never interprets these bytes; it only uses them as a
/// lookup key for `KeyVault` and forwarded-HTLC source references.
pub type PeerId = [u8; 33];

/// Everything the core needs from the on-chain transaction layer without
/// constructing a `bitcoin::Transaction` itself.
pub trait ChainAdapter {
    /// Outputs below this many satoshis are elided from the commitment
    /// transaction (and from `ChannelState::num_nondust`).
    fn dust_limit_sat(&self) -> u64;

    /// Build the commitment transaction for `cstate` and return an opaque
    /// digest/handle suitable for `KeyVault::sign`. The core never inspects
    /// the returned bytes.
    fn build_commitment(&self, cstate: &crate::ledger::ChannelState) -> Vec<u8>;
}

/// Per-peer secrets: revocation-chain seeds and the commitment signing key.
/// Real implementations back this with a hardware module or an encrypted
/// wallet file; the core only ever sees derived public material and opaque
/// signatures.
pub trait KeyVault {
    /// Seed from which the shachain's per-commitment revocation preimages
    /// are derived for `peer`.
    fn revocation_seed(&self, peer: &PeerId) -> [u8; 32];

    /// Private key used to sign commitment transactions for `peer`.
    fn commit_privkey(&self, peer: &PeerId) -> [u8; 32];

    /// Sign a commitment digest produced by `ChainAdapter::build_commitment`
    /// with `peer`'s commitment key. The core treats the result as opaque.
    fn sign(&self, peer: &PeerId, digest: &[u8]) -> [u8; 64];
}

/// Block-height observation, standing in for the excluded blockchain
/// watcher.
pub trait Clock {
    fn block_height(&self) -> u32;
}
