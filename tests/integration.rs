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

//! End-to-end exercise of a channel through the public API only: open, add
//! an HTLC, run it through the full commit/revoke cycle, fulfill it, persist
//! across a simulated restart, and check the reloaded channel matches.

use lnp_channel_core::{
    ChainAdapter, ChannelState, Config, HtlcEvent, KeyVault, Owner, Peer, PeerId, Store,
};

struct TestAdapter {
    dust_limit: u64,
}

impl ChainAdapter for TestAdapter {
    fn dust_limit_sat(&self) -> u64 {
        self.dust_limit
    }

    fn build_commitment(&self, cstate: &ChannelState) -> Vec<u8> {
        let mut digest = Vec::new();
        digest.extend_from_slice(&cstate.anchor_satoshis.to_le_bytes());
        digest.extend_from_slice(&cstate.side[0].pay_msat.to_le_bytes());
        digest.extend_from_slice(&cstate.side[1].pay_msat.to_le_bytes());
        digest
    }
}

struct TestVault {
    local_seed: [u8; 32],
}

impl KeyVault for TestVault {
    fn revocation_seed(&self, _peer: &PeerId) -> [u8; 32] {
        self.local_seed
    }

    fn commit_privkey(&self, _peer: &PeerId) -> [u8; 32] {
        [42u8; 32]
    }

    fn sign(&self, _peer: &PeerId, digest: &[u8]) -> [u8; 64] {
        let mut sig = [7u8; 64];
        sig[0] = digest.len() as u8;
        sig
    }
}

fn run_commit_cycle(
    peer: &mut Peer,
    adapter: &TestAdapter,
    vault: &TestVault,
    peer_id: &PeerId,
    remote_seed: [u8; 32],
    owner: Owner,
    id: u64,
) {
    let remote_index = lnp_channel_core::commitment::revocation_index(peer.remote.commit.commit_num);
    let _ = remote_index;
    let remote_preimage =
        lnp_channel_core::commitment::derive_revocation_preimage(remote_seed, peer.remote.commit.commit_num);

    peer.produce_commit_sig(adapter, vault, peer_id);
    peer.apply_event(adapter, owner, id, HtlcEvent::LocalCommitSent).unwrap();

    let next_preimage =
        lnp_channel_core::commitment::derive_revocation_preimage(remote_seed, peer.remote.commit.commit_num + 1);
    let next_hash = lnp_channel_core::shachain::sha256(&next_preimage);
    peer.accept_revocation(remote_preimage, next_hash).unwrap();
    peer.apply_event(adapter, owner, id, HtlcEvent::RemoteRevocationReceived).unwrap();

    let (_preimage, _next_hash) = peer.accept_commit_sig(vault, peer_id, [3u8; 64]).unwrap();
    peer.apply_event(adapter, owner, id, HtlcEvent::RemoteCommitReceived).unwrap();

    peer.apply_event(adapter, owner, id, HtlcEvent::LocalRevocationSent).unwrap();
}

#[test]
fn open_add_commit_fulfill_persist_reload_round_trips() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cfg = Config::default();
    let adapter = TestAdapter { dust_limit: 546 };
    let vault = TestVault { local_seed: [11u8; 32] };
    let peer_id: PeerId = [3u8; 33];
    let remote_seed = [22u8; 32];

    let mut peer = Peer::new(1_000_000, 20_000, Owner::Local).unwrap();
    peer.remote.commit.revocation_hash = lnp_channel_core::shachain::sha256(
        &lnp_channel_core::commitment::derive_revocation_preimage(remote_seed, peer.remote.commit.commit_num),
    );

    let preimage = [99u8; 32];
    let rhash = lnp_channel_core::shachain::sha256(&preimage);
    let id = peer.offer_htlc(&adapter, 100_000_000, rhash, 144, vec![1, 2, 3]).unwrap();
    assert_eq!(cfg.max_htlcs_per_side, 300);

    run_commit_cycle(&mut peer, &adapter, &vault, &peer_id, remote_seed, Owner::Local, id);
    assert!(peer.local_balance_holds());
    assert!(peer.remote_balance_holds());

    peer.fulfill_htlc(Owner::Local, id, preimage).unwrap();
    run_commit_cycle(&mut peer, &adapter, &vault, &peer_id, remote_seed, Owner::Local, id);
    assert!(peer.htlc(Owner::Local, id).unwrap().state.is_terminal());
    assert_eq!(peer.local.staging_cstate.side[1].pay_msat, 100_000_000);
    assert!(peer.local_balance_holds());

    let store = Store::in_memory().unwrap();
    {
        let txn = store.begin().unwrap();
        lnp_channel_core::store::save_peer(&txn, &peer_id, &peer).unwrap();
        txn.commit().unwrap();
    }

    let reloaded = lnp_channel_core::store::load_peer(&store, &adapter, &peer_id).unwrap().unwrap();
    assert_eq!(reloaded.local.staging_cstate, peer.local.staging_cstate);
    assert_eq!(reloaded.remote.staging_cstate, peer.remote.staging_cstate);
    assert_eq!(reloaded.htlc(Owner::Local, id).unwrap().state, peer.htlc(Owner::Local, id).unwrap().state);
    assert_eq!(reloaded.their_preimages, peer.their_preimages);
}

#[test]
fn a_failed_htlc_returns_its_amount_to_the_offerer_after_persistence() {
    let cfg = Config::default();
    let _ = cfg;
    let adapter = TestAdapter { dust_limit: 546 };
    let vault = TestVault { local_seed: [5u8; 32] };
    let peer_id: PeerId = [4u8; 33];
    let remote_seed = [6u8; 32];

    let mut peer = Peer::new(2_000_000, 15_000, Owner::Local).unwrap();
    peer.remote.commit.revocation_hash = lnp_channel_core::shachain::sha256(
        &lnp_channel_core::commitment::derive_revocation_preimage(remote_seed, peer.remote.commit.commit_num),
    );

    let id = peer.offer_htlc(&adapter, 250_000_000, [5u8; 32], 200, vec![]).unwrap();
    run_commit_cycle(&mut peer, &adapter, &vault, &peer_id, remote_seed, Owner::Local, id);

    peer.fail_htlc(Owner::Local, id).unwrap();
    run_commit_cycle(&mut peer, &adapter, &vault, &peer_id, remote_seed, Owner::Local, id);
    assert!(peer.htlc(Owner::Local, id).unwrap().state.is_terminal());
    assert!(peer.local_balance_holds());

    let store = Store::in_memory().unwrap();
    let txn = store.begin().unwrap();
    lnp_channel_core::store::save_peer(&txn, &peer_id, &peer).unwrap();
    txn.commit().unwrap();

    let reloaded = lnp_channel_core::store::load_peer(&store, &adapter, &peer_id).unwrap().unwrap();
    assert_eq!(reloaded.local.staging_cstate, peer.local.staging_cstate);
}
