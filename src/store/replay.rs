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

//! Saving and loading a `Peer`. Loading does not restore `ChannelState`
//! from a stored snapshot of its own fields — the per-side balances are not
//! persisted at all — it rebuilds each side's ledger from scratch by
//! replaying the htlc table through `ChannelState::initial` plus
//! `add_htlc`/`fulfill_htlc`/`fail_htlc`, using each HTLC's
//! `local_was_committed`/`remote_was_committed` flags to decide whether it
//! had reached that side's commitment before the crash.

use rusqlite::{params, Connection};

use crate::adapter::{ChainAdapter, PeerId};
use crate::commitment::CommitInfo;
use crate::error::StoreError;
use crate::fee::is_dust;
use crate::htlc::{Htlc, HtlcState, Owner};
use crate::ledger::ChannelState;
use crate::peer::{ClosingState, Peer, Side};
use crate::shachain::Shachain;

use super::{Store, Transaction};

fn owner_text(owner: Owner) -> &'static str {
    match owner {
        Owner::Local => "Local",
        Owner::Remote => "Remote",
    }
}

fn owner_from_text(text: &str) -> Result<Owner, StoreError> {
    match text {
        "Local" => Ok(Owner::Local),
        "Remote" => Ok(Owner::Remote),
        other => Err(StoreError::UnknownEnumText { column: "owner", text: other.to_owned() }),
    }
}

fn array32(bytes: &[u8], column: &'static str) -> Result<[u8; 32], StoreError> {
    if bytes.len() != 32 {
        return Err(StoreError::UnknownEnumText { column, text: format!("{} bytes", bytes.len()) });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn array64(bytes: &[u8], column: &'static str) -> Result<[u8; 64], StoreError> {
    if bytes.len() != 64 {
        return Err(StoreError::UnknownEnumText { column, text: format!("{} bytes", bytes.len()) });
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Persist the full current state of `peer` under `peer_id`, replacing
/// whatever was stored before. Must run inside `txn`.
pub fn save_peer(txn: &Transaction, peer_id: &PeerId, peer: &Peer) -> Result<(), StoreError> {
    let conn = txn.store().connection();
    conn.execute("DELETE FROM commit_info WHERE peer = ?1", params![&peer_id[..]])?;
    conn.execute("DELETE FROM htlcs WHERE peer = ?1", params![&peer_id[..]])?;
    conn.execute("DELETE FROM shachain WHERE peer = ?1", params![&peer_id[..]])?;
    conn.execute("DELETE FROM closing WHERE peer = ?1", params![&peer_id[..]])?;

    save_side(conn, peer_id, "OURS", &peer.local, peer.funder)?;
    save_side(conn, peer_id, "THEIRS", &peer.remote, peer.funder)?;

    for htlc in peer.htlcs() {
        conn.execute(
            "INSERT INTO htlcs (peer, id, owner, state, msatoshis, expiry, rhash, r, routing, src_peer, src_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                &peer_id[..],
                htlc.id as i64,
                owner_text(htlc.owner),
                htlc.state.to_string(),
                htlc.msatoshis as i64,
                htlc.expiry as i64,
                &htlc.rhash[..],
                htlc.preimage.map(|p| p.to_vec()),
                &htlc.routing,
                htlc.src.as_ref().map(|(p, _)| p.clone()),
                htlc.src.as_ref().map(|(_, id)| *id as i64),
            ],
        )?;
    }

    let shachain_bytes = peer.their_preimages.encode();
    conn.execute(
        "INSERT INTO shachain (peer, shachain) VALUES (?1, ?2)",
        params![&peer_id[..], &shachain_bytes[..]],
    )?;

    let c = &peer.closing;
    conn.execute(
        "INSERT INTO closing
            (peer, our_fee, their_fee, their_sig, our_script, their_script, shutdown_order, closing_order, sigs_in)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &peer_id[..],
            c.our_fee.map(|v| v as i64),
            c.their_fee.map(|v| v as i64),
            c.their_sig.map(|s| s.to_vec()),
            c.our_script,
            c.their_script,
            c.shutdown_order.map(|v| v as i64),
            c.closing_order.map(|v| v as i64),
            c.sigs_in as i64,
        ],
    )?;
    Ok(())
}

fn save_side(conn: &Connection, peer_id: &PeerId, side: &str, data: &Side, funder: Owner) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO commit_info
            (peer, side, commit_num, revocation_hash, xmit_order, sig, prev_revocation_hash,
             anchor_satoshis, fee_rate, funder)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &peer_id[..],
            side,
            data.commit.commit_num as i64,
            &data.commit.revocation_hash[..],
            data.commit.order as i64,
            data.commit.sig.map(|s| s.to_vec()),
            data.commit.prev_revocation_hash.map(|h| h.to_vec()),
            data.staging_cstate.anchor_satoshis as i64,
            data.staging_cstate.fee_rate as i64,
            owner_text(funder),
        ],
    )?;
    Ok(())
}

struct LoadedCommit {
    side: String,
    commit: CommitInfo,
    anchor_satoshis: u64,
    fee_rate: u64,
    funder: Owner,
}

/// Load `peer_id`'s channel, or `None` if nothing is stored for it.
pub fn load_peer(store: &Store, adapter: &dyn ChainAdapter, peer_id: &PeerId) -> Result<Option<Peer>, StoreError> {
    let conn = store.connection();

    let mut commit_rows: Vec<LoadedCommit> = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT side, commit_num, revocation_hash, xmit_order, sig, prev_revocation_hash,
                    anchor_satoshis, fee_rate, funder
             FROM commit_info WHERE peer = ?1",
        )?;
        let mut rows = stmt.query(params![&peer_id[..]])?;
        while let Some(row) = rows.next()? {
            let side: String = row.get(0)?;
            let commit_num: i64 = row.get(1)?;
            let revocation_hash: Vec<u8> = row.get(2)?;
            let order: i64 = row.get(3)?;
            let sig: Option<Vec<u8>> = row.get(4)?;
            let prev: Option<Vec<u8>> = row.get(5)?;
            let anchor_satoshis: i64 = row.get(6)?;
            let fee_rate: i64 = row.get(7)?;
            let funder_text: String = row.get(8)?;
            let commit = CommitInfo {
                commit_num: commit_num as u64,
                revocation_hash: array32(&revocation_hash, "commit_info.revocation_hash")?,
                prev_revocation_hash: match prev {
                    Some(bytes) => Some(array32(&bytes, "commit_info.prev_revocation_hash")?),
                    None => None,
                },
                sig: match sig {
                    Some(bytes) => Some(array64(&bytes, "commit_info.sig")?),
                    None => None,
                },
                order: order as u64,
            };
            commit_rows.push(LoadedCommit {
                side,
                commit,
                anchor_satoshis: anchor_satoshis as u64,
                fee_rate: fee_rate as u64,
                funder: owner_from_text(&funder_text)?,
            });
        }
    }
    if commit_rows.is_empty() {
        return Ok(None);
    }

    let mut htlcs = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, owner, state, msatoshis, expiry, rhash, r, routing, src_peer, src_id
             FROM htlcs WHERE peer = ?1 ORDER BY owner, id",
        )?;
        let mut rows = stmt.query(params![&peer_id[..]])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let owner_text_: String = row.get(1)?;
            let state_text: String = row.get(2)?;
            let msatoshis: i64 = row.get(3)?;
            let expiry: i64 = row.get(4)?;
            let rhash: Vec<u8> = row.get(5)?;
            let preimage: Option<Vec<u8>> = row.get(6)?;
            let routing: Vec<u8> = row.get(7)?;
            let src_peer: Option<Vec<u8>> = row.get(8)?;
            let src_id: Option<i64> = row.get(9)?;
            htlcs.push(Htlc {
                id: id as u64,
                owner: owner_from_text(&owner_text_)?,
                msatoshis: msatoshis as u64,
                rhash: array32(&rhash, "htlcs.rhash")?,
                expiry: expiry as u32,
                routing,
                preimage: match preimage {
                    Some(bytes) => Some(array32(&bytes, "htlcs.r")?),
                    None => None,
                },
                state: HtlcState::from_db_name(&state_text)?,
                src: src_peer.zip(src_id).map(|(p, i)| (p, i as u64)),
            });
        }
    }

    let anchor_satoshis = commit_rows[0].anchor_satoshis;
    let fee_rate = commit_rows[0].fee_rate;
    let funder = commit_rows[0].funder;
    let local_cstate = replay_cstate(adapter, anchor_satoshis, fee_rate, funder, &htlcs, Owner::Local)?;
    let remote_cstate = replay_cstate(adapter, anchor_satoshis, fee_rate, funder, &htlcs, Owner::Remote)?;

    let mut local = None;
    let mut remote = None;
    for row in commit_rows {
        match row.side.as_str() {
            "OURS" => {
                local = Some(Side {
                    commit: row.commit,
                    staging_cstate: local_cstate.clone(),
                    last_committed: local_cstate.clone(),
                })
            }
            "THEIRS" => {
                remote = Some(Side {
                    commit: row.commit,
                    staging_cstate: remote_cstate.clone(),
                    last_committed: remote_cstate.clone(),
                })
            }
            other => return Err(StoreError::UnknownEnumText { column: "commit_info.side", text: other.to_owned() }),
        }
    }
    let (local, remote) = match (local, remote) {
        (Some(l), Some(r)) => (l, r),
        _ => return Ok(None),
    };

    let their_preimages = match conn
        .query_row("SELECT shachain FROM shachain WHERE peer = ?1", params![&peer_id[..]], |row| {
            row.get::<_, Vec<u8>>(0)
        }) {
        Ok(bytes) => Shachain::decode(&bytes)?,
        Err(rusqlite::Error::QueryReturnedNoRows) => Shachain::new(),
        Err(e) => return Err(e.into()),
    };

    let closing = match conn.query_row(
        "SELECT our_fee, their_fee, their_sig, our_script, their_script, shutdown_order, closing_order, sigs_in
         FROM closing WHERE peer = ?1",
        params![&peer_id[..]],
        |row| {
            Ok((
                row.get::<_, Option<i64>>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
                row.get::<_, Option<Vec<u8>>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, i64>(7)?,
            ))
        },
    ) {
        Ok((our_fee, their_fee, their_sig, our_script, their_script, shutdown_order, closing_order, sigs_in)) => {
            ClosingState {
                our_fee: our_fee.map(|v| v as u64),
                their_fee: their_fee.map(|v| v as u64),
                their_sig: match their_sig {
                    Some(bytes) => Some(array64(&bytes, "closing.their_sig")?),
                    None => None,
                },
                our_script,
                their_script,
                shutdown_order: shutdown_order.map(|v| v as u64),
                closing_order: closing_order.map(|v| v as u64),
                sigs_in: sigs_in as u32,
            }
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => ClosingState::default(),
        Err(e) => return Err(e.into()),
    };

    let order_counter = local.commit.order.max(remote.commit.order) + 1;
    let mut peer = Peer::from_parts(local, remote, their_preimages, closing, order_counter, funder);
    for htlc in htlcs {
        peer.insert_htlc(htlc);
    }
    Ok(Some(peer))
}

/// Rebuild one side's ledger by replaying the htlc table through it, in id
/// order, applying `add_htlc` for every HTLC that had ever reached that
/// side's commitment and then, for the ones already past that point,
/// `fulfill_htlc`/`fail_htlc`.
fn replay_cstate(
    adapter: &dyn ChainAdapter,
    anchor_satoshis: u64,
    fee_rate: u64,
    funder: Owner,
    htlcs: &[Htlc],
    perspective: Owner,
) -> Result<ChannelState, StoreError> {
    let mut cstate = ChannelState::initial(anchor_satoshis, fee_rate, funder)?;
    for htlc in htlcs {
        let (was_committed, is_committed) = match perspective {
            Owner::Local => (htlc.state.local_was_committed(), htlc.state.local_committed()),
            Owner::Remote => (htlc.state.remote_was_committed(), htlc.state.remote_committed()),
        };
        if !was_committed {
            continue;
        }
        let dust = is_dust(htlc.msatoshis, adapter.dust_limit_sat());
        let ok = cstate.add_htlc(htlc.msatoshis, htlc.owner, dust);
        debug_assert!(ok, "persisted htlc must have been affordable when first committed");
        if !is_committed {
            if htlc.preimage.is_some() {
                cstate.fulfill_htlc(htlc.msatoshis, htlc.owner, dust);
            } else {
                cstate.fail_htlc(htlc.msatoshis, htlc.owner, dust);
            }
        }
    }
    Ok(cstate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::htlc::HtlcEvent;

    struct StubAdapter;
    impl ChainAdapter for StubAdapter {
        fn dust_limit_sat(&self) -> u64 {
            546
        }
        fn build_commitment(&self, _cstate: &ChannelState) -> Vec<u8> {
            vec![]
        }
    }

    #[test]
    fn saving_and_loading_an_empty_channel_round_trips() {
        let store = Store::in_memory().unwrap();
        let adapter = StubAdapter;
        let peer_id: PeerId = [7u8; 33];
        let peer = Peer::new(1_000_000, 20_000, Owner::Local).unwrap();

        let txn = store.begin().unwrap();
        save_peer(&txn, &peer_id, &peer).unwrap();
        txn.commit().unwrap();

        let loaded = load_peer(&store, &adapter, &peer_id).unwrap().unwrap();
        assert_eq!(loaded.local.staging_cstate, peer.local.staging_cstate);
        assert_eq!(loaded.remote.staging_cstate, peer.remote.staging_cstate);
    }

    #[test]
    fn loading_an_unknown_peer_returns_none() {
        let store = Store::in_memory().unwrap();
        let adapter = StubAdapter;
        assert!(load_peer(&store, &adapter, &[0u8; 33]).unwrap().is_none());
    }

    #[test]
    fn replay_reproduces_the_ledger_after_a_committed_htlc() {
        let store = Store::in_memory().unwrap();
        let adapter = StubAdapter;
        let peer_id: PeerId = [1u8; 33];
        let mut peer = Peer::new(1_000_000, 20_000, Owner::Local).unwrap();
        let id = peer.offer_htlc(&adapter, 100_000_000, [1u8; 32], 100, vec![]).unwrap();
        for ev in [
            HtlcEvent::LocalCommitSent,
            HtlcEvent::RemoteRevocationReceived,
            HtlcEvent::RemoteCommitReceived,
            HtlcEvent::LocalRevocationSent,
        ] {
            peer.apply_event(&adapter, Owner::Local, id, ev).unwrap();
        }

        let txn = store.begin().unwrap();
        save_peer(&txn, &peer_id, &peer).unwrap();
        txn.commit().unwrap();

        let loaded = load_peer(&store, &adapter, &peer_id).unwrap().unwrap();
        assert_eq!(loaded.local.staging_cstate, peer.local.staging_cstate);
        assert_eq!(loaded.remote.staging_cstate, peer.remote.staging_cstate);
        assert_eq!(loaded.htlc(Owner::Local, id).unwrap().state, peer.htlc(Owner::Local, id).unwrap().state);
    }

    #[test]
    fn a_fulfilled_and_forgotten_htlc_replays_to_the_same_balances() {
        let store = Store::in_memory().unwrap();
        let adapter = StubAdapter;
        let peer_id: PeerId = [2u8; 33];
        let mut peer = Peer::new(1_000_000, 20_000, Owner::Local).unwrap();
        let preimage = [9u8; 32];
        let id = peer
            .offer_htlc(&adapter, 50_000_000, crate::shachain::sha256(&preimage), 100, vec![])
            .unwrap();
        for ev in [
            HtlcEvent::LocalCommitSent,
            HtlcEvent::RemoteRevocationReceived,
            HtlcEvent::RemoteCommitReceived,
            HtlcEvent::LocalRevocationSent,
        ] {
            peer.apply_event(&adapter, Owner::Local, id, ev).unwrap();
        }
        peer.fulfill_htlc(Owner::Local, id, preimage).unwrap();
        for ev in [
            HtlcEvent::LocalCommitSent,
            HtlcEvent::RemoteRevocationReceived,
            HtlcEvent::RemoteCommitReceived,
            HtlcEvent::LocalRevocationSent,
        ] {
            peer.apply_event(&adapter, Owner::Local, id, ev).unwrap();
        }
        assert!(peer.htlc(Owner::Local, id).unwrap().state.is_terminal());

        let txn = store.begin().unwrap();
        save_peer(&txn, &peer_id, &peer).unwrap();
        txn.commit().unwrap();

        let loaded = load_peer(&store, &adapter, &peer_id).unwrap().unwrap();
        assert_eq!(loaded.local.staging_cstate, peer.local.staging_cstate);
        assert_eq!(loaded.remote.staging_cstate, peer.remote.staging_cstate);
    }
}
