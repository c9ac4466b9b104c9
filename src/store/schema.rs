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

//! Table definitions for the durable store. Column types favor opaque
//! fixed-width blobs (`BLOB` sized by convention, not a SQLite constraint)
//! over structured columns wherever the original interface spec pins an
//! exact byte size, matching how this data looks on the wire.

use rusqlite::Connection;

use crate::error::StoreError;

pub fn create_all(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS wallet (
            privkey BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS peers (
            peer BLOB PRIMARY KEY,
            state TEXT NOT NULL,
            offered_anchor INTEGER NOT NULL,
            our_feerate INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS peer_address (
            peer BLOB NOT NULL,
            addr TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS peer_secrets (
            peer BLOB PRIMARY KEY,
            commitkey BLOB NOT NULL,
            finalkey BLOB NOT NULL,
            revocation_seed BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS anchors (
            peer BLOB NOT NULL,
            txid BLOB NOT NULL,
            idx INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            ok_depth INTEGER,
            min_depth INTEGER NOT NULL,
            ours INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS their_visible_state (
            peer BLOB PRIMARY KEY,
            offered_anchor INTEGER NOT NULL,
            commitkey BLOB NOT NULL,
            finalkey BLOB NOT NULL,
            locktime INTEGER NOT NULL,
            mindepth INTEGER NOT NULL,
            commit_fee_rate INTEGER NOT NULL,
            next_revocation_hash BLOB NOT NULL
        );

        -- `anchor_satoshis`/`fee_rate`/`funder` are not part of the literal
        -- upstream column list but are needed to re-seed `ChannelState::initial`
        -- before replaying the htlc table back into it; the original keeps the
        -- same facts spread across `peers.our_feerate` and `anchors.amount`,
        -- which this crate folds onto the per-peer commit row instead of
        -- joining three tables at load time.
        CREATE TABLE IF NOT EXISTS commit_info (
            peer BLOB NOT NULL,
            side TEXT NOT NULL,
            commit_num INTEGER NOT NULL,
            revocation_hash BLOB NOT NULL,
            xmit_order INTEGER NOT NULL,
            sig BLOB,
            prev_revocation_hash BLOB,
            anchor_satoshis INTEGER NOT NULL,
            fee_rate INTEGER NOT NULL,
            funder TEXT NOT NULL,
            PRIMARY KEY (peer, side)
        );

        CREATE TABLE IF NOT EXISTS htlcs (
            peer BLOB NOT NULL,
            id INTEGER NOT NULL,
            owner TEXT NOT NULL,
            state TEXT NOT NULL,
            msatoshis INTEGER NOT NULL,
            expiry INTEGER NOT NULL,
            rhash BLOB NOT NULL,
            r BLOB,
            routing BLOB NOT NULL,
            src_peer BLOB,
            src_id INTEGER,
            PRIMARY KEY (peer, owner, id)
        );

        CREATE TABLE IF NOT EXISTS shachain (
            peer BLOB PRIMARY KEY,
            shachain BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS their_commitments (
            peer BLOB NOT NULL,
            txid BLOB NOT NULL,
            commit_num INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS closing (
            peer BLOB PRIMARY KEY,
            our_fee INTEGER,
            their_fee INTEGER,
            their_sig BLOB,
            our_script BLOB,
            their_script BLOB,
            shutdown_order INTEGER,
            closing_order INTEGER,
            sigs_in INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}
