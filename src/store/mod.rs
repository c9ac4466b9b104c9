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

//! Durable, transactional persistence for channel state.
//!
//! Schema and table names mirror the external-interface tables this crate
//! is specified against. Several (`wallet`, `peers`, `peer_address`,
//! `peer_secrets`, `anchors`, `their_visible_state`, `their_commitments`)
//! hold data this crate never constructs — wire identity, on-chain
//! addresses, raw private key material — and are owned by the excluded
//! transport/`KeyVault`/`ChainAdapter` layers. Their DDL is created here
//! for schema completeness and so those layers can share one database
//! file, but only the tables backing `Peer`'s own fields (`commit_info`,
//! `htlcs`, `shachain`, `closing`) are read or written by this module.

mod replay;
mod schema;

use std::cell::Cell;

use log::trace;
use rusqlite::Connection;

use crate::error::StoreError;

pub use replay::{load_peer, save_peer};

/// A single-file relational store with explicit transaction bracketing.
/// `in_transaction` is a `Cell<bool>` rather than an externally-checked
/// flag: starting a second transaction while one is open is caught here
/// before it ever reaches SQLite.
pub struct Store {
    conn: Connection,
    in_transaction: Cell<bool>,
}

impl Store {
    /// Open (creating if absent) the store at `path`, applying the schema
    /// if this is a fresh file.
    pub fn open(path: &str) -> Result<Store, StoreError> {
        let conn = Connection::open(path)?;
        schema::create_all(&conn)?;
        Ok(Store { conn, in_transaction: Cell::new(false) })
    }

    /// An in-memory store, used by tests and by the integration suite.
    pub fn in_memory() -> Result<Store, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::create_all(&conn)?;
        Ok(Store { conn, in_transaction: Cell::new(false) })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Open an explicit transaction. Fails if one is already open; the
    /// returned guard rolls back on drop unless `commit` is called.
    pub fn begin(&self) -> Result<Transaction<'_>, StoreError> {
        if self.in_transaction.get() {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        trace!("BEGIN IMMEDIATE");
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction.set(true);
        Ok(Transaction { store: self, finished: false })
    }
}

/// An open transaction. Must be consumed by `commit`; dropping it without
/// committing rolls back, matching the "every write either commits
/// atomically or rolls back" contract.
pub struct Transaction<'a> {
    store: &'a Store,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        trace!("COMMIT");
        self.store.conn.execute_batch("COMMIT")?;
        self.store.in_transaction.set(false);
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), StoreError> {
        trace!("ROLLBACK");
        self.store.conn.execute_batch("ROLLBACK")?;
        self.store.in_transaction.set(false);
        self.finished = true;
        Ok(())
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        if !self.finished {
            trace!("ROLLBACK (transaction guard dropped without commit)");
            let _ = self.store.conn.execute_batch("ROLLBACK");
            self.store.in_transaction.set(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_second_transaction_cannot_open_while_one_is_outstanding() {
        let store = Store::in_memory().unwrap();
        let _txn = store.begin().unwrap();
        assert!(store.begin().is_err());
    }

    #[test]
    fn dropping_an_uncommitted_transaction_rolls_back_and_frees_the_guard() {
        let store = Store::in_memory().unwrap();
        {
            let _txn = store.begin().unwrap();
        }
        assert!(store.begin().is_ok());
    }

    #[test]
    fn commit_frees_the_guard_for_a_new_transaction() {
        let store = Store::in_memory().unwrap();
        let txn = store.begin().unwrap();
        txn.commit().unwrap();
        assert!(store.begin().is_ok());
    }
}
