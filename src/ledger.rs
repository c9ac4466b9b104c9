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

//! The two-sided channel balance ledger.
//!
//! `ChannelState` tracks only the aggregate `{pay, fee, htlc-count}` per
//! side; the HTLC table itself lives on `Peer`. Every operation here
//! recomputes the commitment fee from the current non-dust HTLC count and
//! re-splits it between the two sides using the BOLT-2 rule before moving
//! the HTLC amount itself, which is what keeps the balance invariant exact
//! even when one side cannot cover its half of the fee.

use crate::error::ProtocolError;
use crate::fee;
use crate::htlc::Owner;

/// One side's share of the channel: what it would receive (`pay_msat`), what
/// it has been charged toward the commitment fee (`fee_msat`), and how many
/// HTLCs it currently has outstanding.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[derive(StrictEncode, StrictDecode)]
pub struct OneSide {
    pub pay_msat: u64,
    pub fee_msat: u64,
    pub num_htlcs: u32,
}

/// The two-sided funds ledger for one channel. Holds the invariant
/// `side[OURS].pay + side[OURS].fee + side[THEIRS].pay + side[THEIRS].fee +
/// Σ(live non-dust HTLC amounts) == anchor_satoshis * 1000` after every
/// successful operation.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct ChannelState {
    pub anchor_satoshis: u64,
    pub fee_rate: u64,
    pub num_nondust: u32,
    pub side: [OneSide; 2],
}

fn side_index(owner: Owner) -> usize {
    match owner {
        Owner::Local => 0,
        Owner::Remote => 1,
    }
}

/// Split a target fee into the (ours, theirs) halves used by the two-phase
/// split: any odd remainder goes to `ours` so the two halves always sum
/// exactly back to `target`.
fn split_halves(target: u64) -> (u64, u64) {
    let theirs = target / 2;
    let ours = target - theirs;
    (ours, theirs)
}

/// Charge `fee` against `side.pay_msat`, moving what it can afford into
/// `side.fee_msat`. Returns the amount actually charged; never goes
/// negative, clamping to what the side has.
fn pay_fee(side: &mut OneSide, fee: u64) -> u64 {
    if side.pay_msat >= fee {
        side.pay_msat -= fee;
        side.fee_msat += fee;
        fee
    } else {
        let paid = side.pay_msat;
        side.fee_msat += paid;
        side.pay_msat = 0;
        paid
    }
}

impl ChannelState {
    /// Build the state immediately after channel open: the funder pays the
    /// full initial (zero-HTLC) commitment fee out of the anchor.
    pub fn initial(
        anchor_satoshis: u64,
        fee_rate: u64,
        funder: Owner,
    ) -> Result<ChannelState, ProtocolError> {
        if anchor_satoshis >= (1u64 << 32) / 1000 {
            return Err(ProtocolError::Unaffordable(anchor_satoshis));
        }
        let anchor_msat = anchor_satoshis * 1000;
        let fee = fee::commitment_fee_msat(0, fee_rate);
        if fee > anchor_msat {
            return Err(ProtocolError::Unaffordable(fee));
        }
        let mut side = [OneSide::default(), OneSide::default()];
        let idx = side_index(funder);
        side[idx].pay_msat = anchor_msat - fee;
        side[idx].fee_msat = fee;
        Ok(ChannelState { anchor_satoshis, fee_rate, num_nondust: 0, side })
    }

    /// Sum of both sides' `pay_msat + fee_msat`. Added to the total
    /// outstanding non-dust HTLC amount, this must equal `anchor_satoshis *
    /// 1000` — callers that also track the HTLC table (see `Peer`) use this
    /// to check the full I-balance invariant.
    pub fn total_committed_msat(&self) -> u64 {
        self.side.iter().map(|s| s.pay_msat + s.fee_msat).sum()
    }

    /// Re-derive the fee split for a given target fee, folding any
    /// previously-charged fee back into `pay_msat` first so the split
    /// always reflects the current HTLC count, not a stale one.
    fn apply_fee_split(&mut self, target: u64) -> bool {
        for s in self.side.iter_mut() {
            s.pay_msat += s.fee_msat;
            s.fee_msat = 0;
        }
        let (ours_target, theirs_target) = split_halves(target);
        let ours_paid = pay_fee(&mut self.side[0], ours_target);
        let theirs_paid = pay_fee(&mut self.side[1], theirs_target);
        let mut shortfall = (ours_target - ours_paid) + (theirs_target - theirs_paid);
        if shortfall > 0 {
            if ours_paid == ours_target {
                shortfall -= pay_fee(&mut self.side[0], shortfall);
            } else if theirs_paid == theirs_target {
                shortfall -= pay_fee(&mut self.side[1], shortfall);
            }
        }
        shortfall == 0
    }

    /// Recompute and re-split the commitment fee for `target` (in
    /// millisatoshis). Returns whether the full target was covered; a
    /// `false` return means the fee actually charged is the most both sides
    /// could jointly afford.
    pub fn recalculate_fees(&mut self, target_fee_msat: u64) -> bool {
        self.apply_fee_split(target_fee_msat)
    }

    /// Change the fee rate and re-split the resulting commitment fee across
    /// both sides. Per the widened-to-`u64` resolution, rejects a rate that
    /// would overflow the byte-count multiply.
    pub fn adjust_fee(&mut self, new_rate: u64) -> Result<(), ProtocolError> {
        if new_rate > u64::MAX / 1000 {
            return Err(ProtocolError::Unaffordable(new_rate));
        }
        self.fee_rate = new_rate;
        let target = fee::commitment_fee_msat(self.num_nondust, new_rate);
        self.recalculate_fees(target);
        Ok(())
    }

    /// Force the commitment fee to an exact satoshi amount, as used for the
    /// closing transaction. Returns `false` exactly when the target cannot
    /// be paid in full, in which case the fee actually charged is the most
    /// both sides could jointly afford.
    pub fn force_fee(&mut self, exact_fee_satoshis: u64) -> bool {
        self.recalculate_fees(exact_fee_satoshis * 1000)
    }

    /// Add an HTLC offered by `owner`, worth `msat`, classified as dust or
    /// not by the caller (the chain adapter supplies the dust threshold).
    /// Recomputes the fee split using the HTLC's new non-dust contribution
    /// *before* the HTLC amount itself is debited, then checks the offerer
    /// can afford both the HTLC and its half of the resulting fee. Returns
    /// `false` and leaves `self` unchanged if not; never partially mutates.
    pub fn add_htlc(&mut self, msat: u64, owner: Owner, dust: bool) -> bool {
        let idx = side_index(owner);
        let mut trial = self.clone();
        for s in trial.side.iter_mut() {
            s.pay_msat += s.fee_msat;
            s.fee_msat = 0;
        }
        let new_nondust = trial.num_nondust + if dust { 0 } else { 1 };
        let target = fee::commitment_fee_msat(new_nondust, trial.fee_rate);
        let (ours_target, theirs_target) = split_halves(target);
        let offerer_target = if idx == 0 { ours_target } else { theirs_target };
        if trial.side[idx].pay_msat < msat + offerer_target {
            return false;
        }
        trial.num_nondust = new_nondust;
        trial.side[idx].num_htlcs += 1;
        trial.apply_fee_split(target);
        trial.side[idx].pay_msat -= msat;
        *self = trial;
        true
    }

    /// Remove an HTLC offered by `owner`, crediting its amount to the
    /// non-offering side. Infallible: callers must never call this for an
    /// amount the ledger cannot balance, as that is an invariant violation,
    /// not a protocol error.
    pub fn fulfill_htlc(&mut self, msat: u64, owner: Owner, dust: bool) {
        self.remove_htlc(msat, owner, dust, true)
    }

    /// Remove an HTLC offered by `owner`, crediting its amount back to the
    /// offering side. Infallible for the same reason as `fulfill_htlc`.
    pub fn fail_htlc(&mut self, msat: u64, owner: Owner, dust: bool) {
        self.remove_htlc(msat, owner, dust, false)
    }

    fn remove_htlc(&mut self, msat: u64, owner: Owner, dust: bool, fulfilled: bool) {
        let idx = side_index(owner);
        let other = 1 - idx;
        let new_nondust = self.num_nondust - if dust { 0 } else { 1 };
        self.num_nondust = new_nondust;
        self.side[idx].num_htlcs -= 1;
        let target = fee::commitment_fee_msat(new_nondust, self.fee_rate);
        self.apply_fee_split(target);
        let recipient = if fulfilled { other } else { idx };
        self.side[recipient].pay_msat += msat;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funder() -> Owner {
        Owner::Local
    }

    #[test]
    fn scenario_1_open_and_add_htlc() {
        let mut cs = ChannelState::initial(1_000_000, 20_000, funder()).unwrap();
        assert_eq!(cs.side[0].pay_msat, 993_240_000);
        assert_eq!(cs.side[0].fee_msat, 6_760_000);

        assert!(cs.add_htlc(100_000_000, funder(), false));
        assert_eq!(cs.num_nondust, 1);
        assert_eq!(cs.side[0].fee_msat, 7_400_000);
        assert_eq!(cs.side[1].fee_msat, 0);
        assert_eq!(cs.side[0].pay_msat, 892_600_000);
        assert_eq!(cs.side[1].pay_msat, 0);
        // I-balance: pay+fee both sides + live htlc amount == anchor*1000.
        assert_eq!(cs.total_committed_msat() + 100_000_000, 1_000_000_000);
    }

    #[test]
    fn scenario_2_fulfill_returns_fee_to_initial_and_credits_fundee() {
        let mut cs = ChannelState::initial(1_000_000, 20_000, funder()).unwrap();
        assert!(cs.add_htlc(100_000_000, funder(), false));
        cs.fulfill_htlc(100_000_000, funder(), false);
        assert_eq!(cs.num_nondust, 0);
        assert_eq!(cs.side[0].fee_msat + cs.side[1].fee_msat, 6_760_000);
        assert_eq!(cs.side[1].pay_msat, 100_000_000);
        assert_eq!(cs.side[0].pay_msat, 893_240_000);
        assert_eq!(cs.total_committed_msat(), 1_000_000_000);
    }

    #[test]
    fn scenario_3_fail_restores_pre_add_ledger() {
        let mut cs = ChannelState::initial(1_000_000, 20_000, funder()).unwrap();
        let before = cs.clone();
        assert!(cs.add_htlc(100_000_000, funder(), false));
        cs.fail_htlc(100_000_000, funder(), false);
        assert_eq!(cs, before);
    }

    #[test]
    fn scenario_4_overcommit_is_rejected_without_mutation() {
        let mut cs = ChannelState {
            anchor_satoshis: 1_000_000,
            fee_rate: 20_000,
            num_nondust: 0,
            side: [
                OneSide { pay_msat: 10_000_000, fee_msat: 0, num_htlcs: 0 },
                OneSide { pay_msat: 0, fee_msat: 0, num_htlcs: 0 },
            ],
        };
        let before = cs.clone();
        assert!(!cs.add_htlc(20_000_000, funder(), false));
        assert_eq!(cs, before);
    }

    #[test]
    fn scenario_5_force_fee_underfunded_splits_max_affordable() {
        let mut cs = ChannelState {
            anchor_satoshis: 1000,
            fee_rate: 20_000,
            num_nondust: 0,
            side: [
                OneSide { pay_msat: 500_000, fee_msat: 0, num_htlcs: 0 },
                OneSide { pay_msat: 500_000, fee_msat: 0, num_htlcs: 0 },
            ],
        };
        assert!(!cs.force_fee(2000));
        assert_eq!(cs.side[0].fee_msat, 500_000);
        assert_eq!(cs.side[1].fee_msat, 500_000);
        assert_eq!(cs.side[0].pay_msat, 0);
        assert_eq!(cs.side[1].pay_msat, 0);
    }

    #[test]
    fn add_then_fulfill_moves_exactly_the_htlc_amount() {
        let mut cs = ChannelState::initial(1_000_000, 20_000, funder()).unwrap();
        let before_total = cs.total_committed_msat();
        assert!(cs.add_htlc(50_000_000, funder(), false));
        cs.fulfill_htlc(50_000_000, funder(), false);
        assert_eq!(cs.side[1].pay_msat, 50_000_000);
        assert_eq!(cs.total_committed_msat(), before_total);
    }
}
