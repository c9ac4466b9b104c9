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

//! Configuration knobs consumed by the channel core. An embedding daemon is
//! expected to parse its own config file format and construct this struct
//! from primitives; no file-format parsing lives here.

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Config {
    /// Upper bound on the accepted peer-proposed delay, in blocks.
    pub locktime_max: u32,
    /// Upper bound on `min_depth` we accept from the peer.
    pub anchor_confirms_max: u32,
    /// Lower bound, as a percentage of our current fee rate, on the peer's
    /// proposed commitment fee rate.
    pub commitment_fee_min_percent: u32,
    /// Upper bound, as a percentage of our current fee rate, on the peer's
    /// proposed commitment fee rate. Resolves the open question in the
    /// balance-engine design notes: the upper bound check uses this field,
    /// not `commitment_fee_min_percent` again.
    pub commitment_fee_max_percent: u32,
    /// Minimum CLTV delta we require when extending an HTLC, advertised to
    /// the routing layer.
    pub min_htlc_expiry: u32,
    /// Routing fee base, in millisatoshis, advertised to the routing layer.
    pub fee_base: u32,
    /// Routing fee rate, in millisatoshis per forwarded satoshi, advertised
    /// to the routing layer.
    pub fee_per_satoshi: u32,
    /// Per-side cap on outstanding HTLCs (the literal `300` from the
    /// packet-accept validator, exposed rather than hard-coded).
    pub max_htlcs_per_side: u32,
    /// Path to the durable store's SQLite file.
    pub db_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            locktime_max: 14 * 24 * 6, // ~2 weeks of 10-minute blocks
            anchor_confirms_max: 10,
            commitment_fee_min_percent: 50,
            commitment_fee_max_percent: 1000,
            min_htlc_expiry: 6,
            fee_base: 546_000,
            fee_per_satoshi: 10,
            max_htlcs_per_side: 300,
            db_path: "lightning.sqlite3".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_htlc_cap() {
        assert_eq!(Config::default().max_htlcs_per_side, 300);
    }
}
