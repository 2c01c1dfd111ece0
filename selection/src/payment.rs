//! Choosing coins for a payment.
//!
//! Candidates are ordered largest value first, ties broken by the nearest
//! deposit expiry so coins about to become unspendable go first. Selection
//! then runs in phases:
//!
//! 1. Largest-first greedy over whole coins. If that lands exactly on the
//!    target we are done. If no candidate carries a deposit fee, a bounded
//!    subset-sum search looks for an exact match greedy missed.
//! 2. The smallest single coin worth more than the cost, spent partially.
//! 3. The greedy result from phase 1 topped up with one partially spent coin.
//!
//! Between 2 and 3 the cheaper result in fees wins, then the one with fewer coins.

use taler_types::{Amount, AmountError};
use tracing::debug;

use crate::candidate::{CandidateCoin, CoinSelection, SelectedCoin};
use crate::subset::exact_subset;
use crate::SelectionError;

/// What a payment has to cover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentTarget {
    /// Amount the merchant asks for.
    pub amount: Amount,
    /// Deposit fees the merchant absorbs. Fees beyond this are added to the
    /// customer's cost.
    pub max_deposit_fee: Amount,
}

impl PaymentTarget {
    /// A target without fee allowance.
    pub fn new(amount: Amount) -> Result<Self, AmountError> {
        let max_deposit_fee = Amount::zero(amount.currency())?;
        Ok(Self {
            amount,
            max_deposit_fee,
        })
    }
}

struct Unit {
    idx: usize,
    value: u128,
    fee: u128,
}

#[derive(Clone, Debug)]
struct Tally {
    remaining: u128,
    fee_allowance: u128,
    customer_fees: u128,
    deposit_fees: u128,
}

impl Tally {
    fn new(target: u128, fee_allowance: u128) -> Self {
        Self {
            remaining: target,
            fee_allowance,
            customer_fees: 0,
            deposit_fees: 0,
        }
    }

    /// Cost still to cover if a coin with `fee` were added.
    fn cost_with(&self, fee: u128) -> u128 {
        self.remaining + fee.saturating_sub(self.fee_allowance)
    }

    fn charge_fee(&mut self, fee: u128) {
        self.deposit_fees += fee;
        if fee <= self.fee_allowance {
            self.fee_allowance -= fee;
        } else {
            let extra = fee - self.fee_allowance;
            self.fee_allowance = 0;
            self.customer_fees += extra;
            self.remaining += extra;
        }
    }

    fn take(&mut self, unit: &Unit, contribution: u128) {
        self.charge_fee(unit.fee);
        self.remaining -= contribution;
    }
}

struct Pick {
    unit: usize,
    contribution: u128,
    partial: bool,
}

struct Outcome {
    picks: Vec<Pick>,
    tally: Tally,
    iterations: usize,
}

impl Outcome {
    fn rank(&self) -> (u128, u128, usize) {
        (self.tally.customer_fees, self.tally.deposit_fees, self.picks.len())
    }
}

/// Select coins covering `target` from `candidates`.
///
/// Coins of another currency, or worth no more than their deposit fee, are
/// ignored. A zero target yields an empty selection.
pub fn select_payment_coins(
    candidates: &[CandidateCoin],
    target: &PaymentTarget,
) -> Result<CoinSelection, SelectionError> {
    let currency = target.amount.currency();
    if target.amount.is_zero() {
        return Ok(CoinSelection::empty(currency)?);
    }

    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| {
            let c = &candidates[i];
            c.value.currency() == currency
                && c.fee_deposit.currency() == currency
                && c.value.to_units() > c.fee_deposit.to_units()
        })
        .collect();
    order.sort_by(|&a, &b| {
        let (a, b) = (&candidates[a], &candidates[b]);
        b.value
            .to_units()
            .cmp(&a.value.to_units())
            .then(a.fee_deposit.to_units().cmp(&b.fee_deposit.to_units()))
            .then(a.expire_deposit.cmp(&b.expire_deposit))
    });
    let units: Vec<Unit> = order
        .iter()
        .map(|&idx| Unit {
            idx,
            value: candidates[idx].value.to_units(),
            fee: candidates[idx].fee_deposit.to_units(),
        })
        .collect();

    let goal = target.amount.to_units();
    let allowance = if target.max_deposit_fee.currency() == currency {
        target.max_deposit_fee.to_units()
    } else {
        0
    };

    let greedy = greedy_full(&units, goal, allowance);
    if greedy.tally.remaining == 0 {
        debug!(coins = greedy.picks.len(), "exact greedy selection");
        return finish(candidates, &units, currency, greedy);
    }

    if units.iter().all(|u| u.fee == 0) {
        let values: Vec<u128> = units.iter().map(|u| u.value).collect();
        if let Some(picked) = exact_subset(&values, goal) {
            debug!(coins = picked.len(), "exact subset selection");
            let picks = picked
                .into_iter()
                .map(|unit| Pick {
                    unit,
                    contribution: units[unit].value,
                    partial: false,
                })
                .collect();
            let mut tally = Tally::new(goal, allowance);
            tally.remaining = 0;
            return finish(
                candidates,
                &units,
                currency,
                Outcome {
                    picks,
                    tally,
                    iterations: units.len(),
                },
            );
        }
    }

    let single = single_partial(&units, goal, allowance);
    let topped = top_up(&units, greedy);

    let chosen = match (single, topped) {
        (Some(s), Ok(t)) => {
            if s.rank() <= t.rank() {
                s
            } else {
                t
            }
        }
        (Some(s), Err(_)) => s,
        (None, Ok(t)) => t,
        (None, Err(shortfall)) => {
            let shortfall = Amount::from_units(currency, shortfall)?;
            return Err(SelectionError::InsufficientBalance { shortfall });
        }
    };
    debug!(
        coins = chosen.picks.len(),
        iterations = chosen.iterations,
        "selection with partial coin"
    );
    finish(candidates, &units, currency, chosen)
}

fn greedy_full(units: &[Unit], goal: u128, allowance: u128) -> Outcome {
    let mut tally = Tally::new(goal, allowance);
    let mut picks = Vec::new();
    let mut iterations = 0;
    for (i, unit) in units.iter().enumerate() {
        if tally.remaining == 0 {
            break;
        }
        iterations += 1;
        if unit.value <= tally.cost_with(unit.fee) {
            tally.take(unit, unit.value);
            picks.push(Pick {
                unit: i,
                contribution: unit.value,
                partial: false,
            });
        }
    }
    Outcome {
        picks,
        tally,
        iterations,
    }
}

/// Smallest coin whose value strictly exceeds the whole cost.
fn single_partial(units: &[Unit], goal: u128, allowance: u128) -> Option<Outcome> {
    let mut best: Option<usize> = None;
    let mut iterations = 0;
    // Ascending by value; among equal values, the earliest in candidate order.
    for (i, unit) in units.iter().enumerate().rev() {
        iterations += 1;
        let tally = Tally::new(goal, allowance);
        if unit.value > tally.cost_with(unit.fee) {
            best = match best {
                Some(b) if units[b].value == unit.value => Some(i),
                Some(b) => Some(b),
                None => Some(i),
            };
        }
    }
    let i = best?;
    let mut tally = Tally::new(goal, allowance);
    let contribution = tally.cost_with(units[i].fee);
    tally.take(&units[i], contribution);
    Some(Outcome {
        picks: vec![Pick {
            unit: i,
            contribution,
            partial: true,
        }],
        tally,
        iterations,
    })
}

/// Complete a greedy outcome with one partially spent coin. The error carries
/// the cost left uncovered.
fn top_up(units: &[Unit], mut greedy: Outcome) -> Result<Outcome, u128> {
    let taken: Vec<bool> = {
        let mut t = vec![false; units.len()];
        for p in &greedy.picks {
            t[p.unit] = true;
        }
        t
    };
    let tail = units
        .iter()
        .enumerate()
        .rev()
        .filter(|(i, _)| !taken[*i])
        .find(|(_, u)| u.value >= greedy.tally.cost_with(u.fee))
        .map(|(i, _)| i);
    let Some(i) = tail else {
        return Err(greedy.tally.remaining);
    };
    let contribution = greedy.tally.cost_with(units[i].fee);
    greedy.tally.take(&units[i], contribution);
    greedy.picks.push(Pick {
        unit: i,
        contribution,
        partial: contribution < units[i].value,
    });
    Ok(greedy)
}

fn finish(
    candidates: &[CandidateCoin],
    units: &[Unit],
    currency: &str,
    outcome: Outcome,
) -> Result<CoinSelection, SelectionError> {
    let mut coins = Vec::with_capacity(outcome.picks.len());
    let mut total = 0u128;
    for pick in &outcome.picks {
        let coin = &candidates[units[pick.unit].idx];
        total += pick.contribution;
        coins.push(SelectedCoin {
            coin_pub: coin.coin_pub,
            exchange_base_url: coin.exchange_base_url.clone(),
            denom_pub_hash: coin.denom_pub_hash,
            contribution: Amount::from_units(currency, pick.contribution)?,
            fee_deposit: coin.fee_deposit.clone(),
            partial: pick.partial,
        });
    }
    Ok(CoinSelection {
        needs_refresh: coins.iter().any(|c| c.partial),
        coins,
        total_contribution: Amount::from_units(currency, total)?,
        total_deposit_fees: Amount::from_units(currency, outcome.tally.deposit_fees)?,
        customer_fees: Amount::from_units(currency, outcome.tally.customer_fees)?,
        iterations: outcome.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use taler_types::{EddsaPublicKey, HashCode, Timestamp};

    fn coin(n: u8, value: &str, fee: &str, expire: u64) -> CandidateCoin {
        CandidateCoin {
            coin_pub: EddsaPublicKey([n; 32]),
            exchange_base_url: "https://exchange.example.com/".into(),
            denom_pub_hash: HashCode([n; 64]),
            value: Amount::parse(value).unwrap(),
            fee_deposit: Amount::parse(fee).unwrap(),
            expire_deposit: Timestamp::new(expire),
        }
    }

    fn target(amount: &str) -> PaymentTarget {
        PaymentTarget::new(Amount::parse(amount).unwrap()).unwrap()
    }

    fn pubs(sel: &CoinSelection) -> Vec<u8> {
        sel.coins.iter().map(|c| c.coin_pub.0[0]).collect()
    }

    #[test]
    fn exact_match_single_coin() {
        let coins = vec![
            coin(1, "KUDOS:8", "KUDOS:0", 100),
            coin(2, "KUDOS:5", "KUDOS:0", 100),
        ];
        let sel = select_payment_coins(&coins, &target("KUDOS:5")).unwrap();
        assert_eq!(pubs(&sel), vec![2]);
        assert!(!sel.needs_refresh);
    }

    #[test]
    fn eight_two_one_melts_the_eight() {
        let coins = vec![
            coin(8, "KUDOS:8", "KUDOS:0", 100),
            coin(2, "KUDOS:2", "KUDOS:0", 100),
            coin(1, "KUDOS:1", "KUDOS:0", 100),
        ];
        let sel = select_payment_coins(&coins, &target("KUDOS:5")).unwrap();
        assert_eq!(pubs(&sel), vec![8]);
        assert!(sel.needs_refresh);
        assert_eq!(sel.coins[0].contribution, Amount::parse("KUDOS:5").unwrap());
        assert!(sel.coins[0].partial);
    }

    #[test]
    fn subset_search_finds_what_greedy_misses() {
        let coins = vec![
            coin(4, "KUDOS:4", "KUDOS:0", 100),
            coin(3, "KUDOS:3", "KUDOS:0", 100),
            coin(5, "KUDOS:3", "KUDOS:0", 100),
        ];
        let sel = select_payment_coins(&coins, &target("KUDOS:6")).unwrap();
        let mut got = pubs(&sel);
        got.sort();
        assert_eq!(got, vec![3, 5]);
        assert!(!sel.needs_refresh);
    }

    #[test]
    fn nearest_expiry_breaks_ties() {
        let coins = vec![
            coin(1, "KUDOS:2", "KUDOS:0", 500),
            coin(2, "KUDOS:2", "KUDOS:0", 100),
        ];
        let sel = select_payment_coins(&coins, &target("KUDOS:2")).unwrap();
        assert_eq!(pubs(&sel), vec![2]);
    }

    #[test]
    fn insufficient_balance_reports_shortfall() {
        let coins = vec![coin(1, "KUDOS:2", "KUDOS:0", 100)];
        let err = select_payment_coins(&coins, &target("KUDOS:3.5")).unwrap_err();
        assert_eq!(
            err,
            SelectionError::InsufficientBalance {
                shortfall: Amount::parse("KUDOS:1.5").unwrap()
            }
        );
    }

    #[test]
    fn zero_target_is_empty() {
        let coins = vec![coin(1, "KUDOS:2", "KUDOS:0", 100)];
        let sel = select_payment_coins(&coins, &target("KUDOS:0")).unwrap();
        assert!(sel.coins.is_empty());
        assert!(!sel.needs_refresh);
    }

    #[test]
    fn other_currency_is_ignored() {
        let coins = vec![coin(1, "EUR:10", "EUR:0", 100)];
        assert!(matches!(
            select_payment_coins(&coins, &target("KUDOS:1")),
            Err(SelectionError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn fees_beyond_allowance_are_paid_by_customer() {
        let coins = vec![
            coin(1, "KUDOS:4", "KUDOS:0.1", 100),
            coin(2, "KUDOS:4", "KUDOS:0.1", 100),
        ];
        let t = PaymentTarget {
            amount: Amount::parse("KUDOS:5").unwrap(),
            max_deposit_fee: Amount::parse("KUDOS:0.1").unwrap(),
        };
        let sel = select_payment_coins(&coins, &t).unwrap();
        assert_eq!(sel.coins.len(), 2);
        assert_eq!(sel.total_deposit_fees, Amount::parse("KUDOS:0.2").unwrap());
        assert_eq!(sel.customer_fees, Amount::parse("KUDOS:0.1").unwrap());
        assert_eq!(sel.total_contribution, Amount::parse("KUDOS:5.1").unwrap());
        assert!(sel.needs_refresh);
    }

    #[test]
    fn fees_within_allowance_cost_customer_nothing() {
        let coins = vec![coin(1, "KUDOS:5", "KUDOS:0.1", 100)];
        let t = PaymentTarget {
            amount: Amount::parse("KUDOS:5").unwrap(),
            max_deposit_fee: Amount::parse("KUDOS:1").unwrap(),
        };
        let sel = select_payment_coins(&coins, &t).unwrap();
        assert!(sel.customer_fees.is_zero());
        assert!(!sel.needs_refresh);
    }

    #[test]
    fn coin_worth_less_than_fee_is_skipped() {
        let coins = vec![
            coin(1, "KUDOS:0.01", "KUDOS:0.01", 100),
            coin(2, "KUDOS:1", "KUDOS:0", 100),
        ];
        let sel = select_payment_coins(&coins, &target("KUDOS:1")).unwrap();
        assert_eq!(pubs(&sel), vec![2]);
    }

    #[test]
    fn greedy_plus_tail_when_no_single_coin_suffices() {
        let coins = vec![
            coin(1, "KUDOS:5", "KUDOS:0", 100),
            coin(2, "KUDOS:5", "KUDOS:0", 100),
        ];
        let sel = select_payment_coins(&coins, &target("KUDOS:7")).unwrap();
        assert_eq!(sel.coins.len(), 2);
        assert_eq!(sel.total_contribution, Amount::parse("KUDOS:7").unwrap());
        assert!(sel.needs_refresh);
    }
}
