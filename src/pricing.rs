//! Dynamic-parimutuel pricing for binary contracts.
//!
//! Pure math over the per-side liquidity pots: implied probability,
//! the marginal payout-weight contribution of a single wager, and the
//! average fill price across a trade's size. No I/O, no shared state;
//! every function is deterministic in its inputs.

use tracing::debug;

use crate::types::{BookieError, Outcome, Pool};

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// Everything a settled wager changes, computed up front from a
/// consistent snapshot: the new pot and weight totals for the
/// contract, the bet's own weight share, the price trajectory, and
/// the bettor's new balance.
#[derive(Debug, Clone)]
pub struct Quote {
    pub new_pot: Pool,
    pub new_weights: Pool,
    /// This bet's marginal weight contribution on its side.
    pub dpm_weight: f64,
    /// YES-side implied probability before the trade.
    pub prob_before: f64,
    /// Average fill price across the trade, on the side bought.
    pub prob_average: f64,
    /// YES-side implied probability after the trade.
    pub prob_after: f64,
    pub new_balance: f64,
}

// ---------------------------------------------------------------------------
// Pricing functions
// ---------------------------------------------------------------------------

/// Implied YES probability of a pool: `yes² / (yes² + no²)`.
///
/// The quadratic form weights each side by its own pot, so price
/// moves accelerate as one side dominates. Defined as 0.5 at the
/// degenerate all-zero pool so display surfaces never see NaN; the
/// settlement path rejects empty pools before pricing.
pub fn implied_probability(pool: &Pool) -> f64 {
    if pool.yes == 0.0 && pool.no == 0.0 {
        return 0.5;
    }
    pool.yes.powi(2) / (pool.yes.powi(2) + pool.no.powi(2))
}

/// Price a wager of `amount` on `outcome` against the current pot and
/// weight state, producing the full set of post-trade figures.
///
/// The weight contribution for a bet on side B against pots (b, o) is
/// `amount * o² / (b² + amount*b)`: the more the bet moves the price,
/// the less payout weight each wagered dollar earns. The average fill
/// price comes from integrating the instantaneous price across the
/// trade (∫ u²/(u²+o²) du = u - o·atan(u/o)):
///
/// `(amount + o·atan(b/o) - o·atan((amount+b)/o)) / amount`
///
/// Errors with `EmptyPool` when either pot is non-positive (the forms
/// above are undefined there) and `InvalidArgument` on a non-positive
/// or non-finite amount.
pub fn quote(
    pot: &Pool,
    weights: &Pool,
    balance: f64,
    amount: f64,
    outcome: Outcome,
) -> Result<Quote, BookieError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(BookieError::InvalidArgument {
            field: "amount",
            reason: format!("expected a positive finite number, got {amount}"),
        });
    }
    if pot.yes <= 0.0 || pot.no <= 0.0 {
        return Err(BookieError::EmptyPool {
            yes: pot.yes,
            no: pot.no,
        });
    }

    // Pot on the side being bought, and the opposing pot.
    let bought = pot.get(outcome);
    let other = pot.get(outcome.opposite());

    let dpm_weight = amount * other.powi(2) / (bought.powi(2) + amount * bought);
    let prob_average =
        (amount + other * (bought / other).atan() - other * ((amount + bought) / other).atan())
            / amount;

    let new_pot = pot.credit(outcome, amount);
    let new_weights = weights.credit(outcome, dpm_weight);
    let prob_before = implied_probability(pot);
    let prob_after = implied_probability(&new_pot);

    debug!(
        outcome = %outcome,
        amount = format!("${amount:.2}"),
        weight = format!("{dpm_weight:.4}"),
        prob_before = format!("{:.4}", prob_before),
        prob_average = format!("{:.4}", prob_average),
        prob_after = format!("{:.4}", prob_after),
        "Wager priced"
    );

    Ok(Quote {
        new_pot,
        new_weights,
        dpm_weight,
        prob_before,
        prob_average,
        prob_after,
        new_balance: balance - amount,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_ok(pot: Pool, amount: f64, outcome: Outcome) -> Quote {
        quote(&pot, &Pool::default(), 1000.0, amount, outcome).unwrap()
    }

    // -- implied probability tests --

    #[test]
    fn test_implied_probability_balanced_pool() {
        assert!((implied_probability(&Pool::new(100.0, 100.0)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_implied_probability_is_quadratic() {
        // 300² / (300² + 100²) = 90000 / 100000
        assert!((implied_probability(&Pool::new(300.0, 100.0)) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_implied_probability_empty_pool_is_half() {
        assert_eq!(implied_probability(&Pool::new(0.0, 0.0)), 0.5);
    }

    #[test]
    fn test_implied_probability_one_sided() {
        assert_eq!(implied_probability(&Pool::new(0.0, 50.0)), 0.0);
        assert_eq!(implied_probability(&Pool::new(50.0, 0.0)), 1.0);
    }

    // -- quote: concrete scenarios --

    #[test]
    fn test_quote_yes_on_balanced_pool() {
        let q = quote(&Pool::new(100.0, 100.0), &Pool::default(), 1000.0, 10.0, Outcome::Yes)
            .unwrap();

        assert!((q.prob_before - 0.5).abs() < 1e-12);
        assert_eq!(q.new_pot.yes, 110.0);
        assert_eq!(q.new_pot.no, 100.0);
        // 110² / (110² + 100²) = 12100 / 22100
        assert!((q.prob_after - 12100.0 / 22100.0).abs() < 1e-12);
        // 10 * 100² / (100² + 10*100) = 100000 / 11000
        assert!((q.dpm_weight - 100000.0 / 11000.0).abs() < 1e-12);
        // (10 + 100·atan(1) - 100·atan(1.1)) / 10
        assert!((q.prob_average - 0.5241689672301659).abs() < 1e-12);
        assert!((q.new_balance - 990.0).abs() < 1e-12);
    }

    #[test]
    fn test_quote_yes_on_skewed_pool() {
        let q = quote_ok(Pool::new(300.0, 100.0), 50.0, Outcome::Yes);

        assert!((q.prob_before - 0.9).abs() < 1e-12);
        assert_eq!(q.new_pot.yes, 350.0);
        // 50 * 100² / (300² + 50*300) = 500000 / 105000
        assert!((q.dpm_weight - 500000.0 / 105000.0).abs() < 1e-12);
        // (50 + 100·atan(3) - 100·atan(3.5)) / 50
        assert!((q.prob_average - 0.9130982092169381).abs() < 1e-12);
        assert!((q.prob_after - 122500.0 / 132500.0).abs() < 1e-12);
    }

    #[test]
    fn test_quote_no_mirrors_yes() {
        // A NO bet against (yes, no) must behave exactly like a YES
        // bet against (no, yes).
        let no_q = quote_ok(Pool::new(300.0, 100.0), 25.0, Outcome::No);
        let yes_q = quote_ok(Pool::new(100.0, 300.0), 25.0, Outcome::Yes);

        assert!((no_q.dpm_weight - yes_q.dpm_weight).abs() < 1e-12);
        assert!((no_q.prob_average - yes_q.prob_average).abs() < 1e-12);
        assert!((no_q.prob_after - (1.0 - yes_q.prob_after)).abs() < 1e-12);
        assert_eq!(no_q.new_pot.no, yes_q.new_pot.yes);
    }

    // -- quote: properties --

    #[test]
    fn test_quote_moves_price_toward_outcome() {
        for pot in [
            Pool::new(100.0, 100.0),
            Pool::new(250.0, 80.0),
            Pool::new(12.5, 400.0),
        ] {
            let yes = quote_ok(pot, 20.0, Outcome::Yes);
            assert!(
                yes.prob_after > yes.prob_before,
                "YES bet must raise the price ({pot})"
            );

            let no = quote_ok(pot, 20.0, Outcome::No);
            assert!(
                no.prob_after < no.prob_before,
                "NO bet must lower the price ({pot})"
            );
        }
    }

    #[test]
    fn test_quote_conserves_pot_total() {
        for (pot, amount) in [
            (Pool::new(100.0, 100.0), 10.0),
            (Pool::new(37.5, 212.0), 4.25),
            (Pool::new(1000.0, 1.0), 99.0),
        ] {
            for outcome in [Outcome::Yes, Outcome::No] {
                let q = quote_ok(pot, amount, outcome);
                assert!(
                    (q.new_pot.total() - (pot.total() + amount)).abs() < 1e-9,
                    "pot total must grow by exactly the amount"
                );
            }
        }
    }

    #[test]
    fn test_quote_accumulates_weights_on_bet_side_only() {
        let weights = Pool::new(40.0, 25.0);
        let q = quote(&Pool::new(100.0, 100.0), &weights, 500.0, 10.0, Outcome::No).unwrap();

        assert_eq!(q.new_weights.yes, 40.0);
        assert!((q.new_weights.no - (25.0 + q.dpm_weight)).abs() < 1e-12);
    }

    #[test]
    fn test_quote_debits_balance() {
        let q = quote(&Pool::new(100.0, 100.0), &Pool::default(), 72.5, 10.0, Outcome::Yes)
            .unwrap();
        assert!((q.new_balance - 62.5).abs() < 1e-12);
    }

    #[test]
    fn test_quote_average_lies_between_endpoints() {
        // The fill walks the price from its pre-trade to its
        // post-trade value, so the average must lie strictly between
        // the endpoint prices on the side bought.
        let yes = quote_ok(Pool::new(100.0, 100.0), 10.0, Outcome::Yes);
        assert!(yes.prob_before < yes.prob_average && yes.prob_average < yes.prob_after);

        let no = quote_ok(Pool::new(100.0, 100.0), 10.0, Outcome::No);
        let no_before = 1.0 - no.prob_before;
        let no_after = 1.0 - no.prob_after;
        assert!(no_before < no.prob_average && no.prob_average < no_after);
    }

    #[test]
    fn test_quote_outputs_stay_in_unit_interval() {
        for yes in [1.0, 10.0, 100.0, 5000.0] {
            for no in [1.0, 10.0, 100.0, 5000.0] {
                for amount in [0.01, 1.0, 50.0, 10000.0] {
                    for outcome in [Outcome::Yes, Outcome::No] {
                        let q = quote_ok(Pool::new(yes, no), amount, outcome);
                        for p in [q.prob_before, q.prob_average, q.prob_after] {
                            assert!((0.0..=1.0).contains(&p), "prob {p} out of range");
                        }
                        assert!(q.dpm_weight.is_finite() && q.dpm_weight > 0.0);
                    }
                }
            }
        }
    }

    // -- quote: boundaries --

    #[test]
    fn test_quote_rejects_empty_pool() {
        for pot in [Pool::new(0.0, 100.0), Pool::new(100.0, 0.0), Pool::new(0.0, 0.0)] {
            for outcome in [Outcome::Yes, Outcome::No] {
                let err = quote(&pot, &Pool::default(), 1000.0, 10.0, outcome).unwrap_err();
                assert!(matches!(err, BookieError::EmptyPool { .. }), "pot {pot}");
            }
        }
    }

    #[test]
    fn test_quote_rejects_bad_amounts() {
        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = quote(
                &Pool::new(100.0, 100.0),
                &Pool::default(),
                1000.0,
                amount,
                Outcome::Yes,
            )
            .unwrap_err();
            assert!(matches!(err, BookieError::InvalidArgument { field: "amount", .. }));
        }
    }
}
