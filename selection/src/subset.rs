//! Exact subset-sum search.
//!
//! Used when no candidate coin carries a deposit fee: finding coins that sum
//! exactly to the target avoids a refresh. Values are scaled down by their
//! common divisor and the search is skipped when the scaled problem is too big.

/// Largest scaled target the search accepts.
pub const MAX_SCALED_TARGET: u128 = 20_000;

/// Largest number of coins the search accepts.
pub const MAX_ITEMS: usize = 128;

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Indices of a minimum-size subset of `values` summing to exactly `target`.
///
/// Returns `None` when no such subset exists or the instance exceeds
/// [`MAX_SCALED_TARGET`] / [`MAX_ITEMS`]. Among equally small subsets the one
/// using earlier indices wins.
pub fn exact_subset(values: &[u128], target: u128) -> Option<Vec<usize>> {
    if target == 0 {
        return Some(Vec::new());
    }
    if values.is_empty() || values.len() > MAX_ITEMS {
        return None;
    }
    let g = values.iter().fold(target, |g, v| gcd(g, *v));
    let scaled = target / g;
    if scaled > MAX_SCALED_TARGET {
        return None;
    }
    let t = scaled as usize;

    const UNREACHED: u32 = u32::MAX;
    let mut best = vec![UNREACHED; t + 1];
    best[0] = 0;
    let mut take = vec![vec![false; t + 1]; values.len()];

    // Later items only win on strict improvement, so iterate from the back.
    for i in (0..values.len()).rev() {
        let w = values[i] / g;
        if w == 0 || w > scaled {
            continue;
        }
        let w = w as usize;
        for s in (w..=t).rev() {
            let prev = best[s - w];
            if prev != UNREACHED && prev + 1 <= best[s] {
                best[s] = prev + 1;
                take[i][s] = true;
            }
        }
    }
    if best[t] == UNREACHED {
        return None;
    }

    let mut picked = Vec::new();
    let mut s = t;
    for (i, row) in take.iter().enumerate() {
        if s == 0 {
            break;
        }
        if row[s] {
            picked.push(i);
            s -= (values[i] / g) as usize;
        }
    }
    if s == 0 {
        Some(picked)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(values: &[u128], idx: &[usize]) -> u128 {
        idx.iter().map(|&i| values[i]).sum()
    }

    #[test]
    fn no_exact_subset() {
        assert_eq!(exact_subset(&[8, 2, 1], 5), None);
    }

    #[test]
    fn single_coin_match() {
        assert_eq!(exact_subset(&[5, 3, 2], 5), Some(vec![0]));
    }

    #[test]
    fn pair_beats_greedy() {
        // Largest-first greedy takes 4 and gets stuck at 2 remaining.
        let values = [4, 3, 3];
        let picked = exact_subset(&values, 6).unwrap();
        assert_eq!(sum(&values, &picked), 6);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn prefers_fewest_coins() {
        let values = [1, 1, 1, 1, 4];
        let picked = exact_subset(&values, 4).unwrap();
        assert_eq!(picked, vec![4]);
    }

    #[test]
    fn scales_by_common_divisor() {
        let unit = 100_000_000u128;
        let values = [7 * unit, 5 * unit, 3 * unit];
        let picked = exact_subset(&values, 8 * unit).unwrap();
        assert_eq!(sum(&values, &picked), 8 * unit);
    }

    #[test]
    fn oversized_instance_is_skipped() {
        assert_eq!(exact_subset(&[1, 1], MAX_SCALED_TARGET + 1), None);
    }

    #[test]
    fn zero_target_is_empty() {
        assert_eq!(exact_subset(&[1, 2], 0), Some(Vec::new()));
    }
}
