//! Integer apportionment helpers. Every function returns exactly one share per
//! slot and the shares always add up to the quantity handed in.

/// Weights are scaled to integers before apportioning so the arithmetic stays
/// exact; six decimal places is far below any meaningful score difference.
const WEIGHT_SCALE: f64 = 1_000_000.0;

/// `floor(q/s)` each, the first `q mod s` slots get one more.
pub fn equal_split(quantity: u64, slots: usize) -> Vec<u64> {
    if slots == 0 {
        return Vec::new();
    }
    let slots_u = slots as u64;
    let base = quantity / slots_u;
    let remainder = quantity % slots_u;
    (0..slots_u)
        .map(|idx| if idx < remainder { base + 1 } else { base })
        .collect()
}

/// Every slot with a positive weight gets the equal-split floor of the whole
/// selection; what is left is apportioned by weight using largest remainders
/// (ties go to the earlier slot). Zero-weight slots get nothing unless every
/// weight is zero, in which case this degrades to [`equal_split`].
pub fn weighted_split(quantity: u64, weights: &[f64]) -> Vec<u64> {
    let slots = weights.len();
    if slots == 0 {
        return Vec::new();
    }

    let scaled: Vec<u128> = weights
        .iter()
        .map(|weight| {
            if weight.is_finite() && *weight > 0.0 {
                ((weight * WEIGHT_SCALE).round() as u128).max(1)
            } else {
                0
            }
        })
        .collect();
    let positive = scaled.iter().filter(|w| **w > 0).count() as u64;
    if positive == 0 {
        return equal_split(quantity, slots);
    }

    let floor = quantity / slots as u64;
    let mut shares: Vec<u64> = scaled
        .iter()
        .map(|w| if *w > 0 { floor } else { 0 })
        .collect();

    let remaining = quantity - floor * positive;
    if remaining == 0 {
        return shares;
    }

    let total_weight: u128 = scaled.iter().sum();
    let mut remainders = Vec::with_capacity(slots);
    let mut handed_out = 0u64;
    for (idx, weight) in scaled.iter().enumerate() {
        if *weight == 0 {
            continue;
        }
        let numerator = u128::from(remaining) * weight;
        let whole = (numerator / total_weight) as u64;
        shares[idx] += whole;
        handed_out += whole;
        remainders.push((idx, numerator % total_weight));
    }

    // Stable sort keeps selection order among equal remainders.
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    let leftover = remaining - handed_out;
    for (idx, _) in remainders.into_iter().take(leftover as usize) {
        shares[idx] += 1;
    }
    shares
}

/// Grants requested amounts in order until `available` runs out.
pub fn truncate_in_order(requested: &[u64], available: u64) -> Vec<u64> {
    let mut left = available;
    requested
        .iter()
        .map(|want| {
            let granted = (*want).min(left);
            left -= granted;
            granted
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_split_sums_and_stays_balanced() {
        for quantity in 0..60u64 {
            for slots in 1..9usize {
                let shares = equal_split(quantity, slots);
                assert_eq!(shares.len(), slots);
                assert_eq!(shares.iter().sum::<u64>(), quantity);
                let max = shares.iter().max().copied().unwrap_or_default();
                let min = shares.iter().min().copied().unwrap_or_default();
                assert!(max - min <= 1, "q={quantity} s={slots} shares={shares:?}");
            }
        }
    }

    #[test]
    fn equal_split_front_loads_remainder() {
        assert_eq!(equal_split(10, 3), vec![4, 3, 3]);
        assert_eq!(equal_split(2, 3), vec![1, 1, 0]);
    }

    #[test]
    fn weighted_split_favours_heavier_weights() {
        let shares = weighted_split(20, &[0.8, 0.1, 0.1]);
        assert_eq!(shares, vec![8, 6, 6]);
        assert_eq!(shares.iter().sum::<u64>(), 20);
        assert!(shares[0] > shares[1]);
        assert!(shares.iter().all(|share| *share >= 20 / 3));
    }

    #[test]
    fn weighted_split_keeps_total_for_awkward_weights() {
        for quantity in 0..40u64 {
            let shares = weighted_split(quantity, &[0.1, 0.333, 0.9, 0.0001]);
            assert_eq!(shares.iter().sum::<u64>(), quantity);
        }
    }

    #[test]
    fn weighted_split_skips_zero_weights() {
        let shares = weighted_split(9, &[1.0, 0.0, 1.0]);
        assert_eq!(shares, vec![5, 0, 4]);
    }

    #[test]
    fn weighted_split_all_zero_is_equal_split() {
        assert_eq!(weighted_split(7, &[0.0, 0.0]), vec![4, 3]);
    }

    #[test]
    fn truncation_serves_earlier_slots_first() {
        assert_eq!(truncate_in_order(&[3, 4, 2], 5), vec![3, 2, 0]);
    }
}
