/// Shortest run of consecutive positive channels treated as real signal
pub const MIN_GOOD_WINDOW: usize = 5;

/// Channel counts with isolated spikes removed, plus a mask of the channels that can be
/// trusted. Both vectors have the length of the raw scan.
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredSignal {
    pub counts: Vec<f64>,
    pub usable: Vec<bool>,
}

impl FilteredSignal {
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[must_use]
    pub fn num_usable(&self) -> usize {
        self.usable.iter().filter(|&&usable| usable).count()
    }

    /// Usable channels whose neighbours on both sides are usable too, so that a three sample
    /// moving average centred on them sees only trusted counts
    #[must_use]
    pub fn fully_usable_windows(&self) -> Vec<bool> {
        let n = self.usable.len();
        (0..n)
            .map(|ii| ii > 0 && ii + 1 < n && self.usable[ii - 1..=ii + 1].iter().all(|&u| u))
            .collect()
    }

    /// Whether any channel survived filtering with a positive count
    #[must_use]
    pub fn has_signal(&self) -> bool {
        self.counts
            .iter()
            .zip(&self.usable)
            .any(|(&count, &usable)| usable && count > 0.0)
    }
}

/// Remove short bursts of counts from a raw scan.
///
/// The first and last channels are always unusable. Across the interior, runs of strictly
/// positive counts shorter than [`MIN_GOOD_WINDOW`] are zeroed and masked out, while longer runs
/// are kept unchanged. Applying the filter to its own output changes nothing.
#[must_use]
pub fn filter_channels(raw: &[f64]) -> FilteredSignal {
    let n = raw.len();
    let mut counts = vec![0.0; n];
    let mut usable = vec![false; n];
    if n < 3 {
        return FilteredSignal { counts, usable };
    }

    let last_interior = n - 1;
    let mut ii = 1;
    while ii < last_interior {
        if raw[ii] > 0.0 {
            let start = ii;
            while ii < last_interior && raw[ii] > 0.0 {
                ii += 1;
            }
            if ii - start >= MIN_GOOD_WINDOW {
                counts[start..ii].copy_from_slice(&raw[start..ii]);
                usable[start..ii].fill(true);
            }
        } else {
            ii += 1;
        }
    }

    FilteredSignal { counts, usable }
}
