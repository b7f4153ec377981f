//! Bucketing policies used to pick a variant when an experiment is first resolved.
use std::ops::Range;

use rand::{thread_rng, Rng};

use crate::{Experiment, VariantOption};

/// Picks the variant a device or user is bucketed into.
pub trait VariantChooser: Send + Sync {
    /// Returns `None` only if the experiment has no variants.
    fn choose(&self, experiment: &Experiment) -> Option<VariantOption>;
}

/// Random choice weighted by each variant's `percentage`.
///
/// If all percentages are zero, every variant is equally likely.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRandomChooser;

impl VariantChooser for WeightedRandomChooser {
    fn choose(&self, experiment: &Experiment) -> Option<VariantOption> {
        let mut rng = thread_rng();
        choose_weighted(&experiment.variants, |range| rng.gen_range(range))
    }
}

/// Deterministic choice derived from an md5 hash of the experiment id and subject key, so the
/// same subject lands in the same variant across processes.
#[derive(Debug, Clone)]
pub struct ShardedChooser {
    subject_key: String,
}

impl ShardedChooser {
    pub fn new(subject_key: impl Into<String>) -> ShardedChooser {
        ShardedChooser {
            subject_key: subject_key.into(),
        }
    }
}

impl VariantChooser for ShardedChooser {
    fn choose(&self, experiment: &Experiment) -> Option<VariantOption> {
        let input = format!("{}-{}", experiment.id, self.subject_key);
        choose_weighted(&experiment.variants, |range| {
            range.start + get_shard(&input, range.end - range.start)
        })
    }
}

fn get_shard(input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
    let hash = md5::compute(input);
    let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
    u64::from(value) % total_shards
}

/// Walk the cumulative percentages and return the first variant crossing `pick(0..sum)`.
///
/// `pick` is only called with non-empty ranges. Percentages are summed as `u64`, so any number of
/// `u32` weights fits.
fn choose_weighted(
    variants: &[VariantOption],
    mut pick: impl FnMut(Range<u64>) -> u64,
) -> Option<VariantOption> {
    match variants {
        [] => return None,
        [only] => return Some(only.clone()),
        _ => {}
    }

    let sum: u64 = variants.iter().map(|v| u64::from(v.percentage)).sum();
    if sum == 0 {
        let index = pick(0..variants.len() as u64) as usize;
        return variants.get(index).cloned();
    }

    let threshold = pick(0..sum);
    let mut cumulative = 0u64;
    for variant in variants {
        cumulative += u64::from(variant.percentage);
        if threshold < cumulative {
            return Some(variant.clone());
        }
    }

    // Unreachable for `threshold < sum`, kept total for misbehaving `pick`.
    variants.last().cloned()
}
