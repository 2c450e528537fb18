//! Kraskov-Stögbauer-Grassberger k-nearest-neighbour mutual information

use super::descriptive::population_std;
use super::{finite, NoResultReason, TestOutcome};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use statrs::function::gamma::digamma;

/// Estimate I(X; Y) in nats between two continuous samples.
///
/// Both inputs are scaled to unit variance and perturbed with a seeded
/// jitter of relative size 1e-10 to break ties. The estimate is floored at 0.
pub fn ksg_mutual_information(
    x: &[f64],
    y: &[f64],
    n_neighbors: usize,
    seed: u64,
) -> TestOutcome<f64> {
    let n = x.len();
    if n != y.len() || n_neighbors == 0 || n <= n_neighbors {
        return TestOutcome::NoResult(NoResultReason::InsufficientData {
            needed: n_neighbors + 1,
            got: n.min(y.len()),
        });
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let Some(xs) = scale_with_jitter(x, &mut rng) else {
        return TestOutcome::NoResult(NoResultReason::ZeroVariance);
    };
    let Some(ys) = scale_with_jitter(y, &mut rng) else {
        return TestOutcome::NoResult(NoResultReason::ZeroVariance);
    };

    let psi: Vec<(f64, f64)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let radius = kth_neighbour_radius(&xs, &ys, i, n_neighbors);
            let nx = count_within(&xs, i, radius);
            let ny = count_within(&ys, i, radius);
            (digamma(nx as f64 + 1.0), digamma(ny as f64 + 1.0))
        })
        .collect();
    // summed sequentially so the estimate does not depend on thread scheduling
    let (sum_psi_x, sum_psi_y) = psi
        .iter()
        .fold((0.0, 0.0), |acc, (px, py)| (acc.0 + px, acc.1 + py));

    let nf = n as f64;
    let mi = digamma(nf) + digamma(n_neighbors as f64) - sum_psi_x / nf - sum_psi_y / nf;
    finite(mi).map(|v| v.max(0.0))
}

fn scale_with_jitter(values: &[f64], rng: &mut Xoshiro256PlusPlus) -> Option<Vec<f64>> {
    let std = population_std(values);
    if std <= 0.0 || !std.is_finite() {
        return None;
    }
    let scaled: Vec<f64> = values.iter().map(|v| v / std).collect();
    let mean_abs = scaled.iter().map(|v| v.abs()).sum::<f64>() / scaled.len() as f64;
    let amplitude = 1e-10 * mean_abs.max(1.0);
    Some(
        scaled
            .into_iter()
            .map(|v| v + amplitude * rng.gen_range(-1.0..1.0))
            .collect(),
    )
}

/// Chebyshev distance to the k-th nearest neighbour in the joint space,
/// nudged one ulp toward zero so neighbour counts are strict.
fn kth_neighbour_radius(xs: &[f64], ys: &[f64], i: usize, k: usize) -> f64 {
    let mut dists: Vec<f64> = (0..xs.len())
        .filter(|&j| j != i)
        .map(|j| (xs[i] - xs[j]).abs().max((ys[i] - ys[j]).abs()))
        .collect();
    let (_, kth, _) = dists.select_nth_unstable_by(k - 1, |a, b| a.total_cmp(b));
    next_toward_zero(*kth)
}

fn count_within(values: &[f64], i: usize, radius: f64) -> usize {
    let center = values[i];
    values
        .iter()
        .enumerate()
        .filter(|&(j, v)| j != i && (v - center).abs() <= radius)
        .count()
}

fn next_toward_zero(value: f64) -> f64 {
    if value <= 0.0 {
        0.0
    } else {
        f64::from_bits(value.to_bits() - 1)
    }
}
