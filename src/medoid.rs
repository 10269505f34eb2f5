//! Entry-point (medoid) selection.
//!
//! Graph searches start from the dataset's medoid: the stored vector
//! ranked closest to the component-wise mean under the index's own
//! distance functor, so an inner-product or cosine index seats its entry
//! point in the same geometry its searches use. Both passes are parallel
//! with a worker-ordered reduction, so the chosen slot is deterministic
//! for a given dataset, predicate, functor, and thread count.

use parking_lot::Mutex;

use crate::data::DenseVectors;
use crate::distance::Distance;
use crate::elements::Element;
use crate::error::{QuiverError, Result};
use crate::neighbor::DistanceOrder;
use crate::threads::{StaticPartition, ThreadPool};

/// Find the slot accepted by `predicate` whose stored vector ranks
/// closest to the mean of all accepted slots under `distance`. Ties
/// resolve to the smallest slot.
pub fn find_medoid<T, D, P>(
    data: &DenseVectors<T>,
    distance: &D,
    pool: &ThreadPool,
    predicate: P,
) -> Result<u32>
where
    T: Element,
    D: Distance<T>,
    P: Fn(u32) -> bool + Sync,
{
    let n = data.size();
    let dims = data.dimensions();
    if n == 0 {
        return Err(QuiverError::invalid_argument("cannot take the medoid of an empty dataset"));
    }

    // Pass 1: per-worker partial sums, combined in worker order so the
    // accumulated mean does not depend on scheduling.
    let workers = pool.size();
    let partials: Vec<Mutex<(Vec<f64>, usize)>> =
        (0..workers).map(|_| Mutex::new((vec![0.0f64; dims], 0usize))).collect();

    pool.run(StaticPartition::new(n), |range, worker| {
        let mut guard = partials[worker].lock();
        let (sums, count) = &mut *guard;
        for slot in range {
            let slot = slot as u32;
            if !predicate(slot) {
                continue;
            }
            for (accumulator, component) in sums.iter_mut().zip(data.get(slot)) {
                *accumulator += component.to_f32() as f64;
            }
            *count += 1;
        }
        Ok(())
    })?;

    let mut sums = vec![0.0f64; dims];
    let mut live = 0usize;
    for partial in &partials {
        let guard = partial.lock();
        for (total, partial_sum) in sums.iter_mut().zip(guard.0.iter()) {
            *total += partial_sum;
        }
        live += guard.1;
    }
    if live == 0 {
        return Err(QuiverError::invalid_argument("no slot passes the medoid predicate"));
    }
    let mean: Vec<f32> = sums.iter().map(|&s| (s / live as f64) as f32).collect();

    // Pass 2: per-worker best-against-the-mean under the functor's order,
    // combined in worker order with ties to the smaller slot.
    let bests: Vec<Mutex<Option<(f32, u32)>>> = (0..workers).map(|_| Mutex::new(None)).collect();
    pool.run(StaticPartition::new(n), |range, worker| {
        let mut functor = distance.clone();
        functor.fix_argument(&mean);
        let mut local: Option<(f32, u32)> = None;
        for slot in range {
            let slot = slot as u32;
            if !predicate(slot) {
                continue;
            }
            let d = functor.compute(&mean, data.get(slot));
            let better = match local {
                None => true,
                Some((best, _)) => D::Order::closer(d, best),
            };
            if better {
                local = Some((d, slot));
            }
        }
        if local.is_some() {
            *bests[worker].lock() = local;
        }
        Ok(())
    })?;

    let mut best: Option<(f32, u32)> = None;
    for candidate in &bests {
        if let Some((d, slot)) = *candidate.lock() {
            best = match best {
                None => Some((d, slot)),
                Some((bd, bs)) => {
                    if D::Order::closer(d, bd) || (d == bd && slot < bs) {
                        Some((d, slot))
                    } else {
                        Some((bd, bs))
                    }
                }
            };
        }
    }
    best.map(|(_, slot)| slot)
        .ok_or_else(|| QuiverError::internal("medoid reduction lost every candidate"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{Cosine, InnerProduct, SquaredL2};

    fn cluster() -> DenseVectors<f32> {
        let mut data = DenseVectors::new(2).unwrap();
        // A tight cluster around the origin plus one outlier; the medoid
        // is the cluster point nearest the pulled mean.
        data.append(&[0.0, 0.0]).unwrap();
        data.append(&[1.0, 0.0]).unwrap();
        data.append(&[0.0, 1.0]).unwrap();
        data.append(&[1.0, 1.0]).unwrap();
        data.append(&[100.0, 100.0]).unwrap();
        data
    }

    #[test]
    fn picks_the_point_nearest_the_mean() {
        let pool = ThreadPool::new(2).unwrap();
        let medoid = find_medoid(&cluster(), &SquaredL2, &pool, |_| true).unwrap();
        // Mean is ~(20.4, 20.4); (1, 1) is the nearest stored point.
        assert_eq!(medoid, 3);
    }

    #[test]
    fn predicate_restricts_both_passes() {
        let pool = ThreadPool::new(3).unwrap();
        let medoid = find_medoid(&cluster(), &SquaredL2, &pool, |slot| slot != 4).unwrap();
        // Without the outlier the mean is (0.5, 0.5); all four corners
        // tie, so the smallest slot wins.
        assert_eq!(medoid, 0);
    }

    #[test]
    fn inner_product_selects_under_its_own_order() {
        let pool = ThreadPool::new(2).unwrap();
        // Larger dot product with the mean is closer, so the outlier wins
        // outright under inner product.
        let medoid = find_medoid(&cluster(), &InnerProduct, &pool, |_| true).unwrap();
        assert_eq!(medoid, 4);
    }

    #[test]
    fn cosine_ties_resolve_to_the_smaller_slot() {
        let pool = ThreadPool::new(2).unwrap();
        let mut data = DenseVectors::new(2).unwrap();
        data.append(&[1.0, 0.0]).unwrap();
        data.append(&[2.0, 2.0]).unwrap();
        data.append(&[2.0, 2.0]).unwrap();
        data.append(&[0.0, 1.0]).unwrap();
        // The mean lies on the diagonal; the duplicated diagonal vectors
        // are bitwise identical, so their similarities tie exactly and
        // the smaller slot wins.
        let medoid = find_medoid(&data, &Cosine::default(), &pool, |_| true).unwrap();
        assert_eq!(medoid, 1);
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let pool = ThreadPool::new(1).unwrap();
        let data = DenseVectors::<f32>::new(2).unwrap();
        assert!(find_medoid(&data, &SquaredL2, &pool, |_| true).is_err());
    }

    #[test]
    fn fully_filtered_dataset_is_rejected() {
        let pool = ThreadPool::new(1).unwrap();
        assert!(find_medoid(&cluster(), &SquaredL2, &pool, |_| false).is_err());
    }

    #[test]
    fn single_point_is_its_own_medoid() {
        let pool = ThreadPool::new(4).unwrap();
        let mut data = DenseVectors::new(3).unwrap();
        data.append(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(find_medoid(&data, &SquaredL2, &pool, |_| true).unwrap(), 0);
    }
}
