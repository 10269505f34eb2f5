//! Integration tests for the exhaustive engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quiver::{DenseVectors, FlatIndex, QuiverError, SquaredL2, VectorsRef};

fn random_vectors(rng: &mut StdRng, count: usize, dims: usize) -> Vec<f32> {
    (0..count * dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn build_index(raw: Vec<f32>, dims: usize, threads: usize) -> FlatIndex<f32, SquaredL2> {
    let data = DenseVectors::from_flat(raw, dims).unwrap();
    FlatIndex::new(data, SquaredL2, threads).unwrap()
}

#[test]
fn matches_a_naive_scan() {
    let mut rng = StdRng::seed_from_u64(11);
    let dims = 8;
    let raw = random_vectors(&mut rng, 500, dims);
    let queries = random_vectors(&mut rng, 20, dims);

    let index = build_index(raw.clone(), dims, 3);
    let result = index.search(VectorsRef::new(&queries, dims).unwrap(), 5).unwrap();

    for (q, query) in queries.chunks(dims).enumerate() {
        let mut expected: Vec<(u32, f32)> = raw
            .chunks(dims)
            .enumerate()
            .map(|(slot, v)| {
                let d: f32 = query.iter().zip(v).map(|(a, b)| (a - b) * (a - b)).sum();
                (slot as u32, d)
            })
            .collect();
        expected.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        for j in 0..5 {
            assert_eq!(result.id(q, j), expected[j].0 as u64, "query {q} neighbor {j}");
            assert!((result.distance(q, j) - expected[j].1).abs() < 1e-4);
        }
    }
}

#[test]
fn data_batch_size_settings_are_equivalent() {
    let mut rng = StdRng::seed_from_u64(12);
    let dims = 4;
    let n = 257;
    let raw = random_vectors(&mut rng, n, dims);
    let queries = random_vectors(&mut rng, 9, dims);
    let view = VectorsRef::new(&queries, dims).unwrap();

    let mut index = build_index(raw, dims, 2);
    index.set_data_batch_size(0);
    let baseline = index.search(view, 7).unwrap();

    // 0 (default), 1, N, and > N must all give identical results.
    for batch in [1usize, n, n + 100] {
        index.set_data_batch_size(batch);
        assert_eq!(index.search(view, 7).unwrap(), baseline, "data batch {batch}");
    }
}

#[test]
fn query_batch_and_thread_count_do_not_change_results() {
    let mut rng = StdRng::seed_from_u64(13);
    let dims = 6;
    let raw = random_vectors(&mut rng, 300, dims);
    let queries = random_vectors(&mut rng, 17, dims);
    let view = VectorsRef::new(&queries, dims).unwrap();

    let mut index = build_index(raw, dims, 1);
    let baseline = index.search(view, 4).unwrap();

    for threads in [2usize, 4] {
        for query_batch in [0usize, 1, 3, 100] {
            index.set_num_threads(threads).unwrap();
            index.set_query_batch_size(query_batch);
            assert_eq!(index.search(view, 4).unwrap(), baseline);
        }
    }
}

#[test]
fn deterministic_ties_resolve_by_slot() {
    // Four identical vectors; the row must list slots in ascending order.
    let raw = vec![0.0f32; 4 * 3];
    let index = build_index(raw, 3, 2);
    let queries = [0.0f32, 0.0, 0.0];
    let result = index.search(VectorsRef::new(&queries, 3).unwrap(), 4).unwrap();

    assert_eq!(result.row_ids(0), &[0, 1, 2, 3]);
    assert!(result.row(0).all(|(_, d)| d == 0.0));
}

#[test]
fn no_queries_is_a_valid_call() {
    let index = build_index(vec![1.0f32, 2.0], 2, 2);
    let result = index.search(VectorsRef::new(&[], 2).unwrap(), 1).unwrap();
    assert_eq!(result.num_queries(), 0);
}

#[test]
fn k_equal_to_dataset_size_returns_everything() {
    let mut rng = StdRng::seed_from_u64(14);
    let raw = random_vectors(&mut rng, 12, 2);
    let index = build_index(raw, 2, 2);

    let queries = [0.0f32, 0.0];
    let result = index.search(VectorsRef::new(&queries, 2).unwrap(), 12).unwrap();
    let mut ids: Vec<u64> = result.row_ids(0).to_vec();
    ids.sort_unstable();
    assert_eq!(ids, (0..12).collect::<Vec<u64>>());
}

#[test]
fn predicate_excludes_slots_from_rows() {
    let mut rng = StdRng::seed_from_u64(15);
    let raw = random_vectors(&mut rng, 100, 4);
    let index = build_index(raw, 4, 2);

    let queries = random_vectors(&mut rng, 5, 4);
    let result = index
        .search_with_predicate(VectorsRef::new(&queries, 4).unwrap(), 10, |slot| slot >= 50)
        .unwrap();
    for q in 0..5 {
        assert!(result.row_ids(q).iter().all(|&id| id >= 50));
    }
}

#[test]
fn zero_k_is_invalid() {
    let index = build_index(vec![0.0f32; 4], 2, 1);
    let queries = [0.0f32, 0.0];
    assert!(matches!(
        index.search(VectorsRef::new(&queries, 2).unwrap(), 0),
        Err(QuiverError::InvalidArgument(_))
    ));
}
