//! Integration tests for the Rust-facing index handle

use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use simbridge::{DataInput, DataOutput, IndexHandle, IndexState, ResultBuffer};
use simbridge_core::config::BridgeConfig;
use simbridge_core::{Allocator, DataEncoding, DistanceKind, ErrorCode, ParameterSet, SparseElement};

fn empty_params() -> ParameterSet {
    ParameterSet::new(Allocator::system())
}

fn dense_index(space: &str, method: &str) -> IndexHandle {
    IndexHandle::create(
        DataEncoding::DenseFloatVector,
        DistanceKind::Float,
        space,
        &empty_params(),
        method,
        Allocator::system(),
    )
    .unwrap()
}

fn random_rows(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn built_dense(method: &str, n: usize, dim: usize) -> (IndexHandle, Vec<f32>) {
    let flat = random_rows(n, dim, 42);
    let mut index = dense_index("l2", method);
    index.add_dense_batch(&flat, dim, None).unwrap();
    index.build(&empty_params(), false).unwrap();
    (index, flat)
}

mod query_tests {
    use super::*;

    #[test]
    fn test_knn_returns_min_k_n_sorted() {
        let (index, flat) = built_dense("brute_force", 20, 4);

        let hits = index.knn_query(DataInput::Dense(&flat[..4]), 50).unwrap();
        assert_eq!(hits.len(), 20);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        // A stored vector finds itself first
        assert_eq!(hits[0].id, 0);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_fill_matches_query() {
        let (index, flat) = built_dense("brute_force", 30, 8);
        let query = DataInput::Dense(&flat[8 * 7..8 * 8]);

        let size = index.knn_query_get_size(query, 5).unwrap();
        assert_eq!(size, 5);

        let mut ids = vec![0i32; size];
        let mut distances = vec![0f32; size];
        let mut result = ResultBuffer::new(&mut ids, &mut distances).unwrap();
        index.knn_query_fill(query, 5, &mut result).unwrap();
        assert_eq!(result.size(), 5);
        assert_eq!(result.ids()[0], 7);

        let expected: Vec<i32> = index.knn_query(query, 5).unwrap().iter().map(|h| h.id).collect();
        assert_eq!(result.ids(), expected.as_slice());
    }

    #[test]
    fn test_buffer_too_small() {
        let (index, flat) = built_dense("brute_force", 10, 2);
        let mut ids = [0i32; 3];
        let mut distances = [0f32; 3];
        let mut result = ResultBuffer::new(&mut ids, &mut distances).unwrap();
        let err = index
            .knn_query_fill(DataInput::Dense(&flat[..2]), 4, &mut result)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BufferTooSmall);
        assert_eq!(result.size(), 0);
    }

    #[test]
    fn test_query_width_and_encoding_checked() {
        let (index, _) = built_dense("brute_force", 5, 3);
        let err = index.knn_query(DataInput::Dense(&[1.0, 2.0]), 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = index.knn_query(DataInput::Bytes(&[1, 2, 3]), 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SpaceIncompatible);
    }

    #[test]
    fn test_concurrent_fills_are_independent() {
        let (index, flat) = built_dense("brute_force", 300, 8);
        let k = 7;
        let reference: Vec<(Vec<i32>, Vec<u32>)> = flat
            .chunks(8)
            .map(|q| {
                let hits = index.knn_query(DataInput::Dense(q), k).unwrap();
                (hits.iter().map(|h| h.id).collect(), hits.iter().map(|h| h.distance.to_bits()).collect())
            })
            .collect();

        let index = Arc::new(index);
        let flat = Arc::new(flat);
        let reference = Arc::new(reference);
        let workers: Vec<_> = (0..6)
            .map(|t| {
                let index = Arc::clone(&index);
                let flat = Arc::clone(&flat);
                let reference = Arc::clone(&reference);
                thread::spawn(move || {
                    for i in (t..300).step_by(6) {
                        let mut ids = [-1i32; 7];
                        let mut distances = [f32::NAN; 7];
                        let mut result = ResultBuffer::new(&mut ids, &mut distances).unwrap();
                        index
                            .knn_query_fill(DataInput::Dense(&flat[i * 8..(i + 1) * 8]), k, &mut result)
                            .unwrap();
                        assert_eq!(result.size(), k);

                        let (expected_ids, expected_bits) = &reference[i];
                        assert_eq!(ids.as_slice(), expected_ids.as_slice(), "query {}", i);
                        assert_eq!(distances.map(f32::to_bits).as_slice(), expected_bits.as_slice(), "query {}", i);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_vamana_returns_min_k_n_on_duplicates() {
        // 400 records stacked on 4 distinct points
        let flat: Vec<f32> = (0..400).flat_map(|i| [(i % 4) as f32, 0.0]).collect();
        let mut index = dense_index("l2", "vamana");
        index.add_dense_batch(&flat, 2, None).unwrap();
        index.build(&empty_params(), false).unwrap();

        for k in [1, 50, 150, 300, 400, 500] {
            let hits = index.knn_query(DataInput::Dense(&[0.0, 0.0]), k).unwrap();
            assert_eq!(hits.len(), k.min(400), "k = {}", k);
            assert_eq!(hits[0].distance, 0.0);
            assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
    }

    #[test]
    fn test_batch_matches_single_queries() {
        let (mut index, flat) = built_dense("brute_force", 64, 4);
        index.set_thread_pool_size(3).unwrap();
        index.initialize_pool().unwrap();

        let queries: Vec<DataInput<'_>> = (0..6).map(|i| DataInput::Dense(&flat[i * 4..(i + 1) * 4])).collect();
        let mut ids = vec![[0i32; 4]; 6];
        let mut distances = vec![[0f32; 4]; 6];
        let mut results: Vec<ResultBuffer<'_>> = ids
            .iter_mut()
            .zip(distances.iter_mut())
            .map(|(i, d)| ResultBuffer::new(i, d).unwrap())
            .collect();

        index.knn_query_batch(&queries, 4, &mut results).unwrap();
        for (q, result) in queries.iter().zip(&results) {
            let single: Vec<i32> = index.knn_query(*q, 4).unwrap().iter().map(|h| h.id).collect();
            assert_eq!(result.ids(), single.as_slice());
        }
    }

    #[test]
    fn test_batch_reports_first_failure() {
        let (index, flat) = built_dense("brute_force", 16, 2);
        let queries = [
            DataInput::Dense(&flat[..2]),
            DataInput::Dense(&[0.0]),
            DataInput::Dense(&flat[2..4]),
        ];
        let mut ids = vec![[0i32; 2]; 3];
        let mut distances = vec![[0f32; 2]; 3];
        let mut results: Vec<ResultBuffer<'_>> = ids
            .iter_mut()
            .zip(distances.iter_mut())
            .map(|(i, d)| ResultBuffer::new(i, d).unwrap())
            .collect();

        let err = index.knn_query_batch(&queries, 2, &mut results).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("query 1"));
        // The other queries still ran
        assert_eq!(results[0].size(), 2);
        assert_eq!(results[1].size(), 0);
        assert_eq!(results[2].size(), 2);
    }

    #[test]
    fn test_vamana_recall() {
        let n = 400;
        let dim = 12;
        let (graph, flat) = built_dense("vamana", n, dim);
        let mut exact = dense_index("l2", "brute_force");
        exact.add_dense_batch(&flat, dim, None).unwrap();
        exact.build(&empty_params(), false).unwrap();

        let queries = random_rows(40, dim, 7);
        let mut found = 0;
        for q in queries.chunks(dim) {
            let truth: Vec<i32> = exact.knn_query(DataInput::Dense(q), 10).unwrap().iter().map(|h| h.id).collect();
            let approx = graph.knn_query(DataInput::Dense(q), 10).unwrap();
            found += approx.iter().filter(|h| truth.contains(&h.id)).count();
        }
        assert!(found as f64 / 400.0 >= 0.9);
    }
}

mod record_tests {
    use super::*;

    #[test]
    fn test_sparse_order_enforced() {
        let mut index = IndexHandle::create(
            DataEncoding::SparseFloatVector,
            DistanceKind::Float,
            "cosinesimil_sparse",
            &empty_params(),
            "brute_force",
            Allocator::system(),
        )
        .unwrap();

        let sorted = [SparseElement::new(0, 1.0), SparseElement::new(3, 2.0)];
        index.add_data_point(DataInput::Sparse(&sorted), 1).unwrap();

        let unsorted = [SparseElement::new(3, 2.0), SparseElement::new(0, 1.0)];
        let err = index.add_data_point(DataInput::Sparse(&unsorted), 2).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSparseElement);

        let duplicate = [SparseElement::new(3, 2.0), SparseElement::new(3, 1.0)];
        let err = index.add_data_point(DataInput::Sparse(&duplicate), 3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSparseElement);
        assert_eq!(index.data_qty(), 1);

        let mut out = [SparseElement::new(0, 0.0); 2];
        let n = index.get_data_point_fill(0, DataOutput::Sparse(&mut out)).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, sorted);
    }

    #[test]
    fn test_batch_keeps_records_before_failure() {
        let mut index = dense_index("l2", "brute_force");
        let inputs = [
            DataInput::Dense(&[1.0, 1.0]),
            DataInput::Dense(&[2.0, 2.0]),
            DataInput::Dense(&[3.0]),
            DataInput::Dense(&[4.0, 4.0]),
        ];
        let err = index.add_data_point_batch(&inputs, None).unwrap_err();
        assert!(err.to_string().contains("record 2 of batch"));
        assert_eq!(index.data_qty(), 2);
    }

    #[test]
    fn test_distance_between_records() {
        let mut index = dense_index("l2", "brute_force");
        index.add_dense_batch(&[0.0, 0.0, 3.0, 4.0], 2, Some(&[10, 20])).unwrap();
        assert_eq!(index.get_distance(0, 0).unwrap(), 0.0);
        assert!((index.get_distance(0, 1).unwrap() - 5.0).abs() < 1e-6);
        assert_eq!(index.get_distance(0, 2).unwrap_err().code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_wide_byte_distance_saturates() {
        let mut index = IndexHandle::create(
            DataEncoding::DenseByteVector,
            DistanceKind::Int,
            "l2sqr_sift",
            &empty_params(),
            "brute_force",
            Allocator::system(),
        )
        .unwrap();
        let dim = 40_000;
        let mut flat = vec![0u8; dim];
        flat.extend(std::iter::repeat(255u8).take(dim));
        flat.extend(std::iter::repeat(1u8).take(dim));
        index.add_byte_batch(&flat, dim, None).unwrap();
        index.build(&empty_params(), false).unwrap();

        assert_eq!(index.get_distance(0, 1).unwrap(), i32::MAX as f32);
        assert_eq!(index.get_distance(0, 2).unwrap(), dim as f32);

        // The far record still ranks last
        let hits = index.knn_query(DataInput::Bytes(&flat[..dim]), 3).unwrap();
        let ids: Vec<i32> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![0, 2, 1]);
    }

    #[test]
    fn test_fill_buffer_too_small() {
        let mut index = dense_index("l2", "brute_force");
        index.add_data_point(DataInput::Dense(&[1.0, 2.0, 3.0]), 0).unwrap();
        assert_eq!(index.get_data_point_size(0).unwrap(), 3);

        let mut short = [0f32; 2];
        let err = index.get_data_point_fill(0, DataOutput::Dense(&mut short)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BufferTooSmall);

        let mut bytes = [0u8; 3];
        let err = index.get_data_point_fill(0, DataOutput::Bytes(&mut bytes)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SpaceIncompatible);
    }

    #[test]
    fn test_string_records() {
        let mut index = IndexHandle::create(
            DataEncoding::LengthPrefixedString,
            DistanceKind::Int,
            "leven",
            &empty_params(),
            "brute_force",
            Allocator::system(),
        )
        .unwrap();
        let words = ["kitten", "sitting", "mitten", "fitting"];
        let inputs: Vec<DataInput<'_>> = words.iter().map(|w| DataInput::text(w)).collect();
        index.add_data_point_batch(&inputs, None).unwrap();
        index.build(&empty_params(), false).unwrap();

        let copy = index.get_data_point_string(1, index.allocator()).unwrap();
        assert_eq!(copy.as_bytes(), b"sitting\0");

        let hits = index.knn_query(DataInput::text("kitten"), 2).unwrap();
        assert_eq!(hits[0].id, 0);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].id, 2);
        assert_eq!(hits[1].distance, 1.0);
    }

    #[test]
    fn test_borrowed_copies_are_detached() {
        let mut index = dense_index("l2", "brute_force");
        index.add_data_point(DataInput::Dense(&[0.5, 1.5]), 9).unwrap();
        let copy = index.borrow_data_dense(0, index.allocator()).unwrap();
        assert!(copy.is_detached());
        assert_eq!(copy.as_slice::<f32>().unwrap(), &[0.5, 1.5]);

        let err = index.borrow_data_sparse(0, index.allocator()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SpaceIncompatible);
    }
}

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_build_add_reset_cycle() {
        let (mut index, _) = built_dense("vamana", 50, 4);
        assert_eq!(index.state(), IndexState::Built);
        assert!(index.memory_usage() > 0);

        let err = index.add_data_point(DataInput::Dense(&[0.0; 4]), 99).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexAlreadyBuilt);

        let err = index.build(&empty_params(), false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexAlreadyBuilt);

        index.reset();
        assert_eq!(index.state(), IndexState::Created);
        assert_eq!(index.data_qty(), 0);
        assert_eq!(index.memory_usage(), 0);

        index.add_dense_batch(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, None).unwrap();
        index.build(&empty_params(), false).unwrap();
        let hits = index.knn_query(DataInput::Dense(&[1.0, 2.0, 3.0]), 1).unwrap();
        assert_eq!(hits[0].id, 0);
    }

    #[test]
    fn test_query_time_params() {
        let mut index = dense_index("l2", "vamana");
        let mut params = ParameterSet::new(Allocator::system());
        params.add_int("efSearch", 50);
        let err = index.set_query_time_params(&params).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexNotBuilt);

        index.add_dense_batch(&random_rows(20, 2, 1), 2, None).unwrap();
        index.build(&empty_params(), false).unwrap();
        index.set_query_time_params(&params).unwrap();

        let mut bad = ParameterSet::new(Allocator::system());
        bad.add_int("efSearch", 0);
        assert!(index.set_query_time_params(&bad).is_err());
    }

    #[test]
    fn test_build_params_reach_method() {
        let mut index = dense_index("l2", "vamana");
        index.add_dense_batch(&random_rows(20, 2, 1), 2, None).unwrap();
        let mut params = ParameterSet::new(Allocator::system());
        params.add_int("maxDegree", 0);
        let err = index.build(&params, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexBuildFailed);
        assert_eq!(index.state(), IndexState::Created);
    }

    #[test]
    fn test_failed_query_defaults_leave_index_unbuilt() {
        let mut config = BridgeConfig::default();
        config.query.search_breadth_param = "beamWidth".to_string();
        let mut index = IndexHandle::create_with_config(
            DataEncoding::DenseFloatVector,
            DistanceKind::Float,
            "l2",
            &empty_params(),
            "vamana",
            Allocator::system(),
            config,
        )
        .unwrap();
        index.add_dense_batch(&random_rows(20, 2, 1), 2, None).unwrap();

        assert!(index.build(&empty_params(), false).is_err());
        assert_eq!(index.state(), IndexState::Created);
        assert_eq!(index.memory_usage(), 0);
        let err = index.knn_query(DataInput::Dense(&[0.0, 0.0]), 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexNotBuilt);

        // Records can still be added to the unbuilt index
        index.add_data_point(DataInput::Dense(&[1.0, 1.0]), 20).unwrap();
        assert_eq!(index.data_qty(), 21);
    }
}

mod persistence_tests {
    use super::*;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dense.idx");
        let (index, flat) = built_dense("vamana", 120, 6);
        index.save(&path, true).unwrap();
        assert!(simbridge::data_path(&path).exists());

        let loaded = IndexHandle::load(
            &path,
            DataEncoding::DenseFloatVector,
            DistanceKind::Float,
            Allocator::system(),
            true,
        )
        .unwrap();
        assert_eq!(loaded.state(), IndexState::Built);
        assert_eq!(loaded.data_qty(), 120);
        assert_eq!(loaded.space_type(), "l2");
        assert_eq!(loaded.method_name(), "vamana");

        for position in 0..loaded.data_qty() {
            let mut original = [0f32; 6];
            let mut restored = [0f32; 6];
            index.get_data_point_fill(position, DataOutput::Dense(&mut original)).unwrap();
            loaded.get_data_point_fill(position, DataOutput::Dense(&mut restored)).unwrap();
            assert_eq!(original.map(f32::to_bits), restored.map(f32::to_bits), "position {}", position);
            assert_eq!(loaded.get_distance(position, position).unwrap(), 0.0);
        }

        for q in flat.chunks(6).take(10) {
            let before: Vec<i32> = index.knn_query(DataInput::Dense(q), 5).unwrap().iter().map(|h| h.id).collect();
            let after: Vec<i32> = loaded.knn_query(DataInput::Dense(q), 5).unwrap().iter().map(|h| h.id).collect();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_sparse_index_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sparse.idx");

        let mut index = IndexHandle::create(
            DataEncoding::SparseFloatVector,
            DistanceKind::Float,
            "negdotprod_sparse",
            &empty_params(),
            "brute_force",
            Allocator::system(),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let records: Vec<Vec<SparseElement>> = (0..40)
            .map(|_| {
                let mut dim = 0u32;
                (0..rng.gen_range(1..12))
                    .map(|_| {
                        dim += rng.gen_range(1..50);
                        SparseElement::new(dim, rng.gen_range(-2.0..2.0))
                    })
                    .collect()
            })
            .collect();
        for (i, record) in records.iter().enumerate() {
            index.add_data_point(DataInput::Sparse(record), i as i32 * 3).unwrap();
        }
        index.build(&empty_params(), false).unwrap();
        index.save(&path, true).unwrap();

        let loaded = IndexHandle::load(
            &path,
            DataEncoding::SparseFloatVector,
            DistanceKind::Float,
            Allocator::system(),
            true,
        )
        .unwrap();
        assert_eq!(loaded.data_qty(), records.len());
        assert_eq!(loaded.space_type(), "negdotprod_sparse");

        for (position, record) in records.iter().enumerate() {
            assert_eq!(loaded.get_data_point_size(position).unwrap(), record.len());
            let mut out = vec![SparseElement::new(0, 0.0); record.len()];
            loaded.get_data_point_fill(position, DataOutput::Sparse(&mut out)).unwrap();
            let restored: Vec<(u32, u32)> = out.iter().map(|e| (e.id, e.value.to_bits())).collect();
            let expected: Vec<(u32, u32)> = record.iter().map(|e| (e.id, e.value.to_bits())).collect();
            assert_eq!(restored, expected, "position {}", position);
            assert_eq!(
                loaded.get_distance(position, position).unwrap().to_bits(),
                index.get_distance(position, position).unwrap().to_bits()
            );
        }

        let hits = loaded.knn_query(DataInput::Sparse(&records[5]), 3).unwrap();
        let before = index.knn_query(DataInput::Sparse(&records[5]), 3).unwrap();
        assert_eq!(hits, before);
    }

    #[test]
    fn test_load_wrong_encoding() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dense.idx");
        let (index, _) = built_dense("brute_force", 10, 2);
        index.save(&path, true).unwrap();

        let err = IndexHandle::load(
            &path,
            DataEncoding::DenseByteVector,
            DistanceKind::Int,
            Allocator::system(),
            true,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SpaceIncompatible);
    }

    #[test]
    fn test_byte_index_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bytes.idx");

        let mut index = IndexHandle::create(
            DataEncoding::DenseByteVector,
            DistanceKind::Int,
            "l2sqr_sift",
            &empty_params(),
            "brute_force",
            Allocator::system(),
        )
        .unwrap();
        let flat: Vec<u8> = (0..64u8).collect();
        index.add_byte_batch(&flat, 8, Some(&[1, 2, 3, 4, 5, 6, 7, 8])).unwrap();
        index.build(&empty_params(), false).unwrap();
        index.save(&path, true).unwrap();

        let loaded = IndexHandle::load(
            &path,
            DataEncoding::DenseByteVector,
            DistanceKind::Int,
            Allocator::system(),
            true,
        )
        .unwrap();
        let hits = loaded.knn_query(DataInput::Bytes(&flat[8..16]), 1).unwrap();
        assert_eq!(hits[0].id, 2);
        assert_eq!(hits[0].distance, 0.0);
    }
}
