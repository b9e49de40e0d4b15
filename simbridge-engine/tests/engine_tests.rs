//! Integration tests for simbridge-engine

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use simbridge_core::{DataEncoding, ErrorCode, SparseElement};
use simbridge_engine::registry::{
    create_byte_space, create_dense_float_space, create_sparse_float_space, create_string_space,
};
use simbridge_engine::{create_method, dataset, KnnQueue, Method, QueryRecord, Record, SearchContext, Space};

fn random_records(n: usize, dim: usize, seed: u64) -> Vec<Record<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let data: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            Record::from_vec(i as i32, data)
        })
        .collect()
}

fn knn_ids<D: simbridge_engine::DistanceValue>(
    method: &dyn Method<f32, D>,
    ctx: SearchContext<'_, f32, D>,
    query: &[f32],
    k: usize,
) -> Vec<i32> {
    let mut queue = KnnQueue::new(k);
    method.search_knn(ctx, &QueryRecord::new(query), &mut queue).unwrap();
    let mut ids = Vec::new();
    while let Some(n) = queue.pop() {
        ids.push(n.id);
    }
    ids.reverse();
    ids
}

mod method_tests {
    use super::*;

    #[test]
    fn test_brute_force_is_exact() {
        let space = create_dense_float_space("l2", &[]).unwrap();
        let records = random_records(200, 8, 1);
        let ctx = SearchContext::new(space.as_ref(), &records);

        let mut method = create_method::<f32, f32>("brute_force").unwrap();
        method.build(ctx, &[], false).unwrap();

        // Every record is its own nearest neighbor
        for record in records.iter().take(20) {
            let ids = knn_ids(method.as_ref(), ctx, record.data(), 1);
            assert_eq!(ids, vec![record.id()]);
        }
    }

    #[test]
    fn test_vamana_recall_against_brute_force() {
        let space = create_dense_float_space("l2", &[]).unwrap();
        let records = random_records(500, 16, 7);
        let ctx = SearchContext::new(space.as_ref(), &records);

        let mut exact = create_method::<f32, f32>("brute_force").unwrap();
        exact.build(ctx, &[], false).unwrap();

        let mut graph = create_method::<f32, f32>("vamana").unwrap();
        let params: Vec<String> = vec!["maxDegree=24".into(), "buildBreadth=64".into()];
        graph.build(ctx, &params, false).unwrap();
        graph.set_query_time_params(&["efSearch=128".to_string()]).unwrap();

        let queries = random_records(50, 16, 99);
        let k = 10;
        let mut found = 0;
        for query in &queries {
            let truth = knn_ids(exact.as_ref(), ctx, query.data(), k);
            let approx = knn_ids(graph.as_ref(), ctx, query.data(), k);
            found += approx.iter().filter(|id| truth.contains(id)).count();
        }
        let recall = found as f64 / (queries.len() * k) as f64;
        assert!(recall >= 0.9, "recall {:.3} below 0.9", recall);
    }

    #[test]
    fn test_vamana_empty_and_single() {
        let space = create_dense_float_space("l2", &[]).unwrap();

        let empty: Vec<Record<f32>> = Vec::new();
        let mut graph = create_method::<f32, f32>("vamana").unwrap();
        graph.build(SearchContext::new(space.as_ref(), &empty), &[], false).unwrap();
        let ids = knn_ids(graph.as_ref(), SearchContext::new(space.as_ref(), &empty), &[0.0, 0.0], 3);
        assert!(ids.is_empty());

        let single = vec![Record::new(42, &[1.0f32, 1.0])];
        let ctx = SearchContext::new(space.as_ref(), &single);
        let mut graph = create_method::<f32, f32>("vamana").unwrap();
        graph.build(ctx, &[], false).unwrap();
        assert_eq!(knn_ids(graph.as_ref(), ctx, &[0.0, 0.0], 3), vec![42]);
    }

    #[test]
    fn test_vamana_reaches_every_duplicate() {
        let space = create_dense_float_space("l2", &[]).unwrap();
        let records: Vec<Record<f32>> = (0..400).map(|i| Record::new(i, &[(i % 4) as f32, 0.0])).collect();
        let ctx = SearchContext::new(space.as_ref(), &records);

        let mut graph = create_method::<f32, f32>("vamana").unwrap();
        graph.build(ctx, &[], false).unwrap();
        graph.set_query_time_params(&["efSearch=10".to_string()]).unwrap();

        for k in [5, 100, 250, 400] {
            let ids = knn_ids(graph.as_ref(), ctx, &[0.0, 0.0], k);
            assert_eq!(ids.len(), k, "k = {}", k);
            let unique: std::collections::HashSet<i32> = ids.iter().copied().collect();
            assert_eq!(unique.len(), k);
        }
        assert_eq!(knn_ids(graph.as_ref(), ctx, &[3.0, 0.0], 1000).len(), 400);
    }

    #[test]
    fn test_vamana_topology_roundtrip() {
        let space = create_dense_float_space("l2", &[]).unwrap();
        let records = random_records(300, 8, 3);
        let ctx = SearchContext::new(space.as_ref(), &records);

        let mut graph = create_method::<f32, f32>("vamana").unwrap();
        graph.build(ctx, &["maxDegree=16".to_string()], false).unwrap();
        let mut saved = Vec::new();
        graph.save(&mut saved).unwrap();

        let mut restored = create_method::<f32, f32>("vamana").unwrap();
        restored.load(&mut saved.as_slice(), ctx).unwrap();

        let queries = random_records(10, 8, 11);
        for query in &queries {
            assert_eq!(
                knn_ids(graph.as_ref(), ctx, query.data(), 5),
                knn_ids(restored.as_ref(), ctx, query.data(), 5)
            );
        }
    }

    #[test]
    fn test_topology_rejects_other_record_count() {
        let space = create_dense_float_space("l2", &[]).unwrap();
        let records = random_records(50, 4, 5);
        let ctx = SearchContext::new(space.as_ref(), &records);

        for name in ["brute_force", "vamana"] {
            let mut method = create_method::<f32, f32>(name).unwrap();
            method.build(ctx, &[], false).unwrap();
            let mut saved = Vec::new();
            method.save(&mut saved).unwrap();

            let fewer = &records[..49];
            let mut restored = create_method::<f32, f32>(name).unwrap();
            let err = restored
                .load(&mut saved.as_slice(), SearchContext::new(space.as_ref(), fewer))
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::DataIoFailed, "{}", name);
        }
    }

    #[test]
    fn test_bad_build_params() {
        let space = create_dense_float_space("l2", &[]).unwrap();
        let records = random_records(10, 4, 2);
        let ctx = SearchContext::new(space.as_ref(), &records);

        let mut graph = create_method::<f32, f32>("vamana").unwrap();
        let err = graph.build(ctx, &["maxDegree=0".to_string()], false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexBuildFailed);

        let mut exact = create_method::<f32, f32>("brute_force").unwrap();
        let err = exact.build(ctx, &["M=16".to_string()], false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexBuildFailed);
    }

    #[test]
    fn test_query_params() {
        let mut graph = create_method::<f32, f32>("vamana").unwrap();
        assert!(graph.set_query_time_params(&["efSearch=0".to_string()]).is_err());
        assert!(graph.set_query_time_params(&["nope=1".to_string()]).is_err());
        graph.set_query_time_params(&["efSearch=300".to_string()]).unwrap();
        graph.reset_query_time_params();

        let mut exact = create_method::<f32, f32>("brute_force").unwrap();
        exact.set_query_time_params(&["efSearch=300".to_string()]).unwrap();
    }

    #[test]
    fn test_range_is_inclusive() {
        let space = create_dense_float_space("l1", &[]).unwrap();
        let records: Vec<Record<f32>> = (0..5).map(|i| Record::new(i, &[i as f32])).collect();
        let ctx = SearchContext::new(space.as_ref(), &records);
        let mut exact = create_method::<f32, f32>("brute_force").unwrap();
        exact.build(ctx, &[], false).unwrap();

        let mut queue = KnnQueue::unbounded();
        exact.search_range(ctx, &QueryRecord::new(&[2.0]), 1.0, &mut queue).unwrap();
        assert_eq!(queue.len(), 3);
    }
}

mod space_tests {
    use super::*;

    #[test]
    fn test_byte_spaces() {
        let l2 = create_byte_space("l2sqr_sift", &[]).unwrap();
        assert_eq!(l2.distance(&[0, 0, 0], &[1, 2, 3]), 14);
        let l1 = create_byte_space("l1_uint8", &[]).unwrap();
        assert_eq!(l1.distance(&[10, 0], &[0, 10]), 20);
    }

    #[test]
    fn test_string_space() {
        let leven = create_string_space("leven", &[]).unwrap();
        assert_eq!(leven.distance(b"kitten", b"sitting"), 3);
        assert_eq!(leven.distance(b"", b"abc"), 3);
        assert_eq!(leven.encoding(), DataEncoding::LengthPrefixedString);
    }

    #[test]
    fn test_sparse_negdot() {
        let space = create_sparse_float_space("negdotprod_sparse", &[]).unwrap();
        let a = [SparseElement::new(1, 2.0), SparseElement::new(5, 1.0)];
        let b = [SparseElement::new(5, 3.0), SparseElement::new(9, 4.0)];
        assert!((space.distance(&a, &b) + 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_family_mismatch() {
        let err = create_dense_float_space("leven", &[]).err().unwrap();
        assert_eq!(err.code(), ErrorCode::SpaceIncompatible);
    }
}

mod dataset_tests {
    use super::*;

    #[test]
    fn test_sparse_records_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.dat");

        let records = vec![
            Record::new(3, &[SparseElement::new(0, 1.0), SparseElement::new(7, 0.5)]),
            Record::new(9, &[SparseElement::new(2, -1.5)]),
        ];
        {
            let mut file = std::fs::File::create(&path).unwrap();
            dataset::write_records(&mut file, DataEncoding::SparseFloatVector, &records).unwrap();
        }

        let mut file = std::fs::File::open(&path).unwrap();
        let loaded: Vec<Record<SparseElement>> =
            dataset::read_records(&mut file, DataEncoding::SparseFloatVector).unwrap();
        assert_eq!(loaded, records);
    }
}
