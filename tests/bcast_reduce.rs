//! Broadcast and reduce across simulated ranks.

use star_forest::prelude::*;

fn run_ranks<F>(size: usize, f: F)
where
    F: Fn(ThreadComm) + Send + Sync,
{
    let comms = ThreadComm::split(size);
    std::thread::scope(|s| {
        for comm in comms {
            s.spawn(|| f(comm));
        }
    });
}

/// Each rank owns two roots and reads one root from each neighbor plus one
/// of its own.
fn ring(comm: ThreadComm) -> StarForest<ThreadComm> {
    let r = comm.rank();
    let n = comm.size();
    let mut sf = StarForest::new(comm);
    sf.set_graph(
        2,
        3,
        None,
        vec![
            Remote::new((r + 1) % n, 0),
            Remote::new((r + 2) % n, 1),
            Remote::new(r, 0),
        ],
    )
    .unwrap();
    sf
}

#[test]
fn bcast_pulls_neighbor_roots() {
    run_ranks(3, |comm| {
        let r = comm.rank() as u64;
        let mut sf = ring(comm);
        let roots = vec![10 * r, 10 * r + 1];
        let mut leaves = vec![0u64; 3];
        sf.bcast(&roots, &mut leaves).unwrap();
        assert_eq!(
            leaves,
            vec![10 * ((r + 1) % 3), 10 * ((r + 2) % 3) + 1, 10 * r]
        );
    });
}

#[test]
fn reduce_accumulates_remote_contributions() {
    run_ranks(3, |comm| {
        let mut sf = ring(comm);
        let mut roots = vec![0u32; 2];
        sf.reduce(&[1u32, 1, 1], &mut roots, Add).unwrap();
        // Root 0 is read by the previous rank's leaf 0 and our own leaf 2;
        // root 1 by one remote leaf.
        assert_eq!(roots, vec![2, 1]);
    });
}

#[test]
fn bcast_then_reduce_roundtrips_a_permutation() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        let mut sf = StarForest::new(comm);
        // One root and one leaf per rank, crossing the communicator.
        sf.set_graph(1, 1, None, vec![Remote::new(1 - r, 0)]).unwrap();
        let roots = vec![100 + r as u64];
        let mut leaves = vec![0u64];
        sf.bcast(&roots, &mut leaves).unwrap();
        assert_eq!(leaves, vec![100 + (1 - r) as u64]);
        let mut back = vec![0u64];
        sf.reduce(&leaves, &mut back, Replace).unwrap();
        assert_eq!(back, roots);
    });
}

#[test]
fn split_phases_allow_overlap() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        let mut sf = StarForest::new(comm);
        sf.set_graph(1, 1, None, vec![Remote::new(1 - r, 0)]).unwrap();
        let roots = vec![r as u32];
        let handle = sf.bcast_and_op_begin(&roots).unwrap();
        // Unrelated local work between the phases.
        let busy: u32 = (0..100).sum();
        assert_eq!(busy, 4950);
        let mut leaves = vec![0u32];
        sf.bcast_and_op_end(handle, &mut leaves, Replace).unwrap();
        assert_eq!(leaves, vec![1 - r as u32]);
    });
}

#[test]
fn sparse_leaf_buffers_only_touch_edges() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        let mut sf = StarForest::new(comm);
        // A single leaf parked at buffer position 3.
        sf.set_graph(1, 1, Some(vec![3]), vec![Remote::new(1 - r, 0)])
            .unwrap();
        let mut leaves = vec![7u8; 5];
        sf.bcast(&[r as u8], &mut leaves).unwrap();
        assert_eq!(leaves, vec![7, 7, 7, (1 - r) as u8, 7]);
        assert_eq!(sf.leaf_range().unwrap(), 3..4);
    });
}

#[test]
fn min_and_max_fold_across_ranks() {
    run_ranks(3, |comm| {
        let r = comm.rank();
        let mut sf = StarForest::new(comm);
        // Every rank's leaf points at rank 0's only root.
        sf.set_graph(
            usize::from(r == 0),
            1,
            None,
            vec![Remote::new(0, 0)],
        )
        .unwrap();
        let leaf = vec![(10 + r) as i64];
        let mut lo = vec![i64::MAX; usize::from(r == 0)];
        sf.reduce(&leaf, &mut lo, Min).unwrap();
        let mut hi = vec![i64::MIN; usize::from(r == 0)];
        sf.reduce(&leaf, &mut hi, Max).unwrap();
        if r == 0 {
            assert_eq!(lo, vec![10]);
            assert_eq!(hi, vec![12]);
        }
    });
}
