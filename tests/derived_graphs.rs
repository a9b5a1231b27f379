//! Inversion, composition, embedding, local restriction, and neighbor
//! groups across simulated ranks.

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

#[test]
fn inverse_swaps_data_direction() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        // Rank 0 owns two roots; rank 1 holds both leaves.
        let mut sf = StarForest::new(comm);
        let (nroots, nleaves, remote) = if r == 0 {
            (2, 0, vec![])
        } else {
            (0, 2, vec![Remote::new(0, 0), Remote::new(0, 1)])
        };
        sf.set_graph(nroots, nleaves, None, remote).unwrap();
        let mut inv = sf.create_inverse().unwrap();
        let (inroots, inleaves, _, iremote) = inv.get_graph().unwrap();
        if r == 0 {
            assert_eq!((inroots, inleaves), (0, 2));
            assert_eq!(iremote, &[Remote::new(1, 0), Remote::new(1, 1)]);
        } else {
            assert_eq!((inroots, inleaves), (2, 0));
        }

        // Data now flows from rank 1 to rank 0.
        let roots: Vec<u32> = if r == 1 { vec![5, 6] } else { vec![] };
        let mut leaves = vec![0u32; if r == 0 { 2 } else { 0 }];
        inv.bcast(&roots, &mut leaves).unwrap();
        if r == 0 {
            assert_eq!(leaves, vec![5, 6]);
        }
    });
}

#[test]
fn double_inverse_restores_the_graph() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        let mut sf = StarForest::new(comm);
        let (nroots, remote) = if r == 0 {
            (2, vec![Remote::new(1, 0)])
        } else {
            (1, vec![Remote::new(0, 1)])
        };
        let n = remote.len();
        sf.set_graph(nroots, n, None, remote.clone()).unwrap();
        let mut inv = sf.create_inverse().unwrap();
        let mut back = inv.create_inverse().unwrap();
        let (bnroots, bnleaves, _, bremote) = back.get_graph().unwrap();
        assert_eq!((bnroots, bnleaves), (nroots, n));
        assert_eq!(bremote, &remote[..]);
    });
}

#[test]
fn compose_crosses_two_forests() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        // A and B both swap ranks; their composition is the identity.
        let mut a = StarForest::new(comm.clone());
        a.set_graph(1, 1, None, vec![Remote::new(1 - r, 0)]).unwrap();
        let mut b = StarForest::new(comm);
        b.set_graph(1, 1, None, vec![Remote::new(1 - r, 0)]).unwrap();
        let mut ab = a.compose(&mut b).unwrap();
        let (_, _, _, remote) = ab.get_graph().unwrap();
        assert_eq!(remote, &[Remote::new(r, 0)]);

        // And the composed forest routes data accordingly.
        let mut leaves = vec![0u16];
        ab.bcast(&[40 + r as u16], &mut leaves).unwrap();
        assert_eq!(leaves, vec![40 + r as u16]);
    });
}

#[test]
fn compose_inverse_recovers_the_first_factor() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        let mut a = StarForest::new(comm.clone());
        a.set_graph(1, 1, None, vec![Remote::new(1 - r, 0)]).unwrap();
        // B is the identity on the shared leaf space.
        let mut b = StarForest::new(comm);
        b.set_graph(1, 1, None, vec![Remote::new(r, 0)]).unwrap();
        let mut ab = a.compose_inverse(&mut b).unwrap();
        let (_, _, _, remote) = ab.get_graph().unwrap();
        assert_eq!(remote, &[Remote::new(1 - r, 0)]);
    });
}

#[test]
fn embedded_forest_is_a_subgraph() {
    run_ranks(3, |comm| {
        let r = comm.rank();
        // Rank 0 owns ten roots; rank 1 reads {1, 2, 4} and rank 2 reads
        // {4, 6, 9}.
        let mut sf = StarForest::new(comm);
        let (nleaves, remote) = match r {
            1 => (3, vec![Remote::new(0, 1), Remote::new(0, 2), Remote::new(0, 4)]),
            2 => (3, vec![Remote::new(0, 4), Remote::new(0, 6), Remote::new(0, 9)]),
            _ => (0, vec![]),
        };
        sf.set_graph(if r == 0 { 10 } else { 0 }, nleaves, None, remote)
            .unwrap();
        // Keep roots {2, 4, 6}; selection is per-owner, with duplicates
        // tolerated. The other ranks select none.
        let selected: Vec<usize> = if r == 0 { vec![6, 2, 4, 2] } else { vec![] };
        let mut esf = sf.create_embedded(&selected).unwrap();
        let (enroots, enleaves, elocal, eremote) = esf.get_graph().unwrap();
        assert_eq!(enroots, if r == 0 { 10 } else { 0 });
        match r {
            1 => {
                assert_eq!(enleaves, 2);
                assert_eq!(elocal, Some(&[1usize, 2][..]));
                assert_eq!(eremote, &[Remote::new(0, 2), Remote::new(0, 4)]);
            }
            2 => {
                assert_eq!(enleaves, 2);
                // Surviving positions [0, 1] are the identity and normalize
                // to a dense leaf space.
                assert_eq!(elocal, None);
                assert_eq!(eremote, &[Remote::new(0, 4), Remote::new(0, 6)]);
            }
            _ => assert_eq!(enleaves, 0),
        }

        // The surviving edges still carry data.
        let roots: Vec<u32> = if r == 0 { (0..10).map(|i| 100 + i).collect() } else { vec![] };
        let mut leaves = vec![u32::MAX; nleaves];
        esf.bcast(&roots, &mut leaves).unwrap();
        match r {
            1 => assert_eq!(leaves, vec![u32::MAX, 102, 104]),
            2 => assert_eq!(leaves, vec![104, 106, u32::MAX]),
            _ => {}
        }
    });
}

#[test]
fn embedded_leaf_restriction_is_local() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        let mut sf = StarForest::new(comm);
        sf.set_graph(1, 2, None, vec![Remote::new(1 - r, 0), Remote::new(r, 0)])
            .unwrap();
        let mut esf = sf.create_embedded_leaf(&[1]).unwrap();
        let (_, nleaves, local, remote) = esf.get_graph().unwrap();
        assert_eq!(nleaves, 1);
        assert_eq!(local, Some(&[1usize][..]));
        assert_eq!(remote, &[Remote::new(r, 0)]);
    });
}

#[test]
fn local_forest_keeps_only_self_edges() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        let mut sf = StarForest::new(comm);
        // Leaf 0 crosses the communicator, leaf 1 stays home.
        sf.set_graph(2, 2, None, vec![Remote::new(1 - r, 0), Remote::new(r, 1)])
            .unwrap();
        let mut lsf = sf.create_local().unwrap();
        assert_eq!(lsf.size(), 1);
        let (nroots, nleaves, local, remote) = lsf.get_graph().unwrap();
        assert_eq!((nroots, nleaves), (2, 1));
        assert_eq!(local, Some(&[1usize][..]));
        assert_eq!(remote, &[Remote::new(0, 1)]);

        // The restriction works standalone on its own communicator.
        let mut leaves = vec![0u8; 2];
        lsf.bcast(&[3u8, 9u8], &mut leaves).unwrap();
        assert_eq!(leaves, vec![0, 9]);
    });
}

#[test]
fn groups_list_both_directions() {
    run_ranks(3, |comm| {
        let r = comm.rank();
        let n = comm.size();
        // Ring: each rank reads the next rank's root.
        let mut sf = StarForest::new(comm);
        sf.set_graph(1, 1, None, vec![Remote::new((r + 1) % n, 0)])
            .unwrap();
        let groups = sf.get_groups().unwrap().clone();
        assert_eq!(groups.outgoing, vec![(r + 1) % n]);
        assert_eq!(groups.incoming, vec![(r + 2) % n]);
    });
}

#[test]
fn groups_are_cached() {
    run_ranks(2, |comm| {
        let r = comm.rank();
        let mut sf = StarForest::new(comm);
        sf.set_graph(1, 1, None, vec![Remote::new(1 - r, 0)]).unwrap();
        let first = sf.get_groups().unwrap().clone();
        // Second call must not communicate; a lone rank asking again would
        // deadlock otherwise.
        let second = sf.get_groups().unwrap().clone();
        assert_eq!(first, second);
    });
}
