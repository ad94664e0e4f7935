mod util;
use util::*;

use gmg_boxes::algs::reduction;
use gmg_boxes::prelude::*;

fn solve_on<C: Communicator>(comm: C, ranks: usize) -> (SolveOutcome, Vec<([usize; 3], f64)>) {
    let p = BoxPartition::uniform(2, 8, ranks).unwrap();
    let mut mg = hierarchy(p, BoundaryKind::Dirichlet, comm, MgConfig::default(), smooth_beta);
    mg.level_mut(0).unwrap().fill_cells(VectorId::F, sines);
    let mut t = Telemetry::new();
    let o = mg.solve(0, VectorId::U, VectorId::F, 1.0, 1.0, 0.0, 1e-10, &mut t).unwrap();
    (o, owned_values(mg.level(0).unwrap(), VectorId::U))
}

#[test]
fn ranks_as_threads_match_a_single_rank() {
    let (want, reference) = solve_on(NoComm, 1);
    assert!(want.converged);
    for ranks in [2, 4, 8] {
        let results = on_ranks(ranks, move |comm| solve_on(comm, ranks));
        let mut cells = 0;
        for (o, values) in &results {
            assert_eq!(o.cycles, want.cycles, "{ranks} ranks");
            assert!((o.final_residual - want.final_residual).abs() <= 1e-6 * want.final_residual);
            for (c, v) in values {
                let idx = reference.iter().position(|(r, _)| r == c).expect("cell");
                assert!((v - reference[idx].1).abs() < 1e-12, "{ranks} ranks at {c:?}");
            }
            cells += values.len();
        }
        assert_eq!(cells, reference.len());
    }
}

#[test]
fn reductions_agree_on_every_rank() {
    let sums = on_ranks(4, |comm| {
        let p = BoxPartition::uniform(2, 4, 4).unwrap();
        let mut mg = Hierarchy::build(p, 2, BoundaryKind::Periodic, comm, MgConfig::default()).unwrap();
        let rank = mg.comm().rank();
        let fine = mg.level_mut(0).unwrap();
        reduction::set(fine, VectorId::F, (rank + 1) as f64);
        let comm = mg.comm();
        let fine = mg.level(0).unwrap();
        (
            reduction::sum(fine, comm, VectorId::F).unwrap(),
            reduction::norm_inf(fine, comm, VectorId::F).unwrap(),
        )
    });
    // two boxes of 64 cells per rank
    let want = 128.0 * (1.0 + 2.0 + 3.0 + 4.0);
    for (sum, max) in sums {
        assert_eq!(sum, want);
        assert_eq!(max, 4.0);
    }
}
