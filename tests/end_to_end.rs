mod util;
use util::*;

use gmg_boxes::algs::reduction;
use gmg_boxes::operators;
use gmg_boxes::prelude::*;

#[test]
fn three_level_dirichlet_poisson_converges() {
    let config = MgConfig {
        max_levels: 3,
        ..Default::default()
    };
    let p = BoxPartition::uniform(1, 8, 1).unwrap();
    let mut mg = hierarchy(p, BoundaryKind::Dirichlet, NoComm, config, |_, _, _| 1.0);
    assert_eq!(mg.num_levels(), 3);
    mg.level_mut(0)
        .unwrap()
        .fill_cells(VectorId::F, |x, y, z| x * (1.0 - x) + y * z);

    let mut t = Telemetry::new();
    let o = mg.solve(0, VectorId::U, VectorId::F, 0.0, 1.0, 0.0, 1e-10, &mut t).unwrap();
    assert!(o.converged, "{o:?}");
    assert!(o.cycles <= 20);
    assert!(o.final_residual < 1e-10 * o.initial_residual);
    t.log_summary();
}

#[test]
fn variable_coefficient_helmholtz_converges_with_every_smoother() {
    for smoother in [SmootherKind::Gsrb, SmootherKind::Jacobi, SmootherKind::Chebyshev] {
        let config = MgConfig {
            smoother,
            max_vcycles: 40,
            ..Default::default()
        };
        let p = BoxPartition::uniform(2, 8, 1).unwrap();
        let mut mg = hierarchy(p, BoundaryKind::Dirichlet, NoComm, config, smooth_beta);
        mg.level_mut(0).unwrap().fill_cells(VectorId::F, sines);
        let mut t = Telemetry::new();
        let o = mg.solve(0, VectorId::U, VectorId::F, 1.0, 1.0, 0.0, 1e-6, &mut t).unwrap();
        assert!(o.converged, "{smoother:?}: {o:?}");
    }
}

#[test]
fn every_bottom_solver_gets_a_converged_solve() {
    for bottom in [
        BottomSolverKind::Cg,
        BottomSolverKind::BiCgStab,
        BottomSolverKind::CaCg,
        BottomSolverKind::CaBiCgStab,
        BottomSolverKind::Relaxation,
    ] {
        let config = MgConfig {
            bottom_solver: bottom,
            operator: OperatorKind::ConstantCoefficient,
            max_vcycles: 40,
            ..Default::default()
        };
        let p = BoxPartition::uniform(2, 8, 1).unwrap();
        let mut mg = hierarchy(p, BoundaryKind::Periodic, NoComm, config, |_, _, _| 1.0);
        mg.level_mut(0).unwrap().fill_cells(VectorId::F, sines);
        let mut t = Telemetry::new();
        let o = mg.solve(0, VectorId::U, VectorId::F, 0.0, 1.0, 0.0, 1e-8, &mut t).unwrap();
        assert!(o.converged, "{bottom:?}: {o:?}");
        let last = mg.num_levels() - 1;
        assert_eq!(t.level(last).bottom_solves, o.cycles);
    }
}

#[test]
fn zero_rhs_leaves_zero_solution() {
    let p = BoxPartition::uniform(2, 4, 1).unwrap();
    let mut mg = hierarchy(p, BoundaryKind::Dirichlet, NoComm, MgConfig::default(), smooth_beta);
    let mut t = Telemetry::new();
    let o = mg.solve(0, VectorId::U, VectorId::F, 1.0, 1.0, 1e-12, 1e-12, &mut t).unwrap();
    assert!(o.converged);
    assert_eq!(o.cycles, 0);
    let fine = mg.level(0).unwrap();
    assert!(owned_values(fine, VectorId::U).iter().all(|&(_, v)| v == 0.0));
}

#[test]
fn periodic_poisson_mean_is_removed() {
    let p = BoxPartition::uniform(2, 8, 1).unwrap();
    let mut mg = hierarchy(p, BoundaryKind::Periodic, NoComm, MgConfig::default(), smooth_beta);
    // nonzero mean on purpose
    mg.level_mut(0)
        .unwrap()
        .fill_cells(VectorId::F, |x, y, z| sines(x, y, z) + 0.3);
    let mut t = Telemetry::new();
    let o = mg.solve(0, VectorId::U, VectorId::F, 0.0, 1.0, 0.0, 1e-9, &mut t).unwrap();
    assert!(o.converged, "{o:?}");
    let fine = mg.level(0).unwrap();
    let rhs_mean = reduction::mean(fine, &NoComm, VectorId::F_MINUS_AV).unwrap();
    let u_mean = reduction::mean(fine, &NoComm, VectorId::U).unwrap();
    assert!(rhs_mean.abs() < 1e-12, "{rhs_mean}");
    assert!(u_mean.abs() < 1e-12, "{u_mean}");
}

#[test]
fn fmg_solve_reaches_the_same_answer() {
    let p = BoxPartition::uniform(2, 8, 1).unwrap();
    let mut mg = hierarchy(p, BoundaryKind::Dirichlet, NoComm, MgConfig::default(), smooth_beta);
    mg.level_mut(0).unwrap().fill_cells(VectorId::F, sines);
    let mut t = Telemetry::new();
    mg.solve(0, VectorId::U, VectorId::F, 0.0, 1.0, 0.0, 1e-12, &mut t).unwrap();
    let v = owned_values(mg.level(0).unwrap(), VectorId::U);
    let o = mg.fmg_solve(0, VectorId::U, VectorId::F, 0.0, 1.0, 0.0, 1e-12, &mut t).unwrap();
    assert!(o.converged);
    let f = owned_values(mg.level(0).unwrap(), VectorId::U);
    let scale = v.iter().map(|&(_, x)| x.abs()).fold(0.0, f64::max);
    for ((c, a), (_, b)) in v.iter().zip(&f) {
        assert!((a - b).abs() <= 1e-7 * scale, "{c:?}: {a} vs {b}");
    }
    assert_eq!(t.solves, 2);
}

#[test]
fn changing_coefficients_triggers_a_rebuild() {
    let p = BoxPartition::uniform(2, 4, 1).unwrap();
    let mut mg = hierarchy(p, BoundaryKind::Dirichlet, NoComm, MgConfig::default(), smooth_beta);
    mg.level_mut(0).unwrap().fill_cells(VectorId::F, sines);
    let mut t = Telemetry::new();
    mg.solve(0, VectorId::U, VectorId::F, 0.0, 1.0, 0.0, 1e-8, &mut t).unwrap();
    assert_eq!(mg.level(1).unwrap().operator_state().a, 0.0);
    mg.solve(0, VectorId::U, VectorId::F, 2.0, 0.5, 0.0, 1e-8, &mut t).unwrap();
    for level in mg.levels() {
        let op = level.operator_state();
        assert!(op.rebuilt);
        assert_eq!((op.a, op.b), (2.0, 0.5));
    }
}

#[test]
fn cycle_limit_returns_the_best_iterate() {
    let config = MgConfig {
        max_vcycles: 1,
        ..Default::default()
    };
    let kind = config.operator;
    let p = BoxPartition::uniform(2, 8, 1).unwrap();
    let mut mg = hierarchy(p, BoundaryKind::Dirichlet, NoComm, config, smooth_beta);
    mg.level_mut(0).unwrap().fill_cells(VectorId::F, sines);
    let mut t = Telemetry::new();
    let o = mg.solve(0, VectorId::U, VectorId::F, 1.0, 1.0, 0.0, 1e-14, &mut t).unwrap();
    assert!(!o.converged, "{o:?}");
    assert_eq!(o.cycles, 1);
    assert!(o.final_residual < o.initial_residual, "{o:?}");
    assert_eq!(t.last_outcome, Some(o));

    // the reported residual belongs to the iterate left in `u`
    let fine = mg.level_mut(0).unwrap();
    operators::residual(fine, &NoComm, kind, VectorId::TEMP, VectorId::U, VectorId::F).unwrap();
    let r = reduction::norm_inf(fine, &NoComm, VectorId::TEMP).unwrap();
    assert!((r - o.final_residual).abs() <= 1e-12 * o.initial_residual, "{r} vs {o:?}");
    assert!(owned_values(fine, VectorId::U).iter().any(|&(_, v)| v != 0.0));
}
