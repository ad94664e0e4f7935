mod util;
use util::*;

use gmg_boxes::algs::interpolation::interpolate;
use gmg_boxes::algs::reduction;
use gmg_boxes::prelude::*;

fn two_levels(boundary: BoundaryKind) -> Hierarchy<NoComm> {
    let p = BoxPartition::uniform(2, 8, 1).unwrap();
    hierarchy(p, boundary, NoComm, MgConfig::default(), |_, _, _| 1.0)
}

#[test]
fn restricting_constants_keeps_them() {
    let mut mg = two_levels(BoundaryKind::Dirichlet);
    let fine = mg.level_mut(0).unwrap();
    reduction::set(fine, VectorId::F, 0.75);
    for axis in 0..3 {
        fine.fill_faces(axis, |_, _, _| 1.25);
    }
    mg.restrict(0, VectorId::F, 1, VectorId::F, RestrictionMode::Cell).unwrap();
    for axis in 0..3 {
        let beta = VectorId::beta(axis);
        mg.restrict(0, beta, 1, beta, RestrictionMode::face(axis)).unwrap();
    }
    let coarse = mg.level(1).unwrap();
    assert!(owned_values(coarse, VectorId::F).iter().all(|&(_, v)| v == 0.75));
    for axis in 0..3 {
        let b = VectorId::beta(axis);
        assert!(owned_values(coarse, b).iter().all(|&(_, v)| v == 1.25), "axis {axis}");
    }
}

#[test]
fn cell_restriction_averages_children() {
    let mut mg = two_levels(BoundaryKind::Dirichlet);
    mg.level_mut(0)
        .unwrap()
        .fill_cells_indexed(VectorId::F, |g| (g[0] + 16 * g[1] + 256 * g[2]) as f64);
    mg.restrict(0, VectorId::F, 1, VectorId::F, RestrictionMode::Cell).unwrap();
    let coarse = mg.level(1).unwrap();
    for (c, v) in owned_values(coarse, VectorId::F) {
        let mut sum = 0.0;
        for (di, dj, dk) in itertools::iproduct!(0..2, 0..2, 0..2) {
            let g = [2 * c[0] + di, 2 * c[1] + dj, 2 * c[2] + dk];
            sum += (g[0] + 16 * g[1] + 256 * g[2]) as f64;
        }
        assert!((v - sum / 8.0).abs() < 1e-12, "{c:?}");
    }
}

#[test]
fn interpolating_a_periodic_constant_is_exact() {
    for order in [InterpolationOrder::Linear, InterpolationOrder::Quartic] {
        let mut mg = two_levels(BoundaryKind::Periodic);
        let levels = mg.num_levels();
        assert!(levels >= 2);
        let (fine, rest) = split(&mut mg);
        reduction::set(rest, VectorId::U, 2.0);
        reduction::set(fine, VectorId::U, 5.0);
        interpolate(rest, VectorId::U, fine, VectorId::U, 0.0, order, &NoComm).unwrap();
        for (c, v) in owned_values(fine, VectorId::U) {
            assert!((v - 2.0).abs() < 1e-13, "{order:?} {c:?}: {v}");
        }
        // additive with prescale 1
        interpolate(rest, VectorId::U, fine, VectorId::U, 1.0, order, &NoComm).unwrap();
        assert!(owned_values(fine, VectorId::U).iter().all(|&(_, v)| (v - 4.0).abs() < 1e-13));
    }
}

#[test]
fn quartic_interpolation_reproduces_smooth_fields_better() {
    let mut errors = Vec::new();
    for order in [InterpolationOrder::Linear, InterpolationOrder::Quartic] {
        let mut mg = two_levels(BoundaryKind::Periodic);
        let (fine, coarse) = split(&mut mg);
        fill_sine_averages(coarse, VectorId::U);
        interpolate(coarse, VectorId::U, fine, VectorId::U, 0.0, order, &NoComm).unwrap();
        fill_sine_averages(fine, VectorId::TEMP);
        reduction::add(fine, VectorId::TEMP, 1.0, VectorId::TEMP, -1.0, VectorId::U);
        errors.push(reduction::norm_inf(fine, &NoComm, VectorId::TEMP).unwrap());
    }
    assert!(errors[1] < errors[0], "{errors:?}");
}

/// The two finest levels, borrowed together.
fn split(mg: &mut Hierarchy<NoComm>) -> (&mut Level, &mut Level) {
    let (head, tail) = mg.levels_mut().split_at_mut(1);
    (&mut head[0], &mut tail[0])
}
