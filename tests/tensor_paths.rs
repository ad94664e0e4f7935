use gmg_boxes::operators::tensor::{KernelTable, TensorBasis, TensorMode, contract_scalar};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// A different random matrix along each axis.
fn random_basis(rng: &mut SmallRng, dof: usize, p: usize, q: usize) -> TensorBasis {
    let m = [0, 1, 2].map(|_| (0..p * q).map(|_| rng.gen_range(-1.0..1.0)).collect());
    TensorBasis::per_axis(p, q, dof, m)
}

#[test]
fn batched_kernels_match_the_scalar_path() {
    let table = KernelTable::new();
    assert!(!table.is_empty());
    let mut rng = SmallRng::seed_from_u64(7);
    for (ne, dof, p, q) in table.shapes() {
        let basis = random_basis(&mut rng, dof, p, q);
        let kernel = table.select(basis.clone(), ne * 3, true);
        assert!(kernel.is_vectorized(), "{:?}", (ne, dof, p, q));
        assert_eq!(kernel.batch(), ne);
        for mode in [TensorMode::Eval, TensorMode::Transpose] {
            let (len_in, len_out) = basis.sizes(mode);
            let x: Vec<f64> = (0..len_in * ne).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let init: Vec<f64> = (0..len_out * ne).map(|_| rng.gen_range(-1.0..1.0)).collect();

            let mut want = init.clone();
            contract_scalar(ne, &basis, mode, &x, &mut want, &mut kernel.scratch());
            let mut got = init.clone();
            kernel.apply(mode, &x, &mut got, &mut kernel.scratch());

            for (n, (a, b)) in want.iter().zip(&got).enumerate() {
                let tol = 1e-12 * a.abs().max(1.0);
                assert!((a - b).abs() <= tol, "{:?} {mode:?} entry {n}: {a} vs {b}", (ne, dof, p, q));
            }
        }
    }
}

#[test]
fn unregistered_shapes_fall_back_to_scalar() {
    let table = KernelTable::new();
    let mut rng = SmallRng::seed_from_u64(11);
    let basis = random_basis(&mut rng, 2, 4, 4);
    let kernel = table.select(basis, 16, true);
    assert!(!kernel.is_vectorized());
    let kernel = table.select(TensorBasis::linear_prolongation(), 16, false);
    assert!(!kernel.is_vectorized());
}
