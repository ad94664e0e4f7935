#![allow(dead_code)]
use std::f64::consts::PI;

use gmg_boxes::prelude::*;

/// `sin(2 pi x) sin(2 pi y) sin(2 pi z)`, zero mean on the unit cube.
pub fn sines(x: f64, y: f64, z: f64) -> f64 {
    (2.0 * PI * x).sin() * (2.0 * PI * y).sin() * (2.0 * PI * z).sin()
}

/// Exact cell averages of [`sines`] on `level`.
pub fn fill_sine_averages(level: &mut Level, id: VectorId) {
    let h = level.h();
    let avg = move |g: usize| {
        let a = g as f64 * h;
        ((2.0 * PI * a).cos() - (2.0 * PI * (a + h)).cos()) / (2.0 * PI * h)
    };
    level.fill_cells_indexed(id, |g| avg(g[0]) * avg(g[1]) * avg(g[2]));
}

/// Smooth face coefficient bounded in `[1, 1.5]`.
pub fn smooth_beta(x: f64, y: f64, z: f64) -> f64 {
    1.0 + 0.25 * (1.0 + (PI * x).sin() * (PI * y).cos() * (2.0 * PI * z).sin())
}

/// Hash of a coordinate triple into `[0, 1)`, stable for a given `seed`.
pub fn noise(seed: u64, x: f64, y: f64, z: f64) -> f64 {
    let mut h = seed ^ 0x9E37_79B9_7F4A_7C15;
    for v in [x, y, z] {
        h = (h ^ v.to_bits()).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        h ^= h >> 31;
    }
    (h >> 11) as f64 / (1u64 << 53) as f64
}

/// Hierarchy for `partition` with unit alpha and the given face coefficient.
pub fn hierarchy<C: Communicator>(
    partition: BoxPartition,
    boundary: BoundaryKind,
    comm: C,
    config: MgConfig,
    beta: impl Fn(f64, f64, f64) -> f64 + Sync,
) -> Hierarchy<C> {
    let mut h = Hierarchy::build(partition, 2, boundary, comm, config).expect("build");
    let fine = h.level_mut(0).expect("finest level");
    fine.fill_cells(VectorId::ALPHA, |_, _, _| 1.0);
    for axis in 0..3 {
        fine.fill_faces(axis, &beta);
    }
    h
}

/// Every interior value of `id` on `level` this rank owns, keyed by global cell.
pub fn owned_values(level: &Level, id: VectorId) -> Vec<([usize; 3], f64)> {
    let n = level.global_dim();
    let mut out = Vec::new();
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                if let Some(v) = level.cell_value(id, [i, j, k]) {
                    out.push(([i, j, k], v));
                }
            }
        }
    }
    out
}

/// Run `f` once per rank on its own thread and collect the results in rank order.
pub fn on_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(LocalComm) -> T + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = LocalComm::world(size)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles.into_iter().map(|h| h.join().expect("rank panicked")).collect()
}
