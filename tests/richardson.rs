mod util;
use util::*;

use gmg_boxes::prelude::*;

#[test]
fn periodic_poisson_is_fourth_order() {
    let p = BoxPartition::uniform(4, 8, 1).unwrap();
    let mut mg = hierarchy(p, BoundaryKind::Periodic, NoComm, MgConfig::default(), |_, _, _| 1.0);
    fill_sine_averages(mg.level_mut(0).unwrap(), VectorId::F);
    let mut t = Telemetry::new();
    let r = mg.richardson(0, VectorId::F, 0.0, 1.0, 0.0, 1e-10, &mut t).unwrap();
    assert_eq!(r.h, 1.0 / 32.0);
    assert!(r.fine_error < r.coarse_error);
    assert!(r.order > 3.0, "{r:?}");
    assert_eq!(t.solves, 3);
}
