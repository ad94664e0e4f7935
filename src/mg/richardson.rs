//! Observed order of accuracy from solutions on three consecutive levels.

use serde::Serialize;

use crate::algs::communicator::Communicator;
use crate::algs::reduction;
use crate::algs::restriction::RestrictionMode;
use crate::data::vector_id::VectorId;
use crate::mg::hierarchy::Hierarchy;
use crate::mg::telemetry::Telemetry;
use crate::mg_error::MgError;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RichardsonReport {
    /// Mesh spacing of the finest of the three levels.
    pub h: f64,
    /// `||R u_h - u_2h||_inf`
    pub fine_error: f64,
    /// `||R u_2h - u_4h||_inf`
    pub coarse_error: f64,
    /// `log2(coarse_error / fine_error)`
    pub order: f64,
}

impl<C: Communicator> Hierarchy<C> {
    /// Solve `A u = f` on levels `base`, `base + 1` and `base + 2`, with the
    /// right-hand side of each coarser level restricted from the one above,
    /// then compare the solutions in [`Hierarchy::richardson_error`].
    ///
    /// `f` holds the right-hand side on `base`; it is overwritten on the two
    /// coarser levels, as is `U` on all three.
    #[allow(clippy::too_many_arguments)]
    pub fn richardson(
        &mut self,
        base: usize,
        f: VectorId,
        a: f64,
        b: f64,
        dtol: f64,
        rtol: f64,
        telemetry: &mut Telemetry,
    ) -> Result<RichardsonReport, MgError> {
        self.check_richardson_levels(base)?;
        for l in base..base + 3 {
            if l > base {
                self.restrict(l - 1, f, l, f, RestrictionMode::Cell)?;
            }
            reduction::zero(self.level_mut(l)?, VectorId::U);
            let outcome = self.solve(l, VectorId::U, f, a, b, dtol, rtol, telemetry)?;
            if !outcome.converged {
                log::warn!("richardson: solve on level {l} did not converge");
            }
        }
        self.richardson_error(base, VectorId::U)
    }

    /// Differences between `u` on `base` and the two levels below it,
    /// each finer solution cell-restricted onto the next level. Uses `TEMP`
    /// on the coarser levels.
    pub fn richardson_error(&mut self, base: usize, u: VectorId) -> Result<RichardsonReport, MgError> {
        self.check_richardson_levels(base)?;
        let mut errors = [0.0; 2];
        for (n, e) in errors.iter_mut().enumerate() {
            let (fine, coarse) = (base + n, base + n + 1);
            self.restrict(fine, u, coarse, VectorId::TEMP, RestrictionMode::Cell)?;
            let l = &mut self.levels[coarse];
            reduction::add(l, VectorId::TEMP, 1.0, u, -1.0, VectorId::TEMP);
            *e = reduction::norm_inf(l, &self.comm, VectorId::TEMP)?;
        }
        let h = self.levels[base].h();
        let order = (errors[1] / errors[0]).log2();
        log::info!("richardson: h = {h:.15e} ||error|| = {:.15e}", errors[0]);
        log::info!("richardson: order = {order:.3}");
        Ok(RichardsonReport {
            h,
            fine_error: errors[0],
            coarse_error: errors[1],
            order,
        })
    }

    fn check_richardson_levels(&self, base: usize) -> Result<(), MgError> {
        let levels = self.levels.len();
        if base + 2 >= levels {
            return Err(MgError::UnknownLevel {
                level: base + 2,
                levels,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::MgConfig;
    use crate::topology::{BoundaryKind, BoxPartition};

    #[test]
    fn needs_two_coarser_levels() {
        let p = BoxPartition::uniform(1, 4, 1).unwrap();
        let mut h = Hierarchy::build(p, 2, BoundaryKind::Periodic, NoComm, MgConfig::default()).unwrap();
        assert_eq!(h.num_levels(), 2);
        assert!(matches!(
            h.richardson_error(0, VectorId::U),
            Err(MgError::UnknownLevel { level: 2, levels: 2 })
        ));
    }

    #[test]
    fn identical_fields_give_zero_differences() {
        let p = BoxPartition::uniform(2, 4, 1).unwrap();
        let mut h = Hierarchy::build(p, 2, BoundaryKind::Dirichlet, NoComm, MgConfig::default()).unwrap();
        for l in 0..3 {
            h.level_mut(l).unwrap().fill_cells(VectorId::U, |_, _, _| 2.5);
        }
        let r = h.richardson_error(0, VectorId::U).unwrap();
        assert_eq!(r.fine_error, 0.0);
        assert_eq!(r.coarse_error, 0.0);
        assert_eq!(r.h, 1.0 / 8.0);
    }
}
