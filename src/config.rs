//! Build-time choices for a multigrid hierarchy.

use serde::{Deserialize, Serialize};

use crate::krylov::BottomSolverKind;
use crate::mg_error::MgError;
use crate::operators::OperatorKind;
use crate::smoothers::SmootherKind;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgConfig {
    pub operator: OperatorKind,
    pub smoother: SmootherKind,
    /// Sweeps per smoothing call; `None` uses the smoother's own default.
    pub smoother_sweeps: Option<usize>,
    pub jacobi_weight: f64,
    pub chebyshev_degree: usize,
    pub bottom_solver: BottomSolverKind,
    /// Block size of the communication-avoiding Krylov methods.
    pub ca_krylov_s: usize,
    /// Absolute `||D^-1 r||_inf` target of the relaxation bottom solver; 0 disables it.
    pub bottom_dtol: f64,
    pub bottom_rtol: f64,
    pub bottom_max_iterations: usize,
    /// Smoother calls when the bottom solver is [`BottomSolverKind::Relaxation`].
    pub bottom_relaxations: usize,
    pub max_vcycles: usize,
    /// Largest global dimension the bottom solver accepts.
    pub max_coarse_dim: usize,
    /// Stop coarsening once the global dimension would drop below this.
    pub min_coarse_dim: Option<usize>,
    pub max_levels: usize,
    /// Boxes whose halves would be smaller than this are merged 2x2x2 instead.
    pub agglomerate_below: usize,
    /// Use the lane-batched tensor kernels when a table entry fits.
    pub vectorize_tensor: bool,
}

impl Default for MgConfig {
    fn default() -> Self {
        Self {
            operator: OperatorKind::VariableCoefficient,
            smoother: SmootherKind::Gsrb,
            smoother_sweeps: None,
            jacobi_weight: 2.0 / 3.0,
            chebyshev_degree: 6,
            bottom_solver: BottomSolverKind::BiCgStab,
            ca_krylov_s: 2,
            bottom_dtol: 0.0,
            bottom_rtol: 1e-3,
            bottom_max_iterations: 200,
            bottom_relaxations: 10,
            max_vcycles: 20,
            max_coarse_dim: 11,
            min_coarse_dim: None,
            max_levels: 100,
            agglomerate_below: 4,
            vectorize_tensor: true,
        }
    }
}

fn parse_smoother(s: &str) -> Option<SmootherKind> {
    match s.trim().to_ascii_lowercase().as_str() {
        "gsrb" | "rb" | "redblack" | "red_black" | "gauss_seidel" => Some(SmootherKind::Gsrb),
        "jacobi" | "wjacobi" | "weighted_jacobi" => Some(SmootherKind::Jacobi),
        "cheby" | "chebyshev" => Some(SmootherKind::Chebyshev),
        _ => None,
    }
}

fn parse_bottom(s: &str) -> Option<BottomSolverKind> {
    match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "cg" => Some(BottomSolverKind::Cg),
        "bicgstab" | "bicg_stab" => Some(BottomSolverKind::BiCgStab),
        "cacg" | "ca_cg" => Some(BottomSolverKind::CaCg),
        "cabicgstab" | "ca_bicgstab" => Some(BottomSolverKind::CaBiCgStab),
        "relax" | "relaxation" | "smooth" | "none" => Some(BottomSolverKind::Relaxation),
        _ => None,
    }
}

fn parse_operator(s: &str) -> Option<OperatorKind> {
    match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "variable" | "vc" | "variable_coefficient" | "fv4" => Some(OperatorKind::VariableCoefficient),
        "constant" | "cc" | "constant_coefficient" | "poisson" => Some(OperatorKind::ConstantCoefficient),
        _ => None,
    }
}

impl MgConfig {
    /// Defaults overlaid with any `GMG_*` environment variables. Values
    /// that do not parse are ignored.
    pub fn from_env() -> Self {
        fn get(name: &str) -> Option<String> {
            std::env::var(name).ok()
        }
        fn get_usize(name: &str) -> Option<usize> {
            get(name).and_then(|s| s.trim().parse::<usize>().ok())
        }
        fn get_f64(name: &str) -> Option<f64> {
            get(name).and_then(|s| s.trim().parse::<f64>().ok())
        }

        let mut cfg = Self::default();
        if let Some(v) = get("GMG_OPERATOR").as_deref().and_then(parse_operator) {
            cfg.operator = v;
        }
        if let Some(v) = get("GMG_SMOOTHER").as_deref().and_then(parse_smoother) {
            cfg.smoother = v;
        }
        if let Some(v) = get_usize("GMG_SMOOTHER_SWEEPS").or_else(|| get_usize("GMG_SMOOTHS")) {
            cfg.smoother_sweeps = Some(v.max(1));
        }
        if let Some(v) = get_f64("GMG_JACOBI_WEIGHT") {
            cfg.jacobi_weight = v.clamp(0.05, 1.0);
        }
        if let Some(v) = get_usize("GMG_CHEBYSHEV_DEGREE") {
            cfg.chebyshev_degree = v.max(1);
        }
        if let Some(v) = get("GMG_BOTTOM_SOLVER").as_deref().and_then(parse_bottom) {
            cfg.bottom_solver = v;
        }
        if let Some(v) = get_usize("GMG_CA_KRYLOV_S") {
            cfg.ca_krylov_s = v.max(1);
        }
        if let Some(v) = get_f64("GMG_BOTTOM_DTOL") {
            cfg.bottom_dtol = v.max(0.0);
        }
        if let Some(v) = get_f64("GMG_BOTTOM_RTOL") {
            cfg.bottom_rtol = v.max(0.0);
        }
        if let Some(v) = get_usize("GMG_BOTTOM_MAX_ITERATIONS") {
            cfg.bottom_max_iterations = v;
        }
        if let Some(v) = get_usize("GMG_BOTTOM_RELAXATIONS") {
            cfg.bottom_relaxations = v;
        }
        if let Some(v) = get_usize("GMG_MAX_VCYCLES") {
            cfg.max_vcycles = v.max(1);
        }
        if let Some(v) = get_usize("GMG_MAX_COARSE_DIM") {
            cfg.max_coarse_dim = v;
        }
        if let Some(v) = get_usize("GMG_MIN_COARSE_DIM") {
            cfg.min_coarse_dim = Some(v);
        }
        if let Some(v) = get_usize("GMG_MAX_LEVELS") {
            cfg.max_levels = v.max(1);
        }
        if let Some(v) = get_usize("GMG_AGGLOMERATE_BELOW") {
            cfg.agglomerate_below = v;
        }
        if let Some(v) = get("GMG_VECTORIZE_TENSOR") {
            cfg.vectorize_tensor = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
        cfg
    }

    /// Reject combinations the solver cannot run with.
    pub fn validate(&self) -> Result<(), MgError> {
        let bad = |what: String| Err(MgError::Unsupported(what));
        if self.smoother_sweeps == Some(0) {
            return bad("smoother_sweeps must be positive".into());
        }
        if !(f64::MIN_POSITIVE..=1.0).contains(&self.jacobi_weight) {
            return bad(format!("jacobi_weight {} outside (0, 1]", self.jacobi_weight));
        }
        if self.smoother == SmootherKind::Chebyshev && self.chebyshev_degree == 0 {
            return bad("chebyshev_degree must be positive".into());
        }
        if self.ca_krylov_s == 0 {
            return bad("ca_krylov_s must be positive".into());
        }
        if self.bottom_dtol.is_nan() || self.bottom_dtol < 0.0 {
            return bad(format!("bottom_dtol {} must be non-negative", self.bottom_dtol));
        }
        if self.bottom_rtol.is_nan() || self.bottom_rtol < 0.0 {
            return bad(format!("bottom_rtol {} must be non-negative", self.bottom_rtol));
        }
        if self.max_vcycles == 0 {
            return bad("max_vcycles must be positive".into());
        }
        if self.max_levels == 0 {
            return bad("max_levels must be positive".into());
        }
        if let Some(min) = self.min_coarse_dim {
            if min > self.max_coarse_dim {
                return bad(format!(
                    "min_coarse_dim {min} exceeds max_coarse_dim {}",
                    self.max_coarse_dim
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        MgConfig::default().validate().unwrap();
    }

    #[test]
    fn lenient_spellings_parse() {
        assert_eq!(parse_smoother(" Cheby "), Some(SmootherKind::Chebyshev));
        assert_eq!(parse_bottom("CA-BiCGStab"), Some(BottomSolverKind::CaBiCgStab));
        assert_eq!(parse_bottom("relax"), Some(BottomSolverKind::Relaxation));
        assert_eq!(parse_operator("cc"), Some(OperatorKind::ConstantCoefficient));
        assert_eq!(parse_bottom("gmres"), None);
    }

    #[test]
    fn inconsistent_values_are_rejected() {
        let cases = [
            MgConfig { smoother_sweeps: Some(0), ..Default::default() },
            MgConfig { jacobi_weight: 1.5, ..Default::default() },
            MgConfig { ca_krylov_s: 0, ..Default::default() },
            MgConfig { min_coarse_dim: Some(64), ..Default::default() },
            MgConfig { bottom_rtol: f64::NAN, ..Default::default() },
            MgConfig { bottom_dtol: -1.0, ..Default::default() },
        ];
        for c in cases {
            assert!(matches!(c.validate(), Err(MgError::Unsupported(_))), "{c:?}");
        }
    }
}
