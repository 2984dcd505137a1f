//! Probability distributions

pub mod normal;
pub mod t;
pub mod chi;

pub use normal::{erf, normal_cdf, z_to_two_sided_p, Erf, NormalCdf, ZToP};
pub use t::{t_cdf, t_two_sided_p, TCdf};
pub use chi::{chi2_cdf, chi2_p_value, gamma, ChiCdf, Gamma};
