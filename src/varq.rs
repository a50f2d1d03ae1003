//! VARQ regime classification and funding multiplier.
//!
//! The classifier compares the oracle rate `O_R` with the protocol rate
//! `P_R = Sf / Sr` and checks whether an over-collateralization buffer
//! `C_U = max(0, Su - Sr)` exists. The result is one of five mutually
//! exclusive regimes:
//!
//! | Regime | Condition                    |
//! |--------|------------------------------|
//! | S0     | O_R ≈ P_R, no buffer         |
//! | S1     | O_R > P_R                    |
//! | S2     | O_R ≈ P_R, buffer present    |
//! | S3     | O_R < P_R, buffer present    |
//! | S4     | O_R < P_R, no buffer         |

use serde::Serialize;

/// Tolerance for rate equality and buffer presence.
pub const RATE_EPSILON: f64 = 1e-4;
/// Tolerance for treating the solvency ratio as exactly one.
pub const SOLVENCY_EPSILON: f64 = 1e-6;
/// Funding multiplier used when the oracle rate is zero.
pub const ZERO_ORACLE_MULTIPLIER: f64 = 10_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum VarqState {
    S0,
    S1,
    S2,
    S3,
    S4,
}

impl VarqState {
    pub fn all() -> Vec<Self> {
        vec![Self::S0, Self::S1, Self::S2, Self::S3, Self::S4]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::S0 => "Equilibrium (no buffer)",
            Self::S1 => "Positive flux",
            Self::S2 => "Equilibrium (buffered)",
            Self::S3 => "Negative flux (buffered)",
            Self::S4 => "Negative flux (no buffer)",
        }
    }

    /// S4 is the only regime with the protocol overpriced and nothing to draw on.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::S4)
    }
}

/// Maps `(oracle rate, protocol rate, buffer)` to a regime.
pub fn classify(oracle_rate: f64, protocol_rate: f64, buffer_usd: f64) -> VarqState {
    let has_buffer = buffer_usd > RATE_EPSILON;
    let at_equilibrium = (oracle_rate - protocol_rate).abs() < RATE_EPSILON;

    // A buffered pool sitting just below the oracle still counts as positive flux.
    if at_equilibrium && !has_buffer {
        VarqState::S0
    } else if oracle_rate > protocol_rate {
        VarqState::S1
    } else if at_equilibrium {
        VarqState::S2
    } else if has_buffer {
        VarqState::S3
    } else {
        VarqState::S4
    }
}

/// Funding multiplier `Lambda`.
///
/// `P_R / O_R`, except that a ratio above one collapses to exactly one when
/// the solvency ratio has no cushion: reserve is never over-minted without a
/// buffer to pay for it.
pub fn funding_multiplier(oracle_rate: f64, protocol_rate: f64, solvency_ratio: f64) -> f64 {
    let flux_ratio = if oracle_rate > 0.0 {
        protocol_rate / oracle_rate
    } else {
        ZERO_ORACLE_MULTIPLIER
    };

    if flux_ratio > 1.0 && (solvency_ratio - 1.0).abs() < SOLVENCY_EPSILON {
        return 1.0;
    }
    flux_ratio
}
