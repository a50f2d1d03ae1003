//! Variable-Peg AMM engine
//!
//! Owns the ledger of one oracle-pegged pool and exposes the two trades that
//! mutate it:
//!
//! - **Expansion**: USD in, fiat out. Mints fiat 1:1 at the oracle rate and
//!   mints reserve tokens into the pool at a regime-dependent rate `Lambda`,
//!   ejecting pool fiat along the fixed invariant curve.
//! - **Contraction**: fiat in, USD out. Releases reserve from the pool at the
//!   protocol rate, absorbing the fiat partly through the curve and partly by
//!   direct redemption (burn).
//!
//! ## Ledger Identities
//! - `Xr > 0` and `Yf > 0` after initialization
//! - `Yf + Wf + Zf + treasury == fiat_minted - fiat_burned` after every
//!   accepted trade
//! - `Su` moves by net USD deposited and gross USD withdrawn, independent of `Xr`
//!
//! The invariant `k = Xr * Yf` is computed once at initialization and reused
//! for every later swap.

use log::debug;
use serde::Serialize;

use crate::error::{require_positive, Result, SimulationError};
use crate::varq::{classify, funding_multiplier, VarqState};

/// Nominal user capital (USD) valued into the public float at initialization.
pub const USER_CAPITAL_USD: f64 = 100_000.0;
/// Post-trade solvency ratio an expansion may not cross from above.
pub const SOLVENCY_FLOOR: f64 = 0.999_999;
/// `Lambda` within this distance of one mints at par.
pub const LAMBDA_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Ledger {
    /// Xr: reserve tokens held by the pool (also the reserve token supply Sr)
    pub reserve_usd: f64,
    /// Yf: fiat held by the pool
    pub reserve_fiat: f64,
    pub treasury_fiat: f64,
    /// Wf: fiat held by the public
    pub wallet_fiat: f64,
    /// Zf: fiat held by the LP outside the pool
    pub lp_excess_fiat: f64,
    pub fees_total: f64,
    pub fees_expansion: f64,
    pub fees_contraction: f64,
    /// Running sum of USD deposited but not minted as reserve
    pub backing_buffer_usd: f64,
    /// Su: USD collateral actually backing the system
    pub total_collateral_usd: f64,
    pub k: f64,
    pub fiat_minted: f64,
    pub fiat_burned: f64,
}

impl Ledger {
    /// Sf
    pub fn total_fiat(&self) -> f64 {
        self.reserve_fiat + self.wallet_fiat + self.lp_excess_fiat + self.treasury_fiat
    }

    /// C_U = max(0, Su - Sr)
    pub fn over_collateral_usd(&self) -> f64 {
        (self.total_collateral_usd - self.reserve_usd).max(0.0)
    }

    /// Distance from `Sf == minted - burned`; zero on a consistent ledger.
    pub fn fiat_identity_gap(&self) -> f64 {
        self.total_fiat() - (self.fiat_minted - self.fiat_burned)
    }

    fn balances(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            reserve_usd: self.reserve_usd,
            reserve_fiat: self.reserve_fiat,
            collateral_usd: self.total_collateral_usd,
            total_fiat: self.total_fiat(),
            wallet_fiat: self.wallet_fiat,
            lp_excess_fiat: self.lp_excess_fiat,
        }
    }

    fn valuation(&self, total_rate: f64, amm_rate: f64) -> ValuationBreakdown {
        let excess_claims = self.total_collateral_usd - self.reserve_usd;
        let pool_fiat = self.reserve_fiat / total_rate;
        let pool_reserve = (self.reserve_usd * amm_rate) / total_rate;
        let lp_holdings = (self.lp_excess_fiat + self.treasury_fiat) / total_rate;

        ValuationBreakdown {
            excess_claims,
            pool_fiat,
            pool_reserve,
            pool: pool_fiat + pool_reserve,
            lp_holdings,
            fees: self.fees_total,
            total: excess_claims + self.fees_total + pool_fiat + pool_reserve + lp_holdings,
        }
    }

    fn amm_rate(&self) -> f64 {
        self.reserve_fiat / self.reserve_usd
    }
}

/// Quantities derived from the ledger at a given oracle price.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DerivedState {
    pub total_fiat: f64,
    pub reserve_supply: f64,
    pub collateral_usd: f64,
    /// Pr = Sf / Sr
    pub protocol_rate: f64,
    /// Phi = Pr / oracle
    pub phi: f64,
    /// Omega = Su / Sr
    pub omega: f64,
    pub lambda: f64,
    pub buffer_usd: f64,
    pub regime: VarqState,
}

impl DerivedState {
    fn of(ledger: &Ledger, oracle_price: f64) -> Self {
        let total_fiat = ledger.total_fiat();
        let reserve_supply = ledger.reserve_usd;
        let collateral_usd = ledger.total_collateral_usd;

        let protocol_rate = if reserve_supply > 0.0 { total_fiat / reserve_supply } else { 0.0 };
        let phi = if oracle_price > 0.0 { protocol_rate / oracle_price } else { 1.0 };
        let omega = if reserve_supply > 0.0 { collateral_usd / reserve_supply } else { 1.0 };
        let buffer_usd = ledger.over_collateral_usd();

        Self {
            total_fiat,
            reserve_supply,
            collateral_usd,
            protocol_rate,
            phi,
            omega,
            lambda: funding_multiplier(oracle_price, protocol_rate, omega),
            buffer_usd,
            regime: classify(oracle_price, protocol_rate, buffer_usd),
        }
    }

    /// USD input at which the protocol rate returns to the oracle rate.
    fn equilibrium_input(&self, oracle_price: f64) -> f64 {
        if (self.lambda - 1.0).abs() <= LAMBDA_EPSILON {
            return 0.0;
        }
        let numerator = self.total_fiat - oracle_price * self.reserve_supply;
        let denominator = oracle_price * (self.lambda - 1.0);
        if denominator.abs() > LAMBDA_EPSILON {
            numerator / denominator
        } else {
            0.0
        }
    }

    /// USD input that consumes the whole over-collateralization at `Lambda > 1`.
    fn exhaustion_input(&self) -> f64 {
        let excess = self.lambda - 1.0;
        if excess > LAMBDA_EPSILON {
            self.buffer_usd / excess
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Reserve minting decision table
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MintRule {
    /// Lambda > 1, equilibrium reached before the buffer runs out
    SurplusToEquilibrium,
    /// Lambda > 1, buffer runs out first (or no equilibrium ahead)
    SurplusToExhaustion,
    /// Lambda < 1
    DiscountToEquilibrium,
    /// Lambda == 1
    Par,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ReserveMint {
    pub rule: MintRule,
    /// Input up to which Lambda applies; par beyond it
    pub boundary: Option<f64>,
    pub reserve: f64,
}

/// Reserve minted for `net` USD at multiplier `lambda`.
///
/// `equilibrium_input` and `exhaustion_input` are the thresholds `U_eq` and
/// `U_del`.
pub fn mint_reserve(
    net: f64,
    lambda: f64,
    equilibrium_input: f64,
    exhaustion_input: f64,
) -> ReserveMint {
    let (rule, boundary) = if (lambda - 1.0).abs() <= LAMBDA_EPSILON {
        (MintRule::Par, None)
    } else if lambda > 1.0 {
        if equilibrium_input > 0.0 && equilibrium_input < exhaustion_input {
            (MintRule::SurplusToEquilibrium, Some(equilibrium_input))
        } else {
            (MintRule::SurplusToExhaustion, Some(exhaustion_input))
        }
    } else if equilibrium_input > 0.0 {
        (MintRule::DiscountToEquilibrium, Some(equilibrium_input))
    } else {
        (MintRule::DiscountToEquilibrium, None)
    };

    let reserve = match (rule, boundary) {
        (MintRule::Par, _) => net,
        (_, Some(limit)) if net > limit => limit * lambda + (net - limit),
        _ => net * lambda,
    };

    ReserveMint { rule, boundary, reserve }
}

// ---------------------------------------------------------------------------
// Contraction solver
// ---------------------------------------------------------------------------

/// Coefficients of `a*Rs^2 + b*Rs + c = 0`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct QuadraticSolve {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub discriminant: f64,
}

impl QuadraticSolve {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c, discriminant: b * b - 4.0 * a * c }
    }

    /// Coefficients for releasing reserve against `fiat_in` at protocol rate `pr`.
    pub fn for_contraction(pr: f64, reserve_usd: f64, reserve_fiat: f64, k: f64, fiat_in: f64) -> Self {
        let absorbed = reserve_fiat + fiat_in;
        Self::new(pr, -(absorbed + pr * reserve_usd), absorbed * reserve_usd - k)
    }

    /// Picks the root strictly inside `(0, upper)`; the smaller root when
    /// neither or both qualify. `None` when the discriminant is negative.
    pub fn select_root(&self, upper: f64) -> Option<f64> {
        if self.discriminant < 0.0 {
            return None;
        }
        let sqrt_d = self.discriminant.sqrt();
        let hi = (-self.b + sqrt_d) / (2.0 * self.a);
        let lo = (-self.b - sqrt_d) / (2.0 * self.a);
        let inside = |r: f64| r > 0.0 && r < upper;

        Some(match (inside(hi), inside(lo)) {
            (true, false) => hi,
            (false, true) => lo,
            _ => hi.min(lo),
        })
    }
}

// ---------------------------------------------------------------------------
// Trade records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TradeKind {
    Expansion,
    Contraction,
}

impl TradeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Expansion => "EXPANSION",
            Self::Contraction => "CONTRACTION",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    SolvencyBreach,
    LiquidityCrisis,
    ReserveExhaustion,
    InvalidAmount,
    InvalidOracle,
}

impl FailureReason {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::SolvencyBreach => "Solvency Breach",
            Self::LiquidityCrisis => "Liquidity Crisis",
            Self::ReserveExhaustion => "Reserve Exhaustion",
            Self::InvalidAmount => "Invalid Amount",
            Self::InvalidOracle => "Invalid Oracle Price",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason")]
pub enum TradeStatus {
    Success,
    Failed(FailureReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    pub reserve_usd: f64,
    pub reserve_fiat: f64,
    pub collateral_usd: f64,
    pub total_fiat: f64,
    pub wallet_fiat: f64,
    pub lp_excess_fiat: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum TradeDetail {
    Expansion {
        /// Fi: fiat minted 1:1 at the oracle rate
        minted_fiat: f64,
        /// Ri: reserve minted into the pool
        minted_reserve: f64,
        /// Fs: fiat ejected from the pool
        ejected_fiat: f64,
        mint: ReserveMint,
        buffer_delta: f64,
    },
    Contraction {
        /// Rs: gross USD released from reserves
        reserve_released: f64,
        /// Fs: fiat absorbed by the pool
        swap_fiat: f64,
        /// Fr: fiat redeemed directly (burned)
        redeem_fiat: f64,
        solver: QuadraticSolve,
        /// Sizing cap used by the caller, if any
        sizing_cap: Option<f64>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TradeRecord {
    pub kind: TradeKind,
    pub status: TradeStatus,
    pub oracle_price: f64,
    pub amount_in: f64,
    pub amount_out: f64,
    pub fee: f64,
    pub effective_rate: f64,
    pub lambda: f64,
    pub regime: VarqState,
    pub protocol_rate: f64,
    pub phi: f64,
    pub omega: f64,
    pub pre: BalanceSnapshot,
    pub post: BalanceSnapshot,
    pub valuation_before: f64,
    pub valuation_after: f64,
    pub cumulative_buffer_usd: f64,
    pub detail: Option<TradeDetail>,
}

impl TradeRecord {
    pub fn is_success(&self) -> bool {
        self.status == TradeStatus::Success
    }

    pub fn failure_reason(&self) -> Option<&'static str> {
        match self.status {
            TradeStatus::Success => None,
            TradeStatus::Failed(reason) => Some(reason.reason()),
        }
    }
}

/// Result of one engine operation. The record travels with the outcome
/// instead of living on the engine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TradeOutcome {
    pub success: bool,
    pub amount_out: f64,
    pub fee: f64,
    pub record: TradeRecord,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ValuationBreakdown {
    /// Su - Xr
    pub excess_claims: f64,
    pub pool_fiat: f64,
    pub pool_reserve: f64,
    pub pool: f64,
    pub lp_holdings: f64,
    pub fees: f64,
    pub total: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub regime: VarqState,
    pub lambda: f64,
    pub phi: f64,
    pub omega: f64,
    pub protocol_rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationStep {
    pub day: usize,
    pub oracle_price: f64,
    /// oracle + Yf / Xr
    pub amm_price: f64,
    pub reserve_usd: f64,
    pub reserve_fiat: f64,
    pub treasury_fiat: f64,
    pub wallet_fiat: f64,
    pub lp_excess_fiat: f64,
    pub total_collateral_usd: f64,
    pub backing_buffer_usd: f64,
    pub fees_collected: f64,
    pub fees_expansion: f64,
    pub fees_contraction: f64,
    pub valuation: ValuationBreakdown,
    pub health: HealthMetrics,
    pub trade: Option<TradeRecord>,
}

impl SimulationStep {
    pub fn lp_valuation(&self) -> f64 {
        self.valuation.total
    }

    pub fn lp_assets_value(&self) -> f64 {
        self.valuation.total - self.valuation.fees
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Pool state captured before a trade touches the ledger.
struct PreTrade {
    oracle_price: f64,
    state: DerivedState,
    balances: BalanceSnapshot,
    valuation: f64,
}

/// What a trade moved, independent of its detail.
struct Fill {
    kind: TradeKind,
    status: TradeStatus,
    amount_in: f64,
    amount_out: f64,
    fee: f64,
}

/// O = 0 is allowed; classification has a fallback for it.
fn usable_oracle(oracle_price: f64) -> bool {
    oracle_price.is_finite() && oracle_price >= 0.0
}

#[derive(Clone, Debug)]
pub struct VarqAmm {
    ledger: Ledger,
    fee_rate: f64,
}

impl VarqAmm {
    pub fn new(capital_usd: f64, oracle_price: f64, premium: f64, fee_rate: f64) -> Result<Self> {
        require_positive("initial_liquidity_usd", capital_usd)?;
        require_positive("oracle_price", oracle_price)?;
        require_positive("initial_premium", premium)?;
        if premium > 1.0 {
            return Err(SimulationError::InvalidParameter { name: "initial_premium", value: premium });
        }
        if !(0.0..1.0).contains(&fee_rate) {
            return Err(SimulationError::InvalidParameter { name: "fee_rate", value: fee_rate });
        }

        let reserve_usd = capital_usd;
        let total_fiat = capital_usd * oracle_price;
        let amm_rate = oracle_price * premium;
        let reserve_fiat = reserve_usd * amm_rate;
        let remainder = total_fiat - reserve_fiat;

        let mut wallet_fiat = USER_CAPITAL_USD * (oracle_price + amm_rate);
        let mut lp_excess_fiat = remainder - wallet_fiat;
        if lp_excess_fiat < 0.0 {
            lp_excess_fiat = 0.0;
            wallet_fiat = remainder;
        }

        let ledger = Ledger {
            reserve_usd,
            reserve_fiat,
            treasury_fiat: 0.0,
            wallet_fiat,
            lp_excess_fiat,
            fees_total: 0.0,
            fees_expansion: 0.0,
            fees_contraction: 0.0,
            backing_buffer_usd: 0.0,
            total_collateral_usd: capital_usd,
            k: reserve_usd * reserve_fiat,
            fiat_minted: total_fiat,
            fiat_burned: 0.0,
        };

        Ok(Self { ledger, fee_rate })
    }

    /// Resumes an engine from an existing ledger.
    pub fn from_ledger(ledger: Ledger, fee_rate: f64) -> Self {
        Self { ledger, fee_rate }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    pub fn derived(&self, oracle_price: f64) -> DerivedState {
        DerivedState::of(&self.ledger, oracle_price)
    }

    /// Valuation priced at `Pr + Yf / Xr`, the basis trade records use.
    fn protocol_valuation(&self) -> f64 {
        let amm_rate = self.ledger.amm_rate();
        let pr = self.ledger.total_fiat() / self.ledger.reserve_usd;
        self.ledger.valuation(pr + amm_rate, amm_rate).total
    }

    fn capture(&self, oracle_price: f64) -> PreTrade {
        PreTrade {
            oracle_price,
            state: self.derived(oracle_price),
            balances: self.ledger.balances(),
            valuation: self.protocol_valuation(),
        }
    }

    fn record(&self, pre: &PreTrade, fill: Fill, detail: Option<TradeDetail>) -> TradeRecord {
        let Fill { kind, status, amount_in, amount_out, fee } = fill;
        let effective_rate = match (kind, &detail) {
            (TradeKind::Expansion, _) if amount_in > 0.0 => amount_out / amount_in,
            (TradeKind::Contraction, Some(TradeDetail::Contraction { reserve_released, .. }))
                if *reserve_released > 0.0 =>
            {
                amount_in / reserve_released
            }
            _ => 0.0,
        };

        TradeRecord {
            kind,
            status,
            oracle_price: pre.oracle_price,
            amount_in,
            amount_out,
            fee,
            effective_rate,
            lambda: pre.state.lambda,
            regime: pre.state.regime,
            protocol_rate: pre.state.protocol_rate,
            phi: pre.state.phi,
            omega: pre.state.omega,
            pre: pre.balances,
            post: self.ledger.balances(),
            valuation_before: pre.valuation,
            valuation_after: self.protocol_valuation(),
            cumulative_buffer_usd: self.ledger.backing_buffer_usd,
            detail,
        }
    }

    fn reject(
        &self,
        pre: &PreTrade,
        kind: TradeKind,
        reason: FailureReason,
        amount_in: f64,
        fee: f64,
        detail: Option<TradeDetail>,
    ) -> TradeOutcome {
        debug!(
            "{} rejected: {} (amount {:.4}, regime {:?})",
            kind.name(),
            reason.reason(),
            amount_in,
            pre.state.regime
        );
        let fill = Fill { kind, status: TradeStatus::Failed(reason), amount_in, amount_out: 0.0, fee };
        let record = self.record(pre, fill, detail);
        TradeOutcome { success: false, amount_out: 0.0, fee, record }
    }

    pub fn expansion(&mut self, amount_in_usd: f64, oracle_price: f64) -> TradeOutcome {
        let pre = self.capture(oracle_price);
        let state = pre.state;

        if !amount_in_usd.is_finite() || amount_in_usd < 0.0 {
            return self.reject(&pre, TradeKind::Expansion, FailureReason::InvalidAmount, amount_in_usd, 0.0, None);
        }
        if !usable_oracle(oracle_price) {
            return self.reject(&pre, TradeKind::Expansion, FailureReason::InvalidOracle, amount_in_usd, 0.0, None);
        }

        // Collected before the pool guards, so a rejected expansion still pays it.
        let fee = amount_in_usd * self.fee_rate;
        self.ledger.fees_total += fee;
        self.ledger.fees_expansion += fee;
        let net = amount_in_usd - fee;

        let minted_fiat = net * oracle_price;
        let mint = mint_reserve(
            net,
            state.lambda,
            state.equilibrium_input(oracle_price),
            state.exhaustion_input(),
        );
        let minted_reserve = mint.reserve;

        let new_omega = {
            let su = state.collateral_usd + net;
            let sr = state.reserve_supply + minted_reserve;
            if sr > 0.0 { su / sr } else { 1.0 }
        };
        if state.omega >= 1.0 && new_omega < SOLVENCY_FLOOR {
            return self.reject(&pre, TradeKind::Expansion, FailureReason::SolvencyBreach, amount_in_usd, fee, None);
        }

        let new_reserve_usd = self.ledger.reserve_usd + minted_reserve;
        if new_reserve_usd <= 0.0 {
            return self.reject(&pre, TradeKind::Expansion, FailureReason::ReserveExhaustion, amount_in_usd, fee, None);
        }

        let buffer_delta = net - minted_reserve;
        let new_reserve_fiat = self.ledger.k / new_reserve_usd;
        let ejected_fiat = self.ledger.reserve_fiat - new_reserve_fiat;
        let total_out = minted_fiat + ejected_fiat;

        self.ledger.backing_buffer_usd += buffer_delta;
        self.ledger.reserve_usd = new_reserve_usd;
        self.ledger.reserve_fiat = new_reserve_fiat;
        self.ledger.total_collateral_usd += net;
        self.ledger.wallet_fiat += total_out;
        self.ledger.fiat_minted += minted_fiat;

        let detail = TradeDetail::Expansion {
            minted_fiat,
            minted_reserve,
            ejected_fiat,
            mint,
            buffer_delta,
        };
        let fill = Fill {
            kind: TradeKind::Expansion,
            status: TradeStatus::Success,
            amount_in: amount_in_usd,
            amount_out: total_out,
            fee,
        };
        let record = self.record(&pre, fill, Some(detail));

        TradeOutcome { success: true, amount_out: total_out, fee, record }
    }

    pub fn contraction(&mut self, amount_in_fiat: f64, oracle_price: f64) -> TradeOutcome {
        self.contraction_with_cap(amount_in_fiat, oracle_price, None)
    }

    /// Contraction that also records the caller's sizing cap for auditing.
    pub fn contraction_with_cap(
        &mut self,
        amount_in_fiat: f64,
        oracle_price: f64,
        sizing_cap: Option<f64>,
    ) -> TradeOutcome {
        let pre = self.capture(oracle_price);

        if !amount_in_fiat.is_finite() || amount_in_fiat < 0.0 {
            return self.reject(&pre, TradeKind::Contraction, FailureReason::InvalidAmount, amount_in_fiat, 0.0, None);
        }
        if !usable_oracle(oracle_price) {
            return self.reject(&pre, TradeKind::Contraction, FailureReason::InvalidOracle, amount_in_fiat, 0.0, None);
        }

        // Priced at the protocol rate, not the oracle.
        let reserve_usd = self.ledger.reserve_usd;
        let reserve_fiat = self.ledger.reserve_fiat;
        let solver = QuadraticSolve::for_contraction(
            pre.state.protocol_rate,
            reserve_usd,
            reserve_fiat,
            self.ledger.k,
            amount_in_fiat,
        );

        let released = match solver.select_root(reserve_usd) {
            Some(rs) if rs.is_finite() && reserve_usd - rs > 0.0 => rs,
            selected => {
                let reason = if selected.is_none() {
                    FailureReason::LiquidityCrisis
                } else {
                    FailureReason::ReserveExhaustion
                };
                let detail = TradeDetail::Contraction {
                    reserve_released: 0.0,
                    swap_fiat: 0.0,
                    redeem_fiat: 0.0,
                    solver,
                    sizing_cap,
                };
                return self.reject(&pre, TradeKind::Contraction, reason, amount_in_fiat, 0.0, Some(detail));
            }
        };

        let fee = released * self.fee_rate;
        let net_out = released - fee;

        let new_reserve_usd = reserve_usd - released;
        let new_reserve_fiat = self.ledger.k / new_reserve_usd;
        let swap_fiat = new_reserve_fiat - reserve_fiat;
        let redeem_fiat = amount_in_fiat - swap_fiat;

        self.ledger.reserve_usd = new_reserve_usd;
        self.ledger.reserve_fiat = new_reserve_fiat;
        // Gross leaves collateral; the fee stays behind as protocol surplus.
        self.ledger.total_collateral_usd -= released;
        self.ledger.wallet_fiat -= amount_in_fiat;
        self.ledger.fees_total += fee;
        self.ledger.fees_contraction += fee;
        self.ledger.fiat_burned += redeem_fiat;

        let detail = TradeDetail::Contraction {
            reserve_released: released,
            swap_fiat,
            redeem_fiat,
            solver,
            sizing_cap,
        };
        let fill = Fill {
            kind: TradeKind::Contraction,
            status: TradeStatus::Success,
            amount_in: amount_in_fiat,
            amount_out: net_out,
            fee,
        };
        let record = self.record(&pre, fill, Some(detail));

        TradeOutcome { success: true, amount_out: net_out, fee, record }
    }

    /// Snapshot of the pool at `oracle_price`, embedding `last_trade` if any.
    pub fn state(&self, day: usize, oracle_price: f64, last_trade: Option<&TradeRecord>) -> SimulationStep {
        let derived = self.derived(oracle_price);
        let amm_rate = self.ledger.amm_rate();
        let total_rate = oracle_price + amm_rate;
        let ledger = &self.ledger;

        SimulationStep {
            day,
            oracle_price,
            amm_price: total_rate,
            reserve_usd: ledger.reserve_usd,
            reserve_fiat: ledger.reserve_fiat,
            treasury_fiat: ledger.treasury_fiat,
            wallet_fiat: ledger.wallet_fiat,
            lp_excess_fiat: ledger.lp_excess_fiat,
            total_collateral_usd: ledger.total_collateral_usd,
            backing_buffer_usd: ledger.backing_buffer_usd,
            fees_collected: ledger.fees_total,
            fees_expansion: ledger.fees_expansion,
            fees_contraction: ledger.fees_contraction,
            valuation: ledger.valuation(total_rate, amm_rate),
            health: HealthMetrics {
                regime: derived.regime,
                lambda: derived.lambda,
                phi: derived.phi,
                omega: derived.omega,
                protocol_rate: derived.protocol_rate,
            },
            trade: last_trade.cloned(),
        }
    }
}
