//! # Sections, Modules and Gates
//!
//! The closed vocabulary of the loader. A [`Section`] names one loadable unit;
//! leaf sections are fetched from the backend, aggregate sections only ever
//! reflect the progress of the leaves they subsume. A [`Module`] is one
//! independently toggleable protocol integration, and a [`Gate`] is the single
//! predicate deciding whether a section may be fetched for the current session.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::services::SessionSource;

/// # Protocol Module
///
/// One optional protocol integration. Names follow the backend's module
/// identifiers so that configuration files can list them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// MakerDAO DAI Savings Rate.
    MakerdaoDsr,
    /// MakerDAO collateralized vaults.
    MakerdaoVaults,
    /// Aave lending.
    Aave,
    /// Compound lending.
    Compound,
    /// Yearn v1 vaults.
    #[serde(rename = "yearn_vaults")]
    Yearn,
    /// Yearn v2 vaults.
    #[serde(rename = "yearn_vaults_v2")]
    YearnV2,
    /// Uniswap liquidity pools.
    Uniswap,
    /// Balancer pools. State lives in an independent store.
    Balancer,
    /// Sushiswap pools. State lives in an independent store.
    Sushiswap,
    /// Liquity troves and staking.
    Liquity,
}

impl Module {
    /// Every module, in declaration order.
    pub const ALL: [Module; 10] = [
        Module::MakerdaoDsr,
        Module::MakerdaoVaults,
        Module::Aave,
        Module::Compound,
        Module::Yearn,
        Module::YearnV2,
        Module::Uniswap,
        Module::Balancer,
        Module::Sushiswap,
        Module::Liquity,
    ];

    /// The backend identifier of the module.
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::MakerdaoDsr => "makerdao_dsr",
            Module::MakerdaoVaults => "makerdao_vaults",
            Module::Aave => "aave",
            Module::Compound => "compound",
            Module::Yearn => "yearn_vaults",
            Module::YearnV2 => "yearn_vaults_v2",
            Module::Uniswap => "uniswap",
            Module::Balancer => "balancer",
            Module::Sushiswap => "sushiswap",
            Module::Liquity => "liquity",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known module or section.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseNameError {
    /// Not a module identifier (nor `all` where a selector was expected).
    #[error("unknown module: {0}")]
    UnknownModule(String),
    /// Not a section identifier.
    #[error("unknown section: {0}")]
    UnknownSection(String),
}

impl FromStr for Module {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Module::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or(ParseNameError::UnknownModule(s.to_string()))
    }
}

/// Either one module or every module at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleSelector {
    /// A single protocol module.
    One(Module),
    /// The catch-all selector.
    All,
}

impl FromStr for ModuleSelector {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(ModuleSelector::All);
        }
        s.parse().map(ModuleSelector::One)
    }
}

impl From<Module> for ModuleSelector {
    fn from(module: Module) -> Self {
        ModuleSelector::One(module)
    }
}

/// # Gate
///
/// The condition a session must meet before a section is touched at all. A
/// failing gate is a silent no-op, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    /// The module that must be active, if any.
    pub module: Option<Module>,
    /// Whether premium entitlement is required.
    pub premium: bool,
}

impl Gate {
    /// A gate that always opens.
    pub const OPEN: Gate = Gate { module: None, premium: false };

    const fn module(module: Module) -> Self {
        Gate { module: Some(module), premium: false }
    }

    const fn premium_module(module: Module) -> Self {
        Gate { module: Some(module), premium: true }
    }

    const fn premium() -> Self {
        Gate { module: None, premium: true }
    }

    /// Evaluates the gate against the session as it is right now.
    pub fn permits(&self, session: &dyn SessionSource) -> bool {
        if self.premium && !session.premium() {
            return false;
        }
        match self.module {
            Some(module) => session.is_active(module),
            None => true,
        }
    }
}

/// # Section
///
/// Identifies one loadable unit. The set is closed and fixed for the lifetime
/// of the process; [`Section::ALL`] is the registry's key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Summary of every protocol the backend knows about.
    DefiBalances,
    /// Airdrops claimable by the tracked accounts.
    DefiAirdrops,
    /// MakerDAO DSR balances.
    DefiDsrBalances,
    /// MakerDAO DSR history.
    DefiDsrHistory,
    /// MakerDAO vaults.
    DefiMakerdaoVaults,
    /// MakerDAO vault details.
    DefiMakerdaoVaultDetails,
    /// Aave balances.
    DefiAaveBalances,
    /// Aave history.
    DefiAaveHistory,
    /// Compound balances.
    DefiCompoundBalances,
    /// Compound history.
    DefiCompoundHistory,
    /// Yearn v1 vault balances.
    DefiYearnVaultsBalances,
    /// Yearn v1 vault history.
    DefiYearnVaultsHistory,
    /// Yearn v2 vault balances.
    DefiYearnVaultsV2Balances,
    /// Yearn v2 vault history.
    DefiYearnVaultsV2History,
    /// Liquity trove and stake balances.
    DefiLiquityBalances,
    /// Liquity trove and stake events.
    DefiLiquityEvents,
    /// Uniswap pool balances.
    DefiUniswapBalances,
    /// Uniswap trades.
    DefiUniswapTrades,
    /// Uniswap pool events.
    DefiUniswapEvents,
    /// Overview aggregate.
    DefiOverview,
    /// Lending balances aggregate.
    DefiLending,
    /// Lending history aggregate (premium).
    DefiLendingHistory,
    /// Borrowing balances aggregate.
    DefiBorrowing,
    /// Borrowing history aggregate (premium).
    DefiBorrowingHistory,
}

impl Section {
    /// Every section. The position of a section in this array is its index.
    pub const ALL: [Section; 24] = [
        Section::DefiBalances,
        Section::DefiAirdrops,
        Section::DefiDsrBalances,
        Section::DefiDsrHistory,
        Section::DefiMakerdaoVaults,
        Section::DefiMakerdaoVaultDetails,
        Section::DefiAaveBalances,
        Section::DefiAaveHistory,
        Section::DefiCompoundBalances,
        Section::DefiCompoundHistory,
        Section::DefiYearnVaultsBalances,
        Section::DefiYearnVaultsHistory,
        Section::DefiYearnVaultsV2Balances,
        Section::DefiYearnVaultsV2History,
        Section::DefiLiquityBalances,
        Section::DefiLiquityEvents,
        Section::DefiUniswapBalances,
        Section::DefiUniswapTrades,
        Section::DefiUniswapEvents,
        Section::DefiOverview,
        Section::DefiLending,
        Section::DefiLendingHistory,
        Section::DefiBorrowing,
        Section::DefiBorrowingHistory,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Leaf sections, i.e. everything that is fetched directly.
    pub fn leaves() -> impl Iterator<Item = Section> {
        Section::ALL.into_iter().filter(|s| !s.is_aggregate())
    }

    /// Aggregates are derived from leaf status and never fetched.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Section::DefiOverview
                | Section::DefiLending
                | Section::DefiLendingHistory
                | Section::DefiBorrowing
                | Section::DefiBorrowingHistory
        )
    }

    /// The premium-only counterpart of a balances aggregate.
    pub fn premium_variant(&self) -> Option<Section> {
        match self {
            Section::DefiLending => Some(Section::DefiLendingHistory),
            Section::DefiBorrowing => Some(Section::DefiBorrowingHistory),
            _ => None,
        }
    }

    /// The module owning a leaf section, if it belongs to one.
    pub fn module(&self) -> Option<Module> {
        self.gate().module
    }

    /// The gate guarding this section.
    pub fn gate(&self) -> Gate {
        match self {
            Section::DefiBalances | Section::DefiAirdrops => Gate::OPEN,
            Section::DefiDsrBalances => Gate::module(Module::MakerdaoDsr),
            Section::DefiDsrHistory => Gate::premium_module(Module::MakerdaoDsr),
            Section::DefiMakerdaoVaults => Gate::module(Module::MakerdaoVaults),
            Section::DefiMakerdaoVaultDetails => Gate::premium_module(Module::MakerdaoVaults),
            Section::DefiAaveBalances => Gate::module(Module::Aave),
            Section::DefiAaveHistory => Gate::premium_module(Module::Aave),
            Section::DefiCompoundBalances => Gate::module(Module::Compound),
            Section::DefiCompoundHistory => Gate::premium_module(Module::Compound),
            Section::DefiYearnVaultsBalances => Gate::module(Module::Yearn),
            Section::DefiYearnVaultsHistory => Gate::premium_module(Module::Yearn),
            Section::DefiYearnVaultsV2Balances => Gate::module(Module::YearnV2),
            Section::DefiYearnVaultsV2History => Gate::premium_module(Module::YearnV2),
            Section::DefiLiquityBalances => Gate::module(Module::Liquity),
            Section::DefiLiquityEvents => Gate::premium_module(Module::Liquity),
            Section::DefiUniswapBalances => Gate::module(Module::Uniswap),
            Section::DefiUniswapTrades | Section::DefiUniswapEvents => {
                Gate::premium_module(Module::Uniswap)
            }
            Section::DefiOverview | Section::DefiLending | Section::DefiBorrowing => Gate::OPEN,
            Section::DefiLendingHistory | Section::DefiBorrowingHistory => Gate::premium(),
        }
    }

    /// The value a dataset holds before its first load and after a purge.
    pub fn empty_dataset(&self) -> Value {
        match self {
            Section::DefiDsrBalances => json!({ "current_dsr": "0", "balances": {} }),
            Section::DefiMakerdaoVaults | Section::DefiMakerdaoVaultDetails => json!([]),
            Section::DefiCompoundHistory => json!({
                "events": [],
                "debt_loss": {},
                "interest_profit": {},
                "rewards": {},
                "liquidation_profit": {}
            }),
            _ => json!({}),
        }
    }

    /// Snake-case identifier, as used in configuration and on the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::DefiBalances => "defi_balances",
            Section::DefiAirdrops => "defi_airdrops",
            Section::DefiDsrBalances => "defi_dsr_balances",
            Section::DefiDsrHistory => "defi_dsr_history",
            Section::DefiMakerdaoVaults => "defi_makerdao_vaults",
            Section::DefiMakerdaoVaultDetails => "defi_makerdao_vault_details",
            Section::DefiAaveBalances => "defi_aave_balances",
            Section::DefiAaveHistory => "defi_aave_history",
            Section::DefiCompoundBalances => "defi_compound_balances",
            Section::DefiCompoundHistory => "defi_compound_history",
            Section::DefiYearnVaultsBalances => "defi_yearn_vaults_balances",
            Section::DefiYearnVaultsHistory => "defi_yearn_vaults_history",
            Section::DefiYearnVaultsV2Balances => "defi_yearn_vaults_v2_balances",
            Section::DefiYearnVaultsV2History => "defi_yearn_vaults_v2_history",
            Section::DefiLiquityBalances => "defi_liquity_balances",
            Section::DefiLiquityEvents => "defi_liquity_events",
            Section::DefiUniswapBalances => "defi_uniswap_balances",
            Section::DefiUniswapTrades => "defi_uniswap_trades",
            Section::DefiUniswapEvents => "defi_uniswap_events",
            Section::DefiOverview => "defi_overview",
            Section::DefiLending => "defi_lending",
            Section::DefiLendingHistory => "defi_lending_history",
            Section::DefiBorrowing => "defi_borrowing",
            Section::DefiBorrowingHistory => "defi_borrowing_history",
        }
    }

    /// Human-readable name used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Section::DefiBalances => "DeFi balances",
            Section::DefiAirdrops => "Airdrops",
            Section::DefiDsrBalances => "DSR balances",
            Section::DefiDsrHistory => "DSR history",
            Section::DefiMakerdaoVaults => "MakerDAO vaults",
            Section::DefiMakerdaoVaultDetails => "MakerDAO vault details",
            Section::DefiAaveBalances => "Aave balances",
            Section::DefiAaveHistory => "Aave history",
            Section::DefiCompoundBalances => "Compound balances",
            Section::DefiCompoundHistory => "Compound history",
            Section::DefiYearnVaultsBalances => "Yearn vaults balances",
            Section::DefiYearnVaultsHistory => "Yearn vaults history",
            Section::DefiYearnVaultsV2Balances => "Yearn v2 vaults balances",
            Section::DefiYearnVaultsV2History => "Yearn v2 vaults history",
            Section::DefiLiquityBalances => "Liquity balances",
            Section::DefiLiquityEvents => "Liquity events",
            Section::DefiUniswapBalances => "Uniswap balances",
            Section::DefiUniswapTrades => "Uniswap trades",
            Section::DefiUniswapEvents => "Uniswap events",
            Section::DefiOverview => "DeFi overview",
            Section::DefiLending => "Lending",
            Section::DefiLendingHistory => "Lending history",
            Section::DefiBorrowing => "Borrowing",
            Section::DefiBorrowingHistory => "Borrowing history",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == wanted)
            .ok_or(ParseNameError::UnknownSection(s.to_string()))
    }
}
