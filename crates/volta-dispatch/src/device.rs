//! Device roles and the dispatch problem configuration
//!
//! Every topology symbol maps to the kind of hardware behind it. Roles
//! carry the per-device constants of the optimization: box limits and a
//! price profile for the utility feeder, the state-of-charge envelope
//! for storage, and fixed per-step profiles for loads and renewable
//! sources.

use std::collections::BTreeMap;

use volta_core::Symbol;
use volta_wire::DISPATCH_STEPS;

/// Grid feeder injection limits
pub const GRID_P_MIN: f64 = 0.0;
pub const GRID_P_MAX: f64 = 20.0;

/// Storage injection limits
pub const STORAGE_P_MIN: f64 = -5.0;
pub const STORAGE_P_MAX: f64 = 5.0;

/// Per-step energy price paid at the feeder
pub const PRICE_PROFILE: [f64; DISPATCH_STEPS] = [5.27, 15.599, 15.599];

/// What a symbol's attached hardware contributes to the dispatch problem
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceRole {
    /// Utility feeder; imports energy at the price profile
    Grid {
        p_min: f64,
        p_max: f64,
        price: [f64; DISPATCH_STEPS],
    },
    /// Storage bank with a state-of-charge envelope
    Storage {
        p_min: f64,
        p_max: f64,
        e_init: [f64; DISPATCH_STEPS],
        e_full: [f64; DISPATCH_STEPS],
    },
    /// Fixed consumption profile
    Load { demand: [f64; DISPATCH_STEPS] },
    /// Photovoltaic array with a fixed forecast output
    Solar { output: [f64; DISPATCH_STEPS] },
    /// Wind turbine with a fixed forecast output
    Wind { output: [f64; DISPATCH_STEPS] },
    /// No dispatchable hardware; relays gossip only
    Passive,
}

impl DeviceRole {
    /// Default feeder parameters
    pub fn grid() -> Self {
        DeviceRole::Grid {
            p_min: GRID_P_MIN,
            p_max: GRID_P_MAX,
            price: PRICE_PROFILE,
        }
    }

    /// Default storage parameters with the given envelope
    pub fn storage(e_init: [f64; DISPATCH_STEPS], e_full: [f64; DISPATCH_STEPS]) -> Self {
        DeviceRole::Storage {
            p_min: STORAGE_P_MIN,
            p_max: STORAGE_P_MAX,
            e_init,
            e_full,
        }
    }

    /// Initial imbalance estimate contributed by this device
    pub fn seed(&self) -> [f64; DISPATCH_STEPS] {
        match self {
            DeviceRole::Load { demand } => *demand,
            DeviceRole::Solar { output } => *output,
            DeviceRole::Wind { output } => *output,
            _ => [0.0; DISPATCH_STEPS],
        }
    }
}

/// Tunables and device bindings for one dispatch run.
///
/// [`DispatchConfig::baseline`] reproduces the reference eight-device
/// network; tests and deployments override per symbol with
/// [`DispatchConfig::with_device`].
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Gradient step size
    pub eta: f64,
    /// Quadratic penalty coefficient
    pub rho: f64,
    /// Length of one dispatch step in seconds
    pub delta_time: f64,
    /// Neighbour estimates are mixed in every this many iterations
    pub consensus_period: u32,
    /// Gossip stops after this many iterations
    pub max_iterations: u32,
    /// Role of each topology symbol
    pub devices: BTreeMap<Symbol, DeviceRole>,
}

impl DispatchConfig {
    /// The reference network: one feeder, three storage banks, two
    /// loads, one photovoltaic array, one wind turbine.
    pub fn baseline() -> Self {
        let mut devices = BTreeMap::new();
        devices.insert(Symbol::new("1"), DeviceRole::grid());
        devices.insert(
            Symbol::new("3"),
            DeviceRole::Load {
                demand: [4.3127, 4.2549, 4.2343],
            },
        );
        devices.insert(
            Symbol::new("4"),
            DeviceRole::storage([1.0, 1.0, 1.0], [5.0, 5.0, 5.0]),
        );
        devices.insert(
            Symbol::new("6"),
            DeviceRole::Solar {
                output: [3.8, 2.5, 1.3],
            },
        );
        devices.insert(
            Symbol::new("7"),
            DeviceRole::storage([1.5, 1.5, 1.5], [10.0, 10.0, 10.0]),
        );
        devices.insert(
            Symbol::new("9"),
            DeviceRole::Wind {
                output: [1.8, 1.9, 2.1],
            },
        );
        devices.insert(
            Symbol::new("10"),
            DeviceRole::storage([0.5, 0.5, 0.5], [5.0, 5.0, 5.0]),
        );
        devices.insert(
            Symbol::new("11"),
            DeviceRole::Load {
                demand: [8.8, 8.6, 8.8],
            },
        );
        DispatchConfig {
            eta: 0.5,
            rho: 1.5,
            delta_time: 15.0,
            consensus_period: 5,
            max_iterations: 5000,
            devices,
        }
    }

    /// Start from tunables only, with no devices bound
    pub fn bare() -> Self {
        DispatchConfig {
            devices: BTreeMap::new(),
            ..Self::baseline()
        }
    }

    /// Bind or replace one symbol's role
    pub fn with_device(mut self, symbol: impl Into<Symbol>, role: DeviceRole) -> Self {
        self.devices.insert(symbol.into(), role);
        self
    }

    /// Override the iteration cap
    pub fn with_max_iterations(mut self, cap: u32) -> Self {
        self.max_iterations = cap;
        self
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::baseline()
    }
}
