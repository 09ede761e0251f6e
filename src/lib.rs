//! Splitsmart is the expense-splitting core of a group bill tracker: it turns
//! expenses into per-member shares, recomputes net balances and reduces them to
//! a short list of settling transfers.
//!
//! Amounts cross the API as [`rust_decimal::Decimal`] and are split in integer
//! minor units, so shares always add up to the expense to the last cent.

pub mod balance;
pub mod book;
pub mod config;
pub mod error;
pub mod exchange;
pub mod money;
pub mod schemas;
pub mod split;

use std::sync::Once;

pub use balance::{compute_balances, group_balances, Balances};
pub use book::SplitBook;
pub use config::EngineConfig;
pub use error::{BookError, ConfigError, InvalidSplitError, UnbalancedGroupError};
pub use exchange::{
    apply_settlements, pairwise_settlements, plan_settlements, reduce_to_settlements,
};
pub use money::Money;
pub use split::{compute_split, Shares, SplitCalculator};

static INIT_TRACING: Once = Once::new();

/// Installs a global fmt subscriber filtered by `RUST_LOG`, with
/// `splitsmart=info` as the default directive.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("splitsmart=info"));

        // Another subscriber may already be installed by the host.
        if fmt().with_env_filter(filter).try_init().is_ok() {
            tracing::info!("splitsmart tracing initialized.");
        }
    });
}
