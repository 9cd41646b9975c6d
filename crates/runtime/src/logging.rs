//! Log output setup
//!
//! The core logs through `tracing`; nothing is printed until a subscriber
//! is installed. `RUST_LOG` overrides the default filter.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "luaw=info,luaw_core=info";

static INIT: Once = Once::new();

/// Install the stderr subscriber. Later calls do nothing.
pub fn init() {
    init_with(DEFAULT_FILTER);
}

pub fn init_with(default_filter: &str) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        // another subscriber may already be set (tests, embedding hosts)
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
