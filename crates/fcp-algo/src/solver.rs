//! Process-wide solver capability flag.
//!
//! The MILP backend is selected once at startup; every run then checks the
//! flag and picks the exact model or the greedy fallback. The flag is
//! intentionally global: backend licensing/initialization is a process
//! concern, not a per-run one.

use std::sync::OnceLock;

use tracing::info;

static ENGINE_ACTIVE: OnceLock<bool> = OnceLock::new();

fn detect() -> bool {
    let compiled = cfg!(feature = "solver-highs");
    let forced_greedy = std::env::var("FCP_SOLVER")
        .map(|v| v.eq_ignore_ascii_case("greedy"))
        .unwrap_or(false);
    compiled && !forced_greedy
}

/// Initializes the solver capability flag, logging the selection.
/// Safe to call more than once; the first call wins.
pub fn init_solver() -> bool {
    let active = *ENGINE_ACTIVE.get_or_init(detect);
    if active {
        info!("MILP solver backend active");
    } else {
        info!("MILP solver backend unavailable, greedy fallback selected");
    }
    active
}

/// True when the exact MILP backend should be used for this process.
pub fn engine_available() -> bool {
    *ENGINE_ACTIVE.get_or_init(detect)
}
