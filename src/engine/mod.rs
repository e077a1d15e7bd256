//! Decision engine and execution path
//!
//! Edge and sizing, cluster-aware ranking, the ordered risk gate, paper and
//! live execution, and the resolution/adverse-move pollers.

pub mod decision;
pub mod execution;
pub mod ranker;
pub mod resolution;

pub use decision::{
    calculate_edge, check_monk_mode, determine_side, kelly_size, scan_mode, GateBlock, ScanMode,
};
pub use execution::{execute_candidate, simulate_execution, ExecutionResult, ExecutionStyle};
pub use ranker::{detect_clusters, keyword_jaccard, select_trades};
pub use resolution::{calculate_pnl, hypothetical_pnl, resolve_open_trades, sweep_adverse_moves};
