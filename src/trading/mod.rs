pub mod performance;
pub mod pnl;
pub mod tracker;

pub use performance::PerformanceSummary;
pub use pnl::{compute_pnl, Pnl};
pub use tracker::{
    detect_exit, AlertLink, ClosedPosition, EntryFill, ExitCandidate, ManualEntry, PositionTracker,
};
