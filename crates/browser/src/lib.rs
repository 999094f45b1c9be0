//! CDP-backed browser control for the tabbridge HTTP surface.
//!
//! The [`Bridge`] owns one browser-level CDP connection and a registry of
//! per-tab sessions. Snapshots flatten the accessibility tree into a compact
//! node list addressed by refs (`e0`, `e1`, ...); actions resolve those refs
//! back to backend DOM nodes through the per-tab ref cache.

pub mod actions;
pub mod bridge;
pub mod cdp;
pub mod diff;
pub mod launcher;
pub mod locks;
pub mod navigate;
pub mod snapshot;
pub mod state;

pub use bridge::{Bridge, RefCache, TabSession, TargetInfo};
pub use cdp::CdpConnection;
pub use diff::{diff_snapshot, SnapshotDiff};
pub use locks::{LockEntry, LockManager};
pub use snapshot::{build_snapshot, format_snapshot_text, parse_ax_nodes, AxNode, RawAxNode};
