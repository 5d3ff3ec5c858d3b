//!  Everything the daemon keeps on disk lives in the application directory:
//!   - `snapshots/` running and dated totals, see [snapshot_store::SnapshotStore].
//!   - `activity/` one JSON line per transition event, one file per local day, see
//!     [activity_log::ActivityLogImpl].
//!   - `timing_state.json` when reports were delivered, see [timing_state::TimingStateStore].
//!
//!  Files that fail to parse are renamed to `<file>.corrupted.<unix seconds>` and treated as
//!  absent.

pub mod activity_log;
pub mod entities;
pub mod snapshot_store;
pub mod timing_state;
