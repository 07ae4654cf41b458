mod backfill;
mod refresh;
mod tracker;

pub use backfill::*;
pub use refresh::*;
pub use tracker::JobTracker;
