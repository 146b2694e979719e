mod extractor;
mod peaks;
mod rate;
mod roi;
mod session;
mod signal;
mod spectrum;
mod tracking;

pub use rate::RunSummary;
pub use roi::{FixedRegion, InteractiveSelector, RegionSelector, Roi};
pub use session::{spawn_session, Session};
pub use spectrum::Spectrum;
