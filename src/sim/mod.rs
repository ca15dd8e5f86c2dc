//! Demo collaborators: an orbiting point cloud and the fetcher that packs it.
//!
//! Used by the `vbostream` binary so the server can run without an embedding
//! application. Real deployments supply their own [`Stepper`] and [`Fetcher`].
//!
//! [`Stepper`]: crate::tick::Stepper
//! [`Fetcher`]: crate::streaming::Fetcher

pub mod compress;
pub mod fetcher;
pub mod orbit;

pub use compress::{compress, decompress};
pub use fetcher::{OrbitFetcher, KNOWN_BUFFERS};
pub use orbit::{OrbitSettings, OrbitState, OrbitStepper, MAX_POINTS};
