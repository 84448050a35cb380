//! GLINT Loader - Progressive Loading
//!
//! Shows large, media-heavy lists without blocking the view:
//!
//! - [`IncrementalFetcher`] renders the cached list at once and merges in
//!   only what is newer than the newest item held.
//! - [`SequentialPreloader`] loads heavy payloads one at a time in index
//!   order, with on-demand jump-ahead and cooperative abort.
//! - [`LoadGate`] flips once every item is loaded; [`GatedAction`] runs the
//!   expensive downstream operation only after that.
//! - [`ViewerSession`] ties the three to the lifetime of one open view.
//!
//! Progress is published as [`PreloadEvent`]s on a broadcast channel; the
//! engine never calls presentation code.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(TieredCache::from_settings(&config.cache)?);
//! let fetcher = IncrementalFetcher::from_settings(items_api, cache.clone(), &config.loader);
//! let session = ViewerSession::open(parent, &fetcher, shots_api, cache.clone(), &config.loader).await?;
//!
//! let mut events = session.subscribe();
//! session.preloader().request_index(17).await?;  // user scrolled ahead
//!
//! session.gate().wait_complete().await?;
//! let report = analysis.invoke(session.gate(), ActionOptions::default()).await?;
//! ```

pub mod action;
pub mod events;
pub mod fetcher;
pub mod gate;
pub mod namespaces;
pub mod preloader;
pub mod session;
pub mod source;
pub mod state;

pub use action::{ActionOptions, GatedAction};
pub use events::PreloadEvent;
pub use fetcher::{merge_newer, merge_older, IncrementalFetcher};
pub use gate::LoadGate;
pub use namespaces::{
    analysis_key, analysis_namespace, capture_key, captures_namespace, invalidate_related,
    list_key, list_namespace,
};
pub use preloader::SequentialPreloader;
pub use session::ViewerSession;
pub use source::{DependentAction, ItemSource, PayloadSource};
pub use state::{ItemStatus, JumpOutcome, LoadSnapshot, LoadState, RunPhase};
