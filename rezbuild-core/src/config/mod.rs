//! Build configuration.
//!
//! Everything the helpers need from the rez build environment is read once,
//! at the boundary, into plain structs:
//!
//! - [`BuildContext`]: project identity and source/install paths
//! - [`DownloadSettings`]: download cache location and the cache kill-switch

pub mod context;
pub mod settings;

pub use context::{
    BuildContext, ENV_BUILD_INSTALL, ENV_INSTALL_PATH, ENV_PROJECT_NAME, ENV_PROJECT_VERSION,
    ENV_SOURCE_PATH,
};
pub use settings::{DownloadSettings, ENV_CACHE_DIR, ENV_DISABLE_CACHE};
