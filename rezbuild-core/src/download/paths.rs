//! Path resolution for the download subsystem.
//!
//! The download cache is stored under the OS temp directory:
//!
//! - Linux: `/tmp/rezbuild_utils-downloadcache/`
//! - macOS: `/var/folders/.../rezbuild_utils-downloadcache/`
//! - Windows: `C:\Users\<User>\AppData\Local\Temp\rezbuild_utils-downloadcache\`

use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use url::Url;

/// Directory name of the download cache under the OS temp folder.
const CACHE_DIR_NAME: &str = "rezbuild_utils-downloadcache";

/// File name used when a URL has no usable last path segment.
pub const FALLBACK_FILE_NAME: &str = "download";

/// Returns the default download cache root.
///
/// Path: `{temp}/rezbuild_utils-downloadcache/`
pub fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join(CACHE_DIR_NAME)
}

/// Returns the file name a download from `url` is stored under.
///
/// The last non-empty path segment of the URL is used, so archive extensions
/// survive the download. Falls back to [`FALLBACK_FILE_NAME`].
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            percent_decode(segment)
                .replace(['/', '\\'], "_")
                .trim()
                .to_string()
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Percent-decodes a path segment; invalid UTF-8 is replaced, invalid escapes are kept.
fn percent_decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
