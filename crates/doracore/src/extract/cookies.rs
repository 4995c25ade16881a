//! Cookie jar plumbing for sources that need an authenticated session
//! (private Instagram posts, age-gated YouTube videos).

use std::path::{Path, PathBuf};

/// Path to a Netscape-format cookies file passed straight through to the
/// underlying extractor binary's `--cookies` flag.
#[derive(Debug, Clone)]
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cookie_file_reports_not_existing() {
        let jar = CookieJar::from_path("/nonexistent/cookies.txt");
        assert!(!jar.exists());
    }
}
