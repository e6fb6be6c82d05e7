//! Eligibility rules applied to every path the scanner discovers.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    NotAFile,
    Protected,
    Excluded,
    TooSmall,
    BudgetExhausted,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::NotAFile => "not a regular file",
            Rejection::Protected => "protected path",
            Rejection::Excluded => "excluded by pattern",
            Rejection::TooSmall => "below minimum size",
            Rejection::BudgetExhausted => "scan limit reached",
        }
    }
}

/// Protected prefixes. Plain entries protect the path and all descendants;
/// entries with glob metacharacters are matched against the path and each
/// of its ancestors. Paths are checked both as given and at their resolved
/// location, so a symlink cannot reach into a protected tree.
#[derive(Debug, Clone)]
pub struct ProtectedPaths {
    prefixes: Vec<PathBuf>,
    globs: GlobSet,
}

impl Default for ProtectedPaths {
    fn default() -> Self {
        Self {
            prefixes: Vec::new(),
            globs: GlobSet::empty(),
        }
    }
}

impl ProtectedPaths {
    pub fn new(entries: &[String]) -> anyhow::Result<Self> {
        let mut prefixes = Vec::new();
        let mut builder = GlobSetBuilder::new();
        for entry in entries {
            if entry.contains(&['*', '?', '['][..]) {
                builder.add(Glob::new(entry)?);
            } else {
                let prefix = PathBuf::from(entry);
                if let Ok(real) = fs::canonicalize(&prefix) {
                    if real != prefix {
                        prefixes.push(real);
                    }
                }
                prefixes.push(prefix);
            }
        }
        Ok(Self {
            prefixes,
            globs: builder.build()?,
        })
    }

    pub fn is_protected(&self, path: &Path) -> bool {
        if self.matches(path) {
            return true;
        }
        match fs::canonicalize(path) {
            Ok(real) if real != path => self.matches(&real),
            _ => false,
        }
    }

    fn matches(&self, path: &Path) -> bool {
        if self.prefixes.iter().any(|p| path.starts_with(p)) {
            return true;
        }
        if self.globs.is_empty() {
            return false;
        }
        path.ancestors()
            .take_while(|a| !a.as_os_str().is_empty())
            .any(|a| self.globs.is_match(a))
    }
}

/// Counts admitted records against the configured maximum. Shared by
/// reference for the lifetime of one run.
#[derive(Debug)]
pub struct ScanBudget {
    admitted: AtomicUsize,
    max: usize,
}

impl ScanBudget {
    pub fn new(max: usize) -> Self {
        Self {
            admitted: AtomicUsize::new(0),
            max,
        }
    }

    /// Claims one slot. Returns false once `max` records have been admitted.
    pub fn try_admit(&self) -> bool {
        self.admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn is_exhausted(&self) -> bool {
        self.admitted.load(Ordering::SeqCst) >= self.max
    }

    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[derive(Debug, Clone)]
pub struct PathFilter {
    protected: ProtectedPaths,
    excludes: GlobSet,
    min_size: u64,
    budget: Arc<ScanBudget>,
}

impl PathFilter {
    pub fn new(
        protected: ProtectedPaths,
        excludes: &[String],
        min_size_kb: u64,
        budget: Arc<ScanBudget>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            protected,
            excludes: build_globset(excludes)?,
            min_size: min_size_kb.saturating_mul(1024),
            budget,
        })
    }

    pub fn protected(&self) -> &ProtectedPaths {
        &self.protected
    }

    pub fn budget(&self) -> &Arc<ScanBudget> {
        &self.budget
    }

    /// Whether a directory may be descended into.
    pub fn should_descend(&self, dir: &Path) -> bool {
        !self.protected.is_protected(dir) && !self.excludes.is_match(dir)
    }

    /// Checks one file. Admitting it consumes a slot of the shared budget.
    pub fn check(&self, path: &Path, meta: &Metadata) -> Result<(), Rejection> {
        if !meta.is_file() {
            return Err(Rejection::NotAFile);
        }
        if self.protected.is_protected(path) {
            return Err(Rejection::Protected);
        }
        if self.excludes.is_match(path) {
            return Err(Rejection::Excluded);
        }
        if meta.len() < self.min_size {
            return Err(Rejection::TooSmall);
        }
        if !self.budget.try_admit() {
            return Err(Rejection::BudgetExhausted);
        }
        Ok(())
    }

    pub fn is_eligible(&self, path: &Path, meta: &Metadata) -> bool {
        self.check(path, meta).is_ok()
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, bytes: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn protection_is_component_wise() {
        let p = ProtectedPaths::new(&["/tmp/app".to_string()]).unwrap();
        assert!(p.is_protected(Path::new("/tmp/app")));
        assert!(p.is_protected(Path::new("/tmp/app/cache/x.log")));
        assert!(!p.is_protected(Path::new("/tmp/application/x.log")));
    }

    #[test]
    fn glob_protection_matches_ancestors() {
        let p = ProtectedPaths::new(&["/Library/Caches/com.apple.*".to_string()]).unwrap();
        assert!(p.is_protected(Path::new("/Library/Caches/com.apple.Safari/Cache.db")));
        assert!(!p.is_protected(Path::new("/Library/Caches/com.google.Chrome/x")));
    }

    #[test]
    fn filters_small_protected_and_excluded_files() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("app/cache.log");
        let small = dir.path().join("app/config.json");
        let kept = dir.path().join("keep/big.log");
        let plist = dir.path().join("app/prefs.plist");
        write(&big, 2 * 1024 * 1024);
        write(&small, 1024);
        write(&kept, 2 * 1024 * 1024);
        write(&plist, 2 * 1024 * 1024);

        let protected =
            ProtectedPaths::new(&[dir.path().join("keep").to_string_lossy().into_owned()])
                .unwrap();
        let filter = PathFilter::new(
            protected,
            &["**/*.plist".to_string()],
            1024,
            Arc::new(ScanBudget::new(100)),
        )
        .unwrap();

        let meta = |p: &Path| fs::metadata(p).unwrap();
        assert_eq!(filter.check(&big, &meta(&big)), Ok(()));
        assert_eq!(filter.check(&small, &meta(&small)), Err(Rejection::TooSmall));
        assert_eq!(filter.check(&kept, &meta(&kept)), Err(Rejection::Protected));
        assert_eq!(filter.check(&plist, &meta(&plist)), Err(Rejection::Excluded));
        assert_eq!(
            filter.check(dir.path(), &meta(dir.path())),
            Err(Rejection::NotAFile)
        );
        assert_eq!(filter.budget().admitted(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_into_protected_trees_are_protected() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault");
        let secret = vault.join("secret.log");
        write(&secret, 2 * 1024 * 1024);
        let link = dir.path().join("cache").join("app").join("link");
        fs::create_dir_all(link.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&vault, &link).unwrap();

        let protected = ProtectedPaths::new(&[vault.to_string_lossy().into_owned()]).unwrap();
        assert!(protected.is_protected(&link));
        assert!(protected.is_protected(&link.join("secret.log")));
        assert!(!protected.is_protected(&dir.path().join("cache")));

        let filter = PathFilter::new(protected, &[], 1, Arc::new(ScanBudget::new(10))).unwrap();
        let via_link = link.join("secret.log");
        let meta = fs::metadata(&via_link).unwrap();
        assert!(!filter.should_descend(&link));
        assert_eq!(filter.check(&via_link, &meta), Err(Rejection::Protected));
    }

    #[test]
    fn budget_stops_admitting_at_max() {
        let budget = ScanBudget::new(2);
        assert!(budget.try_admit());
        assert!(!budget.is_exhausted());
        assert!(budget.try_admit());
        assert!(budget.is_exhausted());
        assert!(!budget.try_admit());
        assert_eq!(budget.admitted(), 2);
    }
}
