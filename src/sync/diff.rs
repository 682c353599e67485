use std::collections::{BTreeMap, BTreeSet};

/// Set comparison between a remote listing and what is stored locally.
/// All outputs are sorted and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    /// Present remotely, missing locally.
    pub new: Vec<String>,
    /// Present locally, gone remotely.
    pub removed: Vec<String>,
    pub common: Vec<String>,
}

impl SetDiff {
    pub fn compute<R, L>(remote: R, local: L) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        L: IntoIterator,
        L::Item: AsRef<str>,
    {
        let remote: BTreeSet<String> = remote.into_iter().map(|s| s.as_ref().to_string()).collect();
        let local: BTreeSet<String> = local.into_iter().map(|s| s.as_ref().to_string()).collect();

        Self {
            new: remote.difference(&local).cloned().collect(),
            removed: local.difference(&remote).cloned().collect(),
            common: remote.intersection(&local).cloned().collect(),
        }
    }
}

/// Tag comparison that also detects tags whose remote digest moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub new: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl TagDiff {
    /// `resolve` maps a tag to its current remote digest. A tag that cannot be
    /// resolved is counted as changed so it gets refetched.
    pub fn compute<R, F>(remote: R, local: &BTreeMap<String, String>, mut resolve: F) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        F: FnMut(&str) -> Option<String>,
    {
        let base = SetDiff::compute(remote, local.keys());
        let mut changed = Vec::new();
        let mut unchanged = Vec::new();

        for tag in base.common {
            match resolve(&tag) {
                Some(digest) if local.get(&tag) == Some(&digest) => unchanged.push(tag),
                _ => changed.push(tag),
            }
        }

        Self {
            new: base.new,
            removed: base.removed,
            changed,
            unchanged,
        }
    }

    /// Tags that need their manifest fetched.
    pub fn to_fetch(&self) -> impl Iterator<Item = &str> {
        self.new.iter().chain(&self.changed).map(String::as_str)
    }
}
