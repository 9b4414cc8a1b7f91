//! Prefix index over file paths, used for autocompletion.

use std::collections::BTreeMap;

use super::entities::File;

/// Sorted map of path -> position in the Files sequence.
///
/// Prefix lookups are a range scan over the sorted keys; results are returned
/// in Files order so suggestions match what the files panel shows.
#[derive(Clone, Debug, Default)]
pub struct PathIndex {
    paths: BTreeMap<String, usize>,
}

impl PathIndex {
    pub fn from_files(files: &[File]) -> Self {
        let mut paths = BTreeMap::new();
        for (pos, file) in files.iter().enumerate() {
            paths.entry(file.path.clone()).or_insert(pos);
        }
        Self { paths }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains_key(path)
    }

    /// Paths starting with `prefix`, in Files order, at most `limit` of them.
    pub fn with_prefix(&self, prefix: &str, limit: usize) -> Vec<String> {
        let mut hits: Vec<(usize, &String)> = self
            .paths
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, pos)| (*pos, path))
            .collect();
        hits.sort_by_key(|(pos, _)| *pos);
        hits.into_iter()
            .take(limit)
            .map(|(_, path)| path.clone())
            .collect()
    }
}
