use std::path::Path;

use glob::Pattern;

/// A compiled set of glob exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
	patterns: Vec<Pattern>,
}

impl ExcludeSet {
	/// Compile `patterns` (as given in `DEFAULT.exclude_patterns`). Invalid
	/// globs are dropped with a warning rather than failing the whole run.
	pub fn new<I, S>(patterns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let compiled = patterns
			.into_iter()
			.filter_map(|p| match Pattern::new(p.as_ref()) {
				Ok(pattern) => Some(pattern),
				Err(err) => {
					tracing::warn!(pattern = p.as_ref(), %err, "ignoring invalid exclude pattern");
					None
				}
			})
			.collect();
		Self { patterns: compiled }
	}

	/// An empty pattern list means "accept all".
	pub fn should_exclude(&self, rel_path: &Path) -> bool {
		if self.patterns.is_empty() {
			return false;
		}

		let full = rel_path.to_string_lossy();
		let basename = rel_path
			.file_name()
			.map(|n| n.to_string_lossy())
			.unwrap_or_default();

		for pattern in &self.patterns {
			if pattern.matches(&full) || pattern.matches(&basename) {
				return true;
			}
			for ancestor in rel_path.iter() {
				if pattern.matches(&ancestor.to_string_lossy()) {
					return true;
				}
			}
		}
		false
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	#[test]
	fn empty_patterns_accept_all() {
		let set = ExcludeSet::new(Vec::<&str>::new());
		assert!(!set.should_exclude(&PathBuf::from("anything.txt")));
	}

	#[test]
	fn matches_basename() {
		let set = ExcludeSet::new(["*.tmp"]);
		assert!(set.should_exclude(&PathBuf::from("a/b/c.tmp")));
		assert!(!set.should_exclude(&PathBuf::from("a/b/c.txt")));
	}

	#[test]
	fn matches_ancestor_segment() {
		let set = ExcludeSet::new(["node_modules"]);
		assert!(set.should_exclude(&PathBuf::from("proj/node_modules/pkg/index.js")));
	}

	#[test]
	fn matches_full_relative_path() {
		let set = ExcludeSet::new(["logs/*.log"]);
		assert!(set.should_exclude(&PathBuf::from("logs/today.log")));
		assert!(!set.should_exclude(&PathBuf::from("other/today.log")));
	}
}
