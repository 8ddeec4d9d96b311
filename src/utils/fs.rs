use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Per-file size cap for the text safety heuristic.
const MAX_TEXT_FILE_BYTES: u64 = 5_000_000;
/// How many leading bytes to probe for NUL when classifying a file.
const NUL_PROBE_BYTES: usize = 8192;

/// Extensions treated as text without probing the content.
const TEXT_EXTENSIONS: &[&str] = &[
    "c", "cc", "cfg", "conf", "cpp", "cs", "css", "csv", "go", "h", "hpp", "html", "ini", "java",
    "js", "json", "jsx", "kt", "lock", "lua", "md", "php", "proto", "py", "rb", "rs", "rst", "sh",
    "sql", "svg", "swift", "toml", "ts", "tsx", "txt", "xml", "yaml", "yml", "zig",
];

/// Compiled root `.gitignore` patterns.
///
/// Supported semantics: glob patterns, directory suffix `/`, root anchor `/`,
/// and `**`. Negation (`!pattern`) and nested `.gitignore` files are not
/// supported; negated lines are skipped with a warning.
pub struct GitignoreRules {
    set: GlobSet,
}

impl GitignoreRules {
    /// Load and compile `<root>/.gitignore`. Returns `None` when the file is
    /// absent or contains no usable patterns.
    pub fn load(root: &Path) -> Option<Self> {
        let raw = fs::read_to_string(root.join(".gitignore")).ok()?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut count = 0;
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('!') {
                warn!("gitignore: negation patterns are not supported, skipping '{line}'");
                continue;
            }
            let (anchored, pattern) = match line.strip_prefix('/') {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            let dir_only = pattern.ends_with('/');
            let pattern = pattern.trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }

            // Every pattern excludes the named entry; directory patterns (and
            // plain names, which gitignore applies to directories too) also
            // exclude everything beneath it.
            let mut globs = Vec::new();
            if anchored {
                globs.push(pattern.to_string());
                globs.push(format!("{pattern}/**"));
            } else {
                globs.push(format!("**/{pattern}"));
                globs.push(pattern.to_string());
                if dir_only || !pattern.contains('/') {
                    globs.push(format!("**/{pattern}/**"));
                    globs.push(format!("{pattern}/**"));
                }
            }
            for g in globs {
                match Glob::new(&g) {
                    Ok(glob) => {
                        builder.add(glob);
                        count += 1;
                    }
                    Err(e) => warn!("gitignore: invalid pattern '{g}': {e}"),
                }
            }
        }
        if count == 0 {
            return None;
        }
        match builder.build() {
            Ok(set) => Some(Self { set }),
            Err(e) => {
                warn!("gitignore: failed to compile patterns: {e}");
                None
            }
        }
    }

    /// Whether the path (relative to the gitignore's root) is excluded.
    pub fn is_ignored(&self, rel: &Path) -> bool {
        self.set.is_match(rel)
    }
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Classify a file as plausibly textual: known extension, or no NUL in the
/// leading bytes and size under the per-file cap.
pub fn is_text_file(path: &Path) -> bool {
    if has_text_extension(path) {
        return true;
    }
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if !meta.is_file() || meta.len() >= MAX_TEXT_FILE_BYTES {
        return false;
    }
    let mut buf = [0u8; NUL_PROBE_BYTES];
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    match file.read(&mut buf) {
        Ok(n) => !buf[..n].contains(&0),
        Err(_) => false,
    }
}

/// Walk the given paths and return a sorted, de-duplicated list of absolute
/// file paths selected as plausibly textual.
///
/// Missing paths are skipped with a warning. Directories recurse
/// deterministically and honor the directory's root `.gitignore`. With
/// `skip_safety_check` (used for attachments), the text heuristic is bypassed
/// and every regular file is returned.
pub fn gather_file_paths(items: &[PathBuf], skip_safety_check: bool) -> Vec<PathBuf> {
    let mut seen: BTreeSet<PathBuf> = BTreeSet::new();

    for item in items {
        let path = match item.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                warn!("Skipping path {}: {e}", item.display());
                continue;
            }
        };

        if path.is_dir() {
            let rules = GitignoreRules::load(&path);
            let walker = WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    let rel = match entry.path().strip_prefix(&path) {
                        Ok(r) if r.as_os_str().is_empty() => return true,
                        Ok(r) => r,
                        Err(_) => return true,
                    };
                    if entry.file_name().to_string_lossy() == ".git" {
                        return false;
                    }
                    rules.as_ref().is_none_or(|r| !r.is_ignored(rel))
                });
            for entry in walker {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("Skipping unreadable entry: {e}");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if skip_safety_check || is_text_file(entry.path()) {
                    seen.insert(entry.path().to_path_buf());
                }
            }
        } else if path.is_file() && (skip_safety_check || is_text_file(&path)) {
            seen.insert(path);
        }
    }

    debug!("Gathered {} files", seen.len());
    seen.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn gathers_sorted_deduplicated_text_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.rs", b"fn main() {}");
        write(dir.path(), "a.txt", b"hello");
        write(dir.path(), "sub/c.md", b"# doc");

        let got = gather_file_paths(
            &[dir.path().to_path_buf(), dir.path().join("a.txt")],
            false,
        );
        assert_eq!(got.len(), 3);
        let names: Vec<_> = got
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.rs", "c.md"]);
    }

    #[test]
    fn skips_binary_without_known_extension() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "blob.bin", &[0u8, 1, 2, 3]);
        write(dir.path(), "ok.dat", b"plain text payload");

        let got = gather_file_paths(&[dir.path().to_path_buf()], false);
        let names: Vec<_> = got
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["ok.dat"]);
    }

    #[test]
    fn safety_check_bypass_includes_binaries() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "blob.bin", &[0u8, 1, 2, 3]);

        let got = gather_file_paths(&[dir.path().to_path_buf()], true);
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn missing_paths_are_skipped() {
        let got = gather_file_paths(&[PathBuf::from("/nonexistent/nowhere")], false);
        assert!(got.is_empty());
    }

    #[test]
    fn gitignore_plain_name_excludes_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", b"target\n");
        write(dir.path(), "target/out.txt", b"generated");
        write(dir.path(), "src/keep.rs", b"fn f() {}");

        let got = gather_file_paths(&[dir.path().to_path_buf()], false);
        let names: Vec<_> = got
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"keep.rs".to_string()));
        assert!(!names.contains(&"out.txt".to_string()));
    }

    #[test]
    fn gitignore_anchored_pattern_only_matches_root() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", b"/build\n");
        write(dir.path(), "build/x.txt", b"x");
        write(dir.path(), "nested/build/y.txt", b"y");

        let got = gather_file_paths(&[dir.path().to_path_buf()], false);
        let names: Vec<_> = got
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(!names.contains(&"x.txt".to_string()));
        assert!(names.contains(&"y.txt".to_string()));
    }

    #[test]
    fn gitignore_glob_and_doublestar() {
        let rules = GitignoreRules::parse("*.log\ndocs/**/drafts/\n").unwrap();
        assert!(rules.is_ignored(Path::new("a.log")));
        assert!(rules.is_ignored(Path::new("deep/b.log")));
        assert!(rules.is_ignored(Path::new("docs/x/drafts/d.md")));
        assert!(!rules.is_ignored(Path::new("docs/x/final/d.md")));
    }

    #[test]
    fn gitignore_negation_is_skipped() {
        // Negations are documented as unsupported; the positive pattern still
        // applies.
        let rules = GitignoreRules::parse("*.log\n!keep.log\n").unwrap();
        assert!(rules.is_ignored(Path::new("keep.log")));
    }

    #[test]
    fn oversized_file_without_extension_is_not_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let data = vec![b'a'; (MAX_TEXT_FILE_BYTES + 1) as usize];
        fs::write(&path, &data).unwrap();
        assert!(!is_text_file(&path));
    }
}
