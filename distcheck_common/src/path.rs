use crate::DistCheckError;
use percent_encoding::percent_decode_str;
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// A location inside a source or target tree.
///
/// Either a bare path (`/data/a.txt`, `a.txt`) or a URI carrying a scheme and
/// an authority (`cosn://bucket-125/data/a.txt`, `hdfs://nn:8020/data`).
/// Scheme and authority compare case-insensitively; the hierarchical part is
/// kept as a list of non-empty segments so ancestor walks never need string
/// surgery. `.` and `..` segments are folded away when parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreePath {
    scheme: Option<String>,
    authority: Option<String>,
    segments: Vec<String>,
    absolute: bool,
}

impl TreePath {
    /// Parses a path or URI.
    pub fn parse(input: &str) -> Result<Self, DistCheckError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DistCheckError::Path("The input path is empty.".to_string()));
        }

        if input.contains("://") {
            return Self::parse_uri(input);
        }

        let absolute = input.starts_with('/');
        Ok(Self {
            scheme: None,
            authority: None,
            segments: normalize(input.split('/'), absolute),
            absolute,
        })
    }

    fn parse_uri(input: &str) -> Result<Self, DistCheckError> {
        let url = Url::parse(input)
            .map_err(|e| DistCheckError::Path(format!("Invalid path URI '{}': {}", input, e)))?;

        let authority = url.host_str().filter(|h| !h.is_empty()).map(|host| match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        });

        let segments = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            scheme: Some(url.scheme().to_ascii_lowercase()),
            authority,
            segments,
            absolute: true,
        })
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    /// Hierarchical component only, always starting with `/` for absolute paths
    pub fn hierarchical(&self) -> String {
        let joined = self.segments.join("/");
        if self.absolute {
            format!("/{}", joined)
        } else {
            joined
        }
    }

    /// Relative filesystem path handed to a [`crate::Vfs`] rooted at `/`
    pub fn vfs_path(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    /// Same hierarchical path, carrying the scheme and authority of `location`
    pub fn qualified_with(&self, location: &TreePath) -> Self {
        Self {
            scheme: location.scheme.clone(),
            authority: location.authority.clone(),
            segments: self.segments.clone(),
            absolute: true,
        }
    }

    /// Resolves a relative path against `base`; absolute paths inherit the
    /// scheme and authority of `base` only when they carry none of their own.
    pub fn resolve_against(&self, base: &TreePath) -> Self {
        if self.absolute {
            if self.scheme.is_none() && self.authority.is_none() {
                return self.qualified_with(base);
            }
            return self.clone();
        }

        let mut resolved = base.clone();
        resolved.segments = normalize(
            base.segments.iter().chain(&self.segments).cloned(),
            base.absolute,
        );
        resolved
    }

    /// True when both paths live on the same filesystem (scheme and authority).
    ///
    /// A bare path and a `file:` URI without authority both name the local
    /// filesystem.
    pub fn same_filesystem(&self, other: &TreePath) -> bool {
        eq_ignore_case(self.filesystem_scheme(), other.filesystem_scheme())
            && eq_ignore_case(self.authority(), other.authority())
    }

    fn filesystem_scheme(&self) -> Option<&str> {
        match self.scheme() {
            Some(scheme) if scheme == "file" && self.authority.is_none() => None,
            other => other,
        }
    }

    /// Child path with `more` segments appended
    pub fn join<I, S>(&self, more: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut joined = self.clone();
        joined
            .segments
            .extend(more.into_iter().map(Into::into).filter(|s: &String| !s.is_empty()));
        joined
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}://", scheme)?;
            if let Some(authority) = &self.authority {
                f.write_str(authority)?;
            }
        }
        f.write_str(&self.hierarchical())
    }
}

impl std::str::FromStr for TreePath {
    type Err = DistCheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Drops empty and `.` segments and folds each `..` into its parent.
///
/// A `..` above the root of an absolute path is dropped; leading `..`
/// segments of a relative path are kept.
fn normalize<I, S>(segments: I, absolute: bool) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for segment in segments.into_iter().map(Into::into) {
        match segment.as_str() {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|last| last != "..") {
                    out.pop();
                } else if !absolute {
                    out.push(segment);
                }
            }
            _ => out.push(segment),
        }
    }
    out
}

fn eq_ignore_case(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_absolute() {
        let path = TreePath::parse("/src/a//b.txt/").unwrap();
        assert!(path.is_absolute());
        assert_eq!(path.scheme(), None);
        assert_eq!(path.segments(), &["src", "a", "b.txt"]);
        assert_eq!(path.to_string(), "/src/a/b.txt");
        assert_eq!(path.vfs_path(), PathBuf::from("src/a/b.txt"));
    }

    #[test]
    fn test_parse_relative() {
        let path = TreePath::parse("a/b.txt").unwrap();
        assert!(!path.is_absolute());
        assert_eq!(path.to_string(), "a/b.txt");
    }

    #[test]
    fn test_parse_uri_with_authority() {
        let path = TreePath::parse("cosn://bucket-1250000000/data/a%20b.txt").unwrap();
        assert_eq!(path.scheme(), Some("cosn"));
        assert_eq!(path.authority(), Some("bucket-1250000000"));
        assert_eq!(path.segments(), &["data", "a b.txt"]);
        assert_eq!(path.to_string(), "cosn://bucket-1250000000/data/a b.txt");
    }

    #[test]
    fn test_parse_uri_with_port() {
        let path = TreePath::parse("hdfs://namenode:8020/warehouse").unwrap();
        assert_eq!(path.authority(), Some("namenode:8020"));
        assert_eq!(path.hierarchical(), "/warehouse");
    }

    #[test]
    fn test_parse_file_uri() {
        let path = TreePath::parse("file:///tmp/x").unwrap();
        assert_eq!(path.scheme(), Some("file"));
        assert_eq!(path.authority(), None);
        assert_eq!(path.to_string(), "file:///tmp/x");
    }

    #[test]
    fn test_parse_rejects_empty_and_garbage() {
        assert!(TreePath::parse("").is_err());
        assert!(TreePath::parse("   ").is_err());
        assert!(TreePath::parse("://nothing").is_err());
    }

    #[test]
    fn test_root() {
        let root = TreePath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "/");
        assert!(!TreePath::parse("/a").unwrap().is_root());
    }

    #[test]
    fn test_dot_segments_are_folded() {
        let path = TreePath::parse("/src/../secret/./f").unwrap();
        assert_eq!(path.segments(), &["secret", "f"]);
        assert_eq!(path.to_string(), "/secret/f");

        // nothing climbs above the root
        assert_eq!(TreePath::parse("/../../etc").unwrap().to_string(), "/etc");
        assert!(TreePath::parse("/src/..").unwrap().is_root());

        let relative = TreePath::parse("../a/./b/..").unwrap();
        assert_eq!(relative.segments(), &["..", "a"]);

        let uri = TreePath::parse("cosn://bucket/src/../other/x").unwrap();
        assert_eq!(uri.to_string(), "cosn://bucket/other/x");
    }

    #[test]
    fn test_resolve_relative_with_parent_segments() {
        let base = TreePath::parse("/work/src").unwrap();
        let rel = TreePath::parse("../other/f").unwrap();
        assert_eq!(rel.resolve_against(&base).to_string(), "/work/other/f");
    }

    #[test]
    fn test_resolve_against() {
        let base = TreePath::parse("cosn://bucket/work").unwrap();
        let rel = TreePath::parse("a/b.txt").unwrap();
        assert_eq!(rel.resolve_against(&base).to_string(), "cosn://bucket/work/a/b.txt");

        let bare = TreePath::parse("/other/c.txt").unwrap();
        assert_eq!(bare.resolve_against(&base).to_string(), "cosn://bucket/other/c.txt");

        let foreign = TreePath::parse("s3://elsewhere/c.txt").unwrap();
        assert_eq!(foreign.resolve_against(&base), foreign);
    }

    #[test]
    fn test_same_filesystem() {
        let a = TreePath::parse("COSN://Bucket/a").unwrap();
        let b = TreePath::parse("cosn://bucket/b").unwrap();
        let c = TreePath::parse("cosn://other/b").unwrap();
        let d = TreePath::parse("/b").unwrap();
        assert!(a.same_filesystem(&b));
        assert!(!a.same_filesystem(&c));
        assert!(!a.same_filesystem(&d));
        assert!(d.same_filesystem(&TreePath::parse("/").unwrap()));
        assert!(d.same_filesystem(&TreePath::parse("file:///x").unwrap()));
    }

    #[test]
    fn test_qualified_with() {
        let target_root = TreePath::parse("cosn://bucket/dst").unwrap();
        let bare = TreePath::parse("/dst/a").unwrap();
        let qualified = bare.qualified_with(&target_root);
        assert_eq!(qualified.to_string(), "cosn://bucket/dst/a");
        assert_eq!(qualified.segments(), bare.segments());
        assert!(!qualified.same_filesystem(&bare));
    }

    #[test]
    fn test_join_skips_empty_segments() {
        let root = TreePath::parse("/dst").unwrap();
        assert_eq!(root.join(["a", "", "b"]).to_string(), "/dst/a/b");
    }
}
