//! Lexical handling of space system paths such as `/Root/Sub/Param`.

pub const SEPARATOR: char = '/';

/// Lexically normalize `path`, collapsing `.`, `..`, and repeated separators.
///
/// The result is always absolute. `..` above the root stays at the root.
#[must_use]
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(SEPARATOR) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Resolve `reference` against the space system at `context`.
///
/// Absolute references are only normalized, anything else is taken relative to `context`.
#[must_use]
pub fn resolve(context: &str, reference: &str) -> String {
    if reference.starts_with(SEPARATOR) {
        normalize(reference)
    } else {
        normalize(&format!("{context}/{reference}"))
    }
}

/// Join a child name onto a parent path.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with(SEPARATOR) {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent path of `path`, or `None` for the root.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" || path.is_empty() {
        return None;
    }
    match path.trim_end_matches(SEPARATOR).rfind(SEPARATOR) {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of `path`.
#[must_use]
pub fn name(path: &str) -> &str {
    path.rsplit(SEPARATOR).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("/a/b/c", "/a/b/c")]
    #[test_case("/a//b/./c", "/a/b/c")]
    #[test_case("/a/b/../c", "/a/c")]
    #[test_case("/../a", "/a")]
    #[test_case("a/b/", "/a/b")]
    #[test_case("", "/")]
    fn normalize_paths(input: &str, expected: &str) {
        assert_eq!(normalize(input), expected);
    }

    #[test_case("/Root/Sub", "Param", "/Root/Sub/Param")]
    #[test_case("/Root/Sub", "./Param", "/Root/Sub/Param")]
    #[test_case("/Root/Sub", "../Param", "/Root/Param")]
    #[test_case("/Root/Sub", "/Other/Param", "/Other/Param")]
    #[test_case("/Root/Sub", "Deeper/Param", "/Root/Sub/Deeper/Param")]
    fn resolve_references(context: &str, reference: &str, expected: &str) {
        assert_eq!(resolve(context, reference), expected);
    }

    #[test]
    fn parents() {
        assert_eq!(parent("/Root/Sub"), Some("/Root"));
        assert_eq!(parent("/Root"), Some("/"));
        assert_eq!(parent("/"), None);
    }

    #[test]
    fn names() {
        assert_eq!(name("/Root/Sub/Param"), "Param");
        assert_eq!(join("/Root", "Param"), "/Root/Param");
        assert_eq!(join("/", "Root"), "/Root");
    }
}
