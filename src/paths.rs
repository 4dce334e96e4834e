//! Path resolution for instruction fields
//!
//! Instruction paths may be relative, may use `\` separators, may be wrapped
//! in double quotes and may start with `~`. Everything is resolved against an
//! explicit context directory, never the process working directory.

use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` to the current user's home directory.
///
/// Inputs without a leading `~`, and inputs where no home directory can be
/// determined, are returned unchanged.
pub fn expand_home(input: &str) -> String {
    expand_home_with(input, dirs::home_dir().as_deref())
}

fn expand_home_with(input: &str, home: Option<&Path>) -> String {
    let Some(rest) = input.strip_prefix('~') else {
        return input.to_string();
    };
    // `~user` forms are left alone
    if !(rest.is_empty() || rest.starts_with('/')) {
        return input.to_string();
    }
    match home {
        Some(home) => format!("{}{}", home.display(), rest),
        None => input.to_string(),
    }
}

/// Resolve an instruction path into an absolute, lexically clean path.
///
/// Quotes are stripped, `\` becomes `/`, a leading `~` is expanded, and
/// relative paths are joined onto `context_dir`. Symbolic links are not
/// resolved.
pub fn resolve(input: &str, context_dir: &Path) -> PathBuf {
    let cleaned = input.replace('"', "").replace('\\', "/");
    let expanded = expand_home(cleaned.trim());
    let path = Path::new(&expanded);

    if path.is_absolute() {
        clean(path)
    } else {
        clean(&context_dir.join(path))
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. `..` never climbs above the root.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                );
                if !at_root && out.file_name().is_some() {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home_leading_tilde() {
        let home = Path::new("/home/alice");
        assert_eq!(expand_home_with("~", Some(home)), "/home/alice");
        assert_eq!(
            expand_home_with("~/dotfiles/vimrc", Some(home)),
            "/home/alice/dotfiles/vimrc"
        );
    }

    #[test]
    fn test_expand_home_leaves_other_forms() {
        let home = Path::new("/home/alice");
        assert_eq!(expand_home_with("~bob/x", Some(home)), "~bob/x");
        assert_eq!(expand_home_with("a/~/b", Some(home)), "a/~/b");
        assert_eq!(expand_home_with("~/x", None), "~/x");
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_relative_against_context() {
        let ctx = Path::new("/work/project");
        assert_eq!(resolve("a/b", ctx), PathBuf::from("/work/project/a/b"));
        assert_eq!(resolve("./a/../b", ctx), PathBuf::from("/work/project/b"));
        assert_eq!(resolve("../x", ctx), PathBuf::from("/work/x"));
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_absolute_ignores_context() {
        let ctx = Path::new("/work/project");
        assert_eq!(resolve("/etc/hosts", ctx), PathBuf::from("/etc/hosts"));
        assert_eq!(resolve("/etc//./hosts/", ctx), PathBuf::from("/etc/hosts"));
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_strips_quotes_and_backslashes() {
        let ctx = Path::new("/ctx");
        assert_eq!(
            resolve("\"dir\\with\\backslash\"", ctx),
            PathBuf::from("/ctx/dir/with/backslash")
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_clean_never_climbs_above_root() {
        assert_eq!(clean(Path::new("/../../a")), PathBuf::from("/a"));
        assert_eq!(clean(Path::new("/a/b/../../..")), PathBuf::from("/"));
    }

    #[test]
    fn test_clean_relative() {
        assert_eq!(clean(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean(Path::new("../a")), PathBuf::from("../a"));
        assert_eq!(clean(Path::new("a/..")), PathBuf::from("."));
    }
}
