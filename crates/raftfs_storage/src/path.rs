//! Joining a directory and a file name into a bounded path.

use crate::error::{FsError, FsResult};
use std::ffi::OsString;
use std::path::{self, Component, Path, PathBuf, MAIN_SEPARATOR};

/// Joins `dir` and `name`, enforcing `max_len` bytes for the result.
///
/// `name` must be a single plain component, so the joined path always names
/// an entry directly inside `dir`. The length counted is
/// `dir + separator + name`, whether or not `dir` already ends in a
/// separator.
///
/// # Errors
///
/// - [`FsError::InvalidName`] if `name` is empty, `.`, `..`, rooted or
///   contains a separator
/// - [`FsError::PathTooLong`] if the joined path exceeds `max_len`
/// - [`FsError::AllocationFailure`] if the path buffer cannot be reserved
pub fn join_path(dir: &Path, name: &str, max_len: usize) -> FsResult<PathBuf> {
    if !is_plain_name(name) {
        return Err(FsError::InvalidName {
            name: name.to_owned(),
        });
    }

    let len = dir
        .as_os_str()
        .len()
        .saturating_add(MAIN_SEPARATOR.len_utf8())
        .saturating_add(name.len());
    if len > max_len {
        return Err(FsError::PathTooLong { len, max: max_len });
    }

    let mut buf = OsString::new();
    buf.try_reserve_exact(len)?;
    buf.push(dir.as_os_str());
    let mut path = PathBuf::from(buf);
    path.push(name);
    Ok(path)
}

fn is_plain_name(name: &str) -> bool {
    if name.chars().any(path::is_separator) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn joins_dir_and_name() {
        let path = join_path(Path::new("/var/raft"), "segment-1", 4096).unwrap();
        assert_eq!(path, Path::new("/var/raft").join("segment-1"));
    }

    #[test]
    fn exact_limit_is_accepted() {
        // "/d" + "/" + "seg" = 6 bytes
        assert!(join_path(Path::new("/d"), "seg", 6).is_ok());
    }

    #[test]
    fn over_limit_is_rejected() {
        let err = join_path(Path::new("/d"), "seg", 5).unwrap_err();
        assert!(matches!(err, FsError::PathTooLong { len: 6, max: 5 }));
    }

    #[test]
    fn long_names_are_rejected() {
        let name = "x".repeat(5000);
        let err = join_path(Path::new("/tmp"), &name, 4096).unwrap_err();
        assert_eq!(err.kind(), crate::FsErrorKind::PathTooLong);
    }

    #[test]
    fn names_cannot_leave_the_directory() {
        for name in ["/etc/escape", "../escape", "nested/segment", "", ".", ".."] {
            let err = join_path(Path::new("/var/raft"), name, 4096).unwrap_err();
            assert_eq!(err.kind(), crate::FsErrorKind::InvalidName, "{name:?}");
        }
    }

    #[test]
    fn dotted_names_are_plain() {
        let path = join_path(Path::new("/var/raft"), "..segment.tmp", 4096).unwrap();
        assert_eq!(path.parent(), Some(Path::new("/var/raft")));
    }

    proptest! {
        #[test]
        fn joined_path_stays_in_dir(
            dir in "/[a-z]{1,12}(/[a-z]{1,12}){0,3}",
            name in "[a-z0-9._-]{1,40}",
            max_len in 1usize..80,
        ) {
            let dir = Path::new(&dir);
            let len = dir.as_os_str().len() + 1 + name.len();
            match join_path(dir, &name, max_len) {
                Ok(path) => {
                    prop_assert!(len <= max_len);
                    prop_assert_eq!(path.parent(), Some(dir));
                    prop_assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(name.as_str()));
                }
                Err(FsError::PathTooLong { len: reported, max }) => {
                    prop_assert!(len > max_len);
                    prop_assert_eq!(reported, len);
                    prop_assert_eq!(max, max_len);
                }
                Err(FsError::InvalidName { .. }) => {
                    prop_assert!(name == "." || name == "..");
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}
