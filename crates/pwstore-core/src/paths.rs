//! Naming helpers for entries inside a password store directory.

use std::path::Path;

/// Path of `full_path` relative to the store root, with runs of `/` collapsed.
pub fn relative_path(full_path: &str, store_path: &str) -> String {
    let stripped = if store_path.is_empty() {
        full_path.to_owned()
    } else {
        full_path.replace(store_path, "")
    };
    collapse_slashes(&stripped)
}

/// Parent directory of an entry relative to the store root, as `/dir/sub/`.
pub fn parent_path(full_path: &str, store_path: &str) -> String {
    let relative = relative_path(full_path, store_path);
    let parent = match relative.rfind('/') {
        Some(index) => &relative[..=index],
        None => "",
    };
    collapse_slashes(&format!("/{parent}/"))
}

/// Entry name: the file name without directory and extension.
pub fn entry_name(full_path: &str) -> String {
    Path::new(full_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Store-relative name such as `social/facebook` for the entry `basename`
/// living in directory `full_path`.
pub fn long_name(full_path: &str, store_path: &str, basename: &str) -> String {
    let relative = relative_path(full_path, store_path);
    if relative.is_empty() || relative == "/" {
        return basename.to_owned();
    }
    let relative = relative.strip_prefix('/').unwrap_or(&relative);
    if relative.ends_with('/') {
        format!("{relative}{basename}")
    } else {
        format!("{relative}/{basename}")
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' && previous_slash {
            continue;
        }
        previous_slash = c == '/';
        out.push(c);
    }
    out
}
