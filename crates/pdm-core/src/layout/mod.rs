//! On-disk layout of downloaded posts.
//!
//! Each post gets one folder under the download root. While a transfer runs,
//! bytes go to `<NNN>_<name>.part`; once the format is known the file is
//! renamed atomically to `[<NNN>_]<name>.<ext>`.

mod format;
mod sanitize;

use std::path::{Path, PathBuf};

use crate::model::Post;

pub use format::{corrected_name, sniff_file, sniff_format, ImageFormat};
pub use sanitize::sanitize_filename;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Folder name for a post: its sanitized title, or `post_<source id>` when the title is unusable.
pub fn post_folder_name(post: &Post) -> String {
    let from_title = sanitize_filename(&post.title);
    if !from_title.is_empty() {
        return from_title;
    }
    let from_source = sanitize_filename(&post.source_id);
    if from_source.is_empty() {
        format!("post_{}", post.id)
    } else {
        format!("post_{}", from_source)
    }
}

fn index_prefix(index: u32) -> String {
    format!("{:03}_", index)
}

/// Path of the in-progress file for an image. Always index-prefixed so
/// sibling images with the same remote name never share a temp file.
pub fn temp_path(folder: &Path, index: u32, name: &str) -> PathBuf {
    folder.join(format!("{}{}{}", index_prefix(index), name, TEMP_SUFFIX))
}

/// Path of the finished file. `file_name` already carries its extension.
pub fn final_path(folder: &Path, index: u32, file_name: &str, force_order: bool) -> PathBuf {
    if force_order {
        folder.join(format!("{}{}", index_prefix(index), file_name))
    } else {
        folder.join(file_name)
    }
}
