//! Archive helpers for distribution unpacking and instance backups.

mod extract;
mod path;
mod tar_gz;
mod zip_ops;

pub(crate) use path::parse_entry_rel_path;
pub(crate) use tar_gz::extract_tar_gz_flat;
pub(crate) use zip_ops::{append_dir_tree_to_zip, extract_zip_flat, extract_zip_mapped};
