//! The on-disk feature store: one HDF5 container file holding a group of
//! named arrays per image.
//!
//! Entries are independent and accumulate across runs; every operation
//! opens the file, mutates it, and closes it again, so a crash between
//! images leaves all previously committed entries durable. A single store
//! file must not be mutated by concurrent runs; callers are responsible
//! for serializing access.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::error;

use crate::error::{Error, Result};
use crate::extractor::{FeatureArray, Prediction};

pub struct FeatureStore {
    path: PathBuf,
}

impl FeatureStore {
    pub fn at(path: &Path) -> Self {
        FeatureStore {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let file = hdf5::File::open(&self.path)?;
        Ok(file.link_exists(name))
    }

    /// Enumerates every stored entry: the path of each group that directly
    /// holds at least one dataset.
    pub fn list_names(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        if !self.path.exists() {
            return Ok(names);
        }
        let file = hdf5::File::open(&self.path)?;
        collect_names(&file, "", &mut names)?;
        Ok(names)
    }

    /// Commits one extraction result under `name`, replacing any prior
    /// entry for that name. Either the full entry lands or, on failure, the
    /// partially written group is removed before the error propagates, so a
    /// reader never observes a half-written entry.
    pub fn put(
        &self,
        name: &str,
        pred: &Prediction,
        keypoint_uncertainty: Option<f32>,
    ) -> Result<()> {
        let file = hdf5::File::append(&self.path)?;
        if file.link_exists(name) {
            file.unlink(name)?;
        }
        let group = ensure_group(&file, name)?;
        if let Err(source) = write_entry(&group, pred, keypoint_uncertainty) {
            drop(group);
            let _ = file.unlink(name);
            if is_out_of_space(&source) {
                error!(
                    "Out of disk space: storing features on disk can take \
                     significant space, did you enable the as_half flag?"
                );
                return Err(Error::StorageFull {
                    name: name.to_string(),
                    source,
                });
            }
            return Err(Error::Storage {
                name: name.to_string(),
                source,
            });
        }
        Ok(())
    }
}

/// Opens or creates the (possibly nested) group for an entry name. Names
/// may contain `/` separators, e.g. `sequence/frame001.jpg`.
fn ensure_group(file: &hdf5::File, name: &str) -> hdf5::Result<hdf5::Group> {
    let mut group = file.group("/")?;
    for part in name.split('/').filter(|part| !part.is_empty()) {
        group = match group.group(part) {
            Ok(existing) => existing,
            Err(_) => group.create_group(part)?,
        };
    }
    Ok(group)
}

fn write_entry(
    group: &hdf5::Group,
    pred: &Prediction,
    keypoint_uncertainty: Option<f32>,
) -> hdf5::Result<()> {
    for (key, value) in pred {
        match value {
            FeatureArray::F32(data) => {
                group
                    .new_dataset_builder()
                    .with_data(data.view())
                    .create(key.as_str())?;
            }
            FeatureArray::F16(data) => {
                group
                    .new_dataset_builder()
                    .with_data(data.view())
                    .create(key.as_str())?;
            }
            FeatureArray::I64(data) => {
                group
                    .new_dataset_builder()
                    .with_data(data.view())
                    .create(key.as_str())?;
            }
        }
    }
    if let Some(uncertainty) = keypoint_uncertainty {
        if pred.contains_key("keypoints") {
            group
                .dataset("keypoints")?
                .new_attr::<f32>()
                .create("uncertainty")?
                .write_scalar(&uncertainty)?;
        }
    }
    Ok(())
}

fn collect_names(group: &hdf5::Group, prefix: &str, names: &mut HashSet<String>) -> Result<()> {
    for member in group.member_names()? {
        let path = if prefix.is_empty() {
            member.clone()
        } else {
            format!("{prefix}/{member}")
        };
        if let Ok(child) = group.group(&member) {
            collect_names(&child, &path, names)?;
        } else if group.dataset(&member).is_ok() {
            names.insert(prefix.to_string());
        }
    }
    Ok(())
}

fn is_out_of_space(error: &hdf5::Error) -> bool {
    error.to_string().contains("No space left on device")
}
