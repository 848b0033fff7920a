use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use image::DynamicImage;
use log::info;
use walkdir::WalkDir;

use crate::config::PreprocessingConfig;
use crate::error::{Error, Result};

/// A single image arriving through an external message rather than the
/// filesystem. The payload is a base64-encoded encoded image (e.g. JPEG).
#[derive(Debug, Clone)]
pub struct ImageMessage {
    pub name: String,
    pub image_data: String,
}

/// Explicit selection of images to extract, as an alternative to scanning
/// the root directory. Dispatched once when the [`ImageSource`] is built.
#[derive(Debug, Clone)]
pub enum ImageList {
    /// An ordered sequence of image names relative to the root.
    Names(Vec<String>),
    /// A newline-delimited name list file. Blank lines and `#` comments are
    /// ignored.
    File(PathBuf),
    /// A single in-memory image payload carrying its own name.
    Message(ImageMessage),
}

/// An image resolved by the source: its logical name, decoded pixels, and
/// native resolution. Constructed on demand and never cached.
pub struct ImageRecord {
    pub name: String,
    pub image: DynamicImage,
    pub original_size: (u32, u32),
}

/// Resolves a deterministic, ordered sequence of image names and
/// materializes their pixel data on demand.
pub struct ImageSource {
    root: PathBuf,
    names: Vec<String>,
    message: Option<ImageMessage>,
}

impl ImageSource {
    pub fn new(root: &Path, conf: &PreprocessingConfig, list: Option<ImageList>) -> Result<Self> {
        let (names, message) = match list {
            None => {
                let names = scan_root(root, &conf.globs)?;
                info!("Found {} images in root {}.", names.len(), root.display());
                (names, None)
            }
            Some(ImageList::Names(names)) => {
                check_names_exist(root, &names)?;
                (names, None)
            }
            Some(ImageList::File(path)) => {
                let names = parse_image_list(&path)?;
                check_names_exist(root, &names)?;
                (names, None)
            }
            Some(ImageList::Message(message)) => (vec![message.name.clone()], Some(message)),
        };

        Ok(ImageSource {
            root: root.to_path_buf(),
            names,
            message,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Decodes the image at `index`. Decoding happens per call; the source
    /// holds no pixel data between calls.
    pub fn record(&self, index: usize) -> Result<ImageRecord> {
        let name = self.names[index].clone();
        let image = match &self.message {
            Some(message) => decode_message(message)?,
            None => image::open(self.root.join(&name))?,
        };
        let original_size = (image.width(), image.height());
        Ok(ImageRecord {
            name,
            image,
            original_size,
        })
    }
}

fn decode_message(message: &ImageMessage) -> Result<DynamicImage> {
    let bytes = general_purpose::STANDARD
        .decode(message.image_data.as_bytes())
        .map_err(|_| Error::InvalidPayload(message.name.clone()))?;
    image::load_from_memory(&bytes).map_err(|_| Error::InvalidPayload(message.name.clone()))
}

/// Recursively collects files under `root` matching any of the glob
/// patterns, as sorted, deduplicated, `/`-separated names relative to root.
fn scan_root(root: &Path, globs: &[String]) -> Result<Vec<String>> {
    let mut names = BTreeSet::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if !globs.iter().any(|g| glob_matches(g, &file_name)) {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            names.insert(name);
        }
    }
    if names.is_empty() {
        return Err(Error::NoImagesFound(root.to_path_buf()));
    }
    Ok(names.into_iter().collect())
}

fn check_names_exist(root: &Path, names: &[String]) -> Result<()> {
    for name in names {
        if !root.join(name).exists() {
            return Err(Error::ImageNotFound {
                name: name.clone(),
                root: root.to_path_buf(),
            });
        }
    }
    Ok(())
}

fn parse_image_list(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Matches `name` against a glob pattern where `*` spans any run of
/// characters and `?` a single one.
fn glob_matches(pattern: &str, name: &str) -> bool {
    fn matches(pattern: &[u8], name: &[u8]) -> bool {
        match (pattern.first(), name.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&pattern[1..], name) || (!name.is_empty() && matches(pattern, &name[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&pattern[1..], &name[1..]),
            (Some(p), Some(n)) if p == n => matches(&pattern[1..], &name[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}
