//! Product images on local disk.
//!
//! Files live under `{public_dir}/uploads/products/{owner}/{file}` and are
//! addressed by the URL `/uploads/products/{owner}/{file}`. The owner is
//! either a product id or, for products that do not exist yet, a staging
//! token starting with [`STAGING_MARKER`].

use std::{
    collections::BTreeSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

pub const MAX_IMAGES_PER_PRODUCT: usize = 6;
pub const PUBLIC_URL_PREFIX: &str = "/uploads/products/";
pub const STAGING_MARKER: &str = "temp-";

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "webp", "svg", "avif", "bmp"];
const MAX_FILE_NAME_LEN: usize = 100;
const MAX_NAME_ATTEMPTS: usize = 5;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static pattern"))
}

fn unsafe_file_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static pattern"))
}

/// Normalises the `productId` sent with an upload into a directory name.
/// Real product ids are kept; anything else becomes a staging token.
pub fn upload_owner(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if let Ok(oid) = ObjectId::parse_str(raw) {
        return Ok(oid.to_hex());
    }
    if !token_pattern().is_match(raw) {
        return Err(AppError::Validation(format!("Invalid product ID: {}", raw)));
    }
    if raw.starts_with(STAGING_MARKER) {
        Ok(raw.to_string())
    } else {
        Ok(format!("{}{}", STAGING_MARKER, raw))
    }
}

pub fn sanitize_file_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = unsafe_file_chars().replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return "upload".to_string();
    }
    // Only ASCII survives the replacement above, so byte slicing is safe.
    cleaned[..cleaned.len().min(MAX_FILE_NAME_LEN)].to_string()
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// An image URL that points into the managed upload tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedImage<'a> {
    pub owner: &'a str,
    pub file_name: &'a str,
}

impl ManagedImage<'_> {
    pub fn is_staged(&self) -> bool {
        self.owner.starts_with(STAGING_MARKER)
    }
}

pub fn parse_managed_url(url: &str) -> Option<ManagedImage<'_>> {
    let rest = url.strip_prefix(PUBLIC_URL_PREFIX)?;
    let (owner, file_name) = rest.split_once('/')?;
    let owner_ok = owner
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let file_ok = !file_name.is_empty()
        && file_name != "."
        && file_name != ".."
        && !file_name.contains(['/', '\\']);

    (!owner.is_empty() && owner_ok && file_ok).then_some(ManagedImage { owner, file_name })
}

pub fn is_staged_url(url: &str) -> bool {
    parse_managed_url(url).map_or(false, |image| image.is_staged())
}

pub fn image_url(owner: &str, file_name: &str) -> String {
    format!("{}{}/{}", PUBLIC_URL_PREFIX, owner, file_name)
}

/// Outcome of moving staged images into a product's directory.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Relocation {
    /// The rewritten URL list, in the original order.
    pub images: Vec<String>,
    pub moved: usize,
    pub dropped: usize,
    /// Staged URLs that could not be moved and were kept as-is.
    pub pending: usize,
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    public_dir: PathBuf,
}

impl ImageStore {
    pub fn new(public_dir: impl Into<PathBuf>) -> Self {
        ImageStore {
            public_dir: public_dir.into(),
        }
    }

    pub fn owner_dir(&self, owner: &str) -> PathBuf {
        self.public_dir.join("uploads").join("products").join(owner)
    }

    fn file_path(&self, image: &ManagedImage<'_>) -> PathBuf {
        self.owner_dir(image.owner).join(image.file_name)
    }

    pub async fn count_images(&self, owner: &str) -> Result<usize> {
        let mut entries = match fs::read_dir(self.owner_dir(owner)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() && is_image_file(&entry.path()) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Writes an uploaded file and returns its public URL.
    pub async fn save_upload(&self, owner: &str, original_name: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.owner_dir(owner);
        fs::create_dir_all(&dir).await?;

        let existing = self.count_images(owner).await?;
        if existing >= MAX_IMAGES_PER_PRODUCT {
            warn!(owner, existing, "Rejecting upload over the image limit");
            return Err(AppError::image_limit());
        }

        let file_name = write_new_file(
            &dir,
            Utc::now().timestamp_millis(),
            &sanitize_file_name(original_name),
            bytes,
        )
        .await?;

        debug!(owner, file = %file_name, size = bytes.len(), "Stored upload");
        Ok(image_url(owner, &file_name))
    }

    /// Moves every staged image in `images` into `product_id`'s directory and
    /// returns the rewritten list. Safe to call again on the result: images
    /// already moved are only renamed in the list.
    pub async fn relocate(&self, product_id: &str, images: &[String]) -> Relocation {
        let mut outcome = Relocation::default();
        let mut staging_dirs = BTreeSet::new();
        let target_dir = self.owner_dir(product_id);

        for url in images {
            let staged = match parse_managed_url(url) {
                Some(image) if image.is_staged() => image,
                _ => {
                    outcome.images.push(url.clone());
                    continue;
                }
            };
            staging_dirs.insert(staged.owner.to_string());

            let source = self.file_path(&staged);
            let destination = target_dir.join(staged.file_name);
            let final_url = image_url(product_id, staged.file_name);

            if exists(&source).await {
                match move_file(&source, &destination, &target_dir).await {
                    Ok(()) => {
                        outcome.moved += 1;
                        outcome.images.push(final_url);
                    }
                    Err(e) => {
                        warn!(error = %e, url = %url, product_id, "Failed to move staged image; keeping it for a retry");
                        outcome.pending += 1;
                        outcome.images.push(url.clone());
                    }
                }
            } else if exists(&destination).await {
                outcome.images.push(final_url);
            } else {
                warn!(url = %url, product_id, "Staged image is missing on disk; dropping it");
                outcome.dropped += 1;
            }
        }

        for owner in staging_dirs {
            // Only succeeds once the staging directory is empty.
            let _ = fs::remove_dir(self.owner_dir(&owner)).await;
        }

        if outcome.moved > 0 || outcome.dropped > 0 {
            info!(
                product_id,
                moved = outcome.moved,
                dropped = outcome.dropped,
                pending = outcome.pending,
                "Relocated staged images"
            );
        }
        outcome
    }

    /// Best-effort removal of the files behind `images` that belong to
    /// `product_id` or sit in a staging directory. Files under another
    /// product's directory are left alone.
    pub async fn remove_images(&self, product_id: &str, images: &[String]) {
        for url in images {
            let Some(image) = parse_managed_url(url) else {
                continue;
            };
            if image.owner != product_id && !image.is_staged() {
                warn!(url = %url, product_id, "Not deleting an image owned by another product");
                continue;
            }
            match fs::remove_file(self.file_path(&image)).await {
                Ok(()) => debug!(url = %url, "Deleted image file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(error = %e, url = %url, "Failed to delete image file"),
            }
        }
    }

    /// Best-effort removal of an owner's whole directory.
    pub async fn remove_owner_dir(&self, owner: &str) {
        match fs::remove_dir_all(self.owner_dir(owner)).await {
            Ok(()) => debug!(owner, "Deleted image directory"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, owner, "Failed to delete image directory"),
        }
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Creates `{millis}_{name}` in `dir` without replacing an existing file.
/// On a clash a random tag is added after the timestamp. Returns the file
/// name written.
async fn write_new_file(dir: &Path, millis: i64, name: &str, bytes: &[u8]) -> std::io::Result<String> {
    let mut attempt = 0;
    loop {
        let file_name = if attempt == 0 {
            format!("{}_{}", millis, name)
        } else {
            let tag: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(6)
                .map(char::from)
                .collect();
            format!("{}-{}_{}", millis, tag, name)
        };

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&file_name))
            .await
        {
            Ok(mut file) => {
                file.write_all(bytes).await?;
                file.flush().await?;
                return Ok(file_name);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < MAX_NAME_ATTEMPTS => {
                debug!(file = %file_name, "Upload name taken; retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn move_file(source: &Path, destination: &Path, target_dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(target_dir).await?;
    if fs::rename(source, destination).await.is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(source, destination).await?;
    fs::remove_file(source).await
}
