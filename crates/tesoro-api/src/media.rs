use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::fs;
use tracing::{info, warn};

/// Upload ceiling for a single media file.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "video/mp4",
    "video/quicktime",
];

/// A sniffed upload type that passed the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaType {
    pub mime: &'static str,
    pub extension: &'static str,
}

/// Event media on disk.
///
/// Each journal gets its own directory, `{dir}/{journal_id}/`, created on the
/// first upload. Files are never served straight from here; the media route
/// checks the caller's grant first.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    dir: PathBuf,
}

impl MediaStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.dir
    }

    pub fn journal_dir(&self, journal_id: i64) -> PathBuf {
        self.dir.join(journal_id.to_string())
    }

    /// Path of a stored file. `None` when the name could escape the
    /// journal directory.
    pub fn file_path(&self, journal_id: i64, file_name: &str) -> Option<PathBuf> {
        is_safe_file_name(file_name).then(|| self.journal_dir(journal_id).join(file_name))
    }

    pub async fn save(&self, journal_id: i64, file_name: &str, data: &[u8]) -> Result<()> {
        let path = self
            .file_path(journal_id, file_name)
            .ok_or_else(|| anyhow::anyhow!("refusing to store media as {:?}", file_name))?;

        fs::create_dir_all(self.journal_dir(journal_id)).await?;
        fs::write(&path, data).await?;

        info!("Stored {} bytes of media for journal {} as {}", data.len(), journal_id, file_name);
        Ok(())
    }

    /// Remove one media file. A file that is already gone is not an error.
    pub async fn delete_file(&self, journal_id: i64, file_name: &str) -> Result<()> {
        let Some(path) = self.file_path(journal_id, file_name) else {
            anyhow::bail!("refusing to delete media {:?}", file_name);
        };
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted media {} of journal {}", file_name, journal_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Media {} of journal {} already gone", file_name, journal_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_journal_dir(&self, journal_id: i64) -> Result<()> {
        match fs::remove_dir_all(self.journal_dir(journal_id)).await {
            Ok(()) => {
                info!("Deleted media directory of journal {}", journal_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sniffs the upload's magic bytes. Whatever the client claims is ignored.
pub fn detect_media_type(data: &[u8]) -> Option<MediaType> {
    let kind = infer::get(data)?;
    let mime = ALLOWED_MIME_TYPES
        .iter()
        .copied()
        .find(|allowed| *allowed == kind.mime_type())?;

    Some(MediaType {
        mime,
        extension: kind.extension(),
    })
}

/// `media-<unix_millis>-<random>.<ext>`
pub fn generate_file_name(extension: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: u32 = rand::random_range(0..1_000_000_000);
    format!("media-{millis}-{suffix}.{extension}")
}

pub fn media_url(journal_id: i64, file_name: &str) -> String {
    format!("/api/media/{journal_id}/{file_name}")
}

pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01];
    const PDF: &[u8] = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n";

    fn temp_storage(tag: &str) -> MediaStorage {
        let dir = std::env::temp_dir().join(format!(
            "tesoro-media-{tag}-{}",
            generate_file_name("d").replace('.', "")
        ));
        MediaStorage::new(dir)
    }

    #[test]
    fn sniffing_uses_allow_list() {
        assert_eq!(
            detect_media_type(JPEG),
            Some(MediaType {
                mime: "image/jpeg",
                extension: "jpg"
            })
        );
        assert_eq!(detect_media_type(PDF), None);
        assert_eq!(detect_media_type(b"just some text"), None);
    }

    #[test]
    fn generated_names_have_expected_shape() {
        let name = generate_file_name("jpg");
        let rest = name.strip_prefix("media-").unwrap();
        let (stem, ext) = rest.rsplit_once('.').unwrap();
        assert_eq!(ext, "jpg");
        let (millis, random) = stem.split_once('-').unwrap();
        assert!(millis.parse::<u128>().is_ok());
        assert!(random.parse::<u32>().is_ok());
        assert!(is_safe_file_name(&name));
    }

    #[test]
    fn traversal_names_are_rejected() {
        let storage = MediaStorage::new("/srv/media".into());
        assert!(storage.file_path(3, "../secret.db").is_none());
        assert!(storage.file_path(3, "a/b.png").is_none());
        assert!(storage.file_path(3, ".hidden").is_none());
        assert!(storage.file_path(3, "").is_none());
        assert_eq!(
            storage.file_path(3, "media-1-2.png"),
            Some(PathBuf::from("/srv/media/3/media-1-2.png"))
        );
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("x.JPG"), "image/jpeg");
        assert_eq!(content_type_for("x.mov"), "video/quicktime");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn save_and_delete_round_trip() {
        let storage = temp_storage("rt");
        storage.save(7, "media-1-1.jpg", JPEG).await.unwrap();
        let path = storage.file_path(7, "media-1-1.jpg").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), JPEG);

        storage.delete_file(7, "media-1-1.jpg").await.unwrap();
        assert!(!path.exists());
        // Second delete is a no-op.
        storage.delete_file(7, "media-1-1.jpg").await.unwrap();

        storage.save(7, "media-1-2.jpg", JPEG).await.unwrap();
        storage.delete_journal_dir(7).await.unwrap();
        assert!(!storage.journal_dir(7).exists());
        storage.delete_journal_dir(7).await.unwrap();

        let _ = std::fs::remove_dir_all(storage.root());
    }
}
