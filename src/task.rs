//! Building [`TaskDescriptor`]s from files.

use base64::{Engine as _, prelude::BASE64_STANDARD};
use clap::ValueEnum;

use crate::{async_utils::io::read_json, data_url::data_url, prelude::*, relay::TaskDescriptor};

/// The MIME type the OCR backend assumes when it isn't told.
const FALLBACK_MIME_TYPE: &str = "image/jpeg";

/// How to encode image files for the backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum ImageEncoding {
    /// Bare Base64.
    #[default]
    Raw,

    /// A `data:<mime>;base64,...` URL. The backend strips the prefix.
    DataUrl,
}

/// Guess the MIME type of an image from its contents, then its extension.
pub fn guess_mime_type(path: &Path, data: &[u8]) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_owned();
    }
    mime_guess::from_path(path)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .map(|mime| mime.essence_str().to_owned())
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_owned())
}

/// Read an image file and encode it for the backend.
#[instrument(level = "debug", skip(encoding))]
pub async fn encode_image_file(path: &Path, encoding: ImageEncoding) -> Result<String> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image at path: {:?}", path))?;
    if data.is_empty() {
        warn!("Image file {:?} is empty", path);
    }
    Ok(match encoding {
        ImageEncoding::Raw => BASE64_STANDARD.encode(&data),
        ImageEncoding::DataUrl => data_url(&guess_mime_type(path, &data), &data),
    })
}

/// A task file or message. Like [`TaskDescriptor`], but the URL may be left
/// out and supplied by the command line or environment instead.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialTask {
    #[serde(default)]
    ocr_backend_url: Option<String>,
    photo1_base64: String,
    #[serde(default)]
    photo2_base64: String,
}

impl TaskDescriptor {
    /// Read a task from a JSON file, or from standard input if `path` is `-`.
    ///
    /// `url_override` replaces any URL in the file. The URL falls back to the
    /// environment if neither is present.
    pub async fn from_json_file(path: &Path, url_override: Option<&str>) -> Result<Self> {
        let partial = read_json::<PartialTask>(Some(path)).await?;
        let ocr_backend_url = crate::config::resolve_backend_url(
            url_override,
            partial.ocr_backend_url.as_deref(),
        )?;
        Ok(Self {
            ocr_backend_url,
            photo1_base64: partial.photo1_base64,
            photo2_base64: partial.photo2_base64,
        })
    }

    /// Build a task from image files on disk. Without a back image, the
    /// second image is sent empty.
    pub async fn from_images(
        ocr_backend_url: String,
        front: &Path,
        back: Option<&Path>,
        encoding: ImageEncoding,
    ) -> Result<Self> {
        let photo1_base64 = encode_image_file(front, encoding).await?;
        let photo2_base64 = match back {
            Some(back) => encode_image_file(back, encoding).await?,
            None => String::new(),
        };
        Ok(Self {
            ocr_backend_url,
            photo1_base64,
            photo2_base64,
        })
    }
}
