//! Multipart form handling for the admin product endpoints: text fields plus
//! an image written to the upload directory under a collision-free name.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use actix_multipart::Multipart;
use futures_util::StreamExt;
use uuid::Uuid;

use crate::errors::AppError;

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Fields collected from a `multipart/form-data` product request. Presence
/// is validated by the handlers; create requires an image, update does not.
#[derive(Debug, Default)]
pub struct ProductForm {
    pub name: Option<String>,
    pub price: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    /// Public path of the stored image, e.g. "/uploads/<uuid>.png".
    pub image_url: Option<String>,
}

pub async fn read_product_form(
    mut payload: Multipart,
    upload_dir: &Path,
) -> Result<ProductForm, AppError> {
    let mut form = ProductForm::default();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::Validation(format!("invalid multipart payload: {e}")))?;

        let field_name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|n| n.to_string()));

        match field_name.as_deref() {
            Some("image") => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename().map(|f| f.to_string()))
                    .unwrap_or_default();
                let extension = image_extension(&filename)?;
                let stored_name = format!("{}.{extension}", Uuid::new_v4());

                let file = File::create(upload_dir.join(&stored_name))
                    .map_err(|e| AppError::Storage(format!("creating upload file: {e}")))?;
                let mut writer = BufWriter::new(file);
                while let Some(chunk) = field.next().await {
                    let chunk = chunk
                        .map_err(|e| AppError::Validation(format!("reading upload: {e}")))?;
                    writer
                        .write_all(&chunk)
                        .map_err(|e| AppError::Storage(format!("writing upload: {e}")))?;
                }
                writer
                    .flush()
                    .map_err(|e| AppError::Storage(format!("writing upload: {e}")))?;

                form.image_url = Some(format!("/uploads/{stored_name}"));
            }
            Some(name) => {
                let value = read_text_field(&mut field).await?;
                match name {
                    "name" => form.name = Some(value),
                    "price" => form.price = Some(value),
                    "description" => form.description = Some(value),
                    "category_id" => form.category_id = Some(value),
                    // Unknown parts are skipped, matching lenient form handling.
                    _ => {}
                }
            }
            None => {}
        }
    }

    Ok(form)
}

async fn read_text_field(field: &mut actix_multipart::Field) -> Result<String, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::Validation(format!("reading form field: {e}")))?;
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes)
        .map_err(|_| AppError::Validation("form field is not valid UTF-8".to_string()))
}

/// Validate and normalize the uploaded file's extension.
fn image_extension(filename: &str) -> Result<String, AppError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| AppError::Validation("image file has no extension".to_string()))?;

    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(AppError::Validation(format!(
            "unsupported image type '.{extension}'"
        )))
    }
}

/// Best-effort removal of a previously stored image. Only basenames under the
/// upload directory are touched; failures are logged, never surfaced.
pub fn remove_image(image_url: &str, upload_dir: &Path) {
    let Some(name) = Path::new(image_url).file_name() else {
        return;
    };
    let path = upload_dir.join(name);
    if let Err(e) = std::fs::remove_file(&path) {
        log::warn!("could not remove replaced image {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_image_extensions_are_accepted() {
        assert_eq!(image_extension("photo.png").unwrap(), "png");
        assert_eq!(image_extension("photo.JPG").unwrap(), "jpg");
        assert_eq!(image_extension("dir/photo.jpeg").unwrap(), "jpeg");
    }

    #[test]
    fn non_image_extensions_are_rejected() {
        assert!(image_extension("notes.txt").is_err());
        assert!(image_extension("archive.tar.gz").is_err());
        assert!(image_extension("no-extension").is_err());
        assert!(image_extension("").is_err());
    }
}
