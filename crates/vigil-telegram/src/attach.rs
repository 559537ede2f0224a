//! Inbound photo handling: download via `get_file` + `download_file`,
//! base64-encode, and hand back as typed attachments.

use base64::Engine;
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::warn;

use vigil_core::types::ImageAttachment;

/// Hard cap on downloaded media.
const MAX_BYTES: u32 = 8 * 1024 * 1024;

/// Extract the message's photo (highest resolution) as an attachment.
/// Non-photo media is ignored; failures degrade to no attachment.
pub async fn extract_images(bot: &Bot, msg: &Message) -> Vec<ImageAttachment> {
    let Some(photos) = msg.photo() else {
        return Vec::new();
    };
    let Some(photo) = photos.last() else {
        return Vec::new();
    };

    let file = match bot.get_file(&photo.file.id).await {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "telegram: get_file failed");
            return Vec::new();
        }
    };
    if file.size > MAX_BYTES {
        warn!(size = file.size, "telegram: photo too large, skipping");
        return Vec::new();
    }

    let mut bytes: Vec<u8> = Vec::with_capacity(file.size as usize);
    if let Err(e) = bot.download_file(&file.path, &mut bytes).await {
        warn!(error = %e, "telegram: download_file failed");
        return Vec::new();
    }

    vec![ImageAttachment {
        media_type: "image/jpeg".to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    }]
}
