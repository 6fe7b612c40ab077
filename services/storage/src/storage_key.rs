use crate::media_inspector::Orientation;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Number of random bytes in every object id
pub const KEY_ID_BYTES: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("No file extension registered for media type: {0}")]
    ExtensionUnresolvable(String),
}

/// File extension (with leading dot) for a media type
pub fn extension_for(media_type: &str) -> Option<&'static str> {
    let essence = media_type.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "video/mp4" => Some(".mp4"),
        "video/quicktime" => Some(".mov"),
        "video/webm" => Some(".webm"),
        "video/x-matroska" => Some(".mkv"),
        _ => None,
    }
}

/// Build a fresh object key for a video of the given orientation.
/// Uniqueness is probabilistic; the bucket is not checked for an existing key.
pub fn derive_key(orientation: Orientation, media_type: &str) -> Result<String, KeyError> {
    let extension = extension_for(media_type)
        .ok_or_else(|| KeyError::ExtensionUnresolvable(media_type.to_string()))?;

    let mut id = [0u8; KEY_ID_BYTES];
    OsRng.fill_bytes(&mut id);

    Ok(format!(
        "{}/{}{}",
        orientation.as_str(),
        URL_SAFE_NO_PAD.encode(id),
        extension
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_key_shape(key: &str, prefix: &str, extension: &str) {
        let rest = key
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix('/'))
            .unwrap_or_else(|| panic!("{key} does not start with {prefix}/"));
        let id = rest
            .strip_suffix(extension)
            .unwrap_or_else(|| panic!("{key} does not end with {extension}"));

        assert_eq!(id.len(), 43, "unexpected id length in {key}");
        assert!(
            id.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "id is not URL-safe base64: {id}"
        );
    }

    #[test]
    fn test_key_shape_per_orientation() {
        for orientation in [Orientation::Landscape, Orientation::Portrait, Orientation::Other] {
            let key = derive_key(orientation, "video/mp4").unwrap();
            assert_key_shape(&key, orientation.as_str(), ".mp4");
        }
    }

    #[test]
    fn test_keys_are_unique() {
        let keys: HashSet<String> = (0..10_000)
            .map(|_| derive_key(Orientation::Landscape, "video/mp4").unwrap())
            .collect();
        assert_eq!(keys.len(), 10_000);
    }

    #[test]
    fn test_extension_lookup() {
        assert_eq!(extension_for("video/mp4"), Some(".mp4"));
        assert_eq!(extension_for("VIDEO/MP4"), Some(".mp4"));
        assert_eq!(extension_for("video/mp4; codecs=avc1"), Some(".mp4"));
        assert_eq!(extension_for("video/quicktime"), Some(".mov"));
        assert_eq!(extension_for("application/octet-stream"), None);
    }

    #[test]
    fn test_unknown_media_type() {
        assert_eq!(
            derive_key(Orientation::Other, "video/x-unknown"),
            Err(KeyError::ExtensionUnresolvable("video/x-unknown".to_string()))
        );
    }
}
