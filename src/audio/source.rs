//! # Audio Sources
//!
//! A spectrogram request names its audio either by path or by embedding the
//! file bytes. Paths coming from the network are resolved against the
//! configured media root and may not escape it.

use std::path::{Component, Path, PathBuf};

use super::decoder::{AudioDecoder, AudioError, DecodedAudio};

/// Where the audio for one request comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// A file on the server
    Path(PathBuf),
    /// The complete contents of an audio file sent by the client
    Bytes(Vec<u8>),
}

impl AudioSource {
    /// Short human-readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            AudioSource::Path(path) => path.display().to_string(),
            AudioSource::Bytes(bytes) => format!("<{} uploaded bytes>", bytes.len()),
        }
    }

    pub fn decode(&self, decoder: &dyn AudioDecoder) -> Result<DecodedAudio, AudioError> {
        match self {
            AudioSource::Path(path) => decoder.decode_from_path(path),
            AudioSource::Bytes(bytes) => decoder.decode_from_bytes(bytes),
        }
    }
}

/// Resolve a client-supplied path.
///
/// Without a media root the path is used as given. With a root, the path must
/// be relative and free of `..` components; it is joined onto the root.
pub fn resolve_media_path(root: Option<&Path>, requested: &str) -> Result<PathBuf, AudioError> {
    if requested.trim().is_empty() {
        return Err(AudioError::PathRejected("empty path".to_string()));
    }

    let requested_path = Path::new(requested);
    let Some(root) = root else {
        return Ok(requested_path.to_path_buf());
    };

    let mut resolved = root.to_path_buf();
    for component in requested_path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AudioError::PathRejected(format!(
                    "`{}` must be relative to the media root",
                    requested
                )))
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::WavDecoder;
    use crate::audio::test_support::pcm16_wav;

    #[test]
    fn test_no_root_uses_path_verbatim() {
        let path = resolve_media_path(None, "/srv/audio/a.wav").unwrap();
        assert_eq!(path, PathBuf::from("/srv/audio/a.wav"));
    }

    #[test]
    fn test_root_joins_relative_paths() {
        let root = Path::new("/srv/media");
        let path = resolve_media_path(Some(root), "./speech/a.wav").unwrap();
        assert_eq!(path, PathBuf::from("/srv/media/speech/a.wav"));
    }

    #[test]
    fn test_root_rejects_escapes() {
        let root = Path::new("/srv/media");
        for requested in ["../etc/passwd", "speech/../../x.wav", "/etc/passwd", "  "] {
            let err = resolve_media_path(Some(root), requested).unwrap_err();
            assert!(matches!(err, AudioError::PathRejected(_)), "{}", requested);
        }
    }

    #[test]
    fn test_bytes_source_decodes() {
        let source = AudioSource::Bytes(pcm16_wav(&[vec![0.0; 32]], 8000));
        assert_eq!(source.describe(), format!("<{} uploaded bytes>", 44 + 64));

        let audio = source.decode(&WavDecoder).unwrap();
        assert_eq!(audio.frames(), 32);
    }
}
