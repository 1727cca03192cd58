//! Admission-time request validation.
//!
//! Rejecting here means no job record is ever created for input that can
//! never be processed; everything that passes is forwarded to the
//! capability opaquely.

use crate::error::CoreError;
use crate::job::{JobRequest, SourceInput};

/// Maximum synthesis text length for a voice clone request.
pub const MAX_VOICE_TEXT_LEN: usize = 5_000;

/// Maximum length of a language code (`en`, `pt-BR`, ...).
const MAX_LANGUAGE_LEN: usize = 8;

/// Validate a job request at admission.
pub fn validate_request(request: &JobRequest) -> Result<(), CoreError> {
    match request {
        JobRequest::VoiceClone {
            voice_profile_id,
            text,
            language,
            speed,
        } => {
            if voice_profile_id.is_empty() {
                return Err(CoreError::InputInvalid(
                    "voice_profile_id must not be empty".into(),
                ));
            }
            validate_text(text)?;
            validate_language(language)?;
            if !(0.5..=2.0).contains(speed) {
                return Err(CoreError::InputInvalid(format!(
                    "speed {speed} outside supported range 0.5..=2.0"
                )));
            }
            Ok(())
        }
        JobRequest::Translate {
            source,
            target_language,
            source_language,
        } => {
            validate_source(source)?;
            validate_language(target_language)?;
            if let Some(lang) = source_language {
                validate_language(lang)?;
            }
            Ok(())
        }
        JobRequest::Diarize { source, .. } | JobRequest::ExtractSpeakers { source, .. } => {
            validate_source(source)
        }
    }
}

fn validate_text(text: &str) -> Result<(), CoreError> {
    if text.trim().is_empty() {
        return Err(CoreError::InputInvalid(
            "synthesis text must not be empty".into(),
        ));
    }
    if text.chars().count() > MAX_VOICE_TEXT_LEN {
        return Err(CoreError::InputInvalid(format!(
            "synthesis text exceeds {MAX_VOICE_TEXT_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_language(code: &str) -> Result<(), CoreError> {
    let valid_len = !code.is_empty() && code.len() <= MAX_LANGUAGE_LEN;
    let valid_chars = code.chars().all(|c| c.is_ascii_alphabetic() || c == '-');
    if !valid_len || !valid_chars {
        return Err(CoreError::InputInvalid(format!(
            "unsupported language code: \"{code}\""
        )));
    }
    Ok(())
}

fn validate_source(source: &SourceInput) -> Result<(), CoreError> {
    match source {
        SourceInput::Blob { reference } if reference.is_empty() => Err(CoreError::InputInvalid(
            "blob reference must not be empty".into(),
        )),
        SourceInput::Blob { .. } => Ok(()),
        SourceInput::Url { url } => {
            if url.starts_with("http://") || url.starts_with("https://") {
                Ok(())
            } else {
                Err(CoreError::InputInvalid(format!(
                    "source url must be http(s): \"{url}\""
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn clone_request(text: &str, language: &str, speed: f32) -> JobRequest {
        JobRequest::VoiceClone {
            voice_profile_id: "vp-1".into(),
            text: text.into(),
            language: language.into(),
            speed,
        }
    }

    #[test]
    fn valid_voice_clone_passes() {
        assert!(validate_request(&clone_request("Read this aloud.", "en", 1.0)).is_ok());
    }

    #[test]
    fn empty_text_is_rejected() {
        let err = validate_request(&clone_request("   ", "en", 1.0)).unwrap_err();
        assert_matches!(err, CoreError::InputInvalid(_));
    }

    #[test]
    fn oversized_text_is_rejected() {
        let text = "x".repeat(MAX_VOICE_TEXT_LEN + 1);
        let err = validate_request(&clone_request(&text, "en", 1.0)).unwrap_err();
        assert_matches!(err, CoreError::InputInvalid(_));
    }

    #[test]
    fn bad_language_code_is_rejected() {
        for code in ["", "e n", "12", "english-too-long"] {
            let err = validate_request(&clone_request("hi", code, 1.0)).unwrap_err();
            assert_matches!(err, CoreError::InputInvalid(_), "code: {code:?}");
        }
        assert!(validate_request(&clone_request("hi", "pt-BR", 1.0)).is_ok());
    }

    #[test]
    fn speed_outside_range_is_rejected() {
        assert!(validate_request(&clone_request("hi", "en", 0.1)).is_err());
        assert!(validate_request(&clone_request("hi", "en", 3.0)).is_err());
    }

    #[test]
    fn non_http_source_url_is_rejected() {
        let request = JobRequest::Diarize {
            source: SourceInput::Url {
                url: "ftp://example.com/a.wav".into(),
            },
            speaker_count_hint: None,
        };
        assert_matches!(
            validate_request(&request).unwrap_err(),
            CoreError::InputInvalid(_)
        );
    }

    #[test]
    fn empty_blob_reference_is_rejected() {
        let request = JobRequest::Translate {
            source: SourceInput::Blob {
                reference: String::new(),
            },
            target_language: "en".into(),
            source_language: None,
        };
        assert!(validate_request(&request).is_err());
    }
}
