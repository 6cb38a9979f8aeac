// SPDX-License-Identifier: MIT OR Apache-2.0
//! Charset detection for the file-contents response path.
//!
//! Only a bounded prefix is examined. A prefix that is already valid UTF-8
//! short-circuits; otherwise the detector's guess is used only when it rates
//! its own assessment as trustworthy, falling back to UTF-8.

use chardetng::EncodingDetector;

/// Detection window over the response body.
pub const DETECT_LIMIT: usize = 32_768;

/// Label reported when detection is inconclusive.
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Detect the charset label for a byte stream.
pub fn detect_charset(bytes: &[u8]) -> &'static str {
    let window = &bytes[..bytes.len().min(DETECT_LIMIT)];
    if window.is_empty() || std::str::from_utf8(window).is_ok() {
        return DEFAULT_CHARSET;
    }

    let mut detector = EncodingDetector::new();
    detector.feed(window, true);
    let (encoding, confident) = detector.guess_assess(None, true);
    if !confident {
        return DEFAULT_CHARSET;
    }
    if encoding == encoding_rs::UTF_8 {
        DEFAULT_CHARSET
    } else {
        encoding.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_utf8() {
        assert_eq!(detect_charset(b"plain ascii source code"), "UTF-8");
    }

    #[test]
    fn multibyte_utf8_is_utf8() {
        assert_eq!(detect_charset("héllo wörld — ユニコード".as_bytes()), "UTF-8");
    }

    #[test]
    fn empty_input_defaults() {
        assert_eq!(detect_charset(b""), "UTF-8");
    }

    #[test]
    fn latin1_text_detected_as_windows_1252() {
        // "café au lait, résumé, naïveté" in ISO-8859-1 bytes, repeated so the
        // detector has enough signal.
        let phrase = b"caf\xe9 au lait, r\xe9sum\xe9, na\xefvet\xe9, d\xe9j\xe0 vu. ";
        let mut sample = Vec::new();
        for _ in 0..20 {
            sample.extend_from_slice(phrase);
        }
        assert_eq!(detect_charset(&sample), "windows-1252");
    }

    #[test]
    fn only_prefix_is_examined() {
        // valid UTF-8 for the first 32 KiB, junk after: the label must come
        // from the prefix alone
        let mut sample = vec![b'a'; DETECT_LIMIT];
        sample.extend_from_slice(b"\xff\xfe\xfd");
        assert_eq!(detect_charset(&sample), "UTF-8");
    }
}
