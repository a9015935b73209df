use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// New time-ordered identifier (UUIDv7)
pub fn new_id() -> String {
	uuid::Uuid::now_v7().to_string()
}

/// Split a file name into stem and extension, the extension keeping its dot.
/// Dotfiles have no extension.
pub fn split_name(path: &Path) -> (String, String) {
	let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
	let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
	(stem, ext)
}

/// Header-safe form of an arbitrary UTF-8 string (names may be non-ASCII)
pub fn encode_header_text(text: &str) -> String {
	URL_SAFE_NO_PAD.encode(text.as_bytes())
}

pub fn decode_header_text(encoded: &str) -> Option<String> {
	let bytes = URL_SAFE_NO_PAD.decode(encoded.trim()).ok()?;
	String::from_utf8(bytes).ok()
}

/// True when `segment` names exactly one entry inside a directory: not empty,
/// no separators or NUL, and not `.` or `..`
pub fn is_plain_segment(segment: &str) -> bool {
	!segment.is_empty()
		&& segment != "."
		&& segment != ".."
		&& !segment.contains(|c: char| c == '/' || c == '\\' || c == '\0')
}


// vim: ts=4
