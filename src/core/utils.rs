/// Replaces characters that are unsafe in file names.
///
/// Path separators, Windows-reserved characters and control characters become `_`,
/// double quotes become single quotes. Leading/trailing whitespace and dots are trimmed.
///
/// # Example
///
/// ```
/// use ytmux::core::utils::escape_filename;
///
/// let safe = escape_filename("song/name*.mp4");
/// assert_eq!(safe, "song_name_.mp4");
/// ```
pub fn escape_filename(filename: &str) -> String {
    let mut result = String::with_capacity(filename.len());

    for c in filename.chars() {
        match c {
            '/' | '\\' => result.push('_'),
            ':' | '*' | '?' | '<' | '>' | '|' => result.push('_'),
            '"' => result.push('\''),
            c if c.is_control() => result.push('_'),
            _ => result.push(c),
        }
    }

    let result = result.trim_matches(|c: char| c.is_whitespace() || c == '.');

    if result.is_empty() {
        "unnamed".to_string()
    } else {
        result.to_string()
    }
}

/// Bytes to megabytes (MiB) as a float.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Caption attached to a delivered video.
///
/// ```
/// use ytmux::core::utils::format_video_caption;
///
/// assert_eq!(format_video_caption("Intro", 1_572_864), "🎥 *Intro*\n📊 Size: 1.50MB");
/// ```
pub fn format_video_caption(title: &str, size_bytes: u64) -> String {
    format!("🎥 *{}*\n📊 Size: {:.2}MB", title, bytes_to_mb(size_bytes))
}
