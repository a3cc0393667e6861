use id3::TagLike;
use std::path::Path;

/// "Artist - Title" line for the now-playing display, falling back through
/// title-only to the bare file name when tags are missing or unreadable.
pub fn display_line(path: &Path) -> String {
    let file_name = || {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    };

    match id3::Tag::read_from_path(path) {
        Ok(tag) => match (tag.artist(), tag.title()) {
            (Some(artist), Some(title)) => format!("{artist} - {title}"),
            (None, Some(title)) => title.to_string(),
            _ => file_name(),
        },
        Err(_) => file_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn untagged_file_falls_back_to_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("03 Some Song.mp3");
        fs::write(&path, b"not really an mp3").unwrap();

        assert_eq!(display_line(&path), "03 Some Song.mp3");
    }
}
