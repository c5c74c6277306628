use std::path::{Component, Path, PathBuf};

use oscar_protocol::SegmentedFilename;

use crate::TransferError;

/// Validates a peer-supplied filename and returns it as a relative path that
/// cannot escape the directory it is joined onto.
///
/// Rejects:
/// - Empty names
/// - Empty, `.` or `..` segments
/// - Segments containing a path separator or NUL
/// - Segments that parse as a drive or UNC prefix on this platform
pub fn validate_filename(name: &SegmentedFilename) -> Result<PathBuf, TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty filename".into()));
    }

    for segment in name.segments() {
        match segment.as_str() {
            "" => {
                return Err(TransferError::InvalidPath(format!(
                    "empty segment in {name}"
                )));
            }
            "." | ".." => {
                return Err(TransferError::InvalidPath(format!(
                    "relative segment not allowed: {name}"
                )));
            }
            _ => {}
        }

        if segment.contains(['/', '\\', '\0']) {
            return Err(TransferError::InvalidPath(format!(
                "separator inside segment: {segment:?}"
            )));
        }

        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(TransferError::InvalidPath(format!(
                    "segment is not a plain name: {segment:?}"
                )));
            }
        }
    }

    Ok(name.to_relative_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(segments: &[&str]) -> SegmentedFilename {
        SegmentedFilename::from_segments(segments.iter().copied())
    }

    #[test]
    fn rejects_empty_name() {
        assert!(validate_filename(&SegmentedFilename::default()).is_err());
    }

    #[test]
    fn rejects_parent_segment() {
        assert!(validate_filename(&name(&["..", "etc", "passwd"])).is_err());
        assert!(validate_filename(&name(&["sub", "..", "..", "escape"])).is_err());
        assert!(validate_filename(&name(&[".."])).is_err());
    }

    #[test]
    fn rejects_current_dir_segment() {
        assert!(validate_filename(&name(&[".", "file.txt"])).is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(validate_filename(&name(&["a", "", "b"])).is_err());
    }

    #[test]
    fn rejects_embedded_separators() {
        assert!(validate_filename(&name(&["/etc/passwd"])).is_err());
        assert!(validate_filename(&name(&["a/b"])).is_err());
        assert!(validate_filename(&name(&["C:\\Windows\\evil"])).is_err());
        assert!(validate_filename(&name(&["nul\0byte"])).is_err());
    }

    #[test]
    fn rejects_wire_traversal() {
        let wire = SegmentedFilename::from_wire("..\u{1}..\u{1}escape");
        assert!(validate_filename(&wire).is_err());
    }

    #[test]
    fn accepts_simple_filename() {
        assert_eq!(
            validate_filename(&name(&["notes.txt"])).unwrap(),
            PathBuf::from("notes.txt")
        );
    }

    #[test]
    fn accepts_nested_name() {
        let path = validate_filename(&name(&["photos", "2004", "beach.jpg"])).unwrap();
        assert_eq!(path, Path::new("photos").join("2004").join("beach.jpg"));
    }

    #[test]
    fn accepts_dotfile() {
        assert!(validate_filename(&name(&[".config", "settings.json"])).is_ok());
    }
}
