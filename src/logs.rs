//! Access to the system log directory

use anyhow::Context;
use flate2::read::MultiGzDecoder;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Files larger than this are shown truncated on the log page
pub const DISPLAY_LIMIT_BYTES: u64 = 1024 * 1024;
/// Number of trailing lines shown for truncated files
pub const DISPLAY_TAIL_LINES: usize = 1000;

const TAIL_BLOCK: u64 = 8192;

/// Names of the regular files directly inside `dir`, sorted
pub fn list_log_files(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// A requested name must refer to a file directly inside the log directory
pub fn valid_log_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

pub fn resolve(dir: &Path, name: &str) -> Option<PathBuf> {
    valid_log_name(name).then(|| dir.join(name))
}

pub fn is_gzip(name: &str) -> bool {
    name.ends_with(".gz")
}

/// Decompress a gzip log into text, replacing invalid UTF-8. Every member of
/// a concatenated archive is read.
pub fn read_gzip(path: &Path) -> anyhow::Result<String> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut bytes = Vec::new();
    MultiGzDecoder::new(file)
        .read_to_end(&mut bytes)
        .with_context(|| format!("decompressing {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Return the last `lines` lines of a file, reading backwards from the end
pub fn tail_lines(path: &Path, lines: usize) -> anyhow::Result<String> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let len = file.metadata()?.len();
    if lines == 0 || len == 0 {
        return Ok(String::new());
    }

    let mut pos = len;
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let step = TAIL_BLOCK.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut block = vec![0u8; step as usize];
        file.read_exact(&mut block)?;
        block.extend_from_slice(&buf);
        buf = block;

        // A trailing newline terminates the last line, it does not start a new one
        let body = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let newlines = body.iter().filter(|&&b| b == b'\n').count();
        if newlines >= lines || pos == 0 {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf).into_owned();
    let body = text.strip_suffix('\n').unwrap_or(&text[..]);
    let kept: Vec<&str> = body.rsplit('\n').take(lines).collect();
    let mut out = kept.into_iter().rev().collect::<Vec<_>>().join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

/// Text shown on the log viewer page
pub struct LogView {
    pub content: String,
    pub truncated: bool,
}

pub fn read_for_display(path: &Path) -> anyhow::Result<LogView> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if is_gzip(&name) {
        return Ok(LogView {
            content: read_gzip(path)?,
            truncated: false,
        });
    }

    let size = fs::metadata(path)
        .with_context(|| format!("reading {}", path.display()))?
        .len();
    if size > DISPLAY_LIMIT_BYTES {
        Ok(LogView {
            content: tail_lines(path, DISPLAY_TAIL_LINES)?,
            truncated: true,
        })
    } else {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(LogView {
            content: String::from_utf8_lossy(&bytes).into_owned(),
            truncated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn lists_only_regular_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("syslog"), "a").unwrap();
        fs::write(dir.path().join("messages.1.gz"), "b").unwrap();
        fs::write(dir.path().join("auth.log"), "c").unwrap();
        fs::create_dir(dir.path().join("journal")).unwrap();

        assert_eq!(
            list_log_files(dir.path()).unwrap(),
            vec!["auth.log", "messages.1.gz", "syslog"]
        );
    }

    #[test]
    fn rejects_names_leaving_the_directory() {
        assert!(valid_log_name("syslog"));
        assert!(valid_log_name("messages.1.gz"));
        assert!(!valid_log_name(""));
        assert!(!valid_log_name(".."));
        assert!(!valid_log_name("../etc/passwd"));
        assert!(!valid_log_name("sub/file"));
        assert!(!valid_log_name("..\\win"));
        assert!(resolve(Path::new("/var/log"), "x/y").is_none());
        assert_eq!(
            resolve(Path::new("/var/log"), "syslog"),
            Some(PathBuf::from("/var/log/syslog"))
        );
    }

    #[test]
    fn gzip_logs_are_decompressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.1.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"boot ok\nlink up\n").unwrap();
        encoder.finish().unwrap();

        assert_eq!(read_gzip(&path).unwrap(), "boot ok\nlink up\n");
        assert_eq!(read_for_display(&path).unwrap().content, "boot ok\nlink up\n");
    }

    #[test]
    fn concatenated_gzip_members_are_all_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syslog.2.gz");
        let mut file = File::create(&path).unwrap();
        for chunk in [&b"first member\n"[..], &b"second member\n"[..]] {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(chunk).unwrap();
            file.write_all(&encoder.finish().unwrap()).unwrap();
        }
        drop(file);

        assert_eq!(read_gzip(&path).unwrap(), "first member\nsecond member\n");
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.gz");
        fs::write(&path, "not gzip").unwrap();
        assert!(read_gzip(&path).is_err());
    }

    #[test]
    fn tail_returns_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syslog");
        let text: String = (1..=5000).map(|i| format!("line {}\n", i)).collect();
        fs::write(&path, &text).unwrap();

        assert_eq!(tail_lines(&path, 3).unwrap(), "line 4998\nline 4999\nline 5000\n");
        assert_eq!(tail_lines(&path, 0).unwrap(), "");

        let all = tail_lines(&path, 10_000).unwrap();
        assert_eq!(all, text);
    }

    #[test]
    fn tail_without_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short");
        fs::write(&path, "a\nb\nc").unwrap();
        assert_eq!(tail_lines(&path, 2).unwrap(), "b\nc");
    }

    #[test]
    fn large_files_are_truncated_for_display() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let line = "x".repeat(99);
        let text: String = (0..20_000).map(|_| format!("{}\n", line)).collect();
        fs::write(&path, &text).unwrap();

        let view = read_for_display(&path).unwrap();
        assert!(view.truncated);
        assert_eq!(view.content.lines().count(), DISPLAY_TAIL_LINES);

        let small = dir.path().join("small.log");
        fs::write(&small, "hello\n").unwrap();
        let view = read_for_display(&small).unwrap();
        assert!(!view.truncated);
        assert_eq!(view.content, "hello\n");
    }
}
