//! Zip intake and response packaging.
//!
//! Uploaded bundles are zip archives held in memory by the time they reach
//! the pipeline; extraction writes them into a workspace directory.
//! Packaging produces the single response archive: the converted artifact
//! (file, or directory tree with workspace-relative paths) plus the label
//! index under its fixed name.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::config::ArtifactNames;
use crate::error::{KilnError, Result};

/// Extract an in-memory zip archive into `dest`.
///
/// Entries whose names escape the destination directory are skipped.
pub fn extract_to(bytes: &[u8], dest: &Path) -> Result<()> {
    extract_reader(Cursor::new(bytes), dest)
}

fn extract_reader<R: Read + Seek>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(reader).map_err(|e| KilnError::CorruptArchive {
        message: e.to_string(),
    })?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| KilnError::CorruptArchive {
            message: format!("entry {i}: {e}"),
        })?;

        let outpath = match file.enclosed_name() {
            Some(path) => dest.join(path),
            None => continue,
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)
                .map_err(|e| KilnError::io("creating extracted directory", &outpath, e))?;
        } else {
            if let Some(parent) = outpath.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| KilnError::io("creating parent directory", parent, e))?;
                }
            }
            let mut outfile = File::create(&outpath)
                .map_err(|e| KilnError::io("creating extracted file", &outpath, e))?;
            io::copy(&mut file, &mut outfile)
                .map_err(|e| KilnError::io("writing extracted file", &outpath, e))?;
        }
    }

    debug!(dest = %dest.display(), "archive extracted");
    Ok(())
}

/// Build the response archive at `dest`.
///
/// When `primary` is a directory, every file under it is added with its path
/// relative to `root`: pass the workspace dir to keep the directory name as
/// an archive prefix, or `primary` itself to place its contents at the
/// archive root. A plain-file `primary` is added under its base name. The
/// label index is always appended as `labels.txt`.
pub fn package(primary: &Path, root: &Path, label_file: &Path, dest: &Path) -> Result<()> {
    let out = File::create(dest).map_err(|e| KilnError::io("creating response archive", dest, e))?;
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default();

    if primary.is_dir() {
        for entry in WalkDir::new(primary) {
            let entry = entry.map_err(|e| KilnError::Io {
                message: format!("walking artifact directory: {e}"),
                path: Some(primary.to_path_buf()),
                source: e.into_io_error(),
            })?;
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("walked path is under root");
            if rel.as_os_str().is_empty() {
                continue;
            }
            let name = rel.to_string_lossy().replace('\\', "/");
            if entry.file_type().is_dir() {
                zip.add_directory(name, options)
                    .map_err(|e| zip_error(dest, e))?;
            } else {
                zip.start_file(name, options)
                    .map_err(|e| zip_error(dest, e))?;
                copy_into(&mut zip, entry.path())?;
            }
        }
    } else {
        let name = primary
            .file_name()
            .ok_or_else(|| KilnError::io(
                "resolving artifact name",
                primary,
                io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no file name"),
            ))?
            .to_string_lossy()
            .into_owned();
        zip.start_file(name, options)
            .map_err(|e| zip_error(dest, e))?;
        copy_into(&mut zip, primary)?;
    }

    zip.start_file(ArtifactNames::LABELS_FILE, options)
        .map_err(|e| zip_error(dest, e))?;
    copy_into(&mut zip, label_file)?;

    zip.finish().map_err(|e| zip_error(dest, e))?;
    debug!(dest = %dest.display(), "response archive written");
    Ok(())
}

fn copy_into<W: Write + Seek>(zip: &mut ZipWriter<W>, src: &Path) -> Result<()> {
    let mut file = File::open(src).map_err(|e| KilnError::io("opening archive input", src, e))?;
    io::copy(&mut file, zip).map_err(|e| KilnError::io("writing archive entry", src, e))?;
    Ok(())
}

fn zip_error(dest: &Path, err: zip::result::ZipError) -> KilnError {
    KilnError::Io {
        message: format!("writing zip archive: {err}"),
        path: Some(dest.to_path_buf()),
        source: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        let archive = ZipArchive::new(file).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        names
    }

    #[test]
    fn test_extract_valid_archive() {
        let bytes = zip_bytes(&[
            ("model.json", b"{}"),
            ("weights/group1-shard1of1.bin", b"\x00\x01"),
        ]);
        let dest = TempDir::new().unwrap();
        extract_to(&bytes, dest.path()).unwrap();
        assert!(dest.path().join("model.json").is_file());
        assert!(dest.path().join("weights/group1-shard1of1.bin").is_file());
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let dest = TempDir::new().unwrap();
        let err = extract_to(b"definitely not a zip", dest.path()).unwrap_err();
        assert!(matches!(err, KilnError::CorruptArchive { .. }));
    }

    #[test]
    fn test_extract_skips_escaping_entries() {
        let bytes = zip_bytes(&[("../evil.txt", b"pwned"), ("ok.txt", b"fine")]);
        let parent = TempDir::new().unwrap();
        let dest = parent.path().join("inner");
        std::fs::create_dir(&dest).unwrap();
        extract_to(&bytes, &dest).unwrap();
        assert!(dest.join("ok.txt").is_file());
        assert!(!parent.path().join("evil.txt").exists());
    }

    #[test]
    fn test_package_single_file_plus_labels() {
        let work = TempDir::new().unwrap();
        let artifact = work.path().join("keras_model.h5");
        std::fs::write(&artifact, b"h5 bytes").unwrap();
        let labels = work.path().join("labels.txt");
        std::fs::write(&labels, "0 up\n1 down\n").unwrap();

        let dest = work.path().join("response.zip");
        package(&artifact, work.path(), &labels, &dest).unwrap();

        assert_eq!(entry_names(&dest), vec!["keras_model.h5", "labels.txt"]);
    }

    #[test]
    fn test_package_directory_keeps_prefix() {
        let work = TempDir::new().unwrap();
        let saved = work.path().join("model.savedmodel");
        std::fs::create_dir_all(saved.join("variables")).unwrap();
        std::fs::write(saved.join("saved_model.pb"), b"pb").unwrap();
        std::fs::write(saved.join("variables/variables.index"), b"idx").unwrap();
        let labels = work.path().join("labels.txt");
        std::fs::write(&labels, "0 a\n").unwrap();

        let dest = work.path().join("response.zip");
        package(&saved, work.path(), &labels, &dest).unwrap();

        assert_eq!(
            entry_names(&dest),
            vec![
                "labels.txt",
                "model.savedmodel/",
                "model.savedmodel/saved_model.pb",
                "model.savedmodel/variables/",
                "model.savedmodel/variables/variables.index",
            ]
        );
    }

    #[test]
    fn test_package_directory_flattened() {
        let work = TempDir::new().unwrap();
        let sketch = work.path().join("sketch");
        std::fs::create_dir(&sketch).unwrap();
        std::fs::write(sketch.join("sketch.ino"), b"// main").unwrap();
        std::fs::write(sketch.join("model_settings.h"), b"// header").unwrap();
        let labels = work.path().join("labels.txt");
        std::fs::write(&labels, "0 a\n").unwrap();

        let dest = work.path().join("response.zip");
        package(&sketch, &sketch, &labels, &dest).unwrap();

        assert_eq!(
            entry_names(&dest),
            vec!["labels.txt", "model_settings.h", "sketch.ino"]
        );
    }

    #[test]
    fn test_package_roundtrip_content() {
        let work = TempDir::new().unwrap();
        let artifact = work.path().join("model.tflite");
        std::fs::write(&artifact, b"tflite bytes").unwrap();
        let labels = work.path().join("labels.txt");
        std::fs::write(&labels, "0 up\n1 down\n").unwrap();

        let dest = work.path().join("response.zip");
        package(&artifact, work.path(), &labels, &dest).unwrap();

        let file = File::open(&dest).unwrap();
        let mut archive = ZipArchive::new(file).unwrap();
        let mut content = String::new();
        archive
            .by_name("labels.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "0 up\n1 down\n");
    }
}
