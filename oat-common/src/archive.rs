//! Inspection of tarballs: fetched log bundles and stemcell/release artifacts.
//!
//! Both plain and gzip-compressed archives are accepted; compression is
//! detected from the magic bytes, not the file name.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Deserialize;
use tar::Archive;
use tracing::debug;

use crate::errors::{HarnessError, HarnessResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Name and version declared in an artifact's embedded manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactManifest {
    pub name: String,
    pub version: String,
}

#[derive(Deserialize)]
struct RawManifest {
    name: String,
    version: serde_yaml_ng::Value,
}

fn archive_error(path: &Path, reason: impl std::fmt::Display) -> HarnessError {
    HarnessError::Archive {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn open_archive(path: &Path) -> HarnessResult<Archive<Box<dyn Read>>> {
    let mut file = File::open(path).map_err(|e| archive_error(path, e))?;
    let mut magic = [0u8; 2];
    let is_gzip = file.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;
    file.seek(SeekFrom::Start(0))?;

    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(Archive::new(reader))
}

/// Entry names exactly as stored (e.g. `./current`, `./batlight/batlight.stdout.log`).
pub fn tar_entries(path: &Path) -> HarnessResult<Vec<String>> {
    let mut archive = open_archive(path)?;
    let mut names = Vec::new();
    for entry in archive.entries().map_err(|e| archive_error(path, e))? {
        let entry = entry.map_err(|e| archive_error(path, e))?;
        names.push(String::from_utf8_lossy(&entry.path_bytes()).into_owned());
    }
    debug!(path = %path.display(), entries = names.len(), "Listed archive");
    Ok(names)
}

/// [`tar_entries`] on the blocking pool, for callers on the async runtime.
pub async fn list_entries(path: PathBuf) -> HarnessResult<Vec<String>> {
    let listed = path.clone();
    tokio::task::spawn_blocking(move || tar_entries(&listed))
        .await
        .map_err(|e| archive_error(&path, e))?
}

/// Contents of the entry called `name`, ignoring a leading `./` on either side.
pub fn read_entry(path: &Path, name: &str) -> HarnessResult<Option<Vec<u8>>> {
    let wanted = name.trim_start_matches("./");
    let mut archive = open_archive(path)?;
    for entry in archive.entries().map_err(|e| archive_error(path, e))? {
        let mut entry = entry.map_err(|e| archive_error(path, e))?;
        let entry_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if entry_name.trim_start_matches("./") == wanted {
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| archive_error(path, e))?;
            return Ok(Some(contents));
        }
    }
    Ok(None)
}

/// Read `name` and `version` from the YAML manifest embedded in an artifact
/// (`stemcell.MF` for stemcells, `release.MF` for releases).
pub fn read_artifact_manifest(path: &Path, manifest_name: &str) -> HarnessResult<ArtifactManifest> {
    let contents = read_entry(path, manifest_name)?
        .ok_or_else(|| archive_error(path, format!("no {manifest_name} entry")))?;
    let raw: RawManifest =
        serde_yaml_ng::from_slice(&contents).map_err(|e| archive_error(path, e))?;

    let version = match raw.version {
        serde_yaml_ng::Value::String(s) => s,
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        other => {
            return Err(archive_error(
                path,
                format!("unsupported version value {other:?} in {manifest_name}"),
            ));
        }
    };
    Ok(ArtifactManifest {
        name: raw.name,
        version,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::write_tgz;
    use super::*;

    #[test]
    fn test_lists_log_bundle_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("batlight-logs.tgz");
        write_tgz(
            &bundle,
            &[
                ("./current", b"agent log"),
                ("./batlight/batlight.stdout.log", b"out"),
                ("./batlight/batlight.stderr.log", b""),
            ],
        );

        let entries = tar_entries(&bundle).unwrap();
        assert_eq!(entries, vec![
            "./current".to_string(),
            "./batlight/batlight.stdout.log".to_string(),
            "./batlight/batlight.stderr.log".to_string(),
        ]);
    }

    #[test]
    fn test_entry_lookup_ignores_dot_slash_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("agent-logs.tgz");
        write_tgz(&bundle, &[("./current", b"agent started")]);

        assert_eq!(tar_entries(&bundle).unwrap(), vec!["./current".to_string()]);
        assert_eq!(
            read_entry(&bundle, "current").unwrap().as_deref(),
            Some(&b"agent started"[..])
        );
        assert_eq!(read_entry(&bundle, "./missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_entries_off_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("batlight-logs.tgz");
        write_tgz(&bundle, &[("./current", b"agent log")]);

        assert_eq!(list_entries(bundle).await.unwrap(), vec!["./current".to_string()]);
        let err = list_entries(dir.path().join("absent.tgz")).await.unwrap_err();
        assert!(matches!(err, HarnessError::Archive { .. }));
    }

    #[test]
    fn test_plain_tar_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&path).unwrap());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_cksum();
        builder.append_data(&mut header, "ok", &b"ok"[..]).unwrap();
        builder.finish().unwrap();

        assert_eq!(tar_entries(&path).unwrap(), vec!["ok".to_string()]);
    }

    #[test]
    fn test_reads_stemcell_manifest_with_numeric_version() {
        let dir = tempfile::tempdir().unwrap();
        let stemcell = dir.path().join("stemcell.tgz");
        write_tgz(
            &stemcell,
            &[
                ("stemcell.MF", b"name: bosh-stemcell\nversion: 1471.2\n"),
                ("image", b"disk"),
            ],
        );

        let manifest = read_artifact_manifest(&stemcell, "stemcell.MF").unwrap();
        assert_eq!(manifest.name, "bosh-stemcell");
        assert_eq!(manifest.version, "1471.2");
    }

    #[test]
    fn test_missing_manifest_is_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let release = dir.path().join("release.tgz");
        write_tgz(&release, &[("./jobs/batlight.tgz", b"")]);

        let err = read_artifact_manifest(&release, "release.MF").unwrap_err();
        assert!(matches!(err, HarnessError::Archive { .. }));
    }

    #[test]
    fn test_missing_file_is_archive_error() {
        let err = tar_entries(Path::new("/definitely/not/here.tgz")).unwrap_err();
        assert!(matches!(err, HarnessError::Archive { .. }));
    }
}
