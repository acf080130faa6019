//! On-disk layout read by the webhook HTTPS server
//!
//! `tls.crt` is written before `tls.key`. If the key write fails the
//! certificate file is left in place and the error is returned; callers treat
//! the whole pipeline as failed.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::error::ResultExt;
use crate::pki::ServingCertificate;
use crate::{Error, Result};

/// File name of the PEM serving certificate
pub const TLS_CERT_FILE: &str = "tls.crt";

/// File name of the PEM private key
pub const TLS_KEY_FILE: &str = "tls.key";

/// Owner read/write only
const FILE_MODE: u32 = 0o600;

/// Write `tls.crt` and `tls.key` for `cert` into `dir`, creating it if needed
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn persist(cert: &ServingCertificate, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| Error::FileWrite {
            path: dir.to_path_buf(),
            source,
        })
        .context("failed to create certs directory")?;

    write_private(dir.join(TLS_CERT_FILE), cert.certificate())
        .await
        .context("failed to write TLS certificate")?;

    write_private(dir.join(TLS_KEY_FILE), cert.private_key())
        .await
        .context("failed to write TLS private key")?;

    info!("Wrote webhook serving certificate");
    Ok(())
}

/// Write `contents` to `path` with mode 0600, tightening an existing file first
async fn write_private(path: PathBuf, contents: &[u8]) -> Result<()> {
    let file_err = |source| Error::FileWrite {
        path: path.clone(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(&path)
        .await
        .map_err(file_err)?;

    // mode() only applies on creation
    file.set_permissions(Permissions::from_mode(FILE_MODE))
        .await
        .map_err(file_err)?;
    file.write_all(contents).await.map_err(file_err)?;
    file.sync_all().await.map_err(file_err)?;

    debug!(path = %path.display(), bytes = contents.len(), "Wrote file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::{CertificateAuthority, CertificateInfo};
    use crate::ErrorKind;

    fn serving_cert() -> ServingCertificate {
        CertificateAuthority::new("ca")
            .unwrap()
            .issue_serving_cert("svc", &["svc.crdb.svc".to_string()])
            .unwrap()
    }

    fn mode(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn writes_both_files_owner_only() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("k8s-webhook-server").join("serving-certs");
        let cert = serving_cert();

        persist(&cert, &dir).await.unwrap();

        let crt = std::fs::read_to_string(dir.join(TLS_CERT_FILE)).unwrap();
        let key = std::fs::read_to_string(dir.join(TLS_KEY_FILE)).unwrap();
        assert_eq!(crt, cert.cert_pem());
        assert_eq!(key, cert.key_pem());
        assert!(CertificateInfo::from_pem(&crt).is_ok());
        assert!(rcgen::KeyPair::from_pem(&key).is_ok());

        assert_eq!(mode(&dir.join(TLS_CERT_FILE)), 0o600);
        assert_eq!(mode(&dir.join(TLS_KEY_FILE)), 0o600);
    }

    #[tokio::test]
    async fn existing_loose_files_are_tightened_and_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let key_path = tmp.path().join(TLS_KEY_FILE);
        std::fs::write(&key_path, "stale key with extra trailing content").unwrap();
        std::fs::set_permissions(&key_path, Permissions::from_mode(0o644)).unwrap();

        let cert = serving_cert();
        persist(&cert, tmp.path()).await.unwrap();

        assert_eq!(mode(&key_path), 0o600);
        assert_eq!(std::fs::read_to_string(&key_path).unwrap(), cert.key_pem());
    }

    #[tokio::test]
    async fn unwritable_directory_is_a_file_write_error() {
        let tmp = tempfile::tempdir().unwrap();
        // A regular file where the directory should be
        let blocker = tmp.path().join("certs");
        std::fs::write(&blocker, "not a dir").unwrap();

        let err = persist(&serving_cert(), &blocker.join("nested"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FileWrite);
        assert!(err.to_string().starts_with("failed to create certs directory"));
    }

    #[tokio::test]
    async fn key_write_failure_is_surfaced_after_cert_is_written() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory named tls.key makes the second write fail
        std::fs::create_dir(tmp.path().join(TLS_KEY_FILE)).unwrap();

        let err = persist(&serving_cert(), tmp.path()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FileWrite);
        assert!(err.to_string().starts_with("failed to write TLS private key"));
        assert!(tmp.path().join(TLS_CERT_FILE).is_file());
    }
}
