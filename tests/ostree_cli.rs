//! `OstreeRepo` against a stand-in `ostree` executable.
//!
//! The script answers `rev-parse`, `show` and `export` the way the real
//! command does, which exercises argument passing, output parsing and the
//! exporter subprocess pipeline without an actual repository.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use ocidir::{sha256_digest, OciDir};
use ostree_oci::{ConvertOptions, Converter, Error, ImageName, OstreeRepo, SnapshotStore};

const COMMIT: &str = "8b6f1d3c0b1e0e0b9a4c7f1a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e";

fn fake_ostree(dir: &Path, name: &str, export_exit: i32) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
case "$1" in
  --repo=*) shift ;;
  *) echo "missing --repo" >&2; exit 2 ;;
esac
case "$1" in
  rev-parse)
    if [ "$2" = "exampleos/aarch64/stable" ] || [ "$2" = "{commit}" ]; then
      echo "{commit}"
    else
      echo "error: Refspec '$2' not found" >&2
      exit 1
    fi
    ;;
  show)
    printf 'commit %s\nContentChecksum:  %s\nDate:  2024-05-01 12:30:00 +0000\n\n    Release 40\n\n' "$2" "$2"
    ;;
  export)
    printf 'hello-layer'
    exit {export_exit}
    ;;
  *)
    exit 64
    ;;
esac
"#,
        commit = COMMIT,
        export_exit = export_exit,
    );
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// Scripts are written before anything is spawned and the scenarios run in
// one test, so no forked child can hold a script open for writing.
#[tokio::test]
async fn ostree_cli_scenarios() {
    let tmp = tempfile::tempdir().unwrap();
    let good = fake_ostree(tmp.path(), "ostree-good", 0);
    let bad = fake_ostree(tmp.path(), "ostree-bad", 3);
    let repo = tmp.path().join("repo");

    // Metadata queries.
    let store = OstreeRepo::new(&repo).with_binary(&good);
    assert_eq!(
        store.resolve_ref("exampleos/aarch64/stable").await.unwrap(),
        COMMIT
    );
    let info = store.load_commit(COMMIT).await.unwrap();
    assert_eq!(info.subject.as_deref(), Some("Release 40"));

    let err = store.resolve_ref("nope").await.unwrap_err();
    match err {
        Error::Resolution { reference, reason } => {
            assert_eq!(reference, "nope");
            assert!(reason.contains("not found"), "{reason}");
        }
        other => panic!("expected resolution error, got {other:?}"),
    }

    // Full conversion through the exporter subprocess.
    let dest = tmp.path().join("good");
    let opts = ConvertOptions::new("exampleos/aarch64/stable", ImageName::parse("exampleos:v1").unwrap())
        .dest(&dest)
        .compression(3);
    let report = Converter::new(OstreeRepo::new(&repo).with_binary(&good))
        .convert(&opts)
        .await
        .unwrap();

    assert_eq!(report.commit, COMMIT);
    assert_eq!(report.layer.diff_id, sha256_digest(b"hello-layer"));
    assert_eq!(report.platform.architecture, "arm64");
    OciDir::open(&dest).unwrap().verify().unwrap();

    // Exporter exits non-zero after writing everything.
    let dest = tmp.path().join("bad");
    let opts = ConvertOptions::new("exampleos/aarch64/stable", ImageName::parse("exampleos:v1").unwrap())
        .dest(&dest);
    let err = Converter::new(OstreeRepo::new(&repo).with_binary(&bad))
        .convert(&opts)
        .await
        .unwrap_err();

    match err {
        Error::Export { snapshot, reason } => {
            assert_eq!(snapshot, COMMIT);
            assert!(reason.contains("exit status: 3"), "{reason}");
        }
        other => panic!("expected export error, got {other:?}"),
    }
    assert_eq!(fs::read_dir(dest.join("blobs/sha256")).unwrap().count(), 0);
    assert!(!dest.join("index.json").exists());

    // Missing executable.
    let store = OstreeRepo::new(&repo).with_binary(tmp.path().join("does-not-exist"));
    assert!(matches!(
        store.resolve_ref("exampleos/aarch64/stable").await,
        Err(Error::Resolution { .. })
    ));
}
