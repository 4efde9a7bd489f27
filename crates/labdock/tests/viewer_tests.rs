//! Viewer cache integration tests.

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::*;
use labdock::viewer::NodeKind;
use labdock::{ProjectStatus, RuntimeError};

#[tokio::test]
async fn test_structure_is_ordered_and_sized() {
    let h = TestHarness::new();
    let archive = ArchiveBuilder::new()
        .file("zeta.md", "z")
        .file("Alpha.txt", "aa")
        .file("src/b.js", "bbb")
        .file("src/a/inner.js", "i")
        .file("assets/x.css", "x")
        .zip();
    h.submit("tree", &archive);

    let tree = h.core.structure("tree").await.unwrap();

    let top: Vec<(&str, NodeKind)> = tree.nodes.iter().map(|n| (n.name.as_str(), n.kind)).collect();
    assert_eq!(
        top,
        vec![
            ("assets", NodeKind::Directory),
            ("src", NodeKind::Directory),
            ("Alpha.txt", NodeKind::File),
            ("zeta.md", NodeKind::File),
        ]
    );
    let src: Vec<&str> = tree.nodes[1].children.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(src, vec!["a", "b.js"]);
    assert_eq!(tree.nodes[1].children[0].children[0].path, "src/a/inner.js");
    assert_eq!(tree.total_size, 1 + 2 + 3 + 1 + 1);
    assert_eq!(h.project("tree").total_size, Some(8));
}

#[tokio::test]
async fn test_read_file_and_mime_hint() {
    let h = TestHarness::new();
    let archive = static_site().binary("data.bin", &[0, 159, 146, 150]).zip();
    h.submit("site1", &archive);

    let html = h.core.read_file("site1", "index.html").await.unwrap();
    assert_eq!(html.content, b"<h1>Hello</h1>");
    assert_eq!(html.mime, "text/html");

    let binary = h.core.read_file("site1", "data.bin").await.unwrap();
    assert_eq!(binary.content, vec![0, 159, 146, 150]);
    assert_eq!(binary.mime, "application/octet-stream");
}

#[tokio::test]
async fn test_read_outside_root_is_rejected() {
    let h = TestHarness::new();
    h.submit("site1", &static_site().zip());
    h.submit("other", &ArchiveBuilder::new().file("secret.txt", "s3cret").zip());
    h.core.read_file("other", "secret.txt").await.unwrap();

    for path in ["../other/secret.txt", "/etc/passwd", "css/../../other/secret.txt"] {
        let err = h.core.read_file("site1", path).await.unwrap_err();
        assert!(matches!(err, RuntimeError::SandboxViolation(_)), "{}", path);
        assert!(err.is_client_error());
    }
}

#[tokio::test]
async fn test_resubmission_re_extracts() {
    let h = TestHarness::new();
    h.submit("p1", &static_site().zip());
    let before = h.core.structure("p1").await.unwrap();
    assert_eq!(before.nodes.len(), 2);

    h.upload(
        "p1-v2.tar.gz",
        &ArchiveBuilder::new()
            .file("index.html", "<h1>Second try</h1>")
            .file("js/app.js", "console.log(1)")
            .file("README.md", "notes")
            .tar_gz(),
    );
    h.core.resubmit("p1", "p1-v2.tar.gz").await.unwrap();
    assert_eq!(h.project("p1").total_size, None);

    let after = h.core.structure("p1").await.unwrap();
    let names: Vec<&str> = after.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["js", "README.md", "index.html"]);
    let index = h.core.read_file("p1", "index.html").await.unwrap();
    assert_eq!(index.content, b"<h1>Second try</h1>");
    assert_eq!(h.project("p1").total_size, Some(after.total_size));
}

#[tokio::test]
async fn test_resubmit_unknown_project() {
    let h = TestHarness::new();
    let err = h.core.resubmit("ghost", "x.zip").await.unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound { .. }));
}

#[tokio::test]
async fn test_viewer_does_not_require_deployment() {
    let h = TestHarness::new();
    h.submit("p1", &static_site().zip());

    h.core.read_file("p1", "css/site.css").await.unwrap();

    assert_eq!(h.project("p1").status, ProjectStatus::Stopped);
    assert!(!h.workspace_dir("p1").exists());
    assert!(h.cache_dir("p1").is_dir());
    assert_eq!(h.engine.build_count(), 0);
}

#[tokio::test]
async fn test_browsing_during_deploy_does_not_conflict() {
    let h = Arc::new(TestHarness::new());
    h.submit("p1", &static_site().zip());
    h.engine.set_build_delay(Duration::from_millis(300));

    let deploy = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.core.deploy("p1", None).await })
    };
    for _ in 0..100 {
        if h.project("p1").status == ProjectStatus::Starting {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let file = tokio::time::timeout(Duration::from_millis(250), h.core.read_file("p1", "index.html"))
        .await
        .expect("viewer waited on the deploy")
        .unwrap();
    assert_eq!(file.content, b"<h1>Hello</h1>");

    deploy.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_readers_share_one_extraction() {
    let h = Arc::new(TestHarness::new());
    h.submit("p1", &static_site().zip());

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.core.read_file("p1", "index.html").await })
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.await.unwrap().unwrap().content, b"<h1>Hello</h1>");
    }

    let entries: Vec<_> = std::fs::read_dir(&h.config.cache_root).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_cache_sweep_removes_idle_and_untracked() {
    let h = TestHarness::new();
    h.submit("p1", &static_site().zip());
    h.core.read_file("p1", "index.html").await.unwrap();
    let stray = h.config.cache_root.join("fromlastrun");
    std::fs::create_dir_all(stray.join("code")).unwrap();

    let report = h.core.reaper().sweep_cache().await;
    assert_eq!(report.evicted, 0);
    assert_eq!(report.orphans_removed, 0);

    let report = h
        .core
        .viewer()
        .sweep_idle_before(SystemTime::now() + Duration::from_secs(1))
        .await;
    assert_eq!(report.evicted, 1);
    assert_eq!(report.orphans_removed, 1);
    assert!(!h.cache_dir("p1").exists());
    assert!(!stray.exists());

    // evicted entries are transparently re-extracted
    let file = h.core.read_file("p1", "index.html").await.unwrap();
    assert_eq!(file.content, b"<h1>Hello</h1>");
}
