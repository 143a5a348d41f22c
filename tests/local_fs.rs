//! Integration tests for the local-disk `Vfs` adapter.

use nfs_mamont::fh::MAX_DEPTH;
use nfs_mamont::fs::LocalFs;
use nfs_mamont::vfs::{self, Vfs};

#[tokio::test]
async fn lookup_get_attr_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), b"hello").unwrap();
    let fs = LocalFs::new(dir.path().to_path_buf(), 16).unwrap();

    let root = fs.root_handle().await;
    let found = fs.lookup(&root, &vfs::FileName("f".into())).await.unwrap();
    assert_eq!(found.object_attr.file_type, vfs::FileType::Regular);
    assert_eq!(found.object_attr.size, 5);

    let attr = fs.get_attr(&found.handle).await.unwrap();
    assert_eq!(attr.size, 5);
}

#[tokio::test]
async fn create_then_lookup_returns_matching_handle() {
    let dir = tempfile::tempdir().unwrap();
    let fs = LocalFs::new(dir.path().to_path_buf(), 16).unwrap();
    let root = fs.root_handle().await;

    let created = fs
        .create(&root, &vfs::FileName("new".into()), vfs::CreateMode::Unchecked { attr: vfs::SetAttr::default() })
        .await
        .unwrap();

    let found = fs.lookup(&root, &vfs::FileName("new".into())).await.unwrap();
    assert_eq!(found.handle, created.handle);
}

#[tokio::test]
async fn rename_then_decode_self_heals() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"hello").unwrap();
    let fs = LocalFs::new(dir.path().to_path_buf(), 16).unwrap();
    let root = fs.root_handle().await;

    let before = fs.lookup(&root, &vfs::FileName("a".into())).await.unwrap();
    fs.rename(&root, &vfs::FileName("a".into()), &root, &vfs::FileName("b".into())).await.unwrap();

    // The old handle still resolves -- it carries (dev, ino), not a path --
    // so get_attr on it must observe the renamed file.
    let attr = fs.get_attr(&before.handle).await.unwrap();
    assert_eq!(attr.size, 5);

    // And the new name is independently reachable.
    let found = fs.lookup(&root, &vfs::FileName("b".into())).await.unwrap();
    assert_eq!(found.handle, before.handle);
}

#[tokio::test]
async fn mkdir_read_dir_lists_created_entries() {
    let dir = tempfile::tempdir().unwrap();
    let fs = LocalFs::new(dir.path().to_path_buf(), 16).unwrap();
    let root = fs.root_handle().await;

    fs.make_dir(&root, &vfs::FileName("sub".into()), vfs::SetAttr::default()).await.unwrap();
    fs.create(&root, &vfs::FileName("top".into()), vfs::CreateMode::Unchecked { attr: vfs::SetAttr::default() })
        .await
        .unwrap();

    let listing = fs
        .read_dir(&root, vfs::DirectoryCookie(0), vfs::CookieVerifier([0; 8]), 0)
        .await
        .unwrap();
    let names: Vec<String> = listing.entries.iter().map(|e| e.name.0.clone()).collect();
    assert!(names.contains(&"sub".to_string()));
    assert!(names.contains(&"top".to_string()));
}

#[tokio::test]
async fn nesting_past_max_depth_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let fs = LocalFs::new(dir.path().to_path_buf(), 16).unwrap();
    let root = fs.root_handle().await;

    let mut current = root;
    for i in 0..(MAX_DEPTH + 2) {
        let created = fs.make_dir(&current, &vfs::FileName(format!("d{i}")), vfs::SetAttr::default()).await.unwrap();
        current = created.handle;
        if !nfs_mamont::fh::FhCore::fh_valid(&nfs_mamont::fh::handle::validate(&current.0).unwrap_or_default()) {
            return; // encoder refused once the trail would exceed MAX_DEPTH
        }
    }
    panic!("expected a too-deep directory to produce an invalid handle before reaching here");
}
