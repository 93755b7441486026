mod common;

use std::sync::Arc;

use zipvfs::{Options, VfsConfig, ZipEntryContext, config};

use common::{read_all, write_nested_fixture, write_zip, zip_bytes};

fn test_config(temp_root: &std::path::Path) -> Arc<VfsConfig> {
    Arc::new(VfsConfig {
        temp_root: temp_root.to_path_buf(),
        ..VfsConfig::default()
    })
}

fn open(path: &std::path::Path, options: Options) -> Arc<ZipEntryContext> {
    ZipEntryContext::open_with_config(
        path.to_str().unwrap(),
        options,
        Arc::new(VfsConfig::default()),
    )
    .unwrap()
}

#[test]
fn empty_entry_and_synthesized_parent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outer.jar");
    write_zip(&path, &[("META-INF/empty.txt", b"")]);

    let ctx = open(&path, Options::new());
    let root = ctx.root();

    let meta_inf = root.child("META-INF").unwrap().unwrap();
    assert!(meta_inf.exists().unwrap());
    assert!(!meta_inf.is_leaf().unwrap());
    assert_eq!(meta_inf.size().unwrap(), 0);
    // The archive has no directory entry, so the parent is synthesized
    // and reports the source's timestamp.
    assert_eq!(
        meta_inf.last_modified().unwrap(),
        root.last_modified().unwrap()
    );

    let children = meta_inf.children().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name(), "empty.txt");

    let empty = meta_inf.child("empty.txt").unwrap().unwrap();
    assert!(empty.is_leaf().unwrap());
    assert_eq!(empty.size().unwrap(), 0);
    assert_eq!(read_all(empty.open_stream().unwrap()), b"");
}

#[test]
fn nested_archive_mounts_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outer.jar");
    write_nested_fixture(&path);

    let ctx = open(&path, Options::new());
    let root = ctx.root();

    let inner = root.child("lib/inner.jar").unwrap().unwrap();
    assert_eq!(inner.name(), "inner.jar");
    assert!(inner.is_archive());
    assert!(inner.mounted_context().is_some());
    assert!(inner.exists().unwrap());

    let b = inner.child("a/b.txt").unwrap().unwrap();
    assert_eq!(read_all(b.open_stream().unwrap()), b"hi");
    assert!(b.is_leaf().unwrap());
    assert_eq!(b.size().unwrap(), 2);
    assert!(b.is_nested());

    // The mounted tree enumerates through the delegator.
    let names: Vec<_> = inner
        .children()
        .unwrap()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    assert_eq!(names, vec!["a"]);
}

#[test]
fn copy_mode_extracts_once() {
    let dir = tempfile::tempdir().unwrap();
    let temp_root = tempfile::tempdir().unwrap();
    let path = dir.path().join("outer.jar");
    write_nested_fixture(&path);

    let options = Options::new();
    options.set(config::USE_COPY, "true");
    let ctx = ZipEntryContext::open_with_config(
        path.to_str().unwrap(),
        options,
        test_config(temp_root.path()),
    )
    .unwrap();

    {
        let inner = ctx.root().child("lib/inner.jar").unwrap().unwrap();
        assert_eq!(
            read_all(inner.child("a/b.txt").unwrap().unwrap().open_stream().unwrap()),
            b"hi"
        );

        let nested_dir = temp_root.path().join("vfs-nested.tmp");
        let files: Vec<_> = std::fs::read_dir(&nested_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("_inner.jar"));
        assert_eq!(files[0].len(), "00000000_inner.jar".len());
        assert!(files[0][..8].chars().all(|c| c.is_ascii_hexdigit()));

        // Repeat lookups reuse the mount; no second extraction appears.
        ctx.root().child("lib/inner.jar").unwrap().unwrap();
        assert_eq!(std::fs::read_dir(&nested_dir).unwrap().count(), 1);
    }

    // Dropping the context releases the mounted sub-context, which owns
    // and removes its extracted file.
    drop(ctx);
    let leftover = std::fs::read_dir(temp_root.path().join("vfs-nested.tmp"))
        .unwrap()
        .count();
    assert_eq!(leftover, 0);
}

#[test]
fn copy_mode_propagates_to_deeper_mounts() {
    let dir = tempfile::tempdir().unwrap();
    let temp_root = tempfile::tempdir().unwrap();
    let path = dir.path().join("outer.jar");
    let innermost = zip_bytes(&[("core.txt", b"deepest")]);
    let middle = zip_bytes(&[("lib/mid.jar", &innermost)]);
    write_zip(&path, &[("bundle.zip", &middle)]);

    let options = Options::new();
    options.set(config::USE_COPY, "true");
    let ctx = ZipEntryContext::open_with_config(
        path.to_str().unwrap(),
        options,
        test_config(temp_root.path()),
    )
    .unwrap();

    let leaf = ctx
        .root()
        .child("bundle.zip/lib/mid.jar/core.txt")
        .unwrap()
        .unwrap();
    assert_eq!(read_all(leaf.open_stream().unwrap()), b"deepest");
    assert!(leaf.is_nested());

    // Both nesting levels were extracted; the mounted sub-context
    // inherited `useCopy` from its container.
    let mut names: Vec<_> = std::fs::read_dir(temp_root.path().join("vfs-nested.tmp"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.ends_with("_bundle.zip")));
    assert!(names.iter().any(|n| n.ends_with("_mid.jar")));
}

#[test]
fn deep_entries_synthesize_the_whole_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deep.zip");
    write_zip(&path, &[("deep/a/b/c.txt", b"leaf")]);

    let ctx = open(&path, Options::new());
    let mut handler = ctx.root();
    for segment in ["deep", "a", "b"] {
        handler = handler.child(segment).unwrap().unwrap();
        assert!(!handler.is_leaf().unwrap());
        assert_eq!(handler.size().unwrap(), 0);
    }
    let leaf = handler.child("c.txt").unwrap().unwrap();
    assert_eq!(read_all(leaf.open_stream().unwrap()), b"leaf");
}

#[test]
fn stepwise_and_joined_lookups_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agree.zip");
    write_zip(&path, &[("a/b", b"payload"), ("a/c", b"other")]);

    let ctx = open(&path, Options::new());
    let root = ctx.root();

    let stepwise = root
        .child("a")
        .unwrap()
        .unwrap()
        .child("b")
        .unwrap()
        .unwrap();
    let joined = root.child("a/b").unwrap().unwrap();
    assert_eq!(stepwise.local_path(), joined.local_path());
    assert_eq!(
        read_all(stepwise.open_stream().unwrap()),
        read_all(joined.open_stream().unwrap())
    );
}

#[test]
fn streams_match_a_direct_archive_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.zip");
    let entries: &[(&str, &[u8])] = &[
        ("one.txt", b"first payload"),
        ("sub/two.bin", &[0xAB; 4096]),
        ("sub/deeper/three.txt", b"third"),
    ];
    write_zip(&path, entries);

    let ctx = open(&path, Options::new());
    let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();

    for (name, _) in entries {
        let handler = ctx.root().child(name).unwrap().unwrap();
        let via_vfs = read_all(handler.open_stream().unwrap());

        let mut direct = Vec::new();
        std::io::Read::read_to_end(&mut archive.by_name(name).unwrap(), &mut direct).unwrap();
        assert_eq!(via_vfs, direct, "mismatch for entry '{name}'");
    }
}

#[test]
fn children_reflect_first_path_segments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.zip");
    write_zip(
        &path,
        &[
            ("alpha/x.txt", b"1"),
            ("alpha/y.txt", b"2"),
            ("beta/z.txt", b"3"),
            ("top.txt", b"4"),
        ],
    );

    let ctx = open(&path, Options::new());
    let mut roots: Vec<_> = ctx
        .root()
        .children()
        .unwrap()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    roots.sort();
    assert_eq!(roots, vec!["alpha", "beta", "top.txt"]);

    let mut alpha: Vec<_> = ctx
        .root()
        .child("alpha")
        .unwrap()
        .unwrap()
        .children()
        .unwrap()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    alpha.sort();
    assert_eq!(alpha, vec!["x.txt", "y.txt"]);
}

#[test]
fn doubly_nested_archives_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outer.jar");
    let innermost = zip_bytes(&[("core.txt", b"deepest")]);
    let middle = zip_bytes(&[("lib/mid.jar", &innermost)]);
    write_zip(&path, &[("bundle.zip", &middle)]);

    let ctx = open(&path, Options::new());
    let leaf = ctx
        .root()
        .child("bundle.zip/lib/mid.jar/core.txt")
        .unwrap()
        .unwrap();
    assert_eq!(read_all(leaf.open_stream().unwrap()), b"deepest");
}

#[test]
fn corrupt_nested_archive_degrades_to_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outer.jar");
    write_zip(&path, &[("broken.jar", b"not a real archive"), ("ok.txt", b"fine")]);

    let ctx = open(&path, Options::new());
    let broken = ctx.root().child("broken.jar").unwrap().unwrap();
    assert!(!broken.is_archive());
    assert!(broken.is_leaf().unwrap());
    assert_eq!(read_all(broken.open_stream().unwrap()), b"not a real archive");

    // The container is otherwise intact.
    let ok = ctx.root().child("ok.txt").unwrap().unwrap();
    assert_eq!(read_all(ok.open_stream().unwrap()), b"fine");
}

#[test]
fn uris_compose_from_the_context_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outer.jar");
    write_nested_fixture(&path);

    let ctx = open(&path, Options::new());
    assert!(ctx.uri().starts_with("vfszip:"));
    assert!(ctx.uri().ends_with("outer.jar"));

    let lib = ctx.root().child("lib").unwrap().unwrap();
    let uri = lib.uri().unwrap();
    assert!(uri.ends_with("outer.jar/lib/"), "unexpected uri '{uri}'");

    let real = ctx.root().real_url().unwrap();
    assert!(real.starts_with("jar:file:"));
    assert!(real.ends_with("outer.jar!/"), "unexpected real url '{real}'");
}
