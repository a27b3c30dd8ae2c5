//! Behaviour every storage client must share, run against each backend.

#![allow(dead_code)]

use bytes::Bytes;
use futures::StreamExt;
use std::path::Path;

use artifactstore_storage::stream::collect;
use artifactstore_storage::{Error, StorageClient, StoragePath};

pub fn path(raw: &str) -> StoragePath {
    StoragePath::parse(raw).unwrap()
}

/// Deterministic payload that is not a repeat of a short pattern.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 7) % 256) as u8).collect()
}

/// Write `data` to `dir/name`, creating parents.
pub fn write_fixture(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let target = dir.join(name);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, data).unwrap();
    target
}

/// Upload, list, presign, download and delete a small tree of cat pictures.
pub async fn cats_scenario(client: &dyn StorageClient, scratch: &Path) {
    let cats = write_fixture(scratch, "assets/cats.jpg", &payload(4096));
    let dir = path("abc123");
    let rpath = path("abc123/cats.jpg");
    let nested = path("abc123/nested/really/deep/cats-2.jpg");

    if client.exists(&dir).await.unwrap() {
        client.rm(&dir, true).await.unwrap();
    }
    assert!(!client.exists(&dir).await.unwrap());

    client.put(&cats, &rpath).await.unwrap();
    assert!(client.exists(&rpath).await.unwrap());
    client.put(&cats, &nested).await.unwrap();

    let url = client.generate_presigned_url(&rpath, 1).await.unwrap();
    assert!(!url.as_str().is_empty());

    assert!(!client.find(None).await.unwrap().is_empty());
    assert_eq!(client.find(Some(&nested.parent().unwrap())).await.unwrap().len(), 1);
    assert_eq!(
        client.find(Some(&dir)).await.unwrap(),
        vec![rpath.clone(), nested.clone()]
    );

    let downloaded = scratch.join("out").join("cats.jpg");
    client.get(&downloaded, &rpath, false).await.unwrap();
    assert_eq!(std::fs::read(&downloaded).unwrap(), payload(4096));

    client.rm(&rpath, false).await.unwrap();
    assert!(!client.exists(&rpath).await.unwrap());
    assert!(client.exists(&dir).await.unwrap());

    client.rm(&dir, true).await.unwrap();
    assert!(!client.exists(&dir).await.unwrap());
}

/// `put` then `get` returns the same bytes.
pub async fn round_trip(client: &dyn StorageClient, scratch: &Path) {
    let data = payload(300_000);
    let local = write_fixture(scratch, "weights.bin", &data);
    let remote = path("models/v1/weights.bin");

    client.put(&local, &remote).await.unwrap();

    let out = scratch.join("download").join("weights.bin");
    client.get(&out, &remote, false).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);

    let infos = client.find_info(Some(&remote)).await.unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].path, remote);
    assert_eq!(infos[0].size, data.len() as u64);
    assert_eq!(infos[0].name(), "weights.bin");
    assert_eq!(infos[0].suffix(), "bin");
}

/// `put` overwrites existing objects.
pub async fn overwrite(client: &dyn StorageClient, scratch: &Path) {
    let remote = path("configs/settings.json");
    let first = write_fixture(scratch, "first.json", b"{\"v\":1}");
    let second = write_fixture(scratch, "second.json", b"{\"v\":2}");

    client.put(&first, &remote).await.unwrap();
    client.put(&second, &remote).await.unwrap();

    let data = collect(client.iterfile(&remote, 1024).await.unwrap()).await.unwrap();
    assert_eq!(&data[..], b"{\"v\":2}");
}

/// Directory upload maps relative paths and recursive get mirrors them back.
pub async fn directory_round_trip(client: &dyn StorageClient, scratch: &Path) {
    let tree = scratch.join("tree");
    write_fixture(&tree, "a.txt", b"alpha");
    write_fixture(&tree, "sub/b.txt", b"bravo");
    write_fixture(&tree, "sub/deeper/c.txt", b"charlie");

    client.put(&tree, &path("dataset")).await.unwrap();
    assert_eq!(
        client.find(Some(&path("dataset"))).await.unwrap(),
        vec![
            path("dataset/a.txt"),
            path("dataset/sub/b.txt"),
            path("dataset/sub/deeper/c.txt"),
        ]
    );

    let not_recursive = client.get(&scratch.join("nope"), &path("dataset"), false).await;
    assert!(matches!(not_recursive, Err(Error::InvalidOperation(_))));

    let out = scratch.join("mirror");
    client.get(&out, &path("dataset"), true).await.unwrap();
    assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(std::fs::read(out.join("sub/b.txt")).unwrap(), b"bravo");
    assert_eq!(std::fs::read(out.join("sub/deeper/c.txt")).unwrap(), b"charlie");
}

/// Listing never matches on a partial segment.
pub async fn listing_is_segment_aware(client: &dyn StorageClient, scratch: &Path) {
    let file = write_fixture(scratch, "x.txt", b"x");
    client.put(&file, &path("abc/x.txt")).await.unwrap();
    client.put(&file, &path("abc123/x.txt")).await.unwrap();

    assert_eq!(
        client.find(Some(&path("abc"))).await.unwrap(),
        vec![path("abc/x.txt")]
    );
    assert!(client.find(Some(&path("ab"))).await.unwrap().is_empty());
    assert!(!client.exists(&path("ab")).await.unwrap());

    let everything = client.find(None).await.unwrap();
    let mut sorted = everything.clone();
    sorted.sort();
    assert_eq!(everything, sorted);
}

/// Deleting twice, or deleting nothing, succeeds.
pub async fn idempotent_delete(client: &dyn StorageClient, scratch: &Path) {
    let file = write_fixture(scratch, "tmp.txt", b"tmp");
    let remote = path("scratch/tmp.txt");
    client.put(&file, &remote).await.unwrap();

    client.rm(&remote, false).await.unwrap();
    client.rm(&remote, false).await.unwrap();
    client.rm(&path("never/was/here"), true).await.unwrap();
    assert!(!client.exists(&remote).await.unwrap());
}

/// Non-recursive delete of a directory is refused and removes nothing.
pub async fn rm_directory_requires_recursive(client: &dyn StorageClient, scratch: &Path) {
    let file = write_fixture(scratch, "keep.txt", b"keep");
    client.put(&file, &path("keep/one.txt")).await.unwrap();
    client.put(&file, &path("keep/two.txt")).await.unwrap();

    let result = client.rm(&path("keep"), false).await;
    assert!(matches!(result, Err(Error::InvalidOperation(_))));
    assert_eq!(client.find(Some(&path("keep"))).await.unwrap().len(), 2);
}

/// Copies are independent of their source.
pub async fn copy_independence(client: &dyn StorageClient, scratch: &Path) {
    let file = write_fixture(scratch, "orig.txt", b"original");
    let src = path("copy-src/orig.txt");
    let dest = path("copy-dest/orig.txt");
    client.put(&file, &src).await.unwrap();

    client.copy(&src, &dest, false).await.unwrap();
    client.rm(&src, false).await.unwrap();

    let data = collect(client.iterfile(&dest, 4).await.unwrap()).await.unwrap();
    assert_eq!(&data[..], b"original");

    let missing = client.copy(&src, &path("elsewhere.txt"), false).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

/// Recursive copy preserves the relative layout.
pub async fn recursive_copy(client: &dyn StorageClient, scratch: &Path) {
    let tree = scratch.join("copytree");
    write_fixture(&tree, "one.txt", b"1");
    write_fixture(&tree, "inner/two.txt", b"2");
    client.put(&tree, &path("run/1")).await.unwrap();

    let refused = client.copy(&path("run/1"), &path("run/2"), false).await;
    assert!(matches!(refused, Err(Error::InvalidOperation(_))));

    client.copy(&path("run/1"), &path("run/2"), true).await.unwrap();
    assert_eq!(
        client.find(Some(&path("run/2"))).await.unwrap(),
        vec![path("run/2/inner/two.txt"), path("run/2/one.txt")]
    );
}

/// Streams arrive in bounded chunks and reassemble to the object.
pub async fn iterfile_chunks(client: &dyn StorageClient, scratch: &Path) {
    let data = payload(10_000);
    let file = write_fixture(scratch, "stream.bin", &data);
    let remote = path("streams/stream.bin");
    client.put(&file, &remote).await.unwrap();

    let chunks: Vec<Bytes> = client
        .iterfile(&remote, 1000)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    assert!(chunks.iter().all(|c| c.len() <= 1000));
    assert_eq!(chunks.concat(), data);

    let zero = client.iterfile(&remote, 0).await;
    assert!(matches!(zero, Err(Error::InvalidOperation(_))));

    let missing = client.iterfile(&path("streams/missing.bin"), 1000).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

/// Missing sources are reported as not found.
pub async fn missing_sources(client: &dyn StorageClient, scratch: &Path) {
    let put = client.put(&scratch.join("no-such-file"), &path("x")).await;
    assert!(matches!(put, Err(Error::NotFound(_))));

    let get = client.get(&scratch.join("x"), &path("no/such/object"), true).await;
    assert!(matches!(get, Err(Error::NotFound(_))));

    let presign = client.generate_presigned_url(&path("no/such/object"), 60).await;
    assert!(matches!(presign, Err(Error::NotFound(_))));
}

/// `put_stream` creates an object from bytes in memory.
pub async fn put_stream(client: &dyn StorageClient) {
    let chunks: Vec<artifactstore_storage::Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"streamed ")),
        Ok(Bytes::from_static(b"upload")),
    ];
    let remote = path("uploads/streamed.txt");
    client
        .put_stream(Box::pin(futures::stream::iter(chunks)), &remote)
        .await
        .unwrap();

    let data = collect(client.iterfile(&remote, 64).await.unwrap()).await.unwrap();
    assert_eq!(&data[..], b"streamed upload");
}

/// A path below an existing object is absent, never an error.
pub async fn paths_through_files(client: &dyn StorageClient, scratch: &Path) {
    let cats = write_fixture(scratch, "cats.jpg", b"cat");
    client.put(&cats, &path("abc123/cats.jpg")).await.unwrap();
    let below = path("abc123/cats.jpg/x");

    assert!(client.find(Some(&below)).await.unwrap().is_empty());
    assert!(client.find_info(Some(&below)).await.unwrap().is_empty());
    assert!(!client.exists(&below).await.unwrap());
    client.rm(&below, false).await.unwrap();
    client.rm(&below, true).await.unwrap();

    assert!(matches!(
        client.iterfile(&below, 64).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        client.get(&scratch.join("below"), &below, true).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        client.copy(&below, &path("elsewhere"), true).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        client.generate_presigned_url(&below, 60).await,
        Err(Error::NotFound(_))
    ));
    assert!(client.exists(&path("abc123/cats.jpg")).await.unwrap());
}

/// Names of in-flight writes cannot be used for objects.
pub async fn reserved_names(client: &dyn StorageClient, scratch: &Path) {
    let reserved = path("uploads/.weights.bin.5d2c.artifactstore-part");

    let chunks: Vec<artifactstore_storage::Result<Bytes>> = vec![Ok(Bytes::from_static(b"x"))];
    let streamed = client
        .put_stream(Box::pin(futures::stream::iter(chunks)), &reserved)
        .await;
    assert!(matches!(streamed, Err(Error::InvalidPath(_))));

    let file = write_fixture(scratch, "weights.bin", b"weights");
    assert!(matches!(
        client.put(&file, &reserved).await,
        Err(Error::InvalidPath(_))
    ));

    let tree = scratch.join("with-partial");
    write_fixture(&tree, "a.txt", b"a");
    write_fixture(&tree, ".b.txt.77aa.artifactstore-part", b"half");
    assert!(matches!(
        client.put(&tree, &path("tree")).await,
        Err(Error::InvalidPath(_))
    ));
    assert!(client.find(Some(&path("uploads"))).await.unwrap().is_empty());
    assert!(client.find(Some(&path("tree"))).await.unwrap().is_empty());
}
