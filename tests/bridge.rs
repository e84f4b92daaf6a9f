use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tempfile::TempDir;
use zip::CompressionMethod;
use zip::write::FileOptions;

use zipbridge::{
    Archive, AtomicFileSink, BridgeConfig, BridgeError, ChunkedFileSource, PayloadLoader,
    PushSource, SourceFile, list_files, write_stream,
};

fn build_zip(path: &Path, files: &[(&str, &[u8], CompressionMethod)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, data, method) in files {
        writer
            .start_file(*name, FileOptions::default().compression_method(*method))
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn archive_entry_round_trips_to_disk() {
    let dir = TempDir::new().unwrap();
    let zip_path = dir.path().join("bundle.zip");
    let data = payload(200_000, 3);
    build_zip(&zip_path, &[("assets/blob.bin", &data, CompressionMethod::Deflated)]);

    let config = BridgeConfig::default().with_chunk_size(16 * 1024);
    let archive = Archive::open_path(&zip_path, config).await.unwrap();
    let pull = archive.entry_stream("assets/blob.bin").await.unwrap();

    let dest = dir.path().join("blob.bin");
    let push = PushSource::spawn(pull.boxed(), config.push_capacity);
    let written = AtomicFileSink::new(&dest).write(push).await.unwrap();

    assert_eq!(written, data.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn corrupted_entry_leaves_no_destination() {
    let dir = TempDir::new().unwrap();
    let zip_path = dir.path().join("broken.zip");
    let data = payload(50_000, 9);
    build_zip(&zip_path, &[("data.bin", &data, CompressionMethod::Stored)]);

    let mut raw = std::fs::read(&zip_path).unwrap();
    let at = raw.windows(64).position(|w| w == &data[..64]).unwrap();
    raw[at + 40_000] ^= 0x55;
    std::fs::write(&zip_path, raw).unwrap();

    let config = BridgeConfig::default().with_chunk_size(4096);
    let archive = Archive::open_path(&zip_path, config).await.unwrap();
    let stream = archive.entry_stream("data.bin").await.unwrap().boxed();

    let dest = dir.path().join("data.bin");
    let err = write_stream(&dest, stream, &config).await.unwrap_err();
    assert!(matches!(err, BridgeError::ArchiveEntryError(_)));
    assert!(!dest.exists());
}

#[tokio::test]
async fn directory_tree_copies_file_by_file() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let files = [("a.txt", payload(10, 1)), ("nested/b.bin", payload(9000, 2)), ("nested/deeper/c", payload(0, 0))];
    for (name, data) in &files {
        let path = src.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    let config = BridgeConfig::default().with_chunk_size(1024);
    let listed = list_files(src.path()).await.unwrap();
    assert_eq!(listed.len(), files.len());

    for path in listed {
        let rel = path.strip_prefix(src.path()).unwrap();
        let out = dst.path().join(rel);
        std::fs::create_dir_all(out.parent().unwrap()).unwrap();
        let stream = ChunkedFileSource::open(&path, config.chunk_size).await.unwrap();
        write_stream(&out, stream, &config).await.unwrap();
    }

    for (name, data) in &files {
        assert_eq!(&std::fs::read(dst.path().join(name)).unwrap(), data);
    }
}

#[tokio::test]
async fn archive_entries_offer_every_consumption_mode() {
    let dir = TempDir::new().unwrap();
    let zip_path = dir.path().join("mixed.zip");
    let text = b"hello from inside the archive".to_vec();
    build_zip(&zip_path, &[("docs/hello.txt", &text, CompressionMethod::Deflated)]);

    let archive = Arc::new(
        Archive::open_path(&zip_path, BridgeConfig::default().with_chunk_size(8))
            .await
            .unwrap(),
    );
    let entry = archive.entry("docs/hello.txt").unwrap().clone();
    let file = Arc::new(SourceFile::from_entry(archive.clone(), entry));

    assert_eq!(file.path(), "docs/hello.txt");
    assert_eq!(file.name(), "hello.txt");
    assert_eq!(file.size(), text.len() as u64);
    assert!(file.last_modified() > 0);

    let windows: Vec<usize> = file
        .stream()
        .await
        .unwrap()
        .map(|chunk| chunk.unwrap().len())
        .collect()
        .await;
    assert_eq!(windows, vec![8, 8, 8, 5]);

    assert_eq!(file.array_buffer().await.unwrap(), &text[..]);
    assert_eq!(file.blob().await.unwrap().slice(0, 5).bytes(), &b"hello"[..]);

    let loader = PayloadLoader::new();
    let (a, b) = tokio::join!(loader.load(file.clone()), loader.load(file.clone()));
    assert_eq!(a.unwrap(), b.unwrap());
}
