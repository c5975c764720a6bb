//! Shared helpers for integration tests: a live server on an ephemeral port
//! and directory fixtures.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use dirserve_core::{AppState, PipelineOptions, SandboxRoot, serve};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running server bound to `127.0.0.1:0`.
pub struct TestServer {
    base: String,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    /// Starts a server with default pipeline options.
    pub async fn start(root: &Path) -> Self {
        Self::start_with(root, PipelineOptions::default()).await
    }

    /// Starts a server with the given pipeline options.
    pub async fn start_with(root: &Path, options: PipelineOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().expect("listener has no address");
        let shutdown = CancellationToken::new();
        let root = SandboxRoot::new(root).expect("invalid test root");
        let state = AppState::new(root, options, shutdown.clone());
        let handle = tokio::spawn(serve::serve(listener, state));
        Self {
            base: format!("http://{addr}"),
            shutdown,
            handle,
        }
    }

    /// Absolute URL for a raw (already encoded) path and query.
    pub fn url(&self, path_and_query: &str) -> String {
        format!("{}{path_and_query}", self.base)
    }

    /// Signals shutdown without waiting.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Shuts the server down and waits for the accept loop to end.
    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(10), self.handle)
            .await
            .expect("server did not shut down")
            .expect("server task panicked")
            .expect("server returned an error");
    }
}

/// Decodes a tar stream into `path -> contents` for regular file entries.
pub fn untar(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut archive = tar::Archive::new(bytes);
    let mut out = BTreeMap::new();
    for entry in archive.entries().expect("not a tar stream") {
        let mut entry = entry.expect("corrupt tar entry");
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .expect("entry path")
            .to_string_lossy()
            .into_owned();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).expect("entry body");
        out.insert(path, contents);
    }
    out
}

/// Reads every regular file below `root` with a plain recursive walk.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn visit(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).expect("read_dir") {
            let entry = entry.expect("dir entry");
            let file_type = entry.file_type().expect("file type");
            let path = entry.path();
            if file_type.is_dir() {
                visit(root, &path, out);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .expect("below root")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.insert(relative, fs::read(&path).expect("read file"));
            }
        }
    }

    let mut out = BTreeMap::new();
    visit(root, root, &mut out);
    out
}

/// Builds a tree with nested directories, awkward names, a long path and
/// files spanning several chunks.
pub fn populate_mixed_tree(root: &Path) {
    let long_dir = "a-directory-name-that-is-long-enough".repeat(2);
    fs::create_dir_all(root.join("docs/nested")).unwrap();
    fs::create_dir_all(root.join("media")).unwrap();
    fs::create_dir_all(root.join(&long_dir)).unwrap();

    fs::write(root.join("readme.txt"), b"top level\n").unwrap();
    fs::write(root.join("empty.dat"), b"").unwrap();
    fs::write(root.join("docs/notes with spaces.md"), b"# notes\n").unwrap();
    fs::write(root.join("docs/nested/r\u{e9}sum\u{e9}.txt"), "caf\u{e9}\n").unwrap();
    fs::write(root.join(&long_dir).join("deep-file-name.bin"), vec![3u8; 777]).unwrap();

    let big: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
    fs::write(root.join("media/big.bin"), big).unwrap();
    fs::write(root.join("media/exact-block.bin"), vec![0xAB; 512]).unwrap();
}

/// Writes `count` files of `size` bytes under `root/bulk`.
pub fn populate_bulk(root: &Path, count: usize, size: usize) {
    fs::create_dir_all(root.join("bulk")).unwrap();
    for i in 0..count {
        fs::write(
            root.join("bulk").join(format!("part-{i:04}.bin")),
            vec![(i % 251) as u8; size],
        )
        .unwrap();
    }
}
