#![allow(dead_code)]

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use corpus_index::config::{parse_config, Config};
use corpus_index::embedding::EmbeddingGateway;
use corpus_index::{IndexError, IndexingController, Result};

/// Marker that makes [`HashGateway`] fail the batch containing it.
pub const POISON: &str = "POISON";

/// Deterministic bag-of-words embedding: each lowercase word adds 1.0 to
/// the bucket its FNV-1a hash selects.
pub struct HashGateway {
    model: String,
    dims: usize,
    pub calls: AtomicUsize,
}

impl HashGateway {
    pub fn new(model: &str, dims: usize) -> Arc<Self> {
        Arc::new(Self {
            model: model.to_string(),
            dims,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let mut h: u64 = 0xcbf29ce484222325;
            for b in word.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % self.dims as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingGateway for HashGateway {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains(POISON)) {
            return Err(IndexError::EmbeddingProvider(
                "refused poisoned batch".to_string(),
            ));
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// A temporary corpus plus index directory.
pub struct Env {
    pub tmp: TempDir,
    pub root: PathBuf,
    pub index_dir: PathBuf,
}

impl Env {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("corpus");
        let index_dir = tmp.path().join("state");
        fs::create_dir_all(&root).unwrap();
        Self {
            tmp,
            root,
            index_dir,
        }
    }

    /// Chunks are 50 chars with 10 overlap (stride 40).
    pub fn config(&self) -> Config {
        parse_config(&format!(
            r#"[corpus]
root = "{}"

[index]
dir = "{}"

[chunking]
chunk_size = 50
chunk_overlap = 10

[retrieval]
max_results = 5
min_score = 0.0

[embedding]
batch_size = 2
concurrency = 2
timeout_secs = 5
"#,
            self.root.display(),
            self.index_dir.display()
        ))
        .unwrap()
    }

    pub fn open(&self, gateway: Arc<HashGateway>) -> IndexingController {
        IndexingController::open(self.config(), gateway).unwrap()
    }

    /// Write a corpus file and stamp it with `secs` past the epoch.
    pub fn write(&self, rel: &str, content: impl AsRef<[u8]>, secs: u64) -> PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        set_mtime(&path, secs);
        path
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.index_dir.join("vectors.idx")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.index_dir.join("catalog.json")
    }
}

pub fn set_mtime(path: &Path, secs: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

/// Minimal DOCX with one paragraph per entry.
pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    zip_with(&[("word/document.xml", xml)])
}

/// Minimal PPTX with one text run per slide.
pub fn pptx(slides: &[&str]) -> Vec<u8> {
    let entries: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                format!(
                    "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
                    text
                ),
            )
        })
        .collect();
    let refs: Vec<(&str, String)> = entries
        .iter()
        .map(|(n, b)| (n.as_str(), b.clone()))
        .collect();
    zip_with(&refs)
}

fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}
