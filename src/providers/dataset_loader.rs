//! `dataset_loader` module: fetches dataset archives over HTTP and unpacks
//! them under the dataset root

use crate::core::error::OperationError;
use crate::core::event::{self, Counters, ProgressEvent, ProgressStream};
use crate::persistence::ResultStore;
use crate::providers::blocking;
use crate::registry::{Operation, OperationDescriptor, OperationProvider, ParamType, Params};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const MODULE: &str = "dataset_loader";

/// Provider for the `dataset_loader` module
pub struct DatasetLoader {
    data_dir: PathBuf,
    store: Arc<dyn ResultStore>,
    client: reqwest::Client,
}

impl DatasetLoader {
    pub fn new(data_dir: PathBuf, store: Arc<dyn ResultStore>) -> Self {
        Self {
            data_dir,
            store,
            client: reqwest::Client::new(),
        }
    }
}

impl OperationProvider for DatasetLoader {
    fn module_name(&self) -> &str {
        MODULE
    }

    fn operations(&self) -> Vec<(OperationDescriptor, Arc<dyn Operation>)> {
        let load_by_url = LoadByUrl {
            data_dir: self.data_dir.clone(),
            store: self.store.clone(),
            client: self.client.clone(),
        };

        let unzip_file = UnzipFile {
            data_dir: self.data_dir.clone(),
            store: self.store.clone(),
        };

        vec![
            (
                OperationDescriptor::new("load_by_url")
                    .param("url", ParamType::String)
                    .param("file_name", ParamType::String),
                Arc::new(load_by_url) as Arc<dyn Operation>,
            ),
            (
                OperationDescriptor::new("unzip_file")
                    .param("zip_file_path_or_name", ParamType::String)
                    .param("destination_folder", ParamType::String),
                Arc::new(unzip_file) as Arc<dyn Operation>,
            ),
        ]
    }
}

struct LoadByUrl {
    data_dir: PathBuf,
    store: Arc<dyn ResultStore>,
    client: reqwest::Client,
}

impl Operation for LoadByUrl {
    fn invoke(&self, params: Params) -> Result<ProgressStream, OperationError> {
        let url = params.require_str("url")?;
        let file_name = params.require_str("file_name")?;
        let destination = self.data_dir.join(&file_name);

        if destination.exists() {
            info!("Dataset {} already present at {}", file_name, destination.display());
            return Ok(event::from_events(vec![ProgressEvent::message(format!(
                "File {} already exists",
                file_name
            ))]));
        }

        let client = self.client.clone();
        let store = self.store.clone();
        let start = Download::Start {
            url,
            destination,
            file_name,
        };

        Ok(stream::unfold(start, move |state| {
            let client = client.clone();
            let store = store.clone();
            async move { advance(state, &client, store.as_ref()).await }
        })
        .boxed())
    }
}

enum Download {
    Start {
        url: String,
        destination: PathBuf,
        file_name: String,
    },
    Receiving {
        chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
        file: tokio::fs::File,
        counters: Counters,
        destination: PathBuf,
        file_name: String,
    },
    Done,
}

type Step = (Result<ProgressEvent, OperationError>, Download);

async fn advance(state: Download, client: &reqwest::Client, store: &dyn ResultStore) -> Option<Step> {
    match state {
        Download::Start {
            url,
            destination,
            file_name,
        } => Some(match connect(client, &url, destination, file_name).await {
            Ok(step) => step,
            Err(err) => (Err(err), Download::Done),
        }),
        Download::Receiving {
            mut chunks,
            mut file,
            mut counters,
            destination,
            file_name,
        } => match chunks.next().await {
            Some(Ok(chunk)) => {
                if let Err(err) = file.write_all(&chunk).await {
                    drop(file);
                    discard(&destination).await;
                    return Some((Err(err.into()), Download::Done));
                }
                counters.succeeded += chunk.len() as u64;
                Some((
                    Ok(counters.into()),
                    Download::Receiving {
                        chunks,
                        file,
                        counters,
                        destination,
                        file_name,
                    },
                ))
            }
            Some(Err(err)) => {
                drop(file);
                discard(&destination).await;
                Some((Err(err.into()), Download::Done))
            }
            None => Some((finish(file, &destination, &file_name, store).await, Download::Done)),
        },
        Download::Done => None,
    }
}

async fn connect(
    client: &reqwest::Client,
    url: &str,
    destination: PathBuf,
    file_name: String,
) -> Result<Step, OperationError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!("Downloading {} to {}", url, destination.display());
    let response = client.get(url).send().await?;
    if response.status() != reqwest::StatusCode::OK {
        warn!("Download of {} failed with status {}", url, response.status());
        return Ok((
            Ok(ProgressEvent::message(format!(
                "Error in downloading file. Status code: {}",
                response.status().as_u16()
            ))),
            Download::Done,
        ));
    }

    let counters = Counters::new(response.content_length().unwrap_or(0));
    let file = tokio::fs::File::create(&destination).await?;
    let chunks = response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
        .boxed();

    Ok((
        Ok(counters.into()),
        Download::Receiving {
            chunks,
            file,
            counters,
            destination,
            file_name,
        },
    ))
}

async fn finish(
    mut file: tokio::fs::File,
    destination: &Path,
    file_name: &str,
    store: &dyn ResultStore,
) -> Result<ProgressEvent, OperationError> {
    file.flush().await?;
    store
        .record_dataset(file_name, &destination.to_string_lossy())
        .await?;
    info!("Downloaded {}", destination.display());
    Ok(ProgressEvent::message(format!("{} File Downloaded", file_name)))
}

async fn discard(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!("Could not remove partial download {}: {}", path.display(), err);
    }
}

struct UnzipFile {
    data_dir: PathBuf,
    store: Arc<dyn ResultStore>,
}

impl Operation for UnzipFile {
    fn invoke(&self, params: Params) -> Result<ProgressStream, OperationError> {
        let archive = PathBuf::from(params.require_str("zip_file_path_or_name")?);
        // Bare names and relative paths live under the dataset root
        let archive = if archive.is_absolute() {
            archive
        } else {
            self.data_dir.join(archive)
        };
        let destination = self.data_dir.join(params.require_str("destination_folder")?);

        if !archive.exists() {
            warn!("Archive {} not found", archive.display());
            return Ok(event::from_events(vec![ProgressEvent::message(format!(
                "File {} does not exist",
                archive.display()
            ))]));
        }

        let store = self.store.clone();
        Ok(stream::once(async move {
            unzip(archive, destination, store.as_ref()).await
        })
        .boxed())
    }
}

async fn unzip(archive: PathBuf, destination: PathBuf, store: &dyn ResultStore) -> Result<ProgressEvent, OperationError> {
    info!("Extracting {} to {}", archive.display(), destination.display());
    let (from, to) = (archive.clone(), destination.clone());
    blocking(move || {
        std::fs::create_dir_all(&to)?;
        let mut zip = zip::ZipArchive::new(std::fs::File::open(&from)?)?;
        zip.extract(&to)?;
        Ok(())
    })
    .await?;

    store
        .record_extraction(&archive.to_string_lossy(), &destination.to_string_lossy())
        .await?;
    Ok(ProgressEvent::message(format!(
        "Unzipped {} to {}",
        archive.display(),
        destination.display()
    )))
}

/// A directory under the dataset root that directly contains files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDirectory {
    pub name: String,
    pub path: PathBuf,
    pub files: Vec<String>,
}

/// Directories holding files under `root`, skipping archive metadata folders.
/// A missing root lists as empty.
pub fn list_dataset_dirs(root: &Path) -> io::Result<Vec<DatasetDirectory>> {
    let mut found = Vec::new();
    if root.is_dir() {
        collect_dirs(root, &mut found)?;
    }
    Ok(found)
}

fn collect_dirs(dir: &Path, found: &mut Vec<DatasetDirectory>) -> io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for entry in entries {
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        } else {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    if !files.is_empty() && !dir.to_string_lossy().contains("__MACOSX") {
        found.push(DatasetDirectory {
            name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: dir.to_path_buf(),
            files,
        });
    }

    for sub in subdirs {
        collect_dirs(&sub, found)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryResultStore;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn params(url: &str, file_name: &str) -> Params {
        json!({ "url": url, "file_name": file_name })
            .as_object()
            .cloned()
            .unwrap()
            .into()
    }

    /// Serve one canned HTTP response on a local port
    async fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/archive.zip", addr)
    }

    fn loader(dir: &Path, store: Arc<InMemoryResultStore>) -> Arc<dyn Operation> {
        DatasetLoader::new(dir.to_path_buf(), store)
            .operations()
            .remove(0)
            .1
    }

    fn unzipper(dir: &Path, store: Arc<InMemoryResultStore>) -> Arc<dyn Operation> {
        DatasetLoader::new(dir.to_path_buf(), store)
            .operations()
            .remove(1)
            .1
    }

    fn unzip_params(archive: &str, destination: &str) -> Params {
        json!({ "zip_file_path_or_name": archive, "destination_folder": destination })
            .as_object()
            .cloned()
            .unwrap()
            .into()
    }

    fn write_archive(path: &Path) {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        writer.start_file("set1/images/a.png", options).unwrap();
        writer.write_all(b"pixels").unwrap();
        writer.start_file("set1/labels.txt", options).unwrap();
        writer.write_all(b"cat").unwrap();
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_existing_file_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("y.zip"), b"old").unwrap();
        let store = Arc::new(InMemoryResultStore::new());

        let events: Vec<_> = loader(dir.path(), store.clone())
            .invoke(params("http://127.0.0.1:9/never", "y.zip"))
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &ProgressEvent::message("File y.zip already exists")
        );
        assert!(store.list_datasets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_streams_byte_counters() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryResultStore::new());

        let events: Vec<ProgressEvent> = loader(dir.path(), store.clone())
            .invoke(params(&url, "y.zip"))
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.first(), Some(&ProgressEvent::Counters(Counters::new(5))));
        let last_counters = events.iter().filter_map(|e| e.counters()).last().unwrap();
        assert_eq!(last_counters.succeeded, 5);
        assert_eq!(events.last(), Some(&ProgressEvent::message("y.zip File Downloaded")));

        assert_eq!(std::fs::read(dir.path().join("y.zip")).unwrap(), b"hello");
        let datasets = store.list_datasets().await.unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].name, "y.zip");
    }

    #[tokio::test]
    async fn test_non_ok_status_reports_message() {
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();

        let events: Vec<ProgressEvent> = loader(dir.path(), Arc::new(InMemoryResultStore::new()))
            .invoke(params(&url, "y.zip"))
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![ProgressEvent::message("Error in downloading file. Status code: 404")]
        );
        assert!(!dir.path().join("y.zip").exists());
    }

    #[test]
    fn test_missing_params_raise_at_invoke() {
        let dir = tempfile::tempdir().unwrap();
        let op = loader(dir.path(), Arc::new(InMemoryResultStore::new()));
        assert!(matches!(
            op.invoke(Params::new()),
            Err(OperationError::MissingParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_unzip_by_name_extracts_and_records() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(&dir.path().join("y.zip"));
        let store = Arc::new(InMemoryResultStore::new());

        let events: Vec<ProgressEvent> = unzipper(dir.path(), store.clone())
            .invoke(unzip_params("y.zip", "y"))
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        let archive = dir.path().join("y.zip");
        let destination = dir.path().join("y");
        assert_eq!(
            events,
            vec![ProgressEvent::message(format!(
                "Unzipped {} to {}",
                archive.display(),
                destination.display()
            ))]
        );
        assert_eq!(
            std::fs::read(destination.join("set1").join("images").join("a.png")).unwrap(),
            b"pixels"
        );

        let extractions = store.list_extractions().await.unwrap();
        assert_eq!(extractions.len(), 1);
        assert_eq!(extractions[0].zip_file_path, archive.to_string_lossy());
        assert_eq!(extractions[0].destination_folder, destination.to_string_lossy());

        let dirs = list_dataset_dirs(&destination).unwrap();
        assert_eq!(dirs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(), vec!["set1", "images"]);
    }

    #[tokio::test]
    async fn test_unzip_absolute_path_outside_root() {
        let archives = tempfile::tempdir().unwrap();
        let archive = archives.path().join("z.zip");
        write_archive(&archive);
        let root = tempfile::tempdir().unwrap();

        let events: Vec<_> = unzipper(root.path(), Arc::new(InMemoryResultStore::new()))
            .invoke(unzip_params(&archive.to_string_lossy(), "z"))
            .unwrap()
            .collect()
            .await;

        assert!(events[0].is_ok());
        assert!(root.path().join("z").join("set1").join("labels.txt").is_file());
    }

    #[tokio::test]
    async fn test_unzip_missing_archive_reports_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryResultStore::new());

        let events: Vec<ProgressEvent> = unzipper(dir.path(), store.clone())
            .invoke(unzip_params("absent.zip", "out"))
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![ProgressEvent::message(format!(
                "File {} does not exist",
                dir.path().join("absent.zip").display()
            ))]
        );
        assert!(store.list_extractions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unzip_corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.zip"), b"not a zip").unwrap();

        let events: Vec<_> = unzipper(dir.path(), Arc::new(InMemoryResultStore::new()))
            .invoke(unzip_params("bad.zip", "bad"))
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Err(OperationError::Archive(_))));
    }

    #[test]
    fn test_list_dataset_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("set1").join("images")).unwrap();
        std::fs::create_dir_all(root.join("__MACOSX").join("set1")).unwrap();
        std::fs::write(root.join("set1").join("images").join("a.png"), b"x").unwrap();
        std::fs::write(root.join("__MACOSX").join("set1").join("._a"), b"x").unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();

        let dirs = list_dataset_dirs(root).unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].name, "images");
        assert_eq!(dirs[0].files, vec!["a.png"]);

        assert!(list_dataset_dirs(&root.join("absent")).unwrap().is_empty());
    }
}
