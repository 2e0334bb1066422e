use crate::error::DocumentError;
use crate::protocol::{DocumentDetail, DocumentInfo};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReadDirStream;

const TRACING_TARGET: &str = "docchat::documents";

const EXTENSIONS: [&str; 2] = ["txt", "md"];

/// Supplies the document context for a chat session.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Concatenates the content of the given documents, or of every known
    /// document when `ids` is `None`. Unknown ids are skipped.
    async fn resolve(&self, ids: Option<&[String]>) -> Result<String, DocumentError>;
}

/// Read-only directory of `.txt` and `.md` documents. The id of a document
/// is its file stem.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists documents sorted by file name. A missing directory is empty.
    pub async fn list(&self) -> Result<Vec<DocumentInfo>, DocumentError> {
        let list_err = |source| DocumentError::List {
            path: self.root.clone(),
            source,
        };

        let entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(list_err(e)),
        };

        let mut documents = Vec::new();
        let mut entries = ReadDirStream::new(entries);
        while let Some(entry) = entries.next().await {
            let entry = entry.map_err(list_err)?;
            let path = entry.path();
            if !has_document_extension(&path) {
                continue;
            }
            let metadata = tokio::fs::metadata(&path).await.map_err(list_err)?;
            if !metadata.is_file() {
                continue;
            }
            let (Some(id), Some(name)) = (path.file_stem(), path.file_name()) else {
                continue;
            };
            documents.push(DocumentInfo {
                id: id.to_string_lossy().into_owned(),
                name: name.to_string_lossy().into_owned(),
                size: metadata.len(),
            });
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }

    /// Looks up `<id>.txt`, then `<id>.md`.
    pub async fn get(&self, id: &str) -> Result<Option<DocumentDetail>, DocumentError> {
        if !is_plain_id(id) {
            tracing::debug!(target: TRACING_TARGET, id, "rejecting document id");
            return Ok(None);
        }

        for ext in EXTENSIONS {
            let name = format!("{}.{}", id, ext);
            let path = self.root.join(&name);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    return Ok(Some(DocumentDetail {
                        id: id.to_string(),
                        name,
                        content,
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(DocumentError::Read { path, source }),
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl ContentProvider for DocumentStore {
    async fn resolve(&self, ids: Option<&[String]>) -> Result<String, DocumentError> {
        let all_ids;
        let ids = match ids {
            Some(ids) => ids,
            None => {
                all_ids = self
                    .list()
                    .await?
                    .into_iter()
                    .map(|doc| doc.id)
                    .collect::<Vec<_>>();
                &all_ids[..]
            }
        };

        let mut parts = Vec::new();
        for id in ids {
            match self.get(id).await? {
                Some(doc) => parts.push(render_document(&doc.name, &doc.content)),
                None => {
                    tracing::debug!(target: TRACING_TARGET, id = %id, "skipping unknown document");
                }
            }
        }

        Ok(parts.join("\n"))
    }
}

/// Renders one document as it appears in the model context.
pub fn render_document(name: &str, content: &str) -> String {
    format!("=== Document: {} ===\n{}\n", name, content)
}

fn has_document_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.contains(&ext))
}

fn is_plain_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}
