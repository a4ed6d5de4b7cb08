use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::capability::{Artifact, Content};
use crate::error::Result;
use crate::inventory::{GroupId, ItemId};
use crate::persist;
use crate::plan::Task;

/// Scratch space for one group: each successful task's output and each
/// batch's composite. Survives failures so a resumed run skips finished work.
#[derive(Debug, Clone)]
pub struct StageArea {
    dir: PathBuf,
}

impl StageArea {
    pub fn new(stage_root: &Path, group: &GroupId) -> Self {
        Self {
            dir: stage_root.join(persist::group_key(group.as_str())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn task_path(&self, task: &Task) -> PathBuf {
        self.dir
            .join(format!("task-{}.{}", item_key(task.id()), task.output.extension()))
    }

    pub fn save_task_output(&self, task: &Task, content: &Content) -> Result<PathBuf> {
        let path = self.task_path(task);
        persist::write_bytes_atomic(&path, content.as_bytes())?;
        Ok(path)
    }

    pub fn has_task_output(&self, task: &Task) -> bool {
        self.task_path(task).is_file()
    }

    pub fn load_task_output(&self, task: &Task) -> Result<Option<Content>> {
        Ok(read_optional(&self.task_path(task))?
            .map(|bytes| Content::from_bytes(task.output, bytes)))
    }

    fn composite_paths(&self, index: usize) -> (PathBuf, PathBuf) {
        (
            self.dir.join(format!("batch-{index}.bin")),
            self.dir.join(format!("batch-{index}.txt")),
        )
    }

    pub fn save_composite(&self, index: usize, artifact: &Artifact) -> Result<()> {
        let (document_path, text_path) = self.composite_paths(index);
        match &artifact.document {
            Some(document) => persist::write_bytes_atomic(&document_path, document)?,
            None => remove_optional(&document_path)?,
        }
        persist::write_bytes_atomic(&text_path, artifact.text.as_bytes())
    }

    pub fn load_composite(&self, index: usize) -> Result<Option<Artifact>> {
        let (document_path, text_path) = self.composite_paths(index);
        let Some(text) = read_optional(&text_path)? else {
            return Ok(None);
        };
        Ok(Some(Artifact {
            document: read_optional(&document_path)?,
            text: String::from_utf8_lossy(&text).into_owned(),
        }))
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                debug!("Cleared staging {}", self.dir.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn item_key(id: &ItemId) -> String {
    blake3::hash(id.as_str().as_bytes()).to_hex()[..16].to_string()
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ItemRef;
    use crate::plan::{ActionKind, ContentFormat};
    use tempfile::tempdir;

    fn task(id: &str, output: ContentFormat) -> Task {
        Task {
            item: ItemRef {
                id: ItemId::new(id),
                path: format!("R/{id}"),
                mime_type: None,
            },
            action: ActionKind::DirectInclude,
            output,
            estimated_size: 1,
            fingerprint: "fp".to_string(),
        }
    }

    #[test]
    fn test_task_outputs_and_composites() {
        let dir = tempdir().unwrap();
        let stage = StageArea::new(dir.path(), &GroupId::new("Acme"));
        let text_task = task("a", ContentFormat::Text);
        let doc_task = task("b", ContentFormat::Document);

        assert!(!stage.has_task_output(&text_task));
        assert_eq!(stage.load_task_output(&text_task).unwrap(), None);
        stage
            .save_task_output(&text_task, &Content::Text("alpha".into()))
            .unwrap();
        stage
            .save_task_output(&doc_task, &Content::Document(vec![1, 2, 3]))
            .unwrap();
        assert_eq!(
            stage.load_task_output(&text_task).unwrap(),
            Some(Content::Text("alpha".into()))
        );
        assert_eq!(
            stage.load_task_output(&doc_task).unwrap(),
            Some(Content::Document(vec![1, 2, 3]))
        );

        assert_eq!(stage.load_composite(0).unwrap(), None);
        let artifact = Artifact {
            document: None,
            text: "merged".into(),
        };
        stage.save_composite(0, &artifact).unwrap();
        assert_eq!(stage.load_composite(0).unwrap(), Some(artifact));

        stage.clear().unwrap();
        assert!(!stage.dir().exists());
        stage.clear().unwrap();
    }
}
