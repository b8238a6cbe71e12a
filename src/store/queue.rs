//! FIFO queue persisted to a JSON file after every mutation.
//!
//! The intended consumer pattern is `peek`, process, then `mark_done`, so an
//! item whose processing is interrupted stays at the front. The queue is not
//! meant to be shared between processes.

use crate::store::StoreError;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct PersistentQueue<T> {
    path: PathBuf,
    items: VecDeque<T>,
}

impl<T: Serialize + DeserializeOwned> PersistentQueue<T> {
    /// Opens the queue stored at `path`.
    ///
    /// A missing file gives an empty queue. With `overwrite` any stored items
    /// are discarded.
    pub fn open<P: AsRef<Path>>(path: P, overwrite: bool) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let items = if !overwrite && path.is_file() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            VecDeque::new()
        };
        let queue = PersistentQueue { path, items };
        if overwrite {
            queue.persist()?;
        }
        debug!("Opened queue {} with {} items", queue.path.display(), queue.len());
        Ok(queue)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends one item.
    pub fn put(&mut self, item: T) -> Result<(), StoreError> {
        self.items.push_back(item);
        self.persist()
    }

    /// Appends every item, writing to disk once.
    pub fn put_many<I: IntoIterator<Item = T>>(&mut self, items: I) -> Result<(), StoreError> {
        self.items.extend(items);
        self.persist()
    }

    /// Removes and returns the front item.
    pub fn get(&mut self) -> Result<Option<T>, StoreError> {
        let item = self.items.pop_front();
        if item.is_some() {
            self.persist()?;
        }
        Ok(item)
    }

    /// Front item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Removes the front item once its processing is complete.
    pub fn mark_done(&mut self) -> Result<(), StoreError> {
        if self.items.pop_front().is_some() {
            self.persist()?;
        }
        Ok(())
    }

    /// Moves the front item to the back of the queue.
    pub fn requeue_front(&mut self) -> Result<(), StoreError> {
        if let Some(item) = self.items.pop_front() {
            self.items.push_back(item);
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), StoreError> {
        fs::write(&self.path, serde_json::to_string(&self.items)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fifo_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queues").join("truths.json");
        let mut queue = PersistentQueue::open(&path, false).unwrap();
        assert!(queue.is_empty());
        queue.put(vec![0.0, 0.1]).unwrap();
        queue.put_many([vec![0.0, 0.2], vec![0.0, 0.3]]).unwrap();

        let mut reopened: PersistentQueue<Vec<f64>> = PersistentQueue::open(&path, false).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.peek(), Some(&vec![0.0, 0.1]));
        reopened.mark_done().unwrap();
        assert_eq!(reopened.get().unwrap(), Some(vec![0.0, 0.2]));

        let reopened: PersistentQueue<Vec<f64>> = PersistentQueue::open(&path, false).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.peek(), Some(&vec![0.0, 0.3]));
    }

    #[test]
    fn test_requeue_and_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.json");
        let mut queue = PersistentQueue::open(&path, false).unwrap();
        queue.put_many(["a".to_string(), "b".to_string()]).unwrap();
        queue.requeue_front().unwrap();
        assert_eq!(queue.peek().map(String::as_str), Some("b"));

        let fresh: PersistentQueue<String> = PersistentQueue::open(&path, true).unwrap();
        assert!(fresh.is_empty());
        let mut reopened: PersistentQueue<String> = PersistentQueue::open(&path, false).unwrap();
        assert!(reopened.is_empty());
        assert_eq!(reopened.get().unwrap(), None);
        reopened.mark_done().unwrap();
    }
}
