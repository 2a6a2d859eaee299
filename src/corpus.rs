//! Corpus store.
//!
//! A store is either a directory, each regular file being one prog, or a
//! single file holding progs separated by blank lines.
use crate::model::{
    parse::{parse_prog, ParseError, ParseMode},
    Prog, Target,
};
use std::{
    fs::{read_dir, read_to_string},
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to open corpus '{0}': {1}")]
    Open(PathBuf, std::io::Error),
    #[error("failed to deserialize corpus record '{key}': {source}")]
    Parse { key: String, source: ParseError },
}

/// Records of a corpus store, sorted by key.
#[derive(Debug, Default)]
pub struct Db {
    records: Vec<(String, String)>,
}

impl Db {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        let err = |e| CorpusError::Open(path.to_path_buf(), e);
        let meta = std::fs::metadata(path).map_err(err)?;
        let records = if meta.is_dir() {
            let mut records = Vec::new();
            for entry in read_dir(path).map_err(err)? {
                let entry = entry.map_err(err)?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') || !entry.file_type().map_err(err)?.is_file() {
                    continue;
                }
                let text = read_to_string(entry.path()).map_err(|e| CorpusError::Open(entry.path(), e))?;
                records.push((name, text));
            }
            records.sort_unstable_by(|a, b| a.0.cmp(&b.0));
            records
        } else {
            split_records(&read_to_string(path).map_err(err)?)
        };
        Ok(Self { records })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// (key, text) of each record.
    pub fn records(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.records.iter().map(|(k, v)| (&k[..], &v[..]))
    }
}

/// Split blank line separated records, groups of only comments are skipped.
fn split_records(text: &str) -> Vec<(String, String)> {
    let mut records = Vec::new();
    let mut group = String::new();
    let mut has_call = false;
    for line in text.lines().chain(std::iter::once("")) {
        let l = line.trim();
        if l.is_empty() {
            if has_call {
                records.push((format!("#{}", records.len()), std::mem::take(&mut group)));
            }
            group.clear();
            has_call = false;
            continue;
        }
        if !l.starts_with('#') {
            has_call = true;
        }
        group.push_str(line);
        group.push('\n');
    }
    records
}

/// Load and deserialize the corpus at `path`, no path means an empty corpus.
pub fn read_corpus(path: Option<&Path>, target: &Target) -> Result<Vec<Prog>, CorpusError> {
    let path = match path {
        Some(path) => path,
        None => return Ok(Vec::new()),
    };
    let db = Db::open(path)?;
    let mut progs = Vec::with_capacity(db.len());
    for (key, text) in db.records() {
        let p = parse_prog(target, text, ParseMode::NonStrict).map_err(|source| CorpusError::Parse {
            key: key.to_string(),
            source,
        })?;
        progs.push(p);
    }
    Ok(progs)
}
