use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// A line-oriented text file split into `#tag` / `#endtag` sections.
///
/// All the text formats of this crate (roi files, the distance matrix index,
/// tree files) share this layout.
pub struct SectionFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl SectionFile {
    pub fn read(path: &Path) -> Result<SectionFile> {
        let content = fs::read_to_string(path)?;
        let lines = content.lines().map(str::to_string).collect();
        Ok(SectionFile { path: path.to_path_buf(), lines })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }

    /// Returns the raw lines between `#tag` and `#endtag`.
    pub fn lines_for_tag(&self, tag: &str) -> Vec<&str> {
        let open = format!("#{tag}");
        let close = format!("#end{tag}");
        let mut out = Vec::new();
        let mut inside = false;
        for line in &self.lines {
            let line = line.trim_end();
            if !inside {
                inside = line == open;
            } else if line == close {
                break;
            } else {
                out.push(line);
            }
        }
        out
    }

    /// Returns the lines of a section, each split on whitespace.
    pub fn split_lines_for_tag(&self, tag: &str) -> Vec<Vec<&str>> {
        self.lines_for_tag(tag)
            .into_iter()
            .map(|line| line.split_whitespace().collect())
            .collect()
    }

    /// The single line of a section that must hold exactly one.
    pub fn single_line_for_tag(&self, tag: &'static str) -> Result<Vec<&str>> {
        let mut lines = self.split_lines_for_tag(tag);
        match lines.len() {
            0 => Err(Error::MissingSection { path: self.path.clone(), tag }),
            1 => Ok(lines.pop().unwrap()),
            _ => Err(Error::MultiLineSection { path: self.path.clone(), tag }),
        }
    }

    /// Helper for "this token would not parse" errors pointing at the file.
    pub fn parse_error(&self, msg: impl Into<String>) -> Error {
        Error::Parse { path: self.path.clone(), msg: msg.into() }
    }
}
