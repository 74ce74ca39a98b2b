use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::json;

use crate::agent::Solution;

const QUESTION_LIMIT_CHARS: usize = 600;
const MAX_LOGGED_ANSWERS: usize = 50;

/// Append-only JSONL journal of answered questions. One record per question:
/// timestamp, run id, the question, the answer codes, and the action trace.
#[derive(Debug, Clone)]
pub struct RunLogger {
    path: PathBuf,
    run_id: String,
}

impl RunLogger {
    /// The journal lives next to the cache file.
    pub fn new(cache_path: &Path) -> Self {
        let dir = cache_path.parent().unwrap_or_else(|| Path::new("."));
        let path = dir.join("cgot_runs.jsonl");
        let run_id = format!("run-{}", Local::now().format("%Y%m%d-%H%M%S"));
        Self { path, run_id }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, question_idx: usize, question: &str, solution: &Solution) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open `{}`", self.path.display()))?;

        let answers: Vec<&String> = solution.answers.iter().take(MAX_LOGGED_ANSWERS).collect();
        let line = json!({
            "ts": Local::now().to_rfc3339(),
            "run_id": self.run_id,
            "question_idx": question_idx,
            "question": truncate_chars(question, QUESTION_LIMIT_CHARS),
            "answer_count": solution.answers.len(),
            "answers": answers,
            "trace": solution.trace,
        });

        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("…(truncated)");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CandidateSet;

    #[test]
    fn writes_one_json_line_per_question() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_path = dir.path().join("cache.json");
        let logger = RunLogger::new(&cache_path);

        let solution = Solution {
            answers: CandidateSet::from(["Q1".to_string(), "Q2".to_string()]),
            trace: vec!["Step 0: anchor".to_string()],
        };
        logger.write(0, "films starring X", &solution).expect("write");
        logger.write(1, "cities over 1M", &solution).expect("write");

        let text = std::fs::read_to_string(logger.path()).expect("read journal");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let rec: serde_json::Value = serde_json::from_str(lines[0]).expect("json line");
        assert_eq!(rec["answer_count"], 2);
        assert_eq!(rec["question"], "films starring X");
    }
}
