//! Incremental Sample Log Reader
//!
//! Giữ offset đã đọc; mỗi lần chỉ đọc phần byte mới được append.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::sample::{parse_line, ProcessMetricsSample};

pub struct SampleTail {
    path: PathBuf,
    offset: u64,
    /// Trailing bytes of an incomplete line, decoded once the newline arrives
    carry: Vec<u8>,
    /// Timestamps within a run never go backwards
    last_timestamp: Option<DateTime<Utc>>,
}

impl SampleTail {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            carry: Vec::new(),
            last_timestamp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read newly appended bytes and parse complete lines.
    /// Malformed lines are dropped silently, out-of-order samples with a debug log.
    pub fn read_new(&mut self) -> io::Result<Vec<ProcessMetricsSample>> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();

        if len < self.offset {
            log::debug!("Sample log truncated ({} < {}), rereading", len, self.offset);
            self.offset = 0;
            self.carry.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut bytes = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut bytes)?;
        self.offset += bytes.len() as u64;
        self.carry.extend_from_slice(&bytes);

        let Some(idx) = self.carry.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let rest = self.carry.split_off(idx + 1);
        let complete = std::mem::replace(&mut self.carry, rest);

        let text = String::from_utf8_lossy(&complete);
        let mut samples = Vec::new();
        for sample in text.lines().filter_map(parse_line) {
            if let Some(last) = self.last_timestamp {
                if sample.timestamp < last {
                    log::debug!("Dropping out-of-order sample {} (last {})", sample.timestamp, last);
                    continue;
                }
            }
            self.last_timestamp = Some(sample.timestamp);
            samples.push(sample);
        }
        Ok(samples)
    }
}
