use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;

pub const DEFAULT_PROC_ROOT: &str = "/proc";

lazy_static! {
    static ref PAGE_SIZE: u64 = {
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if raw > 0 {
            raw as u64
        } else {
            4096
        }
    };
}

pub fn page_size() -> u64 {
    *PAGE_SIZE
}

#[derive(Debug)]
pub enum ProcError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, String),
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcError::Io(path, err) => write!(f, "read {} failed: {}", path.display(), err),
            ProcError::Parse(path, detail) => {
                write!(f, "parse {} failed: {}", path.display(), detail)
            }
        }
    }
}

impl std::error::Error for ProcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcError::Io(_, err) => Some(err),
            ProcError::Parse(..) => None,
        }
    }
}

/// Whether the process-accounting tree is mounted under `root`.
pub fn can_collect_process(root: &Path) -> bool {
    fs::metadata(root).map(|m| m.is_dir()).unwrap_or(false)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcStat {
    pub vsize: u64,
    pub rss_pages: u64,
}

impl ProcStat {
    pub fn virtual_memory(&self) -> u64 {
        self.vsize
    }

    pub fn resident_memory(&self) -> u64 {
        self.rss_pages.saturating_mul(page_size())
    }
}

/// Soft limits; `None` means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcLimits {
    pub open_files: Option<u64>,
    pub address_space: Option<u64>,
}

/// Read-only view of one `<root>/<pid>` directory.
#[derive(Clone, Debug)]
pub struct ProcHandle {
    dir: PathBuf,
}

impl ProcHandle {
    pub fn open(root: &Path, pid: u32) -> Result<Self, ProcError> {
        let dir = root.join(pid.to_string());
        let meta = fs::metadata(&dir).map_err(|e| ProcError::Io(dir.clone(), e))?;
        if !meta.is_dir() {
            return Err(ProcError::Parse(dir, "not a directory".to_string()));
        }
        Ok(ProcHandle { dir })
    }

    pub fn stat(&self) -> Result<ProcStat, ProcError> {
        let path = self.dir.join("stat");
        let raw = read_to_string(&path)?;
        parse_stat(&raw).map_err(|detail| ProcError::Parse(path, detail))
    }

    pub fn file_descriptors_len(&self) -> Result<usize, ProcError> {
        let path = self.dir.join("fd");
        let entries = fs::read_dir(&path).map_err(|e| ProcError::Io(path.clone(), e))?;
        Ok(entries.filter_map(Result::ok).count())
    }

    pub fn limits(&self) -> Result<ProcLimits, ProcError> {
        let path = self.dir.join("limits");
        let raw = read_to_string(&path)?;
        parse_limits(&raw).map_err(|detail| ProcError::Parse(path, detail))
    }

    pub fn status(&self) -> Result<ProcStatus, ProcError> {
        let path = self.dir.join("status");
        let raw = read_to_string(&path)?;
        Ok(parse_status(&raw))
    }
}

fn read_to_string(path: &Path) -> Result<String, ProcError> {
    fs::read_to_string(path).map_err(|e| ProcError::Io(path.to_path_buf(), e))
}

// Fields after the closing paren of comm start at field 3 (state).
const STAT_VSIZE_INDEX: usize = 23 - 3;
const STAT_RSS_INDEX: usize = 24 - 3;

fn parse_stat(raw: &str) -> Result<ProcStat, String> {
    let close = raw
        .rfind(')')
        .ok_or_else(|| "missing comm terminator".to_string())?;
    let fields: Vec<&str> = raw[close + 1..].split_whitespace().collect();
    if fields.len() <= STAT_RSS_INDEX {
        return Err(format!("expected at least {} fields", STAT_RSS_INDEX + 1));
    }

    let vsize = fields[STAT_VSIZE_INDEX]
        .parse::<u64>()
        .map_err(|e| format!("vsize: {}", e))?;
    // rss is signed in the kernel; clamp transient negatives to zero
    let rss = fields[STAT_RSS_INDEX]
        .parse::<i64>()
        .map_err(|e| format!("rss: {}", e))?;

    Ok(ProcStat {
        vsize,
        rss_pages: rss.max(0) as u64,
    })
}

fn parse_limits(raw: &str) -> Result<ProcLimits, String> {
    let mut limits = ProcLimits::default();
    let mut seen = false;

    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("Max open files") {
            limits.open_files = parse_soft_limit(rest)?;
            seen = true;
        } else if let Some(rest) = line.strip_prefix("Max address space") {
            limits.address_space = parse_soft_limit(rest)?;
            seen = true;
        }
    }

    if !seen {
        return Err("no recognised limits".to_string());
    }
    Ok(limits)
}

fn parse_soft_limit(rest: &str) -> Result<Option<u64>, String> {
    let token = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| "missing soft limit".to_string())?;
    if token == "unlimited" {
        return Ok(None);
    }
    token
        .parse::<u64>()
        .map(Some)
        .map_err(|e| format!("soft limit {:?}: {}", token, e))
}

/// Subset of `<pid>/status`, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcStatus {
    pub vm_data: u64,
    pub vm_stack: u64,
    pub threads: u64,
}

fn parse_status(raw: &str) -> ProcStatus {
    let mut status = ProcStatus::default();
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let number = value
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        match key {
            "VmData" => status.vm_data = number.saturating_mul(1024),
            "VmStk" => status.vm_stack = number.saturating_mul(1024),
            "Threads" => status.threads = number,
            _ => {}
        }
    }
    status
}
