/**
 * CHECKERS - Implémentations concrètes des opérations déclaratives
 *
 * RÔLE : Chaque checker est une fonction pure (args) -> (bool, erreur),
 * appelée par le dispatcher via une énumération fermée des types connus.
 * Un type inconnu produit un résultat en échec, jamais un abandon du batch.
 */

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use veriflot_rpc::{Operation, OperationResult};

/// Closed set of operation kinds the daemon knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    FileExists,
    FileContains,
    ProcessRunning,
}

impl CheckKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "file_exists" => Some(Self::FileExists),
            "file_contains" => Some(Self::FileContains),
            "process_running" => Some(Self::ProcessRunning),
            _ => None,
        }
    }
}

/// Runs one operation. A checker error is distinct from "check returned
/// false": both land in the result, the batch never aborts.
pub fn run_check(op: &Operation) -> OperationResult {
    let outcome = match CheckKind::from_tag(&op.op_type) {
        Some(CheckKind::FileExists) => file_exists(&op.path_arg),
        Some(CheckKind::FileContains) => file_contains(&op.path_arg, &op.check_arg),
        Some(CheckKind::ProcessRunning) => process_running(&op.check_arg, &op.path_arg),
        None => {
            return OperationResult {
                success: false,
                err: Some(format!("unhandled operation type: {}", op.op_type)),
            }
        }
    };

    match outcome {
        Ok(success) => OperationResult { success, err: None },
        Err(e) => OperationResult {
            success: false,
            err: Some(format!("{e:#}")),
        },
    }
}

/// Checks if the file or directory exists.
fn file_exists(path: &str) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("stat {path}")),
    }
}

/// Reads the file line by line looking for the substring.
fn file_contains(path: &str, word: &str) -> Result<bool> {
    let file = File::open(path).with_context(|| format!("open {path}"))?;
    if word.is_empty() {
        bail!("check pattern is empty");
    }
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {path}"))?;
        if line.contains(word) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Checks if a process is running, matching the command's basename
/// (`check` arg) and/or its full path (`path` arg) against /proc.
#[cfg(target_os = "linux")]
fn process_running(basename: &str, full_path: &str) -> Result<bool> {
    let proc_dir = Path::new("/proc");
    for entry in std::fs::read_dir(proc_dir).context("open /proc")? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        // pid directories only
        if entry.file_name().to_string_lossy().parse::<u64>().is_err() {
            continue;
        }

        let cmdline = match std::fs::read(entry.path().join("cmdline")) {
            Ok(raw) => raw,
            // process died between readdir and read
            Err(_) => continue,
        };
        let end = cmdline.iter().position(|b| *b == 0).unwrap_or(cmdline.len());
        if end == 0 {
            continue;
        }
        let command = String::from_utf8_lossy(&cmdline[..end]).into_owned();

        if !full_path.is_empty() && command == full_path {
            return Ok(true);
        }
        if !basename.is_empty() {
            let name = Path::new(&command)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name == basename {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(not(target_os = "linux"))]
fn process_running(_basename: &str, _full_path: &str) -> Result<bool> {
    bail!("process check is only supported on linux");
}
