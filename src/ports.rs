use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{Result, ScanError};

/// Parse a port spec such as `22,80,7000-7002` into an ordered list of TCP ports.
///
/// Tokens are comma separated; each is a single port or an inclusive range
/// `A-B`. Both bounds must lie in 1..=65535 and `A <= B`. Repeated ports are
/// kept at their first position only. Blank tokens are skipped.
pub fn parse_port_spec(s: &str) -> Result<Vec<u16>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    push_spec_tokens(s, &mut out, &mut seen)?;
    Ok(out)
}

/// Load a port spec from a file.
///
/// Same grammar as [`parse_port_spec`], spread over any number of lines;
/// everything after `#` on a line is ignored.
pub fn parse_port_file(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ScanError::FileAccess {
        path: path.to_path_buf(),
        source,
    })?;

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }
        push_spec_tokens(line, &mut out, &mut seen).map_err(|e| match e {
            ScanError::MalformedPortSpec(msg) => {
                ScanError::MalformedPortSpec(format!("line {}: {msg}", idx + 1))
            }
            other => other,
        })?;
    }
    Ok(out)
}

fn push_spec_tokens(s: &str, out: &mut Vec<u16>, seen: &mut HashSet<u16>) -> Result<()> {
    for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if let Some((a, b)) = token.split_once('-') {
            let start = parse_port_str(a.trim())
                .map_err(|e| ScanError::MalformedPortSpec(format!("range {token}: {e}")))?;
            let end = parse_port_str(b.trim())
                .map_err(|e| ScanError::MalformedPortSpec(format!("range {token}: {e}")))?;
            if start > end {
                return Err(ScanError::MalformedPortSpec(format!(
                    "invalid range {start}-{end} (start > end)"
                )));
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        let p = parse_port_str(token).map_err(ScanError::MalformedPortSpec)?;
        if seen.insert(p) {
            out.push(p);
        }
    }
    Ok(())
}

fn parse_port_str(s: &str) -> std::result::Result<u16, String> {
    let val: u32 = s
        .parse::<u32>()
        .map_err(|e| format!("invalid port value {s:?}: {e}"))?;
    if val == 0 || val > 65535 {
        return Err(format!("port out of range: {val}"));
    }
    Ok(val as u16)
}
