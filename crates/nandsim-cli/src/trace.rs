//! Trace-file parsing: one operation per line.
//!
//! Format: `R <addr>`, `W <addr> [payload]`, `T <addr>`. Blank lines and
//! lines starting with `#` are skipped.

use anyhow::{bail, Context, Result};

/// One logical operation from a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    /// Read a logical page.
    Read(u64),
    /// Write a logical page with a payload token.
    Write(u64, u64),
    /// Trim a logical page.
    Trim(u64),
}

/// Parses a whole trace file body.
pub fn parse(contents: &str) -> Result<Vec<TraceOp>> {
    let mut ops = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        ops.push(parse_line(line).with_context(|| format!("trace line {}", number + 1))?);
    }
    Ok(ops)
}

fn parse_line(line: &str) -> Result<TraceOp> {
    let mut fields = line.split_whitespace();
    let op = fields.next().context("missing op")?;
    let addr: u64 = fields
        .next()
        .context("missing address")?
        .parse()
        .context("bad address")?;
    match op {
        "R" | "r" => Ok(TraceOp::Read(addr)),
        "W" | "w" => {
            let payload = match fields.next() {
                Some(field) => field.parse().context("bad payload")?,
                // Without an explicit payload, the address stands in.
                None => addr,
            };
            Ok(TraceOp::Write(addr, payload))
        }
        "T" | "t" => Ok(TraceOp::Trim(addr)),
        other => bail!("unknown op {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_trace() {
        let ops = parse("# header\nW 0 7\nR 0\n\nT 0\nw 5\n").unwrap();
        assert_eq!(
            ops,
            vec![
                TraceOp::Write(0, 7),
                TraceOp::Read(0),
                TraceOp::Trim(0),
                TraceOp::Write(5, 5),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("X 1").is_err());
        assert!(parse("W").is_err());
        assert!(parse("W abc").is_err());
    }
}
