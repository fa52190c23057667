//! Loads a worker's instruction list from a text script.
//!
//! Each non-blank line is either a bare integer, which adds that many
//! milliseconds of delay before the next send, or `<target> <words...>`,
//! which sends the words (joined by single spaces) to `target` after the
//! delay accumulated so far and resets the accumulator.
//!
//! ```text
//! 500
//! 250
//! 2 hello there
//! 3 second message
//! ```
//!
//! sends "hello there" to peer 2 after 750ms, then "second message" to peer
//! 3 straight away.

use std::{
    fs, io,
    num::ParseIntError,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::warn;

use crate::{net::PeerId, peer::Instruction};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("could not read script {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("line {line}: `{text}` is not a valid delay: {source}")]
    InvalidDelay {
        line: usize,
        text: String,
        #[source]
        source: ParseIntError,
    },
    #[error("line {line}: `{text}` is not a valid target peer id: {source}")]
    InvalidTarget {
        line: usize,
        text: String,
        #[source]
        source: ParseIntError,
    },
    #[error(
        "cannot tell which peer {} belongs to; name it after the peer id, e.g. `1.txt`",
        .0.display()
    )]
    MissingPeerId(PathBuf),
}

pub fn parse(source: PeerId, text: &str) -> Result<Vec<Instruction>, ScriptError> {
    let mut instructions = Vec::new();
    let mut pending_ms: u64 = 0;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            continue;
        };
        let rest: Vec<&str> = words.collect();

        if rest.is_empty() {
            let delay: u64 =
                first.parse().map_err(|e| ScriptError::InvalidDelay {
                    line: line_no,
                    text: first.to_owned(),
                    source: e,
                })?;
            pending_ms = pending_ms.saturating_add(delay);
            continue;
        }

        let target: i32 =
            first.parse().map_err(|e| ScriptError::InvalidTarget {
                line: line_no,
                text: first.to_owned(),
                source: e,
            })?;
        instructions.push(Instruction::new(
            pending_ms,
            source,
            PeerId(target),
            rest.join(" "),
        ));
        pending_ms = 0;
    }

    if pending_ms > 0 {
        warn!(peer = %source, pending_ms, "script ends with a delay and no send; ignoring it");
    }
    Ok(instructions)
}

pub fn load(path: &Path, source: PeerId) -> Result<Vec<Instruction>, ScriptError> {
    let text = fs::read_to_string(path).map_err(|e| ScriptError::Io {
        path: path.to_owned(),
        source: e,
    })?;
    parse(source, &text)
}

/// Reads the peer id off the leading digits of the file name, so `3.txt` and
/// `3-chatty.script` both belong to peer 3.
pub fn peer_id_from_path(path: &Path) -> Result<PeerId, ScriptError> {
    let missing = || ScriptError::MissingPeerId(path.to_owned());
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(missing)?;
    let digits: String =
        name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<i32>().map(PeerId).map_err(|_| missing())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn delays_accumulate_until_a_send() {
        let text = "500\n250\n2 hello there\n3 second   message\n\n100\n4 x\n";
        let parsed = parse(PeerId(1), text).unwrap();
        assert_eq!(
            parsed,
            vec![
                Instruction::new(750, PeerId(1), PeerId(2), "hello there"),
                Instruction::new(0, PeerId(1), PeerId(3), "second message"),
                Instruction::new(100, PeerId(1), PeerId(4), "x"),
            ]
        );
    }

    #[test]
    fn trailing_delay_is_dropped() {
        let parsed = parse(PeerId(1), "2 hi\n300\n").unwrap();
        assert_eq!(parsed, vec![Instruction::new(0, PeerId(1), PeerId(2), "hi")]);
        assert!(parse(PeerId(1), "").unwrap().is_empty());
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse(PeerId(1), "2 ok\n\nsoon\n").unwrap_err();
        assert!(matches!(err, ScriptError::InvalidDelay { line: 3, .. }));

        let err = parse(PeerId(1), "10\nbob hello\n").unwrap_err();
        assert!(matches!(err, ScriptError::InvalidTarget { line: 2, .. }));
        assert!(err.to_string().starts_with("line 2: `bob`"));

        let err = parse(PeerId(1), "-5\n").unwrap_err();
        assert!(matches!(err, ScriptError::InvalidDelay { line: 1, .. }));
    }

    #[test]
    fn peer_id_comes_from_the_file_name() {
        let id = |p: &str| peer_id_from_path(Path::new(p));
        assert_eq!(id("scripts/3.txt").unwrap(), PeerId(3));
        assert_eq!(id("12-chatty.script").unwrap(), PeerId(12));
        assert!(matches!(id("peer.txt"), Err(ScriptError::MissingPeerId(_))));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "20").unwrap();
        writeln!(file, "0 hi router").unwrap();
        let parsed = load(file.path(), PeerId(5)).unwrap();
        assert_eq!(parsed, vec![Instruction::new(20, PeerId(5), PeerId(0), "hi router")]);

        let gone = file.path().to_owned();
        drop(file);
        assert!(matches!(load(&gone, PeerId(5)), Err(ScriptError::Io { .. })));
    }
}
