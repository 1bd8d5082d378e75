//! Line framing for the logger control pipes.
//!
//! Wire format: one message per line, each line a JSON array of strings
//! (`["keyword","field",...]\n`). JSON string escaping keeps embedded
//! newlines out of the frame, so the newline alone delimits messages.

use crate::error::{ZenlogError, ZenlogResult};

/// Encode a list of fields into a single newline-terminated line.
pub fn encode_line(fields: &[String]) -> ZenlogResult<String> {
    let mut line = serde_json::to_string(fields)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line (with or without its trailing newline) into fields.
pub fn decode_line(line: &str) -> ZenlogResult<Vec<String>> {
    let line = line.trim_end_matches(['\n', '\r']);
    let fields: Vec<String> = serde_json::from_str(line)?;
    if fields.is_empty() {
        return Err(ZenlogError::InvalidMessage("empty message".into()));
    }
    Ok(fields)
}

/// Streaming line decoder: accumulates bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes and return every complete line, without the terminator.
    ///
    /// Lines that are not valid UTF-8 are converted lossily; the decoder
    /// above them rejects anything that is not a JSON string array.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);
        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            if !text.trim().is_empty() {
                lines.push(text.into_owned());
            }
        }

        lines
    }

    /// Number of bytes of an incomplete line still buffered.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
