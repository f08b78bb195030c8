//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. A lone process had been tasked with reading
//! a file. Just a file, they said. What could go wrong?
//!
//! The file didn't exist. The disk was full. And somewhere in the depths of a
//! BufReader, a line was growing to 1MB because someone forgot a newline.
//!
//! This module is the file transport: a source that reads dumps (or JSON lines,
//! JSON arrays, log lines) page by page, and a sink that writes dumps.
//!
//! 🚰 File → BufReader → IngestTransform → pages of `Document`s
//! 🕳️ `Document` → DumpLine → BufWriter → File
//! 🦆 (mandatory, no notes)

use serde::Deserialize;

mod file_sink;
mod file_source;

pub(crate) use file_sink::FileSink;
pub(crate) use file_source::FileSource;

/// 📜 What the lines of an input file look like.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// 💾 One search hit per line, as written by the file sink.
    #[default]
    Dump,
    /// 📄 One JSON object per line.
    JsonLine,
    /// 🧱 A single JSON array of objects.
    JsonArray,
    /// 🪵 Free-form text, one `{"message": …}` per line.
    LogLine,
}

// -- 📂 configs live next to the backend that reads them
#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub file_name: String,
    #[serde(default)]
    pub input_type: InputType,
    /// 📦 Index for dialects that don't carry one. Dumps ignore it.
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
}

/// 💾 Dumps are always written in the dump dialect, so a file name is all it takes.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSinkConfig {
    pub file_name: String,
}
