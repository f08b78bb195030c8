use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Split};
use tracing::{debug, trace, warn};

use super::{FileSourceConfig, InputType};
use crate::backends::Source;
use crate::common::Document;
use crate::error::MigrationError;
use crate::transforms::{DumpLine, IngestTransform, JsonLine, LogLine};

// -- 🗣️ which ingest transform reads the lines
enum LineDialect {
    Dump(DumpLine),
    Json(JsonLine),
    Log(LogLine),
}

impl LineDialect {
    fn transform_line(&self, line: &str) -> Result<Option<Document>, MigrationError> {
        match self {
            LineDialect::Dump(dialect) => dialect.transform_line(line),
            LineDialect::Json(dialect) => dialect.transform_line(line),
            LineDialect::Log(dialect) => dialect.transform_line(line),
        }
    }
}

enum Reader {
    Lines {
        // -- 🔪 raw byte lines, so one bad byte costs a line and not the whole file
        lines: Split<BufReader<File>>,
        dialect: LineDialect,
        line_number: u64,
    },
    // -- 🧱 a JSON array has no line boundaries, so it is parsed in one go
    Array(VecDeque<Document>),
}

/// 📂 FileSource: reads a file into pages of documents and moves on.
///
/// Think of it like a very diligent intern who reads a massive export, never complains,
/// and only stops when the page is full or the file ends. Malformed lines are logged
/// and skipped rather than ending the whole read.
pub(crate) struct FileSource {
    file_name: String,
    reader: Reader,
    page_size: usize,
    total: Option<u64>,
    returned: u64,
    skipped: u64,
    exhausted: bool,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("file_name", &self.file_name)
            .field("page_size", &self.page_size)
            .field("returned", &self.returned)
            .finish()
    }
}

impl FileSource {
    /// 🚀 Open the file. `fallback_index` is used when the config names no index.
    ///
    /// 💀 A missing or unreadable file is an `Io` error. A JSON array that doesn't parse
    /// is a `Protocol` error, raised here since the whole array is read up front.
    pub(crate) async fn new(
        config: &FileSourceConfig,
        fallback_index: Option<String>,
        page_size: usize,
    ) -> Result<Self, MigrationError> {
        let index = config
            .index
            .clone()
            .or(fallback_index)
            .unwrap_or_default();
        let mut file = File::open(&config.file_name).await?;

        let (reader, total) = match config.input_type {
            InputType::JsonArray => {
                let mut raw = String::new();
                file.read_to_string(&mut raw).await?;
                let values: Vec<Value> = serde_json::from_str(&raw).map_err(|err| {
                    MigrationError::Protocol(format!(
                        "'{}' is not a JSON array of objects: {err}",
                        config.file_name
                    ))
                })?;
                let wrapper = JsonLine {
                    index,
                    doc_type: config.doc_type.clone(),
                };
                let documents = values
                    .into_iter()
                    .map(|value| wrapper.document_from_value(value))
                    .collect::<Result<VecDeque<_>, _>>()?;
                let total = documents.len() as u64;
                (Reader::Array(documents), Some(total))
            }
            input_type => {
                let dialect = match input_type {
                    InputType::JsonLine => LineDialect::Json(JsonLine {
                        index,
                        doc_type: config.doc_type.clone(),
                    }),
                    InputType::LogLine => LineDialect::Log(LogLine {
                        index,
                        doc_type: config.doc_type.clone(),
                    }),
                    _ => LineDialect::Dump(DumpLine),
                };
                let reader = Reader::Lines {
                    lines: BufReader::new(file).split(b'\n'),
                    dialect,
                    line_number: 0,
                };
                (reader, None)
            }
        };

        debug!(
            "📂 reading '{}' as {:?}",
            config.file_name, config.input_type
        );
        Ok(Self {
            file_name: config.file_name.clone(),
            reader,
            page_size: page_size.max(1),
            total,
            returned: 0,
            skipped: 0,
            exhausted: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn skipped_lines(&self) -> u64 {
        self.skipped
    }
}

#[async_trait]
impl Source for FileSource {
    async fn next_page(&mut self) -> Result<Option<Vec<Document>>, MigrationError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut page = Vec::with_capacity(self.page_size);

        match &mut self.reader {
            Reader::Array(documents) => {
                let take = self.page_size.min(documents.len());
                page.extend(documents.drain(..take));
            }
            Reader::Lines {
                lines,
                dialect,
                line_number,
            } => {
                while page.len() < self.page_size {
                    let Some(mut raw) = lines.next_segment().await? else {
                        break;
                    };
                    *line_number += 1;
                    if raw.last() == Some(&b'\r') {
                        raw.pop();
                    }
                    let line = match String::from_utf8(raw) {
                        Ok(line) => line,
                        Err(err) => {
                            warn!(
                                "⚠️ {}:{} skipped, it isn't UTF-8: {err}",
                                self.file_name, line_number
                            );
                            self.skipped += 1;
                            continue;
                        }
                    };
                    match dialect.transform_line(&line) {
                        Ok(Some(document)) => page.push(document),
                        Ok(None) => {}
                        Err(err) => {
                            warn!(
                                "⚠️ {}:{} skipped, it doesn't parse: {err}",
                                self.file_name, line_number
                            );
                            self.skipped += 1;
                        }
                    }
                }
            }
        }

        if page.is_empty() {
            debug!(
                "🏁 '{}' exhausted after {} documents ({} lines skipped)",
                self.file_name, self.returned, self.skipped
            );
            self.exhausted = true;
            // -- 📏 now we know for sure
            self.total = Some(self.returned);
            return Ok(None);
        }
        self.returned += page.len() as u64;
        trace!("📖 {} documents hauled out of '{}'", page.len(), self.file_name);
        Ok(Some(page))
    }

    fn total_hits(&self) -> Option<u64> {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_with(contents: &str) -> anyhow::Result<tempfile::NamedTempFile> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    fn config(file: &tempfile::NamedTempFile, input_type: InputType) -> FileSourceConfig {
        FileSourceConfig {
            file_name: file.path().to_string_lossy().into_owned(),
            input_type,
            index: Some("imported".into()),
            doc_type: None,
        }
    }

    async fn drain(source: &mut FileSource) -> Result<Vec<Vec<Document>>, MigrationError> {
        let mut pages = Vec::new();
        while let Some(page) = source.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }

    #[tokio::test]
    async fn the_one_where_a_dump_comes_back_in_pages() -> anyhow::Result<()> {
        let lines: String = (0..5)
            .map(|n| format!("{{\"_index\":\"tw\",\"_type\":\"tweet\",\"_id\":\"{n}\",\"_source\":{{\"n\":{n}}}}}\n"))
            .collect();
        let file = file_with(&lines)?;
        let mut source = FileSource::new(&config(&file, InputType::Dump), None, 2).await?;
        assert_eq!(source.total_hits(), None);

        let pages = drain(&mut source).await?;
        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(pages[0][0].index, "tw");
        assert_eq!(pages[0][1].id.as_deref(), Some("1"));
        assert_eq!(source.total_hits(), Some(5));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_garbled_line_is_stepped_over() -> anyhow::Result<()> {
        let file = file_with("{\"a\":1}\nnot json\n\n{\"a\":2}\n")?;
        let mut source = FileSource::new(&config(&file, InputType::JsonLine), None, 10).await?;
        let pages = drain(&mut source).await?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].len(), 2);
        assert!(pages[0].iter().all(|doc| doc.index == "imported" && doc.id.is_none()));
        assert_eq!(source.skipped_lines(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_line_of_binary_junk_costs_only_itself() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"{\"a\":1}\r\n{\"b\":\"\xff\xfe\"}\n{\"c\":3}\n")?;
        file.flush()?;
        let mut source = FileSource::new(&config(&file, InputType::JsonLine), None, 10).await?;
        let pages = drain(&mut source).await?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].len(), 2);
        assert_eq!(pages[0][0].source["a"], 1);
        assert_eq!(pages[0][1].source["c"], 3);
        assert_eq!(source.skipped_lines(), 1);
        assert_eq!(source.total_hits(), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_array_knows_its_size_up_front() -> anyhow::Result<()> {
        let file = file_with(r#"[{"a":1},{"a":2},{"a":3}]"#)?;
        let mut source = FileSource::new(&config(&file, InputType::JsonArray), None, 2).await?;
        assert_eq!(source.total_hits(), Some(3));
        let pages = drain(&mut source).await?;
        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_log_lines_become_messages() -> anyhow::Result<()> {
        let file = file_with("GET /index.html 200\nPOST /login 401\n")?;
        let mut cfg = config(&file, InputType::LogLine);
        cfg.index = None;
        let mut source = FileSource::new(&cfg, Some("weblogs".into()), 10).await?;
        let pages = drain(&mut source).await?;
        assert_eq!(pages[0][1].source["message"], "POST /login 401");
        assert_eq!(pages[0][1].index, "weblogs");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_file_isnt_there() {
        let cfg = FileSourceConfig {
            file_name: "/definitely/not/here.json".into(),
            input_type: InputType::Dump,
            index: None,
            doc_type: None,
        };
        assert!(matches!(
            FileSource::new(&cfg, None, 10).await,
            Err(MigrationError::Io(_))
        ));
    }
}
