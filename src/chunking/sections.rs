//! Section accumulation and sizing.

use super::{ChunkingError, TextSplitter};
use crate::layout::LayoutBlock;
use crate::types::Chunk;

/// Sizing rules for the chunker.
#[derive(Debug, Clone)]
pub struct ChunkingSettings {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent pieces of one section.
    pub chunk_overlap: usize,
    /// Sections with less body text are merged or dropped.
    pub min_section_text_length: usize,
    /// Header used before the first heading.
    pub default_header_text: String,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 750,
            chunk_overlap: 75,
            min_section_text_length: 50,
            default_header_text: "General Content".into(),
        }
    }
}

/// Header-led run of blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text, or the default header.
    pub header: String,
    /// Page of the section's first block.
    pub page: u32,
    /// Block texts joined by newlines; starts with the heading when there is one.
    pub text: String,
    /// Whether `text` starts with a heading line.
    pub headed: bool,
}

impl Section {
    /// Body text without the heading line.
    pub fn body(&self) -> &str {
        if !self.headed {
            return self.text.trim();
        }
        match self.text.split_once('\n') {
            Some((_, rest)) => rest.trim(),
            None => "",
        }
    }
}

/// Groups layout blocks into sections and sections into bounded chunks.
#[derive(Debug, Clone)]
pub struct DocumentChunker {
    settings: ChunkingSettings,
    splitter: TextSplitter,
}

impl DocumentChunker {
    /// Build a chunker; fails when the overlap does not fit in the chunk size.
    pub fn new(settings: ChunkingSettings) -> Result<Self, ChunkingError> {
        let splitter = TextSplitter::new(settings.chunk_size, settings.chunk_overlap)?;
        Ok(Self { settings, splitter })
    }

    /// Longest chunk the chunker may emit.
    pub fn max_chunk_len(&self) -> usize {
        self.settings.chunk_size + self.settings.chunk_overlap
    }

    /// Accumulate blocks into sections. Footers, tables and empty blocks are skipped.
    pub fn sections(&self, blocks: &[LayoutBlock]) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut header = self.settings.default_header_text.clone();
        let mut parts: Vec<&str> = Vec::new();
        let mut page = 1;
        let mut headed = false;

        for block in blocks {
            let text = block.text.trim();
            if text.is_empty() || block.kind.is_excluded() {
                continue;
            }

            if block.kind.is_heading() {
                flush(&mut sections, &header, page, &parts, headed);
                header = text.to_string();
                parts = vec![text];
                page = block.page;
                headed = true;
            } else {
                if parts.is_empty() {
                    page = block.page;
                }
                parts.push(text);
            }
        }
        flush(&mut sections, &header, page, &parts, headed);
        sections
    }

    /// Chunk layout blocks of `document_name`.
    pub fn chunk_blocks(&self, blocks: &[LayoutBlock], document_name: &str) -> Vec<Chunk> {
        let sections = self.sections(blocks);
        let mut chunks = Vec::new();
        for section in &sections {
            self.push_section(&mut chunks, section, document_name);
        }
        tracing::debug!(
            document = document_name,
            sections = sections.len(),
            chunks = chunks.len(),
            "Chunked document"
        );
        chunks
    }

    fn push_section(&self, chunks: &mut Vec<Chunk>, section: &Section, document_name: &str) {
        let body = section.body();
        let body_len = self.splitter.measure(body);

        if body_len >= self.settings.min_section_text_length {
            for piece in self.sized(&section.text) {
                chunks.push(Chunk::new(piece, section.page, &section.header, document_name));
            }
            return;
        }

        if !body.is_empty()
            && let Some(previous) = chunks.last_mut()
            && previous.page == section.page
            && previous.header == section.header
        {
            let merged = format!("{}\n{}", previous.original_content, body);
            if self.splitter.measure(&merged) <= self.max_chunk_len() {
                previous.original_content = merged.clone();
                previous.content = merged;
                return;
            }
        }

        if section.header != self.settings.default_header_text {
            for piece in self.sized(&section.text) {
                chunks.push(Chunk::new(piece, section.page, &section.header, document_name));
            }
        } else {
            tracing::trace!(page = section.page, chars = body_len, "Dropped short section");
        }
    }

    fn sized(&self, text: &str) -> Vec<String> {
        if self.splitter.measure(text) > self.settings.chunk_size {
            self.splitter.split(text)
        } else {
            vec![text.to_string()]
        }
    }
}

fn flush(sections: &mut Vec<Section>, header: &str, page: u32, parts: &[&str], headed: bool) {
    if parts.is_empty() {
        return;
    }
    let text = parts.join("\n").trim().to_string();
    if text.is_empty() {
        return;
    }
    sections.push(Section {
        header: header.to_string(),
        page,
        text,
        headed,
    });
}
