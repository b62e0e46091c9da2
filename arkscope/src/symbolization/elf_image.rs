//! AOT/JIT ELF images as method tables and debug-info sources
//!
//! Compiled code reaches us as an ELF object: an AOT image mapped by the
//! runtime, or a JIT dump written by [`crate::jit`]. Its function symbols
//! are the methods (keyed by their code offset, the way a bytecode file keys
//! methods by entity offset), and its DWARF, when present, gives lines.

use addr2line::Context;
use gimli::{EndianRcSlice, RunTimeEndian};
use log::debug;
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind};
use rustc_demangle::demangle;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use super::code_range::{CodeInfo, CodeRange, CodeRangeIndex, MethodTable};
use crate::domain::{FileId, MethodId, SymbolError};
use crate::trace::{DebugInfoExtractor, FrameSite, SourcePosition};

/// One function symbol of the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

impl ImageSymbol {
    /// Methods in an image are keyed by code offset; `None` past 4 GiB
    #[must_use]
    pub fn method_id(&self) -> Option<MethodId> {
        u32::try_from(self.address).ok().map(MethodId)
    }
}

/// Everything recovered for one pc inside an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub name: String,
    pub url: String,
    pub line: u32,
    pub column: u32,
    pub code_begin: u64,
    pub code_size: u64,
}

pub struct ElfImage {
    id: FileId,
    symbols: Vec<ImageSymbol>,
    index: CodeRangeIndex,
    dwarf: Option<Context<EndianRcSlice<RunTimeEndian>>>,
}

impl ElfImage {
    /// Parse an image from its bytes
    ///
    /// # Errors
    /// Returns an error if the bytes are not an object file or it has no
    /// function symbols.
    pub fn parse(data: &[u8]) -> Result<Self, SymbolError> {
        let obj_file =
            object::File::parse(data).map_err(|e| SymbolError::ImageParse(e.to_string()))?;

        let mut symbols: Vec<ImageSymbol> = obj_file
            .symbols()
            .filter(|sym| sym.kind() == SymbolKind::Text && sym.size() > 0)
            .filter_map(|sym| {
                let name = sym.name().ok()?;
                Some(ImageSymbol {
                    name: Self::demangle_symbol(name),
                    address: sym.address(),
                    size: sym.size(),
                })
            })
            .collect();
        let total = symbols.len();
        symbols.retain(|s| s.method_id().is_some());
        if symbols.len() < total {
            debug!("Skipped {} functions beyond the method id range", total - symbols.len());
        }
        if symbols.is_empty() {
            return Err(SymbolError::NoMethodTable);
        }
        symbols.sort_by_key(|s| s.address);
        // aliases and nested local symbols: the first symbol owns the bytes
        let mut covered_to = 0;
        symbols.retain(|s| {
            let keep = s.address >= covered_to;
            if keep {
                covered_to = s.address.saturating_add(s.size);
            }
            keep
        });

        let index = CodeRangeIndex::build(
            symbols
                .iter()
                .filter_map(|s| Some(CodeRange::new(s.method_id()?, s.address, s.size)))
                .collect(),
        )?;

        // Load DWARF debug info
        let endian =
            if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj_file
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianRcSlice::new(Rc::from(&*data), endian))
            };

        let has_debug_info = obj_file.section_by_name(".debug_info").is_some();
        let dwarf = if has_debug_info {
            Context::from_dwarf(gimli::Dwarf::load(&load_section)?)
                .map_err(|e| debug!("Ignoring unusable DWARF: {e}"))
                .ok()
        } else {
            None
        };

        debug!("Parsed image with {} functions (DWARF: {})", symbols.len(), dwarf.is_some());
        Ok(Self { id: Self::fingerprint(data), symbols, index, dwarf })
    }

    /// Content fingerprint standing in for the file descriptor address
    #[must_use]
    pub fn fingerprint(data: &[u8]) -> FileId {
        let mut hasher = DefaultHasher::new();
        data.len().hash(&mut hasher);
        data.hash(&mut hasher);
        FileId(hasher.finish())
    }

    /// Demangle a Rust symbol name
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }

    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    #[must_use]
    pub fn symbols(&self) -> &[ImageSymbol] {
        &self.symbols
    }

    #[must_use]
    pub fn index(&self) -> &CodeRangeIndex {
        &self.index
    }

    #[must_use]
    pub fn symbol_of(&self, method: MethodId) -> Option<&ImageSymbol> {
        self.symbols.iter().find(|s| s.method_id() == Some(method))
    }

    /// Name and position of the pc at `image_offset`
    ///
    /// The owning symbol is found through the code-range index. When the
    /// offset falls outside every symbol, `method` selects the symbol and the
    /// position is reported for its first instruction.
    ///
    /// # Errors
    /// Returns [`SymbolError::UnresolvedSymbol`] when neither selects a symbol
    pub fn frame_info(&self, image_offset: u64, method: MethodId) -> Result<FrameInfo, SymbolError> {
        let info = match self.index.translate_raw_pc(image_offset) {
            Ok(info) => info,
            Err(err) => {
                let range = self.index.range_of(method).ok_or(err)?;
                CodeInfo {
                    method_id: range.method_id,
                    offset: 0,
                    code_begin: range.code_begin,
                    code_size: range.code_size,
                }
            }
        };
        let name = self.method_name(info.method_id).unwrap_or_default();
        let position = self.source_position(info.method_id, info.offset).unwrap_or_default();

        Ok(FrameInfo {
            name,
            url: position.file.unwrap_or_default(),
            line: position.line.unwrap_or(0),
            column: position.column.unwrap_or(0),
            code_begin: info.code_begin,
            code_size: info.code_size,
        })
    }

    fn dwarf_frames(&self, address: u64) -> Vec<(Option<String>, Option<SourcePosition>)> {
        let mut result = Vec::new();
        let Some(ctx) = &self.dwarf else {
            return result;
        };

        if let Ok(mut frame_iter) = ctx.find_frames(address).skip_all_loads() {
            while let Ok(Some(frame)) = frame_iter.next() {
                let function =
                    frame.function.and_then(|f| f.demangle().ok().map(|s| s.to_string()));

                let location = frame.location.map(|loc| SourcePosition {
                    file: loc.file.map(std::string::ToString::to_string),
                    line: loc.line,
                    column: loc.column,
                });

                result.push((function, location));
            }
        }
        result
    }
}

impl MethodTable for ElfImage {
    fn code_ranges(&self) -> Result<Vec<CodeRange>, SymbolError> {
        Ok(self.index.ranges().to_vec())
    }
}

impl DebugInfoExtractor for ElfImage {
    fn method_name(&self, method: MethodId) -> Option<String> {
        self.symbol_of(method).map(|s| s.name.clone())
    }

    fn source_position(&self, method: MethodId, offset: u64) -> Result<SourcePosition, SymbolError> {
        let symbol = self.symbol_of(method).ok_or(SymbolError::UnresolvedSymbol(offset))?;
        let address = symbol.address + offset;
        // Outermost frame is the physical function
        self.dwarf_frames(address)
            .into_iter()
            .last()
            .and_then(|(_, location)| location)
            .ok_or(SymbolError::UnresolvedSymbol(address))
    }

    fn inlined_sites(&self, method: MethodId, offset: u64) -> Vec<FrameSite> {
        let Some(symbol) = self.symbol_of(method) else {
            return Vec::new();
        };
        let mut frames = self.dwarf_frames(symbol.address + offset);
        frames.pop();
        frames.into_iter().map(|(name, _)| FrameSite { name, ..FrameSite::default() }).collect()
    }
}
