//! Minimal ELF object for captured JIT code
//!
//! Layout of the produced file:
//!
//! ```text
//! .text      PROGBITS   every captured body, concatenated in capture order
//! .symtab    SYMTAB     one FUNC symbol per method: value = offset in .text
//! .strtab    STRTAB     symbol names
//! .shstrtab  STRTAB     section names
//! ```
//!
//! The file is relocatable (`ET_REL`), so symbol values are section offsets
//! and the dump disassembles with stock tools (`objdump -d`).

use object::write::{Object, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

use crate::domain::DumpError;

/// Symbol of one captured body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitSymbol {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

/// Write-once accumulation of code bodies and their symbols
#[derive(Debug, Clone, Default)]
pub struct JitElfImage {
    text: Vec<u8>,
    symbols: Vec<JitSymbol>,
}

impl JitElfImage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one body; returns its offset inside `.text`
    pub fn push(&mut self, name: &str, code: &[u8]) -> u64 {
        let offset = self.text.len() as u64;
        self.text.extend_from_slice(code);
        self.symbols.push(JitSymbol { name: name.to_string(), offset, size: code.len() as u64 });
        offset
    }

    #[must_use]
    pub fn symbols(&self) -> &[JitSymbol] {
        &self.symbols
    }

    #[must_use]
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Serialize to ELF
    ///
    /// # Errors
    /// Returns [`DumpError::Empty`] with nothing captured, or
    /// [`DumpError::ElfWrite`] if the object writer fails
    pub fn to_bytes(&self) -> Result<Vec<u8>, DumpError> {
        if self.symbols.is_empty() {
            return Err(DumpError::Empty);
        }

        let mut obj = Object::new(BinaryFormat::Elf, host_architecture(), Endianness::Little);
        let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
        obj.append_section_data(text, &self.text, 1);

        for sym in &self.symbols {
            obj.add_symbol(Symbol {
                name: sym.name.as_bytes().to_vec(),
                value: sym.offset,
                size: sym.size,
                kind: SymbolKind::Text,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Section(text),
                flags: SymbolFlags::None,
            });
        }

        obj.write().map_err(|e| DumpError::ElfWrite(e.to_string()))
    }
}

fn host_architecture() -> Architecture {
    if cfg!(target_arch = "aarch64") {
        Architecture::Aarch64
    } else {
        Architecture::X86_64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{Object as _, ObjectSection, ObjectSymbol};

    #[test]
    fn test_empty_image_is_refused() {
        assert!(matches!(JitElfImage::new().to_bytes(), Err(DumpError::Empty)));
    }

    #[test]
    fn test_bodies_are_concatenated() {
        let mut image = JitElfImage::new();
        assert_eq!(image.push("a", &[0x90; 3]), 0);
        assert_eq!(image.push("b", &[0xC3; 2]), 3);
        assert_eq!(image.text(), &[0x90, 0x90, 0x90, 0xC3, 0xC3]);
    }

    #[test]
    fn test_written_elf_has_text_and_symbols() {
        let mut image = JitElfImage::new();
        image.push("jit_method_1", &[0x55, 0x48, 0x89, 0xE5]);
        image.push("jit_method_2", &[0xC3]);
        let bytes = image.to_bytes().unwrap();

        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        assert_eq!(text.data().unwrap(), &[0x55, 0x48, 0x89, 0xE5, 0xC3]);

        let funcs: Vec<(String, u64, u64)> = file
            .symbols()
            .filter(|s| s.kind() == SymbolKind::Text)
            .map(|s| (s.name().unwrap().to_string(), s.address(), s.size()))
            .collect();
        assert_eq!(
            funcs,
            vec![("jit_method_1".to_string(), 0, 4), ("jit_method_2".to_string(), 4, 1)]
        );
    }
}
