//! Object layout constants of the supported runtime ABI

/// Byte offsets and type ranges used to walk from a JS function to its
/// method and compiled code
///
/// Every object starts with its hidden-class pointer. The hidden class keeps
/// a 32-bit bit field whose low byte is the object's JS type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    /// Offset of the bit field inside a hidden class
    pub hclass_bitfield_offset: u64,
    /// Inclusive JS type range of the function-base family
    pub function_type_first: u8,
    pub function_type_last: u8,
    /// JS type of proxies
    pub proxy_type: u8,
    /// Method field of a function-base object
    pub function_method_offset: u64,
    /// Method field of a proxy object
    pub proxy_method_offset: u64,
    /// Packed literal-info word inside a method
    pub method_literal_info_offset: u64,
    /// Bit range of the method id inside the literal-info word
    pub method_id_shift: u32,
    pub method_id_bits: u32,
    /// Pointer to the first bytecode instruction of a method
    pub method_bytecode_offset: u64,
    /// Pointer to the file descriptor object a method belongs to
    pub method_file_offset: u64,
    /// Machine-code field of a function-base object
    pub function_machine_code_offset: u64,
    /// 32-bit instruction size inside a machine-code object
    pub machine_code_instr_size_offset: u64,
    /// Absolute address of the first instruction of a machine-code object
    pub machine_code_func_addr_offset: u64,
}

impl Default for HeapLayout {
    fn default() -> Self {
        Self {
            hclass_bitfield_offset: 0x08,
            function_type_first: 4,
            function_type_last: 24,
            proxy_type: 142,
            function_method_offset: 0x20,
            proxy_method_offset: 0x28,
            method_literal_info_offset: 0x18,
            method_id_shift: 0,
            method_id_bits: 32,
            method_bytecode_offset: 0x10,
            method_file_offset: 0x20,
            function_machine_code_offset: 0x30,
            machine_code_instr_size_offset: 0x08,
            machine_code_func_addr_offset: 0x10,
        }
    }
}

impl HeapLayout {
    /// Extract the method id sub-field of a literal-info word
    #[must_use]
    pub fn method_id_from_literal(&self, literal_info: u64) -> u32 {
        let shifted = literal_info.checked_shr(self.method_id_shift).unwrap_or(0);
        let mask = match self.method_id_bits {
            0 => 0,
            bits if bits >= 64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        };
        u32::try_from(shifted & mask & u64::from(u32::MAX)).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_function_type(&self, js_type: u8) -> bool {
        (self.function_type_first..=self.function_type_last).contains(&js_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_id_takes_low_bits_by_default() {
        let layout = HeapLayout::default();
        assert_eq!(layout.method_id_from_literal(0xABCD_0000_0000_002A), 0x2A);
    }

    #[test]
    fn test_method_id_honors_custom_bit_range() {
        let layout = HeapLayout { method_id_shift: 8, method_id_bits: 12, ..HeapLayout::default() };
        assert_eq!(layout.method_id_from_literal(0x00AB_CD00), 0xBCD);
    }

    #[test]
    fn test_function_type_range() {
        let layout = HeapLayout::default();
        assert!(layout.is_function_type(4));
        assert!(layout.is_function_type(24));
        assert!(!layout.is_function_type(25));
        assert!(!layout.is_function_type(layout.proxy_type));
    }
}
