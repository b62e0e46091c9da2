//! Frame → JS function → method identity
//!
//! Every step here may hit a stale or torn heap: each one returns an error
//! instead of guessing, and the walker turns any such error into an
//! unresolved frame.

use crate::address_space::AddressSpace;
use crate::domain::{FileId, MethodId, MethodIdentity, UnwindError};
use crate::frames::{FrameDescriptor, FunctionSlot, MAX_ARGV_LEN};
use crate::heap::tagged::{object_kind, HeapValue, ObjectKind};
use crate::heap::HeapLayout;
use arkscope_common::WORD_SIZE;

/// The method behind one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMethod {
    /// Function object read from the frame
    pub function: u64,
    /// Method object the function points at
    pub method: u64,
    pub identity: MethodIdentity,
}

/// Compiled body of a fast-JIT function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineCodeInfo {
    /// Machine-code heap object
    pub object: u64,
    /// Address of the first instruction
    pub instr_start: u64,
    pub instr_size: u32,
}

pub struct MethodIdentityResolver<'a, A: AddressSpace + ?Sized> {
    space: &'a A,
    layout: &'a HeapLayout,
}

impl<'a, A: AddressSpace + ?Sized> MethodIdentityResolver<'a, A> {
    #[must_use]
    pub fn new(space: &'a A, layout: &'a HeapLayout) -> Self {
        Self { space, layout }
    }

    /// Address of the frame's function slot
    ///
    /// # Errors
    /// Fails for frames without a function and for variable-argv frames whose
    /// argument count is unreadable or implausible.
    pub fn function_slot(&self, base: u64, desc: &FrameDescriptor) -> Result<u64, UnwindError> {
        match desc.function {
            FunctionSlot::None => {
                Err(UnwindError::MalformedTag { value: base, reason: "frame has no function slot" })
            }
            FunctionSlot::Fixed(offset) => Ok(base.wrapping_add(offset)),
            FunctionSlot::AfterArgv { argc_offset } => {
                let argc_slot = base.wrapping_add(argc_offset);
                let argc = self.space.read_word(argc_slot)?;
                if argc > MAX_ARGV_LEN {
                    return Err(UnwindError::MalformedTag {
                        value: argc,
                        reason: "implausible argument count",
                    });
                }
                argc.checked_mul(WORD_SIZE)
                    .and_then(|argv_len| argc_slot.checked_add(WORD_SIZE)?.checked_add(argv_len))
                    .ok_or(UnwindError::MalformedTag {
                        value: argc_slot,
                        reason: "argument vector wraps the address space",
                    })
            }
        }
    }

    /// Strong function object held by the frame
    ///
    /// # Errors
    /// Fails when the slot is unreadable or holds anything but a strong
    /// object reference.
    pub fn function(&self, base: u64, desc: &FrameDescriptor) -> Result<u64, UnwindError> {
        let slot = self.function_slot(base, desc)?;
        HeapValue::strong_object(self.space.read_word(slot)?)
    }

    /// Method object of a function-base or proxy object
    ///
    /// # Errors
    /// Fails for any other object kind or an unreadable method field.
    pub fn method_of(&self, function: u64) -> Result<u64, UnwindError> {
        let offset = match object_kind(self.space, self.layout, function)? {
            ObjectKind::FunctionBase => self.layout.function_method_offset,
            ObjectKind::Proxy => self.layout.proxy_method_offset,
            ObjectKind::Other(_) => {
                return Err(UnwindError::MalformedTag {
                    value: function,
                    reason: "not a function or proxy",
                })
            }
        };
        HeapValue::strong_object(self.space.read_word(function.wrapping_add(offset))?)
    }

    /// (file, method id) of a method object
    ///
    /// # Errors
    /// Fails if either field is unreadable
    pub fn identity(&self, method: u64) -> Result<MethodIdentity, UnwindError> {
        let literal_info =
            self.space.read_word(method.wrapping_add(self.layout.method_literal_info_offset))?;
        let file = self.space.read_word(method.wrapping_add(self.layout.method_file_offset))?;
        Ok(MethodIdentity::new(
            FileId(file),
            MethodId(self.layout.method_id_from_literal(literal_info)),
        ))
    }

    /// Full chain from a frame to its method identity
    ///
    /// # Errors
    /// Any failing step; the caller reports the frame as unresolved.
    pub fn resolve(&self, base: u64, desc: &FrameDescriptor) -> Result<ResolvedMethod, UnwindError> {
        let function = self.function(base, desc)?;
        let method = self.method_of(function)?;
        let identity = self.identity(method)?;
        Ok(ResolvedMethod { function, method, identity })
    }

    /// Offset of an absolute bytecode pc inside the method's bytecode
    #[must_use]
    pub fn bytecode_offset(&self, method: u64, pc: u64) -> Option<u32> {
        let start =
            self.space.read_word(method.wrapping_add(self.layout.method_bytecode_offset)).ok()?;
        pc.checked_sub(start).and_then(|offset| u32::try_from(offset).ok())
    }

    /// Machine code currently installed on a function
    ///
    /// # Errors
    /// Fails when the function has no machine-code object or it is unreadable
    pub fn machine_code(&self, function: u64) -> Result<MachineCodeInfo, UnwindError> {
        let object = HeapValue::strong_object(
            self.space
                .read_word(function.wrapping_add(self.layout.function_machine_code_offset))?,
        )?;
        self.machine_code_at(object)
    }

    /// Instruction range of a machine-code object
    ///
    /// # Errors
    /// Fails if the object's fields are unreadable
    pub fn machine_code_at(&self, object: u64) -> Result<MachineCodeInfo, UnwindError> {
        let instr_size = self
            .space
            .read_u32(object.wrapping_add(self.layout.machine_code_instr_size_offset))?;
        let instr_start = self
            .space
            .read_word(object.wrapping_add(self.layout.machine_code_func_addr_offset))?;
        Ok(MachineCodeInfo { object, instr_start, instr_size })
    }
}
