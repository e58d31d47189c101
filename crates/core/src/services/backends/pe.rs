use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use capstone::arch::x86::{ArchMode, X86OperandType};
use capstone::arch::ArchOperand;
use capstone::{prelude::*, Capstone, Insn, InsnDetail, InsnGroupId, InsnGroupType};
use goblin::pe::PE;
use log::{debug, info};

use crate::analysis::{AnalysisDatabase, BridgeError, FunctionHandle};
use crate::model::normalize_path;
use crate::scan::{AddressRange, SectionBytes};
use crate::services::backends::BackendError;

/// Bytes disassembled when checking whether a call target is an import thunk.
const THUNK_PROBE_BYTES: usize = 16;

#[derive(Debug, Clone)]
struct ImportSlot {
    library: String,
    name: String,
}

#[derive(Debug, Clone, Default)]
struct KnownFunction {
    name: Option<String>,
    /// Exclusive end from the unwind table, when present.
    end: Option<u64>,
}

enum BranchTarget {
    Direct(u64),
    RipSlot(u64),
}

/// 64-bit PE image analysed with goblin and capstone.
///
/// Import address table slots double as the handles of imported functions,
/// so every call through the same import resolves to the same function.
pub struct PeDatabase {
    module: String,
    code_section: String,
    sections: Vec<SectionBytes>,
    functions: BTreeMap<u64, KnownFunction>,
    symbols: BTreeMap<u64, String>,
    imports: HashMap<u64, ImportSlot>,
    max_function_bytes: usize,
    cs: Capstone,
    callees: RefCell<HashMap<u64, Vec<FunctionHandle>>>,
}

fn make_cs() -> Result<Capstone, BackendError> {
    Capstone::new()
        .x86()
        .mode(ArchMode::Mode64)
        .detail(true)
        .build()
        .map_err(|e| BackendError::Disassembler(format!("capstone init failed: {e}")))
}

fn has_group(detail: &InsnDetail, group: InsnGroupType::Type) -> bool {
    detail.groups().iter().any(|g| *g == InsnGroupId(group as u8))
}

/// Largest section image accepted, whatever `SizeOfImage` claims.
const MAX_SECTION_BYTES: u64 = 256 * 1024 * 1024;

fn virtual_address(image_base: u64, rva: u64) -> Result<u64, BackendError> {
    image_base.checked_add(rva).ok_or_else(|| {
        BackendError::UnsupportedFormat(format!(
            "RVA {rva:#x} overflows image base {image_base:#x}"
        ))
    })
}

fn load_sections(
    pe: &PE,
    bytes: &[u8],
    image_base: u64,
    size_of_image: u64,
) -> Result<Vec<SectionBytes>, BackendError> {
    let mut sections = Vec::with_capacity(pe.sections.len());
    for sec in &pe.sections {
        let name = sec.name().unwrap_or_default().to_string();
        let raw_len = sec.size_of_raw_data as u64;
        let virtual_len = if sec.virtual_size == 0 { raw_len } else { sec.virtual_size as u64 };
        let image_end = (sec.virtual_address as u64).saturating_add(virtual_len);
        if virtual_len > MAX_SECTION_BYTES || image_end > size_of_image {
            return Err(BackendError::UnsupportedFormat(format!(
                "section {name} spans {virtual_len:#x} bytes past image size {size_of_image:#x}"
            )));
        }
        let start = virtual_address(image_base, sec.virtual_address as u64)?;
        virtual_address(start, virtual_len)?;

        let raw_start = sec.pointer_to_raw_data as usize;
        let copy_len = raw_len.min(virtual_len) as usize;
        let mut data = bytes
            .get(raw_start..raw_start.saturating_add(copy_len))
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        data.resize(virtual_len as usize, 0);
        sections.push(SectionBytes::new(name, start, data));
    }
    Ok(sections)
}

impl PeDatabase {
    pub fn open(
        path: &Path,
        code_section: &str,
        max_function_bytes: usize,
    ) -> Result<Self, BackendError> {
        if !path.is_file() {
            return Err(BackendError::MissingBinary(path.to_path_buf()));
        }
        let bytes =
            fs::read(path).map_err(|source| BackendError::Io { path: path.to_path_buf(), source })?;
        let module = normalize_path(&path.to_string_lossy());
        Self::from_bytes(module, &bytes, code_section, max_function_bytes)
    }

    /// Build a database from an in-memory image; `module` is reported as the
    /// owning module of every internal function.
    pub fn from_bytes(
        module: String,
        bytes: &[u8],
        code_section: &str,
        max_function_bytes: usize,
    ) -> Result<Self, BackendError> {
        let pe = PE::parse(bytes)
            .map_err(|e| BackendError::UnsupportedFormat(format!("{module}: {e}")))?;
        if !pe.is_64 {
            return Err(BackendError::UnsupportedFormat(format!(
                "{module} is not a 64-bit PE image"
            )));
        }
        let image_base = pe.image_base as u64;
        let size_of_image = pe
            .header
            .optional_header
            .map(|opt| opt.windows_fields.size_of_image as u64)
            .unwrap_or(MAX_SECTION_BYTES);
        let sections = load_sections(&pe, bytes, image_base, size_of_image)?;
        let code = sections.iter().find(|s| s.name() == code_section);
        let in_code = |address: u64| code.is_some_and(|c| c.contains(address));

        let mut functions: BTreeMap<u64, KnownFunction> = BTreeMap::new();
        if let Some(exceptions) = &pe.exception_data {
            for runtime in exceptions.functions().filter_map(Result::ok) {
                let start = virtual_address(image_base, runtime.begin_address as u64)?;
                let end = virtual_address(image_base, runtime.end_address as u64)?;
                functions.entry(start).or_insert(KnownFunction { name: None, end: Some(end) });
            }
        }

        let mut symbols = BTreeMap::new();
        for export in &pe.exports {
            if export.rva == 0 || export.reexport.is_some() {
                continue;
            }
            let Some(name) = export.name.filter(|n| !n.is_empty()) else { continue };
            let address = virtual_address(image_base, export.rva as u64)?;
            symbols.insert(address, name.to_string());
            if in_code(address) {
                functions.entry(address).or_default().name = Some(name.to_string());
            }
        }

        if pe.entry != 0 {
            let address = virtual_address(image_base, pe.entry as u64)?;
            symbols.entry(address).or_insert_with(|| "entry".to_string());
            let func = functions.entry(address).or_default();
            if func.name.is_none() {
                func.name = Some("entry".to_string());
            }
        }

        let mut imports = HashMap::new();
        for import in &pe.imports {
            imports.insert(
                virtual_address(image_base, import.offset as u64)?,
                ImportSlot { library: import.dll.to_string(), name: import.name.to_string() },
            );
        }

        info!(
            "Loaded {module}: {} sections, {} functions, {} symbols, {} imports",
            sections.len(),
            functions.len(),
            symbols.len(),
            imports.len()
        );

        Ok(Self {
            module,
            code_section: code_section.to_string(),
            sections,
            functions,
            symbols,
            imports,
            max_function_bytes,
            cs: make_cs()?,
            callees: RefCell::new(HashMap::new()),
        })
    }

    fn code(&self) -> Option<&SectionBytes> {
        self.sections.iter().find(|s| s.name() == self.code_section)
    }

    fn in_code(&self, address: u64) -> bool {
        self.code().is_some_and(|c| c.contains(address))
    }

    fn is_known(&self, address: u64) -> bool {
        self.imports.contains_key(&address) || self.in_code(address)
    }

    fn branch_target(&self, insn: &Insn, detail: &InsnDetail) -> Option<BranchTarget> {
        let next = insn.address() + insn.bytes().len() as u64;
        detail.arch_detail().operands().iter().find_map(|op| match op {
            ArchOperand::X86Operand(op) => match &op.op_type {
                X86OperandType::Imm(imm) => Some(BranchTarget::Direct(*imm as u64)),
                X86OperandType::Mem(mem)
                    if mem.index().0 == 0
                        && self.cs.reg_name(mem.base()).as_deref() == Some("rip") =>
                {
                    AddressRange::offset_address(next, mem.disp()).map(BranchTarget::RipSlot)
                }
                _ => None,
            },
            _ => None,
        })
    }

    /// Import slot jumped through when `address` starts with `jmp [rip+disp]`.
    fn import_thunk(&self, address: u64) -> Option<u64> {
        let code = self.code()?;
        let offset = code.offset_of(address)?;
        let end = offset.saturating_add(THUNK_PROBE_BYTES).min(code.len());
        let bytes = code.bytes().get(offset..end)?;
        let insns = self.cs.disasm_count(bytes, address, 1).ok()?;
        let insn = insns.iter().next()?;
        if insn.mnemonic() != Some("jmp") {
            return None;
        }
        let detail = self.cs.insn_detail(insn).ok()?;
        match self.branch_target(insn, &detail)? {
            BranchTarget::RipSlot(slot) if self.imports.contains_key(&slot) => Some(slot),
            _ => None,
        }
    }

    fn resolve_call(&self, target: BranchTarget) -> Option<FunctionHandle> {
        match target {
            BranchTarget::Direct(address) if self.in_code(address) => {
                Some(FunctionHandle(self.import_thunk(address).unwrap_or(address)))
            }
            BranchTarget::RipSlot(slot) if self.imports.contains_key(&slot) => {
                Some(FunctionHandle(slot))
            }
            _ => None,
        }
    }

    fn discover_callees(&self, start: u64) -> Result<Vec<FunctionHandle>, BridgeError> {
        let code = self.code().ok_or(BridgeError::UnknownFunction(start))?;
        let offset = code.offset_of(start).ok_or(BridgeError::UnknownFunction(start))?;
        let bounded_end = self.functions.get(&start).and_then(|f| f.end);
        let limit = match bounded_end {
            Some(end) => end.saturating_sub(start) as usize,
            None => self.max_function_bytes,
        };
        let end = offset.saturating_add(limit).min(code.len());
        let body = code.bytes().get(offset..end).unwrap_or_default();
        let insns = self
            .cs
            .disasm_all(body, start)
            .map_err(|e| BridgeError::Backend(format!("disassembly failed at {start:#x}: {e}")))?;

        let mut furthest = start;
        let mut callees: Vec<FunctionHandle> = Vec::new();
        for insn in insns.iter() {
            let Ok(detail) = self.cs.insn_detail(insn) else { continue };
            if has_group(&detail, InsnGroupType::CS_GRP_CALL) {
                if let Some(callee) =
                    self.branch_target(insn, &detail).and_then(|t| self.resolve_call(t))
                {
                    if !callees.contains(&callee) {
                        callees.push(callee);
                    }
                }
            } else if has_group(&detail, InsnGroupType::CS_GRP_JUMP) {
                if let Some(BranchTarget::Direct(target)) = self.branch_target(insn, &detail) {
                    furthest = furthest.max(target);
                }
            }

            let terminator =
                has_group(&detail, InsnGroupType::CS_GRP_RET) || insn.mnemonic() == Some("int3");
            if bounded_end.is_none() && terminator && insn.address() >= furthest {
                break;
            }
        }
        debug!("{:#x} calls {} functions", start, callees.len());
        Ok(callees)
    }
}

impl AnalysisDatabase for PeDatabase {
    fn backend_name(&self) -> &'static str {
        "pe"
    }

    fn section(&self, name: &str) -> Option<SectionBytes> {
        self.sections.iter().find(|s| s.name() == name).cloned()
    }

    fn function_at(&self, address: u64) -> Option<FunctionHandle> {
        self.functions.contains_key(&address).then_some(FunctionHandle(address))
    }

    fn symbol_exists_at(&self, address: u64) -> bool {
        self.symbols.contains_key(&address)
    }

    fn create_function(&mut self, address: u64) -> Result<FunctionHandle, BridgeError> {
        if !self.in_code(address) {
            return Err(BridgeError::Creation {
                address,
                reason: format!("outside {}", self.code_section),
            });
        }
        let name = self.symbols.get(&address).cloned();
        self.functions.entry(address).or_insert(KnownFunction { name, end: None });
        Ok(FunctionHandle(address))
    }

    fn called_functions(&self, function: FunctionHandle) -> Result<Vec<FunctionHandle>, BridgeError> {
        if self.imports.contains_key(&function.0) {
            return Ok(Vec::new());
        }
        if let Some(cached) = self.callees.borrow().get(&function.0) {
            return Ok(cached.clone());
        }
        let callees = self.discover_callees(function.0)?;
        self.callees.borrow_mut().insert(function.0, callees.clone());
        Ok(callees)
    }

    fn is_external(&self, function: FunctionHandle) -> bool {
        self.imports.contains_key(&function.0)
    }

    fn library_name(&self, function: FunctionHandle) -> Result<String, BridgeError> {
        self.imports
            .get(&function.0)
            .map(|slot| slot.library.clone())
            .ok_or(BridgeError::NotExternal(function.0))
    }

    fn entry_point(&self, function: FunctionHandle) -> Result<u64, BridgeError> {
        if self.is_known(function.0) {
            Ok(function.0)
        } else {
            Err(BridgeError::UnknownFunction(function.0))
        }
    }

    fn name(&self, function: FunctionHandle) -> Result<String, BridgeError> {
        if let Some(slot) = self.imports.get(&function.0) {
            return Ok(slot.name.clone());
        }
        if let Some(name) = self.functions.get(&function.0).and_then(|f| f.name.clone()) {
            return Ok(name);
        }
        if self.in_code(function.0) {
            return Ok(format!("FUN_{:08x}", function.0));
        }
        Err(BridgeError::UnknownFunction(function.0))
    }

    fn owning_module_path(&self, function: FunctionHandle) -> Result<String, BridgeError> {
        if self.is_known(function.0) {
            Ok(self.module.clone())
        } else {
            Err(BridgeError::UnknownFunction(function.0))
        }
    }
}
