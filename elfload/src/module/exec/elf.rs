//! Static inspection of the target binary, before it is run.

use std::{fs, path::Path};

use anyhow::{anyhow, Result};
use elf::{abi, endian::AnyEndian, file::Class, ElfBytes};

use crate::{events::AnalysisRecord, helpers::raw::raw_to_string};

/// Name of the record describing the target binary.
pub(crate) const ELF_RECORD: &str = "exec@elf";

/// Inspect an ELF binary and describe it in a record: class, type, machine,
/// entry point, program interpreter and needed shared libraries.
pub(crate) fn inspect_binary<P: AsRef<Path>>(path: P) -> Result<AnalysisRecord> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| anyhow!("Could not read {}: {e}", path.display()))?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(data.as_slice())
        .map_err(|e| anyhow!("{} is not a valid ELF file: {e}", path.display()))?;
    let ehdr = &file.ehdr;

    let mut record = AnalysisRecord::new("ELF binary inspected")
        .named(ELF_RECORD)
        .with("path", path.display())
        .with(
            "class",
            match ehdr.class {
                Class::ELF32 => "ELF32",
                Class::ELF64 => "ELF64",
            },
        )
        .with(
            "type",
            match ehdr.e_type {
                abi::ET_REL => "REL",
                abi::ET_EXEC => "EXEC",
                abi::ET_DYN => "DYN",
                abi::ET_CORE => "CORE",
                _ => "UNKNOWN",
            },
        )
        .with("machine", machine(ehdr.e_machine))
        .with("entry", format!("{:#x}", ehdr.e_entry));

    if let Some(interp) = interpreter(&file)? {
        record = record.with("interpreter", interp);
    }
    let needed = needed(&file)?;
    if !needed.is_empty() {
        record = record.with("needed", needed.join(","));
    }

    record.tags.insert("elf".to_string());
    Ok(record)
}

fn machine(e_machine: u16) -> String {
    match e_machine {
        abi::EM_386 => "x86".to_string(),
        abi::EM_X86_64 => "x86_64".to_string(),
        abi::EM_ARM => "arm".to_string(),
        abi::EM_AARCH64 => "aarch64".to_string(),
        abi::EM_PPC64 => "ppc64".to_string(),
        abi::EM_S390 => "s390".to_string(),
        abi::EM_RISCV => "riscv".to_string(),
        m => format!("unknown ({m})"),
    }
}

/// Program interpreter (PT_INTERP), if any. Statically linked binaries don't
/// have one.
fn interpreter(file: &ElfBytes<AnyEndian>) -> Result<Option<String>> {
    let Some(segments) = file.segments() else {
        return Ok(None);
    };

    match segments.iter().find(|phdr| phdr.p_type == abi::PT_INTERP) {
        Some(phdr) => Ok(Some(raw_to_string(file.segment_data(&phdr)?)?)),
        None => Ok(None),
    }
}

/// Shared libraries the binary depends on (DT_NEEDED).
fn needed(file: &ElfBytes<AnyEndian>) -> Result<Vec<String>> {
    let (Some(dynamic), Some(dynstr)) = (file.dynamic()?, file.section_header_by_name(".dynstr")?)
    else {
        return Ok(Vec::new());
    };
    let strtab = file.section_data_as_strtab(&dynstr)?;

    dynamic
        .iter()
        .filter(|d| d.d_tag == abi::DT_NEEDED)
        .map(|d| -> Result<String> { Ok(strtab.get(d.d_val() as usize)?.to_string()) })
        .collect()
}
