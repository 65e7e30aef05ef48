//! Address to source location resolution
//!
//! Two resolvers back the [`Symbolizer`] trait:
//! - [`ProcessSymbolizer`]: resolves addresses of the *running* process via the
//!   `backtrace` crate; used for the annotation lines the recorder writes
//! - [`DwarfSymbolizer`]: resolves addresses against a binary on disk using its
//!   DWARF `.debug_line` data (addr2line); used by the offline report
//!
//! A miss is never an error: callers fall back to the raw address.
//!
//! Sampled program counters are runtime addresses. For a position-independent
//! executable they sit at a random offset from the addresses in its DWARF
//! data; [`executable_load_bias`] reports that offset so the profile log can
//! carry it to the offline report.

use anyhow::{Context, Result};
use object::{Object, ObjectSection};
use std::fs::File;
use std::path::Path;

/// Source location information
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SourceLocation {
    /// Source file path
    pub file: String,
    /// Line number
    pub line: u32,
    /// Function name (if available)
    pub function: Option<String>,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Resolves a program counter to a source location
pub trait Symbolizer {
    /// `None` when the address has no resolvable source line
    fn resolve(&self, address: u64) -> Option<SourceLocation>;
}

/// Symbolizer that never resolves anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl Symbolizer for NoSymbols {
    fn resolve(&self, _address: u64) -> Option<SourceLocation> {
        None
    }
}

/// In-process symbolizer backed by the `backtrace` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSymbolizer;

impl Symbolizer for ProcessSymbolizer {
    fn resolve(&self, address: u64) -> Option<SourceLocation> {
        let mut found = None;
        // backtrace looks up `addr - 1` (return-address convention); a sampled
        // PC is the faulting instruction itself
        let lookup = address.saturating_add(1) as usize;
        backtrace::resolve(lookup as *mut std::ffi::c_void, |symbol| {
            if found.is_some() {
                return;
            }
            let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) else {
                return;
            };
            found = Some(SourceLocation {
                file: file.display().to_string(),
                line,
                function: symbol.name().map(|name| name.to_string()),
            });
        });
        found
    }
}

/// DWARF debug info context for a binary
pub struct DwarfSymbolizer {
    /// addr2line context for DWARF lookups
    context: addr2line::Context<gimli::EndianRcSlice<gimli::RunTimeEndian>>,
    /// Runtime load address of the binary (PIE); subtracted before lookup
    load_bias: u64,
}

impl DwarfSymbolizer {
    /// Build a line-table context from the debug sections of `binary_path`
    pub fn load(binary_path: &Path) -> Result<Self> {
        let file = File::open(binary_path)
            .with_context(|| format!("cannot open {}", binary_path.display()))?;

        // SAFETY: read-only mapping; every section is copied out before it is unmapped
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .with_context(|| format!("cannot map {}", binary_path.display()))?;
        let object = object::File::parse(&*mmap)
            .with_context(|| format!("{} is not a recognised object file", binary_path.display()))?;

        let endian = if object.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };
        let section = |id: gimli::SectionId| -> Result<gimli::EndianRcSlice<gimli::RunTimeEndian>> {
            let data = object
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(std::borrow::Cow::Borrowed(&[]));
            Ok(gimli::EndianRcSlice::new(std::rc::Rc::from(data.into_owned()), endian))
        };

        let dwarf = gimli::Dwarf::load(&section)
            .with_context(|| format!("no usable debug info in {}", binary_path.display()))?;
        let context = addr2line::Context::from_dwarf(dwarf)
            .context("debug info present but line tables are unreadable")?;

        Ok(Self {
            context,
            load_bias: 0,
        })
    }

    /// Subtract `bias` from every address before lookup
    pub fn with_load_bias(mut self, bias: u64) -> Self {
        self.load_bias = bias;
        self
    }

    fn function_name(&self, lookup: u64) -> Option<String> {
        let mut frames = self.context.find_frames(lookup).skip_all_loads().ok()?;
        let frame = frames.next().ok()??;
        let function = frame.function?;
        function.raw_name().ok().map(|name| name.into_owned())
    }
}

impl Symbolizer for DwarfSymbolizer {
    fn resolve(&self, address: u64) -> Option<SourceLocation> {
        let lookup = address.checked_sub(self.load_bias)?;
        let location = self.context.find_location(lookup).ok()??;
        let file = location.file?;
        let line = location.line.filter(|&line| line != 0)?;

        Some(SourceLocation {
            file: file.to_string(),
            line,
            function: self.function_name(lookup),
        })
    }
}

/// Offset between the main executable's runtime and link-time addresses
///
/// Zero for a non-PIE binary. `None` when the platform does not expose it.
#[cfg(target_os = "linux")]
pub fn executable_load_bias() -> Option<u64> {
    unsafe extern "C" fn first_object(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut libc::c_void,
    ) -> libc::c_int {
        // SAFETY: `data` is the `Option<u64>` passed below; `info` is valid for the call
        unsafe {
            *(data as *mut Option<u64>) = Some((*info).dlpi_addr as u64);
        }
        // The main program is always reported first
        1
    }

    let mut bias: Option<u64> = None;
    // SAFETY: the callback only writes through `data`, which outlives the call
    unsafe {
        libc::dl_iterate_phdr(Some(first_object), &mut bias as *mut Option<u64> as *mut libc::c_void);
    }
    bias
}

#[cfg(not(target_os = "linux"))]
pub fn executable_load_bias() -> Option<u64> {
    None
}
