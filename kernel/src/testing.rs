//! Helpers shared by the tests of the crate.
use crate::{
    exe::{Protection, Segment},
    fs::RamFs,
};
use alloc::vec::Vec;
use usize_cast::IntoUsize;
use zerocopy::{Immutable, IntoBytes};

/// Enable logging for a test. Only the first call has an effect.
pub fn logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(IntoBytes, Immutable)]
#[repr(C)]
struct FileHeader {
    ident: [u8; 16],
    kind: u16,
    machine: u16,
    version: u32,
    entry: u32,
    phoff: u32,
    shoff: u32,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[derive(IntoBytes, Immutable)]
#[repr(C)]
struct ProgramHeader {
    kind: u32,
    offset: u32,
    vaddr: u32,
    paddr: u32,
    filesz: u32,
    memsz: u32,
    flags: u32,
    align: u32,
}

const PT_LOAD: u32 = 1;
const EHDR_SIZE: usize = core::mem::size_of::<FileHeader>();
const PHDR_SIZE: usize = core::mem::size_of::<ProgramHeader>();

enum Entry {
    /// A segment whose bytes are appended to the image.
    Data(u32, Vec<u8>, u32, Protection),

    /// A program header written as is.
    Header(Segment),
}

/// Writer of 32-bit x86 ELF executables.
pub struct ImageBuilder {
    entry: u32,
    machine: u16,
    entries: Vec<Entry>,
}

impl ImageBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            machine: 3,
            entries: Vec::new(),
        }
    }

    /// Set the `e_machine` field, x86 by default.
    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Add a segment loaded at `vaddr` with the given file bytes and
    /// memory size.
    pub fn segment(mut self, vaddr: u32, data: &[u8], size: u32, protection: Protection) -> Self {
        self.entries
            .push(Entry::Data(vaddr, data.to_vec(), size, protection));
        self
    }

    /// Add a program header with arbitrary values. No bytes are added to the
    /// image for it.
    pub fn header(mut self, segment: &Segment) -> Self {
        self.entries.push(Entry::Header(*segment));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let count = self.entries.len();
        let mut offset = EHDR_SIZE + count * PHDR_SIZE;
        let mut headers = Vec::new();
        let mut data = Vec::new();

        for entry in &self.entries {
            let header = match entry {
                Entry::Data(vaddr, bytes, size, protection) => {
                    let header = ProgramHeader {
                        kind: PT_LOAD,
                        offset: u32::try_from(offset).unwrap(),
                        vaddr: *vaddr,
                        paddr: *vaddr,
                        filesz: u32::try_from(bytes.len()).unwrap(),
                        memsz: *size,
                        flags: protection.bits(),
                        align: 0x1000,
                    };
                    offset += bytes.len();
                    data.extend_from_slice(bytes);
                    header
                }
                Entry::Header(segment) => ProgramHeader {
                    kind: PT_LOAD,
                    offset: u32::try_from(segment.offset).unwrap(),
                    vaddr: u32::try_from(segment.address).unwrap(),
                    paddr: 0,
                    filesz: u32::try_from(segment.length).unwrap(),
                    memsz: u32::try_from(segment.size).unwrap(),
                    flags: segment.protection.bits(),
                    align: 0x1000,
                },
            };
            headers.extend_from_slice(header.as_bytes());
        }

        let mut ident = [0; 16];
        ident[..7].copy_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1]);
        let header = FileHeader {
            ident,
            kind: 2,
            machine: self.machine,
            version: 1,
            entry: self.entry,
            phoff: if count == 0 { 0 } else { EHDR_SIZE as u32 },
            shoff: 0,
            flags: 0,
            ehsize: EHDR_SIZE as u16,
            phentsize: PHDR_SIZE as u16,
            phnum: u16::try_from(count).unwrap(),
            shentsize: 40,
            shnum: 0,
            shstrndx: 0,
        };

        let mut image = header.as_bytes().to_vec();
        image.extend_from_slice(&headers);
        image.extend_from_slice(&data);
        image
    }
}

/// The program run by most tests: a code segment and a data segment whose
/// memory size is larger than its file size.
pub struct Program {
    pub image: Vec<u8>,
    pub code: Vec<u8>,
    pub data: Vec<u8>,
}

impl Program {
    pub const ENTRY: u32 = 0x1020;
    pub const CODE_ADDRESS: usize = 0x1000;
    pub const DATA_ADDRESS: usize = 0x3000;
    pub const DATA_SIZE: usize = 0x1800;

    pub fn new() -> Self {
        let code: Vec<u8> = (0..0x1400).map(|i: usize| (i % 251) as u8).collect();
        let data: Vec<u8> = (0..0x200).map(|i: usize| (i % 13) as u8 + 1).collect();
        let image = ImageBuilder::new(Self::ENTRY)
            .segment(
                Self::CODE_ADDRESS as u32,
                &code,
                code.len() as u32,
                Protection::READ | Protection::EXECUTE,
            )
            .segment(
                Self::DATA_ADDRESS as u32,
                &data,
                Self::DATA_SIZE as u32,
                Protection::READ | Protection::WRITE,
            )
            .build();
        Self { image, code, data }
    }

    /// A file system holding this program as `/c/prog.exe`.
    pub fn files(&self) -> RamFs {
        let mut files = RamFs::new();
        files.insert("/c/prog.exe", self.image.clone());
        files
    }
}

/// Size of a user pointer in the argument block.
pub fn pointer(bytes: &[u8]) -> usize {
    u32::from_le_bytes(bytes.try_into().unwrap()).into_usize()
}
