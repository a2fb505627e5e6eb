//! Decoding of executable images.
//!
//! Executables are 32-bit little-endian ELF files. Only the program header
//! table is used: every entry becomes a [`Segment`], in table order, without
//! looking at its type. The toolchain used for user programs only emits
//! loadable headers, so this is enough to run them.
use bitflags::bitflags;
use config::MAX_SEGMENTS;
use log::{trace, warn};
use usize_cast::IntoUsize;

bitflags! {
    /// Access rights requested by a segment, as found in the `p_flags`
    /// field of its program header.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const EXECUTE = 1 << 0;
        const WRITE = 1 << 1;
        const READ = 1 << 2;
    }
}

/// Errors that can occur when parsing an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The image is empty.
    InvalidExecutable,

    /// The image describes more segments than a process can have.
    TooManySegments,

    /// The image is not a valid executable for this machine: bad magic
    /// number, a class other than 32-bit, big endian, a machine other than
    /// x86, or truncated headers.
    Malformed,
}

/// A contiguous region of the executable, copied at `address` in the
/// process memory. The first `length` bytes come from the image at `offset`,
/// and the remaining `size - length` bytes are zero.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: usize,
    pub length: usize,
    pub address: usize,
    pub size: usize,
    pub protection: Protection,
}

impl Segment {
    /// The first address past the end of the segment in memory, or `None`
    /// if it overflows.
    #[must_use]
    pub fn end(&self) -> Option<usize> {
        self.address.checked_add(self.size)
    }

    /// The file bytes of the segment, or `None` if they are not inside the
    /// image.
    #[must_use]
    pub fn bytes<'a>(&self, image: &'a [u8]) -> Option<&'a [u8]> {
        image.get(self.offset..self.offset.checked_add(self.length)?)
    }
}

/// The segments of an executable and the address where it starts.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ExecutableFormat {
    segments: heapless::Vec<Segment, MAX_SEGMENTS>,
    entry: usize,
}

impl ExecutableFormat {
    /// The segments, in the order of the program header table.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The entry point of the program.
    #[must_use]
    pub const fn entry(&self) -> usize {
        self.entry
    }

    /// The first address past the end of the highest segment in memory, or
    /// `None` if a segment overflows the address space.
    #[must_use]
    pub fn end(&self) -> Option<usize> {
        self.segments
            .iter()
            .try_fold(0, |end, segment| Some(end.max(segment.end()?)))
    }
}

/// Parse an executable image.
///
/// # Errors
/// Returns [`ParseError::InvalidExecutable`] if the image is empty,
/// [`ParseError::TooManySegments`] if the program header table has more than
/// [`MAX_SEGMENTS`] entries, or [`ParseError::Malformed`] if the image is not
/// a valid ELF file for this machine.
pub fn parse(image: &[u8]) -> Result<ExecutableFormat, ParseError> {
    if image.is_empty() {
        return Err(ParseError::InvalidExecutable);
    }

    let file = elf::ElfBytes::<elf::endian::LittleEndian>::minimal_parse(image).map_err(|err| {
        warn!("Invalid executable header: {err:?}");
        ParseError::Malformed
    })?;

    if file.ehdr.class != elf::file::Class::ELF32 || file.ehdr.e_machine != elf::abi::EM_386 {
        warn!(
            "Executable is not for this machine ({:?}, machine {})",
            file.ehdr.class, file.ehdr.e_machine
        );
        return Err(ParseError::Malformed);
    }

    if usize::from(file.ehdr.e_phnum) > MAX_SEGMENTS {
        warn!(
            "Executable has {} segments (max {})",
            file.ehdr.e_phnum, MAX_SEGMENTS
        );
        return Err(ParseError::TooManySegments);
    }

    let mut segments = heapless::Vec::new();
    for phdr in file.segments().iter().flat_map(|table| table.iter()) {
        let segment = Segment {
            offset: narrow(phdr.p_offset)?,
            length: narrow(phdr.p_filesz)?,
            address: narrow(phdr.p_vaddr)?,
            size: narrow(phdr.p_memsz)?,
            protection: Protection::from_bits_truncate(phdr.p_flags),
        };
        trace!(
            "Segment type {:#x} at {:#x} ({} bytes in file, {} in memory)",
            phdr.p_type, segment.address, segment.length, segment.size
        );
        segments
            .push(segment)
            .map_err(|_| ParseError::TooManySegments)?;
    }

    Ok(ExecutableFormat {
        segments,
        entry: narrow(file.ehdr.e_entry)?,
    })
}

/// Check that a header field fits in the 32-bit address space.
fn narrow(value: u64) -> Result<usize, ParseError> {
    u32::try_from(value)
        .map(IntoUsize::into_usize)
        .map_err(|_| ParseError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ImageBuilder;
    use alloc::vec;
    use proptest::prelude::*;

    #[test]
    fn empty_image() {
        assert_eq!(parse(&[]), Err(ParseError::InvalidExecutable));
    }

    #[test]
    fn garbage_image() {
        assert_eq!(parse(b"#!/bin/sh\necho hello\n"), Err(ParseError::Malformed));
    }

    #[test]
    fn foreign_machine() {
        let image = ImageBuilder::new(0x1000)
            .segment(0x1000, &[1; 16], 16, Protection::READ)
            .machine(62)
            .build();
        assert_eq!(parse(&image), Err(ParseError::Malformed));
    }

    #[test]
    fn wide_class() {
        // 64-bit x86 header with one loadable program header
        let mut image = vec![0; 64 + 56 + 16];
        image[..8].copy_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
        image[16..18].copy_from_slice(&2u16.to_le_bytes());
        image[18..20].copy_from_slice(&62u16.to_le_bytes());
        image[20..24].copy_from_slice(&1u32.to_le_bytes());
        image[24..32].copy_from_slice(&0x1000u64.to_le_bytes());
        image[32..40].copy_from_slice(&64u64.to_le_bytes());
        image[52..54].copy_from_slice(&64u16.to_le_bytes());
        image[54..56].copy_from_slice(&56u16.to_le_bytes());
        image[56..58].copy_from_slice(&1u16.to_le_bytes());
        image[58..60].copy_from_slice(&64u16.to_le_bytes());

        let phdr = &mut image[64..120];
        phdr[0..4].copy_from_slice(&1u32.to_le_bytes());
        phdr[4..8].copy_from_slice(&4u32.to_le_bytes());
        phdr[16..24].copy_from_slice(&0x1000u64.to_le_bytes());
        phdr[32..40].copy_from_slice(&16u64.to_le_bytes());
        phdr[40..48].copy_from_slice(&32u64.to_le_bytes());
        assert_eq!(parse(&image), Err(ParseError::Malformed));

        // Same image with the x86 machine number
        image[18..20].copy_from_slice(&3u16.to_le_bytes());
        assert_eq!(parse(&image), Err(ParseError::Malformed));
    }

    #[test]
    fn too_many_segments() {
        let image = ImageBuilder::new(0x1000)
            .segment(0x1000, &[1; 16], 16, Protection::READ)
            .segment(0x2000, &[2; 16], 16, Protection::READ)
            .segment(0x3000, &[3; 16], 16, Protection::READ)
            .segment(0x4000, &[4; 16], 16, Protection::READ)
            .build();
        assert_eq!(parse(&image), Err(ParseError::TooManySegments));
    }

    #[test]
    fn two_segments() {
        let code = [0x90; 100];
        let data = [0x42; 20];
        let image = ImageBuilder::new(0x1010)
            .segment(0x1000, &code, 100, Protection::READ | Protection::EXECUTE)
            .segment(0x2000, &data, 64, Protection::READ | Protection::WRITE)
            .build();

        let format = parse(&image).unwrap();
        assert_eq!(format.entry(), 0x1010);
        assert_eq!(format.end(), Some(0x2040));

        let [text, bss] = format.segments() else {
            panic!("expected two segments");
        };
        assert_eq!(text.bytes(&image), Some(&code[..]));
        assert_eq!(bss.bytes(&image), Some(&data[..]));
        assert_eq!(bss.size, 64);
        assert_eq!(bss.protection, Protection::READ | Protection::WRITE);
    }

    #[test]
    fn no_segments() {
        let format = parse(&ImageBuilder::new(0x1000).build()).unwrap();
        assert!(format.segments().is_empty());
        assert_eq!(format.end(), Some(0));
    }

    #[test]
    fn segment_outside_of_image() {
        let segment = Segment {
            offset: 10,
            length: 20,
            ..Segment::default()
        };
        assert_eq!(segment.bytes(&[0; 16]), None);
        assert_eq!(segment.bytes(&[0; 30]).map(<[u8]>::len), Some(20));
    }

    fn header() -> impl Strategy<Value = Segment> {
        (any::<u32>(), any::<u32>(), any::<u32>(), any::<u32>(), 0u32..8).prop_map(
            |(offset, length, address, size, flags)| Segment {
                offset: offset.into_usize(),
                length: length.into_usize(),
                address: address.into_usize(),
                size: size.into_usize(),
                protection: Protection::from_bits_truncate(flags),
            },
        )
    }

    proptest! {
        #[test]
        fn preserves_headers(entry in any::<u32>(), headers in prop::collection::vec(header(), 0..=MAX_SEGMENTS)) {
            let image = headers
                .iter()
                .fold(ImageBuilder::new(entry), |builder, segment| builder.header(segment))
                .build();

            let format = parse(&image).unwrap();
            prop_assert_eq!(format.entry(), entry.into_usize());
            prop_assert_eq!(format.segments(), &headers[..]);
        }
    }
}
