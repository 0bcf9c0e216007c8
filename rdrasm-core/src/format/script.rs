use std::io::{Cursor, Seek, SeekFrom};

use binrw::BinRead;
use bytes::Bytes;

use crate::format::container::{Container, ContainerError, ResourceHeader};
use crate::format::key::ScriptKey;
use crate::format::pages::{mask_ptr, AddressError, PageMap, PAGE_SIZE};
use crate::format::transform::Compression;

/// Fixed-layout script header, found at a page-aligned offset by magic
/// scan. Pointer fields carry a region tag in their top byte; it is
/// stripped at read time, leaving physical offsets into the decoded buffer.
#[derive(BinRead, Debug, Clone, serde::Serialize)]
#[br(big)]
pub struct ScriptHeader {
    pub magic: i32,
    #[br(map = mask_ptr)]
    pub page_map_ptr: u32,
    #[br(map = mask_ptr)]
    pub code_pages_ptr: u32,
    pub code_size: i32,
    pub param_count: i32,
    pub statics_size: i32,
    #[br(map = mask_ptr)]
    pub statics_ptr: u32,
    pub globals_vers: i32,
    pub natives_size: i32,
    #[br(map = mask_ptr)]
    pub natives_ptr: u32,
}

/// A fully decoded script: resource header, decoded buffer, script header,
/// page map and the header-side tables. Owned by the pipeline run that
/// produced it; the buffer is never mutated (the reassembler serializes
/// into its own copy).
#[derive(Debug, Clone)]
pub struct Script {
    pub resource: ResourceHeader,
    pub data: Bytes,
    pub header_pos: usize,
    pub header: ScriptHeader,
    pub pages: PageMap,
    /// Native hashes referenced by native-call instructions, in table order.
    pub natives: Vec<u32>,
    /// Initial values of the script's static variables.
    pub statics: Vec<i32>,
}

impl Script {
    /// Run the container codec and header stages: unwrap, locate the
    /// script header, build the page map, read the natives and statics
    /// tables.
    pub fn decode(
        raw: &[u8],
        key: Option<&ScriptKey>,
        codec: &dyn Compression,
    ) -> Result<Self, ContainerError> {
        let container = Container::read(raw, key, codec)?;
        let header_pos = container.find_script_header()?;

        let mut cursor = Cursor::new(&container.data[..]);
        cursor
            .seek(SeekFrom::Start(header_pos as u64))
            .map_err(|e| ContainerError::BadHeader(binrw::Error::Io(e)))?;
        let header = ScriptHeader::read(&mut cursor)?;

        let pages = Self::build_page_map(&container.data, &header)?;

        let natives = read_table(
            &container.data,
            "nativesPtr",
            header.natives_ptr as usize,
            header.natives_size.max(0) as usize,
        )?;
        let statics = read_table(
            &container.data,
            "staticsPtr",
            header.statics_ptr as usize,
            header.statics_size.max(0) as usize,
        )?
        .into_iter()
        .map(|v: u32| v as i32)
        .collect();

        log::debug!(
            "script header at {header_pos:#x}: {} code bytes over {} pages, {} natives, {} statics",
            header.code_size,
            pages.page_count(),
            header.natives_size,
            header.statics_size,
        );

        Ok(Self {
            resource: container.header,
            data: container.data,
            header_pos,
            header,
            pages,
            natives,
            statics,
        })
    }

    fn build_page_map(data: &Bytes, header: &ScriptHeader) -> Result<PageMap, ContainerError> {
        let code_size = header.code_size.max(0) as usize;
        let page_count = code_size.div_ceil(PAGE_SIZE);
        let table: Vec<u32> = read_table(
            data,
            "codePagesPtr",
            header.code_pages_ptr as usize,
            page_count,
        )?;

        let mut bases = Vec::with_capacity(page_count);
        for (page, &ptr) in table.iter().enumerate() {
            let base = mask_ptr(ptr) as usize;
            let len = code_size.min((page + 1) * PAGE_SIZE) - page * PAGE_SIZE;
            if base + len > data.len() {
                return Err(ContainerError::PointerOutOfBounds {
                    name: "codePagesPtr",
                    offset: base + len,
                    len: data.len(),
                });
            }
            bases.push(base);
        }
        Ok(PageMap::new(bases, code_size))
    }

    /// The code region as one contiguous image, in page order.
    pub fn code_image(&self) -> Result<Vec<u8>, AddressError> {
        self.pages.code_image(&self.data)
    }
}

/// Read `count` big-endian u32 values at a masked pointer, bounds-checked.
fn read_table(
    data: &Bytes,
    name: &'static str,
    offset: usize,
    count: usize,
) -> Result<Vec<u32>, ContainerError> {
    let end = offset + count * 4;
    if end > data.len() {
        return Err(ContainerError::PointerOutOfBounds {
            name,
            offset: end,
            len: data.len(),
        });
    }
    Ok(data[offset..end]
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
